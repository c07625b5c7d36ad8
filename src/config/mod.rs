//! Configuration merge system
//!
//! Implements the 3-layer configuration merge:
//! 1. Built-in defaults
//! 2. Config file (`--config` or `MENDER_ARTIFACT_CONFIG`)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, ToolConfig};
pub use merge::{deep_merge, merge_layers};
