//! mender-artifact - create, inspect, sign and modify update artifacts
//!
//! The container codec lives in the `mender_format` crate. This crate adds
//! the layered configuration, key loading, atomic output placement and the
//! command implementations used by the `mender-artifact` binary.

pub mod commands;
pub mod config;
pub mod keys;
pub mod output;

pub use commands::{CommandError, ImageEdits, PayloadMounter};
pub use config::{ConfigError, EffectiveConfig, ToolConfig};
pub use keys::{load_signer, load_verifier, KeyError};
pub use output::place_atomically;
