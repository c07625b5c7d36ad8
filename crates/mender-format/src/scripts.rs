//! State-script registry.
//!
//! Script names follow `<State>_<Action>_<NN>[_<description>]`. Names are
//! checked when scripts are added for writing and again when they are
//! decoded from an artifact. Order is preserved and duplicates are kept.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use walkdir::WalkDir;

use crate::error::{ArtifactError, Result};

/// Directory prefix of script entries inside the header archive
pub const SCRIPTS_PREFIX: &str = "scripts/";

/// Lifecycle states a bundled script may hook into
pub const SCRIPT_STATES: &[&str] = &[
    "ArtifactInstall",
    "ArtifactReboot",
    "ArtifactCommit",
    "ArtifactRollback",
    "ArtifactRollbackReboot",
    "ArtifactFailure",
];

/// Actions within a state
pub const SCRIPT_ACTIONS: &[&str] = &["Enter", "Leave", "Error"];

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(
            r"^({})_({})_[0-9]{{2}}(_[^\s/]+)?$",
            SCRIPT_STATES.join("|"),
            SCRIPT_ACTIONS.join("|")
        );
        Regex::new(&pattern).expect("script name pattern is a valid regex")
    })
}

/// Check a script name against the recognised lifecycle hooks
pub fn validate_script_name(name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ArtifactError::InvalidScriptName(name.to_string()))
    }
}

/// Where the bytes of a script to be written come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    File(PathBuf),
    Inline(Vec<u8>),
}

/// A script queued for writing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub name: String,
    pub source: ScriptSource,
}

impl Script {
    /// Open the script content
    pub fn open(&self) -> Result<(u64, Box<dyn Read + '_>)> {
        match &self.source {
            ScriptSource::File(path) => {
                let file = File::open(path)?;
                let size = file.metadata()?.len();
                Ok((size, Box::new(file)))
            }
            ScriptSource::Inline(bytes) => Ok((bytes.len() as u64, Box::new(bytes.as_slice()))),
        }
    }
}

/// Ordered collection of scripts for a write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scripts {
    scripts: Vec<Script>,
}

impl Scripts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script file; its file name is the script name
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArtifactError::InvalidScriptName(path.display().to_string()))?;
        self.add_named_file(name, path)
    }

    /// Add a script file under an explicit name
    pub fn add_named_file(&mut self, name: &str, path: &Path) -> Result<()> {
        validate_script_name(name)?;
        self.scripts.push(Script {
            name: name.to_string(),
            source: ScriptSource::File(path.to_path_buf()),
        });
        Ok(())
    }

    /// Add a script from memory
    pub fn add_inline(&mut self, name: &str, content: impl Into<Vec<u8>>) -> Result<()> {
        validate_script_name(name)?;
        self.scripts.push(Script {
            name: name.to_string(),
            source: ScriptSource::Inline(content.into()),
        });
        Ok(())
    }

    /// Add a script file, or every regular file of a directory in name order
    pub fn add_path(&mut self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return self.add_file(path);
        }
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                self.add_file(entry.path())?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Script> {
        self.scripts.iter()
    }

    /// Names in declared order
    pub fn names(&self) -> Vec<String> {
        self.scripts.iter().map(|s| s.name.clone()).collect()
    }
}

/// Script decoded from an artifact, held until it is handed to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedScript {
    pub name: String,
    pub content: Vec<u8>,
}
