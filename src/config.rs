//! Profiler configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration.
//!
//! ```
//! use vmprof::config::ProfilerConfig;
//!
//! let config = ProfilerConfig::from_toml_str(r#"
//!     sort_by = "calls"
//!
//!     [selection]
//!     gamemode = true
//!     filterscripts = ["admin", "race.amx"]
//! "#).unwrap();
//! assert!(config.subtract_child_time);
//! assert!(config.selection.wants("gamemodes/lvdm.amx"));
//! assert!(config.selection.wants("filterscripts\\race.amx"));
//! ```

use crate::error::{ProfilerError, Result};
use crate::stats::SortMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

const GAMEMODE_DIR: &str = "gamemodes/";
const FILTERSCRIPT_DIR: &str = "filterscripts/";

/// Settings for the profiling engine and its consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Attribute each finished call's time to its caller's child time
    ///
    /// When disabled child time stays zero and self time equals total time,
    /// matching profiles produced before child accounting existed.
    pub subtract_child_time: bool,

    /// Record caller/callee pairs for the call graph
    pub call_graph: bool,

    /// Order in which consumers list functions
    pub sort_by: SortMode,

    /// Which loaded programs get a profiler
    pub selection: ProfileSelection,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            subtract_child_time: true,
            call_graph: true,
            sort_by: SortMode::Time,
            selection: ProfileSelection::default(),
        }
    }
}

impl ProfilerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Reject selections that can never match a program
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = self
            .selection
            .filterscripts
            .iter()
            .chain(&self.selection.scripts)
            .find(|name| name.trim().is_empty())
        {
            return Err(ProfilerError::InvalidConfig(format!(
                "empty program name in selection: {:?}",
                name
            )));
        }
        Ok(())
    }
}

/// Program selection rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSelection {
    /// Profile every program
    pub all: bool,
    /// Profile programs loaded from `gamemodes/`
    pub gamemode: bool,
    /// Filterscript names under `filterscripts/`, with or without `.amx`
    pub filterscripts: Vec<String>,
    /// Explicit program paths
    pub scripts: Vec<String>,
}

impl ProfileSelection {
    pub fn wants(&self, program: &str) -> bool {
        if self.all {
            return true;
        }

        let path = to_portable_path(program);
        if self.scripts.iter().any(|s| to_portable_path(s) == path) {
            return true;
        }

        if path.contains(GAMEMODE_DIR) {
            return self.gamemode;
        }

        if path.contains(FILTERSCRIPT_DIR) {
            return self.filterscripts.iter().any(|fs| {
                let bare = format!("{}{}", FILTERSCRIPT_DIR, fs);
                path == bare || path == format!("{}.amx", bare)
            });
        }

        false
    }
}

/// Replace back slashes with forward slashes
pub fn to_portable_path(path: &str) -> String {
    path.replace('\\', "/")
}
