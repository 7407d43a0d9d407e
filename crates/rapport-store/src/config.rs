//! Data directory resolution and TOML config loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rapport_core::MatchConfig;

use crate::error::Result;

pub const CONFIG_FILE: &str = "rapport.toml";
pub const DB_FILE: &str = "drift.db";
pub const DATA_DIR_ENV: &str = "RAPPORT_DATA_DIR";

/// `~/.rapport`, falling back to the working directory without a home.
pub fn default_base_dir() -> PathBuf {
    dirs_home().join(".rapport")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// `$RAPPORT_DATA_DIR` when set and non-empty, else the default.
pub fn resolve_base_dir() -> PathBuf {
    env::var(DATA_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_base_dir)
}

/// Load and validate engine config.
///
/// An explicit path must exist. Otherwise `<base_dir>/rapport.toml` is used
/// when present, and defaults when not.
pub fn load_config(explicit: Option<&Path>, base_dir: &Path) -> Result<MatchConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let candidate = base_dir.join(CONFIG_FILE);
            candidate.is_file().then_some(candidate)
        }
    };

    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(&path)?;
            let config = parse_config(&text)?;
            tracing::debug!(path = %path.display(), "loaded config");
            config
        }
        None => MatchConfig::default(),
    };
    Ok(config)
}

/// Parse and validate a TOML document.
pub fn parse_config(text: &str) -> Result<MatchConfig> {
    let config: MatchConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}
