//! Configuration and data directories for mailsort
//!
//! Settings and OAuth client files live in the config directory
//! (`~/.config/mailsort/`), the SQLite database in the data directory
//! (`~/.local/share/mailsort/` on Linux). `MAILSORT_CONFIG_DIR` and
//! `MAILSORT_DATA_DIR` relocate them.
//!
//! Call [`init`] at application startup to create both directories.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "mailsort";
const CONFIG_DIR_ENV: &str = "MAILSORT_CONFIG_DIR";
const DATA_DIR_ENV: &str = "MAILSORT_DATA_DIR";

/// Create the config and data directories, returning the config directory
pub fn init() -> Result<PathBuf> {
    if let Some(data) = data_dir() {
        ensure_dir(&data)?;
    }
    let dir = config_dir().context("Could not determine config directory")?;
    ensure_dir(&dir)?;
    Ok(dir)
}

/// The config directory
pub fn config_dir() -> Option<PathBuf> {
    env_dir(CONFIG_DIR_ENV).or_else(|| dirs::config_dir().map(|p| p.join(APP_DIR)))
}

/// The data directory, falling back to the config directory
pub fn data_dir() -> Option<PathBuf> {
    env_dir(DATA_DIR_ENV)
        .or_else(|| dirs::data_dir().map(|p| p.join(APP_DIR)))
        .or_else(config_dir)
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Path of a file in the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Whether a file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Load a JSON file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load a JSON file from the config directory, or `T::default()` if absent
pub fn load_json_or_default<T: DeserializeOwned + Default>(filename: &str) -> Result<T> {
    match config_path(filename) {
        Some(path) if path.exists() => load_json_file(&path),
        _ => Ok(T::default()),
    }
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Save a value as pretty JSON in the config directory, returning the path
pub fn save_json<T: Serialize>(filename: &str, value: &T) -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    ensure_dir(&dir)?;
    let path = dir.join(filename);
    save_json_file(&path, value)?;
    Ok(path)
}

/// Save a value as pretty JSON at `path`
///
/// Written to a sibling temp file first and renamed into place, so readers
/// never see a partial file.
pub fn save_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write config file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace config file: {}", path.display()))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}
