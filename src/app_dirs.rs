//! Application directory helpers anchored to a single `.mailtriage` folder.
//!
//! Config, model versions and log files all live under one root that defaults to
//! the OS config directory. `MAILTRIAGE_CONFIG_HOME` relocates it for tests and
//! portable installs.

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS config root.
pub const APP_DIR_NAME: &str = ".mailtriage";
/// Environment variable that replaces the OS config root.
pub const CONFIG_HOME_ENV: &str = "MAILTRIAGE_CONFIG_HOME";

static ROOT_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base config directory could be resolved.
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    /// Failed to create one of the application directories.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.mailtriage` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let root = match root_override() {
        Some(path) => path,
        None => base_dir().ok_or(AppDirError::NoBaseDir)?.join(APP_DIR_NAME),
    };
    ensure_dir(root)
}

/// Directory holding per-launch log files.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("logs"))
}

/// Directory holding persisted model versions.
pub fn models_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("models"))
}

/// Pin the application root to an explicit directory for the rest of the process.
pub fn set_app_root_override(path: PathBuf) -> Result<(), AppDirError> {
    let path = ensure_dir(path)?;
    let mut guard = ROOT_OVERRIDE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(path);
    Ok(())
}

/// Drop any root pinned with [`set_app_root_override`].
pub fn clear_app_root_override() {
    let mut guard = ROOT_OVERRIDE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = None;
}

fn root_override() -> Option<PathBuf> {
    ROOT_OVERRIDE.lock().ok().and_then(|guard| guard.clone())
}

fn base_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_HOME_ENV) {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
