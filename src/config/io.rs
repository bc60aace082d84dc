use std::path::{Path, PathBuf};

use tracing::info;

use super::{ConfigError, TriageConfig};
use crate::app_dirs;

/// Default filename used to store the configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resolve the configuration file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from the application directory, returning defaults if missing.
pub fn load_or_default() -> Result<TriageConfig, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        info!("No config at {}, using defaults", path.display());
        return Ok(TriageConfig::default());
    }
    load_from(&path)
}

/// Load and validate a specific config file.
pub fn load_from(path: &Path) -> Result<TriageConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: TriageConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Write configuration through a temporary sibling file so readers never see a partial file.
pub fn save_to(config: &TriageConfig, path: &Path) -> Result<(), ConfigError> {
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let tmp = path.with_extension(format!("toml.tmp-{:08x}", rand::random::<u32>()));
    std::fs::write(&tmp, data.as_bytes()).map_err(write_err)?;
    if let Err(source) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(source));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrimaryMetric;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = TriageConfig::default();
        config.accounts.priority_order = vec!["work".into()];
        config.learning.primary_metric = PrimaryMetric::WeightedF1;
        config.learning.training_timeout_secs = Some(30);
        save_to(&config, &path).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.accounts.priority_order, vec!["work"]);
        assert_eq!(loaded.learning.primary_metric, PrimaryMetric::WeightedF1);
        assert_eq!(loaded.learning.training_timeout_secs, Some(30));
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn invalid_values_are_rejected_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[model]\nuncertainty_margin = 4.0\n").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn malformed_toml_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[model\n").unwrap();
        match load_from(&path) {
            Err(ConfigError::ParseToml { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
