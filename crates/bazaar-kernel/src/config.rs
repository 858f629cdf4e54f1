//! Configuration loading from a TOML file, with defaults.
//!
//! A missing, unreadable, or malformed file is never fatal: the loader warns
//! and falls back to [`SystemConfig::default`], which is a runnable setup.

use bazaar_types::config::SystemConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config location, relative to the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("bazaar.toml")
}

/// Load system configuration, falling back to defaults on any failure.
pub fn load_config(path: Option<&Path>) -> SystemConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<SystemConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "No config file found, using defaults"
        );
    }

    SystemConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("bazaar-config-{}.toml", Uuid::new_v4()))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/bazaar.toml")));
        assert_eq!(config.topic, "bazaar.agents");
    }

    #[test]
    fn test_valid_file_overrides_defaults() {
        let path = temp_path();
        std::fs::write(
            &path,
            r#"
            topic = "market.test"

            [seller]
            min_price = 60.0
            "#,
        )
        .unwrap();
        let config = load_config(Some(&path));
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.topic, "market.test");
        assert_eq!(config.seller.min_price, 60.0);
        assert_eq!(config.seller.ideal_price, 80.0);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let path = temp_path();
        std::fs::write(&path, "topic = [this is not toml").unwrap();
        let config = load_config(Some(&path));
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.topic, "bazaar.agents");
    }
}
