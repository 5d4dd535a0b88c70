//! Multi-source configuration loader.

use std::env;
use std::path::{Path, PathBuf};

use crate::{ConfigError, CoreConfig};

/// Builder that merges defaults, project files, and environment variables
/// into a validated [`CoreConfig`].
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "AEGIS".to_string(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads and validates configuration from, in increasing precedence:
    /// built-in defaults, `aegis.toml`, `aegis.local.toml`, then `AEGIS_*`
    /// environment variables.
    pub fn load(self) -> Result<CoreConfig, ConfigError> {
        let mut builder = config::Config::builder();

        let defaults = CoreConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let project_file = self.project_dir.join("aegis.toml");
        if project_file.exists() {
            builder = builder.add_source(
                config::File::from(project_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let local_file = self.project_dir.join("aegis.local.toml");
        if local_file.exists() {
            builder = builder.add_source(
                config::File::from(local_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder.build()?;
        let core_config: CoreConfig = built.try_deserialize()?;
        core_config.validate()?;
        Ok(core_config)
    }

    pub fn load_or_default(self) -> CoreConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_defaults_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .expect("defaults must load");
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.leader_ttl_secs, 5.0);
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("aegis.toml"),
            "pool_size = 3\nleader_ttl_secs = 8.0\nelection_timeout_secs = 20.0\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .expect("override must load");
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.leader_ttl_secs, 8.0);
    }

    #[test]
    fn local_file_overrides_project_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("aegis.toml"), "pool_size = 3\n").unwrap();
        fs::write(dir.path().join("aegis.local.toml"), "pool_size = 5\n").unwrap();

        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .expect("local override must load");
        assert_eq!(config.pool_size, 5);
    }

    #[test]
    fn invalid_merged_config_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("aegis.toml"),
            "leader_ttl_secs = 1.0\nelection_heartbeat_secs = 5.0\n",
        )
        .unwrap();

        let result = ConfigLoader::new().with_project_dir(dir.path()).load();
        assert!(result.is_err());
    }
}
