//! Configuration loader with layered sources.

use config::{Config, ConfigError, Environment, File};
use kestrel_core::{KestrelError, KestrelResult, ValidateExt};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tracing::{debug, info};
use validator::Validate;

/// Environment variable selecting the environment-specific file.
pub const ENVIRONMENT_VAR: &str = "KESTREL_ENVIRONMENT";

/// Default prefix for environment variable overrides.
pub const DEFAULT_ENV_PREFIX: &str = "KESTREL";

/// Layered configuration loader.
///
/// Sources are applied in order, later ones overriding earlier ones:
/// 1. `{dir}/default.toml`
/// 2. `{dir}/{environment}.toml`
/// 3. `{dir}/local.toml` (not committed to version control)
/// 4. Environment variables, `KESTREL__QUEUE__MAX_ATTEMPTS=5` style
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    environment: String,
    env_prefix: String,
    load_dotenv: bool,
}

impl ConfigLoader {
    /// Creates a loader reading from the given directory.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            environment: std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string()),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            load_dotenv: true,
        }
    }

    /// Creates a loader reading from `./config`.
    pub fn from_default_location() -> Self {
        Self::new("./config")
    }

    /// Overrides the environment name.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Overrides the environment variable prefix.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skips loading a `.env` file.
    #[must_use]
    pub fn without_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    /// Returns the environment name in use.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Loads and validates the settings.
    pub fn load<T>(&self) -> KestrelResult<T>
    where
        T: DeserializeOwned + Validate,
    {
        if self.load_dotenv {
            if let Err(e) = dotenvy::dotenv() {
                debug!("No .env file found or error loading it: {}", e);
            }
        }

        info!(
            environment = %self.environment,
            config_dir = %self.config_dir.display(),
            "Loading configuration"
        );

        let mut builder = Config::builder();

        for name in ["default", self.environment.as_str(), "local"] {
            let path = self.config_dir.join(format!("{}.toml", name));
            if path.exists() {
                debug!(path = %path.display(), "Loading config file");
                builder = builder.add_source(File::with_name(&path.to_string_lossy()).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let settings: T = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(config_error_to_kestrel_error)?;

        settings.validate_config()?;

        Ok(settings)
    }
}

fn config_error_to_kestrel_error(err: ConfigError) -> KestrelError {
    KestrelError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use std::path::Path;

    #[derive(Debug, Deserialize, Validate)]
    struct Settings {
        #[validate(length(min = 1))]
        name: String,
        #[serde(default)]
        #[validate(range(min = 1))]
        workers: u32,
    }

    fn write(dir: &Path, file: &str, contents: &str) {
        fs::write(dir.join(file), contents).unwrap();
    }

    #[test]
    fn test_layers_override_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.toml", "name = \"base\"\nworkers = 1\n");
        write(dir.path(), "staging.toml", "workers = 4\n");
        write(dir.path(), "local.toml", "name = \"local\"\n");

        let settings: Settings = ConfigLoader::new(dir.path())
            .with_environment("staging")
            .with_env_prefix("KESTREL_LOADER_TEST_LAYERS")
            .without_dotenv()
            .load()
            .unwrap();

        assert_eq!(settings.name, "local");
        assert_eq!(settings.workers, 4);
    }

    #[test]
    fn test_environment_variables_win() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.toml", "name = \"base\"\nworkers = 1\n");
        std::env::set_var("KESTREL_LOADER_TEST_ENV__WORKERS", "8");

        let settings: Settings = ConfigLoader::new(dir.path())
            .with_environment("development")
            .with_env_prefix("KESTREL_LOADER_TEST_ENV")
            .without_dotenv()
            .load()
            .unwrap();

        std::env::remove_var("KESTREL_LOADER_TEST_ENV__WORKERS");
        assert_eq!(settings.workers, 8);
    }

    #[test]
    fn test_validation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.toml", "name = \"base\"\nworkers = 0\n");

        let result: KestrelResult<Settings> = ConfigLoader::new(dir.path())
            .with_env_prefix("KESTREL_LOADER_TEST_INVALID")
            .without_dotenv()
            .load();

        match result {
            Err(KestrelError::Validation(msg)) => assert!(msg.contains("workers")),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_field() {
        let dir = tempfile::tempdir().unwrap();

        let result: KestrelResult<Settings> = ConfigLoader::new(dir.path())
            .with_env_prefix("KESTREL_LOADER_TEST_MISSING")
            .without_dotenv()
            .load();

        assert!(matches!(result, Err(KestrelError::Configuration(_))));
    }
}
