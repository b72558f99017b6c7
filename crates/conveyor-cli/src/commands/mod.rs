//! CLI command implementations.

pub mod jobs;
pub mod sweep;

use anyhow::{Context, Result};
use conveyor_config::{CoordinatorConfig, StoreBackend, load_coordinator_config};
use conveyor_scheduler::Coordinator;
use std::path::{Path, PathBuf};

/// Global options shared by every command.
pub struct Settings {
    pub config: Option<PathBuf>,
    pub store_url: Option<String>,
    pub store_password: Option<String>,
}

impl Settings {
    /// Configuration file contents with command-line overrides applied.
    pub fn load(&self) -> Result<CoordinatorConfig> {
        let mut config = match &self.config {
            Some(path) => load_coordinator_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => CoordinatorConfig::default(),
        };

        if let Some(url) = &self.store_url {
            let password = match &config.store.backend {
                StoreBackend::Redis { password, .. } => password.clone(),
                StoreBackend::Memory => None,
            };
            config.store.backend = StoreBackend::Redis {
                url: url.clone(),
                password,
            };
        }
        if let StoreBackend::Redis { password, .. } = &mut config.store.backend {
            if let Some(secret) = &self.store_password {
                *password = Some(secret.clone());
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub async fn connect(&self) -> Result<Coordinator> {
        let config = self.load()?;
        Coordinator::connect(config)
            .await
            .context("failed to connect to the store")
    }
}

pub fn validate(path: &Path) -> Result<()> {
    match load_coordinator_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  retry attempts:   {}", config.retry.max_attempts);
            println!("  retry base delay: {:?}", config.retry.base_delay);
            println!("  heartbeat window: {:?}", config.heartbeat.window);
            println!("  job timeout:      {:?}", config.job_timeout);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            config: None,
            store_url: None,
            store_password: None,
        }
    }

    #[test]
    fn test_defaults_without_config_file() {
        let config = settings().load().unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_store_url_override() {
        let settings = Settings {
            store_url: Some("redis://cache:6380".to_string()),
            store_password: Some("hunter2".to_string()),
            ..settings()
        };
        let config = settings.load().unwrap();
        assert_eq!(
            config.store.backend,
            StoreBackend::Redis {
                url: "redis://cache:6380".to_string(),
                password: Some("hunter2".to_string()),
            }
        );
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let settings = Settings {
            config: Some(PathBuf::from("/nonexistent/conveyor.kdl")),
            ..settings()
        };
        assert!(settings.load().is_err());
    }
}
