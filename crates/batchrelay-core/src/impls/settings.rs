//! SettingsStore implementations.
//!
//! - `InMemorySettingsStore`: tests and ephemeral runs
//! - `FileSettingsStore`: one TOML file; a missing file reads as defaults

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Settings;
use crate::domain::ConfigError;
use crate::ports::SettingsStore;

#[derive(Default)]
pub struct InMemorySettingsStore {
    settings: Mutex<Settings>,
}

impl InMemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn load(&self) -> Result<Settings, ConfigError> {
        Ok(self.settings.lock().await.clone())
    }

    async fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        *self.settings.lock().await = settings.clone();
        Ok(())
    }
}

pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<Settings, ConfigError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Settings::load_str(&content),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file; using defaults");
                Ok(Settings::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, settings.to_toml_string()?).await?;
        debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}
