//! SettingsStore port - persisted operator settings.
//!
//! Plain read/write; no transactional guarantees.

use async_trait::async_trait;

use crate::config::{Placement, Settings};
use crate::domain::ConfigError;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stored settings, or defaults when nothing was saved yet.
    async fn load(&self) -> Result<Settings, ConfigError>;

    async fn save(&self, settings: &Settings) -> Result<(), ConfigError>;

    async fn update_delay(&self, delay_secs: u64) -> Result<(), ConfigError> {
        let mut settings = self.load().await?;
        settings.general.delay_secs = delay_secs;
        self.save(&settings).await
    }

    async fn update_placement(&self, placement: Placement) -> Result<(), ConfigError> {
        let mut settings = self.load().await?;
        settings.ui.placement = placement;
        self.save(&settings).await
    }
}
