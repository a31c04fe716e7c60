// libs/scheduling-cell/src/services/settings.rs
//
// Single-row persistence for AvailabilitySettings. Reads never fail the
// availability computation: any persistence problem logs a warning and falls
// back to built-in defaults. Writes surface their errors to the admin caller.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_practice::PracticeClient;

use crate::models::{
    AvailabilitySettings, BlockedTimeSlot, SchedulingError, SettingsPatch,
};

const SETTINGS_PATH: &str = "/api/v1/availability_settings";

pub struct SettingsStore {
    client: Arc<PracticeClient>,
}

impl SettingsStore {
    pub fn new(client: Arc<PracticeClient>) -> Self {
        Self { client }
    }

    /// Current settings, falling back to defaults if the row is missing or
    /// unreadable. A missing row is seeded best-effort so later writes merge
    /// against the same baseline.
    pub async fn get_settings(&self) -> AvailabilitySettings {
        match self
            .client
            .request::<Vec<AvailabilitySettings>>(Method::GET, SETTINGS_PATH, None)
            .await
        {
            Ok(rows) => match rows.into_iter().next() {
                Some(settings) => settings,
                None => {
                    debug!("No availability settings row, seeding defaults");
                    let defaults = AvailabilitySettings::default();
                    if let Err(e) = self.persist(&defaults, Method::POST).await {
                        warn!("Failed to seed default availability settings: {}", e);
                    }
                    defaults
                }
            },
            Err(e) => {
                warn!("Availability settings unreadable, using defaults: {}", e);
                AvailabilitySettings::default()
            }
        }
    }

    /// Merge a partial update into the current settings and persist. Write
    /// failures are surfaced, never silently dropped.
    pub async fn update_settings(
        &self,
        patch: SettingsPatch,
    ) -> Result<AvailabilitySettings, SchedulingError> {
        let mut settings = self.get_settings().await;
        settings.apply_patch(patch);
        settings.validate()?;

        self.persist(&settings, Method::PATCH).await?;
        Ok(settings)
    }

    pub async fn block_date(
        &self,
        date: chrono::NaiveDate,
    ) -> Result<AvailabilitySettings, SchedulingError> {
        let mut settings = self.get_settings().await;
        settings.block_date(date);
        self.persist(&settings, Method::PATCH).await?;
        Ok(settings)
    }

    pub async fn unblock_date(
        &self,
        date: chrono::NaiveDate,
    ) -> Result<AvailabilitySettings, SchedulingError> {
        let mut settings = self.get_settings().await;
        settings.unblock_date(date);
        self.persist(&settings, Method::PATCH).await?;
        Ok(settings)
    }

    pub async fn block_time_slot(
        &self,
        slot: BlockedTimeSlot,
    ) -> Result<AvailabilitySettings, SchedulingError> {
        let mut settings = self.get_settings().await;
        settings.block_time_slot(slot);
        self.persist(&settings, Method::PATCH).await?;
        Ok(settings)
    }

    pub async fn unblock_time_slot(
        &self,
        slot: &BlockedTimeSlot,
    ) -> Result<AvailabilitySettings, SchedulingError> {
        let mut settings = self.get_settings().await;
        settings.unblock_time_slot(slot);
        self.persist(&settings, Method::PATCH).await?;
        Ok(settings)
    }

    async fn persist(
        &self,
        settings: &AvailabilitySettings,
        method: Method,
    ) -> Result<(), SchedulingError> {
        let body = serde_json::to_value(settings)
            .map_err(|e| SchedulingError::Configuration(e.to_string()))?;

        let _: Value = self
            .client
            .request(method, SETTINGS_PATH, Some(json!(body)))
            .await
            .map_err(|e| {
                SchedulingError::Configuration(format!("Failed to persist settings: {}", e))
            })?;

        Ok(())
    }
}
