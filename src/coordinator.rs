//! ==============================================================================
//! coordinator.rs - the one entry point to the hub's state
//! ==============================================================================
//!
//! purpose:
//!     owns the telemetry log, the alert log and the command record, and is
//!     the only thing handlers talk to. producers never get a reference to
//!     the stored command state, only copies.
//!
//! responsibilities:
//!     - stamp write times (utc now)
//!     - write through to sqlite before a write becomes visible (when a
//!       database is configured)
//!     - sequence detection: alert appended and buzzer escalated together,
//!       in one database transaction
//!     - serve the "latest" views
//!
//! lock order:
//!     command, then alerts. telemetry is never held with either. a store's
//!     lock is held across its database write, so rows land in the same
//!     order as the in-memory logs.
//!
//! relationships:
//!     - uses: telemetry.rs, alerts.rs, command.rs, store.rs
//!     - used by: web.rs (one Arc<Coordinator> shared by all handlers)
//!
//! ==============================================================================

use chrono::Utc;
use serde::Serialize;

use crate::alerts::AlertLog;
use crate::command::{CommandChannel, Mutation};
use crate::config::HubConfig;
use crate::domain::{
    Actuators, CommandPayload, CommandState, PestAlert, SensorReading, TelemetryPayload, Timestamp,
};
use crate::error::Result;
use crate::store::Store;
use crate::telemetry::TelemetryLog;

pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// everything a dashboard shows at once
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub telemetry: Option<SensorReading>,
    pub alert: Option<PestAlert>,
    pub command: CommandState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub readings: usize,
    pub alerts: usize,
    /// database location, absent when running in memory
    pub storage: Option<String>,
}

pub struct Coordinator {
    telemetry: TelemetryLog,
    alerts: AlertLog,
    command: CommandChannel,
    store: Option<Store>,
    recent_limit: usize,
    show_sensor_data: bool,
}

fn now() -> Timestamp {
    Utc::now().naive_utc()
}

impl Coordinator {
    /// In-memory hub, nothing persisted
    pub fn new(recent_limit: usize) -> Self {
        Self {
            telemetry: TelemetryLog::new(),
            alerts: AlertLog::new(),
            command: CommandChannel::new(now()),
            store: None,
            recent_limit: recent_limit.max(1),
            show_sensor_data: false,
        }
    }

    /// Hub backed by `store`, starting from whatever it holds
    pub async fn from_store(store: Store, recent_limit: usize) -> Result<Self> {
        let snapshot = store.load().await?;
        let mut hub = Self::new(recent_limit);

        for reading in snapshot.readings {
            if let Err(e) = hub.telemetry.record(reading).await {
                tracing::warn!(error = %e, "dropping stored reading");
            }
        }
        for alert in snapshot.alerts {
            hub.alerts.restore(alert).await;
        }
        hub.command.restore(snapshot.command).await;

        tracing::info!(
            location = store.location(),
            readings = hub.telemetry.len().await,
            alerts = hub.alerts.len().await,
            "state loaded from database"
        );
        hub.store = Some(store);
        Ok(hub)
    }

    /// Build the hub from config, opening the database if one is configured
    pub async fn open(config: &HubConfig) -> Result<Self> {
        let mut hub = match &config.storage.database_path {
            Some(path) => Self::from_store(Store::open(path).await?, config.telemetry.recent_limit).await?,
            None => Self::new(config.telemetry.recent_limit),
        };
        hub.show_sensor_data = config.logging.show_sensor_data;
        Ok(hub)
    }

    /// Release the database, if any
    pub async fn close(&self) {
        if let Some(store) = &self.store {
            store.close().await;
        }
    }

    async fn persist_reading(&self, reading: SensorReading) -> Result<()> {
        match &self.store {
            Some(store) => store.insert_reading(&reading).await,
            None => Ok(()),
        }
    }

    async fn persist_command(&self, state: CommandState) -> Result<()> {
        match &self.store {
            Some(store) => store.save_command(&state).await,
            None => Ok(()),
        }
    }

    async fn persist_detection(&self, alert: PestAlert, state: CommandState) -> Result<()> {
        match &self.store {
            Some(store) => store.record_detection(&alert, &state).await,
            None => Ok(()),
        }
    }

    // ==========================================================================
    // sensor device
    // ==========================================================================

    /// Validate and store one reading
    pub async fn ingest_telemetry(&self, payload: TelemetryPayload) -> Result<SensorReading> {
        let reading = SensorReading::try_from(payload)?;
        self.record_reading(reading.clone()).await?;
        Ok(reading)
    }

    pub async fn record_reading(&self, reading: SensorReading) -> Result<()> {
        let (temperature, humidity) = (reading.temperature, reading.humidity);
        self.telemetry.record_with(reading, |r| self.persist_reading(r)).await?;

        if self.show_sensor_data {
            tracing::info!(temperature, humidity, "reading");
        } else {
            tracing::debug!(temperature, humidity, "reading");
        }
        Ok(())
    }

    /// What the field device should do right now
    pub async fn command(&self) -> Actuators {
        self.command.read().await.actuators()
    }

    // ==========================================================================
    // operator
    // ==========================================================================

    /// Full-state write: fields missing from the payload turn off
    pub async fn set_command(&self, payload: CommandPayload) -> Result<CommandState> {
        let state = self.mutate(Mutation::Replace(payload.into_full())).await?;
        tracing::info!(spray = state.spray, light = state.light, buzzer = state.buzzer, "command replaced");
        Ok(state)
    }

    /// Partial write: fields missing from the payload are left alone
    pub async fn patch_command(&self, payload: CommandPayload) -> Result<CommandState> {
        let state = self.mutate(Mutation::Patch(payload.into_patch())).await?;
        tracing::info!(spray = state.spray, light = state.light, buzzer = state.buzzer, "command patched");
        Ok(state)
    }

    async fn mutate(&self, mutation: Mutation) -> Result<CommandState> {
        let (state, ()) = self
            .command
            .commit_with(mutation, now(), |next| self.persist_command(next))
            .await?;
        Ok(state)
    }

    // ==========================================================================
    // detection pipeline
    // ==========================================================================

    /// Record the outcome of a detection
    ///
    /// a negative outcome records nothing. a positive one appends an alert
    /// and turns the buzzer on; spray and light keep whatever value they
    /// have at the moment of escalation. both changes are stored together or
    /// not at all.
    pub async fn report_detection(&self, detected: bool) -> Result<Option<PestAlert>> {
        if !detected {
            tracing::debug!("detection negative, nothing recorded");
            return Ok(None);
        }

        let at = now();
        let (_, alert) = self
            .command
            .commit_with(Mutation::EscalateBuzzer, at, |next| async move {
                self.alerts
                    .record_detection_with(at, |alert| self.persist_detection(alert, next))
                    .await
            })
            .await?;

        tracing::warn!(time = %alert.observed_at, "pest detected, buzzer escalated");
        Ok(Some(alert))
    }

    // ==========================================================================
    // read-only views
    // ==========================================================================

    pub async fn latest_telemetry(&self) -> Option<SensorReading> {
        self.telemetry.latest_one().await
    }

    pub async fn recent_telemetry(&self) -> Vec<SensorReading> {
        self.telemetry.latest(self.recent_limit).await
    }

    pub async fn latest_alert(&self) -> Option<PestAlert> {
        self.alerts.latest_one().await
    }

    pub async fn command_state(&self) -> CommandState {
        self.command.read().await
    }

    pub async fn overview(&self) -> Overview {
        Overview {
            telemetry: self.latest_telemetry().await,
            alert: self.latest_alert().await,
            command: self.command_state().await,
        }
    }

    pub async fn health(&self) -> Health {
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            readings: self.telemetry.len().await,
            alerts: self.alerts.len().await,
            storage: self.store.as_ref().map(|s| s.location().to_string()),
        }
    }

    /// Make every later database write fail
    #[cfg(test)]
    pub(crate) async fn break_storage(&self) {
        self.close().await;
    }
}
