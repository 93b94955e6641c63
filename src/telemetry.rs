//! ==============================================================================
//! telemetry.rs - append-only log of sensor readings
//! ==============================================================================
//!
//! purpose:
//!     keeps every accepted reading in insertion order.
//!     "latest" means most recently ingested, not largest device timestamp:
//!     a device whose clock jumps backwards still has its newest post on top.
//!
//! ==============================================================================

use std::future::Future;

use tokio::sync::RwLock;

use crate::domain::SensorReading;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct TelemetryLog {
    readings: RwLock<Vec<SensorReading>>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading
    ///
    /// rejects non-finite values even though `SensorReading` is normally built
    /// through the validated payload conversion.
    pub async fn record(&self, reading: SensorReading) -> Result<()> {
        self.record_with(reading, |_| async { Ok(()) }).await
    }

    /// Validate, hand the reading to `persist`, then append it
    ///
    /// the write lock is held across `persist`, so persisted order equals
    /// log order. nothing is persisted for a rejected reading, and nothing is
    /// appended if `persist` fails.
    pub async fn record_with<F, Fut>(&self, reading: SensorReading, persist: F) -> Result<()>
    where
        F: FnOnce(SensorReading) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if !reading.temperature.is_finite() || !reading.humidity.is_finite() {
            return Err(Error::invalid("telemetry values must be finite"));
        }
        let mut readings = self.readings.write().await;
        persist(reading.clone()).await?;
        readings.push(reading);
        Ok(())
    }

    /// Up to `n` readings, most recent first
    pub async fn latest(&self, n: usize) -> Vec<SensorReading> {
        let readings = self.readings.read().await;
        readings.iter().rev().take(n).cloned().collect()
    }

    pub async fn latest_one(&self) -> Option<SensorReading> {
        self.readings.read().await.last().cloned()
    }

    pub async fn len(&self) -> usize {
        self.readings.read().await.len()
    }
}
