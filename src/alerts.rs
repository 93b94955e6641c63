//! alerts.rs - append-only log of pest detections

use std::future::Future;

use tokio::sync::RwLock;

use crate::domain::{PestAlert, Timestamp};
use crate::error::Result;

#[derive(Default)]
pub struct AlertLog {
    alerts: RwLock<Vec<PestAlert>>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a positive detection. There is no negative record.
    pub async fn record_detection(&self, observed_at: Timestamp) -> PestAlert {
        let alert = PestAlert { detected: true, observed_at };
        self.alerts.write().await.push(alert.clone());
        alert
    }

    /// Same as `record_detection`, but `persist` runs under the write lock
    /// first and the alert is only appended if it succeeds
    pub async fn record_detection_with<F, Fut>(&self, observed_at: Timestamp, persist: F) -> Result<PestAlert>
    where
        F: FnOnce(PestAlert) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let alert = PestAlert { detected: true, observed_at };
        let mut alerts = self.alerts.write().await;
        persist(alert.clone()).await?;
        alerts.push(alert.clone());
        Ok(alert)
    }

    /// Put back an alert loaded from storage
    pub(crate) async fn restore(&self, alert: PestAlert) {
        self.alerts.write().await.push(alert);
    }

    pub async fn latest_one(&self) -> Option<PestAlert> {
        self.alerts.read().await.last().cloned()
    }

    pub async fn len(&self) -> usize {
        self.alerts.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse_timestamp;
    use crate::error::Error;

    #[tokio::test]
    async fn test_no_alert_sentinel() {
        let log = AlertLog::new();
        assert!(log.latest_one().await.is_none());
        assert_eq!(log.len().await, 0);
    }

    #[tokio::test]
    async fn test_detection_always_positive() {
        let log = AlertLog::new();
        let t1 = parse_timestamp("2024-01-01T00:00:00").unwrap();
        let t2 = parse_timestamp("2024-01-01T00:10:00").unwrap();
        log.record_detection(t1).await;
        let second = log.record_detection(t2).await;

        assert!(second.detected);
        assert_eq!(log.latest_one().await, Some(PestAlert { detected: true, observed_at: t2 }));
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_persist_records_nothing() {
        let log = AlertLog::new();
        let t = parse_timestamp("2024-01-01T00:00:00").unwrap();
        let result = log
            .record_detection_with(t, |_| async { Err(Error::StorageUnavailable("disk full".into())) })
            .await;

        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        assert!(log.latest_one().await.is_none());
    }
}
