//! ==============================================================================
//! detection.rs - adapter to the external pest classifier
//! ==============================================================================
//!
//! purpose:
//!     turns a detection report into the one boolean the coordinator needs.
//!     the vision model lives elsewhere; this only knows how to ask it.
//!
//! modes:
//!     - TrustCaller: no classifier configured. any report is a positive
//!       signal from a pipeline that already decided.
//!     - Remote: an uploaded image is posted to the classifier, which answers
//!       `{"detected": true|false|0|1}`. a report with no image is still a
//!       positive signal.
//!
//! ==============================================================================

use std::time::Duration;

use axum::body::Bytes;
use serde::Deserialize;

use crate::config::DetectionConfig;
use crate::domain::Flag;
use crate::error::{Error, Result};

pub enum Detector {
    TrustCaller,
    Remote(RemoteClassifier),
}

pub struct RemoteClassifier {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct ClassifierReply {
    #[serde(alias = "pest")]
    detected: Flag,
}

impl Detector {
    pub fn from_config(config: &DetectionConfig) -> anyhow::Result<Self> {
        match &config.classifier_url {
            Some(url) if !url.trim().is_empty() => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_millis(config.timeout_ms))
                    .build()?;
                Ok(Detector::Remote(RemoteClassifier { client, url: url.trim().to_string() }))
            }
            _ => Ok(Detector::TrustCaller),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Detector::TrustCaller => "trust-caller".to_string(),
            Detector::Remote(r) => format!("remote ({})", r.url),
        }
    }

    /// Decide whether a report means "pest present"
    pub async fn classify(&self, image: Bytes) -> Result<bool> {
        if image.is_empty() {
            return Ok(true);
        }
        match self {
            Detector::TrustCaller => Ok(true),
            Detector::Remote(remote) => remote.classify(image).await,
        }
    }
}

impl RemoteClassifier {
    async fn classify(&self, image: Bytes) -> Result<bool> {
        let size = image.len();
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(|e| Error::DetectionUnavailable(format!("classifier request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::DetectionUnavailable(format!("classifier returned {status}")));
        }

        let reply: ClassifierReply = response
            .json()
            .await
            .map_err(|e| Error::DetectionUnavailable(format!("classifier reply unreadable: {e}")))?;

        tracing::debug!(bytes = size, detected = reply.detected.0, "classifier answered");
        Ok(reply.detected.0)
    }
}
