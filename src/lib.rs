//! ==============================================================================
//! greenhouse hub - backend coordinator for a greenhouse sensor node
//! ==============================================================================
//!
//! the field device pushes temperature/humidity readings and polls for what
//! its actuators (spray, light, buzzer) should do. an operator sets those
//! actuators; a pest-detection pipeline reports detections, which are logged
//! and switch the buzzer on until an operator clears it.
//!
//! architecture:
//!
//! ```text
//!     sensor device ──► POST /api/telemetry ─┐
//!     field device  ──► GET  /api/command  ──┤
//!     operator      ──► POST/PATCH /api/command
//!     detector      ──► POST /api/detection ─┤
//!                                            ▼
//!                                   ┌─────────────────┐
//!                                   │   coordinator   │ <- coordinator.rs
//!                                   └──┬─────┬─────┬──┘
//!                     telemetry log ◄──┘     │     └──► alert log
//!                                      command record
//!                                            │
//!                                  sqlite store (optional)
//! ```
//!
//! ==============================================================================

pub mod alerts;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod detection;
pub mod domain;
pub mod error;
pub mod store;
pub mod telemetry;
pub mod web;

pub use coordinator::Coordinator;
pub use error::{Error, Result};
