//! ==============================================================================
//! domain.rs - records exchanged with the field device, operator and detector
//! ==============================================================================
//!
//! purpose:
//!     the three record types (SensorReading, PestAlert, CommandState), the
//!     inbound payloads that produce them, and their json wire shapes.
//!
//! wire conventions:
//!     - timestamps render as "YYYY-MM-DDTHH:MM:SS[.fff]" (naive, utc)
//!     - actuator/detection flags render as 0 or 1; inbound flags accept
//!       true/false or 0/1
//!
//! ==============================================================================

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// all stored timestamps are naive utc
pub type Timestamp = NaiveDateTime;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TIME_FORMAT_SPACED: &str = "%Y-%m-%d %H:%M:%S%.f";

/// parse a device timestamp
///
/// accepts "2024-01-01T00:05:00", "2024-01-01 00:05:00" (both with optional
/// fractional seconds) and rfc3339 with an offset, which is folded into utc.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, TIME_FORMAT_SPACED))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(TIME_FORMAT).to_string()
}

/// serde adapter for `Timestamp` fields
mod time_field {
    use super::{format_timestamp, Timestamp};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(ts: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(ts))
    }
}

// ==============================================================================
// flags
// ==============================================================================

/// an inbound on/off flag: `true`/`false` or `1`/`0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "FlagRepr")]
pub struct Flag(pub bool);

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Int(i64),
}

impl TryFrom<FlagRepr> for Flag {
    type Error = String;

    fn try_from(repr: FlagRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            FlagRepr::Bool(b) => Ok(Flag(b)),
            FlagRepr::Int(0) => Ok(Flag(false)),
            FlagRepr::Int(1) => Ok(Flag(true)),
            FlagRepr::Int(n) => Err(format!("flag must be 0 or 1, got {n}")),
        }
    }
}

/// serde adapter rendering a bool as 0/1 (what the field device parses)
mod int_flag {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(u8::from(*v))
    }
}

// ==============================================================================
// telemetry
// ==============================================================================

/// one temperature/humidity sample, immutable once accepted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// degrees celsius
    pub temperature: f64,
    /// relative humidity (%)
    pub humidity: f64,
    /// the device's own sample time
    #[serde(rename = "time", with = "time_field")]
    pub observed_at: Timestamp,
}

/// telemetry as posted by the device, before validation
#[derive(Debug, Default, Deserialize)]
pub struct TelemetryPayload {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub time: Option<String>,
}

impl TryFrom<TelemetryPayload> for SensorReading {
    type Error = Error;

    fn try_from(payload: TelemetryPayload) -> Result<Self> {
        let temperature = finite("temperature", payload.temperature)?;
        let humidity = finite("humidity", payload.humidity)?;
        let raw_time = payload.time.ok_or_else(|| Error::invalid("missing field `time`"))?;
        let observed_at = parse_timestamp(&raw_time)
            .ok_or_else(|| Error::invalid(format!("unparseable timestamp {raw_time:?}")))?;

        Ok(SensorReading { temperature, humidity, observed_at })
    }
}

fn finite(field: &str, value: Option<f64>) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(Error::invalid(format!("`{field}` must be finite, got {v}"))),
        None => Err(Error::invalid(format!("missing field `{field}`"))),
    }
}

// ==============================================================================
// alerts
// ==============================================================================

/// a recorded pest detection
///
/// `detected` is always true on records created through the detection path;
/// the field stays so the wire shape matches the "no alert" body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PestAlert {
    #[serde(with = "int_flag")]
    pub detected: bool,
    #[serde(rename = "time", with = "time_field")]
    pub observed_at: Timestamp,
}

// ==============================================================================
// actuator command
// ==============================================================================

/// the singleton actuator record the field device polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandState {
    pub spray: bool,
    pub light: bool,
    pub buzzer: bool,
    #[serde(with = "time_field")]
    pub updated_at: Timestamp,
}

impl CommandState {
    /// everything off
    pub fn initial(at: Timestamp) -> Self {
        Self { spray: false, light: false, buzzer: false, updated_at: at }
    }

    pub fn actuators(&self) -> Actuators {
        Actuators { spray: self.spray, light: self.light, buzzer: self.buzzer }
    }
}

/// the three actuator outputs, no timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Actuators {
    #[serde(with = "int_flag")]
    pub spray: bool,
    #[serde(with = "int_flag")]
    pub light: bool,
    #[serde(with = "int_flag")]
    pub buzzer: bool,
}

/// fields an operator wants changed; `None` leaves the field alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandPatch {
    pub spray: Option<bool>,
    pub light: Option<bool>,
    pub buzzer: Option<bool>,
}

/// operator command body
#[derive(Debug, Default, Deserialize)]
pub struct CommandPayload {
    pub spray: Option<Flag>,
    pub light: Option<Flag>,
    pub buzzer: Option<Flag>,
}

impl CommandPayload {
    /// full-state reading: a missing field means off
    ///
    /// an operator sending only `{"buzzer": 1}` therefore turns spray and
    /// light off. use `into_patch` for merge semantics.
    pub fn into_full(self) -> Actuators {
        Actuators {
            spray: self.spray.is_some_and(|f| f.0),
            light: self.light.is_some_and(|f| f.0),
            buzzer: self.buzzer.is_some_and(|f| f.0),
        }
    }

    pub fn into_patch(self) -> CommandPatch {
        CommandPatch {
            spray: self.spray.map(|f| f.0),
            light: self.light.map(|f| f.0),
            buzzer: self.buzzer.map(|f| f.0),
        }
    }
}
