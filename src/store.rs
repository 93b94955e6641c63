//! ==============================================================================
//! store.rs - sqlite persistence for the hub's three stores
//! ==============================================================================
//!
//! purpose:
//!     makes readings, alerts and the command record survive a restart.
//!     the coordinator keeps serving reads from memory; this is only written
//!     on accepted writes and read once at startup.
//!
//! tables:
//!     - telemetry: one row per reading, `id` is the insertion sequence
//!     - alerts:    one row per positive detection, same
//!     - command:   exactly one row (id = 1), updated in place
//!
//! relationships:
//!     - used by: coordinator.rs (write-through under each store's lock,
//!       `load` in Coordinator::open)
//!
//! ==============================================================================

use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::domain::{format_timestamp, parse_timestamp, CommandState, PestAlert, SensorReading};
use crate::error::{Error, Result};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS telemetry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        temperature REAL NOT NULL,
        humidity REAL NOT NULL,
        time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        detected INTEGER NOT NULL,
        time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS command (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        spray INTEGER NOT NULL,
        light INTEGER NOT NULL,
        buzzer INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
];

#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    temperature: f64,
    humidity: f64,
    time: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    detected: bool,
    time: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CommandRow {
    spray: bool,
    light: bool,
    buzzer: bool,
    updated_at: String,
}

/// Everything persisted, in insertion order
#[derive(Debug)]
pub struct Snapshot {
    pub readings: Vec<SensorReading>,
    pub alerts: Vec<PestAlert>,
    pub command: CommandState,
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::StorageUnavailable(e.to_string())
    }
}

pub struct Store {
    pool: SqlitePool,
    location: String,
}

impl Store {
    /// Open (creating if needed) a database file
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::StorageUnavailable(format!("create directory {}: {e}", dir.display()))
            })?;
        }

        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        Self::connect(options, path.display().to_string()).await
    }

    /// Private database that lives as long as the store
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options, ":memory:".to_string()).await
    }

    async fn connect(options: SqliteConnectOptions, location: String) -> Result<Self> {
        // one connection: writes are already serialized by the stores' locks,
        // and an in-memory database exists only on its own connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool, location };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        // the command row exists from the first start on, all off
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO command (id, spray, light, buzzer, updated_at)
            VALUES (1, 0, 0, 0, ?)
            "#,
        )
        .bind(format_timestamp(&Utc::now().naive_utc()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Read back everything, oldest first
    ///
    /// rows whose timestamp no longer parses are skipped with a warning.
    pub async fn load(&self) -> Result<Snapshot> {
        let readings: Vec<ReadingRow> =
            sqlx::query_as("SELECT temperature, humidity, time FROM telemetry ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        let alerts: Vec<AlertRow> = sqlx::query_as("SELECT detected, time FROM alerts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let command: CommandRow =
            sqlx::query_as("SELECT spray, light, buzzer, updated_at FROM command WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        let readings = readings
            .into_iter()
            .filter_map(|r| match parse_timestamp(&r.time) {
                Some(observed_at) => Some(SensorReading { temperature: r.temperature, humidity: r.humidity, observed_at }),
                None => {
                    tracing::warn!(time = %r.time, "skipping stored reading with bad timestamp");
                    None
                }
            })
            .collect();

        let alerts = alerts
            .into_iter()
            .filter_map(|a| match parse_timestamp(&a.time) {
                Some(observed_at) => Some(PestAlert { detected: a.detected, observed_at }),
                None => {
                    tracing::warn!(time = %a.time, "skipping stored alert with bad timestamp");
                    None
                }
            })
            .collect();

        let updated_at = parse_timestamp(&command.updated_at).ok_or_else(|| {
            Error::StorageUnavailable(format!("stored command has bad timestamp {:?}", command.updated_at))
        })?;
        let command = CommandState {
            spray: command.spray,
            light: command.light,
            buzzer: command.buzzer,
            updated_at,
        };

        Ok(Snapshot { readings, alerts, command })
    }

    pub async fn insert_reading(&self, reading: &SensorReading) -> Result<()> {
        sqlx::query("INSERT INTO telemetry (temperature, humidity, time) VALUES (?, ?, ?)")
            .bind(reading.temperature)
            .bind(reading.humidity)
            .bind(format_timestamp(&reading.observed_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Overwrite the command row
    pub async fn save_command(&self, state: &CommandState) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        update_command(&mut tx, state).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Append the alert and overwrite the command row, both or neither
    pub async fn record_detection(&self, alert: &PestAlert, state: &CommandState) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO alerts (detected, time) VALUES (?, ?)")
            .bind(alert.detected)
            .bind(format_timestamp(&alert.observed_at))
            .execute(&mut *tx)
            .await?;
        update_command(&mut tx, state).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn update_command(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, state: &CommandState) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE command
        SET spray = ?, light = ?, buzzer = ?, updated_at = ?
        WHERE id = 1
        "#,
    )
    .bind(state.spray)
    .bind(state.light)
    .bind(state.buzzer)
    .bind(format_timestamp(&state.updated_at))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() != 1 {
        return Err(Error::StorageUnavailable("command row missing".to_string()));
    }
    Ok(())
}
