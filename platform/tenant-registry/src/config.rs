use crate::outbox::RelaySettings;
use event_bus::BusConfig;
use std::env;
use std::time::Duration;

pub const SERVICE_NAME: &str = "tenant-service";

/// How committed tenant events reach the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// Staged in the outbox with the tenant change, shipped by the relay
    Outbox,
    /// Published right after the commit
    Immediate,
}

impl DispatchKind {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "outbox" => Ok(DispatchKind::Outbox),
            "immediate" => Ok(DispatchKind::Immediate),
            other => Err(format!(
                "EVENT_DISPATCH_MODE must be 'outbox' or 'immediate', got '{}'",
                other
            )),
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Without a database the registry runs on the in-memory store
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub dispatch: DispatchKind,
    pub relay: RelaySettings,
    pub bus: BusConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8091".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let dispatch = DispatchKind::parse(
            &env::var("EVENT_DISPATCH_MODE").unwrap_or_else(|_| "outbox".to_string()),
        )?;

        let poll_interval_ms: u64 = env::var("OUTBOX_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| "OUTBOX_POLL_INTERVAL_MS must be a number".to_string())?;

        let max_attempts: i32 = env::var("OUTBOX_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| "OUTBOX_MAX_ATTEMPTS must be a number".to_string())?;

        let batch_size: i64 = env::var("OUTBOX_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| "OUTBOX_BATCH_SIZE must be a number".to_string())?;

        let retention_days: i64 = env::var("OUTBOX_RETENTION_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .map_err(|_| "OUTBOX_RETENTION_DAYS must be a number".to_string())?;

        let bus = BusConfig::from_env(SERVICE_NAME)?;

        Ok(Config {
            database_url,
            host,
            port,
            dispatch,
            relay: RelaySettings {
                batch_size,
                max_attempts,
                poll_interval: Duration::from_millis(poll_interval_ms),
                published_retention: chrono::Duration::days(retention_days),
                ..RelaySettings::default()
            },
            bus,
        })
    }
}
