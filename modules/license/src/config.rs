use event_bus::BusConfig;
use std::env;

pub const SERVICE_NAME: &str = "license-service";

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub bus: BusConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8092".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let bus = BusConfig::from_env(SERVICE_NAME)?;

        Ok(Config {
            database_url,
            host,
            port,
            bus,
        })
    }
}
