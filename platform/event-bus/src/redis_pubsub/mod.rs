//! Redis Pub/Sub backend
//!
//! Fire-and-forget: no persistence, no replay, no ordering guarantee across
//! reconnects. A message published while a subscriber is disconnected is
//! gone for that subscriber.

mod publisher;
mod subscriber;

pub use publisher::RedisPublisher;
pub use subscriber::RedisConnector;

use crate::config::{env_opt, env_or, DEFAULT_TOPIC};
use crate::{BusError, BusResult};
use redis::{ConnectionInfo, IntoConnectionInfo};

/// Parsed `host:port[,user=..][,password=..][,abortconnect=..]` connection string
#[derive(Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// When false, the first connection is retried instead of failing on the first error
    pub abort_connect: bool,
    pub channel: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            abort_connect: true,
            channel: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl std::fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("abort_connect", &self.abort_connect)
            .field("channel", &self.channel)
            .finish()
    }
}

impl RedisSettings {
    pub fn from_env() -> Result<Self, String> {
        let mut settings = Self::parse(&env_or("REDIS_CONNECTION", "localhost:6379"))?;
        if let Some(channel) = env_opt("REDIS_CHANNEL") {
            settings.channel = channel;
        }
        Ok(settings)
    }

    pub fn parse(connection: &str) -> Result<Self, String> {
        let mut parts = connection.split(',').map(str::trim);
        let endpoint = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "Redis connection string is empty".to_string())?;

        let mut settings = Self::default();
        match endpoint.rsplit_once(':') {
            Some((host, port)) => {
                settings.host = host.to_string();
                settings.port = port
                    .parse()
                    .map_err(|_| format!("invalid Redis port '{}'", port))?;
            }
            None => settings.host = endpoint.to_string(),
        }

        for option in parts.filter(|p| !p.is_empty()) {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| format!("invalid Redis option '{}'", option))?;

            match key.trim().to_lowercase().as_str() {
                "user" => settings.username = Some(value.to_string()),
                "password" => settings.password = Some(value.to_string()),
                "abortconnect" => {
                    settings.abort_connect = value
                        .trim()
                        .parse()
                        .map_err(|_| format!("abortConnect must be true or false, got '{}'", value))?;
                }
                other => tracing::warn!(option = %other, "Ignoring unsupported Redis option"),
            }
        }

        Ok(settings)
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub(crate) fn connection_info(&self) -> BusResult<ConnectionInfo> {
        let mut info = format!("redis://{}:{}", self.host, self.port)
            .into_connection_info()
            .map_err(|e| BusError::ConfigError(format!("invalid Redis endpoint: {}", e)))?;
        info.redis.username = self.username.clone();
        info.redis.password = self.password.clone();
        Ok(info)
    }

    pub(crate) fn client(&self) -> BusResult<redis::Client> {
        redis::Client::open(self.connection_info()?)
            .map_err(|e| BusError::ConfigError(format!("invalid Redis configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        let settings = RedisSettings::parse("cache.internal:6380").unwrap();
        assert_eq!(settings.host, "cache.internal");
        assert_eq!(settings.port, 6380);
        assert_eq!(settings.username, None);
        assert!(settings.abort_connect);
    }

    #[test]
    fn test_parse_options() {
        let settings =
            RedisSettings::parse("cache:6379,user=svc,password=s3cret,abortConnect=false").unwrap();

        assert_eq!(settings.username.as_deref(), Some("svc"));
        assert_eq!(settings.password.as_deref(), Some("s3cret"));
        assert!(!settings.abort_connect);
    }

    #[test]
    fn test_parse_host_only_uses_default_port() {
        let settings = RedisSettings::parse("cache").unwrap();
        assert_eq!(settings.port, 6379);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(RedisSettings::parse("").is_err());
        assert!(RedisSettings::parse("cache:notaport").is_err());
        assert!(RedisSettings::parse("cache:6379,password").is_err());
        assert!(RedisSettings::parse("cache:6379,abortconnect=maybe").is_err());
    }

    #[test]
    fn test_unknown_option_is_ignored() {
        let settings = RedisSettings::parse("cache:6379,ssl=false").unwrap();
        assert_eq!(settings.host, "cache");
    }

    #[test]
    fn test_connection_info_carries_credentials() {
        let settings = RedisSettings::parse("cache:6379,user=svc,password=s3cret").unwrap();
        let info = settings.connection_info().unwrap();

        assert_eq!(info.redis.username.as_deref(), Some("svc"));
        assert_eq!(info.redis.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let settings = RedisSettings::parse("cache:6379,password=s3cret").unwrap();
        assert!(!format!("{:?}", settings).contains("s3cret"));
    }
}
