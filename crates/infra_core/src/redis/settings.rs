//! Connection and execution settings for the Redis bus.

use infra_api::BusError;
use std::time::Duration;
use url::Url;

/// Where and how to reach Redis.
#[derive(Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub password: Option<String>,
    /// Bound on establishing each connection.
    pub timeout: Duration,
    pub database: i64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            ssl: false,
            password: None,
            timeout: Duration::from_secs(10),
            database: 0,
        }
    }
}

impl std::fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("timeout", &self.timeout)
            .field("database", &self.database)
            .finish()
    }
}

impl RedisSettings {
    /// Builds the connection URL, e.g. `rediss://:secret@cache:6380/2`.
    ///
    /// The password is percent-encoded. An empty password is treated as none.
    pub fn connection_url(&self) -> Result<String, BusError> {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}/{}", self.host, self.port, self.database))
            .map_err(|e| BusError::Connect(format!("invalid redis address: {e}")))?;

        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| BusError::Connect("redis url cannot carry a password".to_string()))?;
        }
        Ok(url.into())
    }

    pub fn client(&self) -> Result<redis::Client, BusError> {
        redis::Client::open(self.connection_url()?).map_err(|e| BusError::Connect(e.to_string()))
    }
}

/// Execution policy of the bus: handler workers and subscribe retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    worker_count: usize,
    queue_capacity: usize,
    subscribe_retry_attempts: u32,
    subscribe_retry_delay: Duration,
}

impl BusSettings {
    /// Counts below one are raised to one.
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        subscribe_retry_attempts: u32,
        subscribe_retry_delay: Duration,
    ) -> Self {
        Self {
            worker_count: worker_count.max(1),
            queue_capacity: queue_capacity.max(1),
            subscribe_retry_attempts: subscribe_retry_attempts.max(1),
            subscribe_retry_delay,
        }
    }

    /// Converts a configured delay in milliseconds, mapping negatives to zero.
    pub fn delay_from_millis(millis: i64) -> Duration {
        Duration::from_millis(millis.max(0) as u64)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn subscribe_retry_attempts(&self) -> u32 {
        self.subscribe_retry_attempts
    }

    pub fn subscribe_retry_delay(&self) -> Duration {
        self.subscribe_retry_delay
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self::new(4, 256, 3, Duration::from_millis(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_url() {
        let settings = RedisSettings {
            host: "cache".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.connection_url().unwrap(), "redis://cache:6379/0");
    }

    #[test]
    fn test_tls_url_encodes_password() {
        let settings = RedisSettings {
            host: "cache".to_string(),
            port: 6380,
            ssl: true,
            password: Some("p@ss:word".to_string()),
            database: 2,
            ..Default::default()
        };
        assert_eq!(
            settings.connection_url().unwrap(),
            "rediss://:p%40ss%3Aword@cache:6380/2"
        );
    }

    #[test]
    fn test_empty_password_is_ignored() {
        let settings = RedisSettings {
            password: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(settings.connection_url().unwrap(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_debug_hides_password() {
        let settings = RedisSettings {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{settings:?}").contains("secret"));
    }

    #[test]
    fn test_bus_settings_clamp() {
        let settings = BusSettings::new(0, 0, 0, Duration::ZERO);
        assert_eq!(settings.worker_count(), 1);
        assert_eq!(settings.queue_capacity(), 1);
        assert_eq!(settings.subscribe_retry_attempts(), 1);
        assert_eq!(BusSettings::delay_from_millis(-5), Duration::ZERO);

        let defaults = BusSettings::default();
        assert_eq!(defaults.worker_count(), 4);
        assert_eq!(defaults.queue_capacity(), 256);
        assert_eq!(defaults.subscribe_retry_attempts(), 3);
        assert_eq!(defaults.subscribe_retry_delay(), Duration::from_millis(200));
    }
}
