use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Connection settings for the relational database.
///
/// `Debug` masks the password so the config can be logged safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub pool_size: u32,
    /// Extra driver properties appended to the connection URL.
    pub properties: BTreeMap<String, String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            database: "crown".to_string(),
            username: "crown".to_string(),
            password: String::new(),
            pool_size: 10,
            properties: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() { "" } else { "****" };
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &password)
            .field("pool_size", &self.pool_size)
            .field("properties", &self.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_password() {
        let config = DatabaseConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let printed = format!("{config:?}");
        assert!(printed.contains("\"****\""));
        assert!(!printed.contains("hunter2"));

        let empty = format!("{:?}", DatabaseConfig::default());
        assert!(empty.contains("password: \"\""));
    }
}
