//! # Crown Infra Node
//!
//! The process that runs beside a Paper game server or a Velocity proxy and
//! owns its infrastructure connections: the Redis message bus, the MySQL
//! pool and, when enabled, the realtime relay.
//!
//! [`bootstrap::InfraBootstrap`] starts everything from an
//! [`config::AppConfig`] and publishes the running services through a typed
//! [`services::ServiceRegistry`].

pub mod binder;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod pubsub;
pub mod services;
pub mod signals;
pub mod subscriber;

#[cfg(test)]
mod test_support;

pub use bootstrap::InfraBootstrap;
pub use config::{AppConfig, ConfigError};
pub use error::NodeError;
