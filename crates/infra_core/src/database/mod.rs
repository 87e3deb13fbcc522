//! Pooled MySQL access through sea-orm.

mod connector;
mod error;
mod service;
mod session;

pub use connector::{Connector, MySqlConnector};
pub use error::DatabaseError;
pub use service::{DatabaseService, DatabaseSettings};
pub use session::{DbSession, Row};
