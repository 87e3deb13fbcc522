//! Redis pub/sub implementation of the message bus.

mod bus;
mod handlers;
mod settings;
mod workers;

pub use bus::RedisBus;
pub use handlers::{HandlerTable, Removal};
pub use settings::{BusSettings, RedisSettings};
pub use workers::{Job, WorkerPool};
