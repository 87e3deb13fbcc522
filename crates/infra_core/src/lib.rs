//! # Infra Core
//!
//! Networked implementations of the `infra_api` contracts:
//!
//! * [`redis::RedisBus`] - the [`infra_api::MessageBus`] over Redis pub/sub,
//!   with a bounded worker pool and automatic resubscription
//! * [`realtime::TcpRealtimeChannel`] - the [`infra_api::RealtimeChannel`]
//!   over a length-prefixed TCP relay hosted by the proxy
//! * [`database::DatabaseService`] - pooled MySQL with health tracking and
//!   background recovery
//!
//! Every service moves through [`infra_api::ServiceState`] and is terminal
//! once stopped.

pub mod codec;
pub mod database;
pub mod realtime;
pub mod redis;

pub use crate::codec::{CodecError, MessageCodec};
pub use crate::database::{DatabaseError, DatabaseService, DatabaseSettings, DbSession, Row};
pub use crate::realtime::{RealtimeOptions, RealtimeRole, RealtimeSettings, TcpRealtimeChannel};
pub use crate::redis::{BusSettings, RedisBus, RedisSettings};
