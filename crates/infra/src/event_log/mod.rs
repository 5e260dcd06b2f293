//! Durable event log adapters.
//!
//! The [`EventLog`](omnistock_events::EventLog) trait and its in-memory
//! implementation live in `omnistock-events`; this module holds the
//! network-backed ones.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{DEFAULT_STREAM_KEY, RedisStreamLog};
