//! An async client for the RESP (REdis Serialization Protocol) wire format.
//!
//! [`RedisClient`] is the main entry point: connect, pipeline commands with
//! [`RedisClient::command`] or [`RedisClient::async_write`], and subscribe
//! to channels with [`RedisClient::subscribe`]/[`RedisClient::psubscribe`].
//! The lower-level [`pipeline::CommandStream`] and [`pubsub::PubSubSession`]
//! types are exposed directly for callers that want a dedicated connection
//! for one or the other rather than the combined façade.

pub mod args;
pub mod error;
pub mod pipeline;
pub mod pubsub;
pub mod resp;
pub mod transport;

mod client;

pub use args::Arg;
pub use client::{RedisClient, RedisClientBuilder};
pub use error::{RedisError, Result};
pub use pipeline::CommandStream;
pub use pubsub::PubSubSession;
pub use resp::{IncrementalParser, Parsed, Value};
