//! The public façade: C6.
//!
//! Grounded on `entangled90-rdis`'s `RedisEngineApi` (the handle type
//! callers actually hold) and on `original_source/include/redis/client.hpp`,
//! which is itself little more than `stream` plus `subscribed_stream` behind
//! one name. `RedisClient` follows suit: it owns a [`CommandStream`] for
//! ordinary commands and lazily starts a [`PubSubSession`] the first time a
//! caller subscribes, since most connections never touch pub-sub at all and
//! spinning up a second TCP connection unconditionally would be wasteful.

use std::fmt;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::pipeline::{CommandStream, DEFAULT_READ_SIZE};
use crate::pubsub::PubSubSession;
use crate::resp::Value;
use crate::transport::{ReconnectCb, StreamClosedCb, RECONNECT_RETRY_DELAY};

/// A Redis client session: command pipelining plus on-demand pub-sub, all
/// over auto-reconnecting transports (§6).
pub struct RedisClient {
    host: String,
    port: u16,
    read_chunk_size: usize,
    retry_delay: Duration,
    handle: Handle,
    commands: CommandStream,
    pubsub: OnceCell<PubSubSession>,
}

impl RedisClient {
    /// Connects to `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<RedisClient> {
        RedisClientBuilder::new().connect(host, port).await
    }

    /// Connects using a single `"host:port"` address string (§6).
    pub async fn connect_hostport(hostport: &str) -> Result<RedisClient> {
        let (host, port) = crate::transport::split_hostport(hostport)?;
        RedisClient::connect(host, port).await
    }

    /// Starts a fresh Tokio runtime and connects on it, blocking the calling
    /// thread until the connection is established (§C: the "thin blocking
    /// wrapper" escape hatch from spec.md's Non-goals, reinstated as the
    /// Rust analogue of the original's out-parameter `connect(..., &ec)`
    /// overload for callers with no runtime of their own).
    pub fn connect_blocking(host: &str, port: u16) -> Result<RedisClient> {
        let runtime = tokio::runtime::Runtime::new().map_err(crate::error::RedisError::Io)?;
        runtime.block_on(RedisClient::connect(host, port))
    }

    /// A handle to the Tokio runtime this client's background tasks run on,
    /// for embedding callers that want to spawn related work alongside it
    /// (§C's `get_executor()` carry-over).
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Enqueues a command; `handler` runs once the reply arrives. Mirrors
    /// [`CommandStream::async_write`] at the façade level.
    pub fn async_write<H, I, A>(&self, handler: H, args: I) -> &Self
    where
        H: FnOnce(Value) + Send + 'static,
        I: IntoIterator<Item = A>,
        A: Into<crate::args::Arg>,
    {
        self.commands.async_write(handler, args);
        self
    }

    /// Sends a command and awaits its reply.
    pub async fn command<I, A>(&self, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = A>,
        A: Into<crate::args::Arg>,
    {
        self.commands.command(args).await
    }

    async fn pubsub(&self) -> Result<&PubSubSession> {
        self.pubsub
            .get_or_try_init(|| PubSubSession::connect_with_options(&self.host, self.port, self.read_chunk_size, self.retry_delay))
            .await
    }

    /// Subscribes to an exact channel name, starting the pub-sub session on
    /// its own connection the first time this (or [`psubscribe`](Self::psubscribe))
    /// is called.
    pub async fn subscribe<F>(&self, topic: impl Into<bytes::Bytes>, cb: F) -> Result<()>
    where
        F: Fn(bytes::Bytes, bytes::Bytes) + Send + Sync + 'static,
    {
        self.pubsub().await?.subscribe(topic, cb);
        Ok(())
    }

    /// Subscribes to a glob pattern.
    pub async fn psubscribe<F>(&self, topic: impl Into<bytes::Bytes>, cb: F) -> Result<()>
    where
        F: Fn(bytes::Bytes, bytes::Bytes) + Send + Sync + 'static,
    {
        self.pubsub().await?.psubscribe(topic, cb);
        Ok(())
    }

    /// Unsubscribes from `topic`; `false` if no pub-sub session has been
    /// started yet or `topic` was never subscribed.
    pub async fn unsubscribe(&self, topic: impl Into<bytes::Bytes>) -> bool {
        match self.pubsub.get() {
            Some(session) => session.unsubscribe(topic).await,
            None => false,
        }
    }

    /// Installs a notification hook fired whenever either underlying
    /// transport drops its socket (§6). Only applies to sessions already
    /// open at call time — set this before subscribing if pub-sub
    /// visibility matters too.
    pub fn set_on_stream_closed(&self, cb: StreamClosedCb) {
        self.commands.set_on_stream_closed(cb);
    }

    pub fn set_on_reconnect(&self, cb: ReconnectCb) {
        self.commands.set_on_reconnect(cb);
    }

    /// `operator bool()` from the original, reinstated as an inherent method
    /// since Rust has no implicit bool conversion (§C).
    pub fn is_open(&self) -> bool {
        self.commands.is_open()
    }

    /// Closes the command pipeline and, if started, the pub-sub session.
    pub fn close(&self) {
        self.commands.close();
        if let Some(session) = self.pubsub.get() {
            session.close();
        }
    }
}

impl fmt::Display for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RedisClient({}:{}, {})",
            self.host,
            self.port,
            if self.is_open() { "open" } else { "closed" }
        )
    }
}

/// Builder for a [`RedisClient`] with non-default read-chunk size or
/// reconnect cadence (§B.3: both are overridable knobs).
pub struct RedisClientBuilder {
    read_chunk_size: usize,
    retry_delay: Duration,
}

impl Default for RedisClientBuilder {
    fn default() -> Self {
        RedisClientBuilder {
            read_chunk_size: DEFAULT_READ_SIZE,
            retry_delay: RECONNECT_RETRY_DELAY,
        }
    }
}

impl RedisClientBuilder {
    pub fn new() -> Self {
        RedisClientBuilder::default()
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn connect(self, host: &str, port: u16) -> Result<RedisClient> {
        let commands =
            CommandStream::connect_with_options(host, port, self.read_chunk_size, self.retry_delay).await?;
        Ok(RedisClient {
            host: host.to_string(),
            port,
            read_chunk_size: self.read_chunk_size,
            retry_delay: self.retry_delay,
            handle: Handle::current(),
            commands,
            pubsub: OnceCell::new(),
        })
    }
}
