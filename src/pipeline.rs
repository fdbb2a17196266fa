//! The command pipeline: C4.
//!
//! Grounded on `original_source/include/redis/stream.hpp`'s `async_write` /
//! `next_request` / `on_write` / `on_read` cycle, and on
//! `entangled90-rdis`'s `RedisEngine`/`RedisEngineApi` split (a single task
//! owns all mutable state; callers talk to it over a channel with a
//! per-request reply slot) — `engine.rs`'s `mpsc::Sender<(ClientReq,
//! oneshot::Sender<ClientReq>)>` is exactly the shape a pipelined
//! request/reply queue needs in async Rust, just generalized from "one
//! request, one reply" to true pipelining (many requests in flight, FIFO
//! matched).
//!
//! The original's `queue_` of `(bytes_enqueued, handler)` becomes `pending`
//! here; `is_sending_`/`next_request` become the inner transmission loop
//! that runs whenever `pending` is non-empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::args::{encode_command, Arg};
use crate::error::{RedisError, Result};
use crate::resp::{IncrementalParser, Value};
use crate::transport::{split_hostport, Callbacks, ReconnectCb, StreamClosedCb, Transport, RECONNECT_RETRY_DELAY};

/// Default chunk size for a single `read_some` call (§6).
pub const DEFAULT_READ_SIZE: usize = 1024;

type ReplyHandler = Box<dyn FnOnce(Value) + Send + 'static>;

enum Job {
    Write(Bytes, ReplyHandler),
    Close,
}

/// A pipelined request/reply session over a single auto-reconnecting TCP
/// connection (§4.4).
#[derive(Clone)]
pub struct CommandStream {
    tx: mpsc::UnboundedSender<Job>,
    callbacks: Callbacks,
    open: Arc<AtomicBool>,
}

impl CommandStream {
    /// Connects to `host:port` and starts the background pipeline task.
    pub async fn connect(host: &str, port: u16) -> Result<CommandStream> {
        Self::connect_with_options(host, port, DEFAULT_READ_SIZE, RECONNECT_RETRY_DELAY).await
    }

    /// Connects using a single `"host:port"` address string (§6).
    pub async fn connect_hostport(hostport: &str) -> Result<CommandStream> {
        let (host, port) = split_hostport(hostport)?;
        CommandStream::connect(host, port).await
    }

    /// Like [`connect`](Self::connect), with a caller-chosen read-chunk size
    /// and reconnect retry cadence (§B.3: both are overridable knobs, not
    /// hardcoded constants).
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        read_chunk_size: usize,
        retry_delay: Duration,
    ) -> Result<CommandStream> {
        let callbacks = Callbacks::new();
        let transport = Transport::connect_with_retry_delay(host, port, callbacks.clone(), retry_delay).await?;
        Ok(Self::spawn(transport, callbacks, read_chunk_size))
    }

    fn spawn(transport: Transport, callbacks: Callbacks, read_chunk_size: usize) -> CommandStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        tokio::spawn(run(transport, rx, open.clone(), read_chunk_size));
        CommandStream { tx, callbacks, open }
    }

    /// Enqueues a command for transmission; `handler` runs once the
    /// matching reply arrives (§4.4). Returns `self` so calls can be
    /// chained, matching `stream::async_write`'s `return *this;`.
    pub fn async_write<H, I, A>(&self, handler: H, args: I) -> &Self
    where
        H: FnOnce(Value) + Send + 'static,
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args: Vec<Arg> = args.into_iter().map(Into::into).collect();
        let encoded = encode_command(&args).to_bytes();
        // A send error means the background task already exited (the
        // connection was closed); silently dropping the handler here
        // matches close()'s documented fire-and-forget behavior (§9).
        let _ = self.tx.send(Job::Write(encoded, Box::new(handler)));
        self
    }

    /// Convenience wrapper around [`async_write`](Self::async_write) for
    /// callers that would rather `await` a reply than supply a callback.
    pub async fn command<I, A>(&self, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.async_write(
            move |value| {
                let _ = reply_tx.send(value);
            },
            args,
        );
        reply_rx.await.map_err(|_| RedisError::SessionClosed)
    }

    pub fn set_on_stream_closed(&self, cb: StreamClosedCb) {
        self.callbacks.set_on_stream_closed(cb);
    }

    pub fn set_on_reconnect(&self, cb: ReconnectCb) {
        self.callbacks.set_on_reconnect(cb);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Closes the session. Disables reconnection and drops any handlers
    /// still pending a reply (§9: documented as fire-and-forget, not
    /// cancel-with-error).
    pub fn close(&self) {
        let _ = self.tx.send(Job::Close);
    }
}

fn apply(job: Job, pending: &mut VecDeque<ReplyHandler>, write_buf: &mut BytesMut) -> bool {
    match job {
        Job::Write(bytes, handler) => {
            write_buf.extend_from_slice(&bytes);
            pending.push_back(handler);
            true
        }
        Job::Close => false,
    }
}

fn fail_all(pending: &mut VecDeque<ReplyHandler>, message: &'static [u8]) {
    while let Some(handler) = pending.pop_front() {
        handler(Value::Error(Bytes::from_static(message)));
    }
}

/// Outcome of racing one transport operation against `rx` (§5: `close()`
/// must be able to interrupt a write/read stuck inside `Transport::recover`'s
/// unbounded reconnect loop, not just queue behind it).
enum Raced<T> {
    Done(T),
    NewJob,
    Closed,
}

/// Races `op` (a single `write_all`/`read_some` call) against incoming
/// jobs, so a queued [`Job::Close`] — or any new work — is observed even
/// while `op` is blocked inside an indefinite reconnect retry loop.
async fn race<T>(rx: &mut mpsc::UnboundedReceiver<Job>, pending: &mut VecDeque<ReplyHandler>, write_buf: &mut BytesMut, op: impl std::future::Future<Output = T>) -> Raced<T> {
    tokio::select! {
        biased;

        job = rx.recv() => {
            match job {
                Some(job) => {
                    if apply(job, pending, write_buf) {
                        Raced::NewJob
                    } else {
                        Raced::Closed
                    }
                }
                None => Raced::Closed,
            }
        }

        result = op => Raced::Done(result),
    }
}

async fn run(
    mut transport: Transport,
    mut rx: mpsc::UnboundedReceiver<Job>,
    open: Arc<AtomicBool>,
    read_chunk_size: usize,
) {
    let mut pending: VecDeque<ReplyHandler> = VecDeque::new();
    let mut write_buf = BytesMut::new();
    let mut read_buf = BytesMut::new();
    let mut parser = IncrementalParser::new();
    let mut chunk = vec![0u8; read_chunk_size];

    'outer: loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(job) => {
                    if !apply(job, &mut pending, &mut write_buf) {
                        break 'outer;
                    }
                }
                None => break 'outer,
            }
        }
        while let Ok(job) = rx.try_recv() {
            if !apply(job, &mut pending, &mut write_buf) {
                break 'outer;
            }
        }

        while !pending.is_empty() {
            if !write_buf.is_empty() {
                let outgoing = write_buf.clone();
                match race(&mut rx, &mut pending, &mut write_buf, transport.write_all(&outgoing)).await {
                    Raced::Done(Ok(())) => write_buf.clear(),
                    Raced::Done(Err(err)) => {
                        warn!(error = %err, "command pipeline write failed; failing pending handlers");
                        write_buf.clear();
                        fail_all(&mut pending, b"connection lost");
                        continue 'outer;
                    }
                    Raced::NewJob => continue,
                    Raced::Closed => break 'outer,
                }
            }

            let value = loop {
                match parser.parse(&read_buf) {
                    Ok((consumed, Some(value))) => {
                        let _ = read_buf.split_to(consumed);
                        break Some(value);
                    }
                    Ok((_, None)) => {
                        match race(&mut rx, &mut pending, &mut write_buf, transport.read_some(&mut chunk)).await {
                            Raced::Done(Ok(n)) => read_buf.extend_from_slice(&chunk[..n]),
                            Raced::Done(Err(err)) => {
                                warn!(error = %err, "command pipeline read failed; failing pending handlers");
                                break None;
                            }
                            Raced::NewJob => continue,
                            Raced::Closed => break 'outer,
                        }
                    }
                    Err(()) => {
                        warn!(
                            error = %RedisError::Protocol,
                            "malformed RESP frame on command pipeline; failing pending handlers"
                        );
                        read_buf.clear();
                        fail_all(&mut pending, b"protocol error: malformed RESP frame");
                        continue 'outer;
                    }
                }
            };

            match value {
                Some(value) => {
                    if let Some(handler) = pending.pop_front() {
                        debug!(?value, "dispatching reply to pending handler");
                        handler(value);
                    }
                    while let Ok(job) = rx.try_recv() {
                        if !apply(job, &mut pending, &mut write_buf) {
                            break 'outer;
                        }
                    }
                }
                None => {
                    read_buf.clear();
                    fail_all(&mut pending, b"connection lost");
                    continue 'outer;
                }
            }
        }
    }

    transport.close();
    open.store(false, Ordering::SeqCst);
}
