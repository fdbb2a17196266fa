//! The pub-sub session: C5.
//!
//! Grounded on `original_source/include/redis/subscribed_stream.hpp` and
//! `src/subscribed_stream.cc`: a registry of `(topic -> handler)` plus
//! `(topic -> kind)`, a perpetual read loop dispatching push frames, and a
//! perpetual write-buffer drain for outgoing (p)subscribe/unsubscribe
//! commands. The original drives both loops with a pair of boolean guards
//! (`is_reading_`/`is_writing_`) so a callback re-arming its own operation
//! doesn't double up; here, a single actor task alternates one write-or-read
//! step at a time, so there is no boolean to get backwards (see SPEC_FULL.md
//! Part D item 3 for the discussion of the original's `is_writing_` guard
//! typo). Each step races against incoming commands via `race`/`Raced`, so a
//! queued `Command::Close` interrupts a write or read stuck inside
//! `Transport::recover`'s unbounded reconnect loop instead of sitting unread
//! behind it.
//!
//! Resubscription after a reconnect (§4.5) is driven directly off the
//! `Err` that `Transport::read_some`/`write_all` return once their
//! internal reconnect loop has completed: by the time the actor sees that
//! `Err`, the transport is already reconnected, so the actor just re-queues
//! `SUBSCRIBE`/`PSUBSCRIBE` for every topic still in `meta` and continues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::args::{encode_command, Arg};
use crate::error::{RedisError, Result};
use crate::resp::{IncrementalParser, Value};
use crate::transport::{split_hostport, Callbacks, ReconnectCb, StreamClosedCb, Transport, RECONNECT_RETRY_DELAY};

pub const DEFAULT_READ_SIZE: usize = 1024;

pub type MessageCb = Box<dyn Fn(Bytes, Bytes) + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Plain,
    Pattern,
}

impl Kind {
    fn subscribe_command(self) -> &'static str {
        match self {
            Kind::Plain => "SUBSCRIBE",
            Kind::Pattern => "PSUBSCRIBE",
        }
    }

    fn unsubscribe_command(self) -> &'static str {
        match self {
            Kind::Plain => "UNSUBSCRIBE",
            Kind::Pattern => "PUNSUBSCRIBE",
        }
    }
}

enum Command {
    Subscribe(Bytes, Kind, MessageCb),
    Unsubscribe(Bytes, oneshot::Sender<bool>),
    Close,
}

/// A subscription session: tracks topics, dispatches push messages, and
/// transparently resubscribes after the underlying transport reconnects
/// (§4.5).
#[derive(Clone)]
pub struct PubSubSession {
    tx: mpsc::UnboundedSender<Command>,
    callbacks: Callbacks,
    open: Arc<AtomicBool>,
}

impl PubSubSession {
    pub async fn connect(host: &str, port: u16) -> Result<PubSubSession> {
        Self::connect_with_options(host, port, DEFAULT_READ_SIZE, RECONNECT_RETRY_DELAY).await
    }

    pub async fn connect_hostport(hostport: &str) -> Result<PubSubSession> {
        let (host, port) = split_hostport(hostport)?;
        PubSubSession::connect(host, port).await
    }

    /// Like [`connect`](Self::connect), with a caller-chosen read-chunk size
    /// and reconnect retry cadence (§B.3).
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        read_chunk_size: usize,
        retry_delay: Duration,
    ) -> Result<PubSubSession> {
        let callbacks = Callbacks::new();
        let transport = Transport::connect_with_retry_delay(host, port, callbacks.clone(), retry_delay).await?;
        Ok(Self::spawn(transport, callbacks, read_chunk_size))
    }

    fn spawn(transport: Transport, callbacks: Callbacks, read_chunk_size: usize) -> PubSubSession {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        tokio::spawn(run(transport, rx, open.clone(), read_chunk_size));
        PubSubSession { tx, callbacks, open }
    }

    /// Subscribes to an exact channel name (§4.5: `SUBSCRIBE`).
    pub fn subscribe<F>(&self, topic: impl Into<Bytes>, cb: F)
    where
        F: Fn(Bytes, Bytes) + Send + Sync + 'static,
    {
        let _ = self
            .tx
            .send(Command::Subscribe(topic.into(), Kind::Plain, Box::new(cb)));
    }

    /// Subscribes to a glob pattern (§4.5: `PSUBSCRIBE`); the callback
    /// receives the concrete delivered channel, not the pattern.
    pub fn psubscribe<F>(&self, topic: impl Into<Bytes>, cb: F)
    where
        F: Fn(Bytes, Bytes) + Send + Sync + 'static,
    {
        let _ = self
            .tx
            .send(Command::Subscribe(topic.into(), Kind::Pattern, Box::new(cb)));
    }

    /// Unsubscribes from `topic`. Resolves to `false` if `topic` was not
    /// subscribed (§8: "unsubscribe of an unknown topic returns false and
    /// mutates nothing").
    pub async fn unsubscribe(&self, topic: impl Into<Bytes>) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Unsubscribe(topic.into(), reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
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

    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }
}

struct Registry {
    handlers: HashMap<Bytes, MessageCb>,
    meta: HashMap<Bytes, Kind>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            handlers: HashMap::new(),
            meta: HashMap::new(),
        }
    }

    fn insert(&mut self, topic: Bytes, kind: Kind, cb: MessageCb) {
        self.meta.insert(topic.clone(), kind);
        self.handlers.insert(topic, cb);
    }

    fn remove(&mut self, topic: &Bytes) -> Option<Kind> {
        self.handlers.remove(topic);
        self.meta.remove(topic)
    }

    fn append_subscribe_commands(&self, write_buf: &mut BytesMut, topic: &Bytes, kind: Kind) {
        let args: Vec<Arg> = vec![kind.subscribe_command().into(), topic.clone().into()];
        encode_command(&args).serialize(write_buf);
    }

    fn append_unsubscribe_commands(&self, write_buf: &mut BytesMut, topic: &Bytes, kind: Kind) {
        let args: Vec<Arg> = vec![kind.unsubscribe_command().into(), topic.clone().into()];
        encode_command(&args).serialize(write_buf);
    }

    /// Re-issues a (p)subscribe command for every topic still registered,
    /// the way `subscribed_stream::resubscribe` iterates `meta` in the
    /// original (§4.5's "order of iteration over meta is unspecified").
    fn append_resubscribe_commands(&self, write_buf: &mut BytesMut) {
        for (topic, kind) in self.meta.iter() {
            self.append_subscribe_commands(write_buf, topic, *kind);
        }
    }
}

/// Interprets a parsed value as a push frame (§4.5): an Array whose first
/// element is a BulkString ending (case-insensitively) in `message`.
/// Returns `(dispatch_key, delivered_channel, payload)` on a match.
fn as_push_frame(value: &Value) -> Option<(Bytes, Bytes, Bytes)> {
    let items = match value {
        Value::Array(items) => items,
        _ => return None,
    };
    let kind = match items.first() {
        Some(Value::BulkString(b)) => b,
        _ => return None,
    };
    if !ends_with_message_ci(kind) {
        return None;
    }

    match items.len() {
        3 => {
            let channel = bulk_bytes(&items[1])?;
            let payload = bulk_bytes(&items[2])?;
            Some((channel.clone(), channel, payload))
        }
        4 => {
            let pattern = bulk_bytes(&items[1])?;
            let channel = bulk_bytes(&items[2])?;
            let payload = bulk_bytes(&items[3])?;
            Some((pattern, channel, payload))
        }
        _ => None,
    }
}

fn bulk_bytes(value: &Value) -> Option<Bytes> {
    match value {
        Value::BulkString(b) => Some(b.clone()),
        _ => None,
    }
}

fn ends_with_message_ci(bytes: &[u8]) -> bool {
    const SUFFIX: &[u8] = b"message";
    if bytes.len() < SUFFIX.len() {
        return false;
    }
    bytes[bytes.len() - SUFFIX.len()..]
        .iter()
        .zip(SUFFIX)
        .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

/// Outcome of racing one transport operation against `rx` (§5: `close()`
/// must be able to interrupt a write/read stuck inside `Transport::recover`'s
/// unbounded reconnect loop, not just queue behind it — the same concern
/// `pipeline::run` addresses with its own `race` helper).
enum Raced<T> {
    Done(T),
    NewCommand,
    Closed,
}

/// Applies one incoming command to `registry`/`write_buf`. Returns `false` on
/// `Command::Close` or the channel closing, telling the caller to stop.
fn apply(cmd: Option<Command>, registry: &mut Registry, write_buf: &mut BytesMut) -> bool {
    match cmd {
        Some(Command::Subscribe(topic, kind, cb)) => {
            registry.append_subscribe_commands(write_buf, &topic, kind);
            registry.insert(topic, kind, cb);
            true
        }
        Some(Command::Unsubscribe(topic, reply)) => {
            match registry.remove(&topic) {
                Some(kind) => {
                    registry.append_unsubscribe_commands(write_buf, &topic, kind);
                    let _ = reply.send(true);
                }
                None => {
                    let _ = reply.send(false);
                }
            }
            true
        }
        Some(Command::Close) | None => false,
    }
}

/// Races a single `write_all`/`read_some` call against incoming commands, so
/// a queued [`Command::Close`] is observed even while `op` is blocked inside
/// an indefinite reconnect retry loop rather than sitting unread behind it.
async fn race<T>(
    rx: &mut mpsc::UnboundedReceiver<Command>,
    registry: &mut Registry,
    write_buf: &mut BytesMut,
    op: impl std::future::Future<Output = T>,
) -> Raced<T> {
    tokio::select! {
        biased;

        cmd = rx.recv() => {
            if apply(cmd, registry, write_buf) {
                Raced::NewCommand
            } else {
                Raced::Closed
            }
        }

        result = op => Raced::Done(result),
    }
}

async fn run(
    mut transport: Transport,
    mut rx: mpsc::UnboundedReceiver<Command>,
    open: Arc<AtomicBool>,
    read_chunk_size: usize,
) {
    let mut registry = Registry::new();
    let mut write_buf = BytesMut::new();
    let mut read_buf = BytesMut::new();
    let mut parser = IncrementalParser::new();
    let mut chunk = vec![0u8; read_chunk_size];

    'outer: loop {
        if !write_buf.is_empty() {
            let outgoing = write_buf.clone();
            match race(&mut rx, &mut registry, &mut write_buf, transport.write_all(&outgoing)).await {
                Raced::Done(Ok(())) => write_buf.clear(),
                Raced::Done(Err(err)) => {
                    warn!(error = %err, "pub-sub write failed; transport reconnected, resubscribing");
                    write_buf.clear();
                    registry.append_resubscribe_commands(&mut write_buf);
                }
                Raced::NewCommand => {}
                Raced::Closed => break 'outer,
            }
            continue 'outer;
        }

        match race(&mut rx, &mut registry, &mut write_buf, transport.read_some(&mut chunk)).await {
            Raced::Done(Ok(n)) => {
                read_buf.extend_from_slice(&chunk[..n]);
                drain_parsed_messages(&mut parser, &mut read_buf, &registry);
            }
            Raced::Done(Err(err)) => {
                warn!(error = %err, "pub-sub read failed; transport reconnected, resubscribing");
                read_buf.clear();
                registry.append_resubscribe_commands(&mut write_buf);
            }
            Raced::NewCommand => {}
            Raced::Closed => break 'outer,
        }
    }

    transport.close();
    open.store(false, Ordering::SeqCst);
}

fn drain_parsed_messages(parser: &mut IncrementalParser, read_buf: &mut BytesMut, registry: &Registry) {
    loop {
        match parser.parse(read_buf) {
            Ok((consumed, Some(value))) => {
                let _ = read_buf.split_to(consumed);
                if let Some((key, channel, payload)) = as_push_frame(&value) {
                    if let Some(handler) = registry.handlers.get(&key) {
                        debug!(channel = ?channel, "dispatching push message");
                        handler(channel, payload);
                    }
                }
            }
            Ok((_, None)) => break,
            Err(()) => {
                warn!(
                    error = %RedisError::Protocol,
                    "malformed RESP frame on pub-sub stream; dropping buffered bytes"
                );
                read_buf.clear();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn spawn_over(stream: TcpStream) -> PubSubSession {
        let callbacks = Callbacks::new();
        let transport = Transport::from_stream(stream, "test", 0, callbacks.clone());
        PubSubSession::spawn(transport, callbacks, DEFAULT_READ_SIZE)
    }

    #[tokio::test]
    async fn plain_message_dispatches_by_channel() {
        let (client, mut server) = loopback_pair().await;
        let session = spawn_over(client);

        let received: Arc<Mutex<Option<(Bytes, Bytes)>>> = Arc::new(Mutex::new(None));
        let r = received.clone();
        session.subscribe("x", move |channel, payload| {
            *r.lock().unwrap() = Some((channel, payload));
        });

        let mut buf = vec![0u8; b"*2\r\n$9\r\nSUBSCRIBE\r\n$1\r\nx\r\n".len()];
        server.read_exact(&mut buf).await.unwrap();

        server
            .write_all(b"*3\r\n$7\r\nmessage\r\n$1\r\nx\r\n$5\r\nhello\r\n")
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (channel, payload) = received.lock().unwrap().clone().unwrap();
        assert_eq!(channel, Bytes::from_static(b"x"));
        assert_eq!(payload, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn pattern_message_dispatches_by_pattern_key_with_concrete_channel() {
        let (client, mut server) = loopback_pair().await;
        let session = spawn_over(client);

        let received: Arc<Mutex<Option<(Bytes, Bytes)>>> = Arc::new(Mutex::new(None));
        let r = received.clone();
        session.psubscribe("news.*", move |channel, payload| {
            *r.lock().unwrap() = Some((channel, payload));
        });

        let mut buf = vec![0u8; b"*2\r\n$10\r\nPSUBSCRIBE\r\n$6\r\nnews.*\r\n".len()];
        server.read_exact(&mut buf).await.unwrap();

        server
            .write_all(b"*4\r\n$8\r\npmessage\r\n$6\r\nnews.*\r\n$10\r\nnews.sport\r\n$3\r\nwin\r\n")
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (channel, payload) = received.lock().unwrap().clone().unwrap();
        assert_eq!(channel, Bytes::from_static(b"news.sport"));
        assert_eq!(payload, Bytes::from_static(b"win"));
    }

    #[tokio::test]
    async fn unsubscribe_unknown_topic_returns_false() {
        let (client, _server) = loopback_pair().await;
        let session = spawn_over(client);
        assert!(!session.unsubscribe("nope").await);
    }

    #[tokio::test]
    async fn unsubscribe_known_topic_removes_it_and_emits_command() {
        let (client, mut server) = loopback_pair().await;
        let session = spawn_over(client);
        session.subscribe("chan", |_, _| {});

        let mut buf = vec![0u8; b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nchan\r\n".len()];
        server.read_exact(&mut buf).await.unwrap();

        assert!(session.unsubscribe("chan").await);

        let mut buf = vec![0u8; b"*2\r\n$11\r\nUNSUBSCRIBE\r\n$4\r\nchan\r\n".len()];
        server.read_exact(&mut buf).await.unwrap();

        assert!(!session.unsubscribe("chan").await);
    }

    #[test]
    fn push_frame_detection_is_case_insensitive_on_suffix() {
        let value = Value::Array(vec![
            Value::bulk(&b"Message"[..]),
            Value::bulk(&b"x"[..]),
            Value::bulk(&b"hi"[..]),
        ]);
        let (key, channel, payload) = as_push_frame(&value).unwrap();
        assert_eq!(key, Bytes::from_static(b"x"));
        assert_eq!(channel, Bytes::from_static(b"x"));
        assert_eq!(payload, Bytes::from_static(b"hi"));
    }

    #[test]
    fn non_push_frame_is_ignored() {
        let value = Value::Array(vec![Value::bulk(&b"subscribe"[..]), Value::bulk(&b"x"[..]), Value::Integer(1)]);
        assert!(as_push_frame(&value).is_none());
    }
}
