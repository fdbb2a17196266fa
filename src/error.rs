//! Structured error type for the client.
//!
//! The teacher (`entangled90-rdis`) gets away with `Box<dyn Error + Send +
//! Sync>` because it is a server binary talking to itself. A client library
//! handed to other crates' error-handling code should expose a concrete,
//! matchable type instead — the shape here follows `iainh-smpp`'s
//! `client::error::SmppError` (`thiserror`-derived, one variant per failure
//! class from §7's taxonomy).

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedisError {
    /// Address resolution failure (§7 item 1): a malformed `host:port`
    /// string, e.g. a missing colon or a non-numeric port.
    #[error("invalid address: {0}")]
    Address(String),

    /// Connect failure (§7 item 2) or any other I/O failure that occurred
    /// outside of an established, auto-reconnecting session (e.g. the very
    /// first `connect`).
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    /// Protocol framing anomaly that the parser could not interpret at all
    /// (§7 item 4) — not "need more bytes", but bytes that can never form a
    /// valid RESP frame at the expected position.
    #[error("protocol error: malformed RESP frame")]
    Protocol,

    /// The background actor task for a session has shut down (its
    /// receiving half was dropped, or it lost its channel peer), so no
    /// further commands or subscriptions can be issued.
    #[error("session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, RedisError>;
