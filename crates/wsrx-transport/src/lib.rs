//! Transport abstraction for tunnel sessions
//!
//! Every live session pairs two byte streams: the plain TCP connection on
//! one side and the WebSocket tunnel on the other. The bridging engine does
//! not care which is which, it only needs the capability defined here:
//! read some bytes, write some bytes, close.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Bridge / Connection Registry                │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Uses TransportStream
//!                           ↓
//! ┌──────────────────────────┬──────────────────────────────┐
//! │ IoStream                 │ WebSocketStream              │
//! │ (TCP, any AsyncRead +    │ (wsrx-transport-websocket)   │
//! │  AsyncWrite)             │                              │
//! └──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Close semantics
//!
//! Streams are shared (`Arc<dyn TransportStream>`) between the reader task,
//! the pump loop and the registry. `close()` is the only way to tear a
//! stream down: it wakes every pending `read`/`write` on that stream with
//! [`TransportError::StreamClosed`] and then releases the socket.

pub mod io_stream;

pub use io_stream::{connect_tcp, IoStream};

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Timeout")]
    Timeout,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A byte stream that can be bridged
///
/// All methods take `&self` so one stream can be shared between a reader
/// task and a writer. Implementations serialize readers and writers
/// internally; callers must still keep to a single writer at a time.
#[async_trait]
pub trait TransportStream: Send + Sync + Debug {
    /// Read up to `buf.len()` bytes.
    ///
    /// Waits until at least one byte is available. Returns `Ok(0)` once the
    /// peer has ended the stream, or immediately when `buf` is empty; an
    /// empty read consumes nothing and does not mean end of stream.
    async fn read(&self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Write all of `data`.
    async fn write(&self, data: &[u8]) -> TransportResult<()>;

    /// Close the stream.
    ///
    /// Idempotent. Pending and later reads/writes fail with
    /// [`TransportError::StreamClosed`].
    async fn close(&self) -> TransportResult<()>;

    /// Whether `close()` has been called
    fn is_closed(&self) -> bool;

    /// Human readable peer description for logs
    fn peer(&self) -> &str;
}

/// Close state shared by everything touching one stream
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    closed: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the stream closed and wake all waiters.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn trigger(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`CloseSignal::trigger`] has been called
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}
