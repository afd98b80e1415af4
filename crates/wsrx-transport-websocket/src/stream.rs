//! WebSocket tunnel exposed as a byte stream
//!
//! Message boundaries are not preserved. An inbound message larger than
//! the caller's buffer is handed out over several reads; outbound writes
//! become one binary message per `max_frame_size` chunk.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{tungstenite, MaybeTlsStream};
use tracing::{debug, trace};
use wsrx_transport::{CloseSignal, TransportError, TransportResult, TransportStream};

use crate::frame::{FrameKind, WsFrame};

/// Tunnel dialed by the client side
pub type ClientWebSocket = WebSocketStream<
    tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>,
    tungstenite::Message,
>;

/// Tunnel accepted by the axum traffic endpoint
#[cfg(feature = "axum")]
pub type ServerWebSocket =
    WebSocketStream<axum::extract::ws::WebSocket, axum::extract::ws::Message>;

struct Reader<R> {
    source: Option<R>,
    /// Unread tail of the last data message
    carry: Bytes,
    eof: bool,
}

/// Byte stream over one WebSocket connection
pub struct WebSocketStream<S, M> {
    sink: Mutex<Option<SplitSink<S, M>>>,
    reader: Mutex<Reader<SplitStream<S>>>,
    signal: CloseSignal,
    max_frame_size: usize,
    peer: String,
}

impl<S, M> std::fmt::Debug for WebSocketStream<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketStream")
            .field("peer", &self.peer)
            .field("max_frame_size", &self.max_frame_size)
            .field("closed", &self.signal.is_closed())
            .finish()
    }
}

impl<S, M> WebSocketStream<S, M>
where
    M: WsFrame,
    S: Stream<Item = Result<M, M::Error>> + Sink<M, Error = M::Error> + Send + 'static,
{
    pub fn new(socket: S, peer: impl Into<String>, max_frame_size: usize) -> Self {
        let (sink, source) = socket.split();
        Self {
            sink: Mutex::new(Some(sink)),
            reader: Mutex::new(Reader {
                source: Some(source),
                carry: Bytes::new(),
                eof: false,
            }),
            signal: CloseSignal::new(),
            max_frame_size: max_frame_size.max(1),
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl<S, M> TransportStream for WebSocketStream<S, M>
where
    M: WsFrame,
    S: Stream<Item = Result<M, M::Error>> + Sink<M, Error = M::Error> + Send + 'static,
{
    async fn read(&self, buf: &mut [u8]) -> TransportResult<usize> {
        // Leaves carried bytes in place for the next non-empty read
        if buf.is_empty() {
            if self.signal.is_closed() {
                return Err(TransportError::StreamClosed);
            }
            return Ok(0);
        }

        let mut reader = tokio::select! {
            biased;
            _ = self.signal.closed() => return Err(TransportError::StreamClosed),
            guard = self.reader.lock() => guard,
        };

        loop {
            if !reader.carry.is_empty() {
                let n = buf.len().min(reader.carry.len());
                let chunk = reader.carry.split_to(n);
                buf[..n].copy_from_slice(&chunk);
                return Ok(n);
            }
            if reader.eof {
                return Ok(0);
            }

            let source = reader.source.as_mut().ok_or(TransportError::StreamClosed)?;
            let next = tokio::select! {
                biased;
                _ = self.signal.closed() => return Err(TransportError::StreamClosed),
                next = source.next() => next,
            };

            match next {
                Some(Ok(message)) => match message.classify() {
                    FrameKind::Data(payload) => reader.carry = payload,
                    FrameKind::Close => {
                        debug!("Close message from {}", self.peer);
                        reader.eof = true;
                    }
                    FrameKind::Control => trace!("Skipping control message from {}", self.peer),
                },
                Some(Err(e)) => {
                    return Err(TransportError::ConnectionError(format!(
                        "WebSocket receive from {} failed: {}",
                        self.peer, e
                    )))
                }
                None => reader.eof = true,
            }
        }
    }

    async fn write(&self, data: &[u8]) -> TransportResult<()> {
        let mut guard = tokio::select! {
            biased;
            _ = self.signal.closed() => return Err(TransportError::StreamClosed),
            guard = self.sink.lock() => guard,
        };
        let sink = guard.as_mut().ok_or(TransportError::StreamClosed)?;

        let max_frame_size = self.max_frame_size;
        let send = async move {
            for chunk in data.chunks(max_frame_size) {
                sink.feed(M::binary(Bytes::copy_from_slice(chunk))).await?;
            }
            sink.flush().await
        };

        tokio::select! {
            biased;
            _ = self.signal.closed() => Err(TransportError::StreamClosed),
            result = send => result.map_err(|e| {
                TransportError::ConnectionError(format!(
                    "WebSocket send to {} failed: {}",
                    self.peer, e
                ))
            }),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.signal.trigger() {
            return Ok(());
        }

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            // Close frame is best effort, a stalled peer must not hold the closer
            if let Some(Err(e)) = sink.send(M::close()).now_or_never() {
                debug!("Close frame to {} failed: {}", self.peer, e);
            }
        }
        self.reader.lock().await.source.take();

        trace!("Closed WebSocket to {}", self.peer);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}
