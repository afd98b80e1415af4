//! Byte stream over any tokio `AsyncRead + AsyncWrite`
//!
//! Used for the TCP side of every session. Tests use it over
//! `tokio::io::duplex` pipes.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::{CloseSignal, TransportError, TransportResult, TransportStream};

/// Shared byte stream over a split tokio IO object
pub struct IoStream<T> {
    reader: Mutex<Option<ReadHalf<T>>>,
    writer: Mutex<Option<WriteHalf<T>>>,
    signal: CloseSignal,
    peer: String,
}

impl<T> std::fmt::Debug for IoStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoStream")
            .field("peer", &self.peer)
            .field("closed", &self.signal.is_closed())
            .finish()
    }
}

impl<T> IoStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(io: T, peer: impl Into<String>) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            signal: CloseSignal::new(),
            peer: peer.into(),
        }
    }
}

impl IoStream<TcpStream> {
    /// Wrap an accepted or dialed TCP connection
    pub fn tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        Self::new(stream, peer)
    }
}

#[async_trait]
impl<T> TransportStream for IoStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read(&self, buf: &mut [u8]) -> TransportResult<usize> {
        let mut guard = tokio::select! {
            biased;
            _ = self.signal.closed() => return Err(TransportError::StreamClosed),
            guard = self.reader.lock() => guard,
        };
        let reader = guard.as_mut().ok_or(TransportError::StreamClosed)?;

        tokio::select! {
            biased;
            _ = self.signal.closed() => Err(TransportError::StreamClosed),
            result = reader.read(buf) => Ok(result?),
        }
    }

    async fn write(&self, data: &[u8]) -> TransportResult<()> {
        let mut guard = tokio::select! {
            biased;
            _ = self.signal.closed() => return Err(TransportError::StreamClosed),
            guard = self.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(TransportError::StreamClosed)?;

        let send = async {
            writer.write_all(data).await?;
            writer.flush().await
        };

        tokio::select! {
            biased;
            _ = self.signal.closed() => Err(TransportError::StreamClosed),
            result = send => Ok(result?),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.signal.trigger() {
            return Ok(());
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            // FIN is best effort, a stalled peer must not hold the closer
            if let Some(Err(e)) = writer.shutdown().now_or_never() {
                debug!("Shutdown of {} failed: {}", self.peer, e);
            }
        }
        self.reader.lock().await.take();

        trace!("Closed stream to {}", self.peer);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

/// Dial a TCP address, optionally bounded by a timeout
pub async fn connect_tcp(address: &str, timeout: Option<Duration>) -> TransportResult<TcpStream> {
    let connect = TcpStream::connect(address);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => connect.await,
    };

    result.map_err(|e| TransportError::ConnectionError(format!("Failed to connect to {}: {}", address, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_and_write_roundtrip() {
        let (local, mut remote) = duplex(64);
        let stream = IoStream::new(local, "duplex");

        stream.write(b"hello").await.unwrap();
        let mut received = [0u8; 5];
        remote.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello");

        remote.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn test_read_returns_zero_on_peer_close() {
        let (local, remote) = duplex(64);
        let stream = IoStream::new(local, "duplex");
        drop(remote);

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (local, _remote) = duplex(64);
        let stream = Arc::new(IoStream::new(local, "duplex"));

        let reader = {
            let stream = stream.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                stream.read(&mut buf).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("read should be released by close")
            .unwrap();
        assert!(matches!(result, Err(TransportError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_reaches_peer() {
        let (local, mut remote) = duplex(64);
        let stream = IoStream::new(local, "duplex");

        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert!(stream.is_closed());
        assert!(matches!(
            stream.write(b"late").await,
            Err(TransportError::StreamClosed)
        ));

        let mut buf = [0u8; 8];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connect_tcp_reports_refused_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect_tcp(&addr.to_string(), Some(Duration::from_secs(2))).await;
        assert!(matches!(result, Err(TransportError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_tcp_stream_reports_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dial = tokio::spawn(async move { connect_tcp(&addr.to_string(), None).await });
        let (_accepted, _) = listener.accept().await.unwrap();
        let stream = IoStream::tcp(dial.await.unwrap().unwrap());

        assert_eq!(stream.peer(), addr.to_string());
    }
}
