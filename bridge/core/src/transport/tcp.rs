//! TCP Transport
//!
//! One loopback connection carries both directions.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::traits::{Transport, TransportError, TransportStream};

/// Loopback TCP transport
#[derive(Debug, Clone)]
pub struct TcpTransport {
    port: u16,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport targeting `localhost:<port>`
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout,
        }
    }

    /// Address connected to
    ///
    /// Hosts listen on IPv4 loopback, so `localhost` is pinned to 127.0.0.1
    /// rather than resolved.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self) -> Result<TransportStream, TransportError> {
        let addr = self.addr();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                target: addr.to_string(),
                after: self.connect_timeout,
            })?
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        stream.set_nodelay(true)?;
        tracing::info!(addr = %addr, "Connected to host");

        Ok(TransportStream::from_duplex(stream))
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_round_trip() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let host = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let transport = TcpTransport::new(port, Duration::from_secs(5));
        let (mut reader, mut writer) = transport.open().await.unwrap().into_split();

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        writer.write_all(b"ack").await.unwrap();

        assert_eq!(&host.await.unwrap(), b"ack");
    }

    #[tokio::test]
    async fn test_open_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpTransport::new(port, Duration::from_secs(5));
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[test]
    fn test_describe() {
        let transport = TcpTransport::new(4100, Duration::from_secs(1));
        assert_eq!(transport.describe(), "tcp 127.0.0.1:4100");
    }
}
