//! Outbound connections for tunnels.

use std::fmt::Debug;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens raw connections to origins.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream>;
}

/// Plain TCP dialing with an optional connect deadline.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let dial = TcpStream::connect((host, port));
        let stream = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, dial).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", limit),
                )
            })??,
            None => dial.await?,
        };
        stream.set_nodelay(true)?;
        debug!(host, port, peer = ?stream.peer_addr().ok(), "Dialed origin");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = TcpConnector::new(Some(Duration::from_secs(5)));
        let stream = connector.connect("127.0.0.1", port).await.unwrap();
        let (_, peer) = listener.accept().await.unwrap();
        assert_eq!(stream.local_addr().unwrap(), peer);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(TcpConnector::default().connect("127.0.0.1", port).await.is_err());
    }
}
