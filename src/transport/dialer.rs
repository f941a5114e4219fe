use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Raw byte stream carrying frames. Real sockets in production, in-memory
/// pipes in tests.
pub trait BrokerIo: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> BrokerIo for T {}

pub type BoxedBrokerIo = Box<dyn BrokerIo>;

/// Opens the byte stream a session runs over. Sessions own exactly one
/// stream for their whole lifetime.
#[async_trait]
pub trait BrokerDialer: Send + Sync {
    async fn dial(&self) -> io::Result<BoxedBrokerIo>;
}

/// Production dialer: plain TCP to the broker's frame endpoint.
pub struct TcpDialer {
    address: String,
}

impl TcpDialer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl BrokerDialer for TcpDialer {
    async fn dial(&self) -> io::Result<BoxedBrokerIo> {
        let stream = TcpStream::connect(&self.address).await?;
        Ok(Box::new(stream))
    }
}
