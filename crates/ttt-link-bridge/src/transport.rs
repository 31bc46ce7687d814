//! Transport abstractions for the device link
//!
//! A backend knows how to enumerate and open devices; an open device is a
//! pair of independent reader and writer halves so that polling and sending
//! never contend for the same handle.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use ttt_link_core::{Endpoint, IoError, OpenError};

/// Inbound half of an open device
#[async_trait]
pub trait LinkReader: Send {
    /// Read whatever bytes are available into `buf`
    ///
    /// Must be cancel-safe: dropping the future before it completes loses no data.
    /// Returning `Ok(0)` means the device is gone.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, IoError>;
}

/// Outbound half of an open device
#[async_trait]
pub trait LinkWriter: Send {
    /// Write some prefix of `data`, returning how many bytes were accepted
    async fn write_chunk(&mut self, data: &[u8]) -> Result<usize, IoError>;

    /// Push buffered bytes to the device
    async fn flush(&mut self) -> Result<(), IoError>;
}

/// Both halves of a freshly opened device
pub struct PortHandles {
    pub reader: Box<dyn LinkReader>,
    pub writer: Box<dyn LinkWriter>,
}

impl PortHandles {
    pub fn new(reader: impl LinkReader + 'static, writer: impl LinkWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Source of devices
#[async_trait]
pub trait LinkBackend: Send + Sync {
    /// Names of the devices currently present, in platform order
    fn enumerate(&self) -> Vec<String>;

    /// Open a device at the endpoint's rate
    async fn open(&self, endpoint: &Endpoint, timeout: Duration) -> Result<PortHandles, OpenError>;
}

/// Reader over any tokio byte stream
pub struct StreamReader<R>(pub R);

#[async_trait]
impl<R> LinkReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        self.0.read(buf).await.map_err(IoError::from_io)
    }
}

/// Writer over any tokio byte stream
pub struct StreamWriter<W>(pub W);

#[async_trait]
impl<W> LinkWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_chunk(&mut self, data: &[u8]) -> Result<usize, IoError> {
        self.0.write(data).await.map_err(IoError::from_io)
    }

    async fn flush(&mut self) -> Result<(), IoError> {
        self.0.flush().await.map_err(IoError::from_io)
    }
}
