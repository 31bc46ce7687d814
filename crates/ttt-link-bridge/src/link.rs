//! Ownership of the device connection
//!
//! `LinkManager` holds at most one open device. Open, close and rate changes
//! are serialized through one lock; sending also takes that lock so a frame
//! is never written while the handle is being swapped. Receiving only takes
//! the inbound half, so polling and sending proceed independently.
//!
//! A fatal error from either direction marks the connection lost: both halves
//! are dropped and every later send or receive returns that same error until
//! the connection is reopened or closed.

use crate::framing::LineBuffer;
use crate::protocol::preview;
use crate::transport::{LinkBackend, LinkReader, LinkWriter, PortHandles};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use ttt_link_core::{BaudRate, Endpoint, IoError, OpenError, Result};

/// Size of a single device read
const READ_CHUNK: usize = 512;

/// Identity of an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Stays the same across rate changes
    pub id: u64,
    pub endpoint: Endpoint,
    /// Device I/O timeout given at open
    pub timeout: Duration,
}

struct Inbound {
    reader: Box<dyn LinkReader>,
    lines: LineBuffer,
}

/// Owner of the single device connection
pub struct LinkManager {
    backend: Arc<dyn LinkBackend>,
    /// Current connection; held across open, close, rate change and send
    current: Mutex<Option<ConnectionInfo>>,
    inbound: Mutex<Option<Inbound>>,
    outbound: Mutex<Option<Box<dyn LinkWriter>>>,
    /// Fatal error that took the device down, if any
    lost: std::sync::Mutex<Option<IoError>>,
    next_id: AtomicU64,
}

impl LinkManager {
    pub fn new(backend: Arc<dyn LinkBackend>) -> Self {
        Self {
            backend,
            current: Mutex::new(None),
            inbound: Mutex::new(None),
            outbound: Mutex::new(None),
            lost: std::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Names of available devices
    pub fn enumerate(&self) -> Vec<String> {
        self.backend.enumerate()
    }

    /// Open a device, closing any previous connection first
    pub async fn open(
        &self,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> std::result::Result<ConnectionInfo, OpenError> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            info!("Closing {} before opening {}", previous.endpoint, endpoint.name);
            self.release().await;
        }

        info!("Opening {}", endpoint);
        let handles = self.backend.open(&endpoint, timeout).await.map_err(|e| {
            warn!("Failed to open {}: {}", endpoint.name, e);
            e
        })?;
        self.install(handles).await;

        let connection = ConnectionInfo {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            endpoint,
            timeout,
        };
        info!("Connected to {}", connection.endpoint);
        *current = Some(connection.clone());
        Ok(connection)
    }

    /// Reopen the device at a new rate, keeping the connection identity
    pub async fn set_rate(&self, rate: BaudRate) -> Result<ConnectionInfo> {
        let mut current = self.current.lock().await;
        let connection = current.clone().ok_or(IoError::NotConnected)?;
        if connection.endpoint.rate == rate && self.lost().is_none() {
            return Ok(connection);
        }

        let endpoint = connection.endpoint.with_rate(rate);
        info!("Changing rate of {} to {} baud", endpoint.name, rate);
        self.release().await;

        match self.backend.open(&endpoint, connection.timeout).await {
            Ok(handles) => {
                self.install(handles).await;
                let connection = ConnectionInfo {
                    endpoint,
                    ..connection
                };
                *current = Some(connection.clone());
                Ok(connection)
            }
            Err(e) => {
                error!("Failed to reopen {} at {} baud: {}", endpoint.name, rate, e);
                *current = None;
                Err(e.into())
            }
        }
    }

    /// Write a complete frame
    pub async fn send(&self, data: &[u8]) -> std::result::Result<(), IoError> {
        let current = self.current.lock().await;
        let connection = current.as_ref().ok_or(IoError::NotConnected)?;
        if let Some(err) = self.lost() {
            return Err(err);
        }

        let mut outbound = self.outbound.lock().await;
        let writer = outbound.as_mut().ok_or(IoError::NotConnected)?;

        let json_preview = preview(&String::from_utf8_lossy(data));
        debug!("[Host→Device] len={} json={}", data.len(), json_preview.trim_end());

        let written = tokio::time::timeout(connection.timeout, write_all(writer.as_mut(), data))
            .await
            .unwrap_or(Err(IoError::Timeout));
        if let Err(err) = &written {
            if err.is_fatal() {
                error!("Write to {} failed, dropping link: {}", connection.endpoint.name, err);
                outbound.take();
                drop(outbound);
                self.set_lost(err.clone());
                self.inbound.lock().await.take();
            }
        }
        written
    }

    /// Wait up to `timeout` for one complete inbound line
    ///
    /// `Ok(None)` means no complete line arrived in time, which is the normal
    /// outcome on an idle link.
    pub async fn try_receive_line(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Option<Vec<u8>>, IoError> {
        let mut guard = self.inbound.lock().await;
        if let Some(err) = self.lost() {
            guard.take();
            return Err(err);
        }
        let inbound = guard.as_mut().ok_or(IoError::NotConnected)?;

        if let Some(line) = inbound.lines.next_line() {
            log_inbound(&line);
            return Ok(Some(line));
        }

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let read = tokio::time::timeout_at(deadline, inbound.reader.read_chunk(&mut buf)).await;
            let n = match read {
                Err(_) | Ok(Err(IoError::Timeout)) => return Ok(None),
                Ok(Ok(0)) => {
                    let err = IoError::DeviceLost("device closed the stream".into());
                    self.mark_lost(&mut guard, &err).await;
                    return Err(err);
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    if e.is_fatal() {
                        self.mark_lost(&mut guard, &e).await;
                    }
                    return Err(e);
                }
            };

            inbound.lines.push(&buf[..n]);
            if let Some(line) = inbound.lines.next_line() {
                log_inbound(&line);
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// Release the device. Safe to call when nothing is open.
    pub async fn close(&self) {
        let mut current = self.current.lock().await;
        if let Some(connection) = current.take() {
            self.release().await;
            info!("Closed {}", connection.endpoint.name);
        }
    }

    /// Current connection, if any
    pub async fn connection(&self) -> Option<ConnectionInfo> {
        self.current.lock().await.clone()
    }

    /// Open and not lost
    pub async fn is_connected(&self) -> bool {
        self.current.lock().await.is_some() && self.lost().is_none()
    }

    /// The fatal error that took the current connection down
    pub fn lost(&self) -> Option<IoError> {
        self.lost_slot().clone()
    }

    async fn install(&self, handles: PortHandles) {
        *self.inbound.lock().await = Some(Inbound {
            reader: handles.reader,
            lines: LineBuffer::new(),
        });
        *self.outbound.lock().await = Some(handles.writer);
        self.lost_slot().take();
    }

    async fn release(&self) {
        self.inbound.lock().await.take();
        self.outbound.lock().await.take();
        self.lost_slot().take();
    }

    /// Drop both halves after a fatal read; the caller holds the inbound lock
    async fn mark_lost(&self, inbound: &mut Option<Inbound>, err: &IoError) {
        error!("Link failed, dropping device handles: {}", err);
        self.set_lost(err.clone());
        inbound.take();
        self.outbound.lock().await.take();
    }

    fn set_lost(&self, err: IoError) {
        *self.lost_slot() = Some(err);
    }

    fn lost_slot(&self) -> MutexGuard<'_, Option<IoError>> {
        self.lost.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn write_all(writer: &mut dyn LinkWriter, data: &[u8]) -> std::result::Result<(), IoError> {
    let mut written = 0;
    while written < data.len() {
        let n = writer.write_chunk(&data[written..]).await?;
        if n == 0 {
            return Err(IoError::DeviceLost("device accepted no bytes".into()));
        }
        written += n;
    }
    writer.flush().await
}

fn log_inbound(line: &[u8]) {
    let json_preview = preview(&String::from_utf8_lossy(line));
    debug!("[Device→Host] len={} json={}", line.len(), json_preview);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryBackend;

    const WAIT: Duration = Duration::from_millis(20);

    fn manager(backend: &MemoryBackend) -> LinkManager {
        LinkManager::new(Arc::new(backend.clone()))
    }

    async fn connect(link: &LinkManager, name: &str) -> ConnectionInfo {
        link.open(Endpoint::new(name, BaudRate::B9600), Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enumerate_delegates() {
        let backend = MemoryBackend::with_ports(["COM11", "COM12"]);
        assert_eq!(manager(&backend).enumerate(), vec!["COM11", "COM12"]);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let backend = MemoryBackend::new();
        let link = manager(&backend);
        assert_eq!(link.send(b"{}\n").await, Err(IoError::NotConnected));
        assert_eq!(link.try_receive_line(WAIT).await, Err(IoError::NotConnected));
    }

    #[tokio::test]
    async fn test_send_retries_partial_writes() {
        let backend = MemoryBackend::new();
        backend.set_write_limit(3);
        let link = manager(&backend);
        connect(&link, "COM3").await;

        link.send(b"{\"command\":\"RESET\"}\n").await.unwrap();
        assert_eq!(backend.written(), b"{\"command\":\"RESET\"}\n");
    }

    #[tokio::test]
    async fn test_receive_returns_none_when_idle() {
        let backend = MemoryBackend::new();
        let link = manager(&backend);
        connect(&link, "COM3").await;

        assert_eq!(link.try_receive_line(WAIT).await, Ok(None));
    }

    #[tokio::test]
    async fn test_receive_assembles_split_lines() {
        let backend = MemoryBackend::new();
        let link = manager(&backend);
        connect(&link, "COM3").await;

        backend.push_bytes(b"{\"type\":\"game_status\",");
        backend.push_bytes(b"\"message\":\"Game reset.\"}\n{\"message\":\"next\"}\n");

        let first = link.try_receive_line(WAIT).await.unwrap().unwrap();
        assert_eq!(first, br#"{"type":"game_status","message":"Game reset."}"#);
        let second = link.try_receive_line(WAIT).await.unwrap().unwrap();
        assert_eq!(second, br#"{"message":"next"}"#);
        assert_eq!(link.try_receive_line(WAIT).await, Ok(None));
    }

    #[tokio::test]
    async fn test_open_replaces_previous_connection() {
        let backend = MemoryBackend::with_ports(["COM3", "COM4"]);
        let link = manager(&backend);
        let first = connect(&link, "COM3").await;
        let second = connect(&link, "COM4").await;

        assert_ne!(first.id, second.id);
        assert_eq!(link.connection().await.unwrap().endpoint.name, "COM4");
        assert_eq!(backend.opened().len(), 2);
    }

    #[tokio::test]
    async fn test_set_rate_keeps_identity() {
        let backend = MemoryBackend::new();
        let link = manager(&backend);

        assert!(matches!(
            link.set_rate(BaudRate::B115200).await,
            Err(ttt_link_core::LinkError::Io(IoError::NotConnected))
        ));

        let before = connect(&link, "COM3").await;
        let after = link.set_rate(BaudRate::B115200).await.unwrap();
        assert_eq!(before.id, after.id);
        assert_eq!(after.endpoint.rate, BaudRate::B115200);
        assert_eq!(backend.opened().last().unwrap().rate, BaudRate::B115200);
    }

    #[tokio::test]
    async fn test_permission_denied_open() {
        let backend = MemoryBackend::new();
        backend.fail_next_open(OpenError::PermissionDenied {
            endpoint: "COM3".into(),
            reason: "Access is denied.".into(),
        });
        let link = manager(&backend);

        let err = link
            .open(Endpoint::new("COM3", BaudRate::B9600), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!link.is_connected().await);
    }

    #[tokio::test]
    async fn test_fatal_read_drops_both_halves() {
        let backend = MemoryBackend::new();
        let link = manager(&backend);
        connect(&link, "COM3").await;

        backend.push_error(IoError::PermissionDenied("revoked".into()));
        assert!(matches!(
            link.try_receive_line(WAIT).await,
            Err(IoError::PermissionDenied(_))
        ));
        assert!(!link.is_connected().await);
        assert_eq!(backend.live_handles(), 0);

        let revoked = IoError::PermissionDenied("revoked".into());
        assert_eq!(link.lost(), Some(revoked.clone()));
        assert_eq!(link.try_receive_line(WAIT).await, Err(revoked.clone()));
        assert_eq!(link.send(b"{}\n").await, Err(revoked));
        assert_eq!(link.connection().await.unwrap().endpoint.name, "COM3");
    }

    #[tokio::test]
    async fn test_fatal_write_drops_both_halves() {
        let backend = MemoryBackend::new();
        let link = manager(&backend);
        connect(&link, "COM3").await;
        assert_eq!(backend.live_handles(), 2);

        let unplugged = IoError::DeviceLost("unplugged".into());
        backend.fail_next_write(unplugged.clone());
        assert_eq!(link.send(b"{}\n").await, Err(unplugged.clone()));
        assert_eq!(backend.live_handles(), 0);

        let reads = backend.read_calls();
        assert_eq!(link.try_receive_line(WAIT).await, Err(unplugged));
        assert_eq!(backend.read_calls(), reads);

        connect(&link, "COM3").await;
        assert!(link.is_connected().await);
        assert_eq!(link.lost(), None);
        link.send(b"{}\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_timeout_is_not_fatal() {
        let backend = MemoryBackend::new();
        let link = manager(&backend);
        connect(&link, "COM3").await;

        backend.fail_next_write(IoError::Timeout);
        assert_eq!(link.send(b"{}\n").await, Err(IoError::Timeout));
        assert!(link.is_connected().await);
        assert_eq!(backend.live_handles(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = MemoryBackend::new();
        let link = manager(&backend);
        link.close().await;
        connect(&link, "COM3").await;
        link.close().await;
        link.close().await;
        assert!(link.connection().await.is_none());
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(link.send(b"{}\n").await, Err(IoError::NotConnected));
    }
}
