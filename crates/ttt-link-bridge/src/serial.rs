//! Serial port backend
//!
//! Used for real hardware: the tic-tac-toe board enumerates as a USB serial
//! device (`COMx` on Windows, `/dev/ttyACMx` or `/dev/ttyUSBx` elsewhere).

use crate::transport::{LinkBackend, PortHandles, StreamReader, StreamWriter};
use async_trait::async_trait;
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};
use ttt_link_core::{Endpoint, OpenError};

/// Backend over the operating system's serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl SerialBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LinkBackend for SerialBackend {
    fn enumerate(&self) -> Vec<String> {
        match tokio_serial::available_ports() {
            Ok(ports) => {
                let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
                debug!("Found {} serial ports", names.len());
                names
            }
            Err(e) => {
                warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }

    async fn open(&self, endpoint: &Endpoint, timeout: Duration) -> Result<PortHandles, OpenError> {
        let stream: SerialStream = tokio_serial::new(endpoint.name.as_str(), endpoint.rate.as_u32())
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| classify_open_error(&endpoint.name, e))?;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(PortHandles::new(
            StreamReader(read_half),
            StreamWriter(write_half),
        ))
    }
}

/// Sort a platform open failure into the recoverable and fatal kinds
fn classify_open_error(name: &str, err: tokio_serial::Error) -> OpenError {
    use std::io::ErrorKind as Io;
    use tokio_serial::ErrorKind;

    let endpoint = name.to_string();
    let reason = err.to_string();
    match err.kind() {
        ErrorKind::Io(Io::PermissionDenied) => OpenError::PermissionDenied { endpoint, reason },
        ErrorKind::Io(Io::NotFound) | ErrorKind::InvalidInput => {
            OpenError::NotFound { endpoint, reason }
        }
        _ => OpenError::DeviceBusy { endpoint, reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind as Io;
    use tokio_serial::ErrorKind;

    #[test]
    fn test_classify_open_error() {
        let denied = classify_open_error(
            "COM11",
            tokio_serial::Error::new(ErrorKind::Io(Io::PermissionDenied), "Access is denied."),
        );
        assert!(denied.is_fatal());
        assert_eq!(denied.endpoint(), "COM11");

        let missing = classify_open_error(
            "/dev/ttyACM9",
            tokio_serial::Error::new(ErrorKind::Io(Io::NotFound), "No such file or directory"),
        );
        assert!(matches!(missing, OpenError::NotFound { .. }));

        let busy = classify_open_error(
            "/dev/ttyACM0",
            tokio_serial::Error::new(ErrorKind::NoDevice, "Device or resource busy"),
        );
        assert!(matches!(busy, OpenError::DeviceBusy { .. }));
    }

    #[tokio::test]
    async fn test_open_missing_port_is_recoverable() {
        let endpoint = Endpoint::new("/dev/ttt-link-does-not-exist", Default::default());
        let err = SerialBackend::new()
            .open(&endpoint, Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(!err.is_fatal());
    }
}
