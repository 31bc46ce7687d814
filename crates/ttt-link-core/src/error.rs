//! Error types for the serial link

use thiserror::Error;

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Failure to open a device
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpenError {
    /// No device by that name, or the name is not a valid port
    #[error("Port {endpoint} not found: {reason}")]
    NotFound { endpoint: String, reason: String },

    /// Device exists but is held by another process or otherwise unavailable
    #[error("Port {endpoint} is busy: {reason}")]
    DeviceBusy { endpoint: String, reason: String },

    /// Access to the device was refused
    #[error("Access denied to port {endpoint}: {reason}")]
    PermissionDenied { endpoint: String, reason: String },
}

impl OpenError {
    /// Fatal open failures must not be retried without user action
    pub fn is_fatal(&self) -> bool {
        matches!(self, OpenError::PermissionDenied { .. })
    }

    /// Name of the endpoint that failed to open
    pub fn endpoint(&self) -> &str {
        match self {
            OpenError::NotFound { endpoint, .. }
            | OpenError::DeviceBusy { endpoint, .. }
            | OpenError::PermissionDenied { endpoint, .. } => endpoint,
        }
    }
}

/// I/O failure on an open link
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IoError {
    /// The device did not accept or deliver bytes in time
    #[error("I/O timed out")]
    Timeout,

    /// The device disappeared or the handle became unusable
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// The operating system revoked access to the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No connection is open
    #[error("Port not opened")]
    NotConnected,
}

impl IoError {
    /// Fatal I/O failures latch the poller until an explicit reconnect
    pub fn is_fatal(&self) -> bool {
        matches!(self, IoError::DeviceLost(_) | IoError::PermissionDenied(_))
    }

    /// Classify a platform I/O error
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::PermissionDenied => IoError::PermissionDenied(err.to_string()),
            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => IoError::Timeout,
            _ => IoError::DeviceLost(err.to_string()),
        }
    }
}

/// Failure to turn an inbound frame into an event
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame is not valid UTF-8")]
    NotUtf8,

    #[error("Invalid JSON received: {0}")]
    MalformedSyntax(String),

    #[error("Unknown message kind: {0}")]
    UnknownDiscriminator(String),

    #[error("Malformed board: {0}")]
    ShapeViolation(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::MalformedSyntax(err.to_string())
    }
}

/// Out-of-range argument when building an outbound command
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Grid index out of range: {0} (expected 0-2)")]
    GridIndex(u8),

    #[error("Unknown game mode: {0} (expected 0-2)")]
    GameMode(u8),

    #[error("Unsupported baud rate: {0}")]
    BaudRate(u32),

    #[error("Baud rate is not a number: {0:?}")]
    BaudRateText(String),
}

/// Any link error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl LinkError {
    /// Whether this error latches the link into its fatal state
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Open(e) => e.is_fatal(),
            LinkError::Io(e) => e.is_fatal(),
            LinkError::Decode(_) | LinkError::Command(_) => false,
        }
    }
}
