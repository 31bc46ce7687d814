//! Device-side plumbing for the tic-tac-toe serial link
//!
//! This crate provides:
//! - Wire protocol for commands and events (JSON lines)
//! - Line framing over the raw byte stream
//! - Transport abstractions (LinkBackend, LinkReader/LinkWriter traits)
//! - Serial port backend and an in-memory backend
//! - `LinkManager`, the owner of the single open connection

pub mod framing;
pub mod link;
pub mod mock;
pub mod protocol;
pub mod serial;
pub mod transport;

pub use framing::LineBuffer;
pub use link::{ConnectionInfo, LinkManager};
pub use mock::MemoryBackend;
pub use protocol::{decode, decode_lossy, encode};
pub use serial::SerialBackend;
pub use transport::{LinkBackend, LinkReader, LinkWriter, PortHandles};
