//! # ttt-link-core
//!
//! Core types shared by every layer of the tic-tac-toe serial link:
//! - Endpoints and transfer rates
//! - Outbound commands with range-checked construction
//! - Inbound events and the 3x3 board
//! - The error taxonomy

pub mod command;
pub mod endpoint;
pub mod error;
pub mod event;

pub use command::{GameMode, GridIndex, OutboundCommand};
pub use endpoint::{BaudRate, Endpoint};
pub use error::{CommandError, DecodeError, IoError, LinkError, OpenError, Result};
pub use event::{BoardView, Cell, InboundEvent};
