//! Line transports: a blocking one for serial ports and any `Read + Write`
//! stream, and an event-driven one for notification-based channels such as
//! the BLE UART bridge.

pub mod blocking;
pub mod event;
pub mod serial;

use std::future::Future;
use strum_macros::Display;

use crate::error::Result;

pub use blocking::{ByteStream, LineTransport};
pub use event::{EventConnection, PacketWriter, ReceiveHandle, StreamWriter, spawn_reader};
pub use serial::open_serial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// A line-oriented connection to the instrument.
///
/// `send_line` takes a fully formatted line, terminator included.
/// `read_line` returns the next reply without its terminator.
pub trait Link: Send {
    fn is_connected(&self) -> bool;

    fn send_line(&mut self, line: &str) -> impl Future<Output = Result<()>> + Send;

    fn read_line(&mut self) -> impl Future<Output = Result<String>> + Send;
}
