use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::line::DEFAULT_MAX_LINE;

/// Settings shared by the serial and event-driven links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial baud rate. USB-CDC ignores it, UART bridges do not.
    pub baud_rate: u32,
    /// Timeout of a single blocking read on the serial port.
    pub read_timeout_ms: u64,
    /// How long a query waits for its reply line on the event-driven link.
    pub response_timeout_ms: u64,
    /// Longest line accepted before the receive buffer is reset.
    pub max_line_len: usize,
    /// Largest single write the channel accepts (BLE write-without-response).
    pub max_write_size: Option<usize>,
    /// Number of outbound lines that may wait for the writer task.
    pub send_queue_depth: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout_ms: 1_000,
            response_timeout_ms: 2_000,
            max_line_len: DEFAULT_MAX_LINE,
            max_write_size: None,
            send_queue_depth: 16,
        }
    }
}

impl LinkConfig {
    /// Settings for the Microchip BLE UART bridge, whose RX characteristic
    /// takes at most 20 bytes per write at the default MTU.
    pub fn ble_uart() -> Self {
        Self {
            max_write_size: Some(20),
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
