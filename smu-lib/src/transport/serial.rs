use serialport::SerialPort;
use tracing::info;

use super::LineTransport;
use crate::config::LinkConfig;
use crate::error::Result;

/// Open a serial port (USB-CDC or UART) as a blocking line transport.
///
/// The port is opened by path; locating the instrument is up to the caller.
pub fn open_serial(path: &str, config: &LinkConfig) -> Result<LineTransport<Box<dyn SerialPort>>> {
    info!(path, baud = config.baud_rate, "Opening serial port");
    let port = serialport::new(path, config.baud_rate)
        .timeout(config.read_timeout())
        .open()?;
    info!("Serial port open");
    Ok(LineTransport::with_config(port, config))
}
