//! Common test utilities: in-memory channels standing in for the serial
//! port and the BLE bridge.

// Shared across several test files, not every helper is used in each one
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

#[allow(unused_imports)]
pub use smu_lib::channel::{Channel, Dac10Output, Dac16Output, Led, Port, Sampling};
#[allow(unused_imports)]
pub use smu_lib::transport::{ByteStream, EventConnection, LineTransport, PacketWriter, ReceiveHandle};
#[allow(unused_imports)]
pub use smu_lib::{Command, LinkConfig, Outcome, Skip, Smu, SmuError};

/// Every write call made on a mock channel, in order.
#[derive(Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl WriteLog {
    pub fn record(&self, bytes: &[u8]) {
        self.0.lock().unwrap().push(bytes.to_vec());
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.0.lock().unwrap().iter().map(Vec::len).collect()
    }

    /// Everything written so far, as text.
    pub fn text(&self) -> String {
        String::from_utf8(self.writes().concat()).unwrap()
    }

    /// Written lines, terminators stripped.
    pub fn lines(&self) -> Vec<String> {
        self.text()
            .split_terminator('\r')
            .map(str::to_string)
            .collect()
    }
}

/// A scripted serial channel: replays canned replies and logs writes.
///
/// Reads return at most `read_size` bytes; once the script is exhausted
/// reads return 0, which the transport treats as a disconnect.
pub struct ScriptedStream {
    input: VecDeque<u8>,
    read_size: usize,
    max_write: Option<usize>,
    log: WriteLog,
}

impl ScriptedStream {
    /// Replies are sent back `\r\n` terminated, as the firmware does.
    pub fn new(replies: &[&str]) -> (Self, WriteLog) {
        let input = replies
            .iter()
            .flat_map(|reply| format!("{reply}\r\n").into_bytes())
            .collect();
        let log = WriteLog::default();
        let stream = Self {
            input,
            read_size: 64,
            max_write: None,
            log: log.clone(),
        };
        (stream, log)
    }

    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size;
        self
    }

    pub fn with_max_write(mut self, max_write: usize) -> Self {
        self.max_write = Some(max_write);
        self
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.read_size).min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.record(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for ScriptedStream {
    fn max_write_size(&self) -> Option<usize> {
        self.max_write
    }
}

/// Build a facade over a scripted blocking link without the open handshake.
pub fn scripted_smu(replies: &[&str]) -> (Smu<LineTransport<ScriptedStream>>, WriteLog) {
    let (stream, log) = ScriptedStream::new(replies);
    (Smu::new(LineTransport::new(stream)), log)
}

/// Packet sink for the event-driven connection, e.g. a BLE characteristic.
pub struct RecordingWriter {
    max_write: Option<usize>,
    log: WriteLog,
}

impl RecordingWriter {
    pub fn new(max_write: Option<usize>) -> (Self, WriteLog) {
        let log = WriteLog::default();
        (
            Self {
                max_write,
                log: log.clone(),
            },
            log,
        )
    }
}

impl PacketWriter for RecordingWriter {
    fn max_write_size(&self) -> Option<usize> {
        self.max_write
    }

    async fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        self.log.record(packet);
        Ok(())
    }
}

/// Install a test subscriber so `RUST_LOG=debug` shows the wire traffic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
