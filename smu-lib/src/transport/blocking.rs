use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, trace, warn};

use super::{ConnectionState, Link};
use crate::config::LinkConfig;
use crate::error::{Result, SmuError};
use crate::line::{self, LineBuffer};

const READ_CHUNK_SIZE: usize = 256;

/// A byte stream the blocking transport can drive.
pub trait ByteStream: Read + Write {
    /// Largest single write the channel accepts, if it has a limit.
    fn max_write_size(&self) -> Option<usize> {
        None
    }

    /// Drop input the channel has received but not yet handed out.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        (**self).clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Blocking line transport: one command in flight, the caller serialises
/// access and the receive buffer is only touched by the reading thread.
///
/// After a read timed out, the reply it was waiting for may still arrive.
/// Whatever is received by the time the next line is sent is dropped, so it
/// cannot be taken for the answer to that line.
pub struct LineTransport<C> {
    channel: Option<C>,
    buffer: LineBuffer,
    pending: VecDeque<Result<String>>,
    max_write: Option<usize>,
    state: ConnectionState,
    overdue: bool,
}

impl<C: ByteStream> LineTransport<C> {
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, &LinkConfig::default())
    }

    pub fn with_config(channel: C, config: &LinkConfig) -> Self {
        let max_write = match (channel.max_write_size(), config.max_write_size) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            channel: Some(channel),
            buffer: LineBuffer::with_max_len(config.max_line_len),
            pending: VecDeque::new(),
            max_write,
            state: ConnectionState::Open,
            overdue: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn max_write_size(&self) -> Option<usize> {
        self.max_write
    }

    /// Write `line` as consecutive chunks of at most the maximum write size.
    pub fn send(&mut self, line: &str) -> Result<()> {
        if self.overdue {
            self.drop_late_replies()?;
        }
        let max_write = self.max_write;
        let channel = self.open_channel()?;
        let payload = line.as_bytes();
        debug!(bytes = hex::encode(payload), "Serial Write");

        let result = line::chunks(payload, max_write).try_for_each(|chunk| {
            trace!(len = chunk.len(), "write chunk");
            channel.write_all(chunk)
        });
        match result.and_then(|()| channel.flush()) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Block until a complete line has been received.
    ///
    /// A read timeout surfaces as [`SmuError::Io`] with
    /// [`ErrorKind::TimedOut`] and leaves the connection open.
    pub fn receive_line(&mut self) -> Result<String> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return line;
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let result = self.open_channel()?.read(&mut chunk);
            let read = match result {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    self.overdue = true;
                    return Err(SmuError::Io(err));
                }
                Err(err) => return Err(self.fail(err)),
            };

            if read == 0 {
                self.disconnected();
                return Err(SmuError::ConnectionClosed);
            }

            debug!(bytes = hex::encode(&chunk[..read]), "Serial Read");
            self.buffer.extend(&chunk[..read]);
            loop {
                match self.buffer.next_line() {
                    Ok(Some(line)) => self.pending.push_back(Ok(line)),
                    Ok(None) => break,
                    Err(err) => {
                        warn!("Dropping oversized frame: {}", err);
                        self.pending.push_back(Err(err));
                    }
                }
            }
        }
    }

    /// Close the connection and hand back the channel.
    ///
    /// Any partial line still buffered is discarded.
    pub fn close(&mut self) -> Option<C> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closing;
        self.discard_buffers();
        self.state = ConnectionState::Closed;
        info!("Connection closed");
        self.channel.take()
    }

    fn drop_late_replies(&mut self) -> Result<()> {
        self.overdue = false;
        let lines = self.pending.len();
        let bytes = self.buffer.clear();
        self.pending.clear();
        if lines > 0 || bytes > 0 {
            warn!(lines, bytes, "Dropping late reply");
        }
        let result = self.open_channel()?.discard_input();
        result.map_err(|err| self.fail(err))
    }

    fn open_channel(&mut self) -> Result<&mut C> {
        match (self.state, self.channel.as_mut()) {
            (ConnectionState::Open, Some(channel)) => Ok(channel),
            _ => Err(SmuError::NotConnected),
        }
    }

    fn fail(&mut self, err: std::io::Error) -> SmuError {
        if matches!(
            err.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::UnexpectedEof
        ) {
            warn!("Channel failed: {}", err);
            self.disconnected();
        }
        SmuError::Io(err)
    }

    fn disconnected(&mut self) {
        self.discard_buffers();
        self.state = ConnectionState::Closed;
        self.channel = None;
        info!("Channel disconnected");
    }

    fn discard_buffers(&mut self) {
        let dropped = self.buffer.clear();
        if dropped > 0 {
            warn!(bytes = dropped, "Discarding partial line at close");
        }
        self.pending.clear();
    }
}

impl<C: ByteStream + Send> Link for LineTransport<C> {
    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.send(line)
    }

    async fn read_line(&mut self) -> Result<String> {
        self.receive_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::sync::{Arc, Mutex};

    /// Replays canned input and records every write call separately.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        writes: Vec<Vec<u8>>,
        limit: Option<usize>,
    }

    impl Scripted {
        fn new(input: &[u8], limit: Option<usize>) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                writes: Vec::new(),
                limit,
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // one byte at a time, like a slow UART
            let n = buf.len().min(1);
            self.input.read(&mut buf[..n])
        }
    }

    /// A port whose input is fed from the test; reading an empty port
    /// times out the way a serial port with a read timeout does.
    #[derive(Clone, Default)]
    struct Port {
        input: Arc<Mutex<Vec<u8>>>,
    }

    impl Port {
        fn feed(&self, bytes: &[u8]) {
            self.input.lock().unwrap().extend_from_slice(bytes);
        }
    }

    impl Read for Port {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut input = self.input.lock().unwrap();
            if input.is_empty() {
                return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(input.len());
            buf[..n].copy_from_slice(&input[..n]);
            input.drain(..n);
            Ok(n)
        }
    }

    impl Write for Port {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for Port {
        fn discard_input(&mut self) -> io::Result<()> {
            self.input.lock().unwrap().clear();
            Ok(())
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for Scripted {
        fn max_write_size(&self) -> Option<usize> {
            self.limit
        }
    }

    #[test]
    fn send_chunks_to_channel_limit() {
        let mut transport = LineTransport::new(Scripted::new(b"", Some(20)));
        let line = format!("{}\r", "A".repeat(36));
        transport.send(&line).unwrap();

        let channel = transport.close().unwrap();
        let sizes: Vec<usize> = channel.writes.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 17]);
        assert_eq!(channel.writes.concat(), line.as_bytes());
    }

    #[test]
    fn config_limit_applies_when_channel_has_none() {
        let config = LinkConfig {
            max_write_size: Some(4),
            ..LinkConfig::default()
        };
        let transport = LineTransport::with_config(Scripted::new(b"", None), &config);
        assert_eq!(transport.max_write_size(), Some(4));
    }

    #[test]
    fn receive_reassembles_byte_by_byte() {
        let mut transport = LineTransport::new(Scripted::new(b"1\r\n8032,7FCE\r", None));
        assert_eq!(transport.receive_line().unwrap(), "1");
        assert_eq!(transport.receive_line().unwrap(), "8032,7FCE");
    }

    #[test]
    fn eof_closes_and_drops_partial_line() {
        let mut transport = LineTransport::new(Scripted::new(b"AB", None));
        assert!(matches!(
            transport.receive_line(),
            Err(SmuError::ConnectionClosed)
        ));
        assert_eq!(transport.state(), ConnectionState::Closed);
        assert!(matches!(transport.send("X\r"), Err(SmuError::NotConnected)));
    }

    #[test]
    fn close_is_idempotent() {
        let mut transport = LineTransport::new(Scripted::new(b"", None));
        assert!(transport.close().is_some());
        assert!(transport.close().is_none());
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[test]
    fn lines_before_an_oversized_frame_come_first() {
        let config = LinkConfig {
            max_line_len: 8,
            ..LinkConfig::default()
        };
        let port = Port::default();
        port.feed(b"1\r\n0123456789AB\r\n2\r\n");
        let mut transport = LineTransport::with_config(port, &config);

        assert_eq!(transport.receive_line().unwrap(), "1");
        assert!(matches!(
            transport.receive_line(),
            Err(SmuError::FrameTooLong { len: 12, max: 8 })
        ));
        assert_eq!(transport.receive_line().unwrap(), "2");
    }

    #[test]
    fn late_reply_is_dropped_before_next_send() {
        let port = Port::default();
        let mut transport = LineTransport::new(port.clone());

        transport.send("UI:SW1?\r").unwrap();
        let err = transport.receive_line().unwrap_err();
        assert!(matches!(err, SmuError::Io(ref e) if e.kind() == ErrorKind::TimedOut));
        assert_eq!(transport.state(), ConnectionState::Open);

        port.feed(b"1\r\n");
        transport.send("DAC10:DAC1?\r").unwrap();
        port.feed(b"3FF\r\n");
        assert_eq!(transport.receive_line().unwrap(), "3FF");
    }

    #[test]
    fn replies_are_kept_when_nothing_timed_out() {
        let port = Port::default();
        port.feed(b"1\r\n0\r\n");
        let mut transport = LineTransport::new(port);

        transport.send("UI:LED1?\r").unwrap();
        assert_eq!(transport.receive_line().unwrap(), "1");
        transport.send("UI:LED2?\r").unwrap();
        assert_eq!(transport.receive_line().unwrap(), "0");
    }
}
