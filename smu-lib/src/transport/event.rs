//! Event-driven line transport.
//!
//! Inbound data is pushed in by a transport callback (a BLE notification
//! handler, or [`spawn_reader`] for plain async streams) through a
//! [`ReceiveHandle`], which reassembles lines and posts them onto a queue
//! consumed by [`EventConnection::read_line`]. Outbound lines go through a
//! single writer task, so the chunks of one line are all written before the
//! next line starts.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{ConnectionState, Link};
use crate::config::LinkConfig;
use crate::error::{Result, SmuError};
use crate::line::{self, LineBuffer};

const READ_CHUNK_SIZE: usize = 256;

/// The outbound half of a packet-oriented channel.
pub trait PacketWriter: Send + 'static {
    /// Largest packet the channel accepts in one write, if limited.
    fn max_write_size(&self) -> Option<usize>;

    fn write_packet(&mut self, packet: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// Adapts any `AsyncWrite` into a [`PacketWriter`] with an optional size cap.
pub struct StreamWriter<W> {
    inner: W,
    max_write: Option<usize>,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W, max_write: Option<usize>) -> Self {
        Self { inner, max_write }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> PacketWriter for StreamWriter<W> {
    fn max_write_size(&self) -> Option<usize> {
        self.max_write
    }

    async fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        self.inner.write_all(packet).await?;
        self.inner.flush().await
    }
}

struct SendRequest {
    payload: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

/// Resolves once the connection has left the `Open` state.
async fn wait_closed(mut state: watch::Receiver<ConnectionState>) {
    loop {
        let open = *state.borrow_and_update() == ConnectionState::Open;
        if !open || state.changed().await.is_err() {
            return;
        }
    }
}

/// The consumer side of an event-driven connection.
pub struct EventConnection {
    requests: mpsc::Sender<SendRequest>,
    lines: mpsc::UnboundedReceiver<Result<String>>,
    state: Arc<watch::Sender<ConnectionState>>,
    writer: Option<JoinHandle<()>>,
    response_timeout: Duration,
    overdue: bool,
}

impl EventConnection {
    /// Start the writer task and return the connection together with the
    /// handle the transport's receive callback must feed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<W: PacketWriter>(writer: W, config: &LinkConfig) -> (Self, ReceiveHandle) {
        let (state_tx, _) = watch::channel(ConnectionState::Open);
        let state = Arc::new(state_tx);
        let (requests, request_rx) = mpsc::channel(config.send_queue_depth.max(1));
        let (line_tx, lines) = mpsc::unbounded_channel();

        let max_write = match (writer.max_write_size(), config.max_write_size) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let task = tokio::spawn(run_writer(writer, max_write, request_rx, state.subscribe()));
        info!(?max_write, "Event-driven connection open");

        let connection = Self {
            requests,
            lines,
            state: Arc::clone(&state),
            writer: Some(task),
            response_timeout: config.response_timeout(),
            overdue: false,
        };
        let handle = ReceiveHandle {
            buffer: LineBuffer::with_max_len(config.max_line_len),
            lines: line_tx,
            state,
        };
        (connection, handle)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Close the connection: pending sends and reads resolve with
    /// [`SmuError::ConnectionClosed`] and the writer task is joined.
    pub async fn close(&mut self) {
        let Some(task) = self.writer.take() else {
            return;
        };
        self.state.send_replace(ConnectionState::Closing);
        if let Err(err) = task.await {
            warn!("Writer task ended abnormally: {}", err);
        }
        self.state.send_replace(ConnectionState::Closed);
        info!("Connection closed");
    }

    /// Drop lines queued since a read timed out: they answer the query that
    /// gave up, not the one about to be sent.
    fn drop_late_replies(&mut self) {
        self.overdue = false;
        let mut dropped = 0;
        while self.lines.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(lines = dropped, "Dropping late reply");
        }
    }
}

impl Drop for EventConnection {
    fn drop(&mut self) {
        self.state.send_replace(ConnectionState::Closed);
    }
}

impl Link for EventConnection {
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(SmuError::ConnectionClosed);
        }
        if self.overdue {
            self.drop_late_replies();
        }
        let (done, ack) = oneshot::channel();
        let request = SendRequest {
            payload: line.as_bytes().to_vec(),
            done,
        };
        tokio::select! {
            biased;
            () = wait_closed(self.state.subscribe()) => return Err(SmuError::ConnectionClosed),
            sent = self.requests.send(request) => sent.map_err(|_| SmuError::ConnectionClosed)?,
        }
        ack.await.map_err(|_| SmuError::ConnectionClosed)?
    }

    /// Wait for the next line, bounded by the response timeout.
    ///
    /// Lines already queued are delivered even after the connection closed.
    /// After a timeout, lines that arrive before the next send are dropped.
    async fn read_line(&mut self) -> Result<String> {
        let response_timeout = self.response_timeout;
        let closed = wait_closed(self.state.subscribe());
        let lines = &mut self.lines;
        let next = async move {
            tokio::select! {
                biased;
                line = lines.recv() => line.unwrap_or(Err(SmuError::ConnectionClosed)),
                () = closed => Err(SmuError::ConnectionClosed),
            }
        };
        match tokio::time::timeout(response_timeout, next).await {
            Ok(line) => line,
            Err(elapsed) => {
                self.overdue = true;
                Err(elapsed.into())
            }
        }
    }
}

async fn run_writer<W: PacketWriter>(
    mut writer: W,
    max_write: Option<usize>,
    mut requests: mpsc::Receiver<SendRequest>,
    state: watch::Receiver<ConnectionState>,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = wait_closed(state.clone()) => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let result = write_chunked(&mut writer, max_write, &request.payload, &state).await;
        if let Err(err) = &result {
            warn!("Send failed: {}", err);
        }
        let _ = request.done.send(result);
    }

    requests.close();
    while let Ok(request) = requests.try_recv() {
        let _ = request.done.send(Err(SmuError::ConnectionClosed));
    }
    debug!("Writer task finished");
}

async fn write_chunked<W: PacketWriter>(
    writer: &mut W,
    max_write: Option<usize>,
    payload: &[u8],
    state: &watch::Receiver<ConnectionState>,
) -> Result<()> {
    debug!(bytes = hex::encode(payload), "Packet Write");
    for chunk in line::chunks(payload, max_write) {
        let open = *state.borrow() == ConnectionState::Open;
        if !open {
            return Err(SmuError::ConnectionClosed);
        }
        trace!(len = chunk.len(), "write chunk");
        writer.write_packet(chunk).await?;
    }
    Ok(())
}

/// The receive side of an event-driven connection.
///
/// Owns the line buffer; only the transport's receive callback touches it.
pub struct ReceiveHandle {
    buffer: LineBuffer,
    lines: mpsc::UnboundedSender<Result<String>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ReceiveHandle {
    /// Feed one received chunk. Every completed line is posted to the
    /// connection; a frame that overflows the buffer is posted as an error.
    pub fn on_receive(&mut self, chunk: &[u8]) {
        if !self.is_open() {
            self.discard();
            return;
        }
        debug!(bytes = hex::encode(chunk), "Notify");
        self.buffer.extend(chunk);
        loop {
            let next = match self.buffer.next_line() {
                Ok(Some(line)) => Ok(line),
                Ok(None) => break,
                Err(err) => {
                    warn!("Dropping oversized frame: {}", err);
                    Err(err)
                }
            };
            if self.lines.send(next).is_err() {
                break;
            }
        }
    }

    /// Called by the transport when the peer went away.
    pub fn on_disconnect(&mut self) {
        self.discard();
        if self.state.send_replace(ConnectionState::Closed) == ConnectionState::Open {
            info!("Transport reported disconnect");
        }
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow() == ConnectionState::Open
    }

    fn discard(&mut self) {
        let dropped = self.buffer.clear();
        if dropped > 0 {
            warn!(bytes = dropped, "Discarding partial line at close");
        }
    }
}

/// Pump an async byte stream into `handle` until EOF, error or close.
pub fn spawn_reader<R>(mut reader: R, mut handle: ReceiveHandle) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = tokio::select! {
                () = wait_closed(handle.state.subscribe()) => {
                    handle.discard();
                    return;
                }
                read = reader.read(&mut chunk) => read,
            };
            match read {
                Ok(0) => break,
                Ok(n) => handle.on_receive(&chunk[..n]),
                Err(err) => {
                    warn!("Read failed: {}", err);
                    break;
                }
            }
        }
        handle.on_disconnect();
    })
}
