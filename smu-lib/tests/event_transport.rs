//! Event-driven connection: chunked writer task, notification reassembly
//! and close semantics

mod common;

use std::time::Duration;

use common::*;
use smu_lib::transport::{ConnectionState, Link, StreamWriter, spawn_reader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn config_with_timeout(ms: u64) -> LinkConfig {
    LinkConfig {
        response_timeout_ms: ms,
        ..LinkConfig::default()
    }
}

#[tokio::test]
async fn sends_are_chunked_to_packet_limit() {
    init_tracing();
    let (writer, log) = RecordingWriter::new(Some(20));
    let (mut conn, _handle) = EventConnection::open(writer, &LinkConfig::default());

    let line = format!("{}\r", "B".repeat(36));
    conn.send_line(&line).await.unwrap();

    assert_eq!(log.sizes(), [20, 17]);
    assert_eq!(log.text(), line);
}

#[tokio::test]
async fn config_limit_caps_writer_limit() {
    let (writer, log) = RecordingWriter::new(Some(20));
    let (mut conn, _handle) = EventConnection::open(writer, &LinkConfig {
        max_write_size: Some(8),
        ..LinkConfig::default()
    });

    conn.send_line("ADC24:BOTH?\r").await.unwrap();
    assert_eq!(log.sizes(), [8, 4]);
}

#[tokio::test]
async fn consecutive_sends_do_not_interleave() {
    let (writer, log) = RecordingWriter::new(Some(3));
    let (mut conn, _handle) = EventConnection::open(writer, &LinkConfig::default());

    conn.send_line("UI:LED1 1\r").await.unwrap();
    conn.send_line("UI:LED2 0\r").await.unwrap();
    assert_eq!(log.lines(), ["UI:LED1 1", "UI:LED2 0"]);
}

#[tokio::test]
async fn notifications_are_reassembled_into_lines() {
    let (writer, _log) = RecordingWriter::new(None);
    let (mut conn, mut handle) = EventConnection::open(writer, &LinkConfig::default());

    handle.on_receive(b"AB");
    handle.on_receive(b"CD\r");
    handle.on_receive(b"EF\r\n");

    assert_eq!(conn.read_line().await.unwrap(), "ABCD");
    assert_eq!(conn.read_line().await.unwrap(), "EF");
}

#[tokio::test]
async fn terminator_split_across_notifications() {
    let (writer, _log) = RecordingWriter::new(None);
    let (mut conn, mut handle) = EventConnection::open(writer, &LinkConfig::default());

    handle.on_receive(b"8032,7FCE\r");
    handle.on_receive(b"\n1\r\n");

    assert_eq!(conn.read_line().await.unwrap(), "8032,7FCE");
    assert_eq!(conn.read_line().await.unwrap(), "1");
}

#[tokio::test]
async fn oversized_frame_is_reported_and_its_tail_dropped() {
    let (writer, _log) = RecordingWriter::new(None);
    let config = LinkConfig {
        max_line_len: 8,
        ..LinkConfig::default()
    };
    let (mut conn, mut handle) = EventConnection::open(writer, &config);

    handle.on_receive(b"0123456789");
    handle.on_receive(b"42\r");
    handle.on_receive(b"\n7\r\n");

    assert!(matches!(
        conn.read_line().await,
        Err(SmuError::FrameTooLong { max: 8, .. })
    ));
    assert_eq!(conn.read_line().await.unwrap(), "7");
}

#[tokio::test]
async fn read_times_out_without_reply() {
    let (writer, _log) = RecordingWriter::new(None);
    let (mut conn, _handle) = EventConnection::open(writer, &config_with_timeout(50));

    assert!(matches!(conn.read_line().await, Err(SmuError::Timeout(_))));
    assert!(conn.is_connected());
}

#[tokio::test]
async fn disconnect_wakes_pending_read() {
    let (writer, _log) = RecordingWriter::new(None);
    let (mut conn, mut handle) = EventConnection::open(writer, &config_with_timeout(5_000));

    let notifier = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.on_receive(b"PARTIAL");
        handle.on_disconnect();
        handle
    });

    assert!(matches!(conn.read_line().await, Err(SmuError::ConnectionClosed)));
    assert_eq!(conn.state(), ConnectionState::Closed);

    let mut handle = notifier.await.unwrap();
    assert!(!handle.is_open());
    // late notifications are dropped
    handle.on_receive(b"1\r");
    assert!(matches!(conn.read_line().await, Err(SmuError::ConnectionClosed)));
}

#[tokio::test]
async fn lines_received_before_close_are_still_delivered() {
    let (writer, _log) = RecordingWriter::new(None);
    let (mut conn, mut handle) = EventConnection::open(writer, &LinkConfig::default());

    handle.on_receive(b"7FFF\r\n");
    handle.on_disconnect();

    assert_eq!(conn.read_line().await.unwrap(), "7FFF");
    assert!(matches!(conn.read_line().await, Err(SmuError::ConnectionClosed)));
}

#[tokio::test]
async fn close_rejects_further_sends() {
    let (writer, log) = RecordingWriter::new(None);
    let (mut conn, handle) = EventConnection::open(writer, &LinkConfig::default());

    conn.close().await;
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(!handle.is_open());
    assert!(matches!(
        conn.send_line("UI:LED1 1\r").await,
        Err(SmuError::ConnectionClosed)
    ));
    assert!(log.writes().is_empty());

    // closing twice is harmless
    conn.close().await;
}

#[tokio::test]
async fn facade_skips_on_disconnected_event_link() {
    let (writer, log) = RecordingWriter::new(Some(20));
    let (conn, mut handle) = EventConnection::open(writer, &LinkConfig::ble_uart());
    handle.on_disconnect();

    let mut smu = Smu::new(conn);
    assert_eq!(
        smu.set_led(Led::Led1, true).await.unwrap(),
        Outcome::Skipped(Skip::NotConnected)
    );
    assert!(log.writes().is_empty());
}

#[tokio::test]
async fn facade_over_stream_loopback() {
    init_tracing();
    let (host, mut device) = tokio::io::duplex(64);
    let (reader, writer) = tokio::io::split(host);

    let (conn, handle) = EventConnection::open(StreamWriter::new(writer, Some(5)), &LinkConfig::ble_uart());
    let reader_task = spawn_reader(reader, handle);

    let firmware = tokio::spawn(async move {
        let mut received = Vec::new();
        let mut byte = [0u8; 1];
        while !received.ends_with(b"ADC24:BOTH?\r") {
            device.read_exact(&mut byte).await.unwrap();
            received.push(byte[0]);
        }
        // answer in two notifications, split inside the terminator
        device.write_all(b"0001,0000,FFFF,FFFF\r").await.unwrap();
        device.write_all(b"\n").await.unwrap();
        received
    });

    let mut smu = Smu::new(conn);
    assert_eq!(
        smu.adc24_both(Sampling::Latest).await.unwrap(),
        Outcome::Done([1, -1])
    );
    assert_eq!(firmware.await.unwrap(), b"ADC24:BOTH?\r");

    // the peer going away closes the connection
    drop(smu);
    reader_task.await.unwrap();
}

#[tokio::test]
async fn reader_task_reports_eof_as_disconnect() {
    let (host, device) = tokio::io::duplex(64);
    let (reader, writer) = tokio::io::split(host);
    let (mut conn, handle) = EventConnection::open(StreamWriter::new(writer, None), &LinkConfig::default());
    let reader_task = spawn_reader(reader, handle);

    drop(device);
    reader_task.await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(conn.read_line().await, Err(SmuError::ConnectionClosed)));
}

/// Feed `reply` once `count` lines have been written, as the board would.
fn answer_after(
    mut handle: ReceiveHandle,
    log: WriteLog,
    count: usize,
    reply: &'static [u8],
) -> tokio::task::JoinHandle<(ReceiveHandle, WriteLog)> {
    tokio::spawn(async move {
        while log.lines().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.on_receive(reply);
        (handle, log)
    })
}

#[tokio::test]
async fn query_after_timeout_gets_its_own_reply() {
    init_tracing();
    let (writer, log) = RecordingWriter::new(Some(20));
    let (conn, mut handle) = EventConnection::open(writer, &config_with_timeout(50));
    let mut smu = Smu::new(conn);

    assert!(matches!(smu.sw1().await, Err(SmuError::Timeout(_))));
    assert!(smu.is_connected());

    // the switch reply shows up after the query gave up
    handle.on_receive(b"1\r\n");
    let board = answer_after(handle, log, 2, b"3FF\r\n");

    assert_eq!(smu.dac10(Dac10Output::Dac1).await.unwrap(), Outcome::Done(0x3FF));
    let (_handle, log) = board.await.unwrap();
    assert_eq!(log.lines(), ["UI:SW1?", "DAC10:DAC1?"]);
}

#[tokio::test]
async fn query_after_oversized_reply_gets_its_own_reply() {
    let (writer, _log) = RecordingWriter::new(None);
    let config = LinkConfig {
        max_line_len: 16,
        ..LinkConfig::default()
    };
    let (conn, mut handle) = EventConnection::open(writer, &config);
    let mut smu = Smu::new(conn);

    handle.on_receive(b"0123456789ABCDEF01");
    handle.on_receive(b"23\r\n1\r\n");

    assert!(matches!(
        smu.sw1().await,
        Err(SmuError::FrameTooLong { max: 16, .. })
    ));
    assert_eq!(smu.sw1().await.unwrap(), Outcome::Done(true));
}

#[tokio::test]
async fn long_flash_dump_over_small_notifications() {
    let (writer, log) = RecordingWriter::new(Some(20));
    let (conn, mut handle) = EventConnection::open(writer, &LinkConfig::ble_uart());
    let mut smu = Smu::new(conn);

    let dump = (0..2000)
        .map(|i| format!("{:X}", i % 256))
        .collect::<Vec<_>>()
        .join(",");
    let reply = format!("{dump}\r\n1\r\n");
    for notification in reply.as_bytes().chunks(20) {
        handle.on_receive(notification);
    }

    let Outcome::Done(bytes) = smu.flash_read(0, 2000).await.unwrap() else {
        panic!("flash read skipped");
    };
    assert_eq!(bytes.len(), 2000);
    assert_eq!(bytes[..3], [0, 1, 2]);
    assert_eq!(bytes[1999], (1999 % 256) as u8);
    assert_eq!(smu.sw1().await.unwrap(), Outcome::Done(true));
    assert_eq!(log.lines(), ["FLASH:READ 0,0,7D0", "UI:SW1?"]);
}
