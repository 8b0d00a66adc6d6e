// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[tokio::test]
async fn header_round_trip() {
    let task_id = TaskId::new("20260801-A1B2C3_1");
    let bytes = encode_header(&task_id);

    // Spot-check the exact wire layout.
    assert_eq!(&bytes[0..4], &[0xC0, 0xCC, 0x00, 0x3A]);
    assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 17);

    let mut cursor = std::io::Cursor::new(bytes);
    let header = read_header(&mut cursor).await.unwrap();
    assert_eq!(header.task_id, task_id);
}

#[tokio::test]
async fn bad_magic_is_rejected() {
    let mut bytes = encode_header(&TaskId::new("t_1"));
    bytes[0] = 0xDE;
    let mut cursor = std::io::Cursor::new(bytes);
    assert!(matches!(
        read_header(&mut cursor).await,
        Err(FrameError::BadMagic(_))
    ));
}

#[tokio::test]
async fn oversized_task_id_is_rejected() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&MAGIC.to_be_bytes());
    bytes.extend_from_slice(&1000u16.to_be_bytes());
    let mut cursor = std::io::Cursor::new(bytes);
    assert!(matches!(
        read_header(&mut cursor).await,
        Err(FrameError::TaskIdTooLong(1000))
    ));
}

#[tokio::test]
async fn non_ascii_task_id_is_rejected() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&MAGIC.to_be_bytes());
    bytes.extend_from_slice(&2u16.to_be_bytes());
    bytes.extend_from_slice(&[0xC3, 0xA9]);
    let mut cursor = std::io::Cursor::new(bytes);
    assert!(matches!(
        read_header(&mut cursor).await,
        Err(FrameError::TaskIdNotAscii)
    ));
}

#[parameterized(
    log = { 0x01, StreamKind::Log },
    screenshot = { 0x02, StreamKind::Screenshot },
    netdump = { 0x03, StreamKind::Netdump },
    file = { 0x04, StreamKind::File },
    tty = { 0x05, StreamKind::Tty },
    done = { 0xFF, StreamKind::Done },
)]
fn kind_wire_mapping(byte: u8, kind: StreamKind) {
    assert_eq!(StreamKind::from_wire(byte).unwrap(), kind);
    assert_eq!(kind.to_wire(), byte);
}

#[test]
fn unknown_kind_is_rejected() {
    assert!(matches!(
        StreamKind::from_wire(0x77),
        Err(FrameError::UnknownKind(0x77))
    ));
}

#[tokio::test]
async fn frame_round_trip_and_eof() {
    let mut bytes = encode_frame(StreamKind::Log, b"line one\n");
    bytes.extend_from_slice(&encode_frame(StreamKind::Done, b""));
    let mut cursor = std::io::Cursor::new(bytes);

    let frame = read_frame(&mut cursor, MAX_FRAME_LEN).await.unwrap().unwrap();
    assert_eq!(frame.kind, StreamKind::Log);
    assert_eq!(frame.payload, b"line one\n");

    let done = read_frame(&mut cursor, MAX_FRAME_LEN).await.unwrap().unwrap();
    assert_eq!(done.kind, StreamKind::Done);
    assert!(done.payload.is_empty());

    assert!(read_frame(&mut cursor, MAX_FRAME_LEN).await.unwrap().is_none());
}

#[tokio::test]
async fn oversized_frame_is_rejected_before_payload() {
    let mut bytes = Vec::new();
    bytes.push(0x01);
    bytes.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
    let mut cursor = std::io::Cursor::new(bytes);
    assert!(matches!(
        read_frame(&mut cursor, MAX_FRAME_LEN).await,
        Err(FrameError::FrameTooLarge { .. })
    ));
}

#[tokio::test]
async fn truncated_payload_is_reported() {
    let mut bytes = Vec::new();
    bytes.push(0x01);
    bytes.extend_from_slice(&100u32.to_be_bytes());
    bytes.extend_from_slice(b"short");
    let mut cursor = std::io::Cursor::new(bytes);
    assert!(matches!(
        read_frame(&mut cursor, MAX_FRAME_LEN).await,
        Err(FrameError::Truncated)
    ));
}

#[test]
fn stream_destinations() {
    assert_eq!(StreamKind::Log.append_filename(), Some("log.txt"));
    assert_eq!(StreamKind::Netdump.append_filename(), Some("network.pcap"));
    assert_eq!(
        StreamKind::Screenshot.numbered_dir(),
        Some(("screenshots", "jpg"))
    );
    assert!(StreamKind::Screenshot.append_filename().is_none());
    assert!(StreamKind::Log.is_append());
    assert!(!StreamKind::Screenshot.is_append());
}
