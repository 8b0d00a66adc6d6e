// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bit-exact wire format of the result protocol.
//!
//! Connection header: `<magic:u32 BE> <task_id_len:u16 BE> <task_id>`.
//! Then repeated frames: `<kind:u8> <length:u32 BE> <payload>`.

use cuckoo_core::TaskId;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Protocol magic, big-endian on the wire.
pub const MAGIC: u32 = 0xC0CC_003A;

/// Hard cap on a single frame's payload (64 MiB).
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Longest task id the header may carry.
pub const MAX_TASK_ID_LEN: u16 = 64;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("task id of {0} bytes exceeds the maximum of {MAX_TASK_ID_LEN}")]
    TaskIdTooLong(u16),
    #[error("task id is not ASCII")]
    TaskIdNotAscii,
    #[error("unknown stream kind {0:#04x}")]
    UnknownKind(u8),
    #[error("frame of {got} bytes exceeds the maximum of {max}")]
    FrameTooLarge { got: u32, max: u32 },
    #[error("peer closed mid-frame")]
    Truncated,
}

/// Stream kinds a guest may upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Log,
    Screenshot,
    Netdump,
    File,
    Tty,
    Done,
}

impl StreamKind {
    pub fn from_wire(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0x01 => Ok(StreamKind::Log),
            0x02 => Ok(StreamKind::Screenshot),
            0x03 => Ok(StreamKind::Netdump),
            0x04 => Ok(StreamKind::File),
            0x05 => Ok(StreamKind::Tty),
            0xFF => Ok(StreamKind::Done),
            other => Err(FrameError::UnknownKind(other)),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            StreamKind::Log => 0x01,
            StreamKind::Screenshot => 0x02,
            StreamKind::Netdump => 0x03,
            StreamKind::File => 0x04,
            StreamKind::Tty => 0x05,
            StreamKind::Done => 0xFF,
        }
    }

    /// Append streams share one growing file; the others get a numbered
    /// file per frame.
    pub fn is_append(self) -> bool {
        matches!(self, StreamKind::Log | StreamKind::Tty | StreamKind::Netdump)
    }

    /// Destination inside the task directory for append streams.
    pub fn append_filename(self) -> Option<&'static str> {
        match self {
            StreamKind::Log => Some("log.txt"),
            StreamKind::Tty => Some("tty.txt"),
            StreamKind::Netdump => Some("network.pcap"),
            _ => None,
        }
    }

    /// Directory and extension for numbered per-frame streams.
    pub fn numbered_dir(self) -> Option<(&'static str, &'static str)> {
        match self {
            StreamKind::Screenshot => Some(("screenshots", "jpg")),
            StreamKind::File => Some(("files", "bin")),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamKind::Log => "log",
            StreamKind::Screenshot => "screenshot",
            StreamKind::Netdump => "netdump",
            StreamKind::File => "file",
            StreamKind::Tty => "tty",
            StreamKind::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Decoded connection header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub task_id: TaskId,
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: StreamKind,
    pub payload: Vec<u8>,
}

/// Read and validate the connection header.
pub async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Header, FrameError> {
    let magic = reader.read_u32().await.map_err(eof_as_truncated)?;
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }

    let id_len = reader.read_u16().await.map_err(eof_as_truncated)?;
    if id_len > MAX_TASK_ID_LEN {
        return Err(FrameError::TaskIdTooLong(id_len));
    }

    let mut id_bytes = vec![0u8; id_len as usize];
    reader
        .read_exact(&mut id_bytes)
        .await
        .map_err(eof_as_truncated)?;
    if !id_bytes.is_ascii() {
        return Err(FrameError::TaskIdNotAscii);
    }
    let task_id = String::from_utf8(id_bytes).map_err(|_| FrameError::TaskIdNotAscii)?;

    Ok(Header {
        task_id: TaskId::new(task_id),
    })
}

/// Read the next frame. `Ok(None)` on clean EOF at a frame boundary.
/// Length is validated against `max_len` before any payload is read.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: u32,
) -> Result<Option<Frame>, FrameError> {
    let kind_byte = match reader.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let kind = StreamKind::from_wire(kind_byte)?;

    let len = reader.read_u32().await.map_err(eof_as_truncated)?;
    if len > max_len {
        return Err(FrameError::FrameTooLarge { got: len, max: max_len });
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(eof_as_truncated)?;

    Ok(Some(Frame { kind, payload }))
}

/// Encode a header (guests and tests).
pub fn encode_header(task_id: &TaskId) -> Vec<u8> {
    let id = task_id.as_str().as_bytes();
    let mut out = Vec::with_capacity(6 + id.len());
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&(id.len() as u16).to_be_bytes());
    out.extend_from_slice(id);
    out
}

/// Encode one frame (guests and tests).
pub fn encode_frame(kind: StreamKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(kind.to_wire());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn eof_as_truncated(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::Truncated
    } else {
        FrameError::Io(e)
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
