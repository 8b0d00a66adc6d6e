// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Newline-delimited JSON over a Unix stream socket.
//!
//! Each request is one line `{"id": N, "op": "...", "args": {...}}`; each
//! response one line `{"id": N, "ok": true, "data": {...}}` or
//! `{"id": N, "ok": false, "error": "..."}`.

use cuckoo_core::Route;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// A request line must fit in this many bytes.
pub const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("line exceeds {MAX_LINE} bytes")]
    LineTooLong,
    #[error("connection closed")]
    ConnectionClosed,
}

/// Operations the rooter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RooterOp {
    Ping,
    ListRoutes,
    Apply,
    Remove,
}

/// Arguments, present for `apply` and `remove`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub op: RooterOp,
    #[serde(default)]
    pub args: RequestArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, data: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Read one JSON line from an async reader.
pub async fn read_line_json<T, R>(reader: &mut BufReader<R>) -> Result<T, ProtocolError>
where
    T: serde::de::DeserializeOwned,
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if n > MAX_LINE {
        return Err(ProtocolError::LineTooLong);
    }
    Ok(serde_json::from_str(line.trim())?)
}

/// Write one value as a JSON line.
pub async fn write_line_json<T, W>(writer: &mut W, value: &T) -> Result<(), ProtocolError>
where
    T: Serialize,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
