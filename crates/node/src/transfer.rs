// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result transfer format: a zstd-compressed tarball of one task
//! directory.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task directory {0} does not exist")]
    MissingDir(String),
}

/// Pack a task directory into a `.tar.zst` byte buffer.
pub fn pack_task_dir(task_dir: &Path) -> Result<Vec<u8>, TransferError> {
    if !task_dir.is_dir() {
        return Err(TransferError::MissingDir(task_dir.display().to_string()));
    }

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        builder.append_dir_all(".", task_dir)?;
        builder.finish()?;
    }

    let compressed = zstd::encode_all(tar_bytes.as_slice(), 3)?;
    Ok(compressed)
}

/// Unpack a `.tar.zst` buffer into a task directory.
pub fn unpack_task_dir(bytes: &[u8], task_dir: &Path) -> Result<(), TransferError> {
    std::fs::create_dir_all(task_dir)?;
    let tar_bytes = zstd::decode_all(bytes)?;
    let mut archive = tar::Archive::new(tar_bytes.as_slice());
    archive.unpack(task_dir)?;
    Ok(())
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
