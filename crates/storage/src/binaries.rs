// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content-addressed storage for submitted files.
//!
//! The canonical copy of a target lives in
//! `binaries/<sha256[0]>/<sha256[1]>/<sha256>`. Files are stored exactly
//! once; concurrent puts of the same bytes are safe via write-to-temp plus
//! rename (create-if-absent).

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BinaryStoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("file of {got} bytes is below the minimum of {min}")]
    TooSmall { got: u64, min: u64 },
    #[error("file of {got} bytes exceeds the maximum of {max}")]
    TooLarge { got: u64, max: u64 },
    #[error("no stored binary for {0}")]
    NotFound(String),
}

/// Default minimum accepted file size in bytes.
pub const DEFAULT_MIN_FILE_SIZE: u64 = 133;

/// Default maximum accepted file size in bytes (4 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Content-addressed blob store rooted at `storage/binaries/`.
#[derive(Debug, Clone)]
pub struct BinaryStore {
    root: PathBuf,
    min_size: u64,
    max_size: u64,
}

impl BinaryStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            min_size: DEFAULT_MIN_FILE_SIZE,
            max_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_size_limits(mut self, min_size: u64, max_size: u64) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Path of the blob for a given digest, whether or not it exists.
    pub fn path_of(&self, sha256: &str) -> PathBuf {
        let h0 = &sha256[0..1];
        let h1 = &sha256[1..2];
        self.root.join(h0).join(h1).join(sha256)
    }

    /// Store a file by copying it in, returning its sha256 digest.
    ///
    /// Size limits are enforced before any bytes move. Re-putting the same
    /// content is a no-op that returns the existing digest.
    pub fn put_file(&self, source: &Path) -> Result<String, BinaryStoreError> {
        let size = fs::metadata(source)?.len();
        self.check_size(size)?;

        let digest = hash_file(source)?;
        let dest = self.path_of(&digest);
        if dest.exists() {
            return Ok(digest);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        // Copy to a temp file next to the destination, then rename. A
        // concurrent put of the same digest ends with an identical file
        // regardless of which rename lands last.
        let tmp = dest.with_extension(format!("tmp.{}", std::process::id()));
        fs::copy(source, &tmp)?;
        fs::rename(&tmp, &dest)?;
        Ok(digest)
    }

    /// Store raw bytes (used by the node API when receiving payloads).
    pub fn put_bytes(&self, bytes: &[u8]) -> Result<String, BinaryStoreError> {
        self.check_size(bytes.len() as u64)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = format!("{:x}", hasher.finalize());

        let dest = self.path_of(&digest);
        if dest.exists() {
            return Ok(digest);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = dest.with_extension(format!("tmp.{}", std::process::id()));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &dest)?;
        Ok(digest)
    }

    /// Open a stored blob for reading.
    pub fn open(&self, sha256: &str) -> Result<File, BinaryStoreError> {
        let path = self.path_of(sha256);
        if !path.exists() {
            return Err(BinaryStoreError::NotFound(sha256.to_string()));
        }
        Ok(File::open(path)?)
    }

    pub fn contains(&self, sha256: &str) -> bool {
        self.path_of(sha256).exists()
    }

    fn check_size(&self, size: u64) -> Result<(), BinaryStoreError> {
        if size < self.min_size {
            return Err(BinaryStoreError::TooSmall {
                got: size,
                min: self.min_size,
            });
        }
        if size > self.max_size {
            return Err(BinaryStoreError::TooLarge {
                got: size,
                max: self.max_size,
            });
        }
        Ok(())
    }
}

fn hash_file(path: &Path) -> Result<String, BinaryStoreError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
#[path = "binaries_tests.rs"]
mod tests;
