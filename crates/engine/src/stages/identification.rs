// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in identification: classify the target by its leading bytes.
//!
//! The static-analysis plugin ecosystem is an external collaborator; this
//! runner covers the classification the pipeline itself depends on
//! (platform inference and dependency tags in pre-analysis).

use super::{StageRequest, StageRunner};
use async_trait::async_trait;
use cuckoo_core::{ErrorKind, Fault, Identification, StageReport, TargetDescriptor};
use std::io::Read;
use std::path::Path;

/// Classify by magic bytes.
fn sniff(buf: &[u8]) -> &'static str {
    if buf.starts_with(b"MZ") {
        "pe"
    } else if buf.starts_with(b"\x7FELF") {
        "elf"
    } else if buf.starts_with(b"PK\x03\x04") {
        "zip"
    } else if buf.starts_with(b"%PDF") {
        "pdf"
    } else if buf.starts_with(b"\xD0\xCF\x11\xE0") {
        "doc"
    } else if buf.starts_with(b"#!") {
        "script"
    } else if !buf.is_empty() && buf.iter().all(|b| b.is_ascii() && *b != 0) {
        "script"
    } else {
        "unknown"
    }
}

/// Identification stage over the canonical binary blob.
#[derive(Debug, Clone, Default)]
pub struct IdentificationRunner;

impl IdentificationRunner {
    fn identify_file(
        &self,
        path: &Path,
        sha256: &str,
        media_type: Option<&str>,
    ) -> Result<Identification, Fault> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            Fault::new(
                ErrorKind::StateInvariantViolation,
                format!("binary {} missing: {e}", path.display()),
            )
        })?;
        let mut head = [0u8; 512];
        let n = file.read(&mut head).map_err(|e| {
            Fault::new(ErrorKind::StageTimeout, format!("read failed: {e}"))
        })?;

        Ok(Identification {
            file_type: sniff(&head[..n]).to_string(),
            sha256: Some(sha256.to_string()),
            media_type: media_type.map(str::to_string),
        })
    }
}

#[async_trait]
impl StageRunner for IdentificationRunner {
    async fn run(&self, request: &StageRequest) -> Result<StageReport, Fault> {
        let identification = match &request.analysis.target {
            TargetDescriptor::Url { .. } => Identification {
                file_type: "url".to_string(),
                sha256: None,
                media_type: None,
            },
            TargetDescriptor::File {
                sha256, media_type, ..
            } => {
                let Some(path) = &request.binary_path else {
                    return Err(Fault::new(
                        ErrorKind::StateInvariantViolation,
                        "file analysis without a binary path",
                    ));
                };
                self.identify_file(path, sha256, media_type.as_deref())?
            }
        };
        Ok(StageReport::Identification(identification))
    }
}

#[cfg(test)]
#[path = "identification_tests.rs"]
mod tests;
