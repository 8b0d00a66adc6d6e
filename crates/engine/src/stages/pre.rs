// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in pre-analysis: choose the platforms tasks are created for.
//!
//! Submitted platforms win when present; otherwise the platform list is
//! inferred from identification. Dependency tags are attached either way
//! (`adobepdf` for PDFs, a browser tag for URL targets).

use super::{StageRequest, StageRunner};
use async_trait::async_trait;
use cuckoo_core::{
    ErrorKind, Fault, Identification, PreReport, Stage, StageReport, TaskPlatform,
};
use std::path::Path;

/// Pre-analysis stage configuration and logic.
#[derive(Debug, Clone)]
pub struct PreRunner {
    /// Platform list used when the submission named none.
    pub default_platforms: Vec<TaskPlatform>,
    /// Browser tag attached to URL analyses (`browser_<name>`).
    pub default_browser: String,
}

impl Default for PreRunner {
    fn default() -> Self {
        Self {
            default_platforms: vec![TaskPlatform::new("windows", "10")],
            default_browser: "firefox".to_string(),
        }
    }
}

impl PreRunner {
    /// Platforms inferred from the target family when the submission did
    /// not name any.
    fn infer_platforms(&self, file_type: &str) -> Vec<TaskPlatform> {
        let filtered: Vec<TaskPlatform> = match file_type {
            "pe" | "doc" => self
                .default_platforms
                .iter()
                .filter(|p| p.platform == "windows")
                .cloned()
                .collect(),
            "elf" => self
                .default_platforms
                .iter()
                .filter(|p| p.platform == "linux")
                .cloned()
                .collect(),
            _ => self.default_platforms.clone(),
        };
        if filtered.is_empty() {
            // A PE sample with no configured windows machine still gets the
            // configured defaults; the scheduler will fail the task with
            // NoMatchingMachine if nothing can run it.
            self.default_platforms.clone()
        } else {
            filtered
        }
    }

    /// Tags every platform of this analysis needs.
    fn dependency_tags(&self, file_type: &str) -> Vec<String> {
        match file_type {
            "pdf" => vec!["adobepdf".to_string()],
            "url" => vec![format!("browser_{}", self.default_browser)],
            _ => Vec::new(),
        }
    }

    fn load_identification(&self, analysis_dir: &Path) -> Result<Identification, Fault> {
        let path = analysis_dir.join(Stage::Identification.artifact_name());
        let raw = std::fs::read(&path).map_err(|e| {
            Fault::new(
                ErrorKind::StateInvariantViolation,
                format!("identification artifact missing: {e}"),
            )
        })?;
        match serde_json::from_slice::<StageReport>(&raw) {
            Ok(StageReport::Identification(identification)) => Ok(identification),
            _ => Err(Fault::new(
                ErrorKind::StateInvariantViolation,
                "identification artifact is malformed",
            )),
        }
    }
}

#[async_trait]
impl StageRunner for PreRunner {
    async fn run(&self, request: &StageRequest) -> Result<StageReport, Fault> {
        let identification = self.load_identification(&request.analysis_dir)?;

        let mut platforms = if request.analysis.settings.platforms.is_empty() {
            self.infer_platforms(&identification.file_type)
        } else {
            request.analysis.settings.platforms.clone()
        };

        let tags = self.dependency_tags(&identification.file_type);
        if !tags.is_empty() {
            for platform in &mut platforms {
                // Respect explicit browser choices from the submission.
                let has_browser = platform.tags.iter().any(|t| t.starts_with("browser_"));
                for tag in &tags {
                    if tag.starts_with("browser_") && has_browser {
                        continue;
                    }
                    platform.tags.insert(tag.clone());
                }
            }
        }

        Ok(StageReport::Pre(PreReport { platforms }))
    }
}

#[cfg(test)]
#[path = "pre_tests.rs"]
mod tests;
