//! Step runner
//!
//! Runs one named validation step, converts its outcome into a
//! [`StepResult`] and captures a screenshot whether or not it passed. A
//! failing step never stops the flow.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::error::{E2eError, E2eResult};

/// Anything that can photograph its current page
#[async_trait]
pub trait Capture: Send {
    async fn capture(&mut self, path: &Path) -> E2eResult<()>;
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: u32,
    pub title: String,
    /// Artifact file name
    pub screenshot: String,
    /// Where the artifact was written; absent when capture failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
    /// Hex SHA-256 of the captured artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_sha256: Option<String>,
    pub pass: bool,
    pub details: String,
    pub duration_ms: u64,
}

pub struct StepRunner {
    artifact_dir: PathBuf,
    success_details: String,
    results: Vec<StepResult>,
}

impl StepRunner {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            success_details: "Assertions passed.".to_string(),
            results: Vec::new(),
        }
    }

    /// Details recorded for a passing step
    pub fn with_success_details(mut self, details: impl Into<String>) -> Self {
        self.success_details = details.into();
        self
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Run `action` against `ctx`, then screenshot into `artifact_name`.
    ///
    /// Returns whether the step passed.
    pub async fn run_step<C, A>(&mut self, ctx: &mut C, index: u32, title: &str, artifact_name: &str, action: A) -> bool
    where
        C: Capture,
        A: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, E2eResult<()>>,
    {
        info!("Step {}: {}", index, title);
        let start = Instant::now();

        let (mut pass, mut details) = match action(ctx).await {
            Ok(()) => (true, self.success_details.clone()),
            Err(e) => (false, e.to_string()),
        };

        let path = self.artifact_dir.join(artifact_name);
        let (screenshot_path, screenshot_sha256) = match capture_artifact(ctx, &path).await {
            Ok(digest) => (Some(path), Some(digest)),
            Err(e) => {
                pass = false;
                details = format!("{} {}", details, e).trim().to_string();
                (None, None)
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        if pass {
            info!("  ✓ {} ({} ms)", title, duration_ms);
        } else {
            error!("  ✗ {}: {}", title, details);
        }

        self.results.push(StepResult {
            step: index,
            title: title.to_string(),
            screenshot: artifact_name.to_string(),
            screenshot_path,
            screenshot_sha256,
            pass,
            details,
            duration_ms,
        });
        pass
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.pass)
    }

    pub fn into_results(self) -> Vec<StepResult> {
        self.results
    }
}

async fn capture_artifact<C: Capture>(ctx: &mut C, path: &Path) -> E2eResult<String> {
    ctx.capture(path)
        .await
        .map_err(|e| E2eError::ArtifactCapture(e.to_string()))?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| E2eError::ArtifactCapture(format!("{}: {}", path.display(), e)))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
