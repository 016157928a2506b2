//! Shared types for the resume pipeline stages.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::artifacts::ArtifactStore;
use crate::context::RunContext;
use crate::error::StageError;
use crate::llm::LlmProvider;
use crate::notify::Notifier;
use crate::source::MailSource;
use crate::store::Database;

// ── Stage identity ──────────────────────────────────────────────────

/// Every stage, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Ingest,
    Archive,
    Convert,
    Extract,
    Evaluate,
    Invite,
    Report,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::Ingest,
        StageName::Archive,
        StageName::Convert,
        StageName::Extract,
        StageName::Evaluate,
        StageName::Invite,
        StageName::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Ingest => "ingest",
            StageName::Archive => "archive",
            StageName::Convert => "convert",
            StageName::Extract => "extract",
            StageName::Evaluate => "evaluate",
            StageName::Invite => "invite",
            StageName::Report => "report",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ALL
            .iter()
            .copied()
            .find(|n| n.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

// ── Stage outcome ───────────────────────────────────────────────────

/// Counters for one stage run.
///
/// `eligible` counts records whose guard let them in; each of those ends
/// up in exactly one of `succeeded`, `failed` or `skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: StageName,
    pub eligible: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StageReport {
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            eligible: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }

    /// True when the stage found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.eligible == 0
    }

    pub fn log(&self) {
        if self.is_noop() {
            tracing::info!(stage = %self.stage, "Stage complete, nothing to do");
        } else {
            tracing::info!(
                stage = %self.stage,
                eligible = self.eligible,
                succeeded = self.succeeded,
                failed = self.failed,
                skipped = self.skipped,
                "Stage complete"
            );
        }
    }
}

// ── Stage trait ─────────────────────────────────────────────────────

/// One step of the pipeline.
///
/// Per-record failures are recorded on the record and counted in the
/// report. An `Err` means the stage could not run at all.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(&self, ctx: &RunContext) -> Result<StageReport, StageError>;
}

/// Collaborators shared by every stage.
#[derive(Clone)]
pub struct PipelineDeps {
    pub db: Arc<dyn Database>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub source: Arc<dyn MailSource>,
    pub llm: Arc<dyn LlmProvider>,
    pub notifier: Arc<dyn Notifier>,
}
