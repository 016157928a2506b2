//! Archival: store each new record's raw message body as an artifact.

use async_trait::async_trait;
use tracing::{error, info};

use crate::artifacts::Mime;
use crate::context::RunContext;
use crate::error::StageError;
use crate::pipeline::types::{PipelineDeps, Stage, StageName, StageReport};
use crate::store::{Cell, Field, Record};

pub struct ArchiveStage {
    deps: PipelineDeps,
}

impl ArchiveStage {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// `"<received date> - <identifier> - <subject>"`; the artifact store
    /// replaces characters that are invalid in file names.
    pub fn artifact_name(record: &Record) -> String {
        format!(
            "{} - {} - {}",
            record.received_at.format("%Y-%m-%d"),
            record.identifier,
            record.subject
        )
    }

    async fn archive(&self, record: &Record) -> Result<String, String> {
        let body = self
            .deps
            .source
            .fetch_body(&record.identifier)
            .await
            .map_err(|e| e.to_string())?;
        let reference = self
            .deps
            .artifacts
            .create(&Self::artifact_name(record), &body, Mime::Html)
            .await
            .map_err(|e| e.to_string())?;
        Ok(reference.to_string())
    }
}

#[async_trait]
impl Stage for ArchiveStage {
    fn name(&self) -> StageName {
        StageName::Archive
    }

    async fn run(&self, _ctx: &RunContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(self.name());
        self.deps.db.ensure_field(Field::ArchiveRef).await?;

        for record in self.deps.db.read_records().await? {
            if record.identifier.is_empty() || !record.cell(Field::ArchiveRef).is_pending() {
                continue;
            }
            report.eligible += 1;

            match self.archive(&record).await {
                Ok(reference) => {
                    self.deps
                        .db
                        .set_cell(record.row, Field::ArchiveRef, &Cell::Done(reference))
                        .await?;
                    info!(row = record.row, identifier = %record.identifier, "Raw resume archived");
                    report.succeeded += 1;
                }
                Err(reason) => {
                    error!(row = record.row, identifier = %record.identifier, error = %reason, "Archival failed");
                    self.deps
                        .db
                        .set_cell(
                            record.row,
                            Field::ArchiveRef,
                            &Cell::Failed(format!("archival failed: {reason}")),
                        )
                        .await?;
                    report.failed += 1;
                }
            }
        }

        report.log();
        Ok(report)
    }
}
