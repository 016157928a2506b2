//! Extraction: contact fields from converted Markdown.
//!
//! Each field has its own pattern and is filled independently. A field
//! with no match is marked `NotFound`, which is terminal.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{error, info};

use crate::artifacts::ArtifactRef;
use crate::context::RunContext;
use crate::error::StageError;
use crate::pipeline::types::{PipelineDeps, Stage, StageName, StageReport};
use crate::store::{Cell, Field, Record};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:E-mail|Email|電子郵件)[:：]\s*([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})")
        .unwrap()
});

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:聯絡電話|手機|Phone)[:：]\s*(\+?[0-9-]*[0-9])").unwrap());

static CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:代碼|Code)[:：]\s*([A-Za-z0-9_]+)").unwrap());

/// Pattern for one extracted field.
fn pattern(field: Field) -> Option<&'static Regex> {
    match field {
        Field::Email => Some(&*EMAIL),
        Field::Phone => Some(&*PHONE),
        Field::Code => Some(&*CODE),
        _ => None,
    }
}

/// Extract `field` from text, if it has a pattern and matches.
pub fn extract_field(field: Field, text: &str) -> Option<String> {
    pattern(field)?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub struct ExtractStage {
    deps: PipelineDeps,
}

impl ExtractStage {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Returns `false` when the converted text could not be loaded.
    async fn extract(&self, record: &Record, source: &ArtifactRef) -> Result<bool, StageError> {
        let text = match self.deps.artifacts.read(source).await {
            Ok(artifact) if !artifact.content.trim().is_empty() => artifact.content,
            Ok(_) => return self.record_failure(record, "converted resume is empty").await,
            Err(e) => return self.record_failure(record, &e.to_string()).await,
        };

        for field in Field::EXTRACTED {
            if !record.cell(field).is_pending() {
                continue;
            }
            let cell = match extract_field(field, &text) {
                Some(value) => Cell::Done(value),
                None => Cell::NotFound,
            };
            self.deps.db.set_cell(record.row, field, &cell).await?;
        }
        info!(row = record.row, name = %record.name, "Contact fields extracted");
        Ok(true)
    }

    /// Load failures are written to the email cell, and only when email
    /// and phone are both still empty.
    async fn record_failure(&self, record: &Record, reason: &str) -> Result<bool, StageError> {
        error!(row = record.row, name = %record.name, error = %reason, "Extraction failed");
        if record.cell(Field::Email).is_pending() && record.cell(Field::Phone).is_pending() {
            self.deps
                .db
                .set_cell(
                    record.row,
                    Field::Email,
                    &Cell::Failed(format!("extraction failed: {reason}")),
                )
                .await?;
        }
        Ok(false)
    }
}

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> StageName {
        StageName::Extract
    }

    async fn run(&self, _ctx: &RunContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(self.name());
        for field in Field::EXTRACTED {
            self.deps.db.ensure_field(field).await?;
        }

        for record in self.deps.db.read_records().await? {
            if !Field::EXTRACTED.iter().any(|f| record.cell(*f).is_pending()) {
                continue;
            }
            let Some(converted) = record.cell(Field::ConvertedRef).done() else {
                continue;
            };
            let Some(source) = ArtifactRef::parse(converted) else {
                continue;
            };
            report.eligible += 1;

            if self.extract(&record, &source).await? {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }

        report.log();
        Ok(report)
    }
}
