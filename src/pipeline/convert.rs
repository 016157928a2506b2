//! Conversion: turn archived HTML into Markdown with the LLM.

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::artifacts::{ArtifactRef, Mime};
use crate::config::prompt_keys;
use crate::context::RunContext;
use crate::error::StageError;
use crate::pipeline::prompt::{DEFAULT_CONVERSION_PROMPT, generate, strip_code_fence};
use crate::pipeline::types::{PipelineDeps, Stage, StageName, StageReport};
use crate::store::{Cell, Field};

/// Written to the converted cell on failure; details go to the log.
pub const CONVERSION_FAILED: &str = "conversion failed, see logs";

pub struct ConvertStage {
    deps: PipelineDeps,
}

impl ConvertStage {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Markdown artifact name derived from the archived artifact's name.
    pub fn markdown_name(archived: &str) -> String {
        let stem = archived.strip_suffix(".html").unwrap_or(archived);
        format!("{stem}.md")
    }

    async fn convert(&self, template: &str, source: &ArtifactRef) -> Result<String, String> {
        let raw = self
            .deps
            .artifacts
            .read(source)
            .await
            .map_err(|e| format!("cannot read archived resume: {e}"))?;
        if raw.content.trim().is_empty() {
            return Err("archived resume is empty".into());
        }

        let prompt = format!("{template}\n\n{}", raw.content);
        let response = generate(self.deps.llm.as_ref(), &prompt)
            .await
            .map_err(|e| e.to_string())?;
        let markdown = strip_code_fence(&response);
        if markdown.is_empty() {
            return Err("model returned only an empty code fence".into());
        }

        let reference = self
            .deps
            .artifacts
            .create(&Self::markdown_name(&raw.name), &markdown, Mime::Markdown)
            .await
            .map_err(|e| e.to_string())?;
        Ok(reference.to_string())
    }
}

#[async_trait]
impl Stage for ConvertStage {
    fn name(&self) -> StageName {
        StageName::Convert
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(self.name());
        self.deps.db.ensure_field(Field::ConvertedRef).await?;
        let template = ctx
            .prompt(prompt_keys::HTML_TO_MARKDOWN)
            .unwrap_or(DEFAULT_CONVERSION_PROMPT);

        for record in self.deps.db.read_records().await? {
            if !record.cell(Field::ConvertedRef).is_pending() {
                continue;
            }
            // Failed or missing archives are not eligible.
            let Some(archived) = record.cell(Field::ArchiveRef).done() else {
                continue;
            };
            report.eligible += 1;

            let Some(source) = ArtifactRef::parse(archived) else {
                debug!(row = record.row, value = archived, "Archive cell holds no artifact reference");
                report.skipped += 1;
                continue;
            };

            match self.convert(template, &source).await {
                Ok(reference) => {
                    self.deps
                        .db
                        .set_cell(record.row, Field::ConvertedRef, &Cell::Done(reference))
                        .await?;
                    info!(row = record.row, name = %record.name, "Resume converted to Markdown");
                    report.succeeded += 1;
                }
                Err(reason) => {
                    error!(row = record.row, name = %record.name, error = %reason, "Conversion failed");
                    self.deps
                        .db
                        .set_cell(
                            record.row,
                            Field::ConvertedRef,
                            &Cell::Failed(CONVERSION_FAILED.into()),
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
