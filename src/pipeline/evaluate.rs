//! Evaluation: two chained LLM calls per converted resume.
//!
//! 1. The review prompt (job description, benchmark CV, candidate) produces
//!    a full evaluation.
//! 2. The summary prompt wraps that evaluation and produces a short digest.
//!
//! Both prompts are stored as artifacts before they are sent, so every call
//! can be replayed from stored inputs. `FullReportRef` is the stage guard:
//! it is written last, and a record without it is retried on the next run
//! no matter what the summary cell says.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::artifacts::{ArtifactRef, Mime};
use crate::config::{keys, prompt_keys};
use crate::context::RunContext;
use crate::error::{ConfigError, StageError};
use crate::pipeline::prompt::{
    BENCHMARK_MARKERS, CANDIDATE_MARKERS, JOB_DESCRIPTION_MARKERS, REPORT_MARKERS, fill, generate,
    has_marker,
};
use crate::pipeline::types::{PipelineDeps, Stage, StageName, StageReport};
use crate::store::{Cell, Field, Record};

pub const PROMPT_SUFFIX: &str = "_prompt.md";
pub const SUMMARY_PROMPT_SUFFIX: &str = "_summary_prompt.md";
pub const REPORT_SUFFIX: &str = "_report.md";

/// Body of the combined report artifact.
pub fn combined_report(candidate: &str, evaluation: &str) -> String {
    format!("# Candidate Resume\n\n{candidate}\n\n---\n\n# AI Evaluation\n\n{evaluation}")
}

pub struct EvaluateStage {
    deps: PipelineDeps,
}

/// Templates resolved once per run.
struct PreparedPrompts<'a> {
    /// Review template with job description and benchmark filled in.
    review: String,
    summary: Option<&'a str>,
}

impl EvaluateStage {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    fn prepare<'a>(&self, ctx: &'a RunContext) -> Result<PreparedPrompts<'a>, ConfigError> {
        let job_description = ctx.require_config(
            keys::JOB_DESCRIPTION,
            "Store the job description text the candidates are evaluated against",
        )?;
        let benchmark = ctx.require_config(
            keys::BENCHMARK_CV,
            "Store a reference resume of a strong candidate",
        )?;
        let template = ctx.require_prompt(prompt_keys::CV_REVIEW)?;

        if !has_marker(template, CANDIDATE_MARKERS) {
            return Err(ConfigError::InvalidValue {
                key: prompt_keys::CV_REVIEW.into(),
                message: format!("template must contain one of {CANDIDATE_MARKERS:?}"),
            });
        }
        if !has_marker(template, JOB_DESCRIPTION_MARKERS) || !has_marker(template, BENCHMARK_MARKERS)
        {
            warn!("Review template lacks a job description or benchmark placeholder");
        }

        let review = fill(
            &fill(template, JOB_DESCRIPTION_MARKERS, job_description),
            BENCHMARK_MARKERS,
            benchmark,
        );
        Ok(PreparedPrompts {
            review,
            summary: ctx.prompt(prompt_keys::REVIEW_SUMMARY),
        })
    }

    /// Run the call chain for one record. Any `Err` leaves the record retryable.
    async fn evaluate(
        &self,
        record: &Record,
        source: &ArtifactRef,
        prompts: &PreparedPrompts<'_>,
    ) -> Result<(), String> {
        let db = &self.deps.db;
        let artifacts = &self.deps.artifacts;

        let candidate = artifacts
            .read(source)
            .await
            .map_err(|e| format!("cannot read converted resume: {e}"))?;
        if candidate.content.trim().is_empty() {
            return Err(format!("converted resume {} is empty", candidate.name));
        }
        let base = candidate
            .name
            .strip_suffix(".md")
            .unwrap_or(&candidate.name)
            .to_string();

        let review_prompt = fill(&prompts.review, CANDIDATE_MARKERS, &candidate.content);
        let prompt_ref = artifacts
            .create(&format!("{base}{PROMPT_SUFFIX}"), &review_prompt, Mime::Markdown)
            .await
            .map_err(|e| e.to_string())?;
        db.set_cell(record.row, Field::PromptRef, &Cell::Done(prompt_ref.to_string()))
            .await
            .map_err(|e| e.to_string())?;

        let evaluation = generate(self.deps.llm.as_ref(), &review_prompt)
            .await
            .map_err(|e| format!("evaluation call failed: {e}"))?;

        let summary_template = prompts
            .summary
            .ok_or_else(|| format!("missing prompt template: {}", prompt_keys::REVIEW_SUMMARY))?;
        let summary_prompt = fill(summary_template, REPORT_MARKERS, &evaluation);
        let summary_ref = artifacts
            .create(
                &format!("{base}{SUMMARY_PROMPT_SUFFIX}"),
                &summary_prompt,
                Mime::Markdown,
            )
            .await
            .map_err(|e| e.to_string())?;
        db.set_cell(
            record.row,
            Field::SummaryPromptRef,
            &Cell::Done(summary_ref.to_string()),
        )
        .await
        .map_err(|e| e.to_string())?;

        let summary = generate(self.deps.llm.as_ref(), &summary_prompt)
            .await
            .map_err(|e| format!("summary call failed: {e}"))?;
        db.set_cell(
            record.row,
            Field::EvaluationSummary,
            &Cell::Done(summary.trim().to_string()),
        )
        .await
        .map_err(|e| e.to_string())?;

        let report_ref = artifacts
            .create(
                &format!("{base}{REPORT_SUFFIX}"),
                &combined_report(&candidate.content, &evaluation),
                Mime::Markdown,
            )
            .await
            .map_err(|e| e.to_string())?;
        db.set_cell(
            record.row,
            Field::FullReportRef,
            &Cell::Done(report_ref.to_string()),
        )
        .await
        .map_err(|e| e.to_string())?;

        Ok(())
    }
}

#[async_trait]
impl Stage for EvaluateStage {
    fn name(&self) -> StageName {
        StageName::Evaluate
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(self.name());
        for field in [
            Field::PromptRef,
            Field::SummaryPromptRef,
            Field::EvaluationSummary,
            Field::FullReportRef,
        ] {
            self.deps.db.ensure_field(field).await?;
        }

        let prompts = self.prepare(ctx)?;

        for record in self.deps.db.read_records().await? {
            if !record.cell(Field::FullReportRef).is_pending() {
                continue;
            }
            let Some(source) = record
                .cell(Field::ConvertedRef)
                .done()
                .and_then(ArtifactRef::parse)
            else {
                continue;
            };
            report.eligible += 1;

            self.deps
                .db
                .set_cell(record.row, Field::EvaluationSummary, &Cell::InProgress)
                .await?;
            info!(row = record.row, name = %record.name, "Evaluating resume");

            match self.evaluate(&record, &source, &prompts).await {
                Ok(()) => {
                    info!(row = record.row, name = %record.name, "Evaluation complete");
                    report.succeeded += 1;
                }
                Err(reason) => {
                    error!(row = record.row, name = %record.name, error = %reason, "Evaluation failed, will retry next run");
                    self.deps
                        .db
                        .set_cell(
                            record.row,
                            Field::EvaluationSummary,
                            &Cell::Failed(reason),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_report_has_both_sections() {
        let body = combined_report("# 王小明", "Strong Rust background");
        let resume_at = body.find("# 王小明").unwrap();
        let eval_at = body.find("Strong Rust background").unwrap();
        assert!(resume_at < eval_at);
        assert!(body.contains("\n---\n"));
    }
}
