//! Batch orchestration: run the stages in order behind one failure boundary.

use std::error::Error as _;

use chrono::Local;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::error::PipelineError;
use crate::pipeline::archive::ArchiveStage;
use crate::pipeline::convert::ConvertStage;
use crate::pipeline::evaluate::EvaluateStage;
use crate::pipeline::extract::ExtractStage;
use crate::pipeline::ingest::IngestStage;
use crate::pipeline::invite::InvitationStage;
use crate::pipeline::report::ReportStage;
use crate::pipeline::types::{PipelineDeps, Stage, StageName, StageReport};

pub const ALERT_SUBJECT: &str = "[Error] Daily resume pipeline failed";

/// Outcome of one successful batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub reports: Vec<StageReport>,
}

impl BatchSummary {
    pub fn report(&self, stage: StageName) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }
}

/// Error message followed by its `source()` chain, one cause per line.
pub fn describe_error(err: &PipelineError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    out
}

pub struct Pipeline {
    deps: PipelineDeps,
    operator_email: Option<String>,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Pipeline with the standard stage order.
    pub fn new(deps: PipelineDeps, operator_email: Option<String>) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(IngestStage::new(deps.clone())),
            Box::new(ArchiveStage::new(deps.clone())),
            Box::new(ConvertStage::new(deps.clone())),
            Box::new(ExtractStage::new(deps.clone())),
            Box::new(EvaluateStage::new(deps.clone())),
            Box::new(InvitationStage::new(deps.clone())),
            Box::new(ReportStage::new(deps.clone())),
        ];
        Self {
            deps,
            operator_email,
            stages,
        }
    }

    async fn context(&self) -> Result<RunContext, PipelineError> {
        Ok(RunContext::resolve(
            self.deps.db.as_ref(),
            self.operator_email.clone(),
            Local::now(),
        )
        .await?)
    }

    /// Run every stage once. The first stage error aborts the rest; writes
    /// made by earlier stages stay in place.
    pub async fn run_batch(&self) -> Result<BatchSummary, PipelineError> {
        let ctx = self.context().await?;
        let mut summary = BatchSummary::default();
        for stage in &self.stages {
            if stage.name() == StageName::Invite && !ctx.send_invitations() {
                continue;
            }
            info!(stage = %stage.name(), "Stage starting");
            let report = stage
                .run(&ctx)
                .await
                .map_err(|source| PipelineError::Stage {
                    stage: stage.name().to_string(),
                    source,
                })?;
            summary.reports.push(report);
        }
        Ok(summary)
    }

    /// Run one stage with a fresh context.
    pub async fn run_stage(&self, name: StageName) -> Result<StageReport, PipelineError> {
        let ctx = self.context().await?;
        let stage = self
            .stages
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| PipelineError::Stage {
                stage: name.to_string(),
                source: crate::error::ConfigError::InvalidValue {
                    key: "stage".into(),
                    message: format!("{name} is not registered"),
                }
                .into(),
            })?;
        info!(stage = %name, "Stage starting");
        stage
            .run(&ctx)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: name.to_string(),
                source,
            })
    }

    /// The scheduled entry point: run the batch and alert the operator if it fails.
    pub async fn run_daily(&self) -> Result<BatchSummary, PipelineError> {
        let started = std::time::Instant::now();
        info!("Daily resume pipeline starting");

        match self.run_batch().await {
            Ok(summary) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    stages = summary.reports.len(),
                    "Daily resume pipeline finished"
                );
                Ok(summary)
            }
            Err(e) => {
                let detail = describe_error(&e);
                error!(error = %detail, "Daily resume pipeline failed");
                self.alert(&detail).await;
                Err(e)
            }
        }
    }

    async fn alert(&self, detail: &str) {
        let Some(operator) = self.operator_email.as_deref() else {
            warn!("No operator address configured, failure alert not sent");
            return;
        };
        let body = format!(
            "The daily resume pipeline stopped with an error.\n\n{detail}\n\n\
             Stages after the failing one did not run. Fix the cause and run \
             the pipeline again; completed work is kept."
        );
        if let Err(e) = self
            .deps
            .notifier
            .send(&[operator.to_string()], ALERT_SUBJECT, &body)
            .await
        {
            error!(error = %e, "Failed to send failure alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, StageError};

    #[test]
    fn describe_error_includes_causes() {
        let err = PipelineError::Stage {
            stage: "evaluate".into(),
            source: StageError::from(ConfigError::MissingPrompt("cv_review".into())),
        };
        let text = describe_error(&err);
        assert!(text.starts_with("Stage evaluate failed"), "{text}");
        assert!(text.contains("caused by"), "{text}");
        assert!(text.contains("cv_review"), "{text}");
    }
}
