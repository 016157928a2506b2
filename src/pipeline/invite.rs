//! Invitations: email high-scoring candidates an interview invitation.
//!
//! Only runs when `SEND_INVITATIONS` is enabled. Each record is invited at
//! most once; `invitation_sent_at` is the guard.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_INVITATION_BODY, DEFAULT_INVITATION_SUBJECT, keys};
use crate::context::RunContext;
use crate::error::StageError;
use crate::pipeline::prompt::fill;
use crate::pipeline::types::{PipelineDeps, Stage, StageName, StageReport};
use crate::store::{Cell, Field};

/// Placeholders that mean the templates were never customised.
pub const UNSET_COMPANY_MARKERS: &[&str] = &["[Company Name]", "[您的公司名稱]"];
pub const NAME_MARKERS: &[&str] = &["{{name}}", "{{應徵者姓名}}"];

static SCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:推薦信心度|Confidence)\**\s*[:：]\s*(\d+(?:\.\d+)?)").unwrap()
});

/// Confidence score stated in an evaluation summary.
pub fn parse_score(summary: &str) -> Option<f64> {
    SCORE
        .captures(summary)
        .and_then(|c| c[1].parse().ok())
}

pub struct InvitationStage {
    deps: PipelineDeps,
}

impl InvitationStage {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Stage for InvitationStage {
    fn name(&self) -> StageName {
        StageName::Invite
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(self.name());
        if !ctx.send_invitations() {
            debug!("Invitations disabled");
            return Ok(report);
        }
        self.deps.db.ensure_field(Field::InvitationSentAt).await?;

        let subject = ctx
            .config(keys::INVITATION_SUBJECT)
            .unwrap_or(DEFAULT_INVITATION_SUBJECT);
        let body = ctx
            .config(keys::INVITATION_BODY)
            .unwrap_or(DEFAULT_INVITATION_BODY);
        if UNSET_COMPANY_MARKERS
            .iter()
            .any(|m| subject.contains(m) || body.contains(m))
        {
            warn!("Invitation templates still contain the company placeholder, no invitations sent");
            return Ok(report);
        }
        let threshold = ctx.rank_threshold()?;

        for record in self.deps.db.read_records().await? {
            if !record.cell(Field::InvitationSentAt).is_pending() {
                continue;
            }
            let Some(summary) = record.cell(Field::EvaluationSummary).done() else {
                continue;
            };
            let Some(score) = parse_score(summary) else {
                debug!(row = record.row, "No confidence score in summary");
                continue;
            };
            if score < threshold {
                continue;
            }
            report.eligible += 1;

            let Some(sender) = record.sender.as_deref().filter(|s| !s.is_empty()) else {
                warn!(row = record.row, name = %record.name, "Candidate qualifies but has no reply address");
                report.skipped += 1;
                continue;
            };

            let mail_subject = fill(subject, NAME_MARKERS, &record.name);
            let mail_body = fill(body, NAME_MARKERS, &record.name);
            match self
                .deps
                .notifier
                .send(&[sender.to_string()], &mail_subject, &mail_body)
                .await
            {
                Ok(()) => {
                    self.deps
                        .db
                        .set_cell(
                            record.row,
                            Field::InvitationSentAt,
                            &Cell::Done(Utc::now().to_rfc3339()),
                        )
                        .await?;
                    info!(row = record.row, name = %record.name, score, "Invitation sent");
                    report.succeeded += 1;
                }
                Err(e) => {
                    error!(row = record.row, name = %record.name, error = %e, "Invitation failed");
                    self.deps
                        .db
                        .set_cell(
                            record.row,
                            Field::InvitationSentAt,
                            &Cell::Failed(format!("invitation failed: {e}")),
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
