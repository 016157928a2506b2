//! Reporting: one digest for every newly evaluated record, then stamp `sent_at`.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::artifacts::ArtifactRef;
use crate::config::keys;
use crate::context::RunContext;
use crate::error::{ConfigError, StageError};
use crate::pipeline::prompt::extract_report_block;
use crate::pipeline::types::{PipelineDeps, Stage, StageName, StageReport};
use crate::store::{Cell, Field, Record};

/// Shown in the digest for a field the evaluation did not contain.
pub const FIELD_NOT_FOUND: &str = "N/A";

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\*\*(?:候選人姓名|Candidate Name)\*\*[ \t]*[:：][ \t]*(.*?)[ \t]*$").unwrap()
});
static STRENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\*\*(?:核心優勢|Key Strengths)\*\*[ \t]*[:：][ \t]*(.*?)[ \t]*$").unwrap()
});
static CONCERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\*\*(?:潛在疑慮|Potential Concerns)\*\*[ \t]*[:：][ \t]*(.*?)[ \t]*$").unwrap()
});
static CONFIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*(?:推薦信心度|Confidence)\*\*[ \t]*[:：][ \t]*(.*?)[ \t]*/").unwrap()
});

/// Structured fields pulled from one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestEntry {
    pub name: Option<String>,
    pub strength: Option<String>,
    pub concern: Option<String>,
    pub confidence: Option<String>,
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DigestEntry {
    pub fn parse(evaluation: &str) -> Self {
        Self {
            name: capture(&NAME, evaluation),
            strength: capture(&STRENGTH, evaluation),
            concern: capture(&CONCERN, evaluation),
            confidence: capture(&CONFIDENCE, evaluation),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.strength.is_none()
            && self.concern.is_none()
            && self.confidence.is_none()
    }
}

/// A record that made it into the digest.
#[derive(Debug, Clone)]
pub struct DigestItem {
    pub row: i64,
    pub fallback_name: String,
    pub report_link: Option<String>,
    pub entry: DigestEntry,
}

/// Render the Markdown digest body.
pub fn render_digest(items: &[DigestItem], record_store_url: Option<&str>) -> String {
    let mut out = format!(
        "# Resume Evaluation Digest\n\n{} new resume evaluations:\n\n---\n\n",
        items.len()
    );
    for item in items {
        let entry = &item.entry;
        let name = entry.name.as_deref().unwrap_or(&item.fallback_name);
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| FIELD_NOT_FOUND.into());
        out.push_str(&format!("### {name}\n\n"));
        let confidence = match &entry.confidence {
            Some(score) => format!("{score}/10"),
            None => FIELD_NOT_FOUND.into(),
        };
        out.push_str(&format!("- **Confidence:** {confidence}\n"));
        out.push_str(&format!("- **Key strengths:** {}\n", field(&entry.strength)));
        out.push_str(&format!("- **Potential concerns:** {}\n", field(&entry.concern)));
        if let Some(link) = &item.report_link {
            out.push_str(&format!("- **Full report:** {link}\n"));
        }
        out.push_str("\n---\n\n");
    }
    if let Some(url) = record_store_url {
        out.push_str(&format!("All records: {url}\n"));
    }
    out
}

pub fn digest_subject(ctx: &RunContext) -> String {
    format!(
        "Resume evaluation digest - {}",
        ctx.started_at().format("%Y/%m/%d %H:%M")
    )
}

pub struct ReportStage {
    deps: PipelineDeps,
}

impl ReportStage {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Reopen the stored summary prompt and parse the evaluation inside it.
    async fn digest_item(&self, record: &Record, source: &ArtifactRef) -> Option<DigestItem> {
        let artifact = match self.deps.artifacts.read(source).await {
            Ok(a) => a,
            Err(e) => {
                warn!(row = record.row, name = %record.name, error = %e, "Cannot read summary prompt, skipping");
                return None;
            }
        };
        let Some(evaluation) = extract_report_block(&artifact.content) else {
            warn!(row = record.row, name = %record.name, "Summary prompt has no report block, skipping");
            return None;
        };
        let entry = DigestEntry::parse(evaluation);
        if entry.is_empty() {
            warn!(row = record.row, name = %record.name, "No digest fields found in evaluation, skipping");
            return None;
        }
        Some(DigestItem {
            row: record.row,
            fallback_name: record.name.clone(),
            report_link: record.cell(Field::FullReportRef).done().map(str::to_string),
            entry,
        })
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn name(&self) -> StageName {
        StageName::Report
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(self.name());
        self.deps.db.ensure_field(Field::SentAt).await?;

        let mut items = Vec::new();
        for record in self.deps.db.read_records().await? {
            if record.cell(Field::EvaluationSummary).done().is_none()
                || !record.cell(Field::SentAt).is_pending()
            {
                continue;
            }
            let Some(source) = record
                .cell(Field::SummaryPromptRef)
                .done()
                .and_then(ArtifactRef::parse)
            else {
                continue;
            };
            report.eligible += 1;

            match self.digest_item(&record, &source).await {
                Some(item) => items.push(item),
                None => report.skipped += 1,
            }
        }

        if items.is_empty() {
            info!("No newly evaluated records to report");
            report.log();
            return Ok(report);
        }

        let recipients = ctx.report_recipients();
        if recipients.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: keys::REPORT_RECEIVERS.into(),
                hint: "Set digest recipients or CV_INTAKE_OPERATOR_EMAIL".into(),
            }
            .into());
        }

        let body = render_digest(&items, ctx.config(keys::RECORD_STORE_URL));
        self.deps
            .notifier
            .send(&recipients, &digest_subject(ctx), &body)
            .await?;
        info!(
            records = items.len(),
            recipients = recipients.len(),
            "Evaluation digest sent"
        );

        let stamp = Cell::Done(ctx.run_date());
        for item in &items {
            self.deps.db.set_cell(item.row, Field::SentAt, &stamp).await?;
        }
        report.succeeded = items.len();
        report.log();
        Ok(report)
    }
}
