//! End-to-end tests for the resume pipeline.
//!
//! Every collaborator except the record store and the artifact store is
//! replaced by an in-process fake: the mailbox serves canned messages, the
//! LLM answers by prompt shape, and the notifier records what it was asked
//! to send. The store is a real in-memory libSQL database wrapped to count
//! writes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Local, Utc};
use tempfile::TempDir;

use cv_intake::artifacts::{ArtifactRef, ArtifactStore, FsArtifactStore};
use cv_intake::config::{keys, prompt_keys};
use cv_intake::error::{DatabaseError, LlmError, NotifyError, PipelineError, SourceError};
use cv_intake::llm::{CompletionRequest, CompletionResponse, LlmProvider};
use cv_intake::notify::Notifier;
use cv_intake::pipeline::convert::CONVERSION_FAILED;
use cv_intake::pipeline::orchestrator::ALERT_SUBJECT;
use cv_intake::pipeline::{Pipeline, PipelineDeps, StageName};
use cv_intake::source::{MailSource, SearchQuery, SourceItem};
use cv_intake::store::{Cell, Database, Field, LibSqlBackend, NewRecord, Record};

const OPERATOR: &str = "ops@example.com";
const SUMMARY: &str = "Strong candidate. **推薦信心度**：8/10";
const REVIEW_TEMPLATE: &str =
    "REVIEW\nJD: {{job_description}}\nBENCH: {{benchmark_cv}}\nCANDIDATE:\n{{candidate}}";
const SUMMARY_TEMPLATE: &str = "SUMMARIZE\n<report>\n{{report}}\n</report>";

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeMailbox {
    items: Mutex<Vec<SourceItem>>,
    bodies: Mutex<HashMap<String, String>>,
    broken: Mutex<HashSet<String>>,
    fetches: AtomicUsize,
}

impl FakeMailbox {
    /// Add a message whose HTML body wraps `markdown`.
    fn deliver(&self, id: &str, subject: &str, markdown: &str) {
        self.items.lock().unwrap().push(SourceItem {
            identifier: id.to_string(),
            subject: subject.to_string(),
            received_at: Utc::now(),
            permalink: format!("https://mail.example.com/#all/{id}"),
            sender: Some(format!("candidate{id}@example.com")),
        });
        self.bodies
            .lock()
            .unwrap()
            .insert(id.to_string(), format!("<html>\n{markdown}\n</html>"));
    }

    fn break_fetch(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl MailSource for FakeMailbox {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SourceItem>, SourceError> {
        Ok(self.items.lock().unwrap().clone())
    }

    async fn fetch_body(&self, identifier: &str) -> Result<String, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().unwrap().contains(identifier) {
            return Err(SourceError::Command {
                command: "FETCH".into(),
                reason: "connection reset".into(),
            });
        }
        self.bodies
            .lock()
            .unwrap()
            .get(identifier)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(identifier.to_string()))
    }
}

/// Answers conversion, review and summary prompts with fixed shapes.
#[derive(Default)]
struct ScriptedLlm {
    failing_reviews: AtomicUsize,
    /// Conversion answers become upstream error reports.
    conversion_errors: AtomicBool,
    /// Review answers carry none of the digest labels.
    unlabelled_reviews: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn answer(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.starts_with("REVIEW") {
            if self
                .failing_reviews
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "503 Service Unavailable".into(),
                });
            }
            if self.unlabelled_reviews.load(Ordering::SeqCst) {
                return Ok("The candidate seems fine overall.".to_string());
            }
            let candidate = prompt.split_once("CANDIDATE:\n").map(|(_, c)| c).unwrap_or("");
            let name = candidate
                .lines()
                .find_map(|l| l.strip_prefix("# "))
                .unwrap_or("unknown");
            return Ok(format!(
                "**候選人姓名**：{name}\n**核心優勢**：Rust services\n\
                 **潛在疑慮**：Short tenure\n**推薦信心度**：8/10\n"
            ));
        }
        if prompt.starts_with("SUMMARIZE") {
            return Ok(SUMMARY.to_string());
        }
        if self.conversion_errors.load(Ordering::SeqCst) {
            return Ok("API error: quota exceeded".to_string());
        }
        // Conversion: echo the HTML body back as fenced Markdown.
        let start = prompt.find("<html>\n").map(|i| i + 7).unwrap_or(0);
        let end = prompt.rfind("\n</html>").unwrap_or(prompt.len());
        Ok(format!("```markdown\n{}\n```", &prompt[start..end]))
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = &request.prompt;
        Ok(CompletionResponse {
            content: self.answer(prompt)?,
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

#[derive(Debug, Clone)]
struct SentMail {
    recipients: Vec<String>,
    subject: String,
    body: String,
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(SentMail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// libSQL store that counts record, cell and ledger writes.
struct CountingDb {
    inner: LibSqlBackend,
    writes: AtomicUsize,
}

impl CountingDb {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Database for CountingDb {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn read_records(&self) -> Result<Vec<Record>, DatabaseError> {
        self.inner.read_records().await
    }

    async fn append_records(&self, records: &[NewRecord]) -> Result<usize, DatabaseError> {
        self.bump();
        self.inner.append_records(records).await
    }

    async fn set_cell(&self, row: i64, field: Field, cell: &Cell) -> Result<(), DatabaseError> {
        self.bump();
        self.inner.set_cell(row, field, cell).await
    }

    async fn ensure_field(&self, field: Field) -> Result<usize, DatabaseError> {
        self.inner.ensure_field(field).await
    }

    async fn seen_identifiers(&self) -> Result<HashSet<String>, DatabaseError> {
        self.inner.seen_identifiers().await
    }

    async fn merge_seen(&self, identifiers: &[String]) -> Result<(), DatabaseError> {
        self.bump();
        self.inner.merge_seen(identifiers).await
    }

    async fn remove_seen(&self, identifier: &str) -> Result<bool, DatabaseError> {
        self.inner.remove_seen(identifier).await
    }

    async fn clear_seen(&self) -> Result<usize, DatabaseError> {
        self.inner.clear_seen().await
    }

    async fn load_config(&self) -> Result<HashMap<String, String>, DatabaseError> {
        self.inner.load_config().await
    }

    async fn put_config(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.inner.put_config(key, value).await
    }

    async fn load_prompts(&self) -> Result<HashMap<String, String>, DatabaseError> {
        self.inner.load_prompts().await
    }

    async fn put_prompt(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.inner.put_prompt(key, value).await
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    db: Arc<CountingDb>,
    mailbox: Arc<FakeMailbox>,
    llm: Arc<ScriptedLlm>,
    notifier: Arc<RecordingNotifier>,
    artifacts: Arc<FsArtifactStore>,
    pipeline: Pipeline,
    _dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(CountingDb {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            writes: AtomicUsize::new(0),
        });
        db.put_config(keys::SEARCH_QUERY, "subject:履歷").await.unwrap();
        db.put_config(keys::JOB_DESCRIPTION, "Senior Rust engineer").await.unwrap();
        db.put_config(keys::BENCHMARK_CV, "Ten years of systems work").await.unwrap();
        db.put_config(keys::REPORT_RECEIVERS, "hr@example.com; OPS@example.com")
            .await
            .unwrap();
        db.put_prompt(prompt_keys::CV_REVIEW, REVIEW_TEMPLATE).await.unwrap();
        db.put_prompt(prompt_keys::REVIEW_SUMMARY, SUMMARY_TEMPLATE).await.unwrap();

        let mailbox = Arc::new(FakeMailbox::default());
        let llm = Arc::new(ScriptedLlm::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let artifacts = Arc::new(FsArtifactStore::new(dir.path()));

        let deps = PipelineDeps {
            db: db.clone(),
            artifacts: artifacts.clone(),
            source: mailbox.clone(),
            llm: llm.clone(),
            notifier: notifier.clone(),
        };
        let pipeline = Pipeline::new(deps, Some(OPERATOR.to_string()));

        Self {
            db,
            mailbox,
            llm,
            notifier,
            artifacts,
            pipeline,
            _dir: dir,
        }
    }

    async fn records(&self) -> Vec<Record> {
        self.db.read_records().await.unwrap()
    }

    async fn record(&self, id: &str) -> Record {
        self.records()
            .await
            .into_iter()
            .find(|r| r.identifier == id)
            .unwrap_or_else(|| panic!("no record {id}"))
    }

    async fn artifact_text(&self, cell: &Cell) -> String {
        let reference = ArtifactRef::parse(cell.done().expect("cell is done")).unwrap();
        self.artifacts.read(&reference).await.unwrap().content
    }
}

fn today() -> String {
    Local::now().format("%Y/%m/%d").to_string()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn example_resume_runs_through_every_stage() {
    let h = Harness::new().await;
    h.mailbox
        .deliver("42", "王小明履歷表 - 工程師", "# 王小明\nEmail: wang@example.com");

    let summary = h.pipeline.run_daily().await.unwrap();
    assert!(summary.report(StageName::Invite).is_none());
    assert_eq!(summary.report(StageName::Report).unwrap().succeeded, 1);

    let record = h.record("42").await;
    assert_eq!(record.name, "王小明");
    assert!(record.cell(Field::ArchiveRef).done().is_some());
    assert!(record.cell(Field::ConvertedRef).done().is_some());
    assert_eq!(
        record.cell(Field::Email),
        &Cell::Done("wang@example.com".into())
    );
    assert_eq!(record.cell(Field::Phone), &Cell::NotFound);
    assert_eq!(record.cell(Field::Code), &Cell::NotFound);
    assert_eq!(record.cell(Field::EvaluationSummary), &Cell::Done(SUMMARY.into()));
    assert!(record.cell(Field::PromptRef).done().is_some());
    assert!(record.cell(Field::FullReportRef).done().is_some());
    assert_eq!(record.cell(Field::SentAt), &Cell::Done(today()));

    let raw = h.artifact_text(record.cell(Field::ArchiveRef)).await;
    assert!(raw.starts_with("<html>"));

    let prompt = h.artifact_text(record.cell(Field::PromptRef)).await;
    assert!(prompt.contains("Senior Rust engineer"));
    assert!(prompt.contains("# 王小明"));

    let full = h.artifact_text(record.cell(Field::FullReportRef)).await;
    assert!(full.contains("# Candidate Resume"));
    assert!(full.contains("**核心優勢**：Rust services"));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec![OPERATOR, "hr@example.com"]);
    assert!(sent[0].subject.starts_with("Resume evaluation digest - "));
    assert!(sent[0].body.contains("### 王小明"));
    assert!(sent[0].body.contains("8/10"));
}

#[tokio::test]
async fn fenced_conversion_is_stored_unfenced() {
    let h = Harness::new().await;
    let markdown = "# 陳大文\n\n## Experience\n- Acme, 2020-2024";
    h.mailbox.deliver("7", "陳大文履歷表", markdown);

    for stage in [StageName::Ingest, StageName::Archive, StageName::Convert] {
        h.pipeline.run_stage(stage).await.unwrap();
    }

    let record = h.record("7").await;
    assert_eq!(h.artifact_text(record.cell(Field::ConvertedRef)).await, markdown);
}

#[tokio::test]
async fn second_run_writes_nothing() {
    let h = Harness::new().await;
    h.mailbox
        .deliver("42", "王小明履歷表 - 工程師", "# 王小明\nEmail: wang@example.com");

    h.pipeline.run_batch().await.unwrap();
    let writes = h.db.writes();
    let llm_calls = h.llm.calls.load(Ordering::SeqCst);
    assert!(writes > 0);

    let summary = h.pipeline.run_batch().await.unwrap();
    assert_eq!(h.db.writes(), writes);
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), llm_calls);
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(summary.reports.iter().all(|r| r.is_noop()), "{summary:?}");
}

#[tokio::test]
async fn ledger_prevents_duplicate_records() {
    let h = Harness::new().await;
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明");
    // The same message returned twice in one search.
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明");

    h.pipeline.run_stage(StageName::Ingest).await.unwrap();
    h.pipeline.run_stage(StageName::Ingest).await.unwrap();
    assert_eq!(h.records().await.len(), 1);

    // Forgetting the identifier does not duplicate the existing record.
    assert!(h.db.remove_seen("42").await.unwrap());
    let report = h.pipeline.run_stage(StageName::Ingest).await.unwrap();
    assert_eq!(report.succeeded, 0);
    assert_eq!(h.records().await.len(), 1);
    assert!(h.db.seen_identifiers().await.unwrap().contains("42"));
}

#[tokio::test]
async fn archive_failure_is_permanent() {
    let h = Harness::new().await;
    h.mailbox.deliver("13", "林美麗履歷表", "# 林美麗");
    h.mailbox.break_fetch("13");

    h.pipeline.run_batch().await.unwrap();
    h.pipeline.run_batch().await.unwrap();

    let record = h.record("13").await;
    assert!(matches!(record.cell(Field::ArchiveRef), Cell::Failed(reason) if reason.starts_with("archival failed")));
    assert!(record.cell(Field::ConvertedRef).is_pending());
    assert_eq!(h.mailbox.fetches.load(Ordering::SeqCst), 1);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn evaluation_failure_is_retried_next_run() {
    let h = Harness::new().await;
    h.llm.failing_reviews.store(1, Ordering::SeqCst);
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明\nEmail: wang@example.com");

    h.pipeline.run_batch().await.unwrap();
    let record = h.record("42").await;
    assert!(matches!(record.cell(Field::EvaluationSummary), Cell::Failed(reason) if reason.contains("503")));
    assert!(record.cell(Field::FullReportRef).is_pending());
    assert!(h.notifier.sent().is_empty());

    h.pipeline.run_batch().await.unwrap();
    let record = h.record("42").await;
    assert!(record.cell(Field::FullReportRef).done().is_some());
    assert_eq!(record.cell(Field::EvaluationSummary), &Cell::Done(SUMMARY.into()));
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn digest_includes_only_unsent_records() {
    let h = Harness::new().await;
    h.mailbox.deliver("1", "王小明履歷表", "# 王小明");
    h.pipeline.run_batch().await.unwrap();
    let first = h.record("1").await;

    h.mailbox.deliver("2", "陳大文履歷表", "# 陳大文");
    h.mailbox.deliver("3", "林美麗履歷表", "# 林美麗");
    h.mailbox.deliver("4", "張志豪履歷表", "# 張志豪");
    h.pipeline.run_batch().await.unwrap();

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 2);
    let digest = &sent[1].body;
    assert!(digest.contains("3 new resume evaluations"));
    for name in ["陳大文", "林美麗", "張志豪"] {
        assert!(digest.contains(&format!("### {name}")), "{digest}");
    }
    assert!(!digest.contains("王小明"));

    for id in ["2", "3", "4"] {
        assert_eq!(h.record(id).await.cell(Field::SentAt), &Cell::Done(today()));
    }
    assert_eq!(h.record("1").await.cell(Field::SentAt), first.cell(Field::SentAt));
}

#[tokio::test]
async fn empty_report_stage_is_a_noop() {
    let h = Harness::new().await;

    let report = h.pipeline.run_stage(StageName::Report).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(h.db.writes(), 0);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn stage_error_aborts_run_and_alerts_operator() {
    let h = Harness::new().await;
    h.db.put_prompt(prompt_keys::CV_REVIEW, "").await.unwrap();
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明\nEmail: wang@example.com");

    let err = h.pipeline.run_daily().await.unwrap_err();
    assert!(matches!(&err, PipelineError::Stage { stage, .. } if stage == "evaluate"));

    // Earlier stages keep their work; later ones never ran.
    let record = h.record("42").await;
    assert!(record.cell(Field::ConvertedRef).done().is_some());
    assert!(record.cell(Field::Email).done().is_some());
    assert!(record.cell(Field::EvaluationSummary).is_pending());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, ALERT_SUBJECT);
    assert_eq!(sent[0].recipients, vec![OPERATOR]);
    assert!(sent[0].body.contains("cv_review"));
}

#[tokio::test]
async fn invitations_go_to_high_scorers_once() {
    let h = Harness::new().await;
    h.db.put_config(keys::SEND_INVITATIONS, "true").await.unwrap();
    h.db.put_config(keys::INVITATION_SUBJECT, "Interview at Acme").await.unwrap();
    h.db.put_config(keys::INVITATION_BODY, "Hi {{name}}, please join us.")
        .await
        .unwrap();
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明");

    h.pipeline.run_batch().await.unwrap();
    h.pipeline.run_batch().await.unwrap();

    let sent = h.notifier.sent();
    let invitations: Vec<_> = sent
        .iter()
        .filter(|m| m.subject == "Interview at Acme")
        .collect();
    assert_eq!(invitations.len(), 1);
    assert_eq!(invitations[0].recipients, vec!["candidate42@example.com"]);
    assert_eq!(invitations[0].body, "Hi 王小明, please join us.");
    assert!(
        h.record("42")
            .await
            .cell(Field::InvitationSentAt)
            .done()
            .is_some()
    );
}

#[tokio::test]
async fn placeholder_invitation_templates_send_nothing() {
    let h = Harness::new().await;
    h.db.put_config(keys::SEND_INVITATIONS, "true").await.unwrap();
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明");

    h.pipeline.run_batch().await.unwrap();

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1, "only the digest is sent");
    assert!(h.record("42").await.cell(Field::InvitationSentAt).is_pending());
}

#[tokio::test]
async fn conversion_failure_is_terminal() {
    let h = Harness::new().await;
    h.llm.conversion_errors.store(true, Ordering::SeqCst);
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明");

    let summary = h.pipeline.run_batch().await.unwrap();
    assert_eq!(summary.report(StageName::Convert).unwrap().failed, 1);
    let record = h.record("42").await;
    assert_eq!(
        record.cell(Field::ConvertedRef),
        &Cell::Failed(CONVERSION_FAILED.into())
    );
    assert!(record.cell(Field::Email).is_pending());
    assert!(record.cell(Field::EvaluationSummary).is_pending());

    // A healthy model on the next run does not bring the record back.
    h.llm.conversion_errors.store(false, Ordering::SeqCst);
    let calls = h.llm.calls.load(Ordering::SeqCst);
    let writes = h.db.writes();
    h.pipeline.run_batch().await.unwrap();
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), calls);
    assert_eq!(h.db.writes(), writes);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn extraction_load_failure_marks_email_only() {
    let h = Harness::new().await;
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明\nEmail: wang@example.com");
    for stage in [StageName::Ingest, StageName::Archive] {
        h.pipeline.run_stage(stage).await.unwrap();
    }
    let row = h.record("42").await.row;
    let missing = format!("artifact://{}", "0".repeat(32));
    h.db.set_cell(row, Field::ConvertedRef, &Cell::Done(missing))
        .await
        .unwrap();

    let report = h.pipeline.run_stage(StageName::Extract).await.unwrap();
    assert_eq!(report.failed, 1);
    let record = h.record("42").await;
    assert!(matches!(record.cell(Field::Email), Cell::Failed(reason) if reason.starts_with("extraction failed")));
    assert!(record.cell(Field::Phone).is_pending());
    assert!(record.cell(Field::Code).is_pending());

    // Email is no longer pending, so a retry logs but writes nothing.
    let writes = h.db.writes();
    h.pipeline.run_stage(StageName::Extract).await.unwrap();
    assert_eq!(h.db.writes(), writes);
    assert!(matches!(h.record("42").await.cell(Field::Email), Cell::Failed(_)));
}

#[tokio::test]
async fn extraction_load_failure_keeps_extracted_phone() {
    let h = Harness::new().await;
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明");
    for stage in [StageName::Ingest, StageName::Archive] {
        h.pipeline.run_stage(stage).await.unwrap();
    }
    let row = h.record("42").await.row;
    h.db.set_cell(row, Field::Phone, &Cell::Done("0912345678".into()))
        .await
        .unwrap();
    let missing = format!("artifact://{}", "0".repeat(32));
    h.db.set_cell(row, Field::ConvertedRef, &Cell::Done(missing))
        .await
        .unwrap();

    let writes = h.db.writes();
    h.pipeline.run_stage(StageName::Extract).await.unwrap();
    assert_eq!(h.db.writes(), writes);
    assert!(h.record("42").await.cell(Field::Email).is_pending());
}

#[tokio::test]
async fn summary_prompt_without_report_block_is_not_reported() {
    let h = Harness::new().await;
    // Field labels in the template itself must not leak into the digest.
    h.db.put_prompt(
        prompt_keys::REVIEW_SUMMARY,
        "SUMMARIZE using **候選人姓名**：<name>\n{{report}}",
    )
    .await
    .unwrap();
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明");

    let summary = h.pipeline.run_batch().await.unwrap();
    let report = summary.report(StageName::Report).unwrap();
    assert_eq!(report.eligible, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.succeeded, 0);
    assert!(h.notifier.sent().is_empty());
    assert!(h.record("42").await.cell(Field::SentAt).is_pending());
}

#[tokio::test]
async fn evaluation_without_digest_fields_is_not_reported() {
    let h = Harness::new().await;
    h.llm.unlabelled_reviews.store(true, Ordering::SeqCst);
    h.mailbox.deliver("42", "王小明履歷表", "# 王小明");

    let summary = h.pipeline.run_batch().await.unwrap();
    assert!(h.record("42").await.cell(Field::EvaluationSummary).done().is_some());
    assert_eq!(summary.report(StageName::Report).unwrap().skipped, 1);
    assert!(h.notifier.sent().is_empty());

    // Still pending, so a later run looks at it again.
    h.pipeline.run_batch().await.unwrap();
    assert!(h.record("42").await.cell(Field::SentAt).is_pending());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn long_cjk_subject_is_archived_and_evaluated() {
    let h = Harness::new().await;
    let subject = format!(
        "王小明履歷表 {}",
        "【104自訂配對人選】資深軟體工程師應徵者履歷表".repeat(4)
    );
    h.mailbox
        .deliver("<CAF=abc123@mail.gmail.com>", &subject, "# 王小明\nEmail: wang@example.com");

    h.pipeline.run_batch().await.unwrap();

    let record = h.record("<CAF=abc123@mail.gmail.com>").await;
    assert!(record.cell(Field::ArchiveRef).done().is_some());
    assert!(record.cell(Field::ConvertedRef).done().is_some());
    assert!(record.cell(Field::SummaryPromptRef).done().is_some());
    assert!(record.cell(Field::FullReportRef).done().is_some());
    assert_eq!(record.cell(Field::SentAt), &Cell::Done(today()));
}
