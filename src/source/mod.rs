//! Mail source: where candidate resumes come from.
//!
//! The pipeline only needs two things from a mailbox: a search that returns
//! descriptive metadata for matching messages, and a way to fetch one
//! message's body later by its stable identifier.

pub mod imap;

pub use imap::{ImapConfig, ImapMailSource};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::error::SourceError;

/// One message returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    /// Stable external key (the RFC 5322 Message-ID).
    pub identifier: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    /// Link that opens the message in the provider's web UI.
    pub permalink: String,
    pub sender: Option<String>,
}

/// A Gmail-style search over a date window and label filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub base: String,
    pub labels: Vec<String>,
    pub after: NaiveDate,
    pub before: NaiveDate,
}

impl SearchQuery {
    /// Render the provider search expression.
    ///
    /// One label renders as `label:x`, several as `label:{a OR b}`, none
    /// falls back to the inbox.
    pub fn raw(&self) -> String {
        let label_clause = match self.labels.as_slice() {
            [] => "label:INBOX".to_string(),
            [one] => format!("label:{}", label_token(one)),
            many => format!(
                "label:{{{}}}",
                many.iter()
                    .map(|l| label_token(l))
                    .collect::<Vec<_>>()
                    .join(" OR ")
            ),
        };
        format!(
            "{} {} after:{} before:{}",
            self.base.trim(),
            label_clause,
            self.after.format("%Y/%m/%d"),
            self.before.format("%Y/%m/%d")
        )
        .trim()
        .to_string()
    }
}

/// Gmail label search syntax uses `-` in place of spaces.
fn label_token(label: &str) -> String {
    label.trim().replace(' ', "-")
}

/// Split a comma-separated label setting.
pub fn parse_labels(setting: &str) -> Vec<String> {
    setting
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default search window: from the Monday of last week through tomorrow.
pub fn default_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let back = i64::from(today.weekday().num_days_from_sunday()) + 6;
    (today - Duration::days(back), today + Duration::days(1))
}

/// Search window covering the last `days` days through tomorrow.
pub fn lookback_window(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    (
        today - Duration::days(i64::from(days)),
        today + Duration::days(1),
    )
}

/// A mailbox the pipeline can ingest from.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Find candidate messages, oldest first.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SourceItem>, SourceError>;

    /// Fetch the full body (HTML when available) of one message.
    async fn fetch_body(&self, identifier: &str) -> Result<String, SourceError>;
}
