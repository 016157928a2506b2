//! Field registry for resume records.
//!
//! Every mutable column of a record is a variant of [`Field`]. The set is
//! fixed at compile time and registered in the `fields` table by
//! migrations; adding a field means adding a variant plus a migration row.

use std::fmt;
use std::str::FromStr;

/// A mutable, stage-owned field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    ArchiveRef,
    ConvertedRef,
    Email,
    Phone,
    Code,
    PromptRef,
    SummaryPromptRef,
    EvaluationSummary,
    FullReportRef,
    InvitationSentAt,
    SentAt,
}

impl Field {
    /// All fields in registry order.
    pub const ALL: [Field; 11] = [
        Field::ArchiveRef,
        Field::ConvertedRef,
        Field::Email,
        Field::Phone,
        Field::Code,
        Field::PromptRef,
        Field::SummaryPromptRef,
        Field::EvaluationSummary,
        Field::FullReportRef,
        Field::InvitationSentAt,
        Field::SentAt,
    ];

    /// The fields filled by the extraction stage.
    pub const EXTRACTED: [Field; 3] = [Field::Email, Field::Phone, Field::Code];

    /// Stable storage key.
    pub fn key(&self) -> &'static str {
        match self {
            Field::ArchiveRef => "archive_ref",
            Field::ConvertedRef => "converted_ref",
            Field::Email => "email",
            Field::Phone => "phone",
            Field::Code => "code",
            Field::PromptRef => "prompt_ref",
            Field::SummaryPromptRef => "summary_prompt_ref",
            Field::EvaluationSummary => "evaluation_summary",
            Field::FullReportRef => "full_report_ref",
            Field::InvitationSentAt => "invitation_sent_at",
            Field::SentAt => "sent_at",
        }
    }

    /// Human-readable column header.
    pub fn header(&self) -> &'static str {
        match self {
            Field::ArchiveRef => "Raw Resume",
            Field::ConvertedRef => "Markdown Resume",
            Field::Email => "Email",
            Field::Phone => "Phone",
            Field::Code => "Applicant Code",
            Field::PromptRef => "Evaluation Prompt",
            Field::SummaryPromptRef => "Summary Prompt",
            Field::EvaluationSummary => "AI Evaluation Summary",
            Field::FullReportRef => "Full Evaluation Report",
            Field::InvitationSentAt => "Invitation Sent",
            Field::SentAt => "Sent",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.key() == s)
            .ok_or_else(|| format!("unknown field: {s}"))
    }
}
