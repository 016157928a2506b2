//! Process configuration and the names of stored settings.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::notify::SmtpConfig;
use crate::source::ImapConfig;

/// Keys of operational settings held in the `config` table.
pub mod keys {
    pub const SEARCH_QUERY: &str = "GMAIL_SEARCH_QUERY";
    pub const LABELS: &str = "GMAIL_LABEL_NAME";
    pub const LOOKBACK_DAYS: &str = "SEARCH_LOOKBACK_DAYS";
    pub const JOB_DESCRIPTION: &str = "JOB_DESCRIPTION";
    pub const BENCHMARK_CV: &str = "BENCHMARK_CV";
    pub const REPORT_RECEIVERS: &str = "CV_REPORT_RECEIVERS";
    pub const RECORD_STORE_URL: &str = "RECORD_STORE_URL";
    pub const SEND_INVITATIONS: &str = "SEND_INVITATIONS";
    pub const RANK_THRESHOLD: &str = "CV_RANK_THRESHOLD";
    pub const INVITATION_SUBJECT: &str = "INVITATION_EMAIL_SUBJECT";
    pub const INVITATION_BODY: &str = "INVITATION_EMAIL_BODY";
}

/// Keys of prompt templates held in the `prompts` table.
pub mod prompt_keys {
    pub const HTML_TO_MARKDOWN: &str = "html_to_markdown";
    pub const CV_REVIEW: &str = "cv_review";
    pub const REVIEW_SUMMARY: &str = "review_summary";
}

pub const DEFAULT_LABEL: &str = "INBOX";
pub const DEFAULT_RANK_THRESHOLD: &str = "8";
pub const DEFAULT_INVITATION_SUBJECT: &str = "Interview invitation from [Company Name]";
pub const DEFAULT_INVITATION_BODY: &str = "Dear {{name}},\n\n\
Thank you for applying to [Company Name]. We were impressed by your background \
and would like to invite you to an interview. Please reply with a few times \
that work for you over the coming week.\n\n\
Best regards,\n[Company Name] Recruiting";

/// Settings persisted on first use when absent.
pub const PERSISTED_DEFAULTS: &[(&str, &str)] = &[
    (keys::LABELS, DEFAULT_LABEL),
    (keys::SEND_INVITATIONS, "false"),
    (keys::RANK_THRESHOLD, DEFAULT_RANK_THRESHOLD),
    (keys::INVITATION_SUBJECT, DEFAULT_INVITATION_SUBJECT),
    (keys::INVITATION_BODY, DEFAULT_INVITATION_BODY),
];

/// Process-level configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub artifact_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub schedule: String,
    pub llm: Option<LlmConfig>,
    pub imap: Option<ImapConfig>,
    pub smtp: Option<SmtpConfig>,
    pub operator_email: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => {
            v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let schedule = env_or("CV_INTAKE_SCHEDULE", "0 0 7 * * *");
        cron::Schedule::from_str(&schedule).map_err(|e| ConfigError::InvalidValue {
            key: "CV_INTAKE_SCHEDULE".into(),
            message: e.to_string(),
        })?;

        let llm = match std::env::var("GEMINI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Some(LlmConfig {
                api_key: SecretString::from(key),
                model: env_or("CV_INTAKE_MODEL", "gemini-2.5-flash"),
                timeout: Duration::from_secs(env_parse("CV_INTAKE_LLM_TIMEOUT_SECS", 120u64)?),
                max_retries: env_parse("CV_INTAKE_LLM_MAX_RETRIES", 2u32)?,
            }),
            _ => None,
        };

        let smtp = SmtpConfig::from_env();
        let operator_email = std::env::var("CV_INTAKE_OPERATOR_EMAIL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| smtp.as_ref().map(|s| s.from_address.clone()))
            .filter(|v| !v.is_empty());

        Ok(Self {
            db_path: PathBuf::from(env_or("CV_INTAKE_DB_PATH", "./data/cv-intake.db")),
            artifact_dir: PathBuf::from(env_or("CV_INTAKE_ARTIFACT_DIR", "./data/artifacts")),
            log_dir: std::env::var("CV_INTAKE_LOG_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            schedule,
            llm,
            imap: ImapConfig::from_env(),
            smtp,
            operator_email,
        })
    }

    pub fn require_llm(&self) -> Result<&LlmConfig, ConfigError> {
        self.llm
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("GEMINI_API_KEY".into()))
    }

    pub fn require_imap(&self) -> Result<&ImapConfig, ConfigError> {
        self.imap
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))
    }

    pub fn require_smtp(&self) -> Result<&SmtpConfig, ConfigError> {
        self.smtp
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_SMTP_HOST".into()))
    }
}
