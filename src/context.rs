//! Per-run context: stored settings and prompt templates resolved once.
//!
//! A `RunContext` is built at the start of every run and handed to each
//! stage. Nothing is cached across runs, so a settings change takes effect
//! on the next run and never in the middle of one.

use std::collections::HashMap;

use chrono::{DateTime, Local};

use crate::config::{PERSISTED_DEFAULTS, keys};
use crate::error::{ConfigError, DatabaseError};
use crate::notify::split_addresses;
use crate::source::parse_labels;
use crate::store::Database;

#[derive(Debug, Clone)]
pub struct RunContext {
    started_at: DateTime<Local>,
    config: HashMap<String, String>,
    prompts: HashMap<String, String>,
    operator_email: Option<String>,
}

impl RunContext {
    /// Load settings and prompts, persisting defaults for missing settings.
    pub async fn resolve(
        db: &dyn Database,
        operator_email: Option<String>,
        started_at: DateTime<Local>,
    ) -> Result<Self, DatabaseError> {
        let mut config = db.load_config().await?;
        let prompts = db.load_prompts().await?;

        for (key, default) in PERSISTED_DEFAULTS {
            let missing = config.get(*key).is_none_or(|v| v.trim().is_empty());
            if missing {
                db.put_config(key, default).await?;
                config.insert(key.to_string(), default.to_string());
                tracing::info!(key, "Persisted default setting");
            }
        }

        tracing::debug!(
            settings = config.len(),
            prompts = prompts.len(),
            "Run context resolved"
        );
        Ok(Self {
            started_at,
            config,
            prompts,
            operator_email,
        })
    }

    /// Build a context from fixed maps, without touching storage.
    pub fn from_parts(
        config: HashMap<String, String>,
        prompts: HashMap<String, String>,
        operator_email: Option<String>,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            started_at,
            config,
            prompts,
            operator_email,
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Run date as stamped into `sent_at`.
    pub fn run_date(&self) -> String {
        self.started_at.format("%Y/%m/%d").to_string()
    }

    pub fn operator_email(&self) -> Option<&str> {
        self.operator_email.as_deref()
    }

    /// A non-blank setting.
    pub fn config(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn require_config(&self, key: &str, hint: &str) -> Result<&str, ConfigError> {
        self.config(key).ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        })
    }

    /// A non-blank prompt template.
    pub fn prompt(&self, key: &str) -> Option<&str> {
        self.prompts
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn require_prompt(&self, key: &str) -> Result<&str, ConfigError> {
        self.prompt(key)
            .ok_or_else(|| ConfigError::MissingPrompt(key.to_string()))
    }

    // ── Typed settings ──────────────────────────────────────────────

    pub fn labels(&self) -> Vec<String> {
        self.config(keys::LABELS).map(parse_labels).unwrap_or_default()
    }

    pub fn lookback_days(&self) -> Result<Option<u32>, ConfigError> {
        self.config(keys::LOOKBACK_DAYS)
            .map(|v| {
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    key: keys::LOOKBACK_DAYS.into(),
                    message: format!("expected a whole number of days, got {v:?}"),
                })
            })
            .transpose()
    }

    pub fn send_invitations(&self) -> bool {
        self.config(keys::SEND_INVITATIONS)
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
    }

    pub fn rank_threshold(&self) -> Result<f64, ConfigError> {
        let raw = self
            .config(keys::RANK_THRESHOLD)
            .unwrap_or(crate::config::DEFAULT_RANK_THRESHOLD);
        raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: keys::RANK_THRESHOLD.into(),
            message: format!("expected a number, got {raw:?}"),
        })
    }

    /// Digest recipients: the operator first, then configured receivers.
    pub fn report_recipients(&self) -> Vec<String> {
        let mut all: Vec<String> = self.operator_email.iter().cloned().collect();
        if let Some(list) = self.config(keys::REPORT_RECEIVERS) {
            all.extend(split_addresses(list));
        }
        crate::notify::normalize_recipients(all)
    }
}
