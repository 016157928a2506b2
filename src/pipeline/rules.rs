//! Subject-line rules for pulling the candidate's name.
//!
//! Rules are tried in order and the first one whose capture is non-empty
//! wins. Job boards format their notification subjects differently, so
//! each known format gets its own rule.

use regex::Regex;
use tracing::debug;

/// Stored as the name when no rule matches.
pub const UNPARSEABLE_NAME: &str = "(name not parsed)";

/// A single name rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct NameRule {
    /// Human-readable description of the subject format.
    pub label: String,
    /// Compiled regex; capture group 1 is the name.
    pub regex: Regex,
}

/// Ordered name-extraction rules.
pub struct NameRules {
    rules: Vec<NameRule>,
}

impl NameRules {
    /// Rules for the subject formats seen in practice.
    pub fn default_rules() -> Self {
        let rules = vec![
            // "王小明履歷表 - 工程師"
            NameRule {
                label: "<name>履歷表".into(),
                regex: Regex::new(r"^(.*?)履歷表").unwrap(),
            },
            // "【104應徵履歷】王小明(後端工程師)"
            NameRule {
                label: "】<name>(".into(),
                regex: Regex::new(r"】(.*?)\(").unwrap(),
            },
        ];
        Self { rules }
    }

    /// Add a custom rule at the end of the list.
    pub fn add_rule(&mut self, label: &str, pattern: &str) -> Result<(), regex::Error> {
        self.rules.push(NameRule {
            label: label.to_string(),
            regex: Regex::new(pattern)?,
        });
        Ok(())
    }

    /// Extract the candidate name from a subject line.
    pub fn extract(&self, subject: &str) -> Option<String> {
        for rule in &self.rules {
            let Some(name) = rule
                .regex
                .captures(subject)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim())
                .filter(|n| !n.is_empty())
            else {
                continue;
            };
            debug!(rule = %rule.label, name, "Name rule matched");
            return Some(name.to_string());
        }
        None
    }

    /// Like [`extract`](Self::extract), falling back to [`UNPARSEABLE_NAME`].
    pub fn name_or_sentinel(&self, subject: &str) -> String {
        self.extract(subject)
            .unwrap_or_else(|| UNPARSEABLE_NAME.to_string())
    }
}

impl Default for NameRules {
    fn default() -> Self {
        Self::default_rules()
    }
}
