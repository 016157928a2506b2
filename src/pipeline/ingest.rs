//! Ingestion: search the mailbox and append one record per unseen message.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::keys;
use crate::context::RunContext;
use crate::error::StageError;
use crate::pipeline::rules::NameRules;
use crate::pipeline::types::{PipelineDeps, Stage, StageName, StageReport};
use crate::source::{SearchQuery, default_window, lookback_window};
use crate::store::NewRecord;

pub struct IngestStage {
    deps: PipelineDeps,
    rules: NameRules,
}

impl IngestStage {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            rules: NameRules::default_rules(),
        }
    }

    pub fn with_rules(mut self, rules: NameRules) -> Self {
        self.rules = rules;
        self
    }

    fn build_query(&self, ctx: &RunContext) -> Result<SearchQuery, StageError> {
        let base = ctx.require_config(
            keys::SEARCH_QUERY,
            "Set the mailbox search expression, e.g. `subject:履歷`",
        )?;
        let today = ctx.started_at().date_naive();
        let (after, before) = match ctx.lookback_days()? {
            Some(days) => lookback_window(today, days),
            None => default_window(today),
        };
        Ok(SearchQuery {
            base: base.to_string(),
            labels: ctx.labels(),
            after,
            before,
        })
    }
}

#[async_trait]
impl Stage for IngestStage {
    fn name(&self) -> StageName {
        StageName::Ingest
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(self.name());
        let query = self.build_query(ctx)?;
        let items = self.deps.source.search(&query).await?;
        let seen = self.deps.db.seen_identifiers().await?;

        let mut batch_ids = HashSet::new();
        let mut new_records = Vec::new();
        for item in items {
            if seen.contains(&item.identifier) || !batch_ids.insert(item.identifier.clone()) {
                debug!(identifier = %item.identifier, "Already ingested, skipping");
                continue;
            }
            let name = self.rules.name_or_sentinel(&item.subject);
            info!(identifier = %item.identifier, name = %name, "New resume found");
            new_records.push(NewRecord {
                identifier: item.identifier,
                name,
                subject: item.subject,
                received_at: item.received_at,
                source_link: item.permalink,
                sender: item.sender,
            });
        }

        report.eligible = new_records.len();
        if new_records.is_empty() {
            report.log();
            return Ok(report);
        }

        let appended = self.deps.db.append_records(&new_records).await?;
        let ids: Vec<String> = new_records.into_iter().map(|r| r.identifier).collect();
        self.deps.db.merge_seen(&ids).await?;

        report.succeeded = appended;
        report.skipped = ids.len() - appended;
        report.log();
        Ok(report)
    }
}
