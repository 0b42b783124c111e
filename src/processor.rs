//! Batch processing: every observed message against every enabled rule
//!
//! The processor is the only writer of rule statistics and of the performance
//! history. A failure while applying one rule's actions to one message is
//! logged and the loop moves on to the next pair.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::actions::{LabelCache, RemoteClient};
use crate::auth::{Credential, CredentialProvider};
use crate::error::Result;
use crate::matcher::CompiledRule;
use crate::models::{Message, Rule, RunSummary};
use crate::stats::StatsRecorder;
use crate::storage::Store;

pub struct BatchProcessor {
    store: Store,
    remote: RemoteClient,
    credentials: Arc<dyn CredentialProvider>,
    stats: StatsRecorder,
}

impl BatchProcessor {
    pub fn new(store: Store, remote: RemoteClient, credentials: Arc<dyn CredentialProvider>) -> Self {
        let stats = StatsRecorder::new(store.clone());
        Self {
            store,
            remote,
            credentials,
            stats,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    /// Run the match/act loop over one batch
    ///
    /// Updates `stats` of matching rules in place. Patterns are compiled once
    /// per batch; a rule whose patterns do not compile never matches.
    pub async fn run_batch(
        &self,
        messages: &[Message],
        rules: &mut [Rule],
        credential: &Credential,
    ) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary {
            emails: messages.len(),
            rules: rules.len(),
            ..Default::default()
        };

        let compiled: Vec<Option<CompiledRule>> = rules
            .iter()
            .map(|rule| {
                if !rule.enabled {
                    return None;
                }
                CompiledRule::compile(rule)
                    .map_err(|e| debug!(rule_id = %rule.id, "Rule treated as non-matching: {}", e))
                    .ok()
            })
            .collect();

        let mut labels = LabelCache::new();

        for message in messages {
            for (rule, compiled) in rules.iter_mut().zip(&compiled) {
                if !rule.enabled {
                    continue;
                }
                summary.match_checks += 1;

                let matched = compiled
                    .as_ref()
                    .map(|c| c.is_match(message))
                    .unwrap_or(false);
                if !matched {
                    continue;
                }

                summary.rule_matches += 1;
                rule.record_match(Utc::now());

                match self
                    .remote
                    .apply_actions(credential, &message.id, &rule.actions, &mut labels)
                    .await
                {
                    Ok(()) => {
                        summary.processed += 1;
                        info!(
                            message_id = %message.id,
                            rule_id = %rule.id,
                            "Applied rule '{}' to \"{}\"",
                            rule.name,
                            message.subject
                        );
                    }
                    Err(e) => {
                        warn!(
                            message_id = %message.id,
                            rule_id = %rule.id,
                            "Failed to apply rule '{}': {}",
                            rule.name,
                            e
                        );
                    }
                }
            }
        }

        summary.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        summary
    }

    /// Process a batch end to end: load rules, obtain a credential, run the
    /// loop, persist rule statistics and record a performance entry
    ///
    /// With no enabled rule this returns zero counts without asking for a
    /// credential. Without a credential it fails before any remote call.
    pub async fn process_messages(&self, messages: &[Message]) -> Result<RunSummary> {
        let mut rules = self.store.load_rules().await?;

        if !rules.iter().any(|r| r.enabled) {
            debug!("No enabled rules, skipping batch of {} message(s)", messages.len());
            return Ok(RunSummary {
                emails: messages.len(),
                rules: rules.len(),
                ..Default::default()
            });
        }

        let credential = self.credentials.get_credential().await?;

        let summary = self.run_batch(messages, &mut rules, &credential).await;

        if summary.rule_matches > 0 {
            if let Err(e) = self.store.save_rules(&rules).await {
                warn!("Failed to persist rule statistics: {}", e);
            }
        }

        self.stats.record(&summary).await;

        info!(
            emails = summary.emails,
            match_checks = summary.match_checks,
            rule_matches = summary.rule_matches,
            processed = summary.processed,
            duration_ms = summary.duration_ms,
            "Batch complete"
        );
        Ok(summary)
    }
}
