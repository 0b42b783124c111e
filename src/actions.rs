//! Rule actions applied to one message through the Gmail API
//!
//! An [`ActionSet`] is translated into a fixed sequence of remote calls. Every
//! call goes through [`with_retry`], so transient server failures are absorbed
//! and anything else abandons the rest of the pipeline for that message.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::Credential;
use crate::client::{LabelInfo, MailApi, LABEL_IMPORTANT, LABEL_INBOX, LABEL_STARRED, LABEL_UNREAD};
use crate::error::{GmailError, Result};
use crate::models::ActionSet;
use crate::retry::{with_retry, RetryPolicy};

/// One step of the action pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStep {
    AddLabels,
    RemoveLabels,
    MarkAsRead,
    MarkAsImportant,
    Archive,
    Trash,
    Star,
}

impl ActionStep {
    /// Application order; later steps see the label state left by earlier ones
    pub const ORDER: [ActionStep; 7] = [
        ActionStep::AddLabels,
        ActionStep::RemoveLabels,
        ActionStep::MarkAsRead,
        ActionStep::MarkAsImportant,
        ActionStep::Archive,
        ActionStep::Trash,
        ActionStep::Star,
    ];

    /// Whether the action set asks for this step
    pub fn is_requested(&self, actions: &ActionSet) -> bool {
        match self {
            ActionStep::AddLabels => !actions.add_labels.is_empty(),
            ActionStep::RemoveLabels => !actions.remove_labels.is_empty(),
            ActionStep::MarkAsRead => actions.mark_as_read,
            ActionStep::MarkAsImportant => actions.mark_as_important,
            ActionStep::Archive => actions.archive,
            ActionStep::Trash => actions.trash,
            ActionStep::Star => actions.star,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionStep::AddLabels => "addLabels",
            ActionStep::RemoveLabels => "removeLabels",
            ActionStep::MarkAsRead => "markAsRead",
            ActionStep::MarkAsImportant => "markAsImportant",
            ActionStep::Archive => "archive",
            ActionStep::Trash => "trash",
            ActionStep::Star => "star",
        }
    }

    /// Requested steps of `actions`, in application order
    pub fn plan(actions: &ActionSet) -> Vec<ActionStep> {
        Self::ORDER
            .iter()
            .copied()
            .filter(|step| step.is_requested(actions))
            .collect()
    }
}

/// Label name to id mapping, scoped to one batch
///
/// Lookups are case-insensitive. The remote label list is fetched lazily the
/// first time a name has to be resolved.
#[derive(Debug, Default)]
pub struct LabelCache {
    by_name: Option<HashMap<String, String>>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.by_name.is_some()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.by_name
            .as_ref()
            .and_then(|m| m.get(&name.to_lowercase()))
            .map(String::as_str)
    }

    fn insert(&mut self, name: &str, id: String) {
        self.by_name
            .get_or_insert_with(HashMap::new)
            .insert(name.to_lowercase(), id);
    }

    fn replace(&mut self, labels: Vec<LabelInfo>) {
        self.by_name = Some(
            labels
                .into_iter()
                .map(|label| (label.name.to_lowercase(), label.id))
                .collect(),
        );
    }
}

/// Applies rule actions to messages, tolerating transient API failures
#[derive(Clone)]
pub struct RemoteClient {
    api: Arc<dyn MailApi>,
    retry: RetryPolicy,
}

impl RemoteClient {
    pub fn new(api: Arc<dyn MailApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    pub fn api(&self) -> &Arc<dyn MailApi> {
        &self.api
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn modify(
        &self,
        credential: &Credential,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        with_retry(&self.retry, "modify_message", || {
            self.api
                .modify_message(credential, message_id, add_label_ids, remove_label_ids)
        })
        .await
    }

    async fn refresh_labels(&self, credential: &Credential, cache: &mut LabelCache) -> Result<()> {
        let labels = with_retry(&self.retry, "list_labels", || self.api.list_labels(credential)).await?;
        debug!("Loaded {} labels", labels.len());
        cache.replace(labels);
        Ok(())
    }

    /// Resolve label names to ids, creating labels that do not exist yet
    ///
    /// A creation rejected with 409 means another run created the label in
    /// the meantime; the list is fetched again and the name looked up there.
    pub async fn resolve_label_ids(
        &self,
        credential: &Credential,
        names: &[String],
        cache: &mut LabelCache,
    ) -> Result<Vec<String>> {
        if !cache.is_loaded() {
            self.refresh_labels(credential, cache).await?;
        }

        let mut ids: Vec<String> = Vec::with_capacity(names.len());
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let id = match cache.get(name) {
                Some(id) => id.to_string(),
                None => self.create_label(credential, name, cache).await?,
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn create_label(
        &self,
        credential: &Credential,
        name: &str,
        cache: &mut LabelCache,
    ) -> Result<String> {
        match with_retry(&self.retry, "create_label", || self.api.create_label(credential, name)).await {
            Ok(label) => {
                info!("Created label '{}' ({})", name, label.id);
                cache.insert(name, label.id.clone());
                Ok(label.id)
            }
            Err(e) if matches!(e, GmailError::Conflict(_)) => {
                warn!("Label '{}' already exists remotely, reloading labels", name);
                self.refresh_labels(credential, cache).await?;
                cache.get(name).map(str::to_string).ok_or_else(|| {
                    GmailError::LabelError(format!(
                        "Label '{}' conflicts with an existing label but was not found",
                        name
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Add labels by name, creating missing ones
    pub async fn add_labels(
        &self,
        credential: &Credential,
        message_id: &str,
        names: &[String],
        cache: &mut LabelCache,
    ) -> Result<()> {
        let ids = self.resolve_label_ids(credential, names, cache).await?;
        if ids.is_empty() {
            return Ok(());
        }
        self.modify(credential, message_id, &ids, &[]).await
    }

    /// Remove labels by name
    pub async fn remove_labels(
        &self,
        credential: &Credential,
        message_id: &str,
        names: &[String],
        cache: &mut LabelCache,
    ) -> Result<()> {
        let ids = self.resolve_label_ids(credential, names, cache).await?;
        if ids.is_empty() {
            return Ok(());
        }
        self.modify(credential, message_id, &[], &ids).await
    }

    pub async fn mark_as_read(&self, credential: &Credential, message_id: &str) -> Result<()> {
        self.modify(credential, message_id, &[], &[LABEL_UNREAD.to_string()])
            .await
    }

    pub async fn mark_as_important(&self, credential: &Credential, message_id: &str) -> Result<()> {
        self.modify(credential, message_id, &[LABEL_IMPORTANT.to_string()], &[])
            .await
    }

    pub async fn archive(&self, credential: &Credential, message_id: &str) -> Result<()> {
        self.modify(credential, message_id, &[], &[LABEL_INBOX.to_string()])
            .await
    }

    pub async fn star(&self, credential: &Credential, message_id: &str) -> Result<()> {
        self.modify(credential, message_id, &[LABEL_STARRED.to_string()], &[])
            .await
    }

    pub async fn trash(&self, credential: &Credential, message_id: &str) -> Result<()> {
        with_retry(&self.retry, "trash_message", || {
            self.api.trash_message(credential, message_id)
        })
        .await
    }

    async fn apply_step(
        &self,
        step: ActionStep,
        credential: &Credential,
        message_id: &str,
        actions: &ActionSet,
        cache: &mut LabelCache,
    ) -> Result<()> {
        match step {
            ActionStep::AddLabels => {
                self.add_labels(credential, message_id, &actions.add_labels, cache)
                    .await
            }
            ActionStep::RemoveLabels => {
                self.remove_labels(credential, message_id, &actions.remove_labels, cache)
                    .await
            }
            ActionStep::MarkAsRead => self.mark_as_read(credential, message_id).await,
            ActionStep::MarkAsImportant => self.mark_as_important(credential, message_id).await,
            ActionStep::Archive => self.archive(credential, message_id).await,
            ActionStep::Trash => self.trash(credential, message_id).await,
            ActionStep::Star => self.star(credential, message_id).await,
        }
    }

    /// Apply every requested action to one message, in [`ActionStep::ORDER`]
    ///
    /// Stops at the first failing step; steps already applied stay applied.
    pub async fn apply_actions(
        &self,
        credential: &Credential,
        message_id: &str,
        actions: &ActionSet,
        cache: &mut LabelCache,
    ) -> Result<()> {
        for step in ActionStep::plan(actions) {
            debug!(message_id, step = step.name(), "Applying action");
            self.apply_step(step, credential, message_id, actions, cache)
                .await?;
        }
        Ok(())
    }
}
