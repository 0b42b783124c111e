//! Message discovery: where scheduled batches come from
//!
//! A [`MessageSource`] produces the candidate messages of one pass. The
//! scheduler filters them through [`SeenMessages`] so a message is processed
//! successfully at most once per process lifetime.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::CredentialProvider;
use crate::client::MailApi;
use crate::error::{GmailError, Result};
use crate::models::Message;
use crate::retry::{with_retry, RetryPolicy};

/// Messages fetched concurrently per discovery pass
const FETCH_CONCURRENCY: usize = 10;

/// Ids remembered by [`SeenMessages`] before the oldest are forgotten
pub const DEFAULT_SEEN_CAPACITY: usize = 10_000;

/// Producer of candidate messages for a batch
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<Message>>;
}

/// Ids already handed to the processor, oldest evicted first
#[derive(Debug)]
pub struct SeenMessages {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SEEN_CAPACITY)
    }
}

impl SeenMessages {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: &str) {
        if !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    /// Messages not seen before, first occurrence of each id only
    pub fn unseen(&self, messages: Vec<Message>) -> Vec<Message> {
        let mut batch = HashSet::new();
        messages
            .into_iter()
            .filter(|m| !m.id.is_empty() && !self.ids.contains(&m.id) && batch.insert(m.id.clone()))
            .collect()
    }

    /// Remember the ids of a processed batch
    pub fn mark_seen(&mut self, messages: &[Message]) {
        for message in messages {
            self.insert(&message.id);
        }
    }
}

/// Reads `Message[]` from a JSON file written by an external scraper
#[derive(Debug, Clone)]
pub struct FileMessageSource {
    path: PathBuf,
}

impl FileMessageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parse a JSON array of messages, or a single message object
pub fn parse_messages(json: &str) -> Result<Vec<Message>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    match value {
        serde_json::Value::Array(_) => Ok(serde_json::from_value(value)?),
        serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        _ => Err(GmailError::InvalidInput(
            "Expected a message object or an array of messages".to_string(),
        )),
    }
}

#[async_trait]
impl MessageSource for FileMessageSource {
    async fn discover(&self) -> Result<Vec<Message>> {
        if !self.path.exists() {
            debug!("Inbox file {:?} not found, nothing to process", self.path);
            return Ok(Vec::new());
        }
        let json = tokio::fs::read_to_string(&self.path).await?;
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse_messages(&json)
    }
}

/// Lists recent inbox messages through the Gmail API
pub struct GmailInboxSource {
    api: Arc<dyn MailApi>,
    credentials: Arc<dyn CredentialProvider>,
    retry: RetryPolicy,
    query: String,
    max_messages: u32,
}

impl GmailInboxSource {
    pub fn new(
        api: Arc<dyn MailApi>,
        credentials: Arc<dyn CredentialProvider>,
        retry: RetryPolicy,
        query: impl Into<String>,
        max_messages: u32,
    ) -> Self {
        Self {
            api,
            credentials,
            retry,
            query: query.into(),
            max_messages,
        }
    }
}

#[async_trait]
impl MessageSource for GmailInboxSource {
    async fn discover(&self) -> Result<Vec<Message>> {
        let credential = self.credentials.get_credential().await?;

        let ids = with_retry(&self.retry, "list_messages", || {
            self.api
                .list_message_ids(&credential, &self.query, self.max_messages)
        })
        .await?;
        debug!("Query '{}' returned {} message(s)", self.query, ids.len());

        let credential = &credential;
        let results: Vec<Result<Message>> = stream::iter(ids)
            .map(|id| async move {
                with_retry(&self.retry, "get_message", || {
                    self.api.get_message(credential, &id)
                })
                .await
            })
            .buffered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut messages = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(message) => messages.push(message),
                // Unreadable messages are skipped, not fatal for the pass
                Err(e) => warn!("Failed to fetch message: {}", e),
            }
        }
        Ok(messages)
    }
}
