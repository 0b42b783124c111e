//! Gmail API surface used by the rule engine
//!
//! [`MailApi`] is the seam between the engine and the remote service: label
//! listing and creation, message modification and trashing, plus the two read
//! calls the inbox discovery pass needs. [`GmailApi`] implements it over the
//! `google-gmail1` hub. Each call carries the bearer credential of the batch it
//! belongs to. Retrying is the caller's concern (see [`crate::retry`]).

use async_trait::async_trait;
use google_gmail1::{
    api::{Label, Message as ApiMessage, ModifyMessageRequest},
    common, hyper_rustls, hyper_util, Gmail,
};
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::Credential;
use crate::config::ApiConfig;
use crate::error::{GmailError, Result};
use crate::models::Message;

/// System label removed to mark a message as read
pub const LABEL_UNREAD: &str = "UNREAD";
/// System label added to mark a message as important
pub const LABEL_IMPORTANT: &str = "IMPORTANT";
/// System label removed to archive a message
pub const LABEL_INBOX: &str = "INBOX";
/// System label added to star a message
pub const LABEL_STARRED: &str = "STARRED";

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

type Connector = hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Trait defining the Gmail operations the engine performs, for easier testing
#[async_trait]
pub trait MailApi: Send + Sync {
    /// List all labels in the account
    async fn list_labels(&self, credential: &Credential) -> Result<Vec<LabelInfo>>;

    /// Create a user label shown in both the label list and the message list
    async fn create_label(&self, credential: &Credential, name: &str) -> Result<LabelInfo>;

    /// Add and remove label ids on one message in a single call
    async fn modify_message(
        &self,
        credential: &Credential,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;

    /// Move one message to the trash
    async fn trash_message(&self, credential: &Credential, message_id: &str) -> Result<()>;

    /// List up to `max_results` message ids matching a Gmail search query
    async fn list_message_ids(
        &self,
        credential: &Credential,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>>;

    /// Fetch From/To/Subject headers and the snippet of one message
    async fn get_message(&self, credential: &Credential, message_id: &str) -> Result<Message>;
}

/// Production [`MailApi`] over the `google-gmail1` hub
///
/// The HTTP client is shared; a lightweight hub is built per call around the
/// caller's credential.
#[derive(Clone)]
pub struct GmailApi {
    client: common::Client<Connector>,
    base_url: Option<String>,
    user_id: String,
}

impl GmailApi {
    /// Create a client with TLS (native roots), falling back to plain HTTP
    /// for `http://` base URLs
    pub fn new(config: &ApiConfig) -> Result<Self> {
        // HTTP/1 for compatibility with google-gmail1
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| GmailError::ConfigError(format!("Failed to load TLS roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .build();

        let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
            .build(connector);

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            user_id: config.user_id.clone(),
        })
    }

    fn hub(&self, credential: &Credential) -> Gmail<Connector> {
        let mut hub = Gmail::new(self.client.clone(), credential.as_str().to_string());
        if let Some(base_url) = &self.base_url {
            hub.base_url(base_url.clone());
        }
        hub
    }
}

/// Bound one API call so a stalled connection surfaces as a retryable error
async fn with_timeout<T, F>(operation_name: &str, call: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, google_gmail1::Error>>,
{
    match tokio::time::timeout(CALL_TIMEOUT, call).await {
        Ok(result) => result.map_err(GmailError::from),
        Err(_) => {
            warn!("Gmail API {} call timed out after {:?}", operation_name, CALL_TIMEOUT);
            Err(GmailError::NetworkError(format!(
                "{} timed out after {:?}",
                operation_name, CALL_TIMEOUT
            )))
        }
    }
}

#[async_trait]
impl MailApi for GmailApi {
    async fn list_labels(&self, credential: &Credential) -> Result<Vec<LabelInfo>> {
        let hub = self.hub(credential);
        debug!("Calling Gmail API to list labels...");
        let (_, response) =
            with_timeout("list_labels", hub.users().labels_list(&self.user_id).doit()).await?;

        let labels: Vec<LabelInfo> = response
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| match (label.id, label.name) {
                (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                _ => None,
            })
            .collect();

        debug!("Successfully parsed {} labels", labels.len());
        Ok(labels)
    }

    async fn create_label(&self, credential: &Credential, name: &str) -> Result<LabelInfo> {
        let hub = self.hub(credential);
        let label = Label {
            name: Some(name.to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
            ..Default::default()
        };

        let (_, created) = with_timeout(
            "create_label",
            hub.users().labels_create(label, &self.user_id).doit(),
        )
        .await?;

        let id = created
            .id
            .ok_or_else(|| GmailError::LabelError("Created label has no ID".to_string()))?;
        Ok(LabelInfo {
            id,
            name: created.name.unwrap_or_else(|| name.to_string()),
        })
    }

    async fn modify_message(
        &self,
        credential: &Credential,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let hub = self.hub(credential);
        let request = ModifyMessageRequest {
            add_label_ids: (!add_label_ids.is_empty()).then(|| add_label_ids.to_vec()),
            remove_label_ids: (!remove_label_ids.is_empty()).then(|| remove_label_ids.to_vec()),
            ..Default::default()
        };

        with_timeout(
            "modify_message",
            hub.users()
                .messages_modify(request, &self.user_id, message_id)
                .doit(),
        )
        .await?;
        Ok(())
    }

    async fn trash_message(&self, credential: &Credential, message_id: &str) -> Result<()> {
        let hub = self.hub(credential);
        with_timeout(
            "trash_message",
            hub.users().messages_trash(&self.user_id, message_id).doit(),
        )
        .await?;
        Ok(())
    }

    async fn list_message_ids(
        &self,
        credential: &Credential,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>> {
        let hub = self.hub(credential);
        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = max_results.saturating_sub(all_ids.len() as u32);
            if remaining == 0 {
                break;
            }

            let mut call = hub
                .users()
                .messages_list(&self.user_id)
                .q(query)
                .max_results(remaining);
            if let Some(token) = page_token.as_ref() {
                call = call.page_token(token);
            }

            let (_, response) = with_timeout("list_messages", call.doit()).await?;

            all_ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        all_ids.truncate(max_results as usize);
        Ok(all_ids)
    }

    async fn get_message(&self, credential: &Credential, message_id: &str) -> Result<Message> {
        let hub = self.hub(credential);
        let (_, msg) = with_timeout(
            "get_message",
            hub.users()
                .messages_get(&self.user_id, message_id)
                .format("metadata")
                .add_metadata_headers("From")
                .add_metadata_headers("To")
                .add_metadata_headers("Subject")
                .doit(),
        )
        .await?;

        parse_message(msg)
    }
}

/// Convert a Gmail API message (metadata format) into the engine's [`Message`]
fn parse_message(msg: ApiMessage) -> Result<Message> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::ApiError("Missing message ID".to_string()))?;

    let mut message = Message {
        id,
        snippet: msg.snippet.filter(|s| !s.is_empty()),
        ..Default::default()
    };

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default();

    for header in headers {
        if let (Some(name), Some(value)) = (header.name, header.value) {
            match name.to_lowercase().as_str() {
                "from" => message.from = value,
                "to" => message.to = value,
                "subject" => message.subject = value,
                _ => {}
            }
        }
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePart, MessagePartHeader};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    #[test]
    fn test_parse_message_headers_and_snippet() {
        let msg = ApiMessage {
            id: Some("18c0".to_string()),
            snippet: Some("Your order has shipped".to_string()),
            payload: Some(MessagePart {
                headers: Some(vec![
                    header("From", "Shop <orders@shop.example>"),
                    header("to", "me@example.com"),
                    header("Subject", "Order #123"),
                    header("Date", "Mon, 1 Jan 2024 10:00:00 +0000"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let message = parse_message(msg).unwrap();
        assert_eq!(message.id, "18c0");
        assert_eq!(message.from, "Shop <orders@shop.example>");
        assert_eq!(message.to, "me@example.com");
        assert_eq!(message.subject, "Order #123");
        assert!(message.body.is_none());
        assert_eq!(message.body_text(), "Your order has shipped");
    }

    #[test]
    fn test_parse_message_missing_headers_are_empty() {
        let msg = ApiMessage {
            id: Some("m1".to_string()),
            ..Default::default()
        };
        let message = parse_message(msg).unwrap();
        assert_eq!(message.from, "");
        assert_eq!(message.subject, "");
        assert!(message.snippet.is_none());
    }

    #[test]
    fn test_parse_message_requires_id() {
        let result = parse_message(ApiMessage::default());
        assert!(matches!(result, Err(GmailError::ApiError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_network_error() {
        let result: Result<()> = with_timeout("slow_call", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), google_gmail1::Error>(())
        })
        .await;

        match result {
            Err(GmailError::NetworkError(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected NetworkError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_completes_within_limit() {
        let result = with_timeout("fast_call", async { Ok::<_, google_gmail1::Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
