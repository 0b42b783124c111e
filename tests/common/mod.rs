//! Common test utilities and fixtures
#![allow(dead_code)]

use gmail_regex_rules::actions::RemoteClient;
use gmail_regex_rules::auth::{Credential, StaticCredentialProvider};
use gmail_regex_rules::client::{LabelInfo, MailApi};
use gmail_regex_rules::error::Result;
use gmail_regex_rules::models::{ActionSet, Message, Rule};
use gmail_regex_rules::processor::BatchProcessor;
use gmail_regex_rules::retry::RetryPolicy;
use gmail_regex_rules::storage::Store;
use mockall::mock;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_TOKEN: &str = "test-token";

/// Create a test message with default values
pub fn create_test_message(id: &str, from: &str, subject: &str) -> Message {
    Message {
        id: id.to_string(),
        from: from.to_string(),
        to: "me@example.com".to_string(),
        subject: subject.to_string(),
        body: None,
        snippet: Some("Email snippet...".to_string()),
    }
}

/// Create an enabled rule with a single from pattern
pub fn create_test_rule(id: &str, from_pattern: &str, actions: ActionSet) -> Rule {
    Rule {
        id: id.to_string(),
        name: format!("Rule {}", id),
        enabled: true,
        from_pattern: Some(from_pattern.to_string()),
        actions,
        ..Default::default()
    }
}

pub fn star_only() -> ActionSet {
    ActionSet {
        star: true,
        ..Default::default()
    }
}

pub fn label_info(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
    }
}

/// Retry policy with millisecond delays so failing tests stay fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

/// Processor over an in-memory store with a fixed token
pub fn processor_with(api: impl MailApi + 'static, token: Option<&str>) -> BatchProcessor {
    BatchProcessor::new(
        Store::in_memory(),
        RemoteClient::new(Arc::new(api), fast_retry()),
        Arc::new(StaticCredentialProvider::new(token.map(str::to_string))),
    )
}

/// Create mock Gmail API message response (JSON)
pub fn mock_gmail_message_response(id: &str, from: &str, subject: &str) -> serde_json::Value {
    json!({
        "id": id,
        "threadId": format!("thread_{}", id),
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": "Email snippet...",
        "payload": {
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "From", "value": from},
                {"name": "Subject", "value": subject},
                {"name": "To", "value": "me@example.com"}
            ]
        }
    })
}

/// Create mock Gmail list messages response (JSON)
pub fn mock_gmail_list_response(
    message_ids: Vec<&str>,
    next_page_token: Option<&str>,
) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = message_ids
        .iter()
        .map(|id| json!({"id": id, "threadId": format!("thread_{}", id)}))
        .collect();

    let mut response = json!({
        "messages": messages,
        "resultSizeEstimate": messages.len()
    });
    if let Some(token) = next_page_token {
        response["nextPageToken"] = json!(token);
    }
    response
}

/// Google-style JSON error body
pub fn mock_gmail_error(code: u16, message: &str) -> serde_json::Value {
    json!({
        "error": {
            "code": code,
            "message": message,
            "errors": [{"message": message, "domain": "global", "reason": "backendError"}]
        }
    })
}

// Mock implementation of MailApi for testing
mock! {
    pub MailApi {}

    #[async_trait::async_trait]
    impl MailApi for MailApi {
        async fn list_labels(&self, credential: &Credential) -> Result<Vec<LabelInfo>>;
        async fn create_label(&self, credential: &Credential, name: &str) -> Result<LabelInfo>;
        async fn modify_message(
            &self,
            credential: &Credential,
            message_id: &str,
            add_label_ids: &[String],
            remove_label_ids: &[String],
        ) -> Result<()>;
        async fn trash_message(&self, credential: &Credential, message_id: &str) -> Result<()>;
        async fn list_message_ids(
            &self,
            credential: &Credential,
            query: &str,
            max_results: u32,
        ) -> Result<Vec<String>>;
        async fn get_message(&self, credential: &Credential, message_id: &str) -> Result<Message>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_message() {
        let msg = create_test_message("msg1", "test@example.com", "Test Subject");
        assert_eq!(msg.id, "msg1");
        assert_eq!(msg.from, "test@example.com");
        assert_eq!(msg.body_text(), "Email snippet...");
    }

    #[test]
    fn test_mock_gmail_list_response() {
        let response = mock_gmail_list_response(vec!["a", "b"], Some("next"));
        assert_eq!(response["messages"].as_array().unwrap().len(), 2);
        assert_eq!(response["nextPageToken"], "next");
    }
}
