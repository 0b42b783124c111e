//! Ad-hoc command surface
//!
//! Each request is answered with exactly one response. Failures are reported
//! in the response body (`success: false`) rather than as an `Err`, so a
//! caller on the other side of a pipe always gets a well-formed answer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::matcher;
use crate::models::{Message, Rule, RunSummary};
use crate::processor::BatchProcessor;
use crate::scheduler::{reschedule_interval, SchedulerHandle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    #[serde(alias = "processEmails")]
    ProcessMessages {
        #[serde(alias = "emails")]
        messages: Vec<Message>,
    },
    TestRule {
        rule: Rule,
        #[serde(alias = "email")]
        message: Message,
    },
    RescheduleInterval { minutes: u32 },
    #[serde(alias = "getAuthToken")]
    GetCredential,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::ProcessMessages { .. } => "processMessages",
            Request::TestRule { .. } => "testRule",
            Request::RescheduleInterval { .. } => "rescheduleInterval",
            Request::GetCredential => "getCredential",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Summary(RunSummary),
    Match { matches: bool },
    Interval { minutes: u32 },
    Credential { token: String },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    fn ok(body: ResponseBody) -> Self {
        Self {
            success: true,
            body,
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            body: ResponseBody::Error {
                error: error.to_string(),
            },
        }
    }
}

/// Dispatches requests to the processor, matcher, scheduler and credential
/// provider
pub struct CommandHandler {
    processor: Arc<BatchProcessor>,
    scheduler: Option<SchedulerHandle>,
}

impl CommandHandler {
    pub fn new(processor: Arc<BatchProcessor>) -> Self {
        Self {
            processor,
            scheduler: None,
        }
    }

    /// Route interval changes through a running scheduler so its timer is
    /// recreated
    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub async fn handle(&self, request: Request) -> Response {
        let name = request.name();
        debug!("Handling {} request", name);

        let response = match request {
            Request::ProcessMessages { messages } => {
                match self.processor.process_messages(&messages).await {
                    Ok(summary) => Response::ok(ResponseBody::Summary(summary)),
                    Err(e) => Response::failed(e),
                }
            }
            Request::TestRule { rule, message } => Response::ok(ResponseBody::Match {
                matches: matcher::matches(&message, &rule),
            }),
            Request::RescheduleInterval { minutes } => {
                let applied = match &self.scheduler {
                    Some(scheduler) => scheduler.reschedule(minutes).await,
                    None => reschedule_interval(self.processor.store(), minutes).await,
                };
                match applied {
                    Ok(minutes) => Response::ok(ResponseBody::Interval { minutes }),
                    Err(e) => Response::failed(e),
                }
            }
            Request::GetCredential => match self.processor.credentials().get_credential().await {
                Ok(credential) => Response::ok(ResponseBody::Credential {
                    token: credential.as_str().to_string(),
                }),
                Err(e) => Response::failed(e),
            },
        };

        if let ResponseBody::Error { error } = &response.body {
            warn!("{} request failed: {}", name, error);
        }
        response
    }

    /// Parse a JSON request, handle it and serialize the response
    pub async fn handle_json(&self, json: &str) -> String {
        let response = match serde_json::from_str::<Request>(json) {
            Ok(request) => self.handle(request).await,
            Err(e) => Response::failed(format!("Invalid request: {}", e)),
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":"Failed to encode response: {}"}}"#, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::RemoteClient;
    use crate::auth::{Credential, StaticCredentialProvider};
    use crate::client::{LabelInfo, MailApi};
    use crate::error::{GmailError, Result};
    use crate::retry::RetryPolicy;
    use crate::storage::Store;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct NoopApi;

    #[async_trait]
    impl MailApi for NoopApi {
        async fn list_labels(&self, _credential: &Credential) -> Result<Vec<LabelInfo>> {
            Ok(vec![])
        }
        async fn create_label(&self, _credential: &Credential, name: &str) -> Result<LabelInfo> {
            Err(GmailError::LabelError(name.to_string()))
        }
        async fn modify_message(
            &self,
            _credential: &Credential,
            _message_id: &str,
            _add_label_ids: &[String],
            _remove_label_ids: &[String],
        ) -> Result<()> {
            Ok(())
        }
        async fn trash_message(&self, _credential: &Credential, _message_id: &str) -> Result<()> {
            Ok(())
        }
        async fn list_message_ids(
            &self,
            _credential: &Credential,
            _query: &str,
            _max_results: u32,
        ) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn get_message(&self, _credential: &Credential, message_id: &str) -> Result<Message> {
            Err(GmailError::NotFound(message_id.to_string()))
        }
    }

    fn handler(token: Option<&str>) -> CommandHandler {
        let processor = BatchProcessor::new(
            Store::in_memory(),
            RemoteClient::new(Arc::new(NoopApi), RetryPolicy::default()),
            Arc::new(StaticCredentialProvider::new(token.map(str::to_string))),
        );
        CommandHandler::new(Arc::new(processor))
    }

    async fn call(handler: &CommandHandler, request: Value) -> Value {
        let out = handler.handle_json(&request.to_string()).await;
        serde_json::from_str(&out).unwrap()
    }

    #[tokio::test]
    async fn test_test_rule_reports_match() {
        let h = handler(None);
        let out = call(
            &h,
            json!({
                "action": "testRule",
                "rule": {"id": "r1", "enabled": true, "subjectPattern": "invoice"},
                "message": {"id": "m1", "subject": "Your INVOICE is ready"}
            }),
        )
        .await;
        assert_eq!(out["success"], true);
        assert_eq!(out["matches"], true);

        let out = call(
            &h,
            json!({
                "action": "testRule",
                "rule": {"id": "r1", "subjectPattern": "(broken"},
                "email": {"id": "m1", "subject": "(broken"}
            }),
        )
        .await;
        assert_eq!(out["matches"], false);
    }

    #[tokio::test]
    async fn test_reschedule_without_scheduler_persists_clamped() {
        let h = handler(None);
        let out = call(&h, json!({"action": "rescheduleInterval", "minutes": 0})).await;
        assert_eq!(out, json!({"success": true, "minutes": 1}));

        let settings = h.processor.store().load_settings().await.unwrap();
        assert_eq!(settings.processing_interval_minutes, Some(1));
    }

    #[tokio::test]
    async fn test_get_credential() {
        let out = call(&handler(Some("abc")), json!({"action": "getCredential"})).await;
        assert_eq!(out, json!({"success": true, "token": "abc"}));

        let out = call(&handler(None), json!({"action": "getAuthToken"})).await;
        assert_eq!(out["success"], false);
        assert!(out["error"].as_str().unwrap().contains("Authentication"));
    }

    #[tokio::test]
    async fn test_process_messages_returns_summary() {
        let h = handler(Some("t"));
        h.processor
            .store()
            .save_rules(&[Rule {
                id: "r1".to_string(),
                enabled: true,
                from_pattern: Some("example\\.com".to_string()),
                actions: crate::models::ActionSet {
                    archive: true,
                    ..Default::default()
                },
                ..Default::default()
            }])
            .await
            .unwrap();

        let out = call(
            &h,
            json!({
                "action": "processEmails",
                "emails": [
                    {"id": "m1", "from": "news@example.com"},
                    {"id": "m2", "from": "friend@other.org"}
                ]
            }),
        )
        .await;
        assert_eq!(out["success"], true);
        assert_eq!(out["processed"], 1);
        assert_eq!(out["matchChecks"], 2);
        assert_eq!(out["emails"], 2);
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let out = call(&handler(None), json!({"action": "launchRockets"})).await;
        assert_eq!(out["success"], false);
        assert!(out["error"].as_str().unwrap().starts_with("Invalid request"));
    }
}
