//! Gmail Regex Rules
//!
//! A rules engine that watches a Gmail inbox and applies user-defined regex
//! rules to incoming messages: add or remove labels, mark as read or
//! important, archive, trash and star.
//!
//! # Overview
//!
//! - **Matching**: case-insensitive regex patterns over from/to/subject/body,
//!   combined with AND; a malformed pattern never matches
//! - **Remote actions**: a fixed action order per message, label names
//!   resolved (and created) on demand, transient failures retried with
//!   exponential backoff
//! - **Batch processing**: every message against every enabled rule, with
//!   per-rule match statistics and a bounded performance history
//! - **Scheduling**: a periodic trigger with runtime interval changes and
//!   on-demand runs
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_regex_rules::{
//!     actions::RemoteClient, auth::StaticCredentialProvider, client::GmailApi,
//!     config::Config, processor::BatchProcessor, retry::RetryPolicy, storage::Store,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let api = Arc::new(GmailApi::new(&config.api)?);
//!     let remote = RemoteClient::new(api, RetryPolicy::from(&config.retry));
//!     let processor = BatchProcessor::new(
//!         Store::open(&config.storage.dir),
//!         remote,
//!         Arc::new(StaticCredentialProvider::from_env()),
//!     );
//!
//!     let summary = processor.process_messages(&[]).await?;
//!     println!("processed {}", summary.processed);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`matcher`] - Regex pattern matching of messages against rules
//! - [`actions`] - Fixed-order action pipeline and label resolution
//! - [`client`] - Gmail API seam and its production implementation
//! - [`retry`] - Retry policy with exponential backoff
//! - [`processor`] - Batch processing of messages against rules
//! - [`stats`] - Bounded performance history
//! - [`scheduler`] - Periodic and on-demand processing trigger
//! - [`commands`] - Request/response surface for external callers
//! - [`discovery`] - Sources of candidate messages
//! - [`storage`] - Key-value persistence of rules, settings and stats
//! - [`auth`] - Bearer credential providers
//! - [`config`] - Configuration management
//! - [`logging`] - tracing subscriber setup
//! - [`error`] - Error types and result aliases

pub mod actions;
pub mod auth;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod storage;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

// Core data models
pub use models::{ActionSet, Message, PerfEntry, Rule, RuleStats, RunSummary, Settings};

// Engine
pub use actions::{ActionStep, LabelCache, RemoteClient};
pub use matcher::{matches, CompiledRule};
pub use processor::BatchProcessor;
pub use stats::StatsRecorder;

// Seams
pub use auth::{Credential, CredentialProvider};
pub use client::{GmailApi, MailApi};
pub use discovery::MessageSource;
pub use storage::{Storage, Store};

// Scheduling and commands
pub use commands::{CommandHandler, Request, Response};
pub use scheduler::{Scheduler, SchedulerHandle};

// Config types
pub use config::Config;
