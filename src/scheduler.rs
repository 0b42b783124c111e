//! Periodic trigger for discovery and batch processing
//!
//! The scheduler runs as one background task. A timer fires every
//! `processingIntervalMinutes` (at least 1). Each tick re-reads the persisted
//! settings, asks the [`MessageSource`] for candidates and hands the unseen
//! ones to the [`BatchProcessor`]. Interval changes cancel and recreate the
//! timer; the new period starts counting from the change.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::discovery::{MessageSource, SeenMessages};
use crate::error::{GmailError, Result};
use crate::logging::LogHandle;
use crate::models::{clamp_interval, RunSummary};
use crate::processor::BatchProcessor;
use crate::storage::Store;

const COMMAND_BUFFER: usize = 16;

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// `settings.enabled` is false; nothing ran and `lastChecked` is unchanged
    Disabled,
    /// Discovery ran; `summary` is `None` when there was nothing new
    Checked {
        discovered: usize,
        summary: Option<RunSummary>,
    },
}

/// Persist a new processing interval, clamped to at least one minute
///
/// Returns the interval actually stored.
pub async fn reschedule_interval(store: &Store, minutes: u32) -> Result<u32> {
    let minutes = clamp_interval(minutes);
    let mut settings = store.load_settings().await?;
    settings.processing_interval_minutes = Some(minutes);
    store.save_settings(&settings).await?;
    info!("Processing interval set to {} minute(s)", minutes);
    Ok(minutes)
}

fn timer(minutes: u32) -> Interval {
    let period = Duration::from_secs(60 * u64::from(clamp_interval(minutes)));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

enum Command {
    Reschedule {
        minutes: u32,
        reply: oneshot::Sender<Result<u32>>,
    },
    ProcessNow {
        reply: oneshot::Sender<Result<TickOutcome>>,
    },
    Shutdown,
}

/// Sends requests to a running scheduler task
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| GmailError::SchedulerError("Scheduler is not running".to_string()))?;
        response
            .await
            .map_err(|_| GmailError::SchedulerError("Scheduler stopped before replying".to_string()))?
    }

    /// Change the interval; the timer is recreated with the clamped value
    pub async fn reschedule(&self, minutes: u32) -> Result<u32> {
        self.request(|reply| Command::Reschedule { minutes, reply }).await
    }

    /// Run one tick immediately, outside the timer
    pub async fn process_now(&self) -> Result<TickOutcome> {
        self.request(|reply| Command::ProcessNow { reply }).await
    }

    /// Stop the loop after the current tick, if any
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

pub struct Scheduler {
    processor: Arc<BatchProcessor>,
    source: Arc<dyn MessageSource>,
    seen: SeenMessages,
    log: Option<LogHandle>,
}

impl Scheduler {
    pub fn new(processor: Arc<BatchProcessor>, source: Arc<dyn MessageSource>) -> Self {
        Self {
            processor,
            source,
            seen: SeenMessages::default(),
            log: None,
        }
    }

    /// Apply `settings.logLevel` through this handle at every tick
    pub fn with_log_handle(mut self, log: LogHandle) -> Self {
        self.log = Some(log);
        self
    }

    fn store(&self) -> &Store {
        self.processor.store()
    }

    /// One discovery and processing pass
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let settings = self.store().load_settings().await?;

        if let Some(log) = &self.log {
            if let Err(e) = log.set_level(settings.log_level) {
                warn!("{}", e);
            }
        }

        if !settings.enabled {
            debug!("Processing disabled, skipping tick");
            return Ok(TickOutcome::Disabled);
        }

        let checked = self.check().await;

        // Stamped for every enabled tick, including failed ones
        match self.store().load_settings().await {
            Ok(mut settings) => {
                settings.last_checked = Some(Utc::now());
                if let Err(e) = self.store().save_settings(&settings).await {
                    warn!("Failed to store lastChecked: {}", e);
                }
            }
            Err(e) => warn!("Failed to store lastChecked: {}", e),
        }

        checked
    }

    async fn check(&mut self) -> Result<TickOutcome> {
        let discovered = self.source.discover().await?;
        let found = discovered.len();
        let fresh = self.seen.unseen(discovered);

        let summary = if fresh.is_empty() {
            debug!("No new messages among {} discovered", found);
            None
        } else {
            let summary = self.processor.process_messages(&fresh).await?;
            self.seen.mark_seen(&fresh);
            Some(summary)
        };

        Ok(TickOutcome::Checked {
            discovered: found,
            summary,
        })
    }

    async fn scheduled_tick(&mut self) {
        match self.tick().await {
            Ok(TickOutcome::Disabled) => {}
            Ok(TickOutcome::Checked { discovered, summary }) => {
                if let Some(summary) = summary {
                    info!(
                        discovered,
                        processed = summary.processed,
                        "Scheduled run finished"
                    );
                }
            }
            Err(e) => error!("Scheduled run failed: {}", e),
        }
    }

    /// Run until shutdown or until every handle is dropped
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        let mut minutes = self.store().load_settings().await?.interval_minutes();
        let mut interval = timer(minutes);
        info!("Scheduler started (interval: {} minute(s))", minutes);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.scheduled_tick().await;

                    // Another process may have changed the interval
                    match self.store().load_settings().await {
                        Ok(settings) if settings.interval_minutes() != minutes => {
                            minutes = settings.interval_minutes();
                            interval = timer(minutes);
                            info!("Interval changed to {} minute(s)", minutes);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to re-read settings: {}", e),
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Reschedule { minutes: requested, reply }) => {
                        let result = reschedule_interval(self.store(), requested).await;
                        if let Ok(applied) = result {
                            minutes = applied;
                            interval = timer(minutes);
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::ProcessNow { reply }) => {
                        let result = self.tick().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(rx));
        (SchedulerHandle { tx }, task)
    }
}
