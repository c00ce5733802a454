//! Notification listener - connection state machine over the ingest and
//! delivery services
//!
//! The host notification supplier drives `connect` / `disconnect`. While
//! connected, every notification is handed to its own task: parse and persist
//! on the blocking pool, then a delivery attempt for that event alone, even
//! while a backlog pass is running. The listener keeps no
//! pending work of its own; reconnecting resumes from durable storage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::RawNotification;
use crate::services::delivery::{DeliveryService, FlushReport};
use crate::services::ingest::{IngestOutcome, IngestService};
use crate::services::logging::LoggingService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Disconnected,
    Connected,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ListenerState::Disconnected => "disconnected",
            ListenerState::Connected => "connected",
        })
    }
}

pub struct NotificationListener {
    connected: AtomicBool,
    ingest: Arc<IngestService>,
    delivery: Arc<DeliveryService>,
    deliver_on_ingest: bool,
    journal: Option<Arc<LoggingService>>,
}

impl NotificationListener {
    pub fn new(ingest: Arc<IngestService>, delivery: Arc<DeliveryService>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            ingest,
            delivery,
            deliver_on_ingest: true,
            journal: None,
        }
    }

    /// Skip the delivery attempt after each stored event (periodic flush only)
    pub fn with_deliver_on_ingest(mut self, deliver: bool) -> Self {
        self.deliver_on_ingest = deliver;
        self
    }

    pub fn with_journal(mut self, journal: Arc<LoggingService>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn state(&self) -> ListenerState {
        if self.connected.load(Ordering::SeqCst) {
            ListenerState::Connected
        } else {
            ListenerState::Disconnected
        }
    }

    /// Disconnected -> Connected. Returns `false` if already connected.
    pub fn connect(&self) -> bool {
        let changed = self
            .connected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            info!("listener connected");
            self.journal_event("listener_connected");
        }
        changed
    }

    /// Connected -> Disconnected. Returns `false` if already disconnected.
    ///
    /// Tasks already spawned run to completion.
    pub fn disconnect(&self) -> bool {
        let changed = self
            .connected
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            info!("listener disconnected");
            self.journal_event("listener_disconnected");
        }
        changed
    }

    /// Hand one notification to a background task.
    ///
    /// Returns `None` without doing anything while disconnected. Must be
    /// called from within a tokio runtime.
    pub fn on_notification(
        self: &Arc<Self>,
        raw: RawNotification,
    ) -> Option<JoinHandle<Result<IngestOutcome>>> {
        if self.state() != ListenerState::Connected {
            warn!(package = %raw.package_name, "notification dropped while disconnected");
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.process(raw).await }))
    }

    async fn process(&self, raw: RawNotification) -> Result<IngestOutcome> {
        let ingest = Arc::clone(&self.ingest);
        let outcome = tokio::task::spawn_blocking(move || ingest.ingest(&raw))
            .await
            .map_err(|e| Error::Other(format!("ingest task failed: {}", e)))??;

        if let Some(event) = outcome.stored().filter(|_| self.deliver_on_ingest) {
            // Delivery problems leave the event pending; the outcome stands
            match self.delivery.deliver_events(std::slice::from_ref(event)).await {
                Ok(report) if report.failed > 0 => {
                    debug!(errors = ?report.errors, "delivery after ingest failed")
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "delivery after ingest failed"),
            }
        }
        Ok(outcome)
    }

    /// One backlog flush, only while connected
    pub async fn flush_if_connected(&self) -> Option<Result<FlushReport>> {
        if self.state() != ListenerState::Connected {
            return None;
        }
        Some(self.delivery.flush().await)
    }

    /// Flush the backlog every `period` while connected.
    ///
    /// The first tick fires immediately so work left over from a previous
    /// run is picked up on start. Abort the handle to stop the loop.
    pub fn spawn_periodic_flush(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match this.flush_if_connected().await {
                    Some(Ok(report)) if report.uploaded > 0 => {
                        info!(uploaded = report.uploaded, "periodic flush delivered events")
                    }
                    Some(Err(e)) => warn!(error = %e, "periodic flush failed"),
                    _ => {}
                }
            }
        })
    }

    fn journal_event(&self, event: &str) {
        if let Some(journal) = &self.journal {
            let _ = journal.log_event(event);
        }
    }
}
