//! Post-commit notification fan-out.
//!
//! After an attendance row is durably written, the engine pushes a
//! [`CheckinEvent`] onto an unbounded channel and moves on. A single
//! drain task delivers each event to every registered notifier with
//! at-most-once, best-effort semantics: a failing notifier is logged
//! and skipped, never retried synchronously, and never affects the
//! already-committed attendance write.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Event published to downstream notification/cloud-sync collaborators
/// after each accepted check-in.
#[derive(Debug, Clone, Serialize)]
pub struct CheckinEvent {
    pub student_id: String,
    pub name: String,
    pub camera_type: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug)]
#[error("notify: {0}")]
pub struct NotifyError(pub String);

/// A downstream collaborator interested in accepted check-ins
/// (parent notification, cloud sync, ...).
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    fn notify(&self, event: &CheckinEvent) -> Result<(), NotifyError>;
}

/// Notifier that records the event in the structured log. Stands in
/// for network collaborators, which are wired up outside this core.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, event: &CheckinEvent) -> Result<(), NotifyError> {
        tracing::info!(
            student_id = %event.student_id,
            name = %event.name,
            camera_type = %event.camera_type,
            timestamp = %event.timestamp,
            "check-in event"
        );
        Ok(())
    }
}

/// Spawn the drain task for the fan-out channel.
///
/// Runs until every sender is dropped.
pub fn spawn_fanout(
    mut rx: mpsc::UnboundedReceiver<CheckinEvent>,
    notifiers: Vec<Box<dyn Notifier>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            for notifier in &notifiers {
                if let Err(e) = notifier.notify(&event) {
                    tracing::warn!(
                        notifier = notifier.name(),
                        student_id = %event.student_id,
                        error = %e,
                        "fan-out delivery failed; event dropped for this notifier"
                    );
                }
            }
        }
        tracing::info!("fan-out channel closed; drain task exiting");
    })
}
