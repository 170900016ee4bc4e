//! Run completion and failure notifications.
//!
//! The orchestrator builds a [`Notification`] and hands it to a [`Notifier`].
//! Delivery is best-effort: errors are logged and never affect the run.

use funnel_types::{Run, Tier};
use serde::Serialize;

/// Failed-run error text is cut to this many characters.
pub const MAX_NOTIFIED_ERROR_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RunCompleted,
    RunFailed,
}

/// Channel-neutral message describing a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub run_id: String,
    /// Ordered `(label, value)` pairs.
    pub fields: Vec<(String, String)>,
    /// Summary for completed runs, truncated error for failed ones.
    pub body: String,
}

impl Notification {
    #[must_use]
    pub fn run_completed(run: &Run) -> Self {
        let tier = |t: Tier| run.tier_distribution.get(&t).copied().unwrap_or(0);
        let fields = vec![
            field("Found", run.profiles_found),
            field("Pre-screened", run.profiles_pre_screened),
            field("Scored", run.profiles_scored),
            field("Synced", run.contacts_synced),
            field("Auto-Enroll", tier(Tier::AutoEnroll)),
            field("Dupes Skipped", run.duplicates_skipped),
            field("Cost", format!("~${:.2}", run.actual_cost)),
        ];
        Self {
            kind: NotificationKind::RunCompleted,
            title: format!("Pipeline Run Completed - {}", run.platform.display_name()),
            run_id: run.id.to_string(),
            fields,
            body: run.summary.clone(),
        }
    }

    #[must_use]
    pub fn run_failed(run: &Run) -> Self {
        let error: String = run
            .last_error()
            .unwrap_or("unknown error")
            .chars()
            .take(MAX_NOTIFIED_ERROR_LEN)
            .collect();
        Self {
            kind: NotificationKind::RunFailed,
            title: format!("Pipeline Run FAILED - {}", run.platform.display_name()),
            run_id: run.id.to_string(),
            fields: vec![
                field("Stage", run.current_stage.label()),
                field("Found so far", run.profiles_found),
            ],
            body: error,
        }
    }
}

fn field(label: &str, value: impl ToString) -> (String, String) {
    (label.to_string(), value.to_string())
}

pub trait Notifier: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the message could not be delivered.
    fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, n: &Notification) -> anyhow::Result<()> {
        let fields = n
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match n.kind {
            NotificationKind::RunCompleted => {
                tracing::info!(run_id = %n.run_id, fields = %fields, summary = %n.body, "{}", n.title);
            }
            NotificationKind::RunFailed => {
                tracing::error!(run_id = %n.run_id, fields = %fields, error = %n.body, "{}", n.title);
            }
        }
        Ok(())
    }
}

pub(crate) fn notify_completed(notifier: &dyn Notifier, run: &Run) {
    deliver(notifier, &Notification::run_completed(run));
}

pub(crate) fn notify_failed(notifier: &dyn Notifier, run: &Run) {
    deliver(notifier, &Notification::run_failed(run));
}

fn deliver(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.send(notification) {
        tracing::warn!(
            run_id = %notification.run_id,
            kind = ?notification.kind,
            error = %e,
            "Failed to send run notification"
        );
    }
}
