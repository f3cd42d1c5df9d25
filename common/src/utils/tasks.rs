use std::{future::Future, time::Instant};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
    Panicked(String),
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub label: String,
    pub outcome: TaskOutcome,
    pub elapsed_ms: u64,
}

/// Submission point for fire-and-forget background work. Every task reports
/// its outcome over a channel, so failures and panics are never dropped.
#[derive(Clone)]
pub struct TaskSupervisor {
    reports: mpsc::UnboundedSender<TaskReport>,
}

impl TaskSupervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskReport>) {
        let (reports, receiver) = mpsc::unbounded_channel();
        (Self { reports }, receiver)
    }

    /// Supervisor whose reports are logged by a spawned loop.
    pub fn with_logging() -> Self {
        let (supervisor, receiver) = Self::new();
        tokio::spawn(run_report_loop(receiver));
        supervisor
    }

    /// Runs `task` detached. The returned handle resolves to the outcome; it
    /// may be dropped, the report is sent regardless.
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> JoinHandle<TaskOutcome>
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let label = label.into();
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match tokio::spawn(task).await {
                Ok(Ok(())) => TaskOutcome::Succeeded,
                Ok(Err(err)) => TaskOutcome::Failed(err.to_string()),
                Err(join_err) if join_err.is_panic() => TaskOutcome::Panicked(join_err.to_string()),
                Err(join_err) => TaskOutcome::Failed(join_err.to_string()),
            };
            let report = TaskReport {
                label,
                outcome: outcome.clone(),
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            };
            if let Err(unsent) = reports.send(report) {
                log_report(&unsent.0);
            }
            outcome
        })
    }
}

pub async fn run_report_loop(mut receiver: mpsc::UnboundedReceiver<TaskReport>) {
    while let Some(report) = receiver.recv().await {
        log_report(&report);
    }
    warn!("background task report channel closed");
}

fn log_report(report: &TaskReport) {
    match &report.outcome {
        TaskOutcome::Succeeded => info!(
            task = %report.label,
            elapsed_ms = report.elapsed_ms,
            "background task finished"
        ),
        TaskOutcome::Failed(reason) => error!(
            task = %report.label,
            elapsed_ms = report.elapsed_ms,
            error = %reason,
            "background task failed"
        ),
        TaskOutcome::Panicked(reason) => error!(
            task = %report.label,
            elapsed_ms = report.elapsed_ms,
            error = %reason,
            "background task panicked"
        ),
    }
}
