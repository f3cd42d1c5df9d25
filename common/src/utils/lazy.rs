use std::{future::Future, sync::Arc};

use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::error::AppError;

/// Lifecycle of a process-wide resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Uninitialized,
    Ready,
    Disabled,
}

enum Slot<T> {
    Ready(Arc<T>),
    Disabled { reason: String, fatal: bool },
}

/// A heavy resource initialised at most once, by whichever caller gets there
/// first. A failed initialisation disables the resource for the rest of the
/// process lifetime; later callers get the cached failure without retrying.
pub struct LazyResource<T> {
    name: &'static str,
    cell: OnceCell<Slot<T>>,
}

impl<T> LazyResource<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceCell::const_new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ResourceState {
        match self.cell.get() {
            None => ResourceState::Uninitialized,
            Some(Slot::Ready(_)) => ResourceState::Ready,
            Some(Slot::Disabled { .. }) => ResourceState::Disabled,
        }
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        match self.cell.get() {
            Some(Slot::Disabled { reason, .. }) => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Returns the resource if it is already initialised.
    pub fn get(&self) -> Option<Arc<T>> {
        match self.cell.get() {
            Some(Slot::Ready(value)) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Runs `init` if nobody has yet; concurrent first callers wait on the
    /// same initialisation.
    ///
    /// An `IndexCorrupted` failure stays `IndexCorrupted` for every caller so
    /// startup can surface it; any other failure reads as `Unavailable`.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<T>, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let slot = self
            .cell
            .get_or_init(|| async {
                match init().await {
                    Ok(value) => {
                        info!(resource = self.name, "resource initialised");
                        Slot::Ready(Arc::new(value))
                    }
                    Err(err) => {
                        error!(
                            resource = self.name,
                            error = %err,
                            "resource initialisation failed; disabled for the process lifetime"
                        );
                        Slot::Disabled {
                            fatal: matches!(err, AppError::IndexCorrupted(_)),
                            reason: err.to_string(),
                        }
                    }
                }
            })
            .await;

        match slot {
            Slot::Ready(value) => Ok(Arc::clone(value)),
            Slot::Disabled { reason, fatal: true } => {
                Err(AppError::IndexCorrupted(format!("{}: {reason}", self.name)))
            }
            Slot::Disabled { reason, .. } => {
                Err(AppError::Unavailable(format!("{}: {reason}", self.name)))
            }
        }
    }
}
