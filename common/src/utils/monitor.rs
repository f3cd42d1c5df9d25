use std::{
    sync::{PoisonError, RwLock},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AiState {
    Idle,
    Thinking,
    Searching,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub status: String,
    pub ai_state: AiState,
    pub ai_latency_ms: Option<u64>,
    pub extraction_ms: Option<u64>,
    pub last_activity: DateTime<Utc>,
}

struct MonitorInner {
    status: String,
    ai_state: AiState,
    state_since: Instant,
    ai_latency_ms: Option<u64>,
    extraction_ms: Option<u64>,
    last_activity: DateTime<Utc>,
}

/// Process-wide status shared by the chat and ingestion paths. A `Thinking`
/// state older than the configured timeout reads back as `Timeout`.
pub struct SystemMonitor {
    inner: RwLock<MonitorInner>,
    thinking_timeout: Duration,
}

impl SystemMonitor {
    pub fn new(thinking_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(MonitorInner {
                status: "online".to_string(),
                ai_state: AiState::Idle,
                state_since: Instant::now(),
                ai_latency_ms: None,
                extraction_ms: None,
                last_activity: Utc::now(),
            }),
            thinking_timeout,
        }
    }

    pub fn set_ai_state(&self, state: AiState) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.ai_state = state;
        inner.state_since = Instant::now();
        inner.last_activity = Utc::now();
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.status = status.into();
    }

    pub fn record_ai_latency(&self, elapsed: Duration) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.ai_latency_ms = Some(millis(elapsed));
        inner.last_activity = Utc::now();
    }

    pub fn record_extraction(&self, elapsed: Duration) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.extraction_ms = Some(millis(elapsed));
        inner.last_activity = Utc::now();
    }

    pub fn ai_state(&self) -> AiState {
        self.snapshot().ai_state
    }

    /// Current metrics, expiring a stale `Thinking` state first.
    pub fn snapshot(&self) -> MonitorSnapshot {
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if inner.ai_state == AiState::Thinking
                && inner.state_since.elapsed() > self.thinking_timeout
            {
                inner.ai_state = AiState::Timeout;
                inner.state_since = Instant::now();
            }
        }

        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        MonitorSnapshot {
            status: inner.status.clone(),
            ai_state: inner.ai_state,
            ai_latency_ms: inner.ai_latency_ms,
            extraction_ms: inner.extraction_ms,
            last_activity: inner.last_activity,
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
