//! Error sink: a bounded in-memory history of dispatch-time failures plus
//! fan-out to registered listeners, so an embedding application can surface
//! "agent X failed on event Y" without scraping logs.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

const DEFAULT_HISTORY_CAPACITY: usize = 256;

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Clone, Debug)]
pub struct ErrorEvent {
    pub severity: Severity,
    pub source: Arc<str>,
    pub message: String,
    pub occurred_at_micros: i64,
    /// Correlates a dispatch-time failure with whatever item triggered it,
    /// when the caller has one (e.g. a replayed event's original id). Not
    /// every error has a natural correlation id, hence `Option`.
    pub correlation_id: Option<uuid::Uuid>,
}

pub trait ErrorListener: Send + Sync {
    fn on_error(&self, event: &ErrorEvent);
}

/// Collects [`ErrorEvent`]s emitted anywhere in the fabric. Cloning an
/// `ErrorSink` shares the same underlying history and listener set.
#[derive(Clone)]
pub struct ErrorSink {
    inner: Arc<Inner>,
}

struct Inner {
    history: Mutex<VecDeque<ErrorEvent>>,
    capacity: usize,
    listeners: Mutex<Vec<Arc<dyn ErrorListener>>>,
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ErrorSink {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                history: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ErrorListener>) {
        self.inner.listeners.lock().push(listener);
    }

    pub fn record(&self, event: ErrorEvent) {
        match event.severity {
            Severity::Critical | Severity::Error => {
                error!(source = %event.source, message = %event.message, "dispatch error")
            }
            Severity::Warning => {
                warn!(source = %event.source, message = %event.message, "dispatch warning")
            }
            Severity::Info => tracing::info!(source = %event.source, message = %event.message, "dispatch info"),
        }

        {
            let mut history = self.inner.history.lock();
            if history.len() == self.inner.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        for listener in self.inner.listeners.lock().iter() {
            listener.on_error(&event);
        }
    }

    pub fn history(&self) -> Vec<ErrorEvent> {
        self.inner.history.lock().iter().cloned().collect()
    }
}
