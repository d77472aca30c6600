use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::DomainEvent;

use super::{EventPublisher, PublishError};

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    queues: HashMap<&'static str, Vec<DomainEvent>>,
    fail: bool,
}

/// Publisher that keeps events in per-queue vectors.
///
/// Used by tests and when no database is configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<Mutex<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPublisherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `publish` fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.state().fail = fail;
    }

    /// Events on one queue, in publish order.
    pub fn published(&self, queue: &str) -> Vec<DomainEvent> {
        self.state().queues.get(queue).cloned().unwrap_or_default()
    }

    /// Number of events of the given type, e.g. `PAYMENT_COMPLETED`.
    pub fn count(&self, event_type: &str) -> usize {
        self.state()
            .queues
            .values()
            .flatten()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn total(&self) -> usize {
        self.state().queues.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let mut state = self.state();
        if state.fail {
            return Err(PublishError::Unavailable(
                "publisher configured to fail".to_string(),
            ));
        }
        state
            .queues
            .entry(event.queue())
            .or_default()
            .push(event.clone());
        Ok(())
    }
}
