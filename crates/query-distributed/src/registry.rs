//! Registry of live split executions, used for bulk cancellation

use crate::downstream::Cancellable;
use crate::types::ExecutionId;
use dashmap::DashMap;
use std::sync::Arc;

/// Tracks every split execution that has not yet reached a terminal outcome.
///
/// Executions register when created and deregister themselves when they
/// finish, fail or are cancelled.
pub struct OutstandingExecutions {
    executions: DashMap<ExecutionId, Arc<dyn Cancellable>>,
}

impl OutstandingExecutions {
    pub fn new() -> Self {
        Self {
            executions: DashMap::new(),
        }
    }

    /// Track an execution
    pub fn register(&self, id: ExecutionId, execution: Arc<dyn Cancellable>) {
        self.executions.insert(id, execution);
    }

    /// Stop tracking an execution. Returns false if it wasn't tracked.
    pub fn deregister(&self, id: &ExecutionId) -> bool {
        self.executions.remove(id).is_some()
    }

    pub fn contains(&self, id: &ExecutionId) -> bool {
        self.executions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// IDs of all tracked executions
    pub fn ids(&self) -> Vec<ExecutionId> {
        self.executions.iter().map(|e| *e.key()).collect()
    }

    /// Cancel every tracked execution, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        // Cancelling deregisters, so never hold a map guard while doing it
        let snapshot: Vec<Arc<dyn Cancellable>> =
            self.executions.iter().map(|e| Arc::clone(e.value())).collect();

        for execution in &snapshot {
            execution.cancel();
        }
        tracing::info!("Cancelled {} outstanding executions", snapshot.len());
        snapshot.len()
    }
}

impl Default for OutstandingExecutions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    /// Deregisters itself on cancel, the way a split execution does
    struct SelfRemoving {
        id: ExecutionId,
        registry: Weak<OutstandingExecutions>,
        cancels: AtomicUsize,
    }

    impl Cancellable for SelfRemoving {
        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if let Some(registry) = self.registry.upgrade() {
                registry.deregister(&self.id);
            }
        }
    }

    #[test]
    fn test_register_and_deregister() {
        let registry = OutstandingExecutions::new();
        let id = ExecutionId::new();

        registry.register(id, Arc::new(tokio_util::sync::CancellationToken::new()));
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec![id]);

        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all_with_self_removal() {
        let registry = Arc::new(OutstandingExecutions::new());
        let mut entries = Vec::new();
        for _ in 0..3 {
            let entry = Arc::new(SelfRemoving {
                id: ExecutionId::new(),
                registry: Arc::downgrade(&registry),
                cancels: AtomicUsize::new(0),
            });
            registry.register(entry.id, entry.clone());
            entries.push(entry);
        }

        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());
        for entry in entries {
            assert_eq!(entry.cancels.load(Ordering::SeqCst), 1);
        }
    }
}
