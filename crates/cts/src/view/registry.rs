//! The shared, reference-counted map from dependency identity to its
//! live view, plus the single notification channel every fetch loop
//! publishes to.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogClient, Dependency, QueryResult};

use super::fetch;

struct ViewState {
    result: Option<QueryResult>,
    index: u64,
    failed: bool,
}

/// One live subscription to a dependency: last value, last index, and
/// whether the fetch loop has entered permanent failure.
pub struct ViewHandle {
    pub dependency: Dependency,
    state: parking_lot::RwLock<ViewState>,
    refcount: AtomicUsize,
    pub(crate) cancel: CancellationToken,
}

impl ViewHandle {
    fn new(dependency: Dependency, cancel: CancellationToken) -> Self {
        Self {
            dependency,
            state: parking_lot::RwLock::new(ViewState {
                result: None,
                index: 0,
                failed: false,
            }),
            refcount: AtomicUsize::new(1),
            cancel,
        }
    }

    /// Last index observed, 0 if this view has never fetched.
    pub fn current_index(&self) -> u64 {
        self.state.read().index
    }

    /// True once a value has been stored at least once.
    pub fn is_ready(&self) -> bool {
        self.state.read().result.is_some()
    }

    pub fn failed(&self) -> bool {
        self.state.read().failed
    }

    /// A clone of the last stored value, if any.
    pub fn value(&self) -> Option<QueryResult> {
        self.state.read().result.clone()
    }

    pub(crate) fn store(&self, result: QueryResult, index: u64) {
        let mut state = self.state.write();
        state.result = Some(result);
        state.index = index;
        state.failed = false;
    }

    pub(crate) fn mark_failed(&self) {
        self.state.write().failed = true;
    }
}

/// Shared registry of views keyed by dependency identity. `Register`
/// creates the view's background fetch task on first reference;
/// `Stop` tears it down at zero references.
pub struct ViewRegistry {
    views: DashMap<Dependency, Arc<ViewHandle>>,
    client: Arc<dyn CatalogClient>,
    notify_tx: broadcast::Sender<Dependency>,
    root_cancel: CancellationToken,
}

impl ViewRegistry {
    pub fn new(client: Arc<dyn CatalogClient>, root_cancel: CancellationToken) -> Self {
        let (notify_tx, _) = broadcast::channel(1024);
        Self {
            views: DashMap::new(),
            client,
            notify_tx,
            root_cancel,
        }
    }

    /// A fresh receiver on the shared notification channel. Each
    /// subscriber (one per dynamic driver) gets its own lagging
    /// cursor; a slow subscriber only loses its own backlog.
    pub fn subscribe(&self) -> broadcast::Receiver<Dependency> {
        self.notify_tx.subscribe()
    }

    /// Returns the canonical view for `dependency`, creating and
    /// starting its fetch loop if this is the first reference.
    pub fn register(&self, dependency: Dependency) -> Arc<ViewHandle> {
        if let Some(existing) = self.views.get(&dependency) {
            existing.refcount.fetch_add(1, Ordering::SeqCst);
            return existing.clone();
        }

        let handle = Arc::new(ViewHandle::new(
            dependency.clone(),
            self.root_cancel.child_token(),
        ));
        self.views.insert(dependency.clone(), handle.clone());
        fetch::spawn(self.client.clone(), handle.clone(), self.notify_tx.clone());
        handle
    }

    /// Releases one reference; stops the fetch loop and drops the view
    /// once the reference count reaches zero.
    pub fn stop(&self, dependency: &Dependency) {
        let should_remove = match self.views.get(dependency) {
            Some(entry) => entry.refcount.fetch_sub(1, Ordering::SeqCst) == 1,
            None => false,
        };
        if should_remove {
            if let Some((_, handle)) = self.views.remove(dependency) {
                handle.cancel.cancel();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FakeCatalogClient;

    fn dep(name: &str) -> Dependency {
        Dependency::ServiceHealthByName {
            name: name.to_string(),
            datacenter: None,
            namespace: None,
            node_meta: None,
            filter: None,
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_per_identity() {
        let client = Arc::new(FakeCatalogClient::new());
        let registry = ViewRegistry::new(client, CancellationToken::new());
        let a = registry.register(dep("api"));
        let b = registry.register(dep("api"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn stop_removes_view_at_zero_refcount() {
        let client = Arc::new(FakeCatalogClient::new());
        let registry = ViewRegistry::new(client, CancellationToken::new());
        registry.register(dep("api"));
        registry.register(dep("api"));
        registry.stop(&dep("api"));
        assert_eq!(registry.len(), 1);
        registry.stop(&dep("api"));
        assert_eq!(registry.len(), 0);
    }
}
