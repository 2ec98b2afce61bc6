//! Deferred computation graph.
//!
//! A [`Node`] describes a value without computing it. Evaluation happens on first
//! request and is memoized, so sibling nodes that share a parent reuse its result. Every
//! node carries the parameter version of the snapshot it was built from.

use std::sync::{Arc, Mutex, OnceLock};

use crate::types::{FloodError, FloodResult, Versioned};

type Eval<T> = Box<dyn Fn() -> FloodResult<T> + Send + Sync>;

struct NodeInner<T> {
    version: u64,
    label: String,
    memo: OnceLock<FloodResult<Arc<T>>>,
    eval: Eval<T>,
}

/// Lazily evaluated, memoized value
pub struct Node<T> {
    inner: Arc<NodeInner<T>>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> std::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("label", &self.inner.label)
            .field("version", &self.inner.version)
            .field("evaluated", &self.inner.memo.get().is_some())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Node<T> {
    pub fn new<F>(version: u64, label: &str, eval: F) -> Self
    where
        F: Fn() -> FloodResult<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(NodeInner {
                version,
                label: label.to_string(),
                memo: OnceLock::new(),
                eval: Box::new(eval),
            }),
        }
    }

    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_evaluated(&self) -> bool {
        self.inner.memo.get().is_some()
    }

    /// Compute on first call, then return the memoized result. Errors are memoized too.
    pub fn evaluate(&self) -> FloodResult<Arc<T>> {
        self.inner
            .memo
            .get_or_init(|| {
                log::debug!("Evaluating {} (v{})", self.inner.label, self.inner.version);
                let result = (self.inner.eval)().map(Arc::new);
                if let Err(e) = &result {
                    log::debug!("{} (v{}) failed: {}", self.inner.label, self.inner.version, e);
                }
                result
            })
            .clone()
    }

    pub fn map<U, F>(&self, label: &str, f: F) -> Node<U>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> FloodResult<U> + Send + Sync + 'static,
    {
        let parent = self.clone();
        Node::new(self.version(), label, move || f(parent.evaluate()?.as_ref()))
    }

    pub fn zip<U>(&self, other: &Node<U>, label: &str) -> Node<(Arc<T>, Arc<U>)>
    where
        U: Send + Sync + 'static,
    {
        let (left, right) = (self.clone(), other.clone());
        Node::new(self.version().max(other.version()), label, move || {
            Ok((left.evaluate()?, right.evaluate()?))
        })
    }

    /// Evaluate on the blocking pool and tag the result with the node's version
    pub async fn materialize(&self) -> FloodResult<Versioned<Arc<T>>> {
        let node = self.clone();
        let value = tokio::task::spawn_blocking(move || node.evaluate())
            .await
            .map_err(|e| FloodError::Processing(format!("{} task failed: {}", self.label(), e)))??;
        Ok(Versioned {
            version: self.version(),
            value,
        })
    }
}

struct SlotState<T> {
    latest_submitted: u64,
    published: Option<Versioned<T>>,
}

/// Holder for the most recent result of a recomputed layer.
///
/// Results whose version is older than the newest submitted request are rejected, so a
/// slow recompute can never overwrite the output of a later parameter change.
pub struct ResultSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T: Clone> ResultSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                latest_submitted: 0,
                published: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record that a recompute for `version` has started
    pub fn submit(&self, version: u64) {
        let mut state = self.lock();
        state.latest_submitted = state.latest_submitted.max(version);
    }

    /// Store `result` unless a newer version was submitted or published. Returns whether
    /// the result was kept.
    pub fn publish(&self, result: Versioned<T>) -> bool {
        let mut state = self.lock();
        let newer_published = state
            .published
            .as_ref()
            .map_or(false, |p| p.version > result.version);
        if result.version < state.latest_submitted || newer_published {
            log::debug!(
                "Discarding stale result v{} (latest request v{})",
                result.version,
                state.latest_submitted
            );
            return false;
        }
        state.latest_submitted = state.latest_submitted.max(result.version);
        state.published = Some(result);
        true
    }

    pub fn latest(&self) -> Option<Versioned<T>> {
        self.lock().published.clone()
    }

    pub fn latest_submitted(&self) -> u64 {
        self.lock().latest_submitted
    }
}

impl<T: Clone> Default for ResultSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_node_is_lazy_and_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let node = Node::new(3, "answer", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42u32)
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!node.is_evaluated());

        let doubled = node.map("doubled", |v| Ok(v * 2));
        let tripled = node.map("tripled", |v| Ok(v * 3));
        assert_eq!(*doubled.evaluate().unwrap(), 84);
        assert_eq!(*tripled.evaluate().unwrap(), 126);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(doubled.version(), 3);
    }

    #[test]
    fn test_errors_propagate_through_map() {
        let failing: Node<u32> = Node::new(1, "failing", || Err(FloodError::Processing("boom".to_string())));
        let child = failing.map("child", |v| Ok(*v + 1));
        assert_eq!(child.evaluate().unwrap_err(), FloodError::Processing("boom".to_string()));
    }

    #[test]
    fn test_stale_results_are_rejected() {
        let slot: ResultSlot<&str> = ResultSlot::new();
        slot.submit(1);
        slot.submit(2);
        assert!(slot.publish(Versioned { version: 2, value: "new" }));
        assert!(!slot.publish(Versioned { version: 1, value: "old" }));
        assert_eq!(slot.latest().unwrap().value, "new");
    }

    #[tokio::test]
    async fn test_materialize_tags_version() {
        let node = Node::new(7, "seven", || Ok(String::from("done")));
        let result = node.materialize().await.unwrap();
        assert_eq!(result.version, 7);
        assert_eq!(result.value.as_str(), "done");
    }
}
