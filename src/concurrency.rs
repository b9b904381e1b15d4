//! Named concurrency limits for background work
//!
//! Background tasks are tagged with a [`SemaphoreGroup`]. Tasks in the same
//! group share one semaphore, so at most `max_permits` of them run at once.
//! Semaphores are created lazily on first use; the first group to create a key
//! fixes its permit count.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::identifier::Identifier;
use crate::query::QueryKind;

const DEFAULT_MAX: usize = 1;
const ENCODING_MAX: usize = 4;
const HOST_MAX: usize = 4;
const LOCAL_QUERY_MAX: usize = 3;
const REMOTE_QUERY_MAX: usize = 6;

/// A concurrency group, identified by its key
#[derive(Debug, Clone)]
pub struct SemaphoreGroup {
    key: String,
    max_permits: usize,
}

impl SemaphoreGroup {
    pub fn new(key: impl Into<String>, max_permits: usize) -> Self {
        Self {
            key: key.into(),
            max_permits: max_permits.max(1),
        }
    }

    /// Catch-all group, one task at a time
    pub fn default_group() -> Self {
        Self::new("mediaswap:default", DEFAULT_MAX)
    }

    /// Image conversion and transcoding
    pub fn encoding() -> Self {
        Self::new("mediaswap:encoding", ENCODING_MAX)
    }

    /// Downloads against a single remote host
    pub fn for_host(id: &Identifier) -> Self {
        Self::new(format!("host:{}", id.namespace()), HOST_MAX)
    }

    pub fn for_query(kind: QueryKind) -> Self {
        match kind {
            QueryKind::Local => Self::new("query:local", LOCAL_QUERY_MAX),
            QueryKind::Remote => Self::new("query:remote", REMOTE_QUERY_MAX),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }
}

impl PartialEq for SemaphoreGroup {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for SemaphoreGroup {}

impl Hash for SemaphoreGroup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// Spawns tasks on the runtime, bounded by their group's semaphore
pub struct ConcurrencyGroups {
    runtime: Handle,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ConcurrencyGroups {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    fn semaphore(&self, group: &SemaphoreGroup) -> Arc<Semaphore> {
        self.semaphores
            .lock()
            .entry(group.key.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(group.max_permits)))
            .clone()
    }

    /// Run `task` in the background once a permit of `group` is free.
    ///
    /// The permit lives inside the spawned task, so it is released when the
    /// task finishes, fails or panics.
    pub fn run<F, T>(&self, group: &SemaphoreGroup, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = self.semaphore(group);
        let key = group.key.clone();

        self.runtime.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            tracing::trace!(group = %key, "Acquired group permit");
            task.await
        })
    }

    pub fn available_permits(&self, group: &SemaphoreGroup) -> usize {
        self.semaphore(group).available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn run_tracked(groups: &ConcurrencyGroups, group: SemaphoreGroup, tasks: usize) -> usize {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..tasks)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                groups.run(&group, async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        peak.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_group_bounds_parallelism() {
        let groups = ConcurrencyGroups::new(Handle::current());

        assert_eq!(run_tracked(&groups, SemaphoreGroup::default_group(), 5).await, 1);
        assert!(run_tracked(&groups, SemaphoreGroup::encoding(), 10).await <= ENCODING_MAX);
    }

    fn group_should_fail() -> bool {
        true
    }

    #[tokio::test]
    async fn test_permit_released_after_panic() {
        let groups = ConcurrencyGroups::new(Handle::current());
        let group = SemaphoreGroup::default_group();

        let failed = groups.run(&group, async {
            if group_should_fail() {
                panic!("boom");
            }
        });
        assert!(failed.await.is_err());

        let ok = groups.run(&group, async { 7 });
        assert_eq!(ok.await.unwrap(), 7);
        assert_eq!(groups.available_permits(&group), 1);
    }

    #[test]
    fn test_groups_compare_by_key() {
        let a = Identifier::parse("example.com:a").unwrap();
        let b = Identifier::parse("example.com:b").unwrap();
        assert_eq!(SemaphoreGroup::for_host(&a), SemaphoreGroup::for_host(&b));
        assert_ne!(
            SemaphoreGroup::for_query(QueryKind::Local),
            SemaphoreGroup::for_query(QueryKind::Remote)
        );
        assert_eq!(SemaphoreGroup::for_query(QueryKind::Remote).max_permits(), 6);
    }
}
