//! Transactional registry updates
//!
//! Every registry write is load, mutate, conditional store. A store that
//! reports a conflict means another writer committed first; the mutation is
//! re-run against the fresh snapshot.

use super::Instances;
use crate::retry::{with_retry, RetryConfig};
use crate::store::InstanceStore;
use crate::Result;
use std::future::Future;
use tracing::debug;

/// Apply `mutate` to the registry with optimistic concurrency.
///
/// The mutation receives the current snapshot and returns the snapshot to
/// store plus an output for the caller. It may run more than once, so any
/// external effect it performs must be idempotent. An error from the
/// mutation aborts without writing.
pub async fn update_instances<F, Fut, T>(store: &dyn InstanceStore, mutate: F) -> Result<T>
where
    F: Fn(Instances) -> Fut,
    Fut: Future<Output = Result<(Instances, T)>>,
{
    update_instances_with(store, &RetryConfig::for_store_conflicts(), mutate).await
}

/// [`update_instances`] with an explicit retry policy
pub async fn update_instances_with<F, Fut, T>(
    store: &dyn InstanceStore,
    retry: &RetryConfig,
    mutate: F,
) -> Result<T>
where
    F: Fn(Instances) -> Fut,
    Fut: Future<Output = Result<(Instances, T)>>,
{
    let mutate = &mutate;
    with_retry(retry, "update_instances", move || async move {
        let current = store.load_instances().await?;
        let (next, output) = mutate(current.value).await?;
        let revision = store.store_instances(&next, current.revision).await?;
        debug!(revision, instances = next.len(), "Stored instance registry");
        Ok(output)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceCommon, InstanceType};
    use crate::store::{MemoryStore, Revision, Stamped};
    use crate::types::Id;
    use crate::JiraLinkError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn server(id: &str) -> InstanceCommon {
        InstanceCommon::new(id, InstanceType::Server)
    }

    #[tokio::test]
    async fn test_mutation_error_writes_nothing() {
        let store = MemoryStore::new();
        update_instances(&store, |mut instances| async move {
            instances.set(server("https://a"));
            Ok((instances, ()))
        })
        .await
        .unwrap();

        let result: Result<()> = update_instances(&store, |mut instances| async move {
            instances.set(server("https://b"));
            Err(JiraLinkError::InvalidInput("rejected".into()))
        })
        .await;
        assert!(result.is_err());

        let stored = store.load_instances().await.unwrap().value;
        assert_eq!(stored.ids(), vec![Id::new("https://a")]);
    }

    #[tokio::test]
    async fn test_concurrent_updates_all_land() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                update_instances(&*store, |mut instances| async move {
                    // Widen the window between load and store
                    tokio::task::yield_now().await;
                    instances.set(server(&format!("https://{}", n)));
                    Ok((instances, ()))
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.load_instances().await.unwrap().value;
        assert_eq!(stored.len(), 8);
    }

    /// Rejects the first `conflicts` stores, then delegates
    struct FlakyStore {
        inner: MemoryStore,
        conflicts: AtomicUsize,
        mutations: AtomicUsize,
    }

    #[async_trait]
    impl InstanceStore for FlakyStore {
        async fn load_instances(&self) -> Result<Stamped<Instances>> {
            self.inner.load_instances().await
        }

        async fn store_instances(&self, instances: &Instances, expected: Revision) -> Result<Revision> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                return Err(JiraLinkError::Conflict("instances".into()));
            }
            self.inner.store_instances(instances, expected).await
        }

        async fn load_instance(&self, id: &Id) -> Result<crate::instance::Instance> {
            self.inner.load_instance(id).await
        }

        async fn store_instance(&self, instance: &crate::instance::Instance) -> Result<()> {
            self.inner.store_instance(instance).await
        }

        async fn delete_instance(&self, id: &Id) -> Result<()> {
            self.inner.delete_instance(id).await
        }
    }

    #[tokio::test]
    async fn test_conflict_reruns_mutation() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            conflicts: AtomicUsize::new(2),
            mutations: AtomicUsize::new(0),
        };

        let len = update_instances(&store, |mut instances| {
            store.mutations.fetch_add(1, Ordering::SeqCst);
            async move {
                instances.set(server("https://a"));
                let len = instances.len();
                Ok((instances, len))
            }
        })
        .await
        .unwrap();

        assert_eq!(len, 1);
        assert_eq!(store.mutations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_conflict_budget_exhausted() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            conflicts: AtomicUsize::new(usize::MAX / 2),
            mutations: AtomicUsize::new(0),
        };
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
            ..RetryConfig::for_store_conflicts()
        };

        let result = update_instances_with(&store, &retry, |instances| async move {
            Ok((instances, ()))
        })
        .await;
        assert!(matches!(result, Err(JiraLinkError::Conflict(_))));
    }
}
