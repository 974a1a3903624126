//! The remote loader dispatcher.
//!
//! [`RemoteLoader`] turns "this target wants the object behind this key"
//! requests into cache lookups and bounded-concurrency fetch jobs. The
//! interesting part is not the fetching but the bookkeeping around recycled
//! targets: a target (think: a list row) can be re-requested with a new key
//! while an earlier fetch for it is still in flight, and the outcome of that
//! earlier fetch must never reach it.
//!
//! This is solved with tags. [`RemoteLoader::request`] tags the target with
//! the requested key; every delivery re-checks the tag against the key the
//! outcome belongs to and silently drops mismatches. Terminal outcomes clear
//! the tag, progress updates leave it in place.
//!
//! Requests are served in three ways:
//!
//! - A memory-tier hit is delivered synchronously on the calling thread,
//!   with no [`Started`](LoadOutcome::Started) event.
//! - Re-requesting the key a target is already tagged with is a no-op, so
//!   rapid-fire requests coalesce into one fetch.
//! - Everything else becomes an async job: it re-checks the full cache
//!   (disk included), fetches through the [`Transport`] with the configured
//!   retry budget, writes the result through the cache, and hands the
//!   outcome to the delivery task.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};

use crate::caching::{CacheContents, CacheError, ObjectCache};
use crate::config::LoaderConfig;
use crate::http::Transport;

mod target;

pub use target::{LoadOutcome, LoadTarget, TargetTag};

/// An outcome on its way to a target, still subject to the tag check.
struct Delivery {
    target: Arc<dyn LoadTarget>,
    key: String,
    outcome: LoadOutcome,
}

/// Dispatches fetch jobs for cache-missed objects and delivers outcomes to
/// tagged targets.
pub struct RemoteLoader {
    runtime: tokio::runtime::Handle,
    semaphore: Arc<Semaphore>,
    cache: Arc<ObjectCache>,
    transport: Arc<dyn Transport>,
    delivery: mpsc::UnboundedSender<Delivery>,
    retries: usize,
}

impl fmt::Debug for RemoteLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLoader")
            .field("cache", &self.cache.name())
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl RemoteLoader {
    /// Creates a loader and spawns its delivery task on `runtime`.
    ///
    /// The task runs until the loader is dropped.
    pub fn new(
        config: &LoaderConfig,
        cache: Arc<ObjectCache>,
        transport: Arc<dyn Transport>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        runtime.spawn(async move {
            while let Some(delivery) = rx.recv().await {
                deliver(&*delivery.target, &delivery.key, delivery.outcome);
            }
        });

        RemoteLoader {
            runtime,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            cache,
            transport,
            delivery: tx,
            retries: config.retries,
        }
    }

    /// The cache this loader reads from and writes through to.
    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    /// Requests the object behind `key` on behalf of `target`.
    ///
    /// A `None` key detaches the target from whatever it was waiting for and
    /// resets it via [`LoadOutcome::Started`]. Re-requesting the key the
    /// target is already tagged with is a no-op. A memory-resident object is
    /// delivered before this returns; anything else goes through a fetch job
    /// and arrives on the delivery task later.
    pub fn request(&self, target: Arc<dyn LoadTarget>, key: Option<&str>) {
        metric!(counter("loader.requests") += 1, "cache" => self.cache.name());

        let Some(key) = key else {
            target.set_tag(None);
            target.apply(LoadOutcome::Started);
            return;
        };

        if target.tag().as_deref() == Some(key) {
            tracing::trace!(key, "fetch already in flight for this target");
            return;
        }
        target.set_tag(Some(key.to_owned()));

        if let Some(item) = self.cache.get_memory(key) {
            deliver(&*target, key, LoadOutcome::Succeeded(item));
            return;
        }

        target.apply(LoadOutcome::Started);
        self.spawn_job(target, key.to_owned());
    }

    fn spawn_job(&self, target: Arc<dyn LoadTarget>, key: String) {
        let semaphore = self.semaphore.clone();
        let cache = self.cache.clone();
        let transport = self.transport.clone();
        let delivery = self.delivery.clone();
        let retries = self.retries;

        self.runtime.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            // A parallel request may have landed the object while this job
            // waited for a permit. This also picks up disk entries.
            if let Some(item) = cache.get(&key) {
                let _ = delivery.send(Delivery {
                    target,
                    key,
                    outcome: LoadOutcome::Succeeded(item),
                });
                return;
            }

            let progress = {
                let delivery = delivery.clone();
                let target = target.clone();
                let key = key.clone();
                move |bytes: u64| {
                    let _ = delivery.send(Delivery {
                        target: target.clone(),
                        key: key.clone(),
                        outcome: LoadOutcome::Progress(bytes),
                    });
                }
            };

            let outcome = match retry(retries, || transport.fetch(&key, &progress)).await {
                Ok(bytes) => {
                    cache.put(&key, bytes.clone());
                    LoadOutcome::Succeeded(bytes)
                }
                Err(e) => {
                    tracing::debug!(key, error = %e, "fetch job failed");
                    LoadOutcome::Failed(e)
                }
            };

            let _ = delivery.send(Delivery {
                target,
                key,
                outcome,
            });
        });
    }
}

/// Applies `outcome` to `target` unless the target has been retagged since
/// the outcome was produced.
///
/// Terminal outcomes clear the tag so a later request for the same key is
/// not mistaken for a duplicate. Progress updates keep it.
fn deliver(target: &dyn LoadTarget, key: &str, outcome: LoadOutcome) {
    if target.tag().as_deref() != Some(key) {
        tracing::trace!(key, "dropping outcome for retagged target");
        return;
    }

    match outcome {
        LoadOutcome::Progress(_) => target.apply(outcome),
        outcome => {
            target.set_tag(None);
            target.apply(outcome);
        }
    }
}

/// Retries `task_gen` until it produces a definitive result or the budget of
/// `retries` additional attempts is spent.
pub(crate) async fn retry<G, F, T>(retries: usize, task_gen: G) -> CacheContents<T>
where
    G: Fn() -> F,
    F: Future<Output = CacheContents<T>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        let result = task_gen().await;

        // A missing object or a rejected credential will not change between
        // attempts.
        let should_not_retry = matches!(
            result,
            Ok(_) | Err(CacheError::NotFound | CacheError::PermissionDenied(_))
        );

        if should_not_retry || tries > retries {
            break result;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
