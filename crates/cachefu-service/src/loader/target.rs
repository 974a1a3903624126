use std::sync::Mutex;

use bytes::Bytes;

use crate::caching::CacheError;

/// What a load attempt produced, in the order a target observes it.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// The load could not be served from memory; a fetch job has been
    /// dispatched. A good moment to show a placeholder.
    Started,
    /// Running byte count of the download.
    Progress(u64),
    /// The object is available.
    Succeeded(Bytes),
    /// The fetch failed, with the retry budget spent.
    Failed(CacheError),
}

/// A consumer of load outcomes, identified over time by its tag.
///
/// Targets are recycled: the same target can be handed to the loader again
/// with a different key while an earlier fetch is still in flight. The tag
/// records which key the target currently wants, and deliveries for any
/// other key are silently dropped.
///
/// Implementations must tolerate `apply` being called from the loader's
/// delivery task as well as from the thread calling
/// [`RemoteLoader::request`](super::RemoteLoader::request).
pub trait LoadTarget: Send + Sync + 'static {
    /// The key this target currently waits for, if any.
    fn tag(&self) -> Option<String>;

    fn set_tag(&self, tag: Option<String>);

    fn apply(&self, outcome: LoadOutcome);
}

/// Interior-mutable tag storage for [`LoadTarget`] implementations.
#[derive(Debug, Default)]
pub struct TargetTag(Mutex<Option<String>>);

impl TargetTag {
    pub fn get(&self) -> Option<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn set(&self, tag: Option<String>) {
        *self.0.lock().unwrap() = tag;
    }
}
