use std::time::Duration;

use thiserror::Error;

/// An error that happens when fetching an object from a remote location.
///
/// Cache lookups never produce these directly; they are what a failed fetch
/// resolves to, and what gets delivered to loader targets on the error path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The object was not found at the remote source.
    #[error("not found")]
    NotFound,
    /// The object could not be fetched from the remote source due to missing
    /// permissions.
    ///
    /// The attached string contains the remote source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The object could not be fetched from the remote source due to a timeout.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The object could not be fetched from the remote source due to another
    /// problem, like connection loss, DNS resolution, or a 5xx server response.
    ///
    /// The attached string contains the underlying cause.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The object was fetched successfully, but is invalid in some way.
    ///
    /// For example, a cached response record too short to carry its status code.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error in cachefu itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The result of a cache lookup or fetch, containing either `Ok(T)` or an
/// error denoting the reason why an object could not be fetched or is
/// otherwise unusable.
pub type CacheContents<T = ()> = Result<T, CacheError>;
