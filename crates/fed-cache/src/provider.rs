//! Store capability traits.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Where a pending request id is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplayScope {
    /// Bound to one user session. A session has at most one pending request;
    /// recording a new one replaces the old.
    Session(String),
    /// Process-wide set, used when the caller has no session.
    Process,
}

impl ReplayScope {
    /// Creates a session scope.
    #[must_use]
    pub fn session(id: impl Into<String>) -> Self {
        Self::Session(id.into())
    }
}

impl fmt::Display for ReplayScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(id) => write!(f, "session:{id}"),
            Self::Process => f.write_str("process"),
        }
    }
}

/// Records request ids so that responses can be matched by `InResponseTo`.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Records an outbound request id.
    async fn record_request(&self, scope: &ReplayScope, request_id: &str, ttl: Duration) -> CacheResult<()>;

    /// Atomically consumes the record matching `in_response_to`.
    ///
    /// Returns `true` only for the first caller that presents a live, matching
    /// id. Expired, unknown and already-consumed ids return `false`.
    async fn consume(&self, scope: &ReplayScope, in_response_to: &str) -> CacheResult<bool>;

    /// Returns the id currently pending for a session scope.
    async fn pending(&self, scope: &ReplayScope) -> CacheResult<Option<String>>;

    /// Drops any pending record for the scope (cancelled exchange).
    ///
    /// For [`ReplayScope::Process`] this is a no-op; individual process-wide
    /// records only expire.
    async fn discard(&self, scope: &ReplayScope) -> CacheResult<()>;
}

/// Remembers consumed `OneTimeUse` assertion ids.
#[async_trait]
pub trait OneTimeUseCache: Send + Sync {
    /// Inserts `id` unless already present.
    ///
    /// Returns `true` if this call inserted it; a concurrent duplicate gets
    /// `false`.
    async fn insert_if_absent(&self, id: &str, ttl: Duration) -> CacheResult<bool>;

    /// Checks whether `id` is currently recorded.
    async fn contains(&self, id: &str) -> CacheResult<bool>;
}

/// Holds outbound messages until their artifact is resolved.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores a serialized message under a message handle.
    async fn store(&self, handle: &str, message: String, ttl: Duration) -> CacheResult<()>;

    /// Removes and returns the message. Artifacts are single use.
    async fn take(&self, handle: &str) -> CacheResult<Option<String>>;
}
