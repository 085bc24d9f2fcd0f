//! # fed-cache
//!
//! Shared-state stores for the SAML federation engine.
//!
//! The protocol engine is stateless per call except for three pieces of
//! shared state, each behind its own capability trait so deployments can
//! back them with whatever persistence they already run:
//!
//! - [`ReplayStore`] - pending request ids awaiting a matching `InResponseTo`
//! - [`OneTimeUseCache`] - ids of consumed `OneTimeUse` assertions
//! - [`ArtifactStore`] - outbound messages waiting to be fetched by artifact
//!
//! Every trait requires the read-check-write of its consuming operation to be
//! atomic: two concurrent consumers of the same entry must not both succeed.
//!
//! The [`memory`] module provides TTL-bounded in-process implementations.
//!
//! ## Example
//!
//! ```ignore
//! use fed_cache::{MemoryReplayStore, ReplayScope, ReplayStore};
//! use std::time::Duration;
//!
//! let store = MemoryReplayStore::new();
//! let scope = ReplayScope::session("abc");
//! store.record_request(&scope, "id42", Duration::from_secs(600)).await?;
//! assert!(store.consume(&scope, "id42").await?);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod provider;

pub use error::{CacheError, CacheResult};
pub use memory::{MemoryArtifactStore, MemoryOneTimeUseCache, MemoryReplayStore};
pub use provider::{ArtifactStore, OneTimeUseCache, ReplayScope, ReplayStore};
