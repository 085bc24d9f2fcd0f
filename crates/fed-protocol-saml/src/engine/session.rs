//! Protocol state kept in the caller's session.
//!
//! The engine never owns sessions. It reads and writes a handful of fixed
//! keys through [`SessionContext`], serializing values as JSON.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fed_cache::ReplayScope;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ErrorCategory, SamlError, SamlResult};
use crate::types::NameId;

/// Key of the [`SsoState`].
pub const SSO_STATE_KEY: &str = "fed.saml.sso_state";

/// Key of the [`SloState`].
pub const SLO_STATE_KEY: &str = "fed.saml.slo_state";

/// Key of the [`SignOnRecord`].
pub const SIGN_ON_KEY: &str = "fed.saml.sign_on";

/// Key of the IdP chosen for the last request.
pub const IDP_KEY: &str = "fed.saml.idp";

/// A session-like key/value store supplied by the web layer.
pub trait SessionContext: Send + Sync {
    /// Stable session identifier.
    fn id(&self) -> &str;

    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes a value.
    fn set(&self, key: &str, value: String);

    /// Removes a value.
    fn remove(&self, key: &str);
}

/// In-memory session, for tests and single-process deployments.
#[derive(Debug)]
pub struct MemorySession {
    id: String,
    values: Mutex<HashMap<String, String>>,
}

impl MemorySession {
    /// Creates an empty session.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an empty session with a random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self::new(fed_crypto::random_hex(16))
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl SessionContext for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.lock().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

/// Where pending request ids are recorded for this caller.
pub(crate) fn replay_scope(session: Option<&dyn SessionContext>) -> ReplayScope {
    session.map_or(ReplayScope::Process, |s| ReplayScope::session(s.id()))
}

fn load<T: DeserializeOwned>(session: &dyn SessionContext, key: &str) -> Option<T> {
    let raw = session.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(key = %key, error = %err, "ignoring unreadable session value");
            None
        }
    }
}

fn save<T: Serialize>(session: &dyn SessionContext, key: &str, value: &T) -> SamlResult<()> {
    let raw = serde_json::to_string(value).map_err(|e| SamlError::Storage(e.to_string()))?;
    session.set(key, raw);
    Ok(())
}

/// Single sign-on progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SsoState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// An `AuthnRequest` was sent.
    RequestSent {
        /// ID of the request.
        request_id: String,
        /// IdP it was sent to.
        idp: String,
    },
    /// A response arrived and is being processed.
    ResponsePending {
        /// Request the response claims to answer.
        in_response_to: Option<String>,
    },
    /// Sign-on completed.
    Authenticated {
        /// IdP that asserted the identity.
        idp: String,
    },
    /// The last response was rejected.
    Failed {
        /// Category of the rejection.
        category: ErrorCategory,
    },
}

impl SsoState {
    /// Reads the state, defaulting to [`SsoState::Idle`].
    #[must_use]
    pub fn load(session: &dyn SessionContext) -> Self {
        load(session, SSO_STATE_KEY).unwrap_or_default()
    }

    pub(crate) fn save(&self, session: &dyn SessionContext) -> SamlResult<()> {
        save(session, SSO_STATE_KEY, self)
    }
}

/// Single logout progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SloState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A `LogoutRequest` was sent.
    LogoutInitiated {
        /// ID of the request.
        request_id: String,
        /// IdP it was sent to.
        idp: String,
    },
    /// The IdP confirmed the logout.
    LogoutAcked,
}

impl SloState {
    /// Reads the state, defaulting to [`SloState::Idle`].
    #[must_use]
    pub fn load(session: &dyn SessionContext) -> Self {
        load(session, SLO_STATE_KEY).unwrap_or_default()
    }

    pub(crate) fn save(&self, session: &dyn SessionContext) -> SamlResult<()> {
        save(session, SLO_STATE_KEY, self)
    }
}

/// What the SP remembers about a completed sign-on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOnRecord {
    /// Asserting IdP.
    pub idp: String,
    /// Subject, including its format.
    pub name_id: NameId,
    /// `SessionIndex` of the authentication statement.
    pub session_index: Option<String>,
    /// When the SP accepted the assertion.
    pub authenticated_at: DateTime<Utc>,
}

impl SignOnRecord {
    /// Reads the record.
    #[must_use]
    pub fn load(session: &dyn SessionContext) -> Option<Self> {
        load(session, SIGN_ON_KEY)
    }

    pub(crate) fn save(&self, session: &dyn SessionContext) -> SamlResult<()> {
        save(session, SIGN_ON_KEY, self)
    }

    pub(crate) fn clear(session: &dyn SessionContext) {
        session.remove(SIGN_ON_KEY);
    }

    /// Returns true if a logout request for `name_id` and `session_indexes`
    /// targets this sign-on. An empty index list matches every session.
    #[must_use]
    pub fn matches(&self, name_id: &NameId, session_indexes: &[String]) -> bool {
        if !self.name_id.same_principal(name_id) {
            return false;
        }
        session_indexes.is_empty()
            || self
                .session_index
                .as_ref()
                .is_some_and(|index| session_indexes.contains(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_session_roundtrip() {
        let session = MemorySession::new("s1");
        assert_eq!(session.id(), "s1");
        assert!(session.is_empty());
        session.set("k", "v".to_string());
        assert_eq!(session.get("k").as_deref(), Some("v"));
        session.remove("k");
        assert!(session.get("k").is_none());
    }

    #[test]
    fn states_persist() {
        let session = MemorySession::random();
        assert_eq!(SsoState::load(&session), SsoState::Idle);

        let sent = SsoState::RequestSent {
            request_id: "id1".to_string(),
            idp: "https://idp.example.com".to_string(),
        };
        sent.save(&session).unwrap();
        assert_eq!(SsoState::load(&session), sent);

        SloState::LogoutAcked.save(&session).unwrap();
        assert_eq!(SloState::load(&session), SloState::LogoutAcked);

        let failed = SsoState::Failed {
            category: ErrorCategory::Replay,
        };
        failed.save(&session).unwrap();
        assert!(session.get(SSO_STATE_KEY).unwrap().contains("\"replay\""));
    }

    #[test]
    fn corrupt_value_reads_as_default() {
        let session = MemorySession::random();
        session.set(SSO_STATE_KEY, "{not json".to_string());
        assert_eq!(SsoState::load(&session), SsoState::Idle);
        session.set(SIGN_ON_KEY, "[]".to_string());
        assert!(SignOnRecord::load(&session).is_none());
    }

    #[test]
    fn sign_on_matching() {
        let record = SignOnRecord {
            idp: "https://idp.example.com".to_string(),
            name_id: NameId::persistent("u1"),
            session_index: Some("s1".to_string()),
            authenticated_at: Utc::now(),
        };
        assert!(record.matches(&NameId::persistent("u1"), &[]));
        assert!(record.matches(&NameId::persistent("u1"), &["s0".to_string(), "s1".to_string()]));
        assert!(!record.matches(&NameId::persistent("u1"), &["s2".to_string()]));
        assert!(!record.matches(&NameId::persistent("u2"), &[]));

        let session = MemorySession::random();
        record.save(&session).unwrap();
        assert_eq!(SignOnRecord::load(&session), Some(record));
        SignOnRecord::clear(&session);
        assert!(SignOnRecord::load(&session).is_none());
    }

    #[test]
    fn scope_follows_session() {
        let session = MemorySession::new("abc");
        assert_eq!(replay_scope(Some(&session)), ReplayScope::session("abc"));
        assert_eq!(replay_scope(None), ReplayScope::Process);
    }
}
