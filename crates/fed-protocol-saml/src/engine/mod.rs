//! The service-provider protocol engine.
//!
//! [`SsoEngine`] drives Web Browser SSO and Single Logout on behalf of one
//! service provider. It does not speak HTTP: the web layer hands it an
//! [`InboundMessage`] and serves whatever [`OutboundMessage`] it returns.
//!
//! ```rust,ignore
//! let engine = SsoEngine::builder(sp)
//!     .with_identity_provider(IdentityProviderConfig::new("https://idp.example.com").as_default())
//!     .with_metadata(metadata)
//!     .build()?;
//!
//! let outbound = engine.initiate_sso(Some(&session), None, Some("/home")).await?;
//! // ... later, on the ACS endpoint
//! let inbound = InboundMessage::from_request(method, query, &body)?;
//! let outcome = engine.handle_response(Some(&session), &inbound).await?;
//! ```
//!
//! State shared between requests lives in three places: the pending request
//! ids in the [`ReplayStore`], consumed one-time-use assertion ids in the
//! [`OneTimeUseCache`], and per-user progress in the caller's
//! [`SessionContext`].

mod artifact;
mod hooks;
mod logout;
mod message;
mod profile;
mod session;
mod sso;

pub use hooks::{AuditHook, ErrorHook, ErrorStage, HookDecision, HookKind, SuppressPassiveDeclinedHook};
pub use logout::LogoutOutcome;
pub use message::{Delivery, InboundMessage, OutboundMessage};
pub use profile::{AssertionProfile, AuthnStatementRequiredProfile, BearerProfile, ProfileContext, ProfileKind};
pub use session::{
    MemorySession, SessionContext, SignOnRecord, SloState, SsoState, IDP_KEY, SIGN_ON_KEY, SLO_STATE_KEY,
    SSO_STATE_KEY,
};
pub use sso::{AuthenticatedUser, SsoOutcome};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fed_cache::{
    ArtifactStore, MemoryArtifactStore, MemoryOneTimeUseCache, MemoryReplayStore, OneTimeUseCache, ReplayStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bindings::{
    Artifact, ArtifactResolver, HttpArtifactBinding, HttpPostBinding, HttpRedirectBinding, SamlMessageType,
    SoapClient,
};
use crate::config::{EngineConfig, IdentityProviderConfig, ServiceProviderConfig};
use crate::error::{SamlError, SamlResult};
use crate::messages::MessageFactory;
use crate::metadata::{EntityDescriptor, MetadataStore};
use crate::signature::XmlSignatureValidator;
use crate::types::SamlBinding;
use crate::validator::{Clock, SystemClock};
use crate::xml;

use message::Received;

/// Front-channel bindings in the order they are tried when neither the IdP
/// configuration nor the SP prefers one.
const FRONT_CHANNEL_PREFERENCE: [SamlBinding; 3] =
    [SamlBinding::HttpRedirect, SamlBinding::HttpPost, SamlBinding::HttpArtifact];

/// SAML service-provider engine.
pub struct SsoEngine {
    config: EngineConfig,
    sp: ServiceProviderConfig,
    idps: Vec<IdentityProviderConfig>,
    metadata: Arc<MetadataStore>,
    replay: Arc<dyn ReplayStore>,
    one_time_use: Arc<dyn OneTimeUseCache>,
    artifacts: Arc<dyn ArtifactStore>,
    resolver: Arc<dyn ArtifactResolver>,
    clock: Arc<dyn Clock>,
    profiles: Vec<Box<dyn AssertionProfile>>,
    hooks: Vec<Box<dyn ErrorHook>>,
}

impl fmt::Debug for SsoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsoEngine")
            .field("sp", &self.sp.entity_id)
            .field("idps", &self.idps.iter().map(|i| i.entity_id.as_str()).collect::<Vec<_>>())
            .field("profiles", &self.profiles.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("hooks", &self.hooks.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SsoEngine {
    /// Starts building an engine for `sp`.
    #[must_use]
    pub fn builder(sp: ServiceProviderConfig) -> SsoEngineBuilder {
        SsoEngineBuilder::new(sp)
    }

    /// The service provider this engine acts for.
    #[must_use]
    pub const fn service_provider(&self) -> &ServiceProviderConfig {
        &self.sp
    }

    /// Engine settings.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The metadata store consulted for every IdP lookup.
    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// This SP's metadata document, signed when credentials are configured.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sp_metadata(&self) -> SamlResult<String> {
        let id = fed_crypto::generate_xml_id();
        let document = self.sp.descriptor().with_id(id.clone()).to_xml();
        match self.sp.signer() {
            Some(signer) => signer.sign(&document, &id),
            None => Ok(document),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn factory(&self) -> MessageFactory<'_> {
        MessageFactory::new(&self.sp, self.now())
    }

    /// Configuration of a trusted IdP.
    fn idp_config(&self, entity_id: &str) -> SamlResult<&IdentityProviderConfig> {
        self.idps
            .iter()
            .find(|idp| idp.entity_id == entity_id)
            .ok_or_else(|| SamlError::UnknownIdentityProvider(entity_id.to_string()))
    }

    /// Current, unexpired metadata of a trusted IdP.
    fn idp_metadata(&self, entity_id: &str) -> SamlResult<Arc<EntityDescriptor>> {
        let entity = self
            .metadata
            .get(entity_id)
            .ok_or_else(|| SamlError::UnknownIdentityProvider(format!("{entity_id} has no metadata")))?;
        if entity.is_expired_at(self.now()) {
            return Err(SamlError::InvalidMetadata(format!("metadata of {entity_id} has expired")));
        }
        Ok(entity)
    }

    /// Picks the IdP for a new request: explicit choice, then the one recorded
    /// in the session, then the configured default, then the only one.
    fn select_idp(
        &self,
        explicit: Option<&str>,
        session: Option<&dyn SessionContext>,
    ) -> SamlResult<&IdentityProviderConfig> {
        if let Some(entity_id) = explicit {
            return self.idp_config(entity_id);
        }
        if let Some(entity_id) = session.and_then(|s| s.get(IDP_KEY)) {
            match self.idp_config(&entity_id) {
                Ok(idp) => return Ok(idp),
                Err(_) => debug!(idp = %entity_id, "session names an IdP that is no longer configured"),
            }
        }
        if let Some(idp) = self.idps.iter().find(|idp| idp.is_default) {
            return Ok(idp);
        }
        match self.idps.as_slice() {
            [only] => Ok(only),
            _ => Err(SamlError::NoIdentityProviderSelected),
        }
    }

    /// Keys trusted for messages from `idp`: its metadata signing keys plus
    /// any locally pinned certificates.
    fn validator_for(
        &self,
        idp: &IdentityProviderConfig,
        entity: &EntityDescriptor,
    ) -> SamlResult<XmlSignatureValidator> {
        let mut keys = entity.signing_keys();
        keys.extend(idp.trusted_certificates.iter().map(|c| c.public_key().clone()));
        if keys.is_empty() {
            return Err(SamlError::MissingCredential(format!(
                "no signing keys known for {}",
                idp.entity_id
            )));
        }
        Ok(XmlSignatureValidator::new(keys).with_allow_sha1(self.config.allow_sha1))
    }

    /// Signs `document` with the SP key.
    fn sign_xml(&self, document: &str, id: &str) -> SamlResult<String> {
        let signer = self
            .sp
            .signer()
            .ok_or_else(|| SamlError::MissingCredential("no SP signing key configured".to_string()))?;
        signer.sign(document, id)
    }

    /// Dispatches a decoded inbound message, resolving artifacts first.
    async fn receive(&self, inbound: &InboundMessage) -> SamlResult<Received> {
        match inbound {
            InboundMessage::Artifact(received) => self.resolve_artifact(received).await,
            other => Received::decode_front_channel(other),
        }
    }

    /// Checks the signature that authenticates a received message: an
    /// enveloped XML signature on the root, a signed Redirect query, or a
    /// verified `ArtifactResponse` around it. Returns whether any was found.
    fn authenticate_message(
        &self,
        doc: &roxmltree::Document<'_>,
        received: &Received,
        validator: &XmlSignatureValidator,
    ) -> SamlResult<bool> {
        let root = doc.root_element();
        if crate::signature::is_signed(root) {
            validator.verify_element(doc, root)?;
            return Ok(true);
        }
        if let Some(query) = received.query.as_ref().filter(|q| q.is_signed()) {
            query.verify(validator)?;
            return Ok(true);
        }
        Ok(received.envelope_verified)
    }

    /// Encodes an outbound message for `dispatch.binding`.
    async fn deliver(&self, dispatch: Dispatch<'_>, document: String) -> SamlResult<OutboundMessage> {
        let delivery = match dispatch.binding {
            SamlBinding::HttpRedirect => {
                let signer = if dispatch.sign {
                    Some(self.sp.signer().ok_or_else(|| {
                        SamlError::MissingCredential("no SP signing key configured".to_string())
                    })?)
                } else {
                    None
                };
                let query = HttpRedirectBinding::encode(
                    &document,
                    dispatch.message_type,
                    dispatch.relay_state,
                    signer.as_ref(),
                )?;
                Delivery::Redirect(HttpRedirectBinding::build_url(dispatch.destination, &query))
            }
            SamlBinding::HttpPost => {
                let document = self.maybe_sign(document, dispatch)?;
                Delivery::Form(HttpPostBinding::encode(
                    &document,
                    dispatch.destination,
                    dispatch.relay_state,
                    dispatch.message_type,
                ))
            }
            SamlBinding::HttpArtifact => {
                let document = self.maybe_sign(document, dispatch)?;
                let artifact = Artifact::new(&self.sp.entity_id, 0);
                let issued = IssuedArtifact {
                    recipient: dispatch.recipient.to_string(),
                    message: document,
                };
                let stored = serde_json::to_string(&issued).map_err(|e| SamlError::Storage(e.to_string()))?;
                self.artifacts
                    .store(&artifact.encode(), stored, self.config.artifact_ttl())
                    .await?;
                debug!(recipient = %dispatch.recipient, "issued artifact");
                Delivery::Redirect(HttpArtifactBinding::build_url(
                    dispatch.destination,
                    &artifact,
                    dispatch.relay_state,
                ))
            }
            SamlBinding::Soap => {
                return Err(SamlError::UnsupportedBinding(
                    "SOAP is not a front-channel binding".to_string(),
                ))
            }
        };
        Ok(OutboundMessage {
            message_id: dispatch.message_id.to_string(),
            binding: dispatch.binding,
            destination: dispatch.destination.to_string(),
            delivery,
        })
    }

    fn maybe_sign(&self, document: String, dispatch: Dispatch<'_>) -> SamlResult<String> {
        if dispatch.sign {
            self.sign_xml(&document, dispatch.message_id)
        } else {
            Ok(document)
        }
    }

    /// Logs a failed operation and lets the hooks decide its fate.
    fn intercept(&self, stage: ErrorStage, error: &SamlError) -> HookDecision {
        warn!(
            stage = stage.as_str(),
            category = %error.category(),
            error = %error,
            "SAML operation rejected"
        );
        hooks::consult(&self.hooks, stage, error)
    }

    /// Like [`SsoEngine::intercept`] for operations with no neutral outcome
    /// to fall back on: the error is always returned.
    fn reject(&self, stage: ErrorStage, error: SamlError) -> SamlError {
        if self.intercept(stage, &error) == HookDecision::Suppress {
            debug!(stage = stage.as_str(), "suppression ignored, operation has no fallback");
        }
        error
    }
}

/// First endpoint offered for `preferred`, or for the first binding in
/// [`FRONT_CHANNEL_PREFERENCE`] when there is no preference.
fn pick_endpoint<'a, F>(preferred: Option<SamlBinding>, lookup: F) -> Option<&'a crate::metadata::Endpoint>
where
    F: Fn(SamlBinding) -> Option<&'a crate::metadata::Endpoint>,
{
    match preferred {
        Some(binding) => lookup(binding),
        None => FRONT_CHANNEL_PREFERENCE.into_iter().find_map(lookup),
    }
}

/// Everything [`SsoEngine::deliver`] needs besides the document.
#[derive(Debug, Clone, Copy)]
struct Dispatch<'a> {
    binding: SamlBinding,
    destination: &'a str,
    /// Entity allowed to resolve an artifact for this message.
    recipient: &'a str,
    message_id: &'a str,
    message_type: SamlMessageType,
    relay_state: Option<&'a str>,
    sign: bool,
}

/// What the artifact store holds for an issued artifact.
#[derive(Debug, Serialize, Deserialize)]
struct IssuedArtifact {
    recipient: String,
    message: String,
}

/// Builder for [`SsoEngine`].
pub struct SsoEngineBuilder {
    config: EngineConfig,
    sp: ServiceProviderConfig,
    idps: Vec<IdentityProviderConfig>,
    metadata: Option<Arc<MetadataStore>>,
    replay: Option<Arc<dyn ReplayStore>>,
    one_time_use: Option<Arc<dyn OneTimeUseCache>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    resolver: Option<Arc<dyn ArtifactResolver>>,
    clock: Option<Arc<dyn Clock>>,
}

impl fmt::Debug for SsoEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsoEngineBuilder")
            .field("config", &self.config)
            .field("sp", &self.sp.entity_id)
            .finish_non_exhaustive()
    }
}

impl SsoEngineBuilder {
    fn new(sp: ServiceProviderConfig) -> Self {
        Self {
            config: EngineConfig::default(),
            sp,
            idps: Vec::new(),
            metadata: None,
            replay: None,
            one_time_use: None,
            artifacts: None,
            resolver: None,
            clock: None,
        }
    }

    /// Sets the engine settings.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Trusts an identity provider.
    #[must_use]
    pub fn with_identity_provider(mut self, idp: IdentityProviderConfig) -> Self {
        self.idps.push(idp);
        self
    }

    /// Uses a shared metadata store.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Arc<MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Uses a shared pending-request store.
    #[must_use]
    pub fn with_replay_store(mut self, store: Arc<dyn ReplayStore>) -> Self {
        self.replay = Some(store);
        self
    }

    /// Uses a shared one-time-use cache.
    #[must_use]
    pub fn with_one_time_use_cache(mut self, cache: Arc<dyn OneTimeUseCache>) -> Self {
        self.one_time_use = Some(cache);
        self
    }

    /// Uses a shared artifact store.
    #[must_use]
    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    /// Replaces the SOAP client used to resolve artifacts.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ArtifactResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replaces the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validates the configuration and builds the engine. Stores default to
    /// in-process implementations.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::Configuration`] or [`SamlError::MissingCredential`]
    /// for an unusable SP or IdP configuration, or a transport error if the
    /// SOAP client cannot be created.
    pub fn build(self) -> SamlResult<SsoEngine> {
        self.sp.validate()?;
        for idp in &self.idps {
            xml::require_absolute_uri("idp entity_id", &idp.entity_id)?;
        }
        if self.idps.iter().filter(|idp| idp.is_default).count() > 1 {
            return Err(SamlError::Configuration(
                "more than one identity provider is marked default".to_string(),
            ));
        }
        for (i, idp) in self.idps.iter().enumerate() {
            if self.idps[..i].iter().any(|other| other.entity_id == idp.entity_id) {
                return Err(SamlError::Configuration(format!(
                    "identity provider {} configured twice",
                    idp.entity_id
                )));
            }
            if idp.request_binding.is_some_and(|b| !b.is_front_channel())
                || idp.logout_binding.is_some_and(|b| !b.is_front_channel())
            {
                return Err(SamlError::Configuration(format!(
                    "bindings for {} must be front-channel bindings",
                    idp.entity_id
                )));
            }
        }

        let resolver: Arc<dyn ArtifactResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(SoapClient::new(self.config.artifact_resolve_timeout())?),
        };
        let profiles = self.config.profiles.iter().map(|kind| kind.build()).collect();
        let hooks = self.config.error_hooks.iter().map(|kind| kind.build()).collect();

        debug!(
            sp = %self.sp.entity_id,
            idps = self.idps.len(),
            "SAML engine configured"
        );
        Ok(SsoEngine {
            config: self.config,
            sp: self.sp,
            idps: self.idps,
            metadata: self.metadata.unwrap_or_default(),
            replay: self.replay.unwrap_or_else(|| Arc::new(MemoryReplayStore::new())),
            one_time_use: self
                .one_time_use
                .unwrap_or_else(|| Arc::new(MemoryOneTimeUseCache::new())),
            artifacts: self.artifacts.unwrap_or_else(|| Arc::new(MemoryArtifactStore::new())),
            resolver,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            profiles,
            hooks,
        })
    }
}
