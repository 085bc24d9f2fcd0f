//! Engine, service provider and identity provider configuration.
//!
//! Every struct deserializes with serde defaults, so a partial document is a
//! valid configuration. [`EngineConfig::from_env`] layers `FED_SAML_*`
//! environment overrides on top of the defaults.

use std::time::Duration;

use fed_crypto::{Certificate, PrivateKey};
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptedAssertionCodec;
use crate::engine::{HookKind, ProfileKind};
use crate::error::{SamlError, SamlResult};
use crate::metadata::{
    EntityDescriptor, Endpoint, IndexedEndpoint, KeyDescriptor, RoleDescriptor, SpSsoDescriptor,
};
use crate::signature::{SignatureAlgorithm, XmlSigner};
use crate::types::{NameIdPolicy, RequestedAuthnContext, SamlBinding};
use crate::xml;

const fn default_artifact_ttl() -> u64 {
    60
}

const fn default_one_time_use_fallback_ttl() -> u64 {
    300
}

const fn default_request_ttl() -> u64 {
    600
}

const fn default_resolve_timeout_ms() -> u64 {
    10_000
}

const fn default_resolve_retries() -> u32 {
    1
}

const fn default_true() -> bool {
    true
}

fn default_profiles() -> Vec<ProfileKind> {
    vec![ProfileKind::Bearer]
}

const fn default_acs_binding() -> SamlBinding {
    SamlBinding::HttpPost
}

const fn default_signature_algorithm() -> SignatureAlgorithm {
    SignatureAlgorithm::RsaSha1
}

const fn default_slo_binding() -> SamlBinding {
    SamlBinding::HttpRedirect
}

/// Engine-wide tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of an issued artifact in seconds.
    #[serde(default = "default_artifact_ttl")]
    pub artifact_ttl_secs: u64,

    /// Lifetime of a one-time-use record when the assertion has no
    /// `NotOnOrAfter`.
    #[serde(default = "default_one_time_use_fallback_ttl")]
    pub one_time_use_fallback_ttl_secs: u64,

    /// Lifetime of a pending `InResponseTo` record.
    #[serde(default = "default_request_ttl")]
    pub request_ttl_secs: u64,

    /// Timeout of one artifact resolution call, in milliseconds.
    #[serde(default = "default_resolve_timeout_ms")]
    pub artifact_resolve_timeout_ms: u64,

    /// Extra attempts after a transport failure during artifact resolution.
    #[serde(default = "default_resolve_retries")]
    pub artifact_resolve_retries: u32,

    /// Tolerated clock skew in seconds.
    #[serde(default)]
    pub allowed_clock_skew_secs: u64,

    /// Accept SHA-1 signatures and digests.
    #[serde(default = "default_true")]
    pub allow_sha1: bool,

    /// Assertion profiles run after the validator.
    #[serde(default = "default_profiles")]
    pub profiles: Vec<ProfileKind>,

    /// Hooks consulted before an error leaves the engine.
    #[serde(default)]
    pub error_hooks: Vec<HookKind>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_ttl_secs: default_artifact_ttl(),
            one_time_use_fallback_ttl_secs: default_one_time_use_fallback_ttl(),
            request_ttl_secs: default_request_ttl(),
            artifact_resolve_timeout_ms: default_resolve_timeout_ms(),
            artifact_resolve_retries: default_resolve_retries(),
            allowed_clock_skew_secs: 0,
            allow_sha1: true,
            profiles: default_profiles(),
            error_hooks: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Loads overrides from `FED_SAML_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads overrides through `lookup`. Values that do not parse keep
    /// their default.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str, default: u64| {
            lookup(name)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let artifact_resolve_retries = lookup("FED_SAML_ARTIFACT_RESOLVE_RETRIES")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.artifact_resolve_retries);

        let allow_sha1 = lookup("FED_SAML_ALLOW_SHA1")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(defaults.allow_sha1);

        let profiles = lookup("FED_SAML_PROFILES")
            .map(|v| v.split(',').filter_map(|name| ProfileKind::from_name(name.trim())).collect())
            .unwrap_or(defaults.profiles);

        let error_hooks = lookup("FED_SAML_ERROR_HOOKS")
            .map(|v| v.split(',').filter_map(|name| HookKind::from_name(name.trim())).collect())
            .unwrap_or(defaults.error_hooks);

        Self {
            artifact_ttl_secs: number("FED_SAML_ARTIFACT_TTL_SECS", defaults.artifact_ttl_secs),
            one_time_use_fallback_ttl_secs: number(
                "FED_SAML_ONE_TIME_USE_FALLBACK_TTL_SECS",
                defaults.one_time_use_fallback_ttl_secs,
            ),
            request_ttl_secs: number("FED_SAML_REQUEST_TTL_SECS", defaults.request_ttl_secs),
            artifact_resolve_timeout_ms: number(
                "FED_SAML_ARTIFACT_RESOLVE_TIMEOUT_MS",
                defaults.artifact_resolve_timeout_ms,
            ),
            artifact_resolve_retries,
            allowed_clock_skew_secs: number("FED_SAML_ALLOWED_CLOCK_SKEW_SECS", defaults.allowed_clock_skew_secs),
            allow_sha1,
            profiles,
            error_hooks,
        }
    }

    /// Sets the assertion profiles.
    #[must_use]
    pub fn with_profiles(mut self, profiles: Vec<ProfileKind>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Sets the error hooks.
    #[must_use]
    pub fn with_error_hooks(mut self, hooks: Vec<HookKind>) -> Self {
        self.error_hooks = hooks;
        self
    }

    /// Sets the artifact resolution retry count.
    #[must_use]
    pub const fn with_artifact_resolve_retries(mut self, retries: u32) -> Self {
        self.artifact_resolve_retries = retries;
        self
    }

    /// Sets the tolerated clock skew.
    #[must_use]
    pub const fn with_clock_skew_secs(mut self, secs: u64) -> Self {
        self.allowed_clock_skew_secs = secs;
        self
    }

    /// Returns the artifact lifetime.
    #[must_use]
    pub const fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }

    /// Returns the fallback one-time-use lifetime.
    #[must_use]
    pub const fn one_time_use_fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.one_time_use_fallback_ttl_secs)
    }

    /// Returns the pending request lifetime.
    #[must_use]
    pub const fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl_secs)
    }

    /// Returns the artifact resolution timeout.
    #[must_use]
    pub const fn artifact_resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.artifact_resolve_timeout_ms)
    }

    /// Returns the clock skew as a chrono duration.
    #[must_use]
    pub fn clock_skew(&self) -> chrono::Duration {
        let secs = i64::try_from(self.allowed_clock_skew_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }
}

/// Keys and certificates of the service provider.
#[derive(Debug, Clone)]
pub struct SpCredentials {
    /// Key used to sign outbound messages.
    pub signing_key: PrivateKey,
    /// Certificate published for the signing key.
    pub signing_certificate: Option<Certificate>,
    /// Key used to decrypt assertions. Defaults to the signing key.
    pub decryption_key: Option<PrivateKey>,
    /// Certificate published for encryption.
    pub encryption_certificate: Option<Certificate>,
}

impl SpCredentials {
    /// Uses one key pair for signing and decryption.
    #[must_use]
    pub fn new(key: PrivateKey, certificate: Option<Certificate>) -> Self {
        Self {
            signing_key: key,
            encryption_certificate: certificate.clone(),
            signing_certificate: certificate,
            decryption_key: None,
        }
    }

    /// Loads a PEM key and optional certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data does not parse.
    pub fn from_pem(key_pem: &str, certificate_pem: Option<&str>) -> SamlResult<Self> {
        let key = PrivateKey::from_pem(key_pem)?;
        let certificate = certificate_pem.map(Certificate::from_pem).transpose()?;
        Ok(Self::new(key, certificate))
    }

    /// Uses a separate decryption key pair.
    #[must_use]
    pub fn with_decryption(mut self, key: PrivateKey, certificate: Option<Certificate>) -> Self {
        self.decryption_key = Some(key);
        self.encryption_certificate = certificate;
        self
    }

    /// Key used to decrypt assertions.
    #[must_use]
    pub fn decryption_key(&self) -> &PrivateKey {
        self.decryption_key.as_ref().unwrap_or(&self.signing_key)
    }

    /// Builds an XML signer with `algorithm`.
    #[must_use]
    pub fn signer(&self, algorithm: SignatureAlgorithm) -> XmlSigner {
        XmlSigner::new(self.signing_key.clone(), self.signing_certificate.clone()).with_algorithm(algorithm)
    }

    /// Decrypts an `EncryptedAssertion` document.
    ///
    /// # Errors
    ///
    /// Returns a decryption error when the key does not match.
    pub fn decrypt(&self, encrypted_xml: &str) -> SamlResult<String> {
        EncryptedAssertionCodec::decrypt_str(encrypted_xml, self.decryption_key())
    }
}

/// The local service provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProviderConfig {
    /// Entity identifier.
    pub entity_id: String,

    /// Assertion consumer service URL.
    pub acs_url: String,

    /// Binding requested for the response.
    #[serde(default = "default_acs_binding")]
    pub acs_binding: SamlBinding,

    /// Single logout service URL.
    #[serde(default)]
    pub slo_url: Option<String>,

    /// Binding used for outbound logout messages when the IdP offers it.
    #[serde(default = "default_slo_binding")]
    pub slo_binding: SamlBinding,

    /// SOAP endpoint where this SP answers `ArtifactResolve`.
    #[serde(default)]
    pub artifact_resolution_url: Option<String>,

    /// NameID policy sent with authentication requests.
    #[serde(default)]
    pub name_id_policy: Option<NameIdPolicy>,

    /// Requested authentication context.
    #[serde(default)]
    pub requested_authn_context: Option<RequestedAuthnContext>,

    /// Ask the IdP to re-authenticate.
    #[serde(default)]
    pub force_authn: bool,

    /// Ask the IdP not to interact with the user.
    #[serde(default)]
    pub is_passive: bool,

    /// Audiences accepted besides the entity id.
    #[serde(default)]
    pub extra_audiences: Vec<String>,

    /// Sign outbound authentication requests.
    #[serde(default = "default_true")]
    pub sign_authn_requests: bool,

    /// Require a signature covering every assertion.
    #[serde(default = "default_true")]
    pub want_assertions_signed: bool,

    /// Accept responses that answer no request.
    #[serde(default)]
    pub allow_unsolicited: bool,

    /// `SigAlg` of signed redirect queries and XML signatures.
    #[serde(default = "default_signature_algorithm")]
    pub signature_algorithm: SignatureAlgorithm,

    /// Signing and decryption credentials.
    #[serde(skip)]
    pub credentials: Option<SpCredentials>,
}

impl ServiceProviderConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, acs_url: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            acs_url: acs_url.into(),
            acs_binding: default_acs_binding(),
            slo_url: None,
            slo_binding: default_slo_binding(),
            artifact_resolution_url: None,
            name_id_policy: None,
            requested_authn_context: None,
            force_authn: false,
            is_passive: false,
            extra_audiences: Vec::new(),
            sign_authn_requests: true,
            want_assertions_signed: true,
            allow_unsolicited: false,
            signature_algorithm: default_signature_algorithm(),
            credentials: None,
        }
    }

    /// Sets the ACS binding.
    #[must_use]
    pub const fn with_acs_binding(mut self, binding: SamlBinding) -> Self {
        self.acs_binding = binding;
        self
    }

    /// Sets the SLO URL.
    #[must_use]
    pub fn with_slo_url(mut self, url: impl Into<String>) -> Self {
        self.slo_url = Some(url.into());
        self
    }

    /// Sets the preferred SLO binding.
    #[must_use]
    pub const fn with_slo_binding(mut self, binding: SamlBinding) -> Self {
        self.slo_binding = binding;
        self
    }

    /// Sets the artifact resolution endpoint.
    #[must_use]
    pub fn with_artifact_resolution_url(mut self, url: impl Into<String>) -> Self {
        self.artifact_resolution_url = Some(url.into());
        self
    }

    /// Sets the NameID policy.
    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    /// Sets the requested authentication context.
    #[must_use]
    pub fn with_requested_authn_context(mut self, context: RequestedAuthnContext) -> Self {
        self.requested_authn_context = Some(context);
        self
    }

    /// Sets ForceAuthn.
    #[must_use]
    pub const fn with_force_authn(mut self, force: bool) -> Self {
        self.force_authn = force;
        self
    }

    /// Sets IsPassive.
    #[must_use]
    pub const fn with_passive(mut self, passive: bool) -> Self {
        self.is_passive = passive;
        self
    }

    /// Accepts an additional audience.
    #[must_use]
    pub fn with_extra_audience(mut self, audience: impl Into<String>) -> Self {
        self.extra_audiences.push(audience.into());
        self
    }

    /// Sets whether authentication requests are signed.
    #[must_use]
    pub const fn sign_authn_requests(mut self, sign: bool) -> Self {
        self.sign_authn_requests = sign;
        self
    }

    /// Sets whether assertions must be signed.
    #[must_use]
    pub const fn want_assertions_signed(mut self, want: bool) -> Self {
        self.want_assertions_signed = want;
        self
    }

    /// Sets whether IdP-initiated responses are accepted.
    #[must_use]
    pub const fn allow_unsolicited(mut self, allow: bool) -> Self {
        self.allow_unsolicited = allow;
        self
    }

    /// Sets the signature algorithm.
    #[must_use]
    pub const fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: SpCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Audiences accepted in assertions.
    #[must_use]
    pub fn audiences(&self) -> Vec<String> {
        std::iter::once(self.entity_id.clone())
            .chain(self.extra_audiences.iter().cloned())
            .collect()
    }

    /// Returns the credentials.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MissingCredential`] when none are configured.
    pub fn require_credentials(&self) -> SamlResult<&SpCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| SamlError::MissingCredential(format!("no credentials for {}", self.entity_id)))
    }

    /// A signer when credentials are configured.
    #[must_use]
    pub fn signer(&self) -> Option<XmlSigner> {
        self.credentials.as_ref().map(|c| c.signer(self.signature_algorithm))
    }

    /// Describes this SP as an `EntityDescriptor`.
    ///
    /// The SLO URL is published for every front-channel binding and the
    /// certificates come from the credentials.
    #[must_use]
    pub fn descriptor(&self) -> EntityDescriptor {
        let mut role = RoleDescriptor::default();
        if let Some(credentials) = &self.credentials {
            if let Some(certificate) = &credentials.signing_certificate {
                role.keys.push(KeyDescriptor::signing(certificate.clone()));
            }
            if let Some(certificate) = &credentials.encryption_certificate {
                role.keys.push(KeyDescriptor::encryption(certificate.clone()));
            }
        }
        if let Some(url) = &self.slo_url {
            for binding in [SamlBinding::HttpRedirect, SamlBinding::HttpPost, SamlBinding::HttpArtifact] {
                role.single_logout.push(Endpoint::new(binding, url));
            }
        }
        if let Some(url) = &self.artifact_resolution_url {
            role.artifact_resolution
                .push(IndexedEndpoint::new(Endpoint::new(SamlBinding::Soap, url), 0).as_default());
        }
        if let Some(format) = self.name_id_policy.as_ref().and_then(|p| p.format.clone()) {
            role.name_id_formats.push(format);
        }
        EntityDescriptor::new(&self.entity_id).with_sp(SpSsoDescriptor {
            role,
            authn_requests_signed: self.sign_authn_requests,
            want_assertions_signed: self.want_assertions_signed,
            assertion_consumers: vec![
                IndexedEndpoint::new(Endpoint::new(self.acs_binding, &self.acs_url), 0).as_default()
            ],
        })
    }

    /// Checks the URIs and binding choices.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> SamlResult<()> {
        xml::require_absolute_uri("entity_id", &self.entity_id)?;
        xml::require_absolute_uri("acs_url", &self.acs_url)?;
        if let Some(url) = &self.slo_url {
            xml::require_absolute_uri("slo_url", url)?;
        }
        if let Some(url) = &self.artifact_resolution_url {
            xml::require_absolute_uri("artifact_resolution_url", url)?;
        }
        if !self.acs_binding.is_front_channel() {
            return Err(SamlError::Configuration("acs_binding must be a front-channel binding".to_string()));
        }
        if !self.slo_binding.is_front_channel() {
            return Err(SamlError::Configuration("slo_binding must be a front-channel binding".to_string()));
        }
        if self.sign_authn_requests && self.credentials.is_none() {
            return Err(SamlError::MissingCredential(
                "sign_authn_requests is set but no signing key is configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// A trusted identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    /// Entity identifier, matching its metadata.
    pub entity_id: String,

    /// Used when no IdP is chosen explicitly or recorded in the session.
    #[serde(default)]
    pub is_default: bool,

    /// Binding for authentication requests. The first supported metadata
    /// endpoint is used when unset.
    #[serde(default)]
    pub request_binding: Option<SamlBinding>,

    /// Binding for logout requests.
    #[serde(default)]
    pub logout_binding: Option<SamlBinding>,

    /// Certificates trusted in addition to the metadata keys.
    #[serde(skip)]
    pub trusted_certificates: Vec<Certificate>,
}

impl IdentityProviderConfig {
    /// Creates a configuration for `entity_id`.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            is_default: false,
            request_binding: None,
            logout_binding: None,
            trusted_certificates: Vec::new(),
        }
    }

    /// Marks this IdP as the default.
    #[must_use]
    pub const fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Sets the request binding.
    #[must_use]
    pub const fn with_request_binding(mut self, binding: SamlBinding) -> Self {
        self.request_binding = Some(binding);
        self
    }

    /// Sets the logout binding.
    #[must_use]
    pub const fn with_logout_binding(mut self, binding: SamlBinding) -> Self {
        self.logout_binding = Some(binding);
        self
    }

    /// Trusts an additional certificate.
    #[must_use]
    pub fn with_trusted_certificate(mut self, certificate: Certificate) -> Self {
        self.trusted_certificates.push(certificate);
        self
    }
}
