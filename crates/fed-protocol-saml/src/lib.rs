//! SAML 2.0 service-provider engine.
//!
//! This crate implements the SP side of SAML 2.0 Web Browser SSO and Single
//! Logout:
//!
//! - **Protocol types** - assertions, `AuthnRequest`, `Response`, logout
//!   messages and status codes, parsed from and written back to XML
//! - **XML signature and encryption** - enveloped signatures with wrapping
//!   defences, detached Redirect signatures, `EncryptedAssertion` decryption
//! - **Bindings** - HTTP-Redirect, HTTP-POST, HTTP-Artifact and the SOAP
//!   back channel
//! - **Metadata** - parsing, signature checks and a shared store
//! - **Engine** - request correlation, assertion validation, replay
//!   protection, logout in both directions and artifact resolution
//!
//! # Architecture
//!
//! - [`types`] - Core SAML types and data structures
//! - [`xml`] - Parsing helpers and canonicalization
//! - [`signature`] - XML signature signing and validation
//! - [`encryption`] - Encrypted assertion handling
//! - [`bindings`] - Redirect, POST, Artifact and SOAP bindings
//! - [`metadata`] - Entity descriptors and the metadata store
//! - [`validator`] - Assertion time, audience and subject checks
//! - [`config`] - Engine, SP and IdP settings
//! - [`messages`] - Construction of outbound protocol messages
//! - [`engine`] - The [`SsoEngine`] driving SSO and SLO
//! - [`error`] - Error types for SAML operations
//!
//! The engine never talks HTTP itself. The web layer classifies each request
//! into an [`InboundMessage`] and serves the [`OutboundMessage`] it gets back.
//!
//! # Example
//!
//! ```rust,ignore
//! use fed_protocol_saml::{IdentityProviderConfig, InboundMessage, ServiceProviderConfig, SsoEngine};
//!
//! let sp = ServiceProviderConfig::new("https://sp.example.com", "https://sp.example.com/acs");
//! let engine = SsoEngine::builder(sp)
//!     .with_identity_provider(IdentityProviderConfig::new("https://idp.example.com").as_default())
//!     .with_metadata(metadata)
//!     .build()?;
//!
//! let outbound = engine.initiate_sso(Some(&session), None, None).await?;
//! ```
//!
//! # SAML Specifications
//!
//! - [SAML 2.0 Core](https://docs.oasis-open.org/security/saml/v2.0/saml-core-2.0-os.pdf)
//! - [SAML 2.0 Bindings](https://docs.oasis-open.org/security/saml/v2.0/saml-bindings-2.0-os.pdf)
//! - [SAML 2.0 Profiles](https://docs.oasis-open.org/security/saml/v2.0/saml-profiles-2.0-os.pdf)
//! - [SAML 2.0 Metadata](https://docs.oasis-open.org/security/saml/v2.0/saml-metadata-2.0-os.pdf)
//! - [XML Signature](https://www.w3.org/TR/xmldsig-core1/)
//! - [XML Encryption](https://www.w3.org/TR/xmlenc-core1/)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod config;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod messages;
pub mod metadata;
pub mod signature;
pub mod types;
pub mod validator;
pub mod xml;

pub use config::{EngineConfig, IdentityProviderConfig, ServiceProviderConfig, SpCredentials};
pub use engine::{
    AuthenticatedUser, InboundMessage, LogoutOutcome, MemorySession, OutboundMessage, SessionContext, SsoEngine,
    SsoEngineBuilder, SsoOutcome,
};
pub use error::{ErrorCategory, SamlError, SamlResult};
pub use types::*;
