//! The SOAP back channel: resolving received artifacts and answering
//! resolution requests for artifacts this SP issued.

use tracing::{debug, info, warn};

use super::hooks::ErrorStage;
use super::message::Received;
use super::{IssuedArtifact, SsoEngine};
use crate::bindings::{Artifact, ArtifactResolve, ArtifactResponse, ReceivedArtifact, SoapEnvelope};
use crate::error::{ErrorCategory, SamlError, SamlResult};
use crate::signature;
use crate::types::{SamlBinding, SAMLP_NS};
use crate::xml;

impl SsoEngine {
    /// Fetches the message behind `received` from the issuing IdP.
    ///
    /// The `ArtifactResolve` is signed when the SP has a key. Transport
    /// failures are retried up to `artifact_resolve_retries` times.
    pub(crate) async fn resolve_artifact(&self, received: &ReceivedArtifact) -> SamlResult<Received> {
        let artifact = &received.artifact;
        let idp = self
            .idps
            .iter()
            .find(|idp| artifact.is_from(&idp.entity_id))
            .ok_or_else(|| SamlError::UnknownIdentityProvider(format!("no IdP issued artifact {artifact}")))?;
        let entity = self.idp_metadata(&idp.entity_id)?;
        let role = &entity.require_idp()?.role;
        let endpoint = role
            .artifact_resolution_service(Some(artifact.endpoint_index))
            .or_else(|| role.artifact_resolution_service(None))
            .filter(|endpoint| endpoint.binding == SamlBinding::Soap)
            .ok_or_else(|| {
                SamlError::InvalidMetadata(format!("{} has no SOAP ArtifactResolutionService", idp.entity_id))
            })?;

        let resolve = self.factory().artifact_resolve(&endpoint.location, artifact);
        let request = match self.sp.signer() {
            Some(signer) => signer.sign(&resolve.to_xml(), &resolve.id)?,
            None => resolve.to_xml(),
        };
        debug!(idp = %idp.entity_id, endpoint = %endpoint.location, "resolving artifact");
        let reply = self.send_with_retry(&endpoint.location, &request).await?;

        let doc = xml::parse(&reply)?;
        let root = doc.root_element();
        if !xml::is_element(root, SAMLP_NS, "ArtifactResponse") {
            return Err(SamlError::InvalidResponse(format!(
                "expected samlp:ArtifactResponse, found {}",
                root.tag_name().name()
            )));
        }
        let envelope_verified = if signature::is_signed(root) {
            self.validator_for(idp, &entity)?.verify_element(&doc, root)?;
            true
        } else {
            false
        };
        let response = ArtifactResponse::from_node(root)?;
        if response.in_response_to != resolve.id {
            return Err(SamlError::InResponseToMismatch(response.in_response_to));
        }
        if response.issuer.value != idp.entity_id {
            return Err(SamlError::InvalidIssuer {
                expected: idp.entity_id.clone(),
                actual: response.issuer.value,
            });
        }
        Ok(Received {
            xml: response.into_message()?,
            relay_state: received.relay_state.clone(),
            binding: SamlBinding::HttpArtifact,
            query: None,
            envelope_verified,
        })
    }

    async fn send_with_retry(&self, endpoint: &str, request: &str) -> SamlResult<String> {
        let attempts = self.config.artifact_resolve_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.resolver.send(endpoint, request).await {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(attempt, endpoint = %endpoint, error = %err, "artifact resolution failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Answers a SOAP `ArtifactResolve` from a trusted IdP with the message
    /// stored for the artifact, as a SOAP envelope holding a signed
    /// `ArtifactResponse`.
    ///
    /// An unknown or expired artifact yields a successful response with no
    /// message. Every artifact resolves at most once.
    ///
    /// # Errors
    ///
    /// Returns an error for an unsigned or unknown requester, an artifact not
    /// issued by this SP or issued to another entity, or a missing signing
    /// key. [`SsoEngine::soap_fault`] turns it into a reply.
    pub async fn handle_artifact_resolve(&self, envelope: &str) -> SamlResult<String> {
        self.answer_artifact_resolve(envelope)
            .await
            .map_err(|err| self.reject(ErrorStage::ArtifactResolve, err))
    }

    async fn answer_artifact_resolve(&self, envelope: &str) -> SamlResult<String> {
        let payload = SoapEnvelope::unwrap(envelope)?;
        let doc = xml::parse(&payload)?;
        let root = doc.root_element();
        if !xml::is_element(root, SAMLP_NS, "ArtifactResolve") {
            return Err(SamlError::InvalidRequest(format!(
                "expected samlp:ArtifactResolve, found {}",
                root.tag_name().name()
            )));
        }
        let request = ArtifactResolve::from_node(root)?;
        let requester = request.issuer.value.as_str();
        let idp = self.idp_config(requester)?;
        let entity = self.idp_metadata(requester)?;
        if !signature::is_signed(root) {
            return Err(SamlError::SignatureMissing("ArtifactResolve is not signed".to_string()));
        }
        self.validator_for(idp, &entity)?.verify_element(&doc, root)?;

        let artifact = Artifact::parse(&request.artifact)?;
        if !artifact.is_from(&self.sp.entity_id) {
            return Err(SamlError::InvalidArtifact("artifact was not issued by this entity".to_string()));
        }
        let message = match self.artifacts.take(&artifact.encode()).await? {
            Some(stored) => {
                let issued: IssuedArtifact =
                    serde_json::from_str(&stored).map_err(|e| SamlError::Storage(e.to_string()))?;
                if issued.recipient != requester {
                    return Err(SamlError::InvalidArtifact(format!(
                        "artifact was issued to {}, not {requester}",
                        issued.recipient
                    )));
                }
                Some(issued.message)
            }
            None => {
                debug!(requester = %requester, "artifact unknown or expired");
                None
            }
        };

        let found = message.is_some();
        let response = self.factory().artifact_response(&request.id, message);
        let signed = self.sign_xml(&response.to_xml(), &response.id)?;
        info!(requester = %requester, found, "answered artifact resolution");
        Ok(SoapEnvelope::wrap(&signed))
    }

    /// SOAP fault reporting `error` to an artifact resolution requester.
    #[must_use]
    pub fn soap_fault(error: &SamlError) -> String {
        let code = match error.category() {
            ErrorCategory::Format | ErrorCategory::Signature | ErrorCategory::Replay => "Client",
            ErrorCategory::Configuration | ErrorCategory::Transport => "Server",
        };
        SoapEnvelope::fault(code, &error.to_string())
    }
}
