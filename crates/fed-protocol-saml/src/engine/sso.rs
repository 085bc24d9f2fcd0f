//! Web Browser SSO: sending `AuthnRequest`s and consuming `Response`s.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fed_cache::ReplayScope;
use roxmltree::{Document, Node};
use tracing::{debug, info};

use super::hooks::{ErrorStage, HookDecision};
use super::message::{InboundMessage, OutboundMessage};
use super::profile::ProfileContext;
use super::session::{replay_scope, SessionContext, SignOnRecord, SsoState, IDP_KEY};
use super::{pick_endpoint, Dispatch, SsoEngine};
use crate::bindings::SamlMessageType;
use crate::encryption::EncryptedAssertionCodec;
use crate::error::{ErrorCategory, SamlError, SamlResult};
use crate::signature::{self, XmlSignatureValidator};
use crate::types::{Assertion, Attribute, NameId, Response, SAMLP_NS, SAML_NS};
use crate::validator::AssertionValidator;
use crate::xml;

/// A principal whose assertion was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Asserting IdP.
    pub idp: String,
    /// Subject identifier.
    pub name_id: NameId,
    /// IdP session index, needed for single logout.
    pub session_index: Option<String>,
    /// `AuthnContextClassRef` of the first authentication statement.
    pub authn_context_class: Option<String>,
    /// Attributes from every attribute statement.
    pub attributes: Vec<Attribute>,
    /// Request this sign-on answered; `None` for unsolicited responses.
    pub in_response_to: Option<String>,
    /// RelayState returned with the response.
    pub relay_state: Option<String>,
    /// The accepted assertion.
    pub assertion: Assertion,
}

impl AuthenticatedUser {
    /// Values of the attribute named `name`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|a| a.name == name || a.friendly_name.as_deref() == Some(name))
            .map(|a| a.values.as_slice())
    }
}

/// Result of [`SsoEngine::handle_response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsoOutcome {
    /// The user is signed on.
    Authenticated(Box<AuthenticatedUser>),
    /// The response was rejected and an error hook chose to suppress the
    /// failure. Nothing was recorded in the session.
    Declined {
        /// Category of the suppressed error.
        category: ErrorCategory,
        /// Its message.
        reason: String,
        /// RelayState returned with the response, when it could be decoded.
        relay_state: Option<String>,
    },
}

impl SsoEngine {
    /// Builds an `AuthnRequest` for the selected IdP and encodes it for the
    /// binding its metadata offers.
    ///
    /// The request id is recorded as the pending request of `session`, or
    /// process wide without a session. A new request replaces any request
    /// still pending in the same session.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no IdP can be selected or it offers no
    /// usable endpoint, and [`SamlError::MissingCredential`] if the request
    /// must be signed without a key.
    pub async fn initiate_sso(
        &self,
        session: Option<&dyn SessionContext>,
        idp: Option<&str>,
        relay_state: Option<&str>,
    ) -> SamlResult<OutboundMessage> {
        self.start_sso(session, idp, relay_state)
            .await
            .map_err(|err| self.reject(ErrorStage::InitiateSso, err))
    }

    async fn start_sso(
        &self,
        session: Option<&dyn SessionContext>,
        idp: Option<&str>,
        relay_state: Option<&str>,
    ) -> SamlResult<OutboundMessage> {
        let idp = self.select_idp(idp, session)?;
        let entity = self.idp_metadata(&idp.entity_id)?;
        let descriptor = entity.require_idp()?;
        let endpoint = pick_endpoint(idp.request_binding, |b| descriptor.single_sign_on_service(b)).ok_or_else(|| {
            SamlError::UnsupportedBinding(format!("{} offers no usable SingleSignOnService", idp.entity_id))
        })?;

        let request = self.factory().authn_request(&endpoint.location);
        let outbound = self
            .deliver(
                Dispatch {
                    binding: endpoint.binding,
                    destination: &endpoint.location,
                    recipient: &idp.entity_id,
                    message_id: &request.id,
                    message_type: SamlMessageType::Request,
                    relay_state,
                    sign: self.sp.sign_authn_requests || descriptor.want_authn_requests_signed,
                },
                request.to_xml(),
            )
            .await?;

        self.replay
            .record_request(&replay_scope(session), &request.id, self.config.request_ttl())
            .await?;
        if let Some(session) = session {
            session.set(IDP_KEY, idp.entity_id.clone());
            SsoState::RequestSent {
                request_id: request.id.clone(),
                idp: idp.entity_id.clone(),
            }
            .save(session)?;
        }
        info!(
            idp = %idp.entity_id,
            request_id = %request.id,
            binding = %endpoint.binding,
            "authentication request issued"
        );
        Ok(outbound)
    }

    /// Drops the pending request of `session` and returns it to idle.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the replay store fails.
    pub async fn cancel_sso(&self, session: &dyn SessionContext) -> SamlResult<()> {
        self.replay.discard(&ReplayScope::session(session.id())).await?;
        SsoState::Idle.save(session)?;
        debug!(session = %session.id(), "pending sign-on cancelled");
        Ok(())
    }

    /// Consumes an authentication response.
    ///
    /// The response must be signed (on the message or on the assertion) by
    /// the IdP named in its `Issuer`, answer the request pending for this
    /// caller unless unsolicited responses are allowed, carry exactly one
    /// assertion, and pass the validator and configured profiles. On success
    /// a [`SignOnRecord`] is written to `session`.
    ///
    /// # Errors
    ///
    /// Returns the first failed check. Nothing is recorded in the session on
    /// failure besides [`SsoState::Failed`].
    pub async fn handle_response(
        &self,
        session: Option<&dyn SessionContext>,
        inbound: &InboundMessage,
    ) -> SamlResult<SsoOutcome> {
        let mut relay_state = None;
        match self.consume_response(session, inbound, &mut relay_state).await {
            Ok(user) => Ok(SsoOutcome::Authenticated(Box::new(user))),
            Err(err) => {
                if let Some(session) = session {
                    let failed = SsoState::Failed {
                        category: err.category(),
                    };
                    if let Err(save_err) = failed.save(session) {
                        debug!(error = %save_err, "could not record failed sign-on");
                    }
                }
                match self.intercept(ErrorStage::Response, &err) {
                    HookDecision::Suppress => Ok(SsoOutcome::Declined {
                        category: err.category(),
                        reason: err.to_string(),
                        relay_state,
                    }),
                    HookDecision::Propagate => Err(err),
                }
            }
        }
    }

    async fn consume_response(
        &self,
        session: Option<&dyn SessionContext>,
        inbound: &InboundMessage,
        relay_state: &mut Option<String>,
    ) -> SamlResult<AuthenticatedUser> {
        let received = self.receive(inbound).await?;
        relay_state.clone_from(&received.relay_state);

        let doc = xml::parse(&received.xml)?;
        let root = doc.root_element();
        if !xml::is_element(root, SAMLP_NS, "Response") {
            return Err(SamlError::InvalidResponse(format!(
                "expected samlp:Response, found {}",
                root.tag_name().name()
            )));
        }
        let response = Response::from_node(root)?;
        debug!(response_id = %response.id, binding = %received.binding, "received authentication response");
        if let Some(session) = session {
            SsoState::ResponsePending {
                in_response_to: response.in_response_to.clone(),
            }
            .save(session)?;
        }

        let issuer = response
            .issuer_value()
            .or_else(|| response.assertions.first().and_then(Assertion::issuer_value))
            .ok_or_else(|| SamlError::MissingElement("Issuer".to_string()))?
            .to_string();
        let idp = self.idp_config(&issuer)?;
        let entity = self.idp_metadata(&issuer)?;
        let validator = self.validator_for(idp, &entity)?;
        let response_signed = self.authenticate_message(&doc, &received, &validator)?;

        if let Some(destination) = &response.destination {
            if destination != &self.sp.acs_url {
                return Err(SamlError::InvalidDestination {
                    expected: self.sp.acs_url.clone(),
                    actual: destination.clone(),
                });
            }
        }

        let in_response_to = self
            .check_in_response_to(&replay_scope(session), response.in_response_to.as_deref())
            .await?;
        response.status.ensure_success()?;

        let (assertion, assertion_signed) = self.extract_assertion(&doc, root, &validator)?;
        if self.sp.want_assertions_signed && !assertion_signed && !response_signed {
            return Err(SamlError::SignatureMissing(
                "neither the response nor the assertion is signed".to_string(),
            ));
        }

        let now = self.now();
        let skew = self.config.clock_skew();
        let assertion_validator = AssertionValidator::new(self.sp.audiences())
            .with_clock(self.clock.clone())
            .with_skew(skew);
        assertion_validator.validate(&assertion)?;
        assertion_validator.validate_time_restrictions(&assertion)?;
        if assertion.issuer_value() != Some(issuer.as_str()) {
            return Err(SamlError::InvalidIssuer {
                expected: issuer,
                actual: assertion.issuer_value().unwrap_or_default().to_string(),
            });
        }

        let context = ProfileContext {
            acs_url: &self.sp.acs_url,
            in_response_to: in_response_to.as_deref(),
            now,
            skew,
        };
        for profile in &self.profiles {
            if let Err(err) = profile.check(&assertion, &context) {
                debug!(profile = profile.name(), error = %err, "assertion profile rejected assertion");
                return Err(err);
            }
        }

        let name_id = assertion
            .name_id()
            .cloned()
            .ok_or_else(|| SamlError::InvalidAssertion("assertion subject has no NameID".to_string()))?;

        if assertion.is_one_time_use() {
            self.consume_one_time_use(&assertion, now).await?;
        }

        let session_index = assertion.session_index().map(String::from);
        let authn_context_class = assertion
            .authn_statements()
            .next()
            .and_then(|s| s.authn_context_class_ref.clone());
        let attributes = assertion.attributes().cloned().collect();
        let user = AuthenticatedUser {
            idp: issuer,
            session_index,
            authn_context_class,
            attributes,
            name_id,
            in_response_to,
            relay_state: received.relay_state,
            assertion,
        };
        if let Some(session) = session {
            SignOnRecord {
                idp: user.idp.clone(),
                name_id: user.name_id.clone(),
                session_index: user.session_index.clone(),
                authenticated_at: now,
            }
            .save(session)?;
            session.set(IDP_KEY, user.idp.clone());
            SsoState::Authenticated { idp: user.idp.clone() }.save(session)?;
        }
        info!(
            idp = %user.idp,
            name_id_format = user.name_id.format.as_deref().unwrap_or("unspecified"),
            session_index = user.session_index.as_deref().unwrap_or(""),
            unsolicited = user.in_response_to.is_none(),
            "single sign-on completed"
        );
        Ok(user)
    }

    /// Returns the single assertion of `response`, decrypted and with its
    /// own signature verified when present, and whether it was signed.
    fn extract_assertion(
        &self,
        doc: &Document<'_>,
        response: Node<'_, '_>,
        validator: &XmlSignatureValidator,
    ) -> SamlResult<(Assertion, bool)> {
        let plain: Vec<_> = xml::children(response, SAML_NS, "Assertion").collect();
        let encrypted: Vec<_> = xml::children(response, SAML_NS, "EncryptedAssertion").collect();
        match (plain.as_slice(), encrypted.as_slice()) {
            ([node], []) => verified_assertion(doc, *node, validator),
            ([], [node]) => {
                let credentials = self.sp.require_credentials()?;
                let plaintext = EncryptedAssertionCodec::decrypt(*node, credentials.decryption_key())?;
                let decrypted = xml::parse(&plaintext)?;
                debug!("decrypted assertion");
                verified_assertion(&decrypted, decrypted.root_element(), validator)
            }
            ([], []) => Err(SamlError::MissingElement("Assertion".to_string())),
            _ => Err(SamlError::InvalidResponse(
                "response must carry exactly one assertion".to_string(),
            )),
        }
    }

    /// Consumes the pending request `in_response_to` names. Without one the
    /// response is unsolicited, which only passes when allowed.
    async fn check_in_response_to(
        &self,
        scope: &ReplayScope,
        in_response_to: Option<&str>,
    ) -> SamlResult<Option<String>> {
        match in_response_to.map(str::trim).filter(|id| !id.is_empty()) {
            None if self.sp.allow_unsolicited => {
                debug!("accepting unsolicited response");
                Ok(None)
            }
            None => Err(SamlError::MissingInResponseTo),
            Some(id) => {
                if self.replay.consume(scope, id).await? {
                    Ok(Some(id.to_string()))
                } else {
                    Err(SamlError::InResponseToMismatch(id.to_string()))
                }
            }
        }
    }

    /// Marks a `OneTimeUse` assertion as consumed until it expires.
    async fn consume_one_time_use(&self, assertion: &Assertion, now: DateTime<Utc>) -> SamlResult<()> {
        let id = assertion
            .id
            .as_deref()
            .ok_or_else(|| SamlError::MissingAttribute {
                element: "Assertion".to_string(),
                attribute: "ID".to_string(),
            })?;
        let ttl = assertion
            .conditions
            .as_ref()
            .and_then(|c| c.not_on_or_after)
            .and_then(|until| (until - now + self.config.clock_skew()).to_std().ok())
            .filter(|ttl| *ttl > Duration::ZERO)
            .unwrap_or_else(|| self.config.one_time_use_fallback_ttl());
        if !self.one_time_use.insert_if_absent(id, ttl).await? {
            return Err(SamlError::AssertionReplayed(id.to_string()));
        }
        debug!(assertion_id = %id, ttl_secs = ttl.as_secs(), "one-time-use assertion consumed");
        Ok(())
    }
}

fn verified_assertion(
    doc: &Document<'_>,
    node: Node<'_, '_>,
    validator: &XmlSignatureValidator,
) -> SamlResult<(Assertion, bool)> {
    if !xml::is_element(node, SAML_NS, "Assertion") {
        return Err(SamlError::InvalidAssertion(format!(
            "expected saml:Assertion, found {}",
            node.tag_name().name()
        )));
    }
    let signed = signature::is_signed(node);
    if signed {
        validator.verify_element(doc, node)?;
    }
    Ok((Assertion::from_node(node)?, signed))
}
