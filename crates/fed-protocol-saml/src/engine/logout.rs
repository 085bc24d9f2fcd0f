//! Single Logout, both as initiator and as responder.

use roxmltree::{Document, Node};
use tracing::{debug, info};

use super::hooks::{ErrorStage, HookDecision};
use super::message::{InboundMessage, OutboundMessage, Received};
use super::session::{replay_scope, SessionContext, SignOnRecord, SloState, SsoState};
use super::{pick_endpoint, Dispatch, SsoEngine};
use crate::bindings::SamlMessageType;
use crate::error::{ErrorCategory, SamlError, SamlResult};
use crate::types::{status_codes, sub_status_codes, LogoutRequest, LogoutResponse, Status, SAMLP_NS};
use crate::xml;

/// Result of [`SsoEngine::handle_logout_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// An IdP asked for logout; send `response` back to it.
    Respond {
        /// Signed `LogoutResponse`.
        response: OutboundMessage,
        /// Whether a local sign-on was terminated.
        terminated: bool,
    },
    /// The IdP confirmed a logout this SP initiated.
    Completed {
        /// The IdP reported that not every session participant logged out.
        partial: bool,
        /// RelayState returned with the response.
        relay_state: Option<String>,
    },
    /// The message was rejected and an error hook suppressed the failure.
    Declined {
        /// Category of the suppressed error.
        category: ErrorCategory,
        /// Its message.
        reason: String,
    },
}

impl SsoEngine {
    /// Sends a signed `LogoutRequest` for the sign-on recorded in `session`
    /// to the IdP that asserted it.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::NotSignedOn`] without a recorded sign-on, a
    /// configuration error if the IdP offers no usable logout endpoint, and
    /// [`SamlError::MissingCredential`] without an SP signing key.
    pub async fn initiate_logout(
        &self,
        session: &dyn SessionContext,
        relay_state: Option<&str>,
    ) -> SamlResult<OutboundMessage> {
        self.start_logout(session, relay_state)
            .await
            .map_err(|err| self.reject(ErrorStage::InitiateLogout, err))
    }

    async fn start_logout(
        &self,
        session: &dyn SessionContext,
        relay_state: Option<&str>,
    ) -> SamlResult<OutboundMessage> {
        let record = SignOnRecord::load(session).ok_or(SamlError::NotSignedOn)?;
        let idp = self.idp_config(&record.idp)?;
        let entity = self.idp_metadata(&record.idp)?;
        let role = &entity.require_idp()?.role;
        let endpoint = match idp.logout_binding {
            Some(binding) => role.single_logout_service(binding),
            None => role
                .single_logout_service(self.sp.slo_binding)
                .or_else(|| pick_endpoint(None, |b| role.single_logout_service(b))),
        }
        .ok_or_else(|| {
            SamlError::UnsupportedBinding(format!("{} offers no usable SingleLogoutService", idp.entity_id))
        })?;

        let request = self
            .factory()
            .logout_request(&endpoint.location, &record.name_id, record.session_index.as_deref());
        let outbound = self
            .deliver(
                Dispatch {
                    binding: endpoint.binding,
                    destination: &endpoint.location,
                    recipient: &idp.entity_id,
                    message_id: &request.id,
                    message_type: SamlMessageType::Request,
                    relay_state,
                    sign: true,
                },
                request.to_xml(),
            )
            .await?;

        self.replay
            .record_request(&replay_scope(Some(session)), &request.id, self.config.request_ttl())
            .await?;
        SloState::LogoutInitiated {
            request_id: request.id.clone(),
            idp: idp.entity_id.clone(),
        }
        .save(session)?;
        info!(idp = %idp.entity_id, request_id = %request.id, binding = %endpoint.binding, "logout request issued");
        Ok(outbound)
    }

    /// Processes a `LogoutRequest` from an IdP or the `LogoutResponse` to a
    /// logout this SP initiated, whichever `inbound` carries.
    ///
    /// Both must be signed by the issuing IdP. A request terminates the local
    /// sign-on when it names the recorded principal and session, and is
    /// always answered with a signed `LogoutResponse`.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub async fn handle_logout_message(
        &self,
        session: Option<&dyn SessionContext>,
        inbound: &InboundMessage,
    ) -> SamlResult<LogoutOutcome> {
        match self.process_logout(session, inbound).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => match self.intercept(ErrorStage::Logout, &err) {
                HookDecision::Suppress => Ok(LogoutOutcome::Declined {
                    category: err.category(),
                    reason: err.to_string(),
                }),
                HookDecision::Propagate => Err(err),
            },
        }
    }

    async fn process_logout(
        &self,
        session: Option<&dyn SessionContext>,
        inbound: &InboundMessage,
    ) -> SamlResult<LogoutOutcome> {
        let received = self.receive(inbound).await?;
        let doc = xml::parse(&received.xml)?;
        let root = doc.root_element();
        if xml::is_element(root, SAMLP_NS, "LogoutRequest") {
            self.answer_logout_request(session, &doc, root, &received).await
        } else if xml::is_element(root, SAMLP_NS, "LogoutResponse") {
            self.complete_logout(session, &doc, root, &received).await
        } else {
            Err(SamlError::InvalidRequest(format!(
                "expected a logout message, found {}",
                root.tag_name().name()
            )))
        }
    }

    async fn answer_logout_request(
        &self,
        session: Option<&dyn SessionContext>,
        doc: &Document<'_>,
        root: Node<'_, '_>,
        received: &Received,
    ) -> SamlResult<LogoutOutcome> {
        let request = LogoutRequest::from_node(root)?;
        let issuer = request.issuer.value.as_str();
        let idp = self.idp_config(issuer)?;
        let entity = self.idp_metadata(issuer)?;
        let validator = self.validator_for(idp, &entity)?;
        if !self.authenticate_message(doc, received, &validator)? {
            return Err(SamlError::SignatureMissing("logout request is not signed".to_string()));
        }
        self.check_logout_destination(request.destination.as_deref())?;
        debug!(request_id = %request.id, idp = %issuer, "received logout request");

        let record = session.and_then(|s| SignOnRecord::load(s));
        let mut terminated = false;
        let status = if request.is_expired_at(self.now() - self.config.clock_skew()) {
            Status::requester_error("logout request has expired")
        } else {
            match (session, record) {
                (Some(session), Some(record)) => {
                    if record.idp == issuer && record.matches(&request.name_id, &request.session_indexes) {
                        SignOnRecord::clear(session);
                        SsoState::Idle.save(session)?;
                        SloState::Idle.save(session)?;
                        terminated = true;
                        Status::success()
                    } else {
                        Status::from_codes(status_codes::REQUESTER, Some(sub_status_codes::UNKNOWN_PRINCIPAL))
                    }
                }
                // Nothing signed on here, so nothing is left to terminate.
                _ => Status::success(),
            }
        };

        let role = &entity.require_idp()?.role;
        let endpoint = role
            .single_logout_service(received.binding)
            .or_else(|| pick_endpoint(None, |b| role.single_logout_service(b)))
            .ok_or_else(|| SamlError::UnsupportedBinding(format!("{issuer} offers no usable SingleLogoutService")))?;
        let destination = endpoint.response_url();
        let response = self.factory().logout_response(destination, &request.id, status);
        let outbound = self
            .deliver(
                Dispatch {
                    binding: endpoint.binding,
                    destination,
                    recipient: issuer,
                    message_id: &response.id,
                    message_type: SamlMessageType::Response,
                    relay_state: received.relay_state.as_deref(),
                    sign: true,
                },
                response.to_xml(),
            )
            .await?;
        info!(idp = %issuer, request_id = %request.id, terminated, "answered logout request");
        Ok(LogoutOutcome::Respond {
            response: outbound,
            terminated,
        })
    }

    async fn complete_logout(
        &self,
        session: Option<&dyn SessionContext>,
        doc: &Document<'_>,
        root: Node<'_, '_>,
        received: &Received,
    ) -> SamlResult<LogoutOutcome> {
        let response = LogoutResponse::from_node(root)?;
        let issuer = response.issuer.value.as_str();
        let idp = self.idp_config(issuer)?;
        let entity = self.idp_metadata(issuer)?;
        let validator = self.validator_for(idp, &entity)?;
        if !self.authenticate_message(doc, received, &validator)? {
            return Err(SamlError::SignatureMissing("logout response is not signed".to_string()));
        }
        self.check_logout_destination(response.destination.as_deref())?;

        let in_response_to = response
            .in_response_to
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(SamlError::MissingInResponseTo)?;
        if !self.replay.consume(&replay_scope(session), in_response_to).await? {
            return Err(SamlError::InResponseToMismatch(in_response_to.to_string()));
        }
        response.status.ensure_success()?;
        let partial = response.status.status_code.sub_status_value() == Some(sub_status_codes::PARTIAL_LOGOUT);

        if let Some(session) = session {
            SignOnRecord::clear(session);
            SsoState::Idle.save(session)?;
            SloState::LogoutAcked.save(session)?;
        }
        info!(idp = %issuer, request_id = %in_response_to, partial, "single logout completed");
        Ok(LogoutOutcome::Completed {
            partial,
            relay_state: received.relay_state.clone(),
        })
    }

    fn check_logout_destination(&self, destination: Option<&str>) -> SamlResult<()> {
        match (destination, self.sp.slo_url.as_deref()) {
            (Some(actual), Some(expected)) if actual != expected => Err(SamlError::InvalidDestination {
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;
    use crate::bindings::HttpRedirectBinding;
    use crate::engine::tests::{engine, idp_signer, IDP, SLO};
    use crate::engine::{MemorySession, SsoEngine};
    use crate::types::NameId;

    fn signed_on(session: &MemorySession, now: DateTime<Utc>) {
        SignOnRecord {
            idp: IDP.to_string(),
            name_id: NameId::persistent("alice"),
            session_index: Some("idx-1".to_string()),
            authenticated_at: now,
        }
        .save(session)
        .unwrap();
    }

    fn redirect(xml: &str, message_type: SamlMessageType, relay_state: Option<&str>) -> InboundMessage {
        let query = HttpRedirectBinding::encode(xml, message_type, relay_state, Some(&idp_signer())).unwrap();
        InboundMessage::Redirect { query }
    }

    fn idp_logout_request(now: DateTime<Utc>, name: &str) -> LogoutRequest {
        let mut request = LogoutRequest::new(IDP, NameId::persistent(name))
            .with_destination(SLO)
            .with_session_index("idx-1");
        request.issue_instant = now;
        request.valid_for(5)
    }

    async fn initiated(engine: &SsoEngine, session: &MemorySession) -> OutboundMessage {
        engine.initiate_logout(session, Some("/bye")).await.unwrap()
    }

    #[tokio::test]
    async fn initiate_requires_sign_on() {
        let engine = engine(Utc::now());
        let session = MemorySession::random();
        assert!(matches!(
            engine.initiate_logout(&session, None).await,
            Err(SamlError::NotSignedOn)
        ));
    }

    #[tokio::test]
    async fn initiate_sends_signed_request() {
        let now = Utc::now();
        let engine = engine(now);
        let session = MemorySession::random();
        signed_on(&session, now);

        let outbound = initiated(&engine, &session).await;
        assert_eq!(outbound.destination, format!("{IDP}/slo"));
        let query = HttpRedirectBinding::parse_url(outbound.redirect_url().unwrap()).unwrap();
        assert!(query.is_signed());
        let request = LogoutRequest::parse(&query.decode().unwrap().xml).unwrap();
        assert_eq!(request.session_indexes, vec!["idx-1".to_string()]);
        assert_eq!(request.name_id.value, "alice");
        assert_eq!(
            SloState::load(&session),
            SloState::LogoutInitiated {
                request_id: outbound.message_id.clone(),
                idp: IDP.to_string()
            }
        );
    }

    #[tokio::test]
    async fn logout_response_completes_logout() {
        let now = Utc::now();
        let engine = engine(now);
        let session = MemorySession::random();
        signed_on(&session, now);
        let outbound = initiated(&engine, &session).await;

        let response = LogoutResponse::success(IDP)
            .in_response_to(&outbound.message_id)
            .with_destination(SLO);
        let inbound = redirect(&response.to_xml(), SamlMessageType::Response, Some("/bye"));
        let outcome = engine.handle_logout_message(Some(&session), &inbound).await.unwrap();
        assert_eq!(
            outcome,
            LogoutOutcome::Completed {
                partial: false,
                relay_state: Some("/bye".to_string())
            }
        );
        assert!(SignOnRecord::load(&session).is_none());
        assert_eq!(SloState::load(&session), SloState::LogoutAcked);

        assert!(matches!(
            engine.handle_logout_message(Some(&session), &inbound).await,
            Err(SamlError::InResponseToMismatch(_))
        ));
    }

    #[tokio::test]
    async fn partial_logout_is_reported() {
        let now = Utc::now();
        let engine = engine(now);
        let session = MemorySession::random();
        signed_on(&session, now);
        let outbound = initiated(&engine, &session).await;

        let response = LogoutResponse::partial_logout(IDP).in_response_to(&outbound.message_id);
        let inbound = redirect(&response.to_xml(), SamlMessageType::Response, None);
        let outcome = engine.handle_logout_message(Some(&session), &inbound).await.unwrap();
        assert!(matches!(outcome, LogoutOutcome::Completed { partial: true, .. }));
    }

    #[tokio::test]
    async fn unsigned_logout_response_is_rejected() {
        let now = Utc::now();
        let engine = engine(now);
        let session = MemorySession::random();
        signed_on(&session, now);
        let outbound = initiated(&engine, &session).await;

        let response = LogoutResponse::success(IDP).in_response_to(&outbound.message_id);
        let query = HttpRedirectBinding::encode_response(&response.to_xml(), None).unwrap();
        assert!(matches!(
            engine
                .handle_logout_message(Some(&session), &InboundMessage::Redirect { query })
                .await,
            Err(SamlError::SignatureMissing(_))
        ));
        assert!(SignOnRecord::load(&session).is_some());
    }

    #[tokio::test]
    async fn idp_initiated_logout_terminates_session() {
        let now = Utc::now();
        let engine = engine(now);
        let session = MemorySession::random();
        signed_on(&session, now);

        let request = idp_logout_request(now, "alice");
        let inbound = redirect(&request.to_xml(), SamlMessageType::Request, Some("rs"));
        let outcome = engine.handle_logout_message(Some(&session), &inbound).await.unwrap();
        let LogoutOutcome::Respond { response, terminated } = outcome else {
            panic!("expected a logout response");
        };
        assert!(terminated);
        assert!(SignOnRecord::load(&session).is_none());

        let query = HttpRedirectBinding::parse_url(response.redirect_url().unwrap()).unwrap();
        assert!(query.is_signed());
        let decoded = query.decode().unwrap();
        assert_eq!(decoded.relay_state.as_deref(), Some("rs"));
        let answer = LogoutResponse::parse(&decoded.xml).unwrap();
        assert!(answer.is_success());
        assert_eq!(answer.in_response_to.as_deref(), Some(request.id.as_str()));
    }

    #[tokio::test]
    async fn idp_initiated_logout_for_other_principal() {
        let now = Utc::now();
        let engine = engine(now);
        let session = MemorySession::random();
        signed_on(&session, now);

        let inbound = redirect(&idp_logout_request(now, "bob").to_xml(), SamlMessageType::Request, None);
        let LogoutOutcome::Respond { response, terminated } =
            engine.handle_logout_message(Some(&session), &inbound).await.unwrap()
        else {
            panic!("expected a logout response");
        };
        assert!(!terminated);
        assert!(SignOnRecord::load(&session).is_some());
        let query = HttpRedirectBinding::parse_url(response.redirect_url().unwrap()).unwrap();
        let answer = LogoutResponse::parse(&query.decode().unwrap().xml).unwrap();
        assert_eq!(
            answer.status.status_code.sub_status_value(),
            Some(sub_status_codes::UNKNOWN_PRINCIPAL)
        );
    }

    #[tokio::test]
    async fn expired_logout_request_is_refused() {
        let now = Utc::now();
        let engine = engine(now);
        let session = MemorySession::random();
        signed_on(&session, now);

        let request = idp_logout_request(now - Duration::minutes(10), "alice");
        let inbound = redirect(&request.to_xml(), SamlMessageType::Request, None);
        let LogoutOutcome::Respond { terminated, .. } =
            engine.handle_logout_message(Some(&session), &inbound).await.unwrap()
        else {
            panic!("expected a logout response");
        };
        assert!(!terminated);
        assert!(SignOnRecord::load(&session).is_some());
    }

    #[tokio::test]
    async fn wrong_message_type_is_rejected() {
        let engine = engine(Utc::now());
        let inbound = redirect(
            &format!("<samlp:Foo xmlns:samlp=\"{SAMLP_NS}\"/>"),
            SamlMessageType::Request,
            None,
        );
        assert!(matches!(
            engine.handle_logout_message(None, &inbound).await,
            Err(SamlError::InvalidRequest(_))
        ));
    }
}
