//! Builders for outbound protocol messages.
//!
//! Messages get a fresh ID and are issued at the factory's instant, so the
//! engine's clock governs both validation and issuance.

use chrono::{DateTime, Utc};

use crate::bindings::{Artifact, ArtifactResolve, ArtifactResponse};
use crate::config::ServiceProviderConfig;
use crate::types::{AuthnRequest, LogoutRequest, LogoutResponse, NameId, Status};

/// Lifetime of an outbound logout request, in minutes.
pub const LOGOUT_REQUEST_VALIDITY_MINUTES: i64 = 5;

/// Builds messages on behalf of one service provider.
#[derive(Debug, Clone, Copy)]
pub struct MessageFactory<'a> {
    sp: &'a ServiceProviderConfig,
    now: DateTime<Utc>,
}

impl<'a> MessageFactory<'a> {
    /// Creates a factory issuing messages at `now`.
    #[must_use]
    pub const fn new(sp: &'a ServiceProviderConfig, now: DateTime<Utc>) -> Self {
        Self { sp, now }
    }

    /// Builds an authentication request for `destination`.
    ///
    /// The ACS URL, protocol binding, NameID policy and requested context
    /// come from the SP configuration; the request restricts the assertion
    /// to the SP's own entity id.
    #[must_use]
    pub fn authn_request(&self, destination: &str) -> AuthnRequest {
        let mut request = AuthnRequest::new(&self.sp.entity_id)
            .with_destination(destination)
            .with_acs_url(&self.sp.acs_url)
            .with_protocol_binding(self.sp.acs_binding)
            .with_audience(&self.sp.entity_id)
            .with_force_authn(self.sp.force_authn)
            .with_passive(self.sp.is_passive);
        request.issue_instant = self.now;
        if let Some(policy) = &self.sp.name_id_policy {
            request = request.with_name_id_policy(policy.clone());
        }
        if let Some(context) = &self.sp.requested_authn_context {
            request = request.with_requested_authn_context(context.clone());
        }
        request
    }

    /// Builds a logout request for the signed-on principal.
    #[must_use]
    pub fn logout_request(&self, destination: &str, name_id: &NameId, session_index: Option<&str>) -> LogoutRequest {
        let mut request = LogoutRequest::new(&self.sp.entity_id, name_id.clone())
            .with_destination(destination)
            .with_reason(LogoutRequest::REASON_USER);
        request.issue_instant = self.now;
        let request = request.valid_for(LOGOUT_REQUEST_VALIDITY_MINUTES);
        match session_index {
            Some(index) => request.with_session_index(index),
            None => request,
        }
    }

    /// Builds a logout response answering `in_response_to`.
    #[must_use]
    pub fn logout_response(&self, destination: &str, in_response_to: &str, status: Status) -> LogoutResponse {
        let mut response = LogoutResponse::with_status(&self.sp.entity_id, status)
            .in_response_to(in_response_to)
            .with_destination(destination);
        response.issue_instant = self.now;
        response
    }

    /// Builds an artifact resolution request.
    #[must_use]
    pub fn artifact_resolve(&self, destination: &str, artifact: &Artifact) -> ArtifactResolve {
        let mut request = ArtifactResolve::new(&self.sp.entity_id, artifact).with_destination(destination);
        request.issue_instant = self.now;
        request
    }

    /// Builds the answer to an artifact resolution request.
    #[must_use]
    pub fn artifact_response(&self, in_response_to: &str, message: Option<String>) -> ArtifactResponse {
        let mut response = ArtifactResponse::success(&self.sp.entity_id, in_response_to, message);
        response.issue_instant = self.now;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AuthnContextClass, Condition, NameIdFormat, NameIdPolicy, RequestedAuthnContext, SamlBinding,
    };

    fn sp() -> ServiceProviderConfig {
        ServiceProviderConfig::new("https://sp.example.com", "https://sp.example.com/acs")
            .with_acs_binding(SamlBinding::HttpArtifact)
            .with_name_id_policy(NameIdPolicy::with_format(NameIdFormat::Persistent).allow_create(true))
            .with_requested_authn_context(RequestedAuthnContext::new(vec![
                AuthnContextClass::PasswordProtectedTransport.uri().to_string(),
            ]))
            .with_passive(true)
    }

    #[test]
    fn authn_request_from_config() {
        let sp = sp();
        let now = Utc::now();
        let request = MessageFactory::new(&sp, now).authn_request("https://idp.example.com/sso");

        assert!(request.id.starts_with("id"));
        assert!(request.id.len() >= 34);
        assert_eq!(request.issue_instant, now);
        assert_eq!(request.issuer.value, "https://sp.example.com");
        assert_eq!(request.destination.as_deref(), Some("https://idp.example.com/sso"));
        assert_eq!(request.assertion_consumer_service_url.as_deref(), Some("https://sp.example.com/acs"));
        assert_eq!(request.parsed_protocol_binding(), Some(SamlBinding::HttpArtifact));
        assert!(request.is_passive);
        assert!(!request.force_authn);
        assert_eq!(
            request.name_id_policy.as_ref().and_then(NameIdPolicy::parsed_format),
            Some(NameIdFormat::Persistent)
        );
        assert_eq!(request.requested_authn_context.as_ref().map(|c| c.class_refs.len()), Some(1));

        let conditions = request.conditions.as_ref().unwrap();
        assert_eq!(
            conditions.items,
            vec![Condition::AudienceRestriction(vec!["https://sp.example.com".to_string()])]
        );
    }

    #[test]
    fn fresh_ids() {
        let sp = sp();
        let factory = MessageFactory::new(&sp, Utc::now());
        assert_ne!(factory.authn_request("https://a").id, factory.authn_request("https://a").id);
    }

    #[test]
    fn logout_request_carries_session() {
        let sp = sp();
        let now = Utc::now();
        let name_id = NameId::persistent("user-1");
        let request = MessageFactory::new(&sp, now).logout_request("https://idp.example.com/slo", &name_id, Some("s1"));

        assert_eq!(request.name_id, name_id);
        assert_eq!(request.session_indexes, vec!["s1".to_string()]);
        assert_eq!(request.issue_instant, now);
        assert!(!request.is_expired_at(now));
        assert!(request.is_expired_at(now + chrono::Duration::minutes(LOGOUT_REQUEST_VALIDITY_MINUTES)));
    }

    #[test]
    fn logout_response_answers_request() {
        let sp = sp();
        let response = MessageFactory::new(&sp, Utc::now()).logout_response(
            "https://idp.example.com/slo",
            "id-req",
            Status::success(),
        );
        assert!(response.is_success());
        assert_eq!(response.in_response_to.as_deref(), Some("id-req"));
        assert_eq!(response.destination.as_deref(), Some("https://idp.example.com/slo"));
    }
}
