//! Single Logout integration tests.

use fed_protocol_saml::bindings::{HttpRedirectBinding, SamlMessageType};
use fed_protocol_saml::engine::{SignOnRecord, SloState, SsoState};
use fed_protocol_saml::{
    status_codes, sub_status_codes, ErrorCategory, LogoutOutcome, LogoutRequest, LogoutResponse, MemorySession,
    NameId, SamlBinding,
};

use crate::common::TestEnv;

/// Tests SP-initiated logout answered by the IdP over Redirect.
#[tokio::test]
async fn test_sp_initiated_logout() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    env.sign_on(&session).await?;

    let outbound = env.engine.initiate_logout(&session, Some("/bye")).await?;
    assert_eq!(outbound.binding, SamlBinding::HttpRedirect);
    assert_eq!(outbound.destination, env.idp.slo_url());
    assert_eq!(
        SloState::load(&session),
        SloState::LogoutInitiated {
            request_id: outbound.message_id.clone(),
            idp: env.idp.entity_id.clone(),
        }
    );

    let url = outbound.redirect_url().expect("redirect delivery");
    let query = HttpRedirectBinding::parse_url(url)?;
    assert!(query.is_signed());
    let request = LogoutRequest::parse(&query.decode()?.xml)?;
    assert_eq!(request.name_id.value, "alice");
    assert_eq!(request.session_indexes, vec!["idx-7".to_string()]);

    let response = LogoutResponse::success(&env.idp.entity_id)
        .in_response_to(&request.id)
        .with_destination(format!("{}/slo", env.sp_base_url));
    let signed = env.idp.sign(&response.to_xml(), &response.id)?;
    let inbound = env.idp.redirect(&signed, SamlMessageType::Response, Some("/bye"))?;

    let outcome = env.engine.handle_logout_message(Some(&session), &inbound).await?;
    let LogoutOutcome::Completed { partial, relay_state } = outcome else {
        anyhow::bail!("expected completed logout, got {outcome:?}");
    };
    assert!(!partial);
    assert_eq!(relay_state.as_deref(), Some("/bye"));
    assert!(SignOnRecord::load(&session).is_none());
    assert_eq!(SsoState::load(&session), SsoState::Idle);

    Ok(())
}

/// Tests that a partial logout is reported as such.
#[tokio::test]
async fn test_partial_logout() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    env.sign_on(&session).await?;
    let outbound = env.engine.initiate_logout(&session, None).await?;

    let response = LogoutResponse::partial_logout(&env.idp.entity_id).in_response_to(&outbound.message_id);
    let signed = env.idp.sign(&response.to_xml(), &response.id)?;
    let inbound = env.idp.redirect(&signed, SamlMessageType::Response, None)?;

    let outcome = env.engine.handle_logout_message(Some(&session), &inbound).await?;
    assert!(matches!(outcome, LogoutOutcome::Completed { partial: true, .. }));

    Ok(())
}

/// Tests IdP-initiated logout: the SP ends the local session and answers
/// the IdP's logout service.
#[tokio::test]
async fn test_idp_initiated_logout() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    env.sign_on(&session).await?;

    let request = LogoutRequest::new(&env.idp.entity_id, NameId::persistent("alice"))
        .with_destination(format!("{}/slo", env.sp_base_url))
        .with_session_index("idx-7")
        .valid_for(5);
    let signed = env.idp.sign(&request.to_xml(), &request.id)?;
    let inbound = env.idp.redirect(&signed, SamlMessageType::Request, Some("idp-state"))?;

    let outcome = env.engine.handle_logout_message(Some(&session), &inbound).await?;
    let LogoutOutcome::Respond { response, terminated } = outcome else {
        anyhow::bail!("expected a logout response, got {outcome:?}");
    };
    assert!(terminated);
    assert!(SignOnRecord::load(&session).is_none());

    let url = response.redirect_url().expect("redirect delivery");
    assert!(url.starts_with(&env.idp.slo_url()));
    let query = HttpRedirectBinding::parse_url(url)?;
    assert!(query.is_signed());
    let decoded = query.decode()?;
    assert_eq!(decoded.relay_state.as_deref(), Some("idp-state"));
    let answer = LogoutResponse::parse(&decoded.xml)?;
    assert_eq!(answer.in_response_to.as_deref(), Some(request.id.as_str()));
    assert!(answer.is_success());

    Ok(())
}

/// Tests that logout for a principal the SP does not know is refused
/// without touching the session.
#[tokio::test]
async fn test_idp_logout_for_unknown_principal() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    env.sign_on(&session).await?;

    let request = LogoutRequest::new(&env.idp.entity_id, NameId::persistent("mallory")).valid_for(5);
    let signed = env.idp.sign(&request.to_xml(), &request.id)?;
    let inbound = env.idp.redirect(&signed, SamlMessageType::Request, None)?;

    let outcome = env.engine.handle_logout_message(Some(&session), &inbound).await?;
    let LogoutOutcome::Respond { response, terminated } = outcome else {
        anyhow::bail!("expected a logout response, got {outcome:?}");
    };
    assert!(!terminated);
    assert!(SignOnRecord::load(&session).is_some());

    let url = response.redirect_url().expect("redirect delivery");
    let answer = LogoutResponse::parse(&HttpRedirectBinding::parse_url(url)?.decode()?.xml)?;
    assert_eq!(answer.status.status_code.value, status_codes::REQUESTER);
    assert_eq!(answer.status.status_code.sub_status_value(), Some(sub_status_codes::UNKNOWN_PRINCIPAL));

    Ok(())
}

/// Tests that an unsigned logout response is rejected.
#[tokio::test]
async fn test_unsigned_logout_response_rejected() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    env.sign_on(&session).await?;
    let outbound = env.engine.initiate_logout(&session, None).await?;

    let response = LogoutResponse::success(&env.idp.entity_id).in_response_to(&outbound.message_id);
    let query = HttpRedirectBinding::encode_response(&response.to_xml(), None)?;
    let inbound = fed_protocol_saml::InboundMessage::from_request("GET", &query, b"")?;

    let err = env
        .engine
        .handle_logout_message(Some(&session), &inbound)
        .await
        .expect_err("unsigned logout response must be rejected");
    assert_eq!(err.category(), ErrorCategory::Signature);
    assert!(SignOnRecord::load(&session).is_some());

    Ok(())
}
