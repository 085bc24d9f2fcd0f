//! Web Browser SSO integration tests.

use fed_crypto::Certificate;
use fed_protocol_saml::signature::{XmlSignatureValidator, XmlSigner};
use fed_protocol_saml::{
    ErrorCategory, InboundMessage, MemorySession, Response, SamlBinding, SessionContext, SsoOutcome,
};

use crate::common::{TestEnv, TestIdp, SP_CERT, SP_KEY};

/// Tests a complete SP-initiated sign-on: signed Redirect request out,
/// signed POST response in.
#[tokio::test]
async fn test_sp_initiated_sso() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();

    let outbound = env.engine.initiate_sso(Some(&session), None, Some("/app")).await?;
    assert_eq!(outbound.binding, SamlBinding::HttpRedirect);
    assert_eq!(outbound.destination, env.idp.sso_url());

    let request = env.idp.read_authn_request(&outbound)?;
    assert_eq!(request.id, outbound.message_id);
    assert_eq!(request.assertion_consumer_service_url.as_deref(), Some(env.sp().acs_url.as_str()));
    assert_eq!(request.destination.as_deref(), Some(env.idp.sso_url().as_str()));

    let response = env.idp.answer(env.sp(), &request)?;
    let outcome = env
        .engine
        .handle_response(Some(&session), &TestIdp::post(&response, Some("/app")))
        .await?;
    let SsoOutcome::Authenticated(user) = outcome else {
        anyhow::bail!("expected sign-on, got {outcome:?}");
    };
    assert_eq!(user.idp, env.idp.entity_id);
    assert_eq!(user.name_id.value, "alice");
    assert_eq!(user.session_index.as_deref(), Some("idx-7"));
    assert_eq!(user.relay_state.as_deref(), Some("/app"));
    assert_eq!(user.attribute("mail"), Some(&["alice@example.com".to_string()][..]));
    assert!(session.get(fed_protocol_saml::engine::SIGN_ON_KEY).is_some());

    Ok(())
}

/// Tests that a response cannot be consumed twice.
#[tokio::test]
async fn test_response_replay_rejected() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    let outbound = env.engine.initiate_sso(Some(&session), None, None).await?;
    let response = env.idp.answer(env.sp(), &env.idp.read_authn_request(&outbound)?)?;
    let inbound = TestIdp::post(&response, None);

    env.engine.handle_response(Some(&session), &inbound).await?;
    let err = env
        .engine
        .handle_response(Some(&session), &inbound)
        .await
        .expect_err("replayed response must be rejected");
    assert_eq!(err.category(), ErrorCategory::Replay);

    Ok(())
}

/// Tests that a response signed with an untrusted key is rejected.
#[tokio::test]
async fn test_untrusted_signature_rejected() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    let outbound = env.engine.initiate_sso(Some(&session), None, None).await?;
    let request = env.idp.read_authn_request(&outbound)?;

    let forged = Response::success(&env.idp.entity_id)
        .in_response_to(&request.id)
        .with_destination(&env.sp().acs_url)
        .with_assertion(env.idp.assertion(env.sp(), chrono::Utc::now(), &request.id));
    let signed = XmlSigner::from_pem(SP_KEY, Some(SP_CERT))?.sign(&forged.to_xml(), &forged.id)?;

    let err = env
        .engine
        .handle_response(Some(&session), &TestIdp::post(&signed, None))
        .await
        .expect_err("forged response must be rejected");
    assert_eq!(err.category(), ErrorCategory::Signature);

    Ok(())
}

/// Tests that a response without a pending request is refused by default.
#[tokio::test]
async fn test_unsolicited_response_rejected() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    let outbound = env.engine.initiate_sso(Some(&session), None, None).await?;
    let request = env.idp.read_authn_request(&outbound)?;
    env.engine.cancel_sso(&session).await?;

    let response = env.idp.answer(env.sp(), &request)?;
    let err = env
        .engine
        .handle_response(Some(&session), &TestIdp::post(&response, None))
        .await
        .expect_err("cancelled request must not be answerable");
    assert_eq!(err.category(), ErrorCategory::Replay);

    Ok(())
}

/// Tests the POST binding for outbound requests.
#[tokio::test]
async fn test_post_binding_request() -> anyhow::Result<()> {
    let env = TestEnv::with_idp_config(|idp| idp.with_request_binding(SamlBinding::HttpPost)).await?;
    let outbound = env.engine.initiate_sso(None, None, Some("/app")).await?;

    assert_eq!(outbound.binding, SamlBinding::HttpPost);
    let html = outbound.form_html().expect("POST delivery serves a form");
    assert!(html.contains("name=\"SAMLRequest\""));
    assert!(html.contains("name=\"RelayState\" value=\"/app\""));
    assert!(html.contains(&format!("{}/sso-post", env.idp.entity_id)));

    Ok(())
}

/// Tests that a garbled POST body fails with a format error.
#[tokio::test]
async fn test_malformed_post_rejected() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let inbound = InboundMessage::Post {
        body: b"SAMLResponse=%%%not-base64".to_vec(),
    };
    let err = env
        .engine
        .handle_response(None, &inbound)
        .await
        .expect_err("garbage must be rejected");
    assert_eq!(err.category(), ErrorCategory::Format);

    Ok(())
}

/// Tests that the SP metadata endpoint serves a signed descriptor.
#[tokio::test]
async fn test_sp_metadata_endpoint() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    let response = env.client.get(format!("{}/metadata", env.sp_base_url)).send().await?;
    assert!(response.status().is_success(), "got {}", response.status());
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    assert!(content_type.contains("samlmetadata+xml"), "got {content_type}");

    let body = response.text().await?;
    assert!(body.contains("SPSSODescriptor"));
    assert!(body.contains("AssertionConsumerService"));
    assert!(body.contains("ArtifactResolutionService"));
    XmlSignatureValidator::from_certificates([&Certificate::from_pem(SP_CERT)?]).validate_root(&body)?;

    Ok(())
}
