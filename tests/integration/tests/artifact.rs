//! HTTP-Artifact integration tests, with artifact resolution over live
//! SOAP endpoints.

use std::sync::Arc;

use axum::http::StatusCode;
use fed_protocol_saml::bindings::{ArtifactResponse, HttpArtifactBinding, SoapEnvelope};
use fed_protocol_saml::metadata::MetadataStore;
use fed_protocol_saml::{
    ErrorCategory, IdentityProviderConfig, LogoutRequest, MemorySession, SamlBinding, SamlError, SsoEngine,
    SsoOutcome,
};

use crate::common::{canned_server, TestEnv};

/// Tests a response delivered by artifact and resolved from the IdP.
#[tokio::test]
async fn test_response_by_artifact() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let session = MemorySession::random();
    let outbound = env.engine.initiate_sso(Some(&session), None, Some("/app")).await?;
    let response = env.idp.answer(env.sp(), &env.idp.read_authn_request(&outbound)?)?;

    let inbound = env.idp.issue_artifact(response, Some("/app"))?;
    let outcome = env.engine.handle_response(Some(&session), &inbound).await?;
    let SsoOutcome::Authenticated(user) = outcome else {
        anyhow::bail!("expected sign-on, got {outcome:?}");
    };
    assert_eq!(user.name_id.value, "alice");
    assert_eq!(user.relay_state.as_deref(), Some("/app"));

    // The IdP hands out each message once.
    let err = env
        .engine
        .handle_response(Some(&session), &inbound)
        .await
        .expect_err("a spent artifact must not resolve again");
    assert!(matches!(err, SamlError::InvalidArtifact(_)), "got {err:?}");

    Ok(())
}

/// Tests that the SP answers resolution of an artifact it issued for an
/// outbound logout request, exactly once.
#[tokio::test]
async fn test_sp_issued_artifact_resolution() -> anyhow::Result<()> {
    let env = TestEnv::with_idp_config(|idp| idp.with_logout_binding(SamlBinding::HttpArtifact)).await?;
    let session = MemorySession::random();
    env.sign_on(&session).await?;

    let outbound = env.engine.initiate_logout(&session, None).await?;
    assert_eq!(outbound.binding, SamlBinding::HttpArtifact);
    let url = outbound.redirect_url().expect("artifact delivery redirects");
    assert!(url.starts_with(&format!("{}/slo-artifact?", env.idp.entity_id)));
    let (_, query) = url.split_once('?').expect("query");
    let artifact = HttpArtifactBinding::parse_query(query)?.artifact.encode();

    let sp_ars = format!("{}/ars", env.sp_base_url);
    let (status, reply) = env.idp.resolve_at_sp(&env.client, &sp_ars, &artifact).await?;
    assert_eq!(status, StatusCode::OK);
    let response = ArtifactResponse::parse(&SoapEnvelope::unwrap(&reply)?)?;
    assert!(response.status.is_success());
    let request = LogoutRequest::parse(&response.into_message()?)?;
    assert_eq!(request.id, outbound.message_id);
    assert_eq!(request.name_id.value, "alice");

    let (status, reply) = env.idp.resolve_at_sp(&env.client, &sp_ars, &artifact).await?;
    assert_eq!(status, StatusCode::OK);
    let response = ArtifactResponse::parse(&SoapEnvelope::unwrap(&reply)?)?;
    assert!(response.message.is_none());

    Ok(())
}

/// Tests that an unsigned resolution request gets a SOAP fault.
#[tokio::test]
async fn test_unsigned_resolve_faults() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let artifact = fed_protocol_saml::bindings::Artifact::new(&env.sp().entity_id, 0);
    let resolve = fed_protocol_saml::bindings::ArtifactResolve::new(&env.idp.entity_id, &artifact);

    let response = env
        .client
        .post(format!("{}/ars", env.sp_base_url))
        .header("content-type", "text/xml")
        .body(SoapEnvelope::wrap(&resolve.to_xml()))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 500);
    let body = response.text().await?;
    assert!(body.contains("soap11:Client"), "got {body}");
    assert!(SoapEnvelope::unwrap(&body).is_err());

    Ok(())
}

/// Tests that an unavailable artifact resolution service surfaces as a
/// transport error.
#[tokio::test]
async fn test_resolution_service_unavailable() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let (broken_url, _shutdown) = canned_server(StatusCode::SERVICE_UNAVAILABLE, "unavailable").await?;

    let mut descriptor = env.idp.descriptor()?;
    if let Some(idp) = descriptor.idp.as_mut() {
        for service in &mut idp.role.artifact_resolution {
            service.endpoint.location = format!("{broken_url}/ars");
        }
    }
    let engine = SsoEngine::builder(env.sp().clone())
        .with_identity_provider(IdentityProviderConfig::new(&env.idp.entity_id).as_default())
        .with_metadata(Arc::new(MetadataStore::with_entities([descriptor])))
        .build()?;

    let inbound = env.idp.issue_artifact("<unused/>".to_string(), None)?;
    let err = engine
        .handle_response(None, &inbound)
        .await
        .expect_err("resolution must fail");
    assert_eq!(err.category(), ErrorCategory::Transport);
    assert!(err.is_retryable());

    Ok(())
}
