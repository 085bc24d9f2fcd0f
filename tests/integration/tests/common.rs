//! Common test utilities and fixtures.
//!
//! [`TestEnv`] runs two axum servers on ephemeral ports: a scripted identity
//! provider that answers artifact resolution, and the service provider's own
//! SOAP and metadata endpoints backed by a real [`SsoEngine`].

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fed_crypto::Certificate;
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use fed_protocol_saml::bindings::{
    Artifact, ArtifactResolve, ArtifactResponse, HttpArtifactBinding, HttpRedirectBinding, SamlMessageType,
    SoapEnvelope,
};
use fed_protocol_saml::metadata::{
    Endpoint, EntityDescriptor, IdpSsoDescriptor, IndexedEndpoint, KeyDescriptor, MetadataStore, RoleDescriptor,
};
use fed_protocol_saml::signature::XmlSigner;
use fed_protocol_saml::{
    confirmation_methods, Assertion, Attribute, AttributeStatement, AuthenticatedUser, AuthnRequest,
    AuthnStatement, Condition, Conditions, EngineConfig, IdentityProviderConfig, InboundMessage, MemorySession,
    NameId, OutboundMessage, Response, SamlBinding, ServiceProviderConfig, SpCredentials, SsoEngine, SsoOutcome,
    Statement, Subject, SubjectConfirmation, SubjectConfirmationData,
};

pub const SP_KEY: &str = include_str!("../../../testdata/sp-key.pem");
pub const SP_CERT: &str = include_str!("../../../testdata/sp-cert.pem");
pub const IDP_KEY: &str = include_str!("../../../testdata/idp-key.pem");
pub const IDP_CERT: &str = include_str!("../../../testdata/idp-cert.pem");

/// Installs the test subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fed_protocol_saml=debug,fed_cache=info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Serves `router` on `listener` until the returned sender drops.
fn spawn_server(listener: TcpListener, router: Router) -> oneshot::Sender<()> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
            tracing::error!("test server error: {e}");
        }
    });
    shutdown_tx
}

/// A scripted identity provider.
pub struct TestIdp {
    pub entity_id: String,
    signer: XmlSigner,
    /// Messages behind artifacts this IdP issued, keyed by encoded artifact.
    artifacts: DashMap<String, String>,
}

impl TestIdp {
    pub fn sso_url(&self) -> String {
        format!("{}/sso", self.entity_id)
    }

    pub fn slo_url(&self) -> String {
        format!("{}/slo", self.entity_id)
    }

    /// IdP metadata: Redirect and POST sign-on, Redirect and Artifact logout,
    /// SOAP artifact resolution.
    pub fn descriptor(&self) -> anyhow::Result<EntityDescriptor> {
        let role = RoleDescriptor {
            keys: vec![KeyDescriptor::signing(Certificate::from_pem(IDP_CERT)?)],
            single_logout: vec![
                Endpoint::new(SamlBinding::HttpRedirect, self.slo_url()),
                Endpoint::new(SamlBinding::HttpArtifact, format!("{}/slo-artifact", self.entity_id)),
            ],
            artifact_resolution: vec![IndexedEndpoint::new(
                Endpoint::new(SamlBinding::Soap, format!("{}/ars", self.entity_id)),
                0,
            )
            .as_default()],
            name_id_formats: Vec::new(),
        };
        Ok(EntityDescriptor::new(&self.entity_id).with_idp(IdpSsoDescriptor {
            role,
            want_authn_requests_signed: true,
            single_sign_on: vec![
                Endpoint::new(SamlBinding::HttpRedirect, self.sso_url()),
                Endpoint::new(SamlBinding::HttpPost, format!("{}/sso-post", self.entity_id)),
            ],
        }))
    }

    pub fn sign(&self, document: &str, id: &str) -> anyhow::Result<String> {
        Ok(self.signer.sign(document, id)?)
    }

    /// Reads the `AuthnRequest` out of a Redirect delivery.
    pub fn read_authn_request(&self, outbound: &OutboundMessage) -> anyhow::Result<AuthnRequest> {
        let url = outbound
            .redirect_url()
            .ok_or_else(|| anyhow::anyhow!("expected a redirect"))?;
        let query = HttpRedirectBinding::parse_url(url)?;
        anyhow::ensure!(query.is_signed(), "AuthnRequest must be signed");
        Ok(AuthnRequest::parse(&query.decode()?.xml)?)
    }

    /// A bearer assertion for `alice` addressed to the SP.
    pub fn assertion(&self, sp: &ServiceProviderConfig, now: DateTime<Utc>, in_response_to: &str) -> Assertion {
        let window = chrono::Duration::minutes(5);
        Assertion::new(&self.entity_id)
            .with_issue_instant(now)
            .with_subject(
                Subject::with_name_id(NameId::persistent("alice")).with_confirmation(
                    SubjectConfirmation::new(confirmation_methods::BEARER).with_data(
                        SubjectConfirmationData::for_recipient(&sp.acs_url)
                            .with_not_on_or_after(now + window)
                            .with_in_response_to(in_response_to),
                    ),
                ),
            )
            .with_conditions(
                Conditions::new()
                    .with_window(Some(now - chrono::Duration::minutes(1)), Some(now + window))
                    .with(Condition::AudienceRestriction(vec![sp.entity_id.clone()]))
                    .with(Condition::OneTimeUse),
            )
            .with_statement(Statement::Authn(AuthnStatement::new(now).with_session_index("idx-7")))
            .with_statement(Statement::Attribute(AttributeStatement {
                attributes: vec![Attribute::new("mail", vec!["alice@example.com".to_string()])],
            }))
    }

    /// A signed `Response` answering `request`.
    pub fn answer(&self, sp: &ServiceProviderConfig, request: &AuthnRequest) -> anyhow::Result<String> {
        let response = Response::success(&self.entity_id)
            .in_response_to(&request.id)
            .with_destination(&sp.acs_url)
            .with_assertion(self.assertion(sp, Utc::now(), &request.id));
        self.sign(&response.to_xml(), &response.id)
    }

    /// HTTP-POST delivery of `xml` to the SP.
    pub fn post(xml: &str, relay_state: Option<&str>) -> InboundMessage {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("SAMLResponse", &STANDARD.encode(xml));
        if let Some(relay_state) = relay_state {
            form.append_pair("RelayState", relay_state);
        }
        InboundMessage::Post {
            body: form.finish().into_bytes(),
        }
    }

    /// Signed HTTP-Redirect delivery of `xml` to the SP.
    pub fn redirect(
        &self,
        xml: &str,
        message_type: SamlMessageType,
        relay_state: Option<&str>,
    ) -> anyhow::Result<InboundMessage> {
        let query = HttpRedirectBinding::encode(xml, message_type, relay_state, Some(&self.signer))?;
        Ok(InboundMessage::from_request("GET", &query, b"")?)
    }

    /// Stores `message` and returns the HTTP-Artifact delivery referencing it.
    pub fn issue_artifact(&self, message: String, relay_state: Option<&str>) -> anyhow::Result<InboundMessage> {
        let artifact = Artifact::new(&self.entity_id, 0);
        self.artifacts.insert(artifact.encode(), message);
        let query = HttpArtifactBinding::encode_query(&artifact, relay_state);
        Ok(InboundMessage::from_request("GET", &query, b"")?)
    }

    /// Sends a signed `ArtifactResolve` for `artifact` to the SP and returns
    /// the raw reply and its HTTP status.
    pub async fn resolve_at_sp(
        &self,
        client: &Client,
        sp_ars_url: &str,
        artifact: &str,
    ) -> anyhow::Result<(StatusCode, String)> {
        let resolve = ArtifactResolve::new(&self.entity_id, &Artifact::parse(artifact)?).with_destination(sp_ars_url);
        let envelope = SoapEnvelope::wrap(&self.sign(&resolve.to_xml(), &resolve.id)?);
        let response = client
            .post(sp_ars_url)
            .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(envelope)
            .send()
            .await?;
        let status = StatusCode::from_u16(response.status().as_u16())?;
        Ok((status, response.text().await?))
    }

    fn answer_resolve(&self, envelope: &str) -> anyhow::Result<String> {
        let resolve = ArtifactResolve::parse(&SoapEnvelope::unwrap(envelope)?)?;
        let message = self.artifacts.remove(&resolve.artifact).map(|(_, message)| message);
        let response = ArtifactResponse::success(&self.entity_id, &resolve.id, message);
        Ok(SoapEnvelope::wrap(&self.sign(&response.to_xml(), &response.id)?))
    }
}

async fn idp_artifact_resolution(State(idp): State<Arc<TestIdp>>, body: Bytes) -> HttpResponse {
    let envelope = String::from_utf8_lossy(&body);
    match idp.answer_resolve(&envelope) {
        Ok(reply) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], reply).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/xml")],
            SoapEnvelope::fault("Server", &e.to_string()),
        )
            .into_response(),
    }
}

async fn sp_artifact_resolution(State(engine): State<Arc<SsoEngine>>, body: Bytes) -> HttpResponse {
    let envelope = String::from_utf8_lossy(&body);
    match engine.handle_artifact_resolve(&envelope).await {
        Ok(reply) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], reply).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/xml")],
            SsoEngine::soap_fault(&e),
        )
            .into_response(),
    }
}

async fn sp_metadata(State(engine): State<Arc<SsoEngine>>) -> HttpResponse {
    match engine.sp_metadata() {
        Ok(metadata) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/samlmetadata+xml")],
            metadata,
        )
            .into_response(),
        Err(e) => (
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            e.to_string(),
        )
            .into_response(),
    }
}

/// Test environment with a running IdP and SP.
pub struct TestEnv {
    pub idp: Arc<TestIdp>,
    pub engine: Arc<SsoEngine>,
    /// Base URL of the SP's HTTP endpoints.
    pub sp_base_url: String,
    pub client: Client,
    _shutdown: Vec<oneshot::Sender<()>>,
}

impl TestEnv {
    /// Starts an environment with default settings.
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_idp_config(|idp| idp).await
    }

    /// Starts an environment, letting the caller adjust the IdP settings.
    pub async fn with_idp_config(
        adjust: impl FnOnce(IdentityProviderConfig) -> IdentityProviderConfig,
    ) -> anyhow::Result<Self> {
        init_tracing();

        let idp_listener = TcpListener::bind("127.0.0.1:0").await?;
        let idp = Arc::new(TestIdp {
            entity_id: format!("http://{}", idp_listener.local_addr()?),
            signer: XmlSigner::from_pem(IDP_KEY, Some(IDP_CERT))?,
            artifacts: DashMap::new(),
        });
        let idp_router = Router::new()
            .route("/ars", post(idp_artifact_resolution))
            .with_state(idp.clone());
        let idp_shutdown = spawn_server(idp_listener, idp_router);

        let sp_listener = TcpListener::bind("127.0.0.1:0").await?;
        let sp_base_url = format!("http://{}", sp_listener.local_addr()?);
        let sp = ServiceProviderConfig::new(&sp_base_url, format!("{sp_base_url}/acs"))
            .with_slo_url(format!("{sp_base_url}/slo"))
            .with_artifact_resolution_url(format!("{sp_base_url}/ars"))
            .with_credentials(SpCredentials::from_pem(SP_KEY, Some(SP_CERT))?);
        let engine = Arc::new(
            SsoEngine::builder(sp)
                .with_config(EngineConfig::default().with_artifact_resolve_retries(0))
                .with_identity_provider(adjust(IdentityProviderConfig::new(&idp.entity_id).as_default()))
                .with_metadata(Arc::new(MetadataStore::with_entities([idp.descriptor()?])))
                .build()?,
        );
        let sp_router = Router::new()
            .route("/ars", post(sp_artifact_resolution))
            .route("/metadata", get(sp_metadata))
            .with_state(engine.clone());
        let sp_shutdown = spawn_server(sp_listener, sp_router);

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            idp,
            engine,
            sp_base_url,
            client,
            _shutdown: vec![idp_shutdown, sp_shutdown],
        })
    }

    pub fn sp(&self) -> &ServiceProviderConfig {
        self.engine.service_provider()
    }

    /// Runs a Redirect/POST sign-on for `alice` into `session`.
    pub async fn sign_on(&self, session: &MemorySession) -> anyhow::Result<Box<AuthenticatedUser>> {
        let outbound = self.engine.initiate_sso(Some(session), None, None).await?;
        let request = self.idp.read_authn_request(&outbound)?;
        let response = self.idp.answer(self.sp(), &request)?;
        match self
            .engine
            .handle_response(Some(session), &TestIdp::post(&response, None))
            .await?
        {
            SsoOutcome::Authenticated(user) => Ok(user),
            SsoOutcome::Declined { reason, .. } => anyhow::bail!("sign-on declined: {reason}"),
        }
    }
}

/// Starts a server whose artifact resolution endpoint always answers with
/// `status` and `body`.
pub async fn canned_server(status: StatusCode, body: &'static str) -> anyhow::Result<(String, oneshot::Sender<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base_url = format!("http://{}", listener.local_addr()?);
    let router = Router::new().route("/ars", post(move || async move { (status, body) }));
    Ok((base_url, spawn_server(listener, router)))
}
