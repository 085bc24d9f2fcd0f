//! SOAP 1.1 back channel used for artifact resolution.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{SamlError, SamlResult};
use crate::types::SOAP11_NS;
use crate::xml;

/// Header whose presence marks a SOAP request. Its value may be empty.
pub const SOAP_ACTION_HEADER: &str = "SOAPAction";

/// Content type of SOAP 1.1 messages.
pub const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// SOAP 1.1 envelope helpers.
pub struct SoapEnvelope;

impl SoapEnvelope {
    /// Wraps a message in an envelope body.
    #[must_use]
    pub fn wrap(body: &str) -> String {
        let body = xml::strip_declaration(body);
        let mut out = String::with_capacity(body.len() + 160);
        out.push_str("<soap11:Envelope xmlns:soap11=\"");
        out.push_str(SOAP11_NS);
        out.push_str("\"><soap11:Body>");
        out.push_str(body);
        out.push_str("</soap11:Body></soap11:Envelope>");
        out
    }

    /// Builds an envelope holding a SOAP fault.
    #[must_use]
    pub fn fault(code: &str, message: &str) -> String {
        let mut out = String::with_capacity(256);
        out.push_str("<soap11:Fault>");
        xml::push_text_element(&mut out, "faultcode", &format!("soap11:{code}"));
        xml::push_text_element(&mut out, "faultstring", message);
        out.push_str("</soap11:Fault>");
        Self::wrap(&out)
    }

    /// Returns the single body element as a standalone document.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope is malformed, the body is empty, or
    /// it holds a SOAP fault.
    pub fn unwrap(envelope: &str) -> SamlResult<String> {
        let doc = xml::parse(envelope)?;
        let root = doc.root_element();
        if !xml::is_element(root, SOAP11_NS, "Envelope") {
            return Err(SamlError::InvalidRequest(format!(
                "expected soap11:Envelope, found {}",
                root.tag_name().name()
            )));
        }
        let body = xml::required_child(root, SOAP11_NS, "Body")?;
        let payload = xml::child_elements(body)
            .next()
            .ok_or_else(|| SamlError::MissingElement("SOAP Body content".to_string()))?;
        if xml::is_element(payload, SOAP11_NS, "Fault") {
            let reason = xml::child_elements(payload)
                .find(|n| n.tag_name().name() == "faultstring")
                .map(xml::text)
                .unwrap_or_default();
            return Err(SamlError::InvalidResponse(format!("SOAP fault: {reason}")));
        }
        Ok(xml::standalone_text(payload))
    }
}

/// Sends a SAML request over the SOAP back channel and returns the SAML
/// message from the reply body.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    /// Posts `request` to `endpoint`.
    async fn send(&self, endpoint: &str, request: &str) -> SamlResult<String>;
}

/// HTTP SOAP client.
#[derive(Debug, Clone)]
pub struct SoapClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl SoapClient {
    /// Creates a client with the given per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> SamlResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SamlError::Transport(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// Uses a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post(&self, endpoint: &str, envelope: String) -> SamlResult<String> {
        let response = self
            .client
            .post(endpoint)
            .header(SOAP_ACTION_HEADER, "")
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope)
            .send()
            .await
            .map_err(|e| SamlError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SamlError::Transport(e.to_string()))?;
        // Faults arrive with status 500 and are reported from the envelope.
        if !status.is_success() && !body.contains("Envelope") {
            return Err(SamlError::Transport(format!("HTTP {} from {endpoint}", status.as_u16())));
        }
        Ok(body)
    }
}

#[async_trait]
impl ArtifactResolver for SoapClient {
    async fn send(&self, endpoint: &str, request: &str) -> SamlResult<String> {
        debug!(endpoint = %endpoint, "sending SOAP request");
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let body = tokio::time::timeout(self.timeout, self.post(endpoint, SoapEnvelope::wrap(request)))
            .await
            .map_err(|_| SamlError::Timeout(timeout_ms))??;
        SoapEnvelope::unwrap(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SAMLP_NS, SAML_NS};

    #[test]
    fn wrap_and_unwrap() {
        let message = format!(
            r#"<?xml version="1.0"?><samlp:ArtifactResolve xmlns:samlp="{SAMLP_NS}" ID="a"><samlp:Artifact>x</samlp:Artifact></samlp:ArtifactResolve>"#
        );
        let envelope = SoapEnvelope::wrap(&message);
        assert!(!envelope.contains("<?xml"));
        let inner = SoapEnvelope::unwrap(&envelope).unwrap();
        let doc = xml::parse(&inner).unwrap();
        assert!(xml::is_element(doc.root_element(), SAMLP_NS, "ArtifactResolve"));
        assert_eq!(xml::element_id(doc.root_element()), Some("a"));
    }

    #[test]
    fn unwrap_adds_envelope_namespaces() {
        let envelope = format!(
            r#"<s:Envelope xmlns:s="{SOAP11_NS}" xmlns:saml="{SAML_NS}"><s:Body><saml:Issuer>x</saml:Issuer></s:Body></s:Envelope>"#
        );
        let inner = SoapEnvelope::unwrap(&envelope).unwrap();
        let doc = xml::parse(&inner).unwrap();
        assert_eq!(doc.root_element().tag_name().namespace(), Some(SAML_NS));
    }

    #[test]
    fn fault_is_reported() {
        let envelope = SoapEnvelope::fault("Server", "artifact unknown");
        xml::parse(&envelope).unwrap();
        let err = SoapEnvelope::unwrap(&envelope).unwrap_err();
        assert!(err.to_string().contains("artifact unknown"));
    }

    #[test]
    fn non_envelope_rejected() {
        assert!(SoapEnvelope::unwrap("<a/>").is_err());
        let empty = format!(r#"<s:Envelope xmlns:s="{SOAP11_NS}"><s:Body/></s:Envelope>"#);
        assert!(matches!(SoapEnvelope::unwrap(&empty), Err(SamlError::MissingElement(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let client = SoapClient::new(Duration::from_secs(2)).unwrap();
        let err = client.send("http://127.0.0.1:9/soap", "<a/>").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
