//! HTTP-POST Binding implementation.
//!
//! Implements the SAML 2.0 HTTP-POST binding for sending SAML messages
//! via HTML form POST. The message is base64-encoded without compression;
//! signing happens on the XML document before it reaches this codec.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{DecodedMessage, SamlMessageType, RELAY_STATE_PARAM};
use crate::error::{SamlError, SamlResult};

/// HTTP-POST binding encoder/decoder.
pub struct HttpPostBinding;

impl HttpPostBinding {
    /// Encodes a SAML request for HTTP-POST binding.
    ///
    /// Returns an HTML form that will auto-submit to the destination.
    #[must_use]
    pub fn encode_request(xml: &str, destination: &str, relay_state: Option<&str>) -> String {
        Self::encode(xml, destination, relay_state, SamlMessageType::Request)
    }

    /// Encodes a SAML response for HTTP-POST binding.
    ///
    /// Returns an HTML form that will auto-submit to the destination.
    #[must_use]
    pub fn encode_response(xml: &str, destination: &str, relay_state: Option<&str>) -> String {
        Self::encode(xml, destination, relay_state, SamlMessageType::Response)
    }

    /// Encodes a SAML message for HTTP-POST binding.
    ///
    /// Without script the page shows a submit button instead.
    #[must_use]
    pub fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> String {
        let encoded = STANDARD.encode(xml);
        let param_name = message_type.form_param();

        let relay_state_input = relay_state
            .map(|rs| {
                format!(
                    r#"<input type="hidden" name="{RELAY_STATE_PARAM}" value="{}"/>"#,
                    html_escape(rs)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>SAML POST Binding</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="post" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
            html_escape(destination),
            param_name,
            encoded,
            relay_state_input
        )
    }

    /// Decodes a SAML message from already-parsed form fields.
    ///
    /// # Arguments
    ///
    /// * `saml_request` - The SAMLRequest parameter value (if present)
    /// * `saml_response` - The SAMLResponse parameter value (if present)
    /// * `relay_state` - The RelayState parameter value (if present)
    ///
    /// # Errors
    ///
    /// Returns an error unless exactly one message parameter is present and
    /// it holds base64-encoded UTF-8.
    pub fn decode(
        saml_request: Option<&str>,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
    ) -> SamlResult<DecodedMessage> {
        let (encoded, message_type) = match (saml_request, saml_response) {
            (Some(req), None) => (req, SamlMessageType::Request),
            (None, Some(resp)) => (resp, SamlMessageType::Response),
            (Some(_), Some(_)) => {
                return Err(SamlError::InvalidRequest(
                    "both SAMLRequest and SAMLResponse present".to_string(),
                ))
            }
            (None, None) => {
                return Err(SamlError::InvalidRequest(
                    "No SAMLRequest or SAMLResponse parameter".to_string(),
                ))
            }
        };

        // Some senders wrap the base64 text at 76 columns.
        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let decoded = STANDARD.decode(compact)?;

        let xml = String::from_utf8(decoded)
            .map_err(|e| SamlError::InvalidRequest(format!("Invalid UTF-8 in message: {e}")))?;

        Ok(DecodedMessage {
            xml,
            message_type,
            relay_state: relay_state.map(String::from),
        })
    }

    /// Decodes an `application/x-www-form-urlencoded` request body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body carries no decodable SAML message.
    pub fn decode_form(body: &[u8]) -> SamlResult<DecodedMessage> {
        let mut request = None;
        let mut response = None;
        let mut relay_state = None;
        for (name, value) in url::form_urlencoded::parse(body) {
            match name.as_ref() {
                "SAMLRequest" => request = Some(value.into_owned()),
                "SAMLResponse" => response = Some(value.into_owned()),
                RELAY_STATE_PARAM => relay_state = Some(value.into_owned()),
                _ => {}
            }
        }
        Self::decode(request.as_deref(), response.as_deref(), relay_state.as_deref())
    }
}

/// Escapes HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'a>(html: &'a str, name: &str) -> &'a str {
        let marker = format!("name=\"{name}\" value=\"");
        let start = html.find(&marker).unwrap() + marker.len();
        let end = html[start..].find('"').unwrap();
        &html[start..start + end]
    }

    #[test]
    fn encode_and_decode_request() {
        let xml = r#"<samlp:AuthnRequest>tést &amp; more</samlp:AuthnRequest>"#;
        let html = HttpPostBinding::encode_request(xml, "https://idp.example.com", Some("state123"));

        assert!(html.contains(r#"action="https://idp.example.com""#));
        assert!(html.contains("<noscript>"));

        let encoded = field(&html, "SAMLRequest");
        let decoded = HttpPostBinding::decode(Some(encoded), None, Some(field(&html, "RelayState"))).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.message_type, SamlMessageType::Request);
        assert_eq!(decoded.relay_state.as_deref(), Some("state123"));
    }

    #[test]
    fn encode_and_decode_response() {
        let xml = r#"<samlp:Response>test</samlp:Response>"#;
        let html = HttpPostBinding::encode_response(xml, "https://sp.example.com", None);

        assert!(!html.contains("RelayState"));
        let decoded = HttpPostBinding::decode(None, Some(field(&html, "SAMLResponse")), None).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.message_type, SamlMessageType::Response);
    }

    #[test]
    fn decode_form_body() {
        let encoded = STANDARD.encode("<samlp:Response/>");
        let body = format!(
            "SAMLResponse={}&RelayState=a+b%26c",
            urlencoding::encode(&encoded)
        );
        let decoded = HttpPostBinding::decode_form(body.as_bytes()).unwrap();
        assert_eq!(decoded.xml, "<samlp:Response/>");
        assert_eq!(decoded.relay_state.as_deref(), Some("a b&c"));
    }

    #[test]
    fn wrapped_base64_accepted() {
        let encoded = STANDARD.encode("<samlp:Response>some longer content</samlp:Response>");
        let wrapped = format!("{}\r\n{}", &encoded[..20], &encoded[20..]);
        let decoded = HttpPostBinding::decode(None, Some(&wrapped), None).unwrap();
        assert_eq!(decoded.xml, "<samlp:Response>some longer content</samlp:Response>");
    }

    #[test]
    fn decode_missing_or_ambiguous_message() {
        assert!(HttpPostBinding::decode(None, None, None).is_err());
        assert!(HttpPostBinding::decode(Some("PGEvPg=="), Some("PGEvPg=="), None).is_err());
        assert!(matches!(
            HttpPostBinding::decode(Some("!!!"), None, None),
            Err(SamlError::Base64Decode(_))
        ));
    }

    #[test]
    fn relay_state_is_escaped() {
        let html = HttpPostBinding::encode_request("<a/>", "https://idp/?a=1&b=2", Some(r#""><script>"#));
        assert!(html.contains("https://idp/?a=1&amp;b=2"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn html_escape_special_chars() {
        let input = r#"<script>alert("xss")</script>"#;
        let escaped = html_escape(input);
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
        assert!(!escaped.contains('"'));
    }
}
