//! Protocol status.

use roxmltree::Node;
use serde::{Deserialize, Serialize};

use super::{status_codes, sub_status_codes, SAMLP_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml;

/// `samlp:Status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The (possibly nested) status code.
    pub status_code: StatusCode,

    /// Optional status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Status {
    /// Creates a success status.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status_code: StatusCode::success(),
            status_message: None,
        }
    }

    /// Creates a status from a top-level code and optional sub-code.
    #[must_use]
    pub fn from_codes(code: &str, sub_code: Option<&str>) -> Self {
        let mut status_code = StatusCode::new(code);
        if let Some(sub) = sub_code {
            status_code = status_code.with_sub_status(StatusCode::new(sub));
        }
        Self {
            status_code,
            status_message: None,
        }
    }

    /// Creates a requester error status.
    #[must_use]
    pub fn requester_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::new(status_codes::REQUESTER),
            status_message: Some(message.into()),
        }
    }

    /// Creates a responder error status.
    #[must_use]
    pub fn responder_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::new(status_codes::RESPONDER),
            status_message: Some(message.into()),
        }
    }

    /// Returns true if the top-level code is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.is_success()
    }

    /// Sets the status message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    /// Converts a non-success status into the matching error.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::PassiveDeclined`] for the NoPassive sub-status and
    /// [`SamlError::StatusNotSuccess`] for every other failure.
    pub fn ensure_success(&self) -> SamlResult<()> {
        if self.is_success() {
            return Ok(());
        }
        let sub_code = self.status_code.sub_status_value();
        if sub_code == Some(sub_status_codes::NO_PASSIVE) {
            return Err(SamlError::PassiveDeclined);
        }
        Err(SamlError::StatusNotSuccess {
            code: self.status_code.value.clone(),
            sub_code: sub_code.map(String::from),
            message: self.status_message.clone(),
        })
    }

    /// Parses a `samlp:Status` element.
    ///
    /// # Errors
    ///
    /// Returns an error if `StatusCode` or its `Value` is missing.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        let code = xml::required_child(node, SAMLP_NS, "StatusCode")?;
        Ok(Self {
            status_code: StatusCode::from_node(code)?,
            status_message: xml::child(node, SAMLP_NS, "StatusMessage").map(xml::text),
        })
    }

    /// Writes `<samlp:Status>`.
    pub fn write_xml(&self, out: &mut String) {
        out.push_str("<samlp:Status>");
        self.status_code.write_xml(out);
        if let Some(message) = &self.status_message {
            xml::push_text_element(out, "samlp:StatusMessage", message);
        }
        out.push_str("</samlp:Status>");
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

/// `samlp:StatusCode`, optionally nested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    /// Status code URI.
    pub value: String,

    /// Nested status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<Box<StatusCode>>,
}

impl StatusCode {
    /// Creates a status code.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status_code: None,
        }
    }

    /// Creates a success status code.
    #[must_use]
    pub fn success() -> Self {
        Self::new(status_codes::SUCCESS)
    }

    /// Adds a sub-status code.
    #[must_use]
    pub fn with_sub_status(mut self, sub: StatusCode) -> Self {
        self.status_code = Some(Box::new(sub));
        self
    }

    /// Returns true for Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.value == status_codes::SUCCESS
    }

    /// Returns the second-level code, if present.
    #[must_use]
    pub fn sub_status_value(&self) -> Option<&str> {
        self.status_code.as_ref().map(|s| s.value.as_str())
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        let value = xml::required_attr(node, "Value")?.to_string();
        let nested = match xml::child(node, SAMLP_NS, "StatusCode") {
            Some(child) => Some(Box::new(Self::from_node(child)?)),
            None => None,
        };
        Ok(Self {
            value,
            status_code: nested,
        })
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<samlp:StatusCode");
        xml::push_attr(out, "Value", Some(&self.value));
        match &self.status_code {
            Some(sub) => {
                out.push('>');
                sub.write_xml(out);
                out.push_str("</samlp:StatusCode>");
            }
            None => out.push_str("/>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(status: &Status) -> Status {
        let mut out = format!("<w xmlns:samlp=\"{SAMLP_NS}\">");
        status.write_xml(&mut out);
        out.push_str("</w>");
        let doc = xml::parse(&out).unwrap();
        let node = xml::child(doc.root_element(), SAMLP_NS, "Status").unwrap();
        Status::from_node(node).unwrap()
    }

    #[test]
    fn success_roundtrip() {
        let status = Status::success();
        assert_eq!(roundtrip(&status), status);
        assert!(status.ensure_success().is_ok());
    }

    #[test]
    fn nested_roundtrip() {
        let status = Status::from_codes(status_codes::RESPONDER, Some(sub_status_codes::AUTHN_FAILED))
            .with_message("bad password");
        assert_eq!(roundtrip(&status), status);
    }

    #[test]
    fn no_passive_is_distinct() {
        let status = Status::from_codes(status_codes::RESPONDER, Some(sub_status_codes::NO_PASSIVE));
        assert!(matches!(status.ensure_success(), Err(SamlError::PassiveDeclined)));

        let status = Status::requester_error("nope");
        match status.ensure_success() {
            Err(SamlError::StatusNotSuccess { code, message, .. }) => {
                assert_eq!(code, status_codes::REQUESTER);
                assert_eq!(message.as_deref(), Some("nope"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_value_rejected() {
        let xml = format!(r#"<samlp:Status xmlns:samlp="{SAMLP_NS}"><samlp:StatusCode/></samlp:Status>"#);
        let doc = xml::parse(&xml).unwrap();
        assert!(matches!(
            Status::from_node(doc.root_element()),
            Err(SamlError::MissingAttribute { .. })
        ));
    }
}
