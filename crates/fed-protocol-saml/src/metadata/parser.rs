//! Metadata document parsing.
//!
//! Documents arrive as bytes. The text is decoded by an ordered list of
//! attempts: the declared encoding (UTF-8 when undeclared) first, then the
//! other supported one. A later attempt runs when decoding, parsing or
//! signature verification fails under an earlier one, which covers documents
//! that were re-encoded after signing.

use roxmltree::Node;
use tracing::{debug, warn};

use super::EntityDescriptor;
use crate::error::{SamlError, SamlResult};
use crate::signature::{self, XmlSignatureValidator};
use crate::types::MD_NS;
use crate::xml;

/// Text encodings accepted for metadata documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8 (and its ASCII subset).
    Utf8,
    /// ISO-8859-1.
    Latin1,
}

impl TextEncoding {
    /// Maps an XML `encoding` label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "us-ascii" | "ascii" => Some(Self::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" => Some(Self::Latin1),
            _ => None,
        }
    }

    /// Decodes `bytes`, or returns `None` if they are not valid in this encoding.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => {
                let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                std::str::from_utf8(bytes).ok().map(String::from)
            }
            Self::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }

    const fn other(self) -> Self {
        match self {
            Self::Utf8 => Self::Latin1,
            Self::Latin1 => Self::Utf8,
        }
    }
}

/// Returns the encodings to try, in order.
///
/// # Errors
///
/// Returns [`SamlError::UnknownEncoding`] when the declaration names an
/// encoding that is not supported.
pub fn encoding_attempts(bytes: &[u8]) -> SamlResult<[TextEncoding; 2]> {
    let first = match declared_encoding(bytes) {
        None => TextEncoding::Utf8,
        Some(label) => TextEncoding::from_label(&label).ok_or(SamlError::UnknownEncoding(label))?,
    };
    Ok([first, first.other()])
}

/// Reads the `encoding` pseudo-attribute of the XML declaration.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    let head = bytes.strip_prefix(b"<?xml")?;
    let end = head.windows(2).position(|w| w == b"?>")?;
    let declaration = std::str::from_utf8(&head[..end]).ok()?;
    let rest = &declaration[declaration.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &rest[1..];
    Some(value[..value.find(quote)?].to_string())
}

/// Parses metadata documents, optionally requiring a valid signature.
#[derive(Debug, Clone, Default)]
pub struct MetadataParser {
    validator: Option<XmlSignatureValidator>,
    require_signature: bool,
}

impl MetadataParser {
    /// Creates a parser that accepts unsigned documents and does not check
    /// signatures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies root signatures with `validator`.
    #[must_use]
    pub fn with_validator(mut self, validator: XmlSignatureValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Rejects documents whose root element is unsigned.
    #[must_use]
    pub const fn require_signature(mut self, required: bool) -> Self {
        self.require_signature = required;
        self
    }

    /// Parses an `EntityDescriptor` or `EntitiesDescriptor` document.
    ///
    /// # Errors
    ///
    /// Returns the error of the first attempt when no encoding attempt
    /// yields a verified, well-formed document.
    pub fn parse(&self, bytes: &[u8]) -> SamlResult<Vec<EntityDescriptor>> {
        let mut first_error = None;
        for encoding in encoding_attempts(bytes)? {
            let Some(text) = encoding.decode(bytes) else {
                debug!(?encoding, "metadata is not valid in this encoding");
                continue;
            };
            match self.parse_text(xml::strip_declaration(&text)) {
                Ok(entities) => {
                    debug!(?encoding, entities = entities.len(), "parsed metadata");
                    return Ok(entities);
                }
                Err(err) => {
                    debug!(?encoding, error = %err, "metadata attempt failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        let err = first_error.unwrap_or_else(|| SamlError::InvalidMetadata("undecodable document".to_string()));
        warn!(error = %err, category = %err.category(), "rejected metadata document");
        Err(err)
    }

    fn parse_text(&self, text: &str) -> SamlResult<Vec<EntityDescriptor>> {
        let doc = xml::parse(text)?;
        let root = doc.root_element();
        if signature::is_signed(root) {
            if let Some(validator) = &self.validator {
                validator.verify_element(&doc, root)?;
            }
        } else if self.require_signature {
            return Err(SamlError::SignatureMissing("metadata document is not signed".to_string()));
        }

        let mut entities = Vec::new();
        collect_entities(root, &mut entities)?;
        Ok(entities)
    }
}

fn collect_entities(node: Node<'_, '_>, out: &mut Vec<EntityDescriptor>) -> SamlResult<()> {
    if xml::is_element(node, MD_NS, "EntityDescriptor") {
        out.push(EntityDescriptor::from_node(node)?);
        return Ok(());
    }
    if !xml::is_element(node, MD_NS, "EntitiesDescriptor") {
        return Err(SamlError::InvalidMetadata(format!(
            "unexpected element {}",
            node.tag_name().name()
        )));
    }
    for child in xml::child_elements(node) {
        if xml::is_element(child, MD_NS, "EntityDescriptor") || xml::is_element(child, MD_NS, "EntitiesDescriptor") {
            collect_entities(child, out)?;
        }
    }
    Ok(())
}
