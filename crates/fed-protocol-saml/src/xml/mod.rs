//! XML helpers shared by the model, signature and metadata code.
//!
//! Parsing uses [`roxmltree`] with DTDs disabled, so entity expansion and
//! external references are rejected before any SAML logic runs. Output is
//! built as strings with [`quick_xml::escape`].

pub mod c14n;

use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use roxmltree::{Document, Node, ParsingOptions};

use crate::error::{SamlError, SamlResult};

pub use c14n::{CanonicalizationAlgorithm, Canonicalizer};

/// Parses an XML document.
///
/// # Errors
///
/// Returns [`SamlError::XmlParse`] for malformed XML or any DTD.
pub fn parse(xml: &str) -> SamlResult<Document<'_>> {
    let options = ParsingOptions {
        allow_dtd: false,
        ..ParsingOptions::default()
    };
    Ok(Document::parse_with_options(xml, options)?)
}

/// Escapes text or attribute content.
#[must_use]
pub fn escape(value: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(value)
}

/// Returns true if `node` is the element `{ns}local`.
#[must_use]
pub fn is_element(node: Node<'_, '_>, ns: &str, local: &str) -> bool {
    node.is_element() && node.tag_name().name() == local && node.tag_name().namespace() == Some(ns)
}

/// First child element `{ns}local`.
#[must_use]
pub fn child<'a, 'i>(node: Node<'a, 'i>, ns: &str, local: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| is_element(*n, ns, local))
}

/// All child elements `{ns}local`.
pub fn children<'a, 'i: 'a>(
    node: Node<'a, 'i>,
    ns: &'a str,
    local: &'a str,
) -> impl Iterator<Item = Node<'a, 'i>> + 'a {
    node.children().filter(move |n| is_element(*n, ns, local))
}

/// All child elements.
pub fn child_elements<'a, 'i: 'a>(node: Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> + 'a {
    node.children().filter(Node::is_element)
}

/// First child element `{ns}local`, or [`SamlError::MissingElement`].
///
/// # Errors
///
/// Returns an error if the child is absent.
pub fn required_child<'a, 'i>(node: Node<'a, 'i>, ns: &str, local: &str) -> SamlResult<Node<'a, 'i>> {
    child(node, ns, local).ok_or_else(|| {
        SamlError::MissingElement(format!("{} in {}", local, node.tag_name().name()))
    })
}

/// Attribute value, or [`SamlError::MissingAttribute`].
///
/// # Errors
///
/// Returns an error if the attribute is absent.
pub fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> SamlResult<&'a str> {
    node.attribute(name).ok_or_else(|| SamlError::MissingAttribute {
        element: node.tag_name().name().to_string(),
        attribute: name.to_string(),
    })
}

/// Concatenated, trimmed text content of the direct text children.
#[must_use]
pub fn text(node: Node<'_, '_>) -> String {
    let raw: String = node
        .children()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect();
    raw.trim().to_string()
}

/// Text content with all whitespace removed, for base64 values.
#[must_use]
pub fn compact_text(node: Node<'_, '_>) -> String {
    node.children()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .flat_map(str::chars)
        .filter(|c| !c.is_ascii_whitespace())
        .collect()
}

/// Parses an `xs:dateTime` value.
///
/// # Errors
///
/// Returns [`SamlError::InvalidTimestamp`] if the value is not RFC 3339.
pub fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SamlError::InvalidTimestamp(value.to_string()))
}

/// Parses an optional `xs:dateTime` attribute.
///
/// # Errors
///
/// Returns an error if the attribute is present but malformed.
pub fn optional_instant(node: Node<'_, '_>, name: &str) -> SamlResult<Option<DateTime<Utc>>> {
    node.attribute(name).map(parse_instant).transpose()
}

/// Formats an instant the way SAML peers expect (`2008-12-31T12:00:00Z`).
#[must_use]
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Returns the element's `ID` (SAML) or `Id` (XML-Enc/DSig) attribute.
#[must_use]
pub fn element_id<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.attribute("ID").or_else(|| node.attribute("Id"))
}

/// Finds the single element carrying `id`.
///
/// # Errors
///
/// Returns [`SamlError::MissingElement`] if no element has the id and
/// [`SamlError::SignatureWrapping`] if more than one does.
pub fn find_by_id<'a, 'i>(doc: &'a Document<'i>, id: &str) -> SamlResult<Node<'a, 'i>> {
    let mut matches = doc
        .descendants()
        .filter(|n| n.is_element() && element_id(*n) == Some(id));
    let first = matches
        .next()
        .ok_or_else(|| SamlError::MissingElement(format!("element with ID {id}")))?;
    if matches.next().is_some() {
        return Err(SamlError::SignatureWrapping(format!("ID {id} occurs more than once")));
    }
    Ok(first)
}

/// Strips a leading byte-order mark and XML declaration.
#[must_use]
pub fn strip_declaration(xml: &str) -> &str {
    let xml = xml.trim_start_matches('\u{feff}').trim_start();
    if xml.starts_with("<?xml") {
        if let Some(end) = xml.find("?>") {
            return xml[end + 2..].trim_start();
        }
    }
    xml
}

/// Returns the raw source text of an element.
///
/// Namespace declarations inherited from ancestors are not part of it.
#[must_use]
pub fn source_text<'i>(node: Node<'_, 'i>) -> &'i str {
    &node.document().input_text()[node.range()]
}

/// Returns the source text of an element with the namespace declarations it
/// inherits from its ancestors added to its start tag, so it parses on its own.
///
/// Canonical forms of the element are unchanged by the added declarations.
#[must_use]
pub fn standalone_text(node: Node<'_, '_>) -> String {
    let text = source_text(node);
    let Some(tag_end) = start_tag_end(text, 0) else {
        return text.to_string();
    };
    let start_tag = &text[..tag_end];
    let name_end = start_tag
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(start_tag.len());

    let mut declarations = String::new();
    for ns in node.namespaces() {
        let attr = match ns.name() {
            Some("xml") => continue,
            Some(prefix) => format!("xmlns:{prefix}"),
            None => "xmlns".to_string(),
        };
        if declares(start_tag, &attr) {
            continue;
        }
        push_attr(&mut declarations, &attr, Some(ns.uri()));
    }
    if declarations.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + declarations.len());
    out.push_str(&text[..name_end]);
    out.push_str(&declarations);
    out.push_str(&text[name_end..]);
    out
}

/// Returns true if `start_tag` carries the attribute `name`.
fn declares(start_tag: &str, name: &str) -> bool {
    start_tag.match_indices(name).any(|(i, _)| {
        let before_ok = start_tag[..i].ends_with(char::is_whitespace);
        let after = start_tag[i + name.len()..].trim_start();
        before_ok && after.starts_with('=')
    })
}

/// Byte offset of the `>` closing the start tag that begins at `start`.
pub(crate) fn start_tag_end(source: &str, start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, b) in source.as_bytes().iter().enumerate().skip(start) {
        match (quote, *b) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(*b),
            (None, b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Returns true if `value` is a well-formed absolute URI.
#[must_use]
pub fn is_absolute_uri(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(char::is_whitespace) && url::Url::parse(value).is_ok()
}

/// Checks an absolute-URI field.
///
/// # Errors
///
/// Returns [`SamlError::InvalidUri`] naming the field.
pub fn require_absolute_uri(field: &str, value: &str) -> SamlResult<()> {
    if is_absolute_uri(value) {
        Ok(())
    } else {
        Err(SamlError::InvalidUri {
            field: field.to_string(),
            value: value.to_string(),
        })
    }
}

/// Appends ` name="value"` to `out` when `value` is present.
pub fn push_attr(out: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape(value));
        out.push('"');
    }
}

/// Appends `<tag>text</tag>` to `out`.
pub fn push_text_element(out: &mut String, tag: &str, value: &str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(&escape(value));
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn standalone_text_carries_inherited_namespaces() {
        let xml = r#"<p:r xmlns:p="urn:p" xmlns:q="urn:q" xmlns="urn:d"><p:a xmlns:q="urn:q"><q:b/><c/></p:a></p:r>"#;
        let doc = parse(xml).unwrap();
        let a = doc.root_element().first_element_child().unwrap();
        let text = standalone_text(a);
        assert_eq!(text.matches("xmlns:q=").count(), 1);
        let inner = parse(&text).unwrap();
        assert_eq!(inner.root_element().tag_name().namespace(), Some("urn:p"));
        let c = inner.root_element().last_element_child().unwrap();
        assert_eq!(c.tag_name().namespace(), Some("urn:d"));
    }

    #[test]
    fn start_tag_end_skips_quoted_gt() {
        let s = r#"<a x="1>2" y='>'>text"#;
        assert_eq!(start_tag_end(s, 0), Some(s.find(">text").unwrap()));
    }

    #[test]
    fn dtd_rejected() {
        let xml = r#"<!DOCTYPE r [<!ENTITY x "boom">]><r>&x;</r>"#;
        assert!(matches!(parse(xml), Err(SamlError::XmlParse(_))));
    }

    #[test]
    fn duplicate_id_is_wrapping() {
        let doc = parse(r#"<r><a ID="x"/><b><a ID="x"/></b></r>"#).unwrap();
        assert!(matches!(find_by_id(&doc, "x"), Err(SamlError::SignatureWrapping(_))));
        assert!(matches!(find_by_id(&doc, "y"), Err(SamlError::MissingElement(_))));
    }

    #[test]
    fn instant_roundtrip() {
        let dt = Utc.with_ymd_and_hms(2008, 12, 31, 12, 0, 0).unwrap();
        assert_eq!(format_instant(dt), "2008-12-31T12:00:00Z");
        assert_eq!(parse_instant("2008-12-31T12:00:00.000Z").unwrap(), dt);
        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn absolute_uris() {
        assert!(is_absolute_uri("https://sp.example.com/acs"));
        assert!(is_absolute_uri("urn:oasis:names:tc:SAML:2.0:nameid-format:entity"));
        assert!(!is_absolute_uri("/relative/path"));
        assert!(!is_absolute_uri("not a uri"));
        assert!(!is_absolute_uri(""));
    }

    #[test]
    fn declaration_stripped() {
        assert_eq!(strip_declaration("\u{feff}<?xml version=\"1.0\"?>\n<r/>"), "<r/>");
        assert_eq!(strip_declaration("<r/>"), "<r/>");
    }

    #[test]
    fn text_helpers() {
        let doc = parse("<r> abc \n</r>").unwrap();
        assert_eq!(text(doc.root_element()), "abc");
        let doc = parse("<r>QUJD\n  REVG</r>").unwrap();
        assert_eq!(compact_text(doc.root_element()), "QUJDREVG");
    }
}
