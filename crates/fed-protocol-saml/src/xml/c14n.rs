//! XML canonicalization (C14N 1.0 and Exclusive C14N 1.0) of a subtree.
//!
//! Only element subtrees are canonicalized: signatures in SAML always
//! reference an element by ID, so whole-document node sets never occur.
//! One node (the enveloped `Signature`) can be excluded from the output.

use std::collections::{BTreeMap, BTreeSet};

use roxmltree::{Node, NodeId};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Canonicalization algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CanonicalizationAlgorithm {
    /// Exclusive C14N without comments.
    #[default]
    Exclusive,
    /// Exclusive C14N with comments.
    ExclusiveWithComments,
    /// Inclusive C14N 1.0 without comments.
    Inclusive,
    /// Inclusive C14N 1.0 with comments.
    InclusiveWithComments,
}

impl CanonicalizationAlgorithm {
    /// Returns the algorithm URI.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Exclusive => "http://www.w3.org/2001/10/xml-exc-c14n#",
            Self::ExclusiveWithComments => "http://www.w3.org/2001/10/xml-exc-c14n#WithComments",
            Self::Inclusive => "http://www.w3.org/TR/2001/REC-xml-c14n-20010315",
            Self::InclusiveWithComments => {
                "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments"
            }
        }
    }

    /// Parses an algorithm URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Self::Exclusive,
            Self::ExclusiveWithComments,
            Self::Inclusive,
            Self::InclusiveWithComments,
        ]
        .into_iter()
        .find(|a| a.uri() == uri)
    }

    /// Returns true for the exclusive variants.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }

    /// Returns true for the `#WithComments` variants.
    #[must_use]
    pub const fn with_comments(self) -> bool {
        matches!(self, Self::ExclusiveWithComments | Self::InclusiveWithComments)
    }
}

/// Canonicalizes element subtrees.
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    algorithm: CanonicalizationAlgorithm,
    inclusive_prefixes: Vec<String>,
    exclude: Option<NodeId>,
    comments: bool,
}

impl Canonicalizer {
    /// Creates a canonicalizer for `algorithm`.
    #[must_use]
    pub fn new(algorithm: CanonicalizationAlgorithm) -> Self {
        Self {
            algorithm,
            inclusive_prefixes: Vec::new(),
            exclude: None,
            comments: algorithm.with_comments(),
        }
    }

    /// Sets the `InclusiveNamespaces PrefixList` (exclusive mode only).
    /// `#default` names the default namespace.
    #[must_use]
    pub fn with_inclusive_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.inclusive_prefixes = prefixes;
        self
    }

    /// Omits `node` and its subtree (the enveloped-signature transform).
    #[must_use]
    pub fn excluding(mut self, node: NodeId) -> Self {
        self.exclude = Some(node);
        self
    }

    /// Drops comments regardless of the algorithm. Same-document references
    /// (`URI="#id"`) always do this.
    #[must_use]
    pub fn without_comments(mut self) -> Self {
        self.comments = false;
        self
    }

    /// Canonicalizes `node` and its descendants.
    #[must_use]
    pub fn canonicalize(&self, node: Node<'_, '_>) -> String {
        let mut out = String::new();
        self.element(node, &BTreeMap::new(), true, &mut out);
        out
    }

    fn element(&self, node: Node<'_, '_>, rendered: &BTreeMap<String, String>, apex: bool, out: &mut String) {
        let scope = in_scope_namespaces(node);
        let decls = if self.algorithm.is_exclusive() {
            self.exclusive_decls(node, &scope, rendered)
        } else {
            inclusive_decls(&scope, rendered)
        };

        let mut attrs: Vec<(String, String, String, String)> = node
            .attributes()
            .map(|a| {
                let ns = a.namespace().unwrap_or("").to_string();
                let qname = match a.namespace() {
                    Some(uri) => format!("{}:{}", attribute_prefix(&scope, uri), a.name()),
                    None => a.name().to_string(),
                };
                (ns, a.name().to_string(), qname, a.value().to_string())
            })
            .collect();
        if apex && !self.algorithm.is_exclusive() {
            inherit_xml_attributes(node, &mut attrs);
        }
        attrs.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let qname = element_qname(node);
        out.push('<');
        out.push_str(qname);
        for (prefix, uri) in &decls {
            if prefix.is_empty() {
                out.push_str(" xmlns=\"");
            } else {
                out.push_str(" xmlns:");
                out.push_str(prefix);
                out.push_str("=\"");
            }
            out.push_str(&escape_attr(uri));
            out.push('"');
        }
        for (_, _, name, value) in &attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push('>');

        let mut child_rendered = rendered.clone();
        for (prefix, uri) in decls {
            child_rendered.insert(prefix, uri);
        }

        for child in node.children() {
            if Some(child.id()) == self.exclude {
                continue;
            }
            if child.is_element() {
                self.element(child, &child_rendered, false, out);
            } else if child.is_text() {
                out.push_str(&escape_text(child.text().unwrap_or("")));
            } else if child.is_comment() {
                if self.comments {
                    out.push_str("<!--");
                    out.push_str(child.text().unwrap_or(""));
                    out.push_str("-->");
                }
            } else if let Some(pi) = child.pi() {
                out.push_str("<?");
                out.push_str(pi.target);
                if let Some(value) = pi.value {
                    out.push(' ');
                    out.push_str(&value.replace('\r', "&#xD;"));
                }
                out.push_str("?>");
            }
        }

        out.push_str("</");
        out.push_str(qname);
        out.push('>');
    }

    fn exclusive_decls(
        &self,
        node: Node<'_, '_>,
        scope: &BTreeMap<String, String>,
        rendered: &BTreeMap<String, String>,
    ) -> Vec<(String, String)> {
        let mut used = BTreeSet::new();
        used.insert(element_prefix(node).to_string());
        for attr in node.attributes() {
            if let Some(uri) = attr.namespace() {
                if uri != XML_NS {
                    used.insert(attribute_prefix(scope, uri).to_string());
                }
            }
        }
        for prefix in &self.inclusive_prefixes {
            let prefix = if prefix == "#default" { "" } else { prefix.as_str() };
            if scope.contains_key(prefix) {
                used.insert(prefix.to_string());
            }
        }

        used.into_iter()
            .filter_map(|prefix| {
                let uri = scope.get(&prefix).cloned().unwrap_or_default();
                needs_decl(&prefix, &uri, rendered).then_some((prefix, uri))
            })
            .collect()
    }
}

fn inclusive_decls(scope: &BTreeMap<String, String>, rendered: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut decls: Vec<(String, String)> = scope
        .iter()
        .filter(|(prefix, uri)| needs_decl(prefix, uri, rendered))
        .map(|(p, u)| (p.clone(), u.clone()))
        .collect();
    if !scope.contains_key("") && needs_decl("", "", rendered) {
        decls.insert(0, (String::new(), String::new()));
    }
    decls
}

fn needs_decl(prefix: &str, uri: &str, rendered: &BTreeMap<String, String>) -> bool {
    let current = rendered.get(prefix).map(String::as_str);
    if prefix.is_empty() && uri.is_empty() {
        // xmlns="" only undoes a rendered non-empty default
        return current.is_some_and(|c| !c.is_empty());
    }
    current != Some(uri)
}

fn in_scope_namespaces(node: Node<'_, '_>) -> BTreeMap<String, String> {
    node.namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .map(|ns| (ns.name().unwrap_or("").to_string(), ns.uri().to_string()))
        .collect()
}

fn attribute_prefix<'s>(scope: &'s BTreeMap<String, String>, uri: &str) -> &'s str {
    if uri == XML_NS {
        return "xml";
    }
    scope
        .iter()
        .find(|(prefix, u)| !prefix.is_empty() && u.as_str() == uri)
        .map_or("", |(prefix, _)| prefix.as_str())
}

fn element_qname<'i>(node: Node<'_, 'i>) -> &'i str {
    let raw = super::source_text(node);
    let raw = raw.strip_prefix('<').unwrap_or(raw);
    let end = raw
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(raw.len());
    &raw[..end]
}

fn element_prefix<'i>(node: Node<'_, 'i>) -> &'i str {
    element_qname(node).split_once(':').map_or("", |(prefix, _)| prefix)
}

fn inherit_xml_attributes(node: Node<'_, '_>, attrs: &mut Vec<(String, String, String, String)>) {
    for ancestor in node.ancestors().skip(1).filter(Node::is_element) {
        for attr in ancestor.attributes().filter(|a| a.namespace() == Some(XML_NS)) {
            if !attrs.iter().any(|(ns, local, _, _)| ns == XML_NS && local == attr.name()) {
                attrs.push((
                    XML_NS.to_string(),
                    attr.name().to_string(),
                    format!("xml:{}", attr.name()),
                    attr.value().to_string(),
                ));
            }
        }
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse;

    fn exc(xml: &str) -> String {
        let doc = parse(xml).unwrap();
        let target = doc.descendants().find(|n| n.has_tag_name("target")).unwrap();
        Canonicalizer::new(CanonicalizationAlgorithm::Exclusive).canonicalize(target)
    }

    fn inc(xml: &str) -> String {
        let doc = parse(xml).unwrap();
        let target = doc.descendants().find(|n| n.has_tag_name("target")).unwrap();
        Canonicalizer::new(CanonicalizationAlgorithm::Inclusive).canonicalize(target)
    }

    #[test]
    fn exclusive_renders_only_used_namespaces() {
        let xml = r#"<a:root xmlns:a="urn:a" xmlns:b="urn:b" xmlns:c="urn:c"><a:target b:attr="1" z="2" a="3"/></a:root>"#;
        assert_eq!(
            exc(xml),
            r#"<a:target xmlns:a="urn:a" xmlns:b="urn:b" a="3" z="2" b:attr="1"></a:target>"#
        );
    }

    #[test]
    fn inclusive_renders_all_in_scope_namespaces() {
        let xml = r#"<a:root xmlns:a="urn:a" xmlns:c="urn:c"><a:target/></a:root>"#;
        assert_eq!(inc(xml), r#"<a:target xmlns:a="urn:a" xmlns:c="urn:c"></a:target>"#);
    }

    #[test]
    fn inclusive_prefix_list_forces_declaration() {
        let doc = parse(r#"<a:root xmlns:a="urn:a" xmlns:xs="urn:xs"><a:target/></a:root>"#).unwrap();
        let target = doc.descendants().find(|n| n.has_tag_name("target")).unwrap();
        let out = Canonicalizer::new(CanonicalizationAlgorithm::Exclusive)
            .with_inclusive_prefixes(vec!["xs".to_string()])
            .canonicalize(target);
        assert_eq!(out, r#"<a:target xmlns:a="urn:a" xmlns:xs="urn:xs"></a:target>"#);
    }

    #[test]
    fn nested_declarations_not_repeated() {
        let xml = r#"<r xmlns:a="urn:a"><a:target><a:child a:x="1">t</a:child></a:target></r>"#;
        assert_eq!(
            exc(xml),
            r#"<a:target xmlns:a="urn:a"><a:child a:x="1">t</a:child></a:target>"#
        );
    }

    #[test]
    fn default_namespace_undeclared() {
        let xml = r#"<target xmlns="urn:x"><c xmlns=""><d/></c></target>"#;
        assert_eq!(exc(xml), r#"<target xmlns="urn:x"><c xmlns=""><d></d></c></target>"#);
    }

    #[test]
    fn text_and_attribute_escaping() {
        let xml = "<target v=\"a&amp;&lt;&quot;\">x &amp; y &lt; z &gt; w</target>";
        assert_eq!(exc(xml), "<target v=\"a&amp;&lt;&quot;\">x &amp; y &lt; z &gt; w</target>");
    }

    #[test]
    fn comments_dropped_and_node_excluded() {
        let doc = parse("<target><!-- c --><skip/><keep/></target>").unwrap();
        let root = doc.root_element();
        let skip = root.children().find(|n| n.has_tag_name("skip")).unwrap();
        let out = Canonicalizer::new(CanonicalizationAlgorithm::Exclusive)
            .excluding(skip.id())
            .canonicalize(root);
        assert_eq!(out, "<target><keep></keep></target>");

        let out = Canonicalizer::new(CanonicalizationAlgorithm::ExclusiveWithComments).canonicalize(root);
        assert_eq!(out, "<target><!-- c --><skip></skip><keep></keep></target>");
    }

    #[test]
    fn algorithm_uri_roundtrip() {
        for alg in [
            CanonicalizationAlgorithm::Exclusive,
            CanonicalizationAlgorithm::ExclusiveWithComments,
            CanonicalizationAlgorithm::Inclusive,
            CanonicalizationAlgorithm::InclusiveWithComments,
        ] {
            assert_eq!(CanonicalizationAlgorithm::from_uri(alg.uri()), Some(alg));
        }
    }
}
