//! XML fragments carried by contexts: typed dimension values and
//! open context component content.

use crate::ast::QName;
use std::collections::BTreeMap;
use std::fmt;

/// An element with attributes and mixed content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XmlNode {
    pub name: QName,
    pub attributes: BTreeMap<QName, String>,
    pub content: Vec<XmlContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum XmlContent {
    Element(XmlNode),
    Text(String),
}

impl XmlNode {
    pub fn element(name: QName) -> Self {
        Self {
            name,
            attributes: BTreeMap::new(),
            content: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.attributes.insert(name, value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content.push(XmlContent::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.content.push(XmlContent::Element(child));
        self
    }

    pub fn children(&self) -> impl Iterator<Item = &XmlNode> {
        self.content.iter().filter_map(|c| match c {
            XmlContent::Element(e) => Some(e),
            XmlContent::Text(_) => None,
        })
    }

    /// Concatenated text content of this element and its descendants
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for c in &self.content {
            match c {
                XmlContent::Text(t) => out.push_str(t),
                XmlContent::Element(e) => e.collect_text(out),
            }
        }
    }
}

impl fmt::Display for XmlNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (k, v) in &self.attributes {
            write!(f, " {}=\"{}\"", k, v)?;
        }
        if self.content.is_empty() {
            return write!(f, "/>");
        }
        write!(f, ">")?;
        for c in &self.content {
            match c {
                XmlContent::Text(t) => write!(f, "{}", t)?,
                XmlContent::Element(e) => write!(f, "{}", e)?,
            }
        }
        write!(f, "</{}>", self.name)
    }
}

/// Structural correspondence of two fragments, possibly from different documents.
///
/// Element names and attribute sets must be equal and element children must
/// correspond pairwise. Leaf elements compare their whitespace-trimmed text.
pub fn nodes_correspond(a: &XmlNode, b: &XmlNode) -> bool {
    if a.name != b.name || a.attributes != b.attributes {
        return false;
    }
    let a_children: Vec<&XmlNode> = a.children().collect();
    let b_children: Vec<&XmlNode> = b.children().collect();
    if a_children.len() != b_children.len() {
        return false;
    }
    if a_children.is_empty() {
        return a.text().trim() == b.text().trim();
    }
    a_children
        .iter()
        .zip(b_children.iter())
        .all(|(x, y)| nodes_correspond(x, y))
}

/// Pairwise correspondence of two node lists
pub fn node_lists_correspond(a: &[XmlNode], b: &[XmlNode]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| nodes_correspond(x, y))
}
