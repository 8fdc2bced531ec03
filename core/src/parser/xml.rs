//! Namespace-aware XML document model with source lines

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::fmt;

use crate::tag::registry::ns;

#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub ns: Option<String>,
    pub local: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text { text: String, line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub ns: Option<String>,
    pub local: String,
    pub attrs: Vec<Attr>,
    pub children: Vec<Node>,
    pub line: usize,
}

impl Element {
    pub fn new(ns: Option<&str>, local: &str, line: usize) -> Self {
        Self {
            ns: ns.map(str::to_string),
            local: local.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
            line,
        }
    }

    /// Synthetic data element holding `text`
    pub fn data(local: &str, line: usize, text: &str) -> Self {
        let mut el = Self::new(Some(ns::DATA), local, line);
        el.children.push(Node::Text {
            text: text.to_string(),
            line,
        });
        el
    }

    /// Unqualified attribute value
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.ns.is_none() && a.local == local)
            .map(|a| a.value.as_str())
    }

    /// Attribute value in namespace `namespace`
    pub fn attr_ns(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.ns.as_deref() == Some(namespace) && a.local == local)
            .map(|a| a.value.as_str())
    }

    /// Concatenated text children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text { text, .. } => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(el) => Some(el),
            Node::Text { .. } => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(el) => Some(el),
            Node::Text { .. } => None,
        })
    }

    /// Replace every non-blank text child by an element built from it
    pub fn map_text(&mut self, mut make: impl FnMut(&str, usize) -> Element) {
        let children = std::mem::take(&mut self.children);
        self.children = children
            .into_iter()
            .filter_map(|node| match node {
                Node::Text { text, .. } if text.trim().is_empty() => None,
                Node::Text { text, line } => Some(Node::Element(make(&text, line))),
                other => Some(other),
            })
            .collect();
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for XmlError {}

/// Tracks the line number of byte offsets visited in increasing order
struct LineCounter<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn line_at(&mut self, offset: usize) -> usize {
        let offset = offset.min(self.text.len());
        if offset > self.pos {
            self.line += self.text.as_bytes()[self.pos..offset]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            self.pos = offset;
        }
        self.line
    }
}

/// Read a whole document into its root element
pub fn read_document(bytes: &[u8]) -> Result<Element, XmlError> {
    let text = std::str::from_utf8(bytes).map_err(|e| XmlError {
        line: 1,
        message: format!("document is not valid UTF-8: {}", e),
    })?;
    let mut reader = NsReader::from_str(text);
    let mut lines = LineCounter {
        text,
        pos: 0,
        line: 1,
    };
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let line = lines.line_at(reader.buffer_position() as usize);
        let fail = |message: String| XmlError { line, message };

        let (resolved, event) = reader.read_resolved_event().map_err(|e| fail(e.to_string()))?;
        let namespace = owned_namespace(resolved).map_err(fail)?;

        match event {
            Event::Start(start) => {
                let el = start_element(&reader, namespace, &start, line).map_err(fail)?;
                stack.push(el);
            }
            Event::Empty(start) => {
                let el = start_element(&reader, namespace, &start, line).map_err(fail)?;
                attach(&mut stack, &mut root, el).map_err(fail)?;
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| fail("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, el).map_err(fail)?;
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| fail(e.to_string()))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text {
                        text: text.into_owned(),
                        line,
                    });
                }
            }
            Event::CData(c) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text {
                        text: String::from_utf8_lossy(&c.into_inner()).into_owned(),
                        line,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(XmlError {
            line: lines.line,
            message: "unexpected end of document".to_string(),
        });
    }
    root.ok_or(XmlError {
        line: 1,
        message: "document has no root element".to_string(),
    })
}

fn owned_namespace(resolved: ResolveResult<'_>) -> Result<Option<String>, String> {
    match resolved {
        ResolveResult::Bound(ns) => Ok(Some(String::from_utf8_lossy(ns.into_inner()).into_owned())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(format!(
            "unknown namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        )),
    }
}

fn start_element(
    reader: &NsReader<&[u8]>,
    namespace: Option<String>,
    start: &BytesStart<'_>,
    line: usize,
) -> Result<Element, String> {
    let mut el = Element {
        ns: namespace,
        local: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attrs: Vec::new(),
        children: Vec::new(),
        line,
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let ns = owned_namespace(resolved)?;
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        el.attrs.push(Attr {
            ns,
            local: String::from_utf8_lossy(local.as_ref()).into_owned(),
            value: value.into_owned(),
        });
    }
    Ok(el)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(el));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        None => Err("document has more than one root element".to_string()),
    }
}
