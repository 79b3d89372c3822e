//! Namespace-aware XML walking shared by the fault detector and the inbound
//! envelope parser.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

/// SOAP 1.1 envelope namespace.
pub const SOAP11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 envelope namespace.
pub const SOAP12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// ebXML message service header namespace.
pub const EBXML_NS: &str = "http://www.oasis-open.org/committees/ebxml-msg/schema/msg-header-2_0.xsd";

/// Element on the current path.
#[derive(Clone, Debug)]
pub(crate) struct Element {
    pub ns: Option<String>,
    pub local: String,
    pub attributes: Vec<(String, String)>,
}

impl Element {
    pub fn is(&self, local: &str) -> bool {
        self.local == local
    }

    pub fn is_in(&self, ns: &str, local: &str) -> bool {
        self.local == local && self.ns.as_deref() == Some(ns)
    }

    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == local)
            .map(|(_, v)| v.as_str())
    }
}

/// Walk events. `Open` and `Text` carry the path from the root to the
/// current element; `Close` ends the innermost open element.
pub(crate) enum XmlEvent<'a> {
    Open(&'a [Element]),
    Text(&'a [Element], &'a str),
    Close,
}

#[derive(Debug, Error)]
pub(crate) enum XmlError {
    #[error("reader error: {0}")]
    Reader(String),
    #[error("document has no root element")]
    NoRoot,
    #[error("unbalanced elements")]
    Unbalanced,
    #[error("text outside the root element")]
    StrayText,
}

/// Walk a whole document. Fails on anything that is not a single
/// well-formed element tree.
pub(crate) fn walk<F>(document: &str, mut visit: F) -> Result<(), XmlError>
where
    F: FnMut(XmlEvent<'_>),
{
    let mut reader = NsReader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut path: Vec<Element> = Vec::new();
    let mut saw_root = false;

    loop {
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| XmlError::Reader(e.to_string()))?;
        match event {
            Event::Start(start) => {
                if saw_root && path.is_empty() {
                    return Err(XmlError::Unbalanced);
                }
                path.push(element(resolved, &start));
                saw_root = true;
                visit(XmlEvent::Open(&path));
            }
            Event::Empty(start) => {
                if saw_root && path.is_empty() {
                    return Err(XmlError::Unbalanced);
                }
                path.push(element(resolved, &start));
                saw_root = true;
                visit(XmlEvent::Open(&path));
                visit(XmlEvent::Close);
                path.pop();
            }
            Event::End(_) => {
                if path.is_empty() {
                    return Err(XmlError::Unbalanced);
                }
                visit(XmlEvent::Close);
                path.pop();
            }
            Event::Text(text) => {
                if path.is_empty() {
                    return Err(XmlError::StrayText);
                }
                let value = text
                    .unescape()
                    .map_err(|e| XmlError::Reader(e.to_string()))?;
                visit(XmlEvent::Text(&path, &*value));
            }
            Event::CData(data) => {
                if path.is_empty() {
                    return Err(XmlError::StrayText);
                }
                let value = String::from_utf8_lossy(&data);
                visit(XmlEvent::Text(&path, &*value));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(XmlError::NoRoot);
    }
    if !path.is_empty() {
        return Err(XmlError::Unbalanced);
    }
    Ok(())
}

fn element(resolved: ResolveResult<'_>, start: &BytesStart<'_>) -> Element {
    let ns = match resolved {
        ResolveResult::Bound(Namespace(ns)) => Some(String::from_utf8_lossy(ns).into_owned()),
        _ => None,
    };
    let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let attributes = start
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            (key, value)
        })
        .collect();
    Element {
        ns,
        local,
        attributes,
    }
}
