//! # Fault Detector
//!
//! Classifies a remote response as a protocol fault or a normal payload.
//!
//! Recognised faults:
//! - `Fault` in the SOAP 1.1 or SOAP 1.2 envelope namespace
//! - ebXML `ErrorList`
//! - any `Fault` element directly inside a `Body` (unexpected namespaces)
//!
//! Absent or unparseable documents are never faults.

use crate::xml::{walk, Element, XmlEvent, EBXML_NS, SOAP11_NS, SOAP12_NS};
use std::fmt;

/// One ebXML error entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EbxmlError {
    /// `errorCode` attribute.
    pub code: String,
    /// `severity` attribute.
    pub severity: Option<String>,
    /// `Description` text.
    pub description: Option<String>,
}

/// Diagnostic detail extracted from a fault document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SoapFault {
    /// SOAP 1.1 `faultcode` or SOAP 1.2 `Code/Value`.
    pub code: Option<String>,
    /// SOAP 1.1 `faultstring` or SOAP 1.2 `Reason/Text`.
    pub reason: Option<String>,
    /// ebXML errors, from an `ErrorList` or inside the fault detail.
    pub errors: Vec<EbxmlError>,
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(code.clone());
        }
        if let Some(reason) = &self.reason {
            parts.push(reason.clone());
        }
        for error in &self.errors {
            match &error.description {
                Some(d) => parts.push(format!("{} ({})", error.code, d)),
                None => parts.push(error.code.clone()),
            }
        }
        if parts.is_empty() {
            f.write_str("unspecified fault")
        } else {
            f.write_str(&parts.join(": "))
        }
    }
}

#[derive(Default)]
struct FaultScan {
    is_fault: bool,
    detail: SoapFault,
}

fn is_fault_element(path: &[Element]) -> bool {
    let Some(current) = path.last() else {
        return false;
    };
    if current.is_in(SOAP11_NS, "Fault") || current.is_in(SOAP12_NS, "Fault") {
        return true;
    }
    current.is("Fault") && path.len() >= 2 && path[path.len() - 2].is("Body")
}

fn inside(path: &[Element], local: &str) -> bool {
    path.iter().any(|e| e.is(local))
}

fn scan(document: &str) -> Option<FaultScan> {
    let mut found = false;
    let mut fault = SoapFault::default();

    walk(document, |event| match event {
        XmlEvent::Open(path) => {
            let Some(current) = path.last() else { return };
            if is_fault_element(path) || current.is_in(EBXML_NS, "ErrorList") {
                found = true;
            } else if current.is("Error") && current.attribute("errorCode").is_some() {
                fault.errors.push(EbxmlError {
                    code: current.attribute("errorCode").unwrap_or_default().to_string(),
                    severity: current.attribute("severity").map(str::to_string),
                    description: None,
                });
            }
        }
        XmlEvent::Text(path, text) => {
            let Some(current) = path.last() else { return };
            let text = text.trim();
            if text.is_empty() {
                return;
            }
            if current.is("faultcode") || (current.is("Value") && inside(path, "Code")) {
                fault.code.get_or_insert_with(|| text.to_string());
            } else if current.is("faultstring") || (current.is("Text") && inside(path, "Reason"))
            {
                fault.reason.get_or_insert_with(|| text.to_string());
            } else if current.is("Description") && inside(path, "Error") {
                if let Some(last) = fault.errors.last_mut() {
                    last.description.get_or_insert_with(|| text.to_string());
                }
            }
        }
        XmlEvent::Close => {}
    })
    .ok()?;

    Some(FaultScan {
        is_fault: found,
        detail: fault,
    })
}

/// Whether `document` is a protocol fault.
pub fn is_fault(document: Option<&str>) -> bool {
    document
        .and_then(scan)
        .map(|s| s.is_fault)
        .unwrap_or(false)
}

/// Fault detail, if `document` is a fault.
pub fn parse_fault(document: &str) -> Option<SoapFault> {
    scan(document).filter(|s| s.is_fault).map(|s| s.detail)
}
