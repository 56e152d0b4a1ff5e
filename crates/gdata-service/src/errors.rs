//! Parsing of the `<errors>` documents GData servers send with failures.

use gdata_core::Error;
use gdata_core::xml::{XmlElement, ns, parse_document};
use gdata_transport::{ErrorResponseParser, OperationType, classify_status};
use tracing::trace;

/// One `<error>` of a GData error document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    pub domain: Option<String>,
    pub code: Option<String>,
    pub location: Option<String>,
    pub internal_reason: Option<String>,
}

impl ErrorDetail {
    fn from_element(element: &XmlElement) -> Self {
        let mut detail = Self::default();
        for child in element.child_elements() {
            if child.namespace.as_deref() != Some(ns::GD) {
                continue;
            }
            let text = child.text().trim().to_string();
            let slot = match child.name.as_str() {
                "domain" => &mut detail.domain,
                "code" => &mut detail.code,
                "location" => &mut detail.location,
                "internalReason" => &mut detail.internal_reason,
                _ => continue,
            };
            if !text.is_empty() {
                *slot = Some(text);
            }
        }
        detail
    }

    /// A one-line description, preferring the server's reason.
    pub fn describe(&self) -> String {
        let mut out = match (&self.internal_reason, &self.code) {
            (Some(reason), _) => reason.clone(),
            (None, Some(code)) => code.clone(),
            (None, None) => String::from("Unknown error"),
        };
        if let Some(ref location) = self.location {
            out.push_str(&format!(" (at {location})"));
        }
        out
    }
}

/// Reads the `<error>` children of a `gd:errors` document.
///
/// Returns `None` if `body` is not such a document.
pub fn parse_error_document(body: &str) -> Option<Vec<ErrorDetail>> {
    if !body.trim_start().starts_with('<') {
        return None;
    }
    let root = parse_document(body).ok()?;
    if !root.is(ns::GD, "errors") {
        return None;
    }
    Some(
        root.child_elements()
            .filter(|child| child.is(ns::GD, "error"))
            .map(ErrorDetail::from_element)
            .collect(),
    )
}

/// The error parser services use unless given another.
///
/// Structured error documents are summarised into the message; any other
/// body is passed to [`classify_status`] unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct GDataErrorParser;

impl ErrorResponseParser for GDataErrorParser {
    fn parse_error_response(
        &self,
        operation: OperationType,
        status: u16,
        reason: &str,
        body: &str,
    ) -> Error {
        match parse_error_document(body) {
            Some(details) if !details.is_empty() => {
                trace!(status, errors = details.len(), "Parsed GData error document");
                let summary = details
                    .iter()
                    .map(ErrorDetail::describe)
                    .collect::<Vec<_>>()
                    .join("; ");
                classify_status(operation, status, reason, &summary)
            }
            _ => classify_status(operation, status, reason, body),
        }
    }
}
