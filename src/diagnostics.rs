//! Diagnostics sink shared by the host runtime and the component resolver.
//!
//! Every report is emitted as a `tracing` event and kept in memory so that
//! embedders (and tests) can inspect what went wrong without installing a
//! subscriber.

use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, error, warn};

use crate::error::{guarantee, ComponentError, EvalError, ERR_EVAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub guarantee: String,
    pub component: Option<String>,
    /// How many times this exact report was made.
    pub occurrences: usize,
}

impl Diagnostic {
    /// A failed host binding (text interpolation, attribute, event handler).
    pub fn eval(expression: &str, err: &EvalError) -> Self {
        Diagnostic {
            code: ERR_EVAL.to_string(),
            severity: Severity::Warning,
            message: format!("failed to evaluate `{}`: {}", expression, err),
            guarantee: guarantee(ERR_EVAL).to_string(),
            component: None,
            occurrences: 1,
        }
    }

    fn same_report(&self, other: &Diagnostic) -> bool {
        self.code == other.code && self.component == other.component && self.message == other.message
    }
}

impl From<&ComponentError> for Diagnostic {
    fn from(err: &ComponentError) -> Self {
        Diagnostic {
            code: err.code().to_string(),
            severity: err.severity(),
            message: err.to_string(),
            guarantee: guarantee(err.code()).to_string(),
            component: Some(err.component().to_string()),
            occurrences: 1,
        }
    }
}

/// Entries kept by a sink unless configured otherwise.
pub const DEFAULT_DIAGNOSTIC_LIMIT: usize = 256;

#[derive(Debug)]
struct SinkInner {
    entries: RefCell<VecDeque<Diagnostic>>,
    limit: Cell<usize>,
}

impl Default for SinkInner {
    fn default() -> Self {
        Self {
            entries: RefCell::new(VecDeque::new()),
            limit: Cell::new(DEFAULT_DIAGNOSTIC_LIMIT),
        }
    }
}

/// Bounded diagnostics store. A report identical to a kept entry (same code,
/// component and message) only bumps that entry's `occurrences`; once the
/// limit is reached the oldest entry is dropped.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(Rc<SinkInner>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        let mut entries = self.0.entries.borrow_mut();
        if let Some(existing) = entries.iter_mut().find(|d| d.same_report(&diagnostic)) {
            existing.occurrences += 1;
            debug!(
                code = %existing.code,
                occurrences = existing.occurrences,
                "repeated diagnostic"
            );
            return;
        }

        match diagnostic.severity {
            Severity::Warning => warn!(
                code = %diagnostic.code,
                component = diagnostic.component.as_deref().unwrap_or(""),
                "{}",
                diagnostic.message
            ),
            Severity::Error => error!(
                code = %diagnostic.code,
                component = diagnostic.component.as_deref().unwrap_or(""),
                "{}",
                diagnostic.message
            ),
        }
        entries.push_back(diagnostic);
        let limit = self.0.limit.get();
        while entries.len() > limit {
            entries.pop_front();
        }
    }

    pub fn report_component(&self, err: &ComponentError) {
        self.report(Diagnostic::from(err));
    }

    /// Cap the number of kept entries (at least one), dropping the oldest.
    pub fn set_limit(&self, limit: usize) {
        let limit = limit.max(1);
        self.0.limit.set(limit);
        let mut entries = self.0.entries.borrow_mut();
        while entries.len() > limit {
            entries.pop_front();
        }
    }

    pub fn limit(&self) -> usize {
        self.0.limit.get()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.0.entries.borrow().iter().cloned().collect()
    }

    pub fn with_code(&self, code: &str) -> Vec<Diagnostic> {
        self.0
            .entries
            .borrow()
            .iter()
            .filter(|d| d.code == code)
            .cloned()
            .collect()
    }

    /// Number of distinct entries kept.
    pub fn len(&self) -> usize {
        self.0.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.0.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ERR_REGISTER;

    #[test]
    fn test_clones_share_entries() {
        let diagnostics = Diagnostics::new();
        let shared = diagnostics.clone();
        shared.report_component(&ComponentError::Registration {
            name: "card".to_string(),
            reason: "missing template",
        });

        assert_eq!(diagnostics.len(), 1);
        let entry = &diagnostics.entries()[0];
        assert_eq!(entry.code, ERR_REGISTER);
        assert_eq!(entry.component.as_deref(), Some("card"));
        assert_eq!(entry.severity, Severity::Warning);

        diagnostics.clear();
        assert!(shared.is_empty());
    }

    #[test]
    fn test_serializes_camel_case() {
        let diagnostic = Diagnostic::eval(
            "x",
            &EvalError::UnknownIdentifier {
                name: "x".to_string(),
            },
        );
        let json = serde_json::to_value(&diagnostic).unwrap();
        assert_eq!(json["code"], "Z-ERR-EVAL");
        assert_eq!(json["severity"], "warning");
        assert!(json["component"].is_null());
        assert_eq!(json["occurrences"], 1);
    }

    fn unknown(name: &str) -> Diagnostic {
        Diagnostic::eval(
            name,
            &EvalError::UnknownIdentifier {
                name: name.to_string(),
            },
        )
    }

    #[test]
    fn test_repeats_collapse_into_one_entry() {
        let diagnostics = Diagnostics::new();
        for _ in 0..1000 {
            diagnostics.report(unknown("missing"));
        }
        diagnostics.report(unknown("other"));

        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics.entries()[0].occurrences, 1000);
        assert_eq!(diagnostics.entries()[1].occurrences, 1);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let diagnostics = Diagnostics::new();
        assert_eq!(diagnostics.limit(), DEFAULT_DIAGNOSTIC_LIMIT);
        diagnostics.set_limit(3);
        for i in 0..10 {
            diagnostics.report(unknown(&format!("v{}", i)));
        }
        let kept: Vec<String> = diagnostics.entries().into_iter().map(|d| d.message).collect();
        assert_eq!(kept.len(), 3);
        assert!(kept[0].contains("v7"));
        assert!(kept[2].contains("v9"));

        diagnostics.set_limit(0);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.limit(), 1);
    }
}
