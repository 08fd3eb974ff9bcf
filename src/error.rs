use thiserror::Error;

use crate::diagnostics::Severity;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_REGISTER: &str = "Z-ERR-REGISTER";
pub const ERR_TEMPLATE_SHAPE: &str = "Z-ERR-TEMPLATE-SHAPE";
pub const ERR_PROP_EVAL: &str = "Z-ERR-PROP-EVAL";
pub const ERR_EMIT: &str = "Z-ERR-EMIT";
pub const ERR_RECURSION: &str = "Z-ERR-RECURSION";
pub const ERR_EVAL: &str = "Z-ERR-EVAL";

/// The guarantee that still holds after a diagnostic with `code` is reported.
pub fn guarantee(code: &str) -> &'static str {
    match code {
        ERR_REGISTER => "The registry is unchanged; existing components keep resolving.",
        ERR_TEMPLATE_SHAPE => "Only the offending element is removed; siblings still compile.",
        ERR_PROP_EVAL => "The prop keeps its previous value; other bindings are unaffected.",
        ERR_EMIT => "emit() returns normally to the component.",
        ERR_RECURSION => "The nested instance is removed; its ancestors still render.",
        ERR_EVAL => "The binding is skipped for this update.",
        _ => "Unknown diagnostic.",
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised by the expression interpreter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("syntax error in `{expression}`: {message}")]
    Syntax { expression: String, message: String },

    #[error("`{name}` is not defined")]
    UnknownIdentifier { name: String },

    #[error("`{name}` is not a function")]
    NotCallable { name: String },

    #[error("unsupported {construct} `{expression}`")]
    Unsupported {
        construct: &'static str,
        expression: String,
    },
}

impl EvalError {
    pub(crate) fn unsupported(construct: &'static str, expression: impl Into<String>) -> Self {
        EvalError::Unsupported {
            construct,
            expression: expression.into(),
        }
    }
}

/// Failures owned by the component resolver. None of these escape the
/// resolver as panics; each one becomes a diagnostic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentError {
    #[error("component `{name}` was not registered: {reason}")]
    Registration { name: String, reason: &'static str },

    #[error("template of `{name}` must be one root element with no top-level text, found {roots} elements")]
    TemplateShape { name: String, roots: usize },

    #[error("prop `{prop}` of `{component}` failed to evaluate `{expression}`: {error}")]
    PropEvaluation {
        component: String,
        prop: String,
        expression: String,
        error: EvalError,
    },

    #[error("`{component}` emitted `{event}` but no listener is bound")]
    UnknownEvent { component: String, event: String },

    #[error("handler for `{event}` on `{component}` failed: {error}")]
    EmitDispatch {
        component: String,
        event: String,
        error: EvalError,
    },

    #[error("`{name}` exceeds the nesting limit of {limit} components")]
    RecursionLimit { name: String, limit: usize },
}

impl ComponentError {
    pub fn code(&self) -> &'static str {
        match self {
            ComponentError::Registration { .. } => ERR_REGISTER,
            ComponentError::TemplateShape { .. } => ERR_TEMPLATE_SHAPE,
            ComponentError::PropEvaluation { .. } => ERR_PROP_EVAL,
            ComponentError::UnknownEvent { .. } | ComponentError::EmitDispatch { .. } => ERR_EMIT,
            ComponentError::RecursionLimit { .. } => ERR_RECURSION,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ComponentError::TemplateShape { .. } | ComponentError::RecursionLimit { .. } => {
                Severity::Error
            }
            _ => Severity::Warning,
        }
    }

    /// Name of the component the error belongs to.
    pub fn component(&self) -> &str {
        match self {
            ComponentError::Registration { name, .. }
            | ComponentError::TemplateShape { name, .. }
            | ComponentError::RecursionLimit { name, .. } => name,
            ComponentError::PropEvaluation { component, .. }
            | ComponentError::UnknownEvent { component, .. }
            | ComponentError::EmitDispatch { component, .. } => component,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_severity() {
        let shape = ComponentError::TemplateShape {
            name: "card".to_string(),
            roots: 2,
        };
        assert_eq!(shape.code(), ERR_TEMPLATE_SHAPE);
        assert_eq!(shape.severity(), Severity::Error);
        assert_eq!(shape.component(), "card");
        assert_eq!(
            shape.to_string(),
            "template of `card` must be one root element with no top-level text, found 2 elements"
        );

        let unknown = ComponentError::UnknownEvent {
            component: "badge".to_string(),
            event: "close".to_string(),
        };
        assert_eq!(unknown.code(), ERR_EMIT);
        assert_eq!(unknown.severity(), Severity::Warning);
    }

    #[test]
    fn test_nested_eval_error_message() {
        let err = ComponentError::PropEvaluation {
            component: "header".to_string(),
            prop: "label".to_string(),
            expression: "missing".to_string(),
            error: EvalError::UnknownIdentifier {
                name: "missing".to_string(),
            },
        };
        assert!(err.to_string().ends_with("`missing` is not defined"));
    }

    #[test]
    fn test_every_code_has_a_guarantee() {
        for code in [
            ERR_REGISTER,
            ERR_TEMPLATE_SHAPE,
            ERR_PROP_EVAL,
            ERR_EMIT,
            ERR_RECURSION,
            ERR_EVAL,
        ] {
            assert_ne!(guarantee(code), "Unknown diagnostic.");
        }
    }
}
