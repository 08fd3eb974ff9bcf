//! Event handler references.
//!
//! The value of an `@event` attribute is classified once, when the binding is
//! created: a bare identifier names a function in state, anything else is an
//! inline statement list run with `$event` bound to the first argument. A
//! name that does not resolve to a function is run as an inline expression,
//! so `@close="label"` is a plain read of `label`.

use serde::Serialize;

use crate::error::EvalResult;
use crate::expr::{exec_statements, is_valid_identifier, Bindings, EventEnv, EVENT_BINDING};
use crate::reactive::Store;
use crate::value::{Function, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "source", rename_all = "camelCase")]
pub enum Handler {
    /// `@close="removeBadge"`
    Named(String),
    /// `@close="count += $event"`
    Inline(String),
}

impl Handler {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if is_valid_identifier(trimmed) {
            Handler::Named(trimmed.to_string())
        } else {
            Handler::Inline(trimmed.to_string())
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Handler::Named(s) | Handler::Inline(s) => s,
        }
    }

    /// Run against live state: inline writes land in `state`.
    pub fn invoke(&self, state: &Store, args: &[Value]) -> EvalResult<Value> {
        match self {
            Handler::Named(name) => match named_function(state, name) {
                Some(f) => Ok(f.call(args)),
                None => exec_statements(name, &EventEnv::new(state, first(args))),
            },
            Handler::Inline(code) => {
                let env = EventEnv::new(state, first(args));
                exec_statements(code, &env)
            }
        }
    }

    /// Run against a snapshot of `state`: inline code can call functions of
    /// `state` but its own assignments are discarded.
    pub fn invoke_isolated(&self, state: &Store, args: &[Value]) -> EvalResult<Value> {
        match self {
            Handler::Named(name) => match named_function(state, name) {
                Some(f) => Ok(f.call(args)),
                None => {
                    let env = Bindings::snapshot(state).with(EVENT_BINDING, first(args));
                    exec_statements(name, &env)
                }
            },
            Handler::Inline(code) => {
                let env = Bindings::snapshot(state).with(EVENT_BINDING, first(args));
                exec_statements(code, &env)
            }
        }
    }
}

fn first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or_default()
}

fn named_function(state: &Store, name: &str) -> Option<Function> {
    state.lookup(name)?.as_function().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_classification() {
        assert_eq!(Handler::parse(" removeBadge "), Handler::Named("removeBadge".into()));
        assert_eq!(Handler::parse("count++"), Handler::Inline("count++".into()));
        assert_eq!(Handler::parse("go()"), Handler::Inline("go()".into()));
    }

    #[test]
    fn test_named_receives_arguments() {
        let state = Store::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        state.define_method(
            "pick",
            Function::new(move |args| {
                log.borrow_mut().extend(args.iter().cloned());
                Value::Undefined
            }),
        );
        Handler::parse("pick")
            .invoke(&state, &[Value::from(1), Value::from("a")])
            .unwrap();
        assert_eq!(*seen.borrow(), vec![Value::from(1), Value::from("a")]);
    }

    #[test]
    fn test_named_non_function_is_read_inline() {
        let state = Store::from_json(json!({ "label": "x" }));
        assert_eq!(
            Handler::parse("missing").invoke(&state, &[]),
            Err(EvalError::UnknownIdentifier { name: "missing".into() })
        );
        assert_eq!(
            Handler::parse("missing").invoke_isolated(&state, &[]),
            Err(EvalError::UnknownIdentifier { name: "missing".into() })
        );
        assert_eq!(Handler::parse("label").invoke(&state, &[]), Ok(Value::from("x")));
        assert_eq!(
            Handler::parse("label").invoke_isolated(&state, &[Value::from(1)]),
            Ok(Value::from("x"))
        );
        assert_eq!(state.get("label"), Some(Value::from("x")));
    }

    #[test]
    fn test_inline_live_vs_isolated() {
        let state = Store::from_json(json!({ "count": 1 }));
        let handler = Handler::parse("count += $event");

        handler.invoke_isolated(&state, &[Value::from(5)]).unwrap();
        assert_eq!(state.get("count"), Some(Value::from(1)));

        handler.invoke(&state, &[Value::from(5)]).unwrap();
        assert_eq!(state.get("count"), Some(Value::from(6)));
    }

    #[test]
    fn test_serializes_tagged() {
        let json = serde_json::to_value(Handler::parse("go")).unwrap();
        assert_eq!(json, json!({ "kind": "named", "source": "go" }));
    }
}
