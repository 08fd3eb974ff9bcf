//! Sandboxed expression interpreter.
//!
//! Template expressions and inline handlers are parsed with Oxc (module mode,
//! so strict-mode rules apply) and evaluated directly over the AST against an
//! [`Env`]. Only a narrow subset is supported:
//!
//! - literals, template literals, identifiers (`undefined`, `NaN`, `Infinity`
//!   are built in)
//! - unary `! - + typeof void`, arithmetic, comparison, `&& || ??`, `?:`
//! - calls of function-valued identifiers
//! - assignment (`= += -= *= /= %=`) and update (`++ --`) of identifiers
//! - expression statements separated by `;` (handlers only)
//!
//! There is no member access, no global object and no way to construct code
//! at runtime: an expression can only see the names its environment declares.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    AssignmentTarget, CallExpression, Expression, SimpleAssignmentTarget, Statement,
    TemplateLiteral,
};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};
use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{EvalError, EvalResult};
use crate::reactive::Store;
use crate::value::Value;

/// Name bound to the first event argument in handlers.
pub const EVENT_BINDING: &str = "$event";

/// The names an expression can read and write.
pub trait Env {
    fn lookup(&self, name: &str) -> Option<Value>;
    fn assign(&self, name: &str, value: Value);
}

impl Env for Store {
    fn lookup(&self, name: &str) -> Option<Value> {
        Store::lookup(self, name)
    }

    fn assign(&self, name: &str, value: Value) {
        self.set(name, value);
    }
}

/// Detached bindings: a copy of a store's entries plus extra names.
/// Writes stay local and never reach the store the bindings came from.
#[derive(Debug, Default)]
pub struct Bindings {
    values: RefCell<HashMap<String, Value>>,
}

impl Bindings {
    pub fn snapshot(store: &Store) -> Self {
        let mut values: HashMap<String, Value> = store
            .methods()
            .into_iter()
            .map(|(name, method)| (name, Value::Function(method)))
            .collect();
        values.extend(store.snapshot());
        Self {
            values: RefCell::new(values),
        }
    }

    pub fn with(self, name: impl Into<String>, value: Value) -> Self {
        self.values.borrow_mut().insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.borrow().get(name).cloned()
    }
}

impl Env for Bindings {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn assign(&self, name: &str, value: Value) {
        self.values.borrow_mut().insert(name.to_string(), value);
    }
}

/// A live store with `$event` layered on top. Used for handlers bound by the
/// host, whose writes are meant to reach the state.
pub struct EventEnv<'a> {
    state: &'a Store,
    event: Value,
}

impl<'a> EventEnv<'a> {
    pub fn new(state: &'a Store, event: Value) -> Self {
        Self { state, event }
    }
}

impl Env for EventEnv<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if name == EVENT_BINDING {
            Some(self.event.clone())
        } else {
            self.state.lookup(name)
        }
    }

    fn assign(&self, name: &str, value: Value) {
        if name != EVENT_BINDING {
            self.state.set(name, value);
        }
    }
}

/// Evaluate a single expression.
pub fn eval_exp(code: &str, env: &dyn Env) -> EvalResult<Value> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let expr = Parser::new(&allocator, code, source_type)
        .parse_expression()
        .map_err(|errors| EvalError::Syntax {
            expression: code.to_string(),
            message: format!("{:?}", errors),
        })?;
    Evaluator { env, source: code }.eval(&expr)
}

/// Run `;`-separated expression statements, returning the last value.
pub fn exec_statements(code: &str, env: &dyn Env) -> EvalResult<Value> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let ret = Parser::new(&allocator, code, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(EvalError::Syntax {
            expression: code.to_string(),
            message: format!("{:?}", ret.errors),
        });
    }

    let evaluator = Evaluator { env, source: code };
    let mut last = Value::Undefined;
    for stmt in &ret.program.body {
        match stmt {
            Statement::ExpressionStatement(expr_stmt) => {
                last = evaluator.eval(&expr_stmt.expression)?;
            }
            Statement::EmptyStatement(_) => {}
            other => {
                return Err(EvalError::unsupported(
                    "statement",
                    evaluator.text(other.span()),
                ))
            }
        }
    }
    Ok(last)
}

/// Check if a string is a valid JavaScript identifier
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

struct Evaluator<'e> {
    env: &'e dyn Env,
    source: &'e str,
}

impl Evaluator<'_> {
    fn text(&self, span: oxc_span::Span) -> String {
        self.source
            .get(span.start as usize..span.end as usize)
            .unwrap_or(self.source)
            .to_string()
    }

    fn eval(&self, expr: &Expression<'_>) -> EvalResult<Value> {
        match expr {
            Expression::BooleanLiteral(lit) => Ok(Value::Bool(lit.value)),
            Expression::NullLiteral(_) => Ok(Value::Null),
            Expression::NumericLiteral(lit) => Ok(Value::Number(lit.value)),
            Expression::StringLiteral(lit) => Ok(Value::String(lit.value.to_string())),
            Expression::TemplateLiteral(tpl) => self.template_literal(tpl),
            Expression::Identifier(id) => self.identifier(id.name.as_str()),
            Expression::ParenthesizedExpression(paren) => self.eval(&paren.expression),
            Expression::SequenceExpression(seq) => {
                let mut last = Value::Undefined;
                for e in &seq.expressions {
                    last = self.eval(e)?;
                }
                Ok(last)
            }
            Expression::UnaryExpression(unary) => {
                if unary.operator == UnaryOperator::Typeof {
                    // typeof on an undeclared name is not an error
                    if let Expression::Identifier(id) = &unary.argument {
                        let value = self.identifier(id.name.as_str()).unwrap_or_default();
                        return Ok(Value::from(value.type_of()));
                    }
                }
                let value = self.eval(&unary.argument)?;
                match unary.operator {
                    UnaryOperator::LogicalNot => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOperator::UnaryNegation => Ok(Value::Number(-value.as_number())),
                    UnaryOperator::UnaryPlus => Ok(Value::Number(value.as_number())),
                    UnaryOperator::Typeof => Ok(Value::from(value.type_of())),
                    UnaryOperator::Void => Ok(Value::Undefined),
                    _ => Err(EvalError::unsupported("operator", self.text(unary.span))),
                }
            }
            Expression::BinaryExpression(bin) => {
                let left = self.eval(&bin.left)?;
                let right = self.eval(&bin.right)?;
                binary(bin.operator, &left, &right)
                    .ok_or_else(|| EvalError::unsupported("operator", self.text(bin.span)))
            }
            Expression::LogicalExpression(logical) => {
                let left = self.eval(&logical.left)?;
                let short_circuit = match logical.operator {
                    LogicalOperator::And => !left.is_truthy(),
                    LogicalOperator::Or => left.is_truthy(),
                    LogicalOperator::Coalesce => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(&logical.right)
                }
            }
            Expression::ConditionalExpression(cond) => {
                if self.eval(&cond.test)?.is_truthy() {
                    self.eval(&cond.consequent)
                } else {
                    self.eval(&cond.alternate)
                }
            }
            Expression::CallExpression(call) => self.call(call),
            Expression::AssignmentExpression(assign) => {
                let name = match &assign.left {
                    AssignmentTarget::AssignmentTargetIdentifier(id) => id.name.as_str(),
                    _ => {
                        return Err(EvalError::unsupported(
                            "assignment target",
                            self.text(assign.span),
                        ))
                    }
                };
                let right = self.eval(&assign.right)?;
                let value = match assign.operator {
                    AssignmentOperator::Assign => right,
                    op => {
                        let current = self.identifier(name)?;
                        let bin_op = match op {
                            AssignmentOperator::Addition => BinaryOperator::Addition,
                            AssignmentOperator::Subtraction => BinaryOperator::Subtraction,
                            AssignmentOperator::Multiplication => BinaryOperator::Multiplication,
                            AssignmentOperator::Division => BinaryOperator::Division,
                            AssignmentOperator::Remainder => BinaryOperator::Remainder,
                            _ => {
                                return Err(EvalError::unsupported(
                                    "operator",
                                    self.text(assign.span),
                                ))
                            }
                        };
                        binary(bin_op, &current, &right).unwrap_or_default()
                    }
                };
                self.env.assign(name, value.clone());
                Ok(value)
            }
            Expression::UpdateExpression(update) => {
                let name = match &update.argument {
                    SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => id.name.as_str(),
                    _ => {
                        return Err(EvalError::unsupported(
                            "update target",
                            self.text(update.span),
                        ))
                    }
                };
                let old = self.identifier(name)?.as_number();
                let new = match update.operator {
                    UpdateOperator::Increment => old + 1.0,
                    UpdateOperator::Decrement => old - 1.0,
                };
                self.env.assign(name, Value::Number(new));
                Ok(Value::Number(if update.prefix { new } else { old }))
            }
            other => Err(EvalError::unsupported("expression", self.text(other.span()))),
        }
    }

    fn identifier(&self, name: &str) -> EvalResult<Value> {
        match name {
            "undefined" => Ok(Value::Undefined),
            "NaN" => Ok(Value::Number(f64::NAN)),
            "Infinity" => Ok(Value::Number(f64::INFINITY)),
            _ => self
                .env
                .lookup(name)
                .ok_or_else(|| EvalError::UnknownIdentifier {
                    name: name.to_string(),
                }),
        }
    }

    fn template_literal(&self, tpl: &TemplateLiteral<'_>) -> EvalResult<Value> {
        let mut out = String::new();
        for (i, quasi) in tpl.quasis.iter().enumerate() {
            match &quasi.value.cooked {
                Some(cooked) => out.push_str(cooked.as_str()),
                None => out.push_str(quasi.value.raw.as_str()),
            }
            if let Some(e) = tpl.expressions.get(i) {
                out.push_str(&self.eval(e)?.to_string());
            }
        }
        Ok(Value::String(out))
    }

    fn call(&self, call: &CallExpression<'_>) -> EvalResult<Value> {
        let name = match &call.callee {
            Expression::Identifier(id) => id.name.as_str(),
            _ => return Err(EvalError::unsupported("callee", self.text(call.span))),
        };
        let function = match self.identifier(name)? {
            Value::Function(f) => f,
            _ => {
                return Err(EvalError::NotCallable {
                    name: name.to_string(),
                })
            }
        };

        let mut args = Vec::with_capacity(call.arguments.len());
        for arg in &call.arguments {
            match arg.as_expression() {
                Some(e) => args.push(self.eval(e)?),
                None => return Err(EvalError::unsupported("argument", self.text(call.span))),
            }
        }
        Ok(function.call(&args))
    }
}

fn binary(op: BinaryOperator, left: &Value, right: &Value) -> Option<Value> {
    let value = match op {
        BinaryOperator::Addition => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Value::String(format!("{}{}", left, right))
            }
            _ => Value::Number(left.as_number() + right.as_number()),
        },
        BinaryOperator::Subtraction => Value::Number(left.as_number() - right.as_number()),
        BinaryOperator::Multiplication => Value::Number(left.as_number() * right.as_number()),
        BinaryOperator::Division => Value::Number(left.as_number() / right.as_number()),
        BinaryOperator::Remainder => Value::Number(left.as_number() % right.as_number()),
        BinaryOperator::Exponential => Value::Number(left.as_number().powf(right.as_number())),
        BinaryOperator::Equality => Value::Bool(left.loose_equals(right)),
        BinaryOperator::Inequality => Value::Bool(!left.loose_equals(right)),
        BinaryOperator::StrictEquality => Value::Bool(left.strict_equals(right)),
        BinaryOperator::StrictInequality => Value::Bool(!left.strict_equals(right)),
        BinaryOperator::LessThan => compare(left, right, |o| o.is_lt()),
        BinaryOperator::LessEqualThan => compare(left, right, |o| o.is_le()),
        BinaryOperator::GreaterThan => compare(left, right, |o| o.is_gt()),
        BinaryOperator::GreaterEqualThan => compare(left, right, |o| o.is_ge()),
        _ => return None,
    };
    Some(value)
}

fn compare(left: &Value, right: &Value, test: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.as_number().partial_cmp(&right.as_number()),
    };
    Value::Bool(ordering.map_or(false, test))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Store {
        Store::from_json(json!({ "count": 2, "title": "Home", "empty": "" }))
    }

    #[test]
    fn test_literals_and_identifiers() {
        let s = state();
        assert_eq!(eval_exp("42", &s), Ok(Value::from(42)));
        assert_eq!(eval_exp("'hi'", &s), Ok(Value::from("hi")));
        assert_eq!(eval_exp("title", &s), Ok(Value::from("Home")));
        assert_eq!(eval_exp("undefined", &s), Ok(Value::Undefined));
        assert_eq!(eval_exp("`${title}!`", &s), Ok(Value::from("Home!")));
    }

    #[test]
    fn test_operators() {
        let s = state();
        assert_eq!(eval_exp("count * 3 + 1", &s), Ok(Value::from(7)));
        assert_eq!(eval_exp("'n=' + count", &s), Ok(Value::from("n=2")));
        assert_eq!(eval_exp("count > 1 ? 'many' : 'one'", &s), Ok(Value::from("many")));
        assert_eq!(eval_exp("empty || 'fallback'", &s), Ok(Value::from("fallback")));
        assert_eq!(eval_exp("empty ?? 'fallback'", &s), Ok(Value::from("")));
        assert_eq!(eval_exp("!count", &s), Ok(Value::Bool(false)));
        assert_eq!(eval_exp("count === 2", &s), Ok(Value::Bool(true)));
        assert_eq!(eval_exp("typeof missing", &s), Ok(Value::from("undefined")));
    }

    #[test]
    fn test_unknown_identifier_is_an_error() {
        assert_eq!(
            eval_exp("missing + 1", &state()),
            Err(EvalError::UnknownIdentifier {
                name: "missing".to_string()
            })
        );
    }

    #[test]
    fn test_member_access_is_rejected() {
        let err = eval_exp("window.location", &state()).unwrap_err();
        assert!(matches!(err, EvalError::Unsupported { .. }), "{err}");
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            eval_exp("count +", &state()),
            Err(EvalError::Syntax { .. })
        ));
    }

    #[test]
    fn test_calls_and_updates_write_through_store() {
        let s = state();
        s.set(
            "double",
            Value::function(|args| Value::Number(args[0].as_number() * 2.0)),
        );
        assert_eq!(eval_exp("double(count)", &s), Ok(Value::from(4)));
        assert_eq!(exec_statements("count++; count += 10", &s), Ok(Value::from(13)));
        assert_eq!(s.get("count"), Some(Value::from(13)));
        assert!(matches!(
            eval_exp("title()", &s),
            Err(EvalError::NotCallable { .. })
        ));
    }

    #[test]
    fn test_bindings_are_isolated() {
        let s = state();
        let bindings = Bindings::snapshot(&s).with(EVENT_BINDING, Value::from(5));
        assert_eq!(
            exec_statements("count = count + $event; count", &bindings),
            Ok(Value::from(7))
        );
        assert_eq!(s.get("count"), Some(Value::from(2)));
    }

    #[test]
    fn test_event_env_writes_to_state() {
        let s = state();
        let env = EventEnv::new(&s, Value::from("About"));
        exec_statements("title = $event", &env).unwrap();
        assert_eq!(s.get("title"), Some(Value::from("About")));
    }

    #[test]
    fn test_non_expression_statements_are_rejected() {
        let err = exec_statements("if (count) { count = 0 }", &state()).unwrap_err();
        assert!(matches!(err, EvalError::Unsupported { construct: "statement", .. }));
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_valid_identifier("removeBadge"));
        assert!(is_valid_identifier("$event"));
        assert!(!is_valid_identifier("count++"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier(""));
    }
}
