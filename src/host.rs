//! Reference host runtime.
//!
//! Owns the compile pipeline the component resolver plugs into. A compile
//! pass walks a subtree, offers every node to the registered hooks, and binds
//! what the hooks leave alone:
//!
//! - text containing `{{ expr }}` becomes an effect re-rendering the text
//! - `:attr="expr"` becomes an effect setting `attr`
//! - `@event="handler"` registers a listener fired through [`Runtime::dispatch`]
//!
//! Directive attributes are removed from the element once bound.

use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, Node, NodeData};
use regex::{Captures, Regex};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::dom;
use crate::error::EvalResult;
use crate::expr;
use crate::handler::Handler;
use crate::reactive::{watch_effect, Store};
use crate::scope::CompileScope;
use crate::value::Value;

lazy_static! {
    static ref INTERPOLATION_RE: Regex = Regex::new(r"\{\{\s*(.+?)\s*\}\}").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// Runs for every node before the host binds it.
    BeforeCompile,
}

/// What the host does with a node after a hook has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The hook compiled (or removed) the node; skip it and its children.
    Stop,
}

pub type Hook = Rc<dyn Fn(&Runtime, &Handle, &CompileScope) -> Flow>;

struct Listener {
    node: Weak<Node>,
    event: String,
    handler: Handler,
    state: Store,
}

struct RuntimeInner {
    hooks: RefCell<Vec<(HookPoint, Hook)>>,
    listeners: RefCell<Vec<Listener>>,
    diagnostics: Diagnostics,
}

#[derive(Clone)]
pub struct Runtime(Rc<RuntimeInner>);

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self(Rc::new(RuntimeInner {
            hooks: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            diagnostics: Diagnostics::new(),
        }))
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.0.diagnostics
    }

    pub fn add_hook(
        &self,
        point: HookPoint,
        hook: impl Fn(&Runtime, &Handle, &CompileScope) -> Flow + 'static,
    ) {
        self.0.hooks.borrow_mut().push((point, Rc::new(hook)));
    }

    pub fn eval_exp(&self, code: &str, state: &Store) -> EvalResult<Value> {
        expr::eval_exp(code, state)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMPILE
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn compile(&self, node: &Handle, scope: &CompileScope) {
        // Hooks may register further hooks or components while running.
        let hooks: Vec<Hook> = self
            .0
            .hooks
            .borrow()
            .iter()
            .filter(|(point, _)| *point == HookPoint::BeforeCompile)
            .map(|(_, hook)| Rc::clone(hook))
            .collect();
        for hook in hooks {
            if hook(self, node, scope) == Flow::Stop {
                return;
            }
        }

        match &node.data {
            NodeData::Text { .. } => self.bind_text(node, scope),
            NodeData::Element { .. } => self.bind_element(node, scope),
            _ => {}
        }

        for child in dom::children(node) {
            self.compile(&child, scope);
        }
    }

    fn bind_text(&self, node: &Handle, scope: &CompileScope) {
        let Some(template) = dom::text(node) else {
            return;
        };
        if !INTERPOLATION_RE.is_match(&template) {
            return;
        }
        let target = Rc::downgrade(node);
        let state = scope.state().clone();
        let diagnostics = self.0.diagnostics.clone();
        let effect = watch_effect(move || {
            let Some(node) = target.upgrade() else {
                return;
            };
            let rendered = INTERPOLATION_RE.replace_all(&template, |caps: &Captures| {
                match expr::eval_exp(&caps[1], &state) {
                    Ok(value) => value.to_text(),
                    Err(err) => {
                        diagnostics.report(Diagnostic::eval(&caps[1], &err));
                        String::new()
                    }
                }
            });
            dom::set_text(&node, &rendered);
        });
        scope.add_effect(effect);
    }

    fn bind_element(&self, node: &Handle, scope: &CompileScope) {
        for (name, value) in dom::attributes(node) {
            if let Some(attr) = name.strip_prefix(':') {
                dom::remove_attribute(node, &name);
                self.bind_attribute(node, attr.to_string(), value, scope);
            } else if let Some(event) = name.strip_prefix('@') {
                dom::remove_attribute(node, &name);
                self.0.listeners.borrow_mut().push(Listener {
                    node: Rc::downgrade(node),
                    event: event.to_string(),
                    handler: Handler::parse(&value),
                    state: scope.state().clone(),
                });
            }
        }
    }

    fn bind_attribute(&self, node: &Handle, attr: String, expression: String, scope: &CompileScope) {
        let target = Rc::downgrade(node);
        let state = scope.state().clone();
        let diagnostics = self.0.diagnostics.clone();
        let effect = watch_effect(move || {
            let Some(node) = target.upgrade() else {
                return;
            };
            match expr::eval_exp(&expression, &state) {
                Ok(Value::Bool(false) | Value::Null | Value::Undefined) => {
                    dom::remove_attribute(&node, &attr);
                }
                Ok(Value::Bool(true)) => dom::set_attribute(&node, &attr, ""),
                Ok(value) => dom::set_attribute(&node, &attr, &value.to_text()),
                Err(err) => diagnostics.report(Diagnostic::eval(&expression, &err)),
            }
        });
        scope.add_effect(effect);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DOCUMENTS & EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Parse `html` into a detached container and compile it against `state`.
    pub fn mount(&self, html: &str, state: Store) -> Mounted {
        let root = dom::create_element("div");
        for node in dom::parse_fragment(html) {
            dom::append_child(&root, node);
        }
        let scope = CompileScope::new(state);
        for child in dom::children(&root) {
            self.compile(&child, &scope);
        }
        debug!(effects = scope.total_effect_count(), "mounted document");
        Mounted { root, scope }
    }

    /// Fire `event` on `node`. Returns how many listeners ran.
    pub fn dispatch(&self, node: &Handle, event: &str, args: &[Value]) -> usize {
        let matching: Vec<(Handler, Store)> = {
            let mut listeners = self.0.listeners.borrow_mut();
            listeners.retain(|l| l.node.strong_count() > 0);
            listeners
                .iter()
                .filter(|l| l.event == event)
                .filter(|l| l.node.upgrade().is_some_and(|n| Rc::ptr_eq(&n, node)))
                .map(|l| (l.handler.clone(), l.state.clone()))
                .collect()
        };
        trace!(event, listeners = matching.len(), "dispatch");
        for (handler, state) in &matching {
            if let Err(err) = handler.invoke(state, args) {
                self.0
                    .diagnostics
                    .report(Diagnostic::eval(handler.source(), &err));
            }
        }
        matching.len()
    }

    pub fn listener_count(&self) -> usize {
        self.0
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.node.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("hooks", &self.0.hooks.borrow().len())
            .field("listeners", &self.0.listeners.borrow().len())
            .finish()
    }
}

/// A compiled document.
#[derive(Debug)]
pub struct Mounted {
    root: Handle,
    scope: CompileScope,
}

impl Mounted {
    /// Serialized contents of the document.
    pub fn html(&self) -> String {
        dom::inner_html(&self.root)
    }

    pub fn root(&self) -> &Handle {
        &self.root
    }

    pub fn scope(&self) -> &CompileScope {
        &self.scope
    }

    pub fn find_first(&self, tag: &str) -> Option<Handle> {
        dom::find_by_tag(&self.root, tag)
    }

    /// Stop every binding. The tree keeps its last rendered state.
    pub fn unmount(self) {
        self.scope.teardown();
    }
}
