//! Component registry and the resolve hook.
//!
//! [`Components::install`] registers a before-compile hook on a [`Runtime`].
//! When the host reaches an element whose tag names a registered component,
//! the hook replaces it with a fresh instance of the component's template:
//!
//! 1. the template is parsed and must have exactly one root element
//! 2. usage attributes become props, listeners, class/style merges
//! 3. `emit` and `setup` populate the instance state
//! 4. usage children are compiled against the parent and projected into slots
//! 5. the root is compiled against a child scope over the instance state
//!
//! Failures never escape the hook: they are reported as diagnostics and the
//! offending element is removed.

use markup5ever_rcdom::Handle;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::attrs::{self, AttrBinding};
use crate::config::ResolverConfig;
use crate::diagnostics::Diagnostics;
use crate::dom;
use crate::error::ComponentError;
use crate::handler::Handler;
use crate::host::{Flow, HookPoint, Runtime};
use crate::reactive::{watch_effect, Store};
use crate::scope::CompileScope;
use crate::value::{Function, Value};

/// Called once per instance with the instance state. Returned entries are
/// merged into the state and take precedence over props.
pub type Setup = Rc<dyn Fn(&Store, &SetupContext) -> Option<HashMap<String, Value>>>;

#[derive(Clone)]
pub struct ComponentDefinition {
    template: String,
    setup: Option<Setup>,
}

impl ComponentDefinition {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            setup: None,
        }
    }

    pub fn with_setup(
        mut self,
        setup: impl Fn(&Store, &SetupContext) -> Option<HashMap<String, Value>> + 'static,
    ) -> Self {
        self.setup = Some(Rc::new(setup));
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn setup(&self) -> Option<&Setup> {
        self.setup.as_ref()
    }
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("template", &self.template)
            .field("setup", &self.setup.is_some())
            .finish()
    }
}

pub type Registry = HashMap<String, Rc<ComponentDefinition>>;

// ═══════════════════════════════════════════════════════════════════════════════
// EMIT
// ═══════════════════════════════════════════════════════════════════════════════

struct EmitterInner {
    component: String,
    listeners: HashMap<String, Handler>,
    parent: Store,
    diagnostics: Diagnostics,
}

/// Child-to-parent event channel of one component instance.
#[derive(Clone)]
pub struct Emitter(Rc<EmitterInner>);

impl Emitter {
    fn new(
        component: &str,
        listeners: HashMap<String, Handler>,
        parent: Store,
        diagnostics: Diagnostics,
    ) -> Self {
        Self(Rc::new(EmitterInner {
            component: component.to_string(),
            listeners,
            parent,
            diagnostics,
        }))
    }

    /// Deliver `event` to the listener bound at the usage site. An event
    /// nobody listens to is reported and otherwise ignored.
    pub fn emit(&self, event: &str, args: &[Value]) {
        let Some(handler) = self.0.listeners.get(event) else {
            self.0.diagnostics.report_component(&ComponentError::UnknownEvent {
                component: self.0.component.clone(),
                event: event.to_string(),
            });
            return;
        };
        trace!(component = %self.0.component, event, "emit");
        if let Err(error) = handler.invoke_isolated(&self.0.parent, args) {
            self.0.diagnostics.report_component(&ComponentError::EmitDispatch {
                component: self.0.component.clone(),
                event: event.to_string(),
                error,
            });
        }
    }

    pub fn has_listener(&self, event: &str) -> bool {
        self.0.listeners.contains_key(event)
    }

    /// `emit(event, ...args)` as seen from template expressions.
    fn to_function(&self) -> Function {
        let emitter = self.clone();
        Function::new(move |args| {
            let event = args.first().map(Value::to_text).unwrap_or_default();
            emitter.emit(&event, args.get(1..).unwrap_or(&[]));
            Value::Undefined
        })
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("component", &self.0.component)
            .field("listeners", &self.0.listeners)
            .finish()
    }
}

/// Capabilities handed to `setup`.
#[derive(Debug, Clone)]
pub struct SetupContext {
    emitter: Emitter,
}

impl SetupContext {
    pub fn emit(&self, event: &str, args: &[Value]) {
        self.emitter.emit(event, args);
    }

    /// The emitter itself, for closures returned from `setup`.
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY & HOOK
// ═══════════════════════════════════════════════════════════════════════════════

/// The component plugin installed into one runtime.
#[derive(Clone)]
pub struct Components {
    registry: Rc<RefCell<Registry>>,
    config: Rc<ResolverConfig>,
    diagnostics: Diagnostics,
    depth: Rc<Cell<usize>>,
}

impl Components {
    pub fn install(runtime: &Runtime) -> Self {
        Self::install_with(runtime, ResolverConfig::default())
    }

    pub fn install_with(runtime: &Runtime, config: ResolverConfig) -> Self {
        runtime.diagnostics().set_limit(config.diagnostic_limit);
        let components = Self {
            registry: Rc::new(RefCell::new(Registry::new())),
            config: Rc::new(config),
            diagnostics: runtime.diagnostics().clone(),
            depth: Rc::new(Cell::new(0)),
        };
        let hook = components.clone();
        runtime.add_hook(HookPoint::BeforeCompile, move |runtime, node, scope| {
            hook.resolve(runtime, node, scope)
        });
        components
    }

    /// Register `definition` under `name` (case-insensitive). Re-registering
    /// replaces the previous definition.
    pub fn register(&self, name: &str, definition: ComponentDefinition) -> Result<(), ComponentError> {
        let key = name.trim().to_lowercase();
        let reason = if key.is_empty() {
            Some("name is empty")
        } else if definition.template.trim().is_empty() {
            Some("template is empty")
        } else {
            None
        };
        if let Some(reason) = reason {
            let err = ComponentError::Registration {
                name: name.to_string(),
                reason,
            };
            self.diagnostics.report_component(&err);
            return Err(err);
        }
        debug!(component = %key, setup = definition.setup.is_some(), "registered component");
        self.registry.borrow_mut().insert(key, Rc::new(definition));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.registry
            .borrow_mut()
            .remove(&name.trim().to_lowercase())
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry
            .borrow()
            .contains_key(&name.trim().to_lowercase())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Match a tag against the registry: the prefix-stripped name first,
    /// then the full tag.
    fn lookup(&self, tag: &str) -> Option<(String, Rc<ComponentDefinition>)> {
        let tag = tag.to_lowercase();
        let registry = self.registry.borrow();
        let prefix = self.config.prefix.to_lowercase();
        let stripped = match tag.strip_prefix(prefix.as_str()) {
            Some(rest) if !prefix.is_empty() && !rest.is_empty() => Some(rest),
            _ => None,
        };
        stripped
            .into_iter()
            .chain(std::iter::once(tag.as_str()))
            .find_map(|name| {
                registry
                    .get(name)
                    .map(|definition| (name.to_string(), Rc::clone(definition)))
            })
    }

    /// The before-compile hook.
    pub fn resolve(&self, runtime: &Runtime, node: &Handle, parent_scope: &CompileScope) -> Flow {
        let Some(tag) = dom::tag_name(node) else {
            return Flow::Continue;
        };
        let Some((name, definition)) = self.lookup(&tag) else {
            return Flow::Continue;
        };

        if self.depth.get() >= self.config.max_depth {
            self.reject(
                node,
                ComponentError::RecursionLimit {
                    name,
                    limit: self.config.max_depth,
                },
            );
            return Flow::Stop;
        }

        let root = match instantiate_template(&name, definition.template()) {
            Ok(root) => root,
            Err(err) => {
                self.reject(node, err);
                return Flow::Stop;
            }
        };
        debug!(component = %name, depth = self.depth.get(), "instantiating component");

        let child_state = Store::new();
        let mut listeners = HashMap::new();
        for (attr, value) in dom::attributes(node) {
            match attrs::classify(&attr, &value) {
                AttrBinding::Prop { name: prop, expression } => {
                    self.bind_prop(runtime, &name, prop, expression, parent_scope, &child_state);
                }
                AttrBinding::Listener { event, handler } => {
                    listeners.insert(event, handler);
                }
                AttrBinding::Class(tokens) => dom::add_classes(&root, &tokens),
                AttrBinding::Style(style) => {
                    dom::append_style(&root, &style, &self.config.style_separator);
                }
                AttrBinding::SlotTarget(_) => {}
                AttrBinding::Static { name: prop, value } => child_state.set(prop, value),
            }
        }

        let emitter = Emitter::new(
            &name,
            listeners,
            parent_scope.state().clone(),
            self.diagnostics.clone(),
        );
        child_state.define_method("emit", emitter.to_function());
        if let Some(setup) = definition.setup() {
            let context = SetupContext { emitter };
            if let Some(entries) = setup(&child_state, &context) {
                for (key, value) in entries {
                    child_state.set(key, value);
                }
            }
        }

        let projections = self.collect_projections(runtime, node, &root, parent_scope);

        if !dom::replace_with(node, root.clone()) {
            debug!(component = %name, "usage element has no parent, instance stays detached");
        }

        let child_scope = parent_scope.child(child_state);
        self.depth.set(self.depth.get() + 1);
        runtime.compile(&root, &child_scope);
        self.depth.set(self.depth.get() - 1);

        for projection in projections {
            projection.place();
        }
        Flow::Stop
    }

    fn reject(&self, node: &Handle, err: ComponentError) {
        self.diagnostics.report_component(&err);
        dom::detach(node);
    }

    fn bind_prop(
        &self,
        runtime: &Runtime,
        component: &str,
        prop: String,
        expression: String,
        parent_scope: &CompileScope,
        child_state: &Store,
    ) {
        let runtime = runtime.clone();
        let parent_state = parent_scope.state().clone();
        let child_state = child_state.clone();
        let diagnostics = self.diagnostics.clone();
        let component = component.to_string();
        let effect = watch_effect(move || match runtime.eval_exp(&expression, &parent_state) {
            Ok(value) => child_state.set(prop.as_str(), value),
            Err(error) => diagnostics.report_component(&ComponentError::PropEvaluation {
                component: component.clone(),
                prop: prop.clone(),
                expression: expression.clone(),
                error,
            }),
        });
        parent_scope.add_effect(effect);
    }

    /// Move usage children into per-slot holders and compile them against the
    /// parent scope. Slots that get nothing keep their fallback children.
    fn collect_projections(
        &self,
        runtime: &Runtime,
        usage: &Handle,
        root: &Handle,
        parent_scope: &CompileScope,
    ) -> Vec<Projection> {
        let slot_tag = self.config.slot_tag.to_lowercase();
        let mut projections: Vec<Projection> = dom::find_all(root, &|n: &Handle| {
            dom::tag_name(n).as_deref() == Some(slot_tag.as_str())
        })
        .into_iter()
        .map(Projection::new)
        .collect();

        for child in dom::children(usage) {
            let target = match dom::get_attribute(&child, "slot") {
                Some(slot) => projections
                    .iter()
                    .position(|p| p.name.as_deref() == Some(slot.as_str())),
                None => projections.iter().position(|p| p.name.is_none()),
            };
            match target {
                Some(index) => {
                    dom::remove_attribute(&child, "slot");
                    dom::append_child(&projections[index].holder, child);
                }
                None => {
                    trace!("discarding child with no matching slot");
                    dom::detach(&child);
                }
            }
        }

        for projection in &mut projections {
            projection.filled = dom::children(&projection.holder)
                .iter()
                .any(|n| !dom::is_insignificant(n));
            if projection.filled {
                for fallback in dom::children(&projection.marker) {
                    dom::detach(&fallback);
                }
                for node in dom::children(&projection.holder) {
                    runtime.compile(&node, parent_scope);
                }
            }
        }
        projections
    }
}

impl fmt::Debug for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Components")
            .field("names", &self.names())
            .field("config", &self.config)
            .finish()
    }
}

/// Parse a template and return its single root element. Stray text next to
/// the root also breaks the shape.
fn instantiate_template(name: &str, template: &str) -> Result<Handle, ComponentError> {
    let (elements, other): (Vec<Handle>, Vec<Handle>) = dom::parse_template(template)
        .into_iter()
        .filter(|n| !dom::is_insignificant(n))
        .partition(dom::is_element);
    match (elements.as_slice(), other.is_empty()) {
        ([root], true) => Ok(root.clone()),
        _ => Err(ComponentError::TemplateShape {
            name: name.to_string(),
            roots: elements.len(),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SLOTS
// ═══════════════════════════════════════════════════════════════════════════════

struct Projection {
    /// `None` for the unnamed slot.
    name: Option<String>,
    marker: Handle,
    holder: Handle,
    filled: bool,
}

impl Projection {
    fn new(marker: Handle) -> Self {
        let name = dom::get_attribute(&marker, "name").filter(|n| !n.trim().is_empty());
        Self {
            name,
            marker,
            holder: dom::create_element("div"),
            filled: false,
        }
    }

    /// Replace the marker with its content (projected or fallback).
    fn place(self) {
        let content = if self.filled {
            dom::children(&self.holder)
        } else {
            dom::children(&self.marker)
        };
        for node in content {
            dom::insert_before(&self.marker, node);
        }
        dom::detach(&self.marker);
    }
}
