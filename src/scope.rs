//! Compile scopes.
//!
//! Every compile pass runs against a scope: the state expressions resolve
//! against plus the effects created for bindings in that subtree. A component
//! instance gets a child scope over its own state, so tearing down the parent
//! tears down every binding of every nested instance.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::reactive::{Effect, Store};

struct ScopeInner {
    state: Store,
    effects: RefCell<Vec<Effect>>,
    children: RefCell<Vec<CompileScope>>,
    torn_down: Cell<bool>,
}

#[derive(Clone)]
pub struct CompileScope(Rc<ScopeInner>);

impl CompileScope {
    pub fn new(state: Store) -> Self {
        Self(Rc::new(ScopeInner {
            state,
            effects: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
            torn_down: Cell::new(false),
        }))
    }

    pub fn state(&self) -> &Store {
        &self.0.state
    }

    /// Keep `effect` alive for the lifetime of this scope. An effect added
    /// after teardown is stopped right away.
    pub fn add_effect(&self, effect: Effect) {
        if self.0.torn_down.get() {
            effect.stop();
            return;
        }
        self.0.effects.borrow_mut().push(effect);
    }

    /// Nested scope over `state`, owned by this one.
    pub fn child(&self, state: Store) -> CompileScope {
        let child = CompileScope::new(state);
        if self.0.torn_down.get() {
            child.teardown();
        } else {
            self.0.children.borrow_mut().push(child.clone());
        }
        child
    }

    pub fn effect_count(&self) -> usize {
        self.0.effects.borrow().len()
    }

    /// Effects of this scope and every nested scope.
    pub fn total_effect_count(&self) -> usize {
        self.effect_count()
            + self
                .0
                .children
                .borrow()
                .iter()
                .map(CompileScope::total_effect_count)
                .sum::<usize>()
    }

    /// Stop every effect of this scope and its descendants.
    pub fn teardown(&self) {
        if self.0.torn_down.replace(true) {
            return;
        }
        let effects: Vec<Effect> = self.0.effects.borrow_mut().drain(..).collect();
        for effect in effects {
            effect.stop();
        }
        let children: Vec<CompileScope> = self.0.children.borrow_mut().drain(..).collect();
        for child in children {
            child.teardown();
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.0.torn_down.get()
    }
}

impl fmt::Debug for CompileScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileScope")
            .field("effects", &self.effect_count())
            .field("children", &self.0.children.borrow().len())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
