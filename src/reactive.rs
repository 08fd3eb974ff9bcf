//! Reactive state for the host runtime.
//!
//! A [`Store`] is a key-value container whose reads are tracked while an
//! [`Effect`] runs. Writing a key re-runs, synchronously, every effect that
//! read that key during its last run. Dependencies are collected again on each
//! run, so an effect only ever reacts to what it actually read last time.
//!
//! Everything here is single-threaded: handles are `Rc` based and the observer
//! stack is thread-local.

use serde_json::Value as JsonValue;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::value::{Function, Value};

static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static OBSERVERS: RefCell<Vec<Rc<EffectInner>>> = const { RefCell::new(Vec::new()) };
}

// ═══════════════════════════════════════════════════════════════════════════════
// EFFECTS
// ═══════════════════════════════════════════════════════════════════════════════

struct EffectInner {
    id: u64,
    run: Box<dyn Fn()>,
    deps: RefCell<Vec<(Weak<StoreInner>, String)>>,
    active: Cell<bool>,
    running: Cell<bool>,
}

impl EffectInner {
    fn execute(self: &Rc<Self>) {
        // A write made by the effect itself must not re-enter it.
        if !self.active.get() || self.running.get() {
            return;
        }
        self.running.set(true);
        self.clear_deps();
        OBSERVERS.with(|observers| observers.borrow_mut().push(Rc::clone(self)));
        (self.run)();
        OBSERVERS.with(|observers| {
            observers.borrow_mut().pop();
        });
        self.running.set(false);
    }

    fn clear_deps(&self) {
        let deps: Vec<_> = self.deps.borrow_mut().drain(..).collect();
        for (store, key) in deps {
            if let Some(store) = store.upgrade() {
                store.unsubscribe(&key, self.id);
            }
        }
    }
}

/// Handle to a reactive computation created by [`watch_effect`].
///
/// The computation lives as long as a handle does; compile scopes keep the
/// handles of the bindings they own.
#[derive(Clone)]
pub struct Effect(Rc<EffectInner>);

impl Effect {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Stop reacting. The effect never runs again.
    pub fn stop(&self) {
        self.0.active.set(false);
        self.0.clear_deps();
    }

    /// Number of (store, key) pairs read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.0.deps.borrow().len()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.0.id)
            .field("active", &self.0.active.get())
            .finish()
    }
}

/// Run `f` now and again whenever a store key it read changes.
pub fn watch_effect(f: impl Fn() + 'static) -> Effect {
    let inner = Rc::new(EffectInner {
        id: EFFECT_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
        run: Box::new(f),
        deps: RefCell::new(Vec::new()),
        active: Cell::new(true),
        running: Cell::new(false),
    });
    inner.execute();
    Effect(inner)
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct StoreInner {
    values: RefCell<BTreeMap<String, Value>>,
    methods: RefCell<HashMap<String, Function>>,
    subscribers: RefCell<HashMap<String, Vec<(u64, Weak<EffectInner>)>>>,
}

impl StoreInner {
    fn unsubscribe(&self, key: &str, effect_id: u64) {
        let mut subscribers = self.subscribers.borrow_mut();
        if let Some(list) = subscribers.get_mut(key) {
            list.retain(|(id, _)| *id != effect_id);
            if list.is_empty() {
                subscribers.remove(key);
            }
        }
    }
}

/// Reactive key-value state.
///
/// Cloning a `Store` yields another handle to the same state. Methods are kept
/// apart from data: they are visible to expressions through [`Store::lookup`]
/// but never show up in [`Store::keys`] or [`Store::snapshot`].
#[derive(Clone, Default)]
pub struct Store(Rc<StoreInner>);

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from the entries of a JSON object. Non-object input
    /// yields an empty store.
    pub fn from_json(json: JsonValue) -> Self {
        let store = Store::new();
        if let JsonValue::Object(entries) = json {
            for (key, value) in entries {
                store.set(key, Value::from(value));
            }
        }
        store
    }

    /// Read a data entry, recording a dependency for the running effect.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.track(key);
        self.0.values.borrow().get(key).cloned()
    }

    /// Read a data entry, falling back to methods. This is the view
    /// expressions have of the store.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        match self.get(name) {
            Some(value) => Some(value),
            None => self.method(name).map(Value::Function),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.track(key);
        self.0.values.borrow().contains_key(key)
    }

    /// Write a data entry. Dependent effects re-run before this returns,
    /// unless the value is unchanged.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let changed = {
            let mut values = self.0.values.borrow_mut();
            match values.get(&key) {
                Some(existing) if *existing == value => false,
                _ => {
                    values.insert(key.clone(), value);
                    true
                }
            }
        };
        if changed {
            self.trigger(&key);
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.0.values.borrow_mut().remove(key);
        if removed.is_some() {
            self.trigger(key);
        }
        removed
    }

    /// Data keys in sorted order (untracked).
    pub fn keys(&self) -> Vec<String> {
        self.0.values.borrow().keys().cloned().collect()
    }

    /// Copy of all data entries (untracked).
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.0.values.borrow().clone()
    }

    pub fn define_method(&self, name: impl Into<String>, method: Function) {
        self.0.methods.borrow_mut().insert(name.into(), method);
    }

    pub fn method(&self, name: &str) -> Option<Function> {
        self.0.methods.borrow().get(name).cloned()
    }

    pub fn methods(&self) -> Vec<(String, Function)> {
        self.0
            .methods
            .borrow()
            .iter()
            .map(|(name, method)| (name.clone(), method.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live effects currently subscribed to `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.0
            .subscribers
            .borrow()
            .get(key)
            .map_or(0, |list| list.iter().filter(|(_, w)| w.strong_count() > 0).count())
    }

    fn track(&self, key: &str) {
        OBSERVERS.with(|observers| {
            let observers = observers.borrow();
            let Some(effect) = observers.last() else {
                return;
            };
            let mut subscribers = self.0.subscribers.borrow_mut();
            let list = subscribers.entry(key.to_string()).or_default();
            if !list.iter().any(|(id, _)| *id == effect.id) {
                list.push((effect.id, Rc::downgrade(effect)));
                effect
                    .deps
                    .borrow_mut()
                    .push((Rc::downgrade(&self.0), key.to_string()));
            }
        });
    }

    fn trigger(&self, key: &str) {
        let effects: Vec<Rc<EffectInner>> = {
            let subscribers = self.0.subscribers.borrow();
            subscribers
                .get(key)
                .map(|list| list.iter().filter_map(|(_, w)| w.upgrade()).collect())
                .unwrap_or_default()
        };
        for effect in effects {
            effect.execute();
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("values", &self.0.values.borrow())
            .field("methods", &self.0.methods.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter() -> (Rc<Cell<usize>>, impl Fn()) {
        let runs = Rc::new(Cell::new(0));
        let handle = Rc::clone(&runs);
        (runs, move || handle.set(handle.get() + 1))
    }

    #[test]
    fn test_effect_runs_immediately_and_on_change() {
        let store = Store::from_json(json!({ "n": 1 }));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (s, log) = (store.clone(), Rc::clone(&seen));
        let _effect = watch_effect(move || log.borrow_mut().push(s.get("n")));

        store.set("n", 2);
        assert_eq!(
            *seen.borrow(),
            vec![Some(Value::from(1)), Some(Value::from(2))]
        );
    }

    #[test]
    fn test_unrelated_and_identical_writes_do_not_rerun() {
        let store = Store::from_json(json!({ "a": 1, "b": 1 }));
        let (runs, bump) = counter();
        let s = store.clone();
        let _effect = watch_effect(move || {
            s.get("a");
            bump();
        });

        store.set("b", 5);
        store.set("a", 1);
        assert_eq!(runs.get(), 1);

        store.set("a", 2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_dependencies_are_recollected_each_run() {
        let store = Store::from_json(json!({ "flag": true, "x": 1, "y": 1 }));
        let (runs, bump) = counter();
        let s = store.clone();
        let _effect = watch_effect(move || {
            let flag = s.get("flag").map_or(false, |v| v.is_truthy());
            if flag {
                s.get("x");
            } else {
                s.get("y");
            }
            bump();
        });

        store.set("flag", false);
        assert_eq!(runs.get(), 2);
        store.set("x", 2);
        assert_eq!(runs.get(), 2, "x is no longer read");
        store.set("y", 2);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_stop_and_drop_end_reactivity() {
        let store = Store::from_json(json!({ "n": 0 }));
        let (runs, bump) = counter();
        let s = store.clone();
        let effect = watch_effect(move || {
            s.get("n");
            bump();
        });
        effect.stop();
        store.set("n", 1);
        assert_eq!(runs.get(), 1);
        assert!(!effect.is_active());

        let (runs, bump) = counter();
        let s = store.clone();
        let effect = watch_effect(move || {
            s.get("n");
            bump();
        });
        drop(effect);
        store.set("n", 2);
        assert_eq!(runs.get(), 1);
        assert_eq!(store.subscriber_count("n"), 0);
    }

    #[test]
    fn test_self_write_does_not_loop() {
        let store = Store::from_json(json!({ "n": 0 }));
        let s = store.clone();
        let _effect = watch_effect(move || {
            let n = s.get("n").map_or(0.0, |v| v.as_number());
            s.set("n", n + 1.0);
        });
        assert_eq!(store.get("n"), Some(Value::from(1)));
    }

    #[test]
    fn test_nested_effects_track_their_own_reads() {
        let parent = Store::from_json(json!({ "title": "Home" }));
        let child = Store::new();
        let rendered = Rc::new(RefCell::new(String::new()));

        let (c, out) = (child.clone(), Rc::clone(&rendered));
        let _render = watch_effect(move || {
            *out.borrow_mut() = c.get("label").map(|v| v.to_text()).unwrap_or_default();
        });
        let (p, c) = (parent.clone(), child.clone());
        let _bind = watch_effect(move || {
            if let Some(title) = p.get("title") {
                c.set("label", title);
            }
        });

        assert_eq!(*rendered.borrow(), "Home");
        parent.set("title", "About");
        assert_eq!(*rendered.borrow(), "About");
        assert_eq!(parent.subscriber_count("title"), 1);
        assert_eq!(child.subscriber_count("label"), 1);
    }

    #[test]
    fn test_methods_are_visible_but_not_data() {
        let store = Store::new();
        store.define_method("emit", Function::new(|_| Value::Null));
        assert!(store.keys().is_empty());
        assert!(store.snapshot().is_empty());
        assert!(matches!(store.lookup("emit"), Some(Value::Function(_))));
        assert_eq!(store.get("emit"), None);
    }
}
