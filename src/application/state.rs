//! Reactive state store and the state manager tying it to evaluation.
//!
//! Every component implementation publishes its live state through
//! [`StateStore::merge_state`] and other parts of the runtime observe it
//! through [`StateStore::watch`]. The store is single-threaded shared mutable
//! state: all writes happen on the UI thread, so last-write-wins semantics
//! apply without locks. It is an explicitly passed handle (created with
//! `StateStore::new`, disposed by drop), never ambient global state.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::domain::{EvalOptions, EvalResult, MaskedEvaluator, Scope, Value};

type WatchCallback = Box<dyn Fn(&Value)>;

struct Watcher {
    id: u64,
    /// Dotted store path, e.g. `"input1.value"`.
    path: String,
    /// First path segment: the component id whose writes can affect us.
    root: String,
    last: RefCell<Value>,
    callback: WatchCallback,
}

#[derive(Default)]
struct StoreInner {
    states: RefCell<HashMap<String, HashMap<String, Value>>>,
    watchers: RefCell<Vec<Rc<Watcher>>>,
    next_watcher_id: Cell<u64>,
}

/// Shared reactive state container keyed by component/module instance id.
///
/// Entries are created lazily on first write and never implicitly deleted;
/// an absent key reads as `Undefined`. Cloning the handle shares the same
/// underlying store.
#[derive(Clone, Default)]
pub struct StateStore {
    inner: Rc<StoreInner>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow-merges `partial` into the state record at `component_id`,
    /// creating the record if absent, then synchronously notifies watchers
    /// of that component in registration order.
    pub fn merge_state(&self, component_id: &str, partial: HashMap<String, Value>) {
        {
            let mut states = self.inner.states.borrow_mut();
            let record = states.entry(component_id.to_string()).or_default();
            for (field, value) in partial {
                record.insert(field, value);
            }
        }
        trace!(component = component_id, "merged component state");
        self.notify(component_id);
    }

    /// Resolves a dotted store path. The first segment is a component id,
    /// the rest walks into its fields; any absent segment reads as
    /// `Undefined`.
    pub fn get(&self, path: &str) -> Value {
        let (root, rest) = match path.split_once('.') {
            Some((root, rest)) => (root, Some(rest)),
            None => (path, None),
        };
        let states = self.inner.states.borrow();
        match states.get(root) {
            None => Value::Undefined,
            Some(fields) => {
                let record = Value::Object(fields.clone());
                match rest {
                    None => record,
                    Some(rest) => record.get_path(rest),
                }
            }
        }
    }

    /// Snapshot of a single component's state record.
    pub fn state_of(&self, component_id: &str) -> Option<HashMap<String, Value>> {
        self.inner.states.borrow().get(component_id).cloned()
    }

    /// Snapshot of the whole store as an evaluation scope: each component id
    /// maps to an object of its fields.
    pub fn snapshot_scope(&self) -> Scope {
        self.inner
            .states
            .borrow()
            .iter()
            .map(|(id, fields)| (id.clone(), Value::Object(fields.clone())))
            .collect()
    }

    /// Registers a subscription on a dotted store path. The callback fires
    /// synchronously whenever the resolved value changes, in registration
    /// order for a given component. The returned guard disposes the
    /// subscription on [`WatchGuard::dispose`] or drop; the owning component
    /// instance must dispose it on unmount to avoid leaked watchers.
    pub fn watch(&self, path: &str, callback: impl Fn(&Value) + 'static) -> WatchGuard {
        let id = self.inner.next_watcher_id.get();
        self.inner.next_watcher_id.set(id + 1);

        let root = path.split('.').next().unwrap_or_default().to_string();
        let watcher = Rc::new(Watcher {
            id,
            path: path.to_string(),
            root,
            last: RefCell::new(self.get(path)),
            callback: Box::new(callback),
        });
        self.inner.watchers.borrow_mut().push(watcher);

        WatchGuard {
            id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn notify(&self, component_id: &str) {
        // Snapshot the interested watchers first: a callback may merge
        // state again or register/dispose watchers re-entrantly.
        let interested: Vec<Rc<Watcher>> = self
            .inner
            .watchers
            .borrow()
            .iter()
            .filter(|w| w.root == component_id)
            .cloned()
            .collect();

        for watcher in interested {
            let current = self.get(&watcher.path);
            let changed = *watcher.last.borrow() != current;
            if changed {
                *watcher.last.borrow_mut() = current.clone();
                (watcher.callback)(&current);
            }
        }
    }
}

/// Disposer for a [`StateStore::watch`] subscription.
///
/// The subscription is removed when `dispose` is called or the guard is
/// dropped.
pub struct WatchGuard {
    id: u64,
    inner: Weak<StoreInner>,
}

impl WatchGuard {
    pub fn dispose(self) {}
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.watchers.borrow_mut().retain(|w| w.id != self.id);
        }
    }
}

/// Externally-invokable imperative method registered by a component (e.g.
/// `setInputValue`). The engine exposes the registration contract; dispatch
/// is routed by other subsystems.
pub type MethodHandler = Rc<dyn Fn(Value)>;

/// Owns the state store and composes it into expression evaluation.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use bindstate::application::StateManager;
/// use bindstate::domain::{EvalOptions, Value};
///
/// let manager = StateManager::new();
/// manager.merge_state(
///     "input1",
///     HashMap::from([("value".to_string(), Value::from("world"))]),
/// );
///
/// let result = manager
///     .masked_eval("Hello, {{ input1.value }}!", &EvalOptions::default())
///     .unwrap();
/// assert_eq!(result, Value::from("Hello, world!"));
/// ```
#[derive(Default)]
pub struct StateManager {
    store: StateStore,
    methods: RefCell<HashMap<String, HashMap<String, MethodHandler>>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying store handle.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Publishes component state; see [`StateStore::merge_state`].
    pub fn merge_state(&self, component_id: &str, partial: HashMap<String, Value>) {
        self.store.merge_state(component_id, partial);
    }

    /// Resolves a bound template string against the live store. The ambient
    /// scope is a store snapshot (component id to state object), extended or
    /// replaced by `options.scope_object`.
    pub fn masked_eval(&self, input: &str, options: &EvalOptions) -> EvalResult {
        let ambient = self.store.snapshot_scope();
        MaskedEvaluator::new(&ambient).evaluate(input, options)
    }

    /// Deep-resolves every string leaf of a properties/handlers tree against
    /// the live store. Failing leaves keep their original text.
    pub fn masked_eval_deep(&self, root: &Value, options: &EvalOptions) -> Value {
        let ambient = self.store.snapshot_scope();
        MaskedEvaluator::new(&ambient).evaluate_deep(root, options)
    }

    /// Deep-resolve limited to string leaves that reference a key of
    /// `options.scope_object`; everything else passes through untouched.
    pub fn masked_eval_deep_scoped(&self, root: &Value, options: &EvalOptions) -> Value {
        let ambient = self.store.snapshot_scope();
        MaskedEvaluator::new(&ambient).evaluate_deep_scoped(root, options)
    }

    /// Registers (or replaces) the imperative methods a component exposes.
    pub fn subscribe_methods(
        &self,
        component_id: &str,
        methods: HashMap<String, MethodHandler>,
    ) {
        debug!(
            component = component_id,
            count = methods.len(),
            "subscribed component methods"
        );
        self.methods
            .borrow_mut()
            .entry(component_id.to_string())
            .or_default()
            .extend(methods);
    }

    /// Looks up a registered method handler.
    pub fn method_handler(&self, component_id: &str, name: &str) -> Option<MethodHandler> {
        self.methods
            .borrow()
            .get(component_id)
            .and_then(|map| map.get(name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(json: serde_json::Value) -> HashMap<String, Value> {
        match Value::from(json) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_merge_state_creates_lazily() {
        let store = StateStore::new();
        assert_eq!(store.get("input1"), Value::Undefined);
        assert_eq!(store.get("input1.value"), Value::Undefined);

        store.merge_state("input1", fields(json!({"value": "world"})));
        assert_eq!(store.get("input1.value"), Value::from("world"));

        // Shallow merge keeps untouched fields.
        store.merge_state("input1", fields(json!({"disabled": false})));
        assert_eq!(store.get("input1.value"), Value::from("world"));
        assert_eq!(store.get("input1.disabled"), Value::Bool(false));
    }

    #[test]
    fn test_last_write_wins() {
        let store = StateStore::new();
        store.merge_state("shared", fields(json!({"value": 1})));
        store.merge_state("shared", fields(json!({"value": 2})));
        assert_eq!(store.get("shared.value"), Value::Number(2.0));
    }

    #[test]
    fn test_watch_fires_on_change_only() {
        let store = StateStore::new();
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let _guard = store.watch("input1.value", move |v| {
            sink.borrow_mut().push(v.clone());
        });

        store.merge_state("input1", fields(json!({"value": "a"})));
        store.merge_state("input1", fields(json!({"value": "a"})));
        store.merge_state("input1", fields(json!({"value": "b"})));
        // Writes to other components never fire this watcher.
        store.merge_state("other", fields(json!({"value": "c"})));

        assert_eq!(
            *seen.borrow(),
            vec![Value::from("a"), Value::from("b")]
        );
    }

    #[test]
    fn test_watchers_fire_in_registration_order() {
        let store = StateStore::new();
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let first = order.clone();
        let _g1 = store.watch("input1.value", move |_| first.borrow_mut().push("first"));
        let second = order.clone();
        let _g2 = store.watch("input1.value", move |_| second.borrow_mut().push("second"));

        store.merge_state("input1", fields(json!({"value": "x"})));
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_watch_guard_dispose() {
        let store = StateStore::new();
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let guard = store.watch("input1.value", move |v| {
            sink.borrow_mut().push(v.clone());
        });

        store.merge_state("input1", fields(json!({"value": "a"})));
        guard.dispose();
        store.merge_state("input1", fields(json!({"value": "b"})));

        assert_eq!(*seen.borrow(), vec![Value::from("a")]);
    }

    #[test]
    fn test_reentrant_merge_from_callback() {
        // The module state-mirroring pattern: a watcher copies a source
        // field into another component's record from inside the callback.
        let store = StateStore::new();
        let mirror = store.clone();
        let _guard = store.watch("source.value", move |v| {
            mirror.merge_state(
                "mirrorComp",
                HashMap::from([("value".to_string(), v.clone())]),
            );
        });

        store.merge_state("source", fields(json!({"value": "synced"})));
        assert_eq!(store.get("mirrorComp.value"), Value::from("synced"));
    }

    #[test]
    fn test_masked_eval_sees_store_state() {
        let manager = StateManager::new();
        manager.merge_state("input1", fields(json!({"value": "world"})));
        manager.merge_state("checkbox", fields(json!({"value": true})));

        let options = EvalOptions {
            no_log_error: true,
            ..EvalOptions::default()
        };
        assert_eq!(
            manager.masked_eval("{{ input1.value }}", &options).unwrap(),
            Value::from("world")
        );
        assert_eq!(
            manager
                .masked_eval("{{ checkbox.value ? 'on' : 'off' }}", &options)
                .unwrap(),
            Value::from("on")
        );

        // Store state becomes invisible under an override scope.
        let override_options = EvalOptions {
            scope_object: fields(json!({"only": 1})),
            override_scope: true,
            no_log_error: true,
            ..EvalOptions::default()
        };
        assert!(manager
            .masked_eval("{{ input1.value }}", &override_options)
            .is_err());
    }

    #[test]
    fn test_masked_eval_deep_against_store() {
        let manager = StateManager::new();
        manager.merge_state("input1", fields(json!({"value": "world"})));

        let handlers = Value::from(json!([
            {"method": {"name": "setValue", "parameters": {"value": "{{ input1.value }}"}}}
        ]));
        let options = EvalOptions {
            no_log_error: true,
            ..EvalOptions::default()
        };
        let resolved = manager.masked_eval_deep(&handlers, &options);
        assert_eq!(
            resolved.get_path("0.method.parameters.value"),
            Value::from("world")
        );
    }

    #[test]
    fn test_subscribe_methods_lookup_and_invoke() {
        let manager = StateManager::new();
        let received: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = received.clone();
        let handler: MethodHandler = Rc::new(move |parameters| {
            sink.borrow_mut().push(parameters);
        });
        manager.subscribe_methods(
            "input1",
            HashMap::from([("setInputValue".to_string(), handler)]),
        );

        assert!(manager.method_handler("input1", "missing").is_none());
        assert!(manager.method_handler("other", "setInputValue").is_none());

        let found = manager.method_handler("input1", "setInputValue").unwrap();
        found(Value::from(json!({"value": "hi"})));
        assert_eq!(*received.borrow(), vec![Value::from(json!({"value": "hi"}))]);
    }
}
