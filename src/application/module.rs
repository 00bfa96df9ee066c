//! Module rendering: reusable, independently-scoped subtrees.
//!
//! A module declares default properties, a state map exposing inner
//! component state under module-visible names, and a nested component
//! template. Rendering resolves the module id, evaluates properties and
//! handler bindings, evaluates the template against the module's own scope
//! (`$moduleId` bound), and mirrors state-map entries into the module's
//! store record via watch subscriptions that are disposed on unmount.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use super::state::{StateManager, WatchGuard};
use crate::domain::{EvalOptions, ExpressionError, Scope, Value, references_scope};

/// A reusable module definition, registered per module type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    /// Default property values; bound expressions are allowed.
    #[serde(default)]
    pub properties: Value,
    /// Module-visible state name mapped to a store path template. Values may
    /// bind `$moduleId`, e.g. `"{{ $moduleId }}input.value"`.
    #[serde(default)]
    pub state_map: HashMap<String, String>,
    /// Nested component schema evaluated against the module scope.
    #[serde(default)]
    pub template: Value,
}

/// A module usage site inside an application schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSchema {
    /// Instance id; may contain expressions (`"list{{ $listItem.id }}Module"`).
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub handlers: Vec<EventHandler>,
}

/// Binds a module event to an imperative method on some component.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    #[serde(rename = "type")]
    pub event_type: String,
    pub component_id: String,
    pub method: MethodInvocation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInvocation {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Module definitions keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleSpec>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module_type: impl Into<String>, spec: ModuleSpec) {
        self.modules.insert(module_type.into(), spec);
    }

    pub fn get(&self, module_type: &str) -> Option<&ModuleSpec> {
        self.modules.get(module_type)
    }
}

/// An event handler with its bindings resolved.
#[derive(Debug, Clone)]
pub struct EvaluatedHandler {
    pub event_type: String,
    pub component_id: String,
    pub method_name: String,
    pub parameters: Value,
}

/// Composes the parser, evaluator, and store into module instances.
pub struct ModuleRenderer<'a> {
    state_manager: &'a StateManager,
    registry: &'a ModuleRegistry,
}

impl<'a> ModuleRenderer<'a> {
    pub fn new(state_manager: &'a StateManager, registry: &'a ModuleRegistry) -> Self {
        Self {
            state_manager,
            registry,
        }
    }

    /// Mounts a module instance.
    ///
    /// `eval_scope` supplies extra bindings for resolving the schema (list
    /// item values, parent module bindings). An unknown module type is an
    /// error value, not a panic.
    pub fn render(
        &self,
        schema: &ModuleSchema,
        eval_scope: Option<&Scope>,
    ) -> Result<ModuleInstance, ExpressionError> {
        let spec = self.registry.get(&schema.module_type).ok_or_else(|| {
            ExpressionError::new(
                &schema.id,
                format!("unknown module type `{}`", schema.module_type),
            )
        })?;

        let schema_options = EvalOptions {
            scope_object: eval_scope.cloned().unwrap_or_default(),
            eval_list_item: true,
            ..EvalOptions::default()
        };

        // First the id, properties and handlers of the module itself.
        let module_id = self
            .state_manager
            .masked_eval(&schema.id, &schema_options)?
            .to_display_string();
        let properties = self
            .state_manager
            .masked_eval_deep(&schema.properties, &schema_options);
        let handlers = self.evaluate_handlers(&schema.handlers, &schema_options);

        // Then the state map and template against the module's own scope.
        let module_binding: Scope = HashMap::from([(
            "$moduleId".to_string(),
            Value::String(module_id.clone()),
        )]);
        let state_map = self.resolve_state_map(&spec.state_map, &module_binding);

        let mut template_scope = match &properties {
            Value::Object(fields) => fields.clone(),
            _ => Scope::new(),
        };
        template_scope.insert("$moduleId".to_string(), Value::String(module_id.clone()));
        let template_options = EvalOptions {
            scope_object: template_scope,
            eval_list_item: true,
            ..EvalOptions::default()
        };
        // Keys outside the module scope are deliberately ignored here; the
        // scoped pre-check leaves those bindings for the component pass.
        let template = self
            .state_manager
            .masked_eval_deep_scoped(&spec.template, &template_options);

        let guards = self.mirror_state_map(&module_id, &state_map);
        debug!(module = %module_id, "mounted module instance");

        Ok(ModuleInstance {
            id: module_id,
            properties,
            template,
            handlers,
            guards,
        })
    }

    fn evaluate_handlers(
        &self,
        handlers: &[EventHandler],
        options: &EvalOptions,
    ) -> Vec<EvaluatedHandler> {
        handlers
            .iter()
            .map(|handler| {
                let component_id = self
                    .state_manager
                    .masked_eval(&handler.component_id, options)
                    .map(|v| v.to_display_string())
                    .unwrap_or_else(|_| handler.component_id.clone());
                let parameters = self
                    .state_manager
                    .masked_eval_deep(&handler.method.parameters, options);
                EvaluatedHandler {
                    event_type: handler.event_type.clone(),
                    component_id,
                    method_name: handler.method.name.clone(),
                    parameters,
                }
            })
            .collect()
    }

    fn resolve_state_map(
        &self,
        state_map: &HashMap<String, String>,
        module_binding: &Scope,
    ) -> HashMap<String, String> {
        let options = EvalOptions {
            scope_object: module_binding.clone(),
            eval_list_item: true,
            ..EvalOptions::default()
        };
        state_map
            .iter()
            .map(|(state_key, path_template)| {
                let path = if references_scope(path_template, module_binding) {
                    self.state_manager
                        .masked_eval(path_template, &options)
                        .map(|v| v.to_display_string())
                        .unwrap_or_else(|_| path_template.clone())
                } else {
                    path_template.clone()
                };
                (state_key.clone(), path)
            })
            .collect()
    }

    /// Seeds each state-map entry from the store and keeps it mirrored into
    /// the module's own record while the instance stays mounted.
    fn mirror_state_map(
        &self,
        module_id: &str,
        state_map: &HashMap<String, String>,
    ) -> Vec<WatchGuard> {
        let store = self.state_manager.store().clone();
        let mut guards = Vec::with_capacity(state_map.len());

        for (state_key, path) in state_map {
            let current = store.get(path);
            store.merge_state(
                module_id,
                HashMap::from([(state_key.clone(), current)]),
            );

            let mirror = store.clone();
            let target = module_id.to_string();
            let key = state_key.clone();
            guards.push(store.watch(path, move |value| {
                mirror.merge_state(&target, HashMap::from([(key.clone(), value.clone())]));
            }));
        }

        guards
    }
}

/// A mounted module: evaluated schema plus the live state-map mirror.
///
/// Dropping the instance (or calling [`unmount`](Self::unmount)) disposes
/// its watch subscriptions; its store record stays behind, which is fine —
/// stale entries are tolerated for the application session.
pub struct ModuleInstance {
    pub id: String,
    pub properties: Value,
    pub template: Value,
    pub handlers: Vec<EvaluatedHandler>,
    guards: Vec<WatchGuard>,
}

impl ModuleInstance {
    /// Routes a module event to the methods its handlers bind, through the
    /// manager's method registry. Returns how many handlers were dispatched.
    pub fn dispatch_event(&self, event_type: &str, state_manager: &StateManager) -> usize {
        let mut dispatched = 0;
        for handler in &self.handlers {
            if handler.event_type != event_type {
                continue;
            }
            match state_manager.method_handler(&handler.component_id, &handler.method_name) {
                Some(method) => {
                    method(handler.parameters.clone());
                    dispatched += 1;
                }
                None => {
                    warn!(
                        component = %handler.component_id,
                        method = %handler.method_name,
                        "event handler targets an unregistered method"
                    );
                }
            }
        }
        dispatched
    }

    /// Disposes the state-map mirror subscriptions.
    pub fn unmount(self) {}

    pub fn active_watchers(&self) -> usize {
        self.guards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::state::MethodHandler;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fields(json: serde_json::Value) -> HashMap<String, Value> {
        match Value::from(json) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn input_module_spec() -> ModuleSpec {
        serde_json::from_value(json!({
            "properties": {},
            "stateMap": {"value": "{{ $moduleId }}input.value"},
            "template": {
                "id": "{{ $moduleId }}input",
                "type": "core/input",
                "properties": {"defaultValue": "{{ text }}"}
            }
        }))
        .unwrap()
    }

    fn registry_with_input_module() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register("custom/inputModule", input_module_spec());
        registry
    }

    #[test]
    fn test_schema_deserializes_camel_case() {
        let schema: ModuleSchema = serde_json::from_value(json!({
            "id": "mod1",
            "type": "custom/inputModule",
            "properties": {"text": "hi"},
            "handlers": [{
                "type": "onEdit",
                "componentId": "input1",
                "method": {"name": "setInputValue", "parameters": {"value": "x"}}
            }]
        }))
        .unwrap();

        assert_eq!(schema.module_type, "custom/inputModule");
        assert_eq!(schema.handlers[0].component_id, "input1");
        assert_eq!(schema.handlers[0].method.name, "setInputValue");
    }

    #[test]
    fn test_render_unknown_module_type() {
        let manager = StateManager::new();
        let registry = ModuleRegistry::new();
        let renderer = ModuleRenderer::new(&manager, &registry);

        let schema: ModuleSchema = serde_json::from_value(json!({
            "id": "mod1",
            "type": "custom/missing"
        }))
        .unwrap();

        // ModuleInstance holds live callbacks and has no Debug impl, so the
        // error is extracted by matching rather than `unwrap_err`.
        let error = match renderer.render(&schema, None) {
            Err(error) => error,
            Ok(_) => panic!("rendering an unregistered module type must fail"),
        };
        assert!(error.reason.contains("unknown module type"));
    }

    #[test]
    fn test_render_resolves_id_properties_and_template() {
        let manager = StateManager::new();
        manager.merge_state("outer", fields(json!({"value": "boo"})));
        let registry = registry_with_input_module();
        let renderer = ModuleRenderer::new(&manager, &registry);

        let schema: ModuleSchema = serde_json::from_value(json!({
            "id": "{{ prefix }}Module",
            "type": "custom/inputModule",
            "properties": {"text": "{{ outer.value }}"}
        }))
        .unwrap();

        let mut scope = Scope::new();
        scope.insert("prefix".to_string(), Value::from("my"));
        let instance = renderer.render(&schema, Some(&scope)).unwrap();

        assert_eq!(instance.id, "myModule");
        assert_eq!(instance.properties.get_path("text"), Value::from("boo"));
        // Template bindings resolve against the module scope only.
        assert_eq!(instance.template.get_path("id"), Value::from("myModuleinput"));
        assert_eq!(
            instance.template.get_path("properties.defaultValue"),
            Value::from("boo")
        );
        // Bindings outside the module scope stay untouched.
        assert_eq!(
            instance.template.get_path("type"),
            Value::from("core/input")
        );
    }

    #[test]
    fn test_state_map_mirrors_inner_state() {
        let manager = StateManager::new();
        let registry = registry_with_input_module();
        let renderer = ModuleRenderer::new(&manager, &registry);

        let schema: ModuleSchema = serde_json::from_value(json!({
            "id": "mod1",
            "type": "custom/inputModule",
            "properties": {"text": "hello"}
        }))
        .unwrap();
        let instance = renderer.render(&schema, None).unwrap();
        assert_eq!(instance.active_watchers(), 1);

        // Seeded before any inner write.
        assert_eq!(manager.store().get("mod1.value"), Value::Undefined);

        // The inner input publishes state; the module record follows.
        manager.merge_state("mod1input", fields(json!({"value": "typed"})));
        assert_eq!(manager.store().get("mod1.value"), Value::from("typed"));

        // After unmount the mirror stops.
        instance.unmount();
        manager.merge_state("mod1input", fields(json!({"value": "later"})));
        assert_eq!(manager.store().get("mod1.value"), Value::from("typed"));
    }

    #[test]
    fn test_dispatch_event_routes_to_registered_methods() {
        let manager = StateManager::new();
        manager.merge_state("outer", fields(json!({"value": "boo"})));
        let registry = registry_with_input_module();
        let renderer = ModuleRenderer::new(&manager, &registry);

        let received: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let handler: MethodHandler = Rc::new(move |parameters| {
            sink.borrow_mut().push(parameters);
        });
        manager.subscribe_methods(
            "input1",
            HashMap::from([("setInputValue".to_string(), handler)]),
        );

        let schema: ModuleSchema = serde_json::from_value(json!({
            "id": "mod1",
            "type": "custom/inputModule",
            "handlers": [{
                "type": "onEdit",
                "componentId": "input1",
                "method": {
                    "name": "setInputValue",
                    "parameters": {"value": "{{ outer.value }}"}
                }
            }]
        }))
        .unwrap();
        let instance = renderer.render(&schema, None).unwrap();

        assert_eq!(instance.dispatch_event("onOther", &manager), 0);
        assert_eq!(instance.dispatch_event("onEdit", &manager), 1);
        assert_eq!(
            *received.borrow(),
            vec![Value::from(json!({"value": "boo"}))]
        );
    }
}
