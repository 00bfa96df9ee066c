//! Application layer: the reactive state store, the state manager binding
//! the store to expression evaluation, and the module renderer.

pub mod module;
pub mod state;

pub use module::{
    EvaluatedHandler, EventHandler, MethodInvocation, ModuleInstance, ModuleRegistry,
    ModuleRenderer, ModuleSchema, ModuleSpec,
};
pub use state::{MethodHandler, StateManager, StateStore, WatchGuard};
