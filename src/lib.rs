//! Reactive state and expression-binding engine for schema-driven UIs.
//!
//! Components declare their properties as template strings with embedded
//! `{{ ... }}` expressions. The engine parses those templates, evaluates the
//! expression bodies against a scope built from live component state, and
//! keeps downstream consumers in sync through watch subscriptions. Modules
//! package a component subtree with its own scope and a state map exposing
//! selected inner state under the module's id.
//!
//! # Architecture
//!
//! The crate follows a layered structure:
//!
//! - **Domain** ([`domain`]): values, the template and expression parsers,
//!   the masked evaluator, and the deep value mapper. Pure; no store access.
//! - **Application** ([`application`]): the reactive [`StateStore`], the
//!   [`StateManager`] binding the store to evaluation and to the component
//!   method registry, and the [`ModuleRenderer`].
//!
//! # Quick start
//!
//! ```
//! use std::collections::HashMap;
//! use bindstate::{EvalOptions, StateManager, Value};
//!
//! let manager = StateManager::new();
//! manager.merge_state(
//!     "input1",
//!     HashMap::from([("value".to_string(), Value::from("world"))]),
//! );
//!
//! let greeting = manager
//!     .masked_eval("Hello, {{ input1.value }}!", &EvalOptions::default())
//!     .unwrap();
//! assert_eq!(greeting, Value::from("Hello, world!"));
//! ```

pub mod application;
pub mod domain;

pub use application::{
    MethodHandler, ModuleInstance, ModuleRegistry, ModuleRenderer, ModuleSchema, ModuleSpec,
    StateManager, StateStore, WatchGuard,
};
pub use domain::{
    EvalOptions, EvalResult, ExpressionError, MaskedEvaluator, PathSegment, Scope, TemplateNode,
    Value, map_values_deep, parse_template,
};
