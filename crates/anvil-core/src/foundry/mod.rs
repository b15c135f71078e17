//! Per-run execution context.
//!
//! A `Foundry` is shared by reference across every operation of one run. It
//! owns the property bag, a typed service locator, the caller-registered
//! middleware, the event hub, the injected clock, and the tracing span that
//! stands in for the run's logger. The orchestrator stores its own
//! bookkeeping in the same property bag (under the `anvil.` prefix) so a
//! snapshot serializes exactly what business code can see.

mod properties;

pub use properties::{PropertyBag, PropertyError};

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Span;
use uuid::Uuid;

use crate::clock::{Clock, system_clock};
use crate::event::EventHub;
use crate::middleware::Middleware;

/// Key holding the index of the most recently completed operation.
pub const LAST_COMPLETED_INDEX_KEY: &str = "anvil.last_completed_index";

/// Prefix of the keys holding each completed operation's output.
pub const OUTPUT_KEY_PREFIX: &str = "anvil.output.";

/// Key holding the indices of operations that failed and have not since
/// completed, in ascending order.
pub const FAILED_INDICES_KEY: &str = "anvil.failed_indices";

type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Shared mutable context for one workflow run.
///
/// Cloning produces another handle to the same context.
#[derive(Clone)]
pub struct Foundry {
    execution_id: Uuid,
    properties: PropertyBag,
    services: Arc<DashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    middlewares: Arc<RwLock<Vec<Arc<dyn Middleware>>>>,
    events: EventHub,
    clock: Arc<dyn Clock>,
    span: Span,
    lifecycle: Arc<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    disposed: AtomicBool,
    callbacks: Mutex<Vec<DisposeCallback>>,
}

impl Foundry {
    /// Foundry with a fresh UUIDv7 execution id.
    pub fn new() -> Self {
        Self::with_execution_id(Uuid::now_v7())
    }

    /// Foundry for a known execution id, e.g. when resuming from a snapshot.
    pub fn with_execution_id(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            properties: PropertyBag::new(),
            services: Arc::new(DashMap::new()),
            middlewares: Arc::new(RwLock::new(Vec::new())),
            events: EventHub::default(),
            clock: system_clock(),
            span: tracing::info_span!("anvil.foundry", execution_id = %execution_id),
            lifecycle: Arc::new(Lifecycle::default()),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed the property bag.
    pub fn with_properties(self, properties: HashMap<String, Value>) -> Self {
        for (key, value) in properties {
            self.properties.set(key, value);
        }
        self
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // -- Properties --

    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.get(key)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.properties.set(key, value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.properties.keys()
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PropertyError> {
        self.properties.get_as(key)
    }

    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), PropertyError> {
        self.properties.set_as(key, value)
    }

    /// Point-in-time copy of the whole bag.
    pub fn properties(&self) -> HashMap<String, Value> {
        self.properties.to_map()
    }

    /// Swap the whole bag for `properties` (used when resuming).
    pub fn replace_properties(&self, properties: HashMap<String, Value>) {
        self.properties.replace(properties);
    }

    /// The underlying bag, for callers that want to hand it around on its own.
    pub fn property_bag(&self) -> &PropertyBag {
        &self.properties
    }

    // -- Orchestrator bookkeeping --

    /// Record that the operation at `index` completed with `output`.
    ///
    /// The last completed index never moves backwards, so re-running an
    /// earlier failed operation keeps the resume point where it was.
    pub fn record_completion(&self, index: usize, output: &Value) {
        let last = self.last_completed_index().map_or(index, |last| last.max(index));
        self.properties.set(LAST_COMPLETED_INDEX_KEY, Value::from(last));
        self.properties.set(output_key(index), output.clone());

        let mut failed = self.failed_indices();
        if let Ok(position) = failed.binary_search(&index) {
            failed.remove(position);
            self.store_failed_indices(failed);
        }
    }

    /// Record that the operation at `index` failed.
    pub fn record_failure(&self, index: usize) {
        let mut failed = self.failed_indices();
        if let Err(position) = failed.binary_search(&index) {
            failed.insert(position, index);
            self.store_failed_indices(failed);
        }
    }

    /// Operations that failed and have not completed since.
    pub fn failed_indices(&self) -> Vec<usize> {
        let mut failed: Vec<usize> = self
            .properties
            .get(FAILED_INDICES_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        failed.sort_unstable();
        failed.dedup();
        failed
    }

    fn store_failed_indices(&self, failed: Vec<usize>) {
        if failed.is_empty() {
            self.properties.remove(FAILED_INDICES_KEY);
        } else {
            self.properties.set(FAILED_INDICES_KEY, Value::from(failed));
        }
    }

    pub fn last_completed_index(&self) -> Option<usize> {
        self.properties
            .get(LAST_COMPLETED_INDEX_KEY)
            .and_then(|v| v.as_u64())
            .and_then(|v| usize::try_from(v).ok())
    }

    /// Output recorded for the operation at `index`.
    pub fn completed_output(&self, index: usize) -> Option<Value> {
        self.properties.get(&output_key(index))
    }

    // -- Services --

    /// Register a service, replacing any previous one of the same type.
    pub fn insert_service<T: Send + Sync + 'static>(&self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let entry = self.services.get(&TypeId::of::<T>())?.value().clone();
        entry.downcast::<T>().ok()
    }

    // -- Middleware --

    /// Append a middleware. Runs that already started keep the chain they
    /// snapshotted at start.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(middleware);
    }

    pub fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // -- Events & logging --

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Span every operation of this run executes under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Open a named child scope. Enter the returned span to attribute logs
    /// to it; dropping the guard ends the scope.
    pub fn scope(&self, name: &str) -> Span {
        tracing::info_span!(parent: &self.span, "anvil.scope", scope = name)
    }

    // -- Lifecycle --

    /// Register a callback that runs when the foundry is disposed. If it
    /// already has been, the callback runs immediately.
    pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            callback();
            return;
        }
        self.lifecycle
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(callback));
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.disposed.load(Ordering::Acquire)
    }

    /// Release attached resources. Only the first call does anything; it
    /// returns `true`, every later call returns `false`.
    pub fn dispose(&self) -> bool {
        if self.lifecycle.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let callbacks = std::mem::take(
            &mut *self
                .lifecycle
                .callbacks
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }

        self.services.clear();
        self.middlewares
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.events.clear_listeners();

        tracing::debug!(execution_id = %self.execution_id, callbacks = count, "foundry disposed");
        true
    }
}

fn output_key(index: usize) -> String {
    format!("{OUTPUT_KEY_PREFIX}{index}")
}

impl Default for Foundry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Foundry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Foundry")
            .field("execution_id", &self.execution_id)
            .field("properties", &self.properties.len())
            .field("services", &self.services.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
