//! Interception Layer
//!
//! Wraps any object or function in a [`Wrapper`] that forwards every
//! operation to its target while:
//! - recursively wrapping object results of reads, labeled by access path
//! - answering the root's self slots (`window`, `self`, ...) with the wrapper
//!   itself, so `root.self === root` holds across the boundary
//! - passing built-in-presenting callables through unwrapped
//! - containing faulting reads (the guest sees `undefined`)
//! - logging reads, writes and deletes as a side channel

pub mod log;

use std::any::Any;
use std::rc::{Rc, Weak};

pub use log::{AccessEvent, AccessKind, AccessLog};

use crate::disguise::presents_native;
use crate::value::{Completion, HostObject, ObjectRef, PropertyDescriptor, Value};

/// Reserved key every wrapper answers `true` for
pub const IDENTITY_MARKER: &str = "__intercepted";

/// Root slots answered with the receiver
pub const DEFAULT_SELF_SLOTS: &[&str] = &["window", "self", "top", "parent", "globalThis", "frames"];

/// Interception settings
#[derive(Debug, Clone)]
pub struct InterceptConfig {
    /// Emit and record access events
    pub log_access: bool,
    /// Maximum number of recorded events (0 = trace only)
    pub log_capacity: usize,
    /// Logged values are truncated to this many characters
    pub max_logged_value: usize,
    /// Root properties answered with the wrapper itself
    pub self_slots: Vec<String>,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            log_access: true,
            log_capacity: 10_000,
            max_logged_value: 50,
            self_slots: DEFAULT_SELF_SLOTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

struct Shared {
    config: InterceptConfig,
    log: AccessLog,
}

/// Produces wrappers. Cheap to clone; clones share configuration and log.
#[derive(Clone)]
pub struct Interceptor {
    shared: Rc<Shared>,
}

impl Interceptor {
    pub fn new(config: InterceptConfig) -> Self {
        let log = AccessLog::new(config.log_capacity, config.max_logged_value);
        Self {
            shared: Rc::new(Shared { config, log }),
        }
    }

    pub fn config(&self) -> &InterceptConfig {
        &self.shared.config
    }

    /// The access log side channel
    pub fn log(&self) -> &AccessLog {
        &self.shared.log
    }

    /// Wrap `target` under the diagnostic `label`.
    ///
    /// Primitives and already-wrapped values are returned unchanged.
    pub fn wrap(&self, target: &Value, label: &str) -> Value {
        let Value::Object(object) = target else {
            return target.clone();
        };
        if is_wrapped(target) {
            return target.clone();
        }
        Value::from_host(Wrapper::new(object.clone(), label, self.clone()))
    }

    /// Wrapping policy for a value read through a wrapper
    fn wrap_read(&self, value: Value, path: &str) -> Value {
        if !value.is_object() || is_wrapped(&value) {
            return value;
        }
        // Wrapping would rebind the receiver of receiver-checking built-ins
        if value.is_callable() && presents_native(&value) {
            return value;
        }
        self.wrap(&value, path)
    }

    fn record(&self, kind: AccessKind, path: &str, value: Option<&Value>) {
        if self.shared.config.log_access {
            self.shared.log.record(kind, path, value);
        }
    }

    fn is_self_slot(&self, key: &str) -> bool {
        self.shared.config.self_slots.iter().any(|s| s == key)
    }
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new(InterceptConfig::default())
    }
}

/// Whether `value` is a wrapper, detected through the identity marker
pub fn is_wrapped(value: &Value) -> bool {
    value.is_object()
        && value
            .get(IDENTITY_MARKER)
            .map(|v| v.truthy())
            .unwrap_or(false)
}

/// Strip every wrapper layer, for host-side code only
pub fn unwrap(value: &Value) -> Value {
    let mut current = value.clone();
    while let Some(wrapper) = current.downcast::<Wrapper>() {
        let inner = Value::Object(wrapper.target().clone());
        current = inner;
    }
    current
}

/// A monitored view of a target object
pub struct Wrapper {
    target: ObjectRef,
    label: String,
    interceptor: Interceptor,
    this: Weak<Wrapper>,
}

impl Wrapper {
    fn new(target: ObjectRef, label: &str, interceptor: Interceptor) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            target,
            label: label.to_string(),
            interceptor,
            this: this.clone(),
        })
    }

    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn receiver(&self) -> Value {
        self.this
            .upgrade()
            .map(Value::from_host)
            .unwrap_or_default()
    }

    fn path(&self, key: &str) -> String {
        format!("{}.{}", self.label, key)
    }
}

impl HostObject for Wrapper {
    fn class_name(&self) -> &str {
        self.target.class_name()
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        if key == IDENTITY_MARKER {
            return Ok(Value::Bool(true));
        }
        if self.target.is_root() && self.interceptor.is_self_slot(key) {
            return Ok(self.receiver());
        }

        let path = self.path(key);
        let value = match self.target.get(key, &self.receiver()) {
            Ok(value) => value,
            Err(exception) => {
                tracing::debug!("Contained faulting read of {}: {}", path, exception);
                return Ok(Value::Undefined);
            }
        };

        if !value.is_undefined() && key != "toString" && key != "toJSON" {
            self.interceptor.record(AccessKind::Read, &path, None);
        }
        Ok(self.interceptor.wrap_read(value, &path))
    }

    fn set(&self, key: &str, value: Value) -> bool {
        self.interceptor
            .record(AccessKind::Write, &self.path(key), Some(&value));
        self.target.set(key, value)
    }

    fn delete(&self, key: &str) -> bool {
        self.interceptor
            .record(AccessKind::Delete, &self.path(key), None);
        self.target.delete(key)
    }

    fn own_keys(&self) -> Vec<String> {
        self.target.own_keys()
    }

    fn own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        if let Some(descriptor) = self.target.own_property(key) {
            return Some(descriptor);
        }
        // Keys resolved by the target's base implementation still count as
        // present, so bulk copies over the wrapper see them
        match self.target.get(key, &self.receiver()) {
            Ok(value) if !value.is_undefined() => Some(PropertyDescriptor::data(value)),
            _ => None,
        }
    }

    fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> bool {
        self.target.define_property(key, descriptor)
    }

    fn call(&self, this: &Value, args: &[Value]) -> Completion {
        self.target.call(this, args)
    }

    fn is_callable(&self) -> bool {
        self.target.is_callable()
    }

    fn is_root(&self) -> bool {
        self.target.is_root()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
