//! Event Bus
//!
//! Per-entity listener registration and dispatch. Nodes, the root window,
//! message ports and XHR objects all own an [`EventRegistry`] and expose it
//! through [`EventTarget`].

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::disguise::native;
use crate::value::{arg, Completion, HostObject, PlainObject, PropertyDescriptor, Value};

type Handlers = SmallVec<[Value; 2]>;

/// Ordered handler lists keyed by event type
#[derive(Default)]
pub struct EventRegistry {
    listeners: RefCell<IndexMap<String, Handlers>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` for `ty`. Nullish and duplicate handlers are ignored.
    pub fn register(&self, ty: &str, handler: Value) -> bool {
        if ty.is_empty() || handler.is_nullish() {
            return false;
        }
        let mut listeners = self.listeners.borrow_mut();
        let handlers = listeners.entry(ty.to_string()).or_default();
        if handlers.iter().any(|h| h.strict_eq(&handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Remove `handler` for `ty`; absent handlers are a no-op
    pub fn unregister(&self, ty: &str, handler: &Value) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(handlers) = listeners.get_mut(ty) else {
            return false;
        };
        match handlers.iter().position(|h| h.strict_eq(handler)) {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn count(&self, ty: &str) -> usize {
        self.listeners.borrow().get(ty).map_or(0, |h| h.len())
    }

    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    fn snapshot(&self, ty: &str) -> Handlers {
        self.listeners.borrow().get(ty).cloned().unwrap_or_default()
    }

    /// Dispatch `event` on `entity`.
    ///
    /// `event` may be an [`Event`] or any object with a `type`. The `on<type>`
    /// slot runs first, then registered handlers in order. Each handler is
    /// fault-isolated. Returns `false` if the event was cancelled.
    pub fn dispatch(&self, entity: &Value, event: &Value) -> bool {
        let ty = match event.get_or_undefined("type") {
            Value::String(ty) if !ty.is_empty() => ty,
            _ => return false,
        };
        if event.get_or_undefined("target").is_nullish() {
            event.set("target", entity.clone());
        }
        if event.downcast::<Event>().is_some() {
            event.set("currentTarget", entity.clone());
        }

        let slot = entity.get_or_undefined(&format!("on{}", ty));
        if slot.is_callable() {
            invoke(&ty, &slot, entity, event);
        }

        // Handlers registered during dispatch run on the next dispatch
        for handler in self.snapshot(&ty) {
            if handler.is_callable() {
                invoke(&ty, &handler, entity, event);
            } else {
                let handle_event = handler.get_or_undefined("handleEvent");
                if handle_event.is_callable() {
                    invoke(&ty, &handle_event, &handler, event);
                }
            }
            if event
                .downcast::<Event>()
                .is_some_and(|e| e.immediate_stopped.get())
            {
                break;
            }
        }

        !event.get_or_undefined("defaultPrevented").truthy()
    }
}

fn invoke(ty: &str, handler: &Value, this: &Value, event: &Value) {
    if let Err(exception) = handler.call(this, std::slice::from_ref(event)) {
        tracing::warn!("Handler for '{}' event failed: {}", ty, exception);
    }
}

/// An entity that owns event registrations
pub trait EventTarget {
    fn event_registry(&self) -> &EventRegistry;

    /// The entity as handlers see it (`this`, default `event.target`)
    fn event_receiver(&self) -> Value;

    fn add_event_listener(&self, ty: &str, handler: Value) -> bool {
        self.event_registry().register(ty, handler)
    }

    fn remove_event_listener(&self, ty: &str, handler: &Value) -> bool {
        self.event_registry().unregister(ty, handler)
    }

    fn dispatch_event(&self, event: &Value) -> bool {
        self.event_registry().dispatch(&self.event_receiver(), event)
    }
}

/// Masked `addEventListener` / `removeEventListener` / `dispatchEvent`
/// bound to `owner`. Unknown names yield `undefined`.
pub fn listener_method<T: EventTarget + 'static>(name: &str, owner: Weak<T>) -> Value {
    match name {
        "addEventListener" => native(name, move |_, args| {
            if let Some(owner) = owner.upgrade() {
                owner.add_event_listener(&arg(args, 0).to_js_string(), arg(args, 1));
            }
            Ok(Value::Undefined)
        }),
        "removeEventListener" => native(name, move |_, args| {
            if let Some(owner) = owner.upgrade() {
                owner.remove_event_listener(&arg(args, 0).to_js_string(), &arg(args, 1));
            }
            Ok(Value::Undefined)
        }),
        "dispatchEvent" => native(name, move |_, args| {
            let event = arg(args, 0);
            if !event.is_object() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(
                owner.upgrade().is_some_and(|owner| owner.dispatch_event(&event)),
            ))
        }),
        _ => Value::Undefined,
    }
}

pub const LISTENER_METHODS: &[&str] = &["addEventListener", "removeEventListener", "dispatchEvent"];

/// Options for a host-created event
#[derive(Debug, Clone, Copy, Default)]
pub struct EventInit {
    pub bubbles: bool,
    pub cancelable: bool,
    pub trusted: bool,
}

impl EventInit {
    /// Options for events raised by the host itself (lifecycle, messages)
    pub fn trusted() -> Self {
        Self {
            bubbles: false,
            cancelable: false,
            trusted: true,
        }
    }
}

/// A dispatched event
pub struct Event {
    ty: RefCell<String>,
    bubbles: Cell<bool>,
    cancelable: Cell<bool>,
    trusted: bool,
    time_stamp: f64,
    target: RefCell<Value>,
    current_target: RefCell<Value>,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
    immediate_stopped: Cell<bool>,
    extra: PlainObject,
    this: Weak<Event>,
}

impl Event {
    pub fn new(ty: &str, init: EventInit) -> Rc<Self> {
        Self::at(ty, init, 0.0)
    }

    /// Event stamped with a virtual-clock time
    pub fn at(ty: &str, init: EventInit, time_stamp: f64) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            ty: RefCell::new(ty.to_string()),
            bubbles: Cell::new(init.bubbles),
            cancelable: Cell::new(init.cancelable),
            trusted: init.trusted,
            time_stamp,
            target: RefCell::new(Value::Null),
            current_target: RefCell::new(Value::Null),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
            immediate_stopped: Cell::new(false),
            extra: PlainObject::new("Event"),
            this: this.clone(),
        })
    }

    /// Attach an extra property such as `data` or `ports`
    pub fn with(self: Rc<Self>, key: &str, value: Value) -> Rc<Self> {
        self.extra.insert(key, value);
        self
    }

    pub fn event_type(&self) -> String {
        self.ty.borrow().clone()
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    pub fn prevent_default(&self) {
        if self.cancelable.get() {
            self.default_prevented.set(true);
        }
    }

    pub fn target(&self) -> Value {
        self.target.borrow().clone()
    }

    fn method(&self, name: &str) -> Value {
        let this = self.this.clone();
        match name {
            "preventDefault" => native(name, move |_, _| {
                if let Some(event) = this.upgrade() {
                    event.prevent_default();
                }
                Ok(Value::Undefined)
            }),
            "stopPropagation" => native(name, move |_, _| {
                if let Some(event) = this.upgrade() {
                    event.propagation_stopped.set(true);
                }
                Ok(Value::Undefined)
            }),
            "stopImmediatePropagation" => native(name, move |_, _| {
                if let Some(event) = this.upgrade() {
                    event.propagation_stopped.set(true);
                    event.immediate_stopped.set(true);
                }
                Ok(Value::Undefined)
            }),
            "initEvent" => native(name, move |_, args| {
                if let Some(event) = this.upgrade() {
                    *event.ty.borrow_mut() = arg(args, 0).to_js_string();
                    event.bubbles.set(arg(args, 1).truthy());
                    event.cancelable.set(arg(args, 2).truthy());
                }
                Ok(Value::Undefined)
            }),
            _ => Value::Undefined,
        }
    }
}

impl HostObject for Event {
    fn class_name(&self) -> &str {
        "Event"
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        if let Some(value) = self.extra.lookup(key) {
            return Ok(value);
        }
        Ok(match key {
            "type" => Value::from(self.event_type()),
            "target" | "srcElement" => self.target(),
            "currentTarget" => self.current_target.borrow().clone(),
            "bubbles" => Value::Bool(self.bubbles.get()),
            "cancelable" => Value::Bool(self.cancelable.get()),
            "defaultPrevented" => Value::Bool(self.default_prevented.get()),
            "returnValue" => Value::Bool(!self.default_prevented.get()),
            "cancelBubble" => Value::Bool(self.propagation_stopped.get()),
            "isTrusted" => Value::Bool(self.trusted),
            "timeStamp" => Value::Number(self.time_stamp),
            "eventPhase" => Value::from(2),
            "composed" => Value::Bool(false),
            _ => self.method(key),
        })
    }

    fn set(&self, key: &str, value: Value) -> bool {
        match key {
            "target" => *self.target.borrow_mut() = value,
            "currentTarget" => *self.current_target.borrow_mut() = value,
            "returnValue" if !value.truthy() => self.prevent_default(),
            "cancelBubble" if value.truthy() => self.propagation_stopped.set(true),
            "type" | "isTrusted" | "defaultPrevented" | "timeStamp" => return false,
            _ => return self.extra.set(key, value),
        }
        true
    }

    fn own_keys(&self) -> Vec<String> {
        let mut keys = vec!["isTrusted".to_string()];
        keys.extend(self.extra.own_keys());
        keys
    }

    fn own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        match key {
            "isTrusted" => Some(PropertyDescriptor {
                value: Value::Bool(self.trusted),
                writable: false,
                enumerable: true,
                configurable: false,
            }),
            _ => self.extra.own_property(key),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Exception, NativeFunction};

    /// A bare entity with a slot store, like a message port
    struct Entity {
        registry: EventRegistry,
        slots: PlainObject,
        this: Weak<Entity>,
    }

    impl Entity {
        fn new() -> Rc<Self> {
            Rc::new_cyclic(|this| Self {
                registry: EventRegistry::new(),
                slots: PlainObject::new("Entity"),
                this: this.clone(),
            })
        }
    }

    impl EventTarget for Entity {
        fn event_registry(&self) -> &EventRegistry {
            &self.registry
        }

        fn event_receiver(&self) -> Value {
            self.this.upgrade().map(Value::from_host).unwrap_or_default()
        }
    }

    impl HostObject for Entity {
        fn class_name(&self) -> &str {
            "Entity"
        }

        fn get(&self, key: &str, receiver: &Value) -> Completion {
            self.slots.get(key, receiver)
        }

        fn set(&self, key: &str, value: Value) -> bool {
            self.slots.set(key, value)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn recorder(order: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> Value {
        let order = order.clone();
        NativeFunction::value(tag, move |_, _| {
            order.borrow_mut().push(tag);
            Ok(Value::Undefined)
        })
    }

    #[test]
    fn test_slot_then_registration_order() {
        let entity = Entity::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        entity.add_event_listener("x", recorder(&order, "A"));
        entity.add_event_listener("x", recorder(&order, "B"));
        entity.set("onx", recorder(&order, "S"));

        let event = Value::from_host(Event::new("x", EventInit::default()));
        assert!(entity.dispatch_event(&event));
        assert_eq!(*order.borrow(), vec!["S", "A", "B"]);
    }

    #[test]
    fn test_duplicate_registration_and_unregister() {
        let entity = Entity::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let handler = recorder(&order, "A");
        assert!(entity.add_event_listener("x", handler.clone()));
        assert!(!entity.add_event_listener("x", handler.clone()));
        assert_eq!(entity.registry.count("x"), 1);

        assert!(entity.remove_event_listener("x", &handler));
        assert!(!entity.remove_event_listener("x", &handler));
        assert!(!entity.remove_event_listener("never", &handler));
        assert_eq!(entity.registry.count("x"), 0);
    }

    #[test]
    fn test_throwing_handler_is_isolated() {
        let entity = Entity::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        entity.add_event_listener(
            "x",
            NativeFunction::value("bad", |_, _| Err(Exception::error("handler blew up"))),
        );
        entity.add_event_listener("x", recorder(&order, "after"));

        let event = Value::from_host(Event::new("x", EventInit::default()));
        assert!(entity.dispatch_event(&event));
        assert_eq!(*order.borrow(), vec!["after"]);
    }

    #[test]
    fn test_target_defaults_to_entity() {
        let entity = Entity::new();
        let event = Value::from_host(Event::new("ping", EventInit::default()));
        entity.dispatch_event(&event);
        assert!(event.get("target").unwrap().strict_eq(&entity.event_receiver()));

        // Plain objects work too
        let plain = Value::from_host(Rc::new(PlainObject::with_props(
            "Object",
            [("type", Value::from("ping"))],
        )));
        entity.dispatch_event(&plain);
        assert!(plain.get("target").unwrap().strict_eq(&entity.event_receiver()));
    }

    #[test]
    fn test_cancellation_reported() {
        let entity = Entity::new();
        entity.add_event_listener(
            "submit",
            NativeFunction::value("cancel", |_, args| {
                arg(args, 0).call_method("preventDefault", &[])?;
                Ok(Value::Undefined)
            }),
        );
        let cancelable = Value::from_host(Event::new(
            "submit",
            EventInit {
                cancelable: true,
                ..Default::default()
            },
        ));
        assert!(!entity.dispatch_event(&cancelable));

        let fixed = Value::from_host(Event::new("submit", EventInit::default()));
        assert!(entity.dispatch_event(&fixed));
    }

    #[test]
    fn test_handle_event_objects() {
        let entity = Entity::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let listener = PlainObject::new("Object");
        listener.insert("handleEvent", recorder(&order, "obj"));
        entity.add_event_listener("x", Value::from_host(Rc::new(listener)));
        entity.dispatch_event(&Value::from_host(Event::new("x", EventInit::default())));
        assert_eq!(*order.borrow(), vec!["obj"]);
    }

    #[test]
    fn test_listener_methods_bound_to_owner() {
        let entity = Entity::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let add = listener_method("addEventListener", Rc::downgrade(&entity));
        let dispatch = listener_method("dispatchEvent", Rc::downgrade(&entity));
        add.call(&Value::Undefined, &[Value::from("x"), recorder(&order, "A")])
            .unwrap();
        let event = Value::from_host(Event::new("x", EventInit::default()));
        let result = dispatch.call(&Value::Null, &[event]).unwrap();
        assert!(result.strict_eq(&Value::Bool(true)));
        assert_eq!(*order.borrow(), vec!["A"]);
    }
}
