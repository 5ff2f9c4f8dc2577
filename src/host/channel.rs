//! `MessageChannel` / `MessagePort`
//!
//! `postMessage` never delivers synchronously: the `message` event is
//! dispatched on the peer through a 0 ms task.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::timers::TaskQueue;
use crate::disguise::native;
use crate::events::{listener_method, Event, EventInit, EventRegistry, EventTarget, LISTENER_METHODS};
use crate::value::{arg, Completion, HostObject, PlainObject, PropertyDescriptor, Value};

/// One end of a channel.
///
/// Peers are linked weakly; an in-flight message keeps its destination alive
/// until delivered.
pub struct MessagePort {
    peer: RefCell<Weak<MessagePort>>,
    queue: Weak<TaskQueue>,
    events: EventRegistry,
    slots: PlainObject,
    closed: Cell<bool>,
    this: Weak<MessagePort>,
}

impl MessagePort {
    fn new(queue: Weak<TaskQueue>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            peer: RefCell::new(Weak::new()),
            queue,
            events: EventRegistry::new(),
            slots: PlainObject::new("MessagePort"),
            closed: Cell::new(false),
            this: this.clone(),
        })
    }

    /// Two entangled ports
    pub fn pair(queue: &Rc<TaskQueue>) -> (Rc<Self>, Rc<Self>) {
        let port1 = Self::new(Rc::downgrade(queue));
        let port2 = Self::new(Rc::downgrade(queue));
        *port1.peer.borrow_mut() = Rc::downgrade(&port2);
        *port2.peer.borrow_mut() = Rc::downgrade(&port1);
        (port1, port2)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Queue `data` for the peer. Returns `false` if it will never arrive.
    pub fn post_message(&self, data: Value) -> bool {
        if self.closed.get() {
            return false;
        }
        let (Some(peer), Some(queue)) = (self.peer.borrow().upgrade(), self.queue.upgrade()) else {
            tracing::debug!("postMessage on a disentangled port dropped");
            return false;
        };

        let clock = Rc::downgrade(&queue);
        queue.defer(0, move || {
            if peer.is_closed() {
                return Ok(Value::Undefined);
            }
            let time_stamp = clock.upgrade().map_or(0.0, |q| q.now() as f64);
            let event = Event::at("message", EventInit::trusted(), time_stamp)
                .with("data", data.clone())
                .with("origin", Value::from(""))
                .with("ports", Value::from_host(Rc::new(PlainObject::array(Vec::new()))));
            peer.dispatch_event(&Value::from_host(event));
            Ok(Value::Undefined)
        });
        true
    }

    /// Close this end; pending and future messages to it are dropped
    pub fn close(&self) {
        self.closed.set(true);
        if let Some(peer) = self.peer.borrow().upgrade() {
            *peer.peer.borrow_mut() = Weak::new();
        }
        *self.peer.borrow_mut() = Weak::new();
    }

    fn method(&self, name: &str) -> Value {
        if LISTENER_METHODS.contains(&name) {
            return listener_method(name, self.this.clone());
        }
        let owner = self.this.clone();
        match name {
            "postMessage" => native(name, move |_, args| {
                if let Some(port) = owner.upgrade() {
                    port.post_message(arg(args, 0));
                }
                Ok(Value::Undefined)
            }),
            "start" => native(name, |_, _| Ok(Value::Undefined)),
            "close" => native(name, move |_, _| {
                if let Some(port) = owner.upgrade() {
                    port.close();
                }
                Ok(Value::Undefined)
            }),
            _ => Value::Undefined,
        }
    }
}

impl EventTarget for MessagePort {
    fn event_registry(&self) -> &EventRegistry {
        &self.events
    }

    fn event_receiver(&self) -> Value {
        self.this
            .upgrade()
            .map_or(Value::Undefined, Value::from_host)
    }
}

impl HostObject for MessagePort {
    fn class_name(&self) -> &str {
        "MessagePort"
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        if let Some(value) = self.slots.lookup(key) {
            return Ok(value);
        }
        Ok(match key {
            "onmessage" | "onmessageerror" => Value::Null,
            _ => self.method(key),
        })
    }

    fn set(&self, key: &str, value: Value) -> bool {
        self.slots.set(key, value)
    }

    fn delete(&self, key: &str) -> bool {
        self.slots.delete(key)
    }

    fn own_keys(&self) -> Vec<String> {
        self.slots.own_keys()
    }

    fn own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        self.slots.own_property(key)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `new MessageChannel()`
pub fn message_channel(queue: &Rc<TaskQueue>) -> Value {
    let (port1, port2) = MessagePort::pair(queue);
    Value::from_host(Rc::new(PlainObject::with_props(
        "MessageChannel",
        [
            ("port1", Value::from_host(port1)),
            ("port2", Value::from_host(port2)),
        ],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NativeFunction;

    fn collector() -> (Rc<RefCell<Vec<String>>>, Value) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let handler = NativeFunction::value("onmessage", move |_, args| {
            let data = arg(args, 0).get_or_undefined("data");
            sink.borrow_mut().push(data.to_js_string());
            Ok(Value::Undefined)
        });
        (seen, handler)
    }

    #[test]
    fn test_delivery_is_deferred() {
        let queue = Rc::new(TaskQueue::new());
        let channel = message_channel(&queue);
        let port1 = channel.get_or_undefined("port1");
        let port2 = channel.get_or_undefined("port2");
        let (seen, handler) = collector();
        port1.set("onmessage", handler);

        port2.call_method("postMessage", &[Value::from("ping")]).unwrap();
        assert!(seen.borrow().is_empty());

        queue.run_due();
        assert_eq!(*seen.borrow(), vec!["ping".to_string()]);
    }

    #[test]
    fn test_listener_and_order() {
        let queue = Rc::new(TaskQueue::new());
        let (port1, port2) = MessagePort::pair(&queue);
        let (seen, handler) = collector();
        port2.add_event_listener("message", handler);

        port1.post_message(Value::from("a"));
        port1.post_message(Value::from("b"));
        queue.run_due();
        assert_eq!(*seen.borrow(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_closed_port_drops_messages() {
        let queue = Rc::new(TaskQueue::new());
        let (port1, port2) = MessagePort::pair(&queue);
        let (seen, handler) = collector();
        port2.add_event_listener("message", handler);

        port1.post_message(Value::from("in flight"));
        port2.close();
        assert!(!port1.post_message(Value::from("after close")));
        queue.run_due();
        assert!(seen.borrow().is_empty());
    }
}
