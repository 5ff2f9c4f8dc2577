//! Property bags and host callables

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{arg, Completion, HostObject, PropertyDescriptor, Value};

/// Insertion-ordered property bag
pub struct PlainObject {
    class: String,
    props: RefCell<IndexMap<String, PropertyDescriptor>>,
}

impl PlainObject {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            props: RefCell::new(IndexMap::new()),
        }
    }

    /// Build an object from enumerable data properties
    pub fn with_props<K, I>(class: impl Into<String>, props: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let object = Self::new(class);
        for (key, value) in props {
            object.insert(key, value);
        }
        object
    }

    /// Array-like object: indexed elements plus a hidden `length`
    pub fn array(items: Vec<Value>) -> Self {
        Self::array_like("Array", items)
    }

    /// Indexed object reporting `class` (`NodeList`, `HTMLCollection`, ...)
    pub fn array_like(class: impl Into<String>, items: Vec<Value>) -> Self {
        let object = Self::new(class);
        let len = items.len();
        for (i, item) in items.into_iter().enumerate() {
            object.insert(i.to_string(), item);
        }
        object.define("length", PropertyDescriptor::hidden(Value::from(len)));
        object
    }

    /// Host-side insert; bypasses writability
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.props
            .borrow_mut()
            .insert(key.into(), PropertyDescriptor::data(value));
    }

    /// Host-side define; bypasses configurability
    pub fn define(&self, key: impl Into<String>, descriptor: PropertyDescriptor) {
        self.props.borrow_mut().insert(key.into(), descriptor);
    }

    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.props.borrow().get(key).map(|d| d.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.props.borrow().contains_key(key)
    }

    /// Enumerable `(key, value)` pairs in insertion order
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.props
            .borrow()
            .iter()
            .filter(|(_, d)| d.enumerable)
            .map(|(k, d)| (k.clone(), d.value.clone()))
            .collect()
    }

    /// Elements `0..length` of an array-like object
    pub fn array_items(&self) -> Vec<Value> {
        let props = self.props.borrow();
        let len = props
            .get("length")
            .map(|d| d.value.to_number())
            .filter(|n| n.is_finite() && *n >= 0.0)
            .unwrap_or(0.0) as usize;
        (0..len)
            .map(|i| {
                props
                    .get(i.to_string().as_str())
                    .map(|d| d.value.clone())
                    .unwrap_or_default()
            })
            .collect()
    }
}

impl HostObject for PlainObject {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        Ok(self.lookup(key).unwrap_or_default())
    }

    fn set(&self, key: &str, value: Value) -> bool {
        let mut props = self.props.borrow_mut();
        match props.get_mut(key) {
            Some(existing) if !existing.writable => false,
            Some(existing) => {
                existing.value = value;
                true
            }
            None => {
                props.insert(key.to_string(), PropertyDescriptor::data(value));
                true
            }
        }
    }

    fn delete(&self, key: &str) -> bool {
        let mut props = self.props.borrow_mut();
        match props.get(key) {
            Some(existing) if !existing.configurable => false,
            Some(_) => {
                props.shift_remove(key);
                true
            }
            None => true,
        }
    }

    fn own_keys(&self) -> Vec<String> {
        self.props.borrow().keys().cloned().collect()
    }

    fn own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        self.props.borrow().get(key).cloned()
    }

    fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> bool {
        let mut props = self.props.borrow_mut();
        if matches!(props.get(key), Some(existing) if !existing.configurable) {
            return false;
        }
        props.insert(key.to_string(), descriptor);
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Behavior = dyn Fn(&Value, &[Value]) -> Completion;

/// A callable implemented on the host side.
///
/// Own properties shadow the intrinsic `name`, `length`, `toString`, `call`
/// and `apply` members, which is how callables get disguised.
pub struct NativeFunction {
    name: String,
    arity: usize,
    behavior: Rc<Behavior>,
    props: PlainObject,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, behavior: F) -> Rc<Self>
    where
        F: Fn(&Value, &[Value]) -> Completion + 'static,
    {
        Rc::new(Self {
            name: name.into(),
            arity: 0,
            behavior: Rc::new(behavior),
            props: PlainObject::new("Function"),
        })
    }

    /// Same as [`NativeFunction::new`], lifted into a [`Value`]
    pub fn value<F>(name: impl Into<String>, behavior: F) -> Value
    where
        F: Fn(&Value, &[Value]) -> Completion + 'static,
    {
        Value::from_host(Self::new(name, behavior))
    }

    /// Declared parameter count reported by `length`
    pub fn with_arity<F>(name: impl Into<String>, arity: usize, behavior: F) -> Rc<Self>
    where
        F: Fn(&Value, &[Value]) -> Completion + 'static,
    {
        Rc::new(Self {
            name: name.into(),
            arity,
            behavior: Rc::new(behavior),
            props: PlainObject::new("Function"),
        })
    }

    /// Name as currently presented, honoring an overridden `name`
    pub fn name(&self) -> String {
        match self.props.lookup("name") {
            Some(Value::String(name)) => name,
            _ => self.name.clone(),
        }
    }

    fn source_text(name: &str) -> String {
        format!("function {}() {{ [host code] }}", name)
    }
}

impl HostObject for NativeFunction {
    fn class_name(&self) -> &str {
        "Function"
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        if let Some(value) = self.props.lookup(key) {
            return Ok(value);
        }
        Ok(match key {
            "name" => Value::from(self.name.as_str()),
            "length" => Value::from(self.arity),
            "toString" => NativeFunction::value("toString", |this, _| {
                let name = this
                    .downcast::<NativeFunction>()
                    .map(NativeFunction::name)
                    .unwrap_or_default();
                Ok(Value::from(NativeFunction::source_text(&name)))
            }),
            "call" => NativeFunction::value("call", |this, args| {
                this.call(&arg(args, 0), args.get(1..).unwrap_or_default())
            }),
            "apply" => NativeFunction::value("apply", |this, args| {
                let rest = arg(args, 1)
                    .downcast::<PlainObject>()
                    .map(PlainObject::array_items)
                    .unwrap_or_default();
                this.call(&arg(args, 0), &rest)
            }),
            _ => Value::Undefined,
        })
    }

    fn set(&self, key: &str, value: Value) -> bool {
        self.props.set(key, value)
    }

    fn delete(&self, key: &str) -> bool {
        self.props.delete(key)
    }

    fn own_keys(&self) -> Vec<String> {
        self.props.own_keys()
    }

    fn own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        self.props.own_property(key)
    }

    fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> bool {
        self.props.define_property(key, descriptor)
    }

    fn call(&self, this: &Value, args: &[Value]) -> Completion {
        (self.behavior)(this, args)
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
