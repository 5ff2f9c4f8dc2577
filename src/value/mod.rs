//! Host Value Model
//!
//! The dynamic object graph the hosted script sees. Every entity in the
//! synthetic environment (nodes, the root window, wrappers, functions)
//! implements [`HostObject`], and all data flows as [`Value`].

mod exception;
mod object;

use std::any::Any;
use std::fmt;
use std::rc::Rc;

pub use exception::{CallSite, Exception};
pub use object::{NativeFunction, PlainObject};

/// Shared reference to any host object
pub type ObjectRef = Rc<dyn HostObject>;

/// Outcome of a guest-visible operation: a value or a thrown exception
pub type Completion = std::result::Result<Value, Exception>;

/// A guest-visible value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
}

/// A data property descriptor
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub value: Value,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyDescriptor {
    /// Writable, enumerable, configurable
    pub fn data(value: Value) -> Self {
        Self {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable and configurable, but not enumerable (methods, internals)
    pub fn hidden(value: Value) -> Self {
        Self {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Configurable only
    pub fn readonly(value: Value) -> Self {
        Self {
            value,
            writable: false,
            enumerable: false,
            configurable: true,
        }
    }
}

/// The object protocol shared by every entity in the synthetic graph.
///
/// Implementors use interior mutability; no method may hold a borrow across
/// a call back into guest code.
pub trait HostObject: Any {
    /// Class tag reported by `Object.prototype.toString`-style introspection
    fn class_name(&self) -> &str;

    /// Read a property. `receiver` is the value the read was made through,
    /// which differs from the object itself when the read is forwarded by a
    /// wrapper.
    fn get(&self, key: &str, receiver: &Value) -> Completion;

    /// Write a property, reporting success
    fn set(&self, _key: &str, _value: Value) -> bool {
        false
    }

    /// Delete a property, reporting success
    fn delete(&self, _key: &str) -> bool {
        false
    }

    /// Own property keys in insertion order
    fn own_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Own property descriptor, if an explicit one exists
    fn own_property(&self, _key: &str) -> Option<PropertyDescriptor> {
        None
    }

    /// Define (or redefine) an own property
    fn define_property(&self, _key: &str, _descriptor: PropertyDescriptor) -> bool {
        false
    }

    /// Invoke the object as a function
    fn call(&self, _this: &Value, _args: &[Value]) -> Completion {
        Err(Exception::type_error(format!(
            "{} is not a function",
            self.class_name()
        )))
    }

    fn is_callable(&self) -> bool {
        false
    }

    /// Whether this object is a global root (window-like) whose self slots
    /// answer with the receiver
    fn is_root(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

impl Value {
    /// Lift a concrete host object into a value
    pub fn from_host<T: HostObject>(object: Rc<T>) -> Self {
        Value::Object(object)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Object(o) if o.is_callable())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Downcast an object value to a concrete host type
    pub fn downcast<T: HostObject>(&self) -> Option<&T> {
        self.as_object()?.as_any().downcast_ref::<T>()
    }

    /// Boolean coercion
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// `typeof` result
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(o) if o.is_callable() => "function",
            Value::Object(_) => "object",
        }
    }

    /// Strict equality; objects compare by allocation identity
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => same_object(a, b),
            _ => false,
        }
    }

    /// Property read
    pub fn get(&self, key: &str) -> Completion {
        match self {
            Value::Object(o) => o.get(key, self),
            Value::String(s) if key == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Undefined | Value::Null => Err(Exception::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                self.to_js_string(),
                key
            ))),
            _ => Ok(Value::Undefined),
        }
    }

    /// Property read that treats a throwing read as `undefined`
    pub fn get_or_undefined(&self, key: &str) -> Value {
        self.get(key).unwrap_or_default()
    }

    /// Property write
    pub fn set(&self, key: &str, value: Value) -> bool {
        match self {
            Value::Object(o) => o.set(key, value),
            _ => false,
        }
    }

    /// Invoke as a function with an explicit receiver
    pub fn call(&self, this: &Value, args: &[Value]) -> Completion {
        match self {
            Value::Object(o) if o.is_callable() => o.call(this, args),
            _ => Err(Exception::type_error(format!(
                "{} is not a function",
                self.describe()
            ))),
        }
    }

    /// Read `name` and invoke it with `self` as receiver
    pub fn call_method(&self, name: &str, args: &[Value]) -> Completion {
        let method = self.get(name)?;
        method.call(self, args)
    }

    /// String coercion that never invokes guest code
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.clone(),
            Value::Object(o) => match o.as_any().downcast_ref::<PlainObject>() {
                Some(array) if array.class_name() == "Array" => array
                    .array_items()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(","),
                _ => format!("[object {}]", o.class_name()),
            },
        }
    }

    /// Number coercion
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Object(_) => f64::NAN,
        }
    }

    /// Short diagnostic rendering, used by logs
    pub fn describe(&self) -> String {
        match self {
            Value::String(s) => format!("{:?}", s),
            Value::Object(o) if o.is_callable() => format!("[function {}]", o.class_name()),
            other => other.to_js_string(),
        }
    }
}

/// Allocation identity of two objects, ignoring vtables
pub fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(o) => write!(f, "[object {}]", o.class_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Positional argument access with `undefined` for missing arguments
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}
