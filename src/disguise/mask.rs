//! Built-in presentation for host callables

use crate::value::{Completion, HostObject, NativeFunction, PropertyDescriptor, Value};

/// Marker every built-in's source text carries
pub const NATIVE_MARKER: &str = "[native code]";

/// Source text a built-in named `name` stringifies to
pub fn native_source(name: &str) -> String {
    format!("function {}() {{ {} }}", name, NATIVE_MARKER)
}

/// Make `callable` stringify as a built-in named `label`.
///
/// The replacement `toString` is itself masked one level deep, so probing
/// `f.toString.toString()` also reports a built-in. Non-callables are
/// returned untouched.
pub fn mask(callable: Value, label: &str) -> Value {
    let Some(object) = callable.as_object().filter(|o| o.is_callable()) else {
        return callable;
    };

    let source = native_source(label);
    let to_string = NativeFunction::new("toString", move |_, _| Ok(Value::from(source.as_str())));
    to_string_masked_once(&to_string);

    object.define_property(
        "toString",
        PropertyDescriptor::hidden(Value::from_host(to_string)),
    );
    object.define_property("name", PropertyDescriptor::readonly(Value::from(label)));
    callable
}

fn to_string_masked_once(to_string: &NativeFunction) {
    to_string.define_property(
        "toString",
        PropertyDescriptor::hidden(NativeFunction::value("toString", |_, _| {
            Ok(Value::from(native_source("toString")))
        })),
    );
}

/// A masked host function in one step
pub fn native<F>(name: &str, behavior: F) -> Value
where
    F: Fn(&Value, &[Value]) -> Completion + 'static,
{
    mask(NativeFunction::value(name, behavior), name)
}

/// Whether `value` is a callable whose stringification reports a built-in.
///
/// A faulting `toString` counts as not native.
pub fn presents_native(value: &Value) -> bool {
    if !value.is_callable() {
        return false;
    }
    match value.call_method("toString", &[]) {
        Ok(Value::String(text)) => text.contains(NATIVE_MARKER),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PlainObject;
    use std::rc::Rc;

    #[test]
    fn test_mask_reports_builtin() {
        let f = NativeFunction::value("helper_42", |_, _| Ok(Value::Undefined));
        assert!(!presents_native(&f));

        let f = mask(f, "createElement");
        assert!(presents_native(&f));
        assert_eq!(
            f.call_method("toString", &[]).unwrap().as_str(),
            Some("function createElement() { [native code] }")
        );
        assert_eq!(f.get("name").unwrap().as_str(), Some("createElement"));
    }

    #[test]
    fn test_second_order_introspection_is_masked() {
        let f = native("atob", |_, _| Ok(Value::Undefined));
        let to_string = f.get("toString").unwrap();
        assert_eq!(
            to_string.call_method("toString", &[]).unwrap().as_str(),
            Some("function toString() { [native code] }")
        );
    }

    #[test]
    fn test_mask_keeps_behavior_and_hides_override() {
        let f = native("twice", |_, args| {
            Ok(Value::from(crate::value::arg(args, 0).to_number() * 2.0))
        });
        assert!(f.call(&Value::Undefined, &[Value::from(21)]).unwrap().strict_eq(&Value::from(42)));

        let descriptor = f.as_object().unwrap().own_property("toString").unwrap();
        assert!(!descriptor.enumerable);
        let name = f.as_object().unwrap().own_property("name").unwrap();
        assert!(!name.writable);
    }

    #[test]
    fn test_non_callables_pass_through() {
        let object = Value::from_host(Rc::new(PlainObject::new("Object")));
        let masked = mask(object.clone(), "nope");
        assert!(masked.strict_eq(&object));
        assert!(!presents_native(&masked));
    }
}
