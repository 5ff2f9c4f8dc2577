//! `localStorage` / `sessionStorage`

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::disguise::native;
use crate::value::{arg, Completion, HostObject, Value};

const METHODS: &[&str] = &["getItem", "setItem", "removeItem", "clear", "key"];

/// String -> string store. Items are also readable as properties.
pub struct Storage {
    items: RefCell<IndexMap<String, String>>,
    this: Weak<Storage>,
}

impl Storage {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            items: RefCell::default(),
            this: this.clone(),
        })
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    pub fn set_item(&self, key: &str, value: &str) {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove_item(&self, key: &str) -> Option<String> {
        self.items.borrow_mut().shift_remove(key)
    }

    pub fn key(&self, index: usize) -> Option<String> {
        self.items
            .borrow()
            .get_index(index)
            .map(|(key, _)| key.clone())
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.items.borrow_mut().clear();
    }

    fn method(&self, name: &str) -> Value {
        let owner = self.this.clone();
        match name {
            "getItem" => native(name, move |_, args| {
                let key = arg(args, 0).to_js_string();
                Ok(owner.upgrade().and_then(|s| s.get_item(&key)).into())
            }),
            "setItem" => native(name, move |_, args| {
                if let Some(storage) = owner.upgrade() {
                    storage.set_item(&arg(args, 0).to_js_string(), &arg(args, 1).to_js_string());
                }
                Ok(Value::Undefined)
            }),
            "removeItem" => native(name, move |_, args| {
                if let Some(storage) = owner.upgrade() {
                    storage.remove_item(&arg(args, 0).to_js_string());
                }
                Ok(Value::Undefined)
            }),
            "clear" => native(name, move |_, _| {
                if let Some(storage) = owner.upgrade() {
                    storage.clear();
                }
                Ok(Value::Undefined)
            }),
            "key" => native(name, move |_, args| {
                let index = arg(args, 0).to_number();
                if !(index >= 0.0 && index.fract() == 0.0) {
                    return Ok(Value::Null);
                }
                Ok(owner.upgrade().and_then(|s| s.key(index as usize)).into())
            }),
            _ => Value::Undefined,
        }
    }
}

impl HostObject for Storage {
    fn class_name(&self) -> &str {
        "Storage"
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        if METHODS.contains(&key) {
            return Ok(self.method(key));
        }
        if key == "length" {
            return Ok(Value::from(self.len()));
        }
        Ok(self.get_item(key).map_or(Value::Undefined, Value::from))
    }

    fn set(&self, key: &str, value: Value) -> bool {
        if key == "length" || METHODS.contains(&key) {
            return false;
        }
        self.set_item(key, &value.to_js_string());
        true
    }

    fn delete(&self, key: &str) -> bool {
        self.remove_item(key);
        true
    }

    fn own_keys(&self) -> Vec<String> {
        self.items.borrow().keys().cloned().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_surface() {
        let storage = Value::from_host(Storage::new());
        storage
            .call_method("setItem", &[Value::from("a"), Value::from(1)])
            .unwrap();
        storage
            .call_method("setItem", &[Value::from("b"), Value::from("two")])
            .unwrap();

        assert_eq!(
            storage.call_method("getItem", &[Value::from("a")]).unwrap().as_str(),
            Some("1")
        );
        assert!(matches!(
            storage.call_method("getItem", &[Value::from("zzz")]).unwrap(),
            Value::Null
        ));
        assert_eq!(
            storage.call_method("key", &[Value::from(1)]).unwrap().as_str(),
            Some("b")
        );
        assert!(storage.get_or_undefined("length").strict_eq(&Value::from(2)));
        assert_eq!(storage.get_or_undefined("b").as_str(), Some("two"));

        storage.call_method("removeItem", &[Value::from("a")]).unwrap();
        storage.call_method("clear", &[]).unwrap();
        assert!(storage.get_or_undefined("length").strict_eq(&Value::from(0)));
    }

    #[test]
    fn test_property_assignment_stores_string() {
        let storage = Storage::new();
        let value = Value::from_host(storage.clone());
        value.set("flag", Value::Bool(true));
        assert_eq!(storage.get_item("flag").as_deref(), Some("true"));
        assert!(!value.set("length", Value::from(9)));
    }
}
