//! `style` declarations backed by a node's style map

use std::any::Any;
use std::rc::{Rc, Weak};

use super::node::SyntheticNode;
use crate::disguise::native;
use crate::value::{arg, Completion, HostObject, Value};

/// Script-facing view of a node's inline style.
///
/// Property names are stored in kebab-case and accepted in either form.
pub struct StyleDeclaration {
    owner: Weak<SyntheticNode>,
}

impl StyleDeclaration {
    pub(crate) fn new(owner: Weak<SyntheticNode>) -> Rc<Self> {
        Rc::new(Self { owner })
    }

    fn node(&self) -> Option<Rc<SyntheticNode>> {
        self.owner.upgrade()
    }

    pub fn css_text(&self) -> String {
        self.node().map(|node| node.css_text()).unwrap_or_default()
    }

    fn method(&self, name: &str) -> Value {
        let owner = self.owner.clone();
        match name {
            "getPropertyValue" => native(name, move |_, args| {
                let value = owner
                    .upgrade()
                    .and_then(|node| node.style_value(&to_kebab(&arg(args, 0).to_js_string())));
                Ok(Value::from(value.unwrap_or_default()))
            }),
            "setProperty" => native(name, move |_, args| {
                if let Some(node) = owner.upgrade() {
                    let property = to_kebab(&arg(args, 0).to_js_string());
                    node.set_style(&property, &style_text(&arg(args, 1)));
                }
                Ok(Value::Undefined)
            }),
            "removeProperty" => native(name, move |_, args| {
                let removed = owner
                    .upgrade()
                    .and_then(|node| node.remove_style(&to_kebab(&arg(args, 0).to_js_string())));
                Ok(Value::from(removed.unwrap_or_default()))
            }),
            "item" => native(name, move |_, args| {
                let index = arg(args, 0).to_number();
                Ok(Value::from(
                    owner
                        .upgrade()
                        .and_then(|node| item(&node, index))
                        .unwrap_or_default(),
                ))
            }),
            _ => Value::Undefined,
        }
    }
}

fn item(node: &SyntheticNode, index: f64) -> Option<String> {
    if !(index >= 0.0 && index.fract() == 0.0) {
        return None;
    }
    node.style_entries()
        .into_iter()
        .nth(index as usize)
        .map(|(key, _)| key)
}

fn style_text(value: &Value) -> String {
    match value {
        Value::Undefined | Value::Null => String::new(),
        other => other.to_js_string(),
    }
}

/// `backgroundColor` -> `background-color`; kebab names pass through
pub fn to_kebab(name: &str) -> String {
    if name == "cssFloat" {
        return "float".to_string();
    }
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

impl HostObject for StyleDeclaration {
    fn class_name(&self) -> &str {
        "CSSStyleDeclaration"
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        Ok(match key {
            "length" => Value::from(self.node().map_or(0, |n| n.style_entries().len())),
            "cssText" => Value::from(self.css_text()),
            "parentRule" => Value::Null,
            "getPropertyValue" | "setProperty" | "removeProperty" | "item" => self.method(key),
            "toString" | "valueOf" | "constructor" | "toJSON" => Value::Undefined,
            _ => match key.parse::<f64>() {
                Ok(index) => Value::from(self.node().and_then(|n| item(&n, index)).unwrap_or_default()),
                Err(_) => Value::from(
                    self.node()
                        .and_then(|n| n.style_value(&to_kebab(key)))
                        .unwrap_or_default(),
                ),
            },
        })
    }

    fn set(&self, key: &str, value: Value) -> bool {
        let Some(node) = self.node() else {
            return false;
        };
        match key {
            "cssText" => node.set_css_text(&style_text(&value)),
            "length" | "parentRule" => return false,
            _ => node.set_style(&to_kebab(key), &style_text(&value)),
        }
        true
    }

    fn delete(&self, key: &str) -> bool {
        if let Some(node) = self.node() {
            node.remove_style(&to_kebab(key));
        }
        true
    }

    fn own_keys(&self) -> Vec<String> {
        self.node()
            .map(|n| n.style_entries().into_iter().map(|(k, _)| k).collect())
            .unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
