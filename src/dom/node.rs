//! Synthetic nodes and their script-facing surface

use std::any::Any;
use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::document;
use super::style::StyleDeclaration;
use super::tree::{GraphInner, NodeGraph};
use super::{NodeUid, IDENTITY_KEY};
use crate::disguise::native;
use crate::events::{listener_method, Event, EventInit, EventRegistry, EventTarget, LISTENER_METHODS};
use crate::host::media;
use crate::value::{arg, Completion, HostObject, PlainObject, PropertyDescriptor, Value};

pub type NodeRef = Rc<SyntheticNode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Text,
    Comment,
    Fragment,
    /// The shared inert fallback node
    Sentinel,
}

impl NodeKind {
    /// DOM `nodeType` constant
    pub fn node_type(self) -> u32 {
        match self {
            NodeKind::Element | NodeKind::Sentinel => 1,
            NodeKind::Text => 3,
            NodeKind::Comment => 8,
            NodeKind::Document => 9,
            NodeKind::Fragment => 11,
        }
    }
}

/// Methods every attachable node carries
const NODE_METHODS: &[&str] = &[
    "appendChild",
    "insertBefore",
    "replaceChild",
    "removeChild",
    "contains",
    "hasChildNodes",
    "addEventListener",
    "removeEventListener",
    "dispatchEvent",
];

const ELEMENT_METHODS: &[&str] = &[
    "remove",
    "getAttribute",
    "setAttribute",
    "removeAttribute",
    "hasAttribute",
    "getElementsByTagName",
    "getElementsByClassName",
    "querySelector",
    "querySelectorAll",
    "getBoundingClientRect",
    "getClientRects",
    "click",
    "focus",
    "blur",
];

const CANVAS_METHODS: &[&str] = &["getContext", "toDataURL"];

const MEDIA_METHODS: &[&str] = &["canPlayType", "play", "pause", "load"];

const MEDIA_TAGS: &[&str] = &["AUDIO", "VIDEO"];

const QUERY_METHODS: &[&str] = &[
    "getElementsByTagName",
    "getElementsByClassName",
    "querySelector",
    "querySelectorAll",
];

/// Properties backed directly by an attribute of the same name
const REFLECTED_ATTRIBUTES: &[&str] = &[
    "name", "type", "src", "href", "value", "placeholder", "alt", "rel", "action", "method",
    "target", "lang", "dir",
];

/// Boolean properties backed by attribute presence
const FLAG_ATTRIBUTES: &[&str] = &["checked", "disabled", "hidden", "readOnly", "required"];

/// Elements serialized without a closing tag
const VOID_TAGS: &[&str] = &["AREA", "BR", "COL", "EMBED", "HR", "IMG", "INPUT", "LINK", "META", "SOURCE", "WBR"];

const READONLY_KEYS: &[&str] = &[
    IDENTITY_KEY,
    "nodeType",
    "nodeName",
    "tagName",
    "localName",
    "parentNode",
    "parentElement",
    "childNodes",
    "children",
    "childElementCount",
    "firstChild",
    "lastChild",
    "nextSibling",
    "previousSibling",
    "firstElementChild",
    "lastElementChild",
    "nextElementSibling",
    "previousElementSibling",
    "ownerDocument",
    "isConnected",
    "attributes",
    "classList",
    "offsetWidth",
    "offsetHeight",
    "offsetTop",
    "offsetLeft",
    "offsetParent",
    "clientWidth",
    "clientHeight",
];

/// A node of the synthetic tree.
///
/// Children are owned; the parent link is weak. Host-side mutation goes
/// through [`NodeGraph`], which maintains the single-parent invariant.
pub struct SyntheticNode {
    kind: NodeKind,
    tag: String,
    uid: NodeUid,
    graph: Weak<GraphInner>,
    parent: RefCell<Weak<SyntheticNode>>,
    pub(super) children: RefCell<Vec<NodeRef>>,
    attributes: RefCell<IndexMap<String, String>>,
    style: RefCell<IndexMap<String, String>>,
    text: RefCell<String>,
    expando: PlainObject,
    events: EventRegistry,
    methods: RefCell<HashMap<String, Value>>,
    style_object: OnceCell<Rc<StyleDeclaration>>,
    /// Canvas rendering context and the kind it was created for
    context: RefCell<Option<(String, Value)>>,
    this: Weak<SyntheticNode>,
}

impl SyntheticNode {
    pub(super) fn new(kind: NodeKind, tag: &str, uid: NodeUid, graph: Weak<GraphInner>) -> NodeRef {
        Rc::new_cyclic(|this| Self {
            kind,
            tag: tag.to_string(),
            uid,
            graph,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            attributes: RefCell::new(IndexMap::new()),
            style: RefCell::new(IndexMap::new()),
            text: RefCell::new(String::new()),
            expando: PlainObject::new(kind_class(kind, tag)),
            events: EventRegistry::new(),
            methods: RefCell::new(HashMap::new()),
            style_object: OnceCell::new(),
            context: RefCell::new(None),
            this: this.clone(),
        })
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Upper-case tag for elements, `#text` style names otherwise
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn uid(&self) -> NodeUid {
        self.uid
    }

    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind == NodeKind::Sentinel
    }

    /// Strong handle to this node
    pub fn handle(&self) -> Option<NodeRef> {
        self.this.upgrade()
    }

    pub fn to_value(&self) -> Value {
        self.handle().map(Value::from_host).unwrap_or_default()
    }

    pub fn graph(&self) -> Option<NodeGraph> {
        self.graph.upgrade().map(NodeGraph::from_inner)
    }

    /// Raw parent link; `None` when detached
    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.borrow().upgrade()
    }

    pub(super) fn set_parent(&self, parent: Option<&NodeRef>) {
        *self.parent.borrow_mut() = parent.map(Rc::downgrade).unwrap_or_default();
    }

    pub fn children(&self) -> Vec<NodeRef> {
        self.children.borrow().clone()
    }

    pub fn element_children(&self) -> Vec<NodeRef> {
        self.children
            .borrow()
            .iter()
            .filter(|c| c.is_element())
            .cloned()
            .collect()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        if name == "style" && !self.style.borrow().is_empty() {
            return Some(self.css_text());
        }
        self.attributes.borrow().get(name).cloned()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        if self.is_sentinel() {
            return;
        }
        if name == "style" {
            self.set_css_text(value);
            return;
        }
        self.attributes
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
    }

    pub fn remove_attribute(&self, name: &str) -> bool {
        if name == "style" {
            self.style.borrow_mut().clear();
        }
        self.attributes.borrow_mut().shift_remove(name).is_some()
    }

    pub fn attributes(&self) -> Vec<(String, String)> {
        self.attributes
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn id(&self) -> String {
        self.attribute("id").unwrap_or_default()
    }

    pub fn classes(&self) -> Vec<String> {
        self.attribute("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().iter().any(|c| c == class)
    }

    pub fn style_value(&self, property: &str) -> Option<String> {
        self.style.borrow().get(property).cloned()
    }

    /// Set one style property; an empty value removes it
    pub fn set_style(&self, property: &str, value: &str) {
        if self.is_sentinel() || property.is_empty() {
            return;
        }
        let value = value.trim();
        if value.is_empty() {
            self.style.borrow_mut().shift_remove(property);
        } else {
            self.style
                .borrow_mut()
                .insert(property.to_string(), value.to_string());
        }
    }

    pub fn remove_style(&self, property: &str) -> Option<String> {
        self.style.borrow_mut().shift_remove(property)
    }

    pub fn style_entries(&self) -> Vec<(String, String)> {
        self.style
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Style map rendered as `a: b; c: d;`
    pub fn css_text(&self) -> String {
        self.style
            .borrow()
            .iter()
            .map(|(k, v)| format!("{}: {};", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Replace the whole style map from `a: b; c: d` text
    pub fn set_css_text(&self, text: &str) {
        if self.is_sentinel() {
            return;
        }
        self.style.borrow_mut().clear();
        for declaration in text.split(';') {
            if let Some((property, value)) = declaration.split_once(':') {
                self.set_style(property.trim(), value);
            }
        }
    }

    /// Character data of text and comment nodes
    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    pub fn set_text(&self, text: &str) {
        if !self.is_sentinel() {
            *self.text.borrow_mut() = text.to_string();
        }
    }

    /// Concatenated character data of the subtree
    pub fn text_content(&self) -> String {
        match self.kind {
            NodeKind::Text | NodeKind::Comment => self.text(),
            _ => {
                let mut out = String::new();
                collect_text(self, &mut out);
                out
            }
        }
    }

    /// Markup of the children
    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        for child in self.children.borrow().iter() {
            serialize(child, &mut out);
        }
        out
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        serialize(self, &mut out);
        out
    }

    fn supports(&self, name: &str) -> bool {
        match self.kind {
            NodeKind::Element | NodeKind::Sentinel => {
                NODE_METHODS.contains(&name)
                    || ELEMENT_METHODS.contains(&name)
                    || (self.tag == "CANVAS" && CANVAS_METHODS.contains(&name))
                    || (self.is_media() && MEDIA_METHODS.contains(&name))
            }
            NodeKind::Text | NodeKind::Comment => NODE_METHODS.contains(&name) || name == "remove",
            NodeKind::Document => {
                NODE_METHODS.contains(&name)
                    || QUERY_METHODS.contains(&name)
                    || document::DOCUMENT_METHODS.contains(&name)
            }
            NodeKind::Fragment => {
                NODE_METHODS.contains(&name) || name == "querySelector" || name == "querySelectorAll"
            }
        }
    }

    /// Masked method bound to this node, built once per node
    fn method(&self, name: &str) -> Option<Value> {
        if !self.supports(name) {
            return None;
        }
        if let Some(method) = self.methods.borrow().get(name) {
            return Some(method.clone());
        }
        let method = if LISTENER_METHODS.contains(&name) {
            listener_method(name, self.this.clone())
        } else {
            let owner = self.this.clone();
            let bound = name.to_string();
            native(name, move |_, args| match owner.upgrade() {
                Some(node) => invoke(&node, &bound, args),
                None => Ok(Value::Undefined),
            })
        };
        self.methods
            .borrow_mut()
            .insert(name.to_string(), method.clone());
        Some(method)
    }

    fn is_media(&self) -> bool {
        MEDIA_TAGS.contains(&self.tag.as_str())
    }

    /// `canvas.width`/`canvas.height`, falling back to the default bitmap size
    fn canvas_size(&self, key: &str) -> Value {
        let fallback = if key == "width" { media::CANVAS_WIDTH } else { media::CANVAS_HEIGHT };
        let size = self
            .attribute(key)
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(fallback);
        Value::from(size)
    }

    /// `getContext(kind)`. The first kind asked for sticks; any other kind
    /// answers `null` afterwards.
    fn rendering_context(&self, kind: &str) -> Value {
        if let Some((created, context)) = self.context.borrow().as_ref() {
            return if created == kind { context.clone() } else { Value::Null };
        }
        let Some(context) = media::canvas_context(kind) else {
            return Value::Null;
        };
        *self.context.borrow_mut() = Some((kind.to_string(), context.clone()));
        context
    }

    fn style_object(&self) -> Value {
        let style = self
            .style_object
            .get_or_init(|| StyleDeclaration::new(self.this.clone()));
        Value::from_host(style.clone())
    }

    /// Common script-facing properties
    fn property(&self, key: &str, graph: &NodeGraph) -> Option<Value> {
        let element = matches!(self.kind, NodeKind::Element | NodeKind::Sentinel);
        let character_data = matches!(self.kind, NodeKind::Text | NodeKind::Comment);
        let value = match key {
            "nodeType" => Value::from(self.kind.node_type()),
            "nodeName" => Value::from(self.tag.as_str()),
            "tagName" if element => Value::from(self.tag.as_str()),
            "localName" if element => Value::from(self.tag.to_ascii_lowercase()),
            "namespaceURI" if element => Value::from("http://www.w3.org/1999/xhtml"),
            "id" if element => Value::from(self.id()),
            "className" if element => Value::from(self.attribute("class").unwrap_or_default()),
            "textContent" if self.kind == NodeKind::Document => Value::Null,
            "textContent" | "innerText" => Value::from(self.text_content()),
            "innerHTML" if element => Value::from(self.inner_html()),
            "outerHTML" if element => Value::from(self.outer_html()),
            "data" | "nodeValue" if character_data => Value::from(self.text()),
            "nodeValue" => Value::Null,
            "length" if character_data => Value::from(self.text.borrow().chars().count()),
            "parentNode" => match self.kind {
                NodeKind::Document | NodeKind::Sentinel => Value::Null,
                _ => graph.parent_of(self).to_value(),
            },
            "parentElement" => self
                .parent()
                .filter(|p| p.is_element())
                .map(Value::from_host)
                .into(),
            "childNodes" => node_list("NodeList", self.children()),
            "children" => node_list("HTMLCollection", self.element_children()),
            "childElementCount" => Value::from(self.element_children().len()),
            "firstChild" => self.children.borrow().first().cloned().map(Value::from_host).into(),
            "lastChild" => self.children.borrow().last().cloned().map(Value::from_host).into(),
            "firstElementChild" => self.element_children().first().cloned().map(Value::from_host).into(),
            "lastElementChild" => self.element_children().last().cloned().map(Value::from_host).into(),
            "nextSibling" => sibling(self, 1, false).map(Value::from_host).into(),
            "previousSibling" => sibling(self, -1, false).map(Value::from_host).into(),
            "nextElementSibling" => sibling(self, 1, true).map(Value::from_host).into(),
            "previousElementSibling" => sibling(self, -1, true).map(Value::from_host).into(),
            "ownerDocument" => match self.kind {
                NodeKind::Document => Value::Null,
                _ => graph.document().map(Value::from_host).into(),
            },
            "isConnected" => Value::Bool(graph.is_connected(self)),
            "style" if element => self.style_object(),
            "classList" if element => class_list(self),
            "attributes" if element => named_node_map(self),
            "width" | "height" if self.tag == "CANVAS" => self.canvas_size(key),
            "paused" if self.is_media() => Value::Bool(true),
            "readyState" if self.is_media() => Value::from(0),
            "networkState" if self.is_media() => Value::from(1),
            "currentTime" if self.is_media() => Value::from(0),
            "offsetWidth" | "clientWidth" | "scrollWidth" if element => {
                Value::from(graph.layout().measure(self).width)
            }
            "offsetHeight" | "clientHeight" | "scrollHeight" if element => {
                Value::from(graph.layout().measure(self).height)
            }
            "offsetLeft" if element => Value::from(graph.layout().measure(self).x),
            "offsetTop" if element => Value::from(graph.layout().measure(self).y),
            "clientTop" | "clientLeft" | "scrollTop" | "scrollLeft" if element => Value::from(0),
            "offsetParent" if element => {
                if graph.layout().measure(self).is_empty() || !graph.is_connected(self) {
                    Value::Null
                } else {
                    graph.body().map(Value::from_host).into()
                }
            }
            _ if element && REFLECTED_ATTRIBUTES.contains(&key) => {
                Value::from(self.attribute(key).unwrap_or_default())
            }
            _ if element && FLAG_ATTRIBUTES.contains(&key) => {
                Value::Bool(self.attribute(&key.to_ascii_lowercase()).is_some())
            }
            _ => return None,
        };
        Some(value)
    }

    fn assign(&self, key: &str, value: &Value, graph: &NodeGraph) -> bool {
        let element = self.kind == NodeKind::Element;
        let text = value.to_js_string();
        match key {
            "id" if element => self.set_attribute("id", &text),
            "className" if element => self.set_attribute("class", &text),
            "style" if element => self.set_css_text(&text),
            "width" | "height" if element && self.tag == "CANVAS" => {
                let size = value.to_number();
                let size = if size.is_finite() && size >= 0.0 { size as u32 } else { 0 };
                self.set_attribute(key, &size.to_string());
            }
            "data" | "nodeValue" | "textContent"
                if matches!(self.kind, NodeKind::Text | NodeKind::Comment) =>
            {
                self.set_text(&text)
            }
            "textContent" | "innerText" | "innerHTML"
                if matches!(self.kind, NodeKind::Element | NodeKind::Fragment) =>
            {
                let text = if value.is_nullish() { String::new() } else { text };
                graph.replace_children_with_text(self, &text);
            }
            "nodeValue" => {}
            _ if element && REFLECTED_ATTRIBUTES.contains(&key) => self.set_attribute(key, &text),
            _ if element && FLAG_ATTRIBUTES.contains(&key) => {
                let attribute = key.to_ascii_lowercase();
                if value.truthy() {
                    self.set_attribute(&attribute, "");
                } else {
                    self.remove_attribute(&attribute);
                }
            }
            _ if READONLY_KEYS.contains(&key) => return false,
            _ => return self.expando.set(key, value.clone()),
        }
        true
    }
}

impl HostObject for SyntheticNode {
    fn class_name(&self) -> &str {
        self.expando.class_name()
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        if key == IDENTITY_KEY {
            return Ok(Value::from(self.uid.to_string()));
        }
        if let Some(value) = self.expando.lookup(key) {
            return Ok(value);
        }
        if let Some(method) = self.method(key) {
            return Ok(method);
        }
        let Some(graph) = self.graph() else {
            return Ok(Value::Undefined);
        };
        if self.kind == NodeKind::Document {
            if let Some(value) = document::property(self, key, &graph) {
                return Ok(value);
            }
        }
        if let Some(value) = self.property(key, &graph) {
            return Ok(value);
        }
        // Unset handler slots read as null
        if key.len() > 2 && key.starts_with("on") && key[2..].chars().all(|c| c.is_ascii_lowercase()) {
            return Ok(Value::Null);
        }
        Ok(Value::Undefined)
    }

    fn set(&self, key: &str, value: Value) -> bool {
        if self.is_sentinel() {
            return false;
        }
        let Some(graph) = self.graph() else {
            return false;
        };
        if self.kind == NodeKind::Document {
            if let Some(handled) = document::assign(self, key, &value, &graph) {
                return handled;
            }
        }
        self.assign(key, &value, &graph)
    }

    fn delete(&self, key: &str) -> bool {
        !self.is_sentinel() && self.expando.delete(key)
    }

    fn own_keys(&self) -> Vec<String> {
        self.expando.own_keys()
    }

    fn own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        self.expando.own_property(key)
    }

    fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> bool {
        !self.is_sentinel() && self.expando.define_property(key, descriptor)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl EventTarget for SyntheticNode {
    fn event_registry(&self) -> &EventRegistry {
        &self.events
    }

    fn event_receiver(&self) -> Value {
        self.to_value()
    }

    /// Dispatch on this node, then up the ancestor chain for bubbling events
    fn dispatch_event(&self, event: &Value) -> bool {
        if self.is_sentinel() {
            return true;
        }
        let mut not_cancelled = self.events.dispatch(&self.to_value(), event);
        if !event.get_or_undefined("bubbles").truthy() {
            return not_cancelled;
        }
        let mut cursor = self.parent();
        while let Some(ancestor) = cursor {
            if event.downcast::<Event>().is_some_and(Event::propagation_stopped) {
                break;
            }
            not_cancelled &= ancestor.events.dispatch(&ancestor.to_value(), event);
            cursor = ancestor.parent();
        }
        not_cancelled
    }
}

fn kind_class(kind: NodeKind, tag: &str) -> String {
    match kind {
        NodeKind::Document => "HTMLDocument".to_string(),
        NodeKind::Text => "Text".to_string(),
        NodeKind::Comment => "Comment".to_string(),
        NodeKind::Fragment => "DocumentFragment".to_string(),
        NodeKind::Element | NodeKind::Sentinel => element_class(tag).to_string(),
    }
}

fn element_class(tag: &str) -> &'static str {
    match tag {
        "HTML" => "HTMLHtmlElement",
        "HEAD" => "HTMLHeadElement",
        "BODY" => "HTMLBodyElement",
        "DIV" => "HTMLDivElement",
        "SPAN" => "HTMLSpanElement",
        "A" => "HTMLAnchorElement",
        "FORM" => "HTMLFormElement",
        "INPUT" => "HTMLInputElement",
        "SCRIPT" => "HTMLScriptElement",
        "IFRAME" => "HTMLIFrameElement",
        "IMG" => "HTMLImageElement",
        "CANVAS" => "HTMLCanvasElement",
        "P" => "HTMLParagraphElement",
        "BUTTON" => "HTMLButtonElement",
        "STYLE" => "HTMLStyleElement",
        "LINK" => "HTMLLinkElement",
        "META" => "HTMLMetaElement",
        _ => "HTMLElement",
    }
}

fn collect_text(node: &SyntheticNode, out: &mut String) {
    for child in node.children.borrow().iter() {
        match child.kind {
            NodeKind::Text => out.push_str(&child.text.borrow()),
            NodeKind::Element | NodeKind::Fragment => collect_text(child, out),
            _ => {}
        }
    }
}

fn serialize(node: &SyntheticNode, out: &mut String) {
    match node.kind {
        NodeKind::Text => out.push_str(&escape(&node.text.borrow())),
        NodeKind::Comment => {
            out.push_str("<!--");
            out.push_str(&node.text.borrow());
            out.push_str("-->");
        }
        NodeKind::Element => {
            let tag = node.tag.to_ascii_lowercase();
            out.push('<');
            out.push_str(&tag);
            for (name, value) in node.attributes.borrow().iter() {
                out.push_str(&format!(" {}=\"{}\"", name, escape(value).replace('"', "&quot;")));
            }
            if !node.style.borrow().is_empty() {
                out.push_str(&format!(" style=\"{}\"", escape(&node.css_text())));
            }
            out.push('>');
            if VOID_TAGS.contains(&node.tag.as_str()) {
                return;
            }
            for child in node.children.borrow().iter() {
                serialize(child, out);
            }
            out.push_str(&format!("</{}>", tag));
        }
        NodeKind::Document | NodeKind::Fragment | NodeKind::Sentinel => {
            for child in node.children.borrow().iter() {
                serialize(child, out);
            }
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Neighbor at `offset` among the parent's (element) children
fn sibling(node: &SyntheticNode, offset: isize, elements_only: bool) -> Option<NodeRef> {
    let parent = node.parent()?;
    let siblings: Vec<NodeRef> = if elements_only {
        parent.element_children()
    } else {
        parent.children()
    };
    let index = siblings.iter().position(|c| c.uid == node.uid)?;
    let target = index.checked_add_signed(offset)?;
    siblings.get(target).cloned()
}

/// Array-like snapshot of nodes with `item` and `forEach`
pub(crate) fn node_list(class: &str, nodes: Vec<NodeRef>) -> Value {
    let items: Vec<Value> = nodes.into_iter().map(Value::from_host).collect();
    let list = PlainObject::array_like(class, items.clone());
    let indexed = items.clone();
    list.define(
        "item",
        PropertyDescriptor::hidden(native("item", move |_, args| {
            let index = arg(args, 0).to_number();
            if index.fract() != 0.0 || index < 0.0 {
                return Ok(Value::Null);
            }
            Ok(indexed.get(index as usize).cloned().unwrap_or(Value::Null))
        })),
    );
    list.define(
        "forEach",
        PropertyDescriptor::hidden(native("forEach", move |this, args| {
            let callback = arg(args, 0);
            for (index, item) in items.iter().enumerate() {
                callback.call(&arg(args, 1), &[item.clone(), Value::from(index), this.clone()])?;
            }
            Ok(Value::Undefined)
        })),
    );
    Value::from_host(Rc::new(list))
}

/// `classList` view over the `class` attribute
fn class_list(node: &SyntheticNode) -> Value {
    let classes = node.classes();
    let list = PlainObject::array_like(
        "DOMTokenList",
        classes.iter().map(Value::from).collect(),
    );
    list.define("value", PropertyDescriptor::hidden(Value::from(classes.join(" "))));

    let owner = node.this.clone();
    let edit = move |owner: &Weak<SyntheticNode>, f: &dyn Fn(&mut Vec<String>) -> bool| -> bool {
        let Some(node) = owner.upgrade() else {
            return false;
        };
        let mut classes = node.classes();
        let result = f(&mut classes);
        node.set_attribute("class", &classes.join(" "));
        result
    };
    let edit = Rc::new(edit);

    let add = {
        let (owner, edit) = (owner.clone(), edit.clone());
        native("add", move |_, args| {
            edit(&owner, &|classes: &mut Vec<String>| {
                for token in args.iter().map(Value::to_js_string) {
                    if !classes.contains(&token) {
                        classes.push(token);
                    }
                }
                true
            });
            Ok(Value::Undefined)
        })
    };
    let remove = {
        let (owner, edit) = (owner.clone(), edit.clone());
        native("remove", move |_, args| {
            let tokens: Vec<String> = args.iter().map(Value::to_js_string).collect();
            edit(&owner, &|classes: &mut Vec<String>| {
                classes.retain(|c| !tokens.contains(c));
                true
            });
            Ok(Value::Undefined)
        })
    };
    let toggle = {
        let (owner, edit) = (owner.clone(), edit.clone());
        native("toggle", move |_, args| {
            let token = arg(args, 0).to_js_string();
            let force = arg(args, 1);
            let present = edit(&owner, &|classes: &mut Vec<String>| {
                let has = classes.contains(&token);
                let want = if force.is_undefined() { !has } else { force.truthy() };
                if want && !has {
                    classes.push(token.clone());
                } else if !want {
                    classes.retain(|c| *c != token);
                }
                want
            });
            Ok(Value::Bool(present))
        })
    };
    let contains = native("contains", move |_, args| {
        let token = arg(args, 0).to_js_string();
        Ok(Value::Bool(
            owner.upgrade().is_some_and(|node| node.has_class(&token)),
        ))
    });

    for (name, method) in [("add", add), ("remove", remove), ("toggle", toggle), ("contains", contains)] {
        list.define(name, PropertyDescriptor::hidden(method));
    }
    Value::from_host(Rc::new(list))
}

/// Script-invoked node methods
fn invoke(node: &NodeRef, name: &str, args: &[Value]) -> Completion {
    let Some(graph) = node.graph() else {
        return Ok(Value::Undefined);
    };
    if node.kind == NodeKind::Document {
        if let Some(result) = document::invoke(node, &graph, name, args) {
            return result;
        }
    }
    let first = arg(args, 0);
    match name {
        "appendChild" => Ok(match graph.append(node, &first) {
            Some(_) => first,
            None => Value::Null,
        }),
        "insertBefore" => Ok(match graph.insert_before(node, &first, &arg(args, 1)) {
            Some(_) => first,
            None => Value::Null,
        }),
        "replaceChild" => {
            let old = arg(args, 1);
            Ok(match graph.replace(node, &first, &old) {
                Some(_) => old,
                None => first,
            })
        }
        "removeChild" => {
            graph.remove(node, &first);
            Ok(first)
        }
        "remove" => {
            graph.detach(node);
            Ok(Value::Undefined)
        }
        "contains" => Ok(Value::Bool(graph.contains(node, &first))),
        "hasChildNodes" => Ok(Value::Bool(!node.children.borrow().is_empty())),
        "getAttribute" => Ok(node.attribute(&attribute_name(&first)).into()),
        "setAttribute" => {
            node.set_attribute(&attribute_name(&first), &arg(args, 1).to_js_string());
            Ok(Value::Undefined)
        }
        "removeAttribute" => {
            node.remove_attribute(&attribute_name(&first));
            Ok(Value::Undefined)
        }
        "hasAttribute" => Ok(Value::Bool(node.attribute(&attribute_name(&first)).is_some())),
        "getElementsByTagName" => Ok(node_list(
            "HTMLCollection",
            graph.find_all_by_tag(node, &first.to_js_string()),
        )),
        "getElementsByClassName" => Ok(node_list(
            "HTMLCollection",
            graph.find_all_by_class(node, &first.to_js_string()),
        )),
        "querySelector" => Ok(graph
            .query(node, &first.to_js_string())
            .map(Value::from_host)
            .into()),
        "querySelectorAll" => Ok(node_list("NodeList", graph.query_all(node, &first.to_js_string()))),
        "getBoundingClientRect" => Ok(graph.layout().measure(node).to_rect()),
        "getClientRects" => {
            let rect = graph.layout().measure(node);
            let rects = if rect.is_empty() { vec![] } else { vec![rect.to_rect()] };
            Ok(Value::from_host(Rc::new(PlainObject::array_like("DOMRectList", rects))))
        }
        "click" => {
            let event = Event::new(
                "click",
                EventInit {
                    bubbles: true,
                    cancelable: true,
                    trusted: false,
                },
            );
            node.dispatch_event(&Value::from_host(event));
            Ok(Value::Undefined)
        }
        "focus" => {
            if !node.is_sentinel() && graph.is_connected(node) {
                graph.set_active_element(Some(node));
                node.dispatch_event(&Value::from_host(Event::new("focus", EventInit::default())));
            }
            Ok(Value::Undefined)
        }
        "getContext" => Ok(node.rendering_context(&first.to_js_string())),
        "toDataURL" => Ok(Value::from(media::BLANK_DATA_URL)),
        "canPlayType" => Ok(Value::from(media::can_play_type(&first.to_js_string()))),
        "play" => Ok(media::resolved(&graph.queue(), Value::Undefined)),
        "blur" => {
            if graph.active_element().is_some_and(|active| active.uid == node.uid) {
                graph.set_active_element(None);
                node.dispatch_event(&Value::from_host(Event::new("blur", EventInit::default())));
            }
            Ok(Value::Undefined)
        }
        _ => Ok(Value::Undefined),
    }
}

/// `element.attributes`, a snapshot taken at read time
fn named_node_map(node: &SyntheticNode) -> Value {
    let attributes = node
        .attributes()
        .into_iter()
        .map(|(name, value)| {
            Value::from_host(Rc::new(PlainObject::with_props(
                "Attr",
                [
                    ("name", Value::from(name)),
                    ("value", Value::from(value)),
                    ("specified", Value::Bool(true)),
                ],
            )))
        })
        .collect::<Vec<_>>();
    let map = PlainObject::array_like("NamedNodeMap", attributes.clone());
    let items = attributes.clone();
    map.define(
        "item",
        PropertyDescriptor::hidden(native("item", move |_, args| {
            let index = arg(args, 0).to_number();
            Ok(if index >= 0.0 && index.fract() == 0.0 {
                items.get(index as usize).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            })
        })),
    );
    map.define(
        "getNamedItem",
        PropertyDescriptor::hidden(native("getNamedItem", move |_, args| {
            let wanted = attribute_name(&arg(args, 0));
            Ok(attributes
                .iter()
                .find(|attr| attr.get_or_undefined("name").as_str() == Some(wanted.as_str()))
                .cloned()
                .unwrap_or(Value::Null))
        })),
    );
    Value::from_host(Rc::new(map))
}

fn attribute_name(value: &Value) -> String {
    value.to_js_string().to_ascii_lowercase()
}
