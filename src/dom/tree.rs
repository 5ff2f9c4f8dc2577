//! Structural operations over the synthetic tree

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::node::{NodeKind, NodeRef, SyntheticNode};
use super::selector::Selector;
use super::{LookupPolicy, NodeUid, IDENTITY_KEY};
use crate::host::cookies::CookieJar;
use crate::host::timers::TaskQueue;
use crate::intercept;
use crate::layout::LayoutEstimator;
use crate::value::{HostObject, Value};

/// Registry size at which dead entries are swept
const SWEEP_THRESHOLD: usize = 1024;

pub(crate) struct GraphInner {
    salt: u32,
    sequence: Cell<u64>,
    registry: RefCell<HashMap<NodeUid, Weak<SyntheticNode>>>,
    sentinel: NodeRef,
    policy: Cell<LookupPolicy>,
    layout: LayoutEstimator,
    pub(super) document: RefCell<Option<NodeRef>>,
    pub(super) active: RefCell<Weak<SyntheticNode>>,
    pub(super) ready_state: RefCell<String>,
    pub(super) url: RefCell<String>,
    pub(super) title: RefCell<String>,
    pub(super) cookies: RefCell<Option<Rc<CookieJar>>>,
    pub(super) window: RefCell<Option<Weak<dyn HostObject>>>,
    pub(super) queue: RefCell<Weak<TaskQueue>>,
}

/// Handle to one synthetic tree and its node registry
#[derive(Clone)]
pub struct NodeGraph {
    inner: Rc<GraphInner>,
}

/// A node argument resolved for positional lookup.
///
/// Carries the identity tag (readable through wrappers) and, when the
/// argument is a raw node, the node itself.
#[derive(Clone, Default)]
pub struct Locator {
    uid: Option<NodeUid>,
    node: Option<NodeRef>,
}

impl Locator {
    pub fn of(value: &Value) -> Self {
        // Host-side lookups read through wrappers without touching the access log
        let value = &intercept::unwrap(value);
        if let Some(node) = value.downcast::<SyntheticNode>() {
            return Self {
                uid: Some(node.uid()),
                node: node.handle(),
            };
        }
        let uid = value
            .as_object()
            .and_then(|_| value.get(IDENTITY_KEY).ok())
            .and_then(|tag| tag.as_str()?.parse().ok());
        Self { uid, node: None }
    }

    pub fn uid(&self) -> Option<NodeUid> {
        self.uid
    }

    pub fn is_empty(&self) -> bool {
        self.uid.is_none() && self.node.is_none()
    }

    pub fn matches(&self, node: &SyntheticNode) -> bool {
        self.uid == Some(node.uid())
            || self
                .node
                .as_ref()
                .is_some_and(|n| std::ptr::eq(Rc::as_ptr(n), node))
    }

    /// Index among `children`: identity tag first, then reference
    pub fn position_in(&self, children: &[NodeRef]) -> Option<usize> {
        if let Some(uid) = self.uid {
            if let Some(index) = children.iter().position(|c| c.uid() == uid) {
                return Some(index);
            }
        }
        let node = self.node.as_ref()?;
        children.iter().position(|c| Rc::ptr_eq(c, node))
    }
}

impl NodeGraph {
    pub fn new(policy: LookupPolicy, layout: LayoutEstimator) -> Self {
        let salt = rand::random::<u32>();
        let inner = Rc::new_cyclic(|weak| GraphInner {
            salt,
            sequence: Cell::new(0),
            registry: RefCell::new(HashMap::new()),
            sentinel: SyntheticNode::new(NodeKind::Sentinel, "DIV", NodeUid::new(salt, 0), weak.clone()),
            policy: Cell::new(policy),
            layout,
            document: RefCell::new(None),
            active: RefCell::new(Weak::new()),
            ready_state: RefCell::new("loading".to_string()),
            url: RefCell::new("about:blank".to_string()),
            title: RefCell::new(String::new()),
            cookies: RefCell::new(None),
            window: RefCell::new(None),
            queue: RefCell::new(Weak::new()),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<GraphInner>) -> Self {
        Self { inner }
    }

    pub(super) fn inner(&self) -> &GraphInner {
        &self.inner
    }

    pub fn policy(&self) -> LookupPolicy {
        self.inner.policy.get()
    }

    pub fn set_policy(&self, policy: LookupPolicy) {
        self.inner.policy.set(policy);
    }

    pub fn layout(&self) -> &LayoutEstimator {
        &self.inner.layout
    }

    /// The shared inert fallback node
    pub fn sentinel(&self) -> NodeRef {
        self.inner.sentinel.clone()
    }

    pub fn document(&self) -> Option<NodeRef> {
        self.inner.document.borrow().clone()
    }

    fn create_node(&self, kind: NodeKind, tag: &str) -> NodeRef {
        let sequence = self.inner.sequence.get() + 1;
        self.inner.sequence.set(sequence);
        let uid = NodeUid::new(self.inner.salt, sequence);
        let node = SyntheticNode::new(kind, tag, uid, Rc::downgrade(&self.inner));

        let mut registry = self.inner.registry.borrow_mut();
        if registry.len() >= SWEEP_THRESHOLD && registry.len().is_power_of_two() {
            registry.retain(|_, weak| weak.strong_count() > 0);
        }
        registry.insert(uid, Rc::downgrade(&node));
        node
    }

    /// Element with an upper-cased tag; an empty tag yields `DIV`
    pub fn create_element(&self, tag: &str) -> NodeRef {
        let tag = tag.trim();
        let tag = if tag.is_empty() { "DIV".to_string() } else { tag.to_ascii_uppercase() };
        self.create_node(NodeKind::Element, &tag)
    }

    pub fn create_text(&self, text: &str) -> NodeRef {
        let node = self.create_node(NodeKind::Text, "#text");
        node.set_text(text);
        node
    }

    pub fn create_comment(&self, text: &str) -> NodeRef {
        let node = self.create_node(NodeKind::Comment, "#comment");
        node.set_text(text);
        node
    }

    pub fn create_fragment(&self) -> NodeRef {
        self.create_node(NodeKind::Fragment, "#document-fragment")
    }

    pub(super) fn create_document_node(&self) -> NodeRef {
        self.create_node(NodeKind::Document, "#document")
    }

    /// Live node by identity tag, anywhere in this graph
    pub fn node_by_uid(&self, uid: &NodeUid) -> Option<NodeRef> {
        self.inner.registry.borrow().get(uid)?.upgrade()
    }

    /// Number of live nodes created by this graph
    pub fn node_count(&self) -> usize {
        self.inner
            .registry
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Resolve a raw node or a wrapped one to the node it names
    pub fn resolve(&self, value: &Value) -> Option<NodeRef> {
        let locator = Locator::of(value);
        if let Some(node) = locator.node {
            return Some(node);
        }
        self.node_by_uid(&locator.uid?)
    }

    fn can_attach(&self, parent: &SyntheticNode, child: &SyntheticNode) -> bool {
        if parent.is_sentinel() || child.is_sentinel() {
            tracing::debug!("Ignoring structural change involving the sentinel node");
            return false;
        }
        if matches!(parent.kind(), NodeKind::Text | NodeKind::Comment)
            || child.kind() == NodeKind::Document
        {
            tracing::debug!("Cannot attach {} under {}", child.tag(), parent.tag());
            return false;
        }
        let mut cursor = parent.handle();
        while let Some(ancestor) = cursor {
            if ancestor.uid() == child.uid() {
                tracing::debug!("Cycle guard: {} is an ancestor of {}", child.tag(), parent.tag());
                return false;
            }
            cursor = ancestor.parent();
        }
        true
    }

    /// Insert `node` at `index` (append when `None`). Fragments contribute
    /// their children instead of themselves.
    fn place(&self, parent: &NodeRef, node: NodeRef, index: Option<usize>) {
        let incoming = if node.kind() == NodeKind::Fragment {
            let moved = std::mem::take(&mut *node.children.borrow_mut());
            for child in &moved {
                child.set_parent(None);
            }
            moved
        } else {
            vec![node]
        };

        let mut children = parent.children.borrow_mut();
        let mut at = index.unwrap_or(children.len()).min(children.len());
        for child in incoming {
            child.set_parent(Some(parent));
            children.insert(at, child);
            at += 1;
        }
    }

    pub(super) fn attach(&self, parent: &NodeRef, node: NodeRef, index: Option<usize>) -> NodeRef {
        if self.can_attach(parent, &node) {
            self.detach(&node);
            self.place(parent, node.clone(), index);
        }
        node
    }

    /// Append `child` to `parent`, detaching it from any previous parent.
    /// Returns `None` when `child` is not a node.
    pub fn append(&self, parent: &NodeRef, child: &Value) -> Option<NodeRef> {
        let node = self.resolve(child)?;
        Some(self.attach(parent, node, None))
    }

    /// Insert `new_node` before `reference`; an unresolved reference
    /// appends instead
    pub fn insert_before(&self, parent: &NodeRef, new_node: &Value, reference: &Value) -> Option<NodeRef> {
        let node = self.resolve(new_node)?;
        if reference.is_nullish() {
            return Some(self.attach(parent, node, None));
        }
        let locator = Locator::of(reference);
        if locator.matches(&node) || !self.can_attach(parent, &node) {
            return Some(node);
        }
        self.detach(&node);
        let index = locator.position_in(&parent.children.borrow());
        if index.is_none() {
            tracing::debug!("insertBefore reference not found under {}, appending", parent.tag());
        }
        self.place(parent, node.clone(), index);
        Some(node)
    }

    /// Replace `old` with `new_node`, returning the removed node. An
    /// unresolved `old` appends `new_node` and returns `None`.
    pub fn replace(&self, parent: &NodeRef, new_node: &Value, old: &Value) -> Option<NodeRef> {
        let node = self.resolve(new_node)?;
        if !self.can_attach(parent, &node) {
            return None;
        }
        let locator = Locator::of(old);
        if locator.position_in(&parent.children.borrow()).is_none() {
            tracing::debug!("replaceChild target not found under {}, appending", parent.tag());
            self.attach(parent, node, None);
            return None;
        }
        if locator.matches(&node) {
            return Some(node);
        }
        self.detach(&node);
        // Detaching may have shifted positions within the same parent
        let index = locator.position_in(&parent.children.borrow())?;
        let removed = parent.children.borrow_mut().remove(index);
        removed.set_parent(None);
        self.place(parent, node, Some(index));
        Some(removed)
    }

    /// Remove `child` from `parent`, returning it if it was a child
    pub fn remove(&self, parent: &NodeRef, child: &Value) -> Option<NodeRef> {
        let locator = Locator::of(child);
        let Some(index) = locator.position_in(&parent.children.borrow()) else {
            tracing::debug!("removeChild: node is not a child of {}", parent.tag());
            return None;
        };
        let removed = parent.children.borrow_mut().remove(index);
        removed.set_parent(None);
        Some(removed)
    }

    /// Detach `node` from its parent, if any
    pub fn detach(&self, node: &SyntheticNode) {
        let Some(parent) = node.parent() else {
            return;
        };
        let uid = node.uid();
        parent.children.borrow_mut().retain(|c| c.uid() != uid);
        node.set_parent(None);
    }

    /// Replace all children with a single text node (none for empty text)
    pub fn replace_children_with_text(&self, node: &SyntheticNode, text: &str) {
        let Some(parent) = node.handle() else {
            return;
        };
        if parent.is_sentinel() {
            return;
        }
        for child in std::mem::take(&mut *parent.children.borrow_mut()) {
            child.set_parent(None);
        }
        if !text.is_empty() {
            self.place(&parent, self.create_text(text), None);
        }
    }

    /// Parent of `node`, or the sentinel when detached
    pub fn parent_of(&self, node: &SyntheticNode) -> NodeRef {
        node.parent().unwrap_or_else(|| self.sentinel())
    }

    pub fn children(&self, node: &SyntheticNode) -> Vec<NodeRef> {
        node.children()
    }

    pub fn first_child(&self, node: &SyntheticNode) -> NodeRef {
        node.children
            .borrow()
            .first()
            .cloned()
            .unwrap_or_else(|| self.sentinel())
    }

    pub fn last_child(&self, node: &SyntheticNode) -> NodeRef {
        node.children
            .borrow()
            .last()
            .cloned()
            .unwrap_or_else(|| self.sentinel())
    }

    pub fn next_sibling(&self, node: &SyntheticNode) -> NodeRef {
        self.sibling(node, 1)
    }

    pub fn previous_sibling(&self, node: &SyntheticNode) -> NodeRef {
        self.sibling(node, -1)
    }

    fn sibling(&self, node: &SyntheticNode, offset: isize) -> NodeRef {
        node.parent()
            .and_then(|parent| {
                let children = parent.children.borrow();
                let index = children.iter().position(|c| c.uid() == node.uid())?;
                children.get(index.checked_add_signed(offset)?).cloned()
            })
            .unwrap_or_else(|| self.sentinel())
    }

    /// Whether `other` is `ancestor` or lies inside its subtree
    pub fn contains(&self, ancestor: &SyntheticNode, other: &Value) -> bool {
        let mut cursor = self.resolve(other);
        while let Some(node) = cursor {
            if node.uid() == ancestor.uid() {
                return true;
            }
            cursor = node.parent();
        }
        false
    }

    /// Whether `node` is attached under the document
    pub fn is_connected(&self, node: &SyntheticNode) -> bool {
        let mut cursor = node.handle();
        while let Some(current) = cursor {
            if current.kind() == NodeKind::Document {
                return true;
            }
            cursor = current.parent();
        }
        false
    }

    /// Pre-order descendants of `root`, excluding `root`
    pub fn descendants(&self, root: &SyntheticNode) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeRef> = root.children().into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            stack.extend(node.children().into_iter().rev());
            out.push(node);
        }
        out
    }

    /// Node in `root`'s subtree (including `root`) with identity `uid`,
    /// or the sentinel
    pub fn find_by_uid(&self, root: &SyntheticNode, uid: &NodeUid) -> NodeRef {
        if root.uid() == *uid {
            if let Some(node) = root.handle() {
                return node;
            }
        }
        self.descendants(root)
            .into_iter()
            .find(|n| n.uid() == *uid)
            .unwrap_or_else(|| self.sentinel())
    }

    /// First element with `id`, handled per [`LookupPolicy`] when missing
    pub fn find_by_id(&self, root: &SyntheticNode, id: &str) -> NodeRef {
        let found = self
            .descendants(root)
            .into_iter()
            .find(|n| n.is_element() && n.id() == id);
        match found {
            Some(node) => node,
            None => self.missing(root, &format!("id '{}'", id), |graph| {
                let placeholder = graph.create_element("DIV");
                placeholder.set_attribute("id", id);
                placeholder
            }),
        }
    }

    /// First element tagged `tag`, handled per [`LookupPolicy`] when missing
    pub fn find_by_tag(&self, root: &SyntheticNode, tag: &str) -> NodeRef {
        match self.find_all_by_tag(root, tag).into_iter().next() {
            Some(node) => node,
            None => self.missing(root, &format!("tag '{}'", tag), |graph| graph.create_element(tag)),
        }
    }

    fn missing(&self, root: &SyntheticNode, query: &str, build: impl FnOnce(&Self) -> NodeRef) -> NodeRef {
        match self.policy() {
            LookupPolicy::Strict => {
                tracing::debug!("No element matches {}, returning sentinel", query);
                self.sentinel()
            }
            LookupPolicy::Fabricate => {
                let placeholder = build(self);
                let host = self.body().or_else(|| root.handle());
                if let Some(host) = host {
                    self.attach(&host, placeholder.clone(), None);
                }
                tracing::debug!("Fabricated placeholder for {}", query);
                placeholder
            }
        }
    }

    /// Elements tagged `tag` (`*` for all) in document order
    pub fn find_all_by_tag(&self, root: &SyntheticNode, tag: &str) -> Vec<NodeRef> {
        let tag = tag.to_ascii_uppercase();
        self.descendants(root)
            .into_iter()
            .filter(|n| n.is_element() && (tag == "*" || n.tag() == tag))
            .collect()
    }

    /// Elements carrying every class in the whitespace-separated `names`
    pub fn find_all_by_class(&self, root: &SyntheticNode, names: &str) -> Vec<NodeRef> {
        let wanted: Vec<&str> = names.split_whitespace().collect();
        if wanted.is_empty() {
            return Vec::new();
        }
        self.descendants(root)
            .into_iter()
            .filter(|n| n.is_element() && wanted.iter().all(|c| n.has_class(c)))
            .collect()
    }

    pub fn query(&self, root: &SyntheticNode, selector: &str) -> Option<NodeRef> {
        let selector = self.parse_selector(selector)?;
        self.descendants(root)
            .into_iter()
            .find(|n| selector.matches(n))
    }

    pub fn query_all(&self, root: &SyntheticNode, selector: &str) -> Vec<NodeRef> {
        let Some(selector) = self.parse_selector(selector) else {
            return Vec::new();
        };
        self.descendants(root)
            .into_iter()
            .filter(|n| selector.matches(n))
            .collect()
    }

    fn parse_selector(&self, text: &str) -> Option<Selector> {
        let parsed = Selector::parse(text);
        if parsed.is_none() {
            tracing::debug!("Unsupported selector '{}'", text);
        }
        parsed
    }

    pub fn active_element(&self) -> Option<NodeRef> {
        self.inner.active.borrow().upgrade()
    }

    pub fn set_active_element(&self, node: Option<&NodeRef>) {
        *self.inner.active.borrow_mut() = node.map(Rc::downgrade).unwrap_or_default();
    }

    /// Drop every node reference held by the graph
    pub fn teardown(&self) {
        if let Some(document) = self.inner.document.borrow_mut().take() {
            for child in std::mem::take(&mut *document.children.borrow_mut()) {
                child.set_parent(None);
            }
        }
        self.inner.registry.borrow_mut().clear();
        self.set_active_element(None);
        *self.inner.cookies.borrow_mut() = None;
        *self.inner.window.borrow_mut() = None;
        *self.inner.queue.borrow_mut() = Weak::new();
    }
}
