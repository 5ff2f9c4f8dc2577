//! Document factory and the document's own surface

use std::rc::{Rc, Weak};

use super::node::{node_list, NodeKind, NodeRef, SyntheticNode};
use super::tree::{NodeGraph, Locator};
use crate::events::{Event, EventInit};
use crate::host::cookies::CookieJar;
use crate::host::navigator::UrlParts;
use crate::host::timers::TaskQueue;
use crate::value::{arg, Completion, HostObject, ObjectRef, Value};

pub(super) const DOCUMENT_METHODS: &[&str] = &[
    "createElement",
    "createElementNS",
    "createTextNode",
    "createComment",
    "createDocumentFragment",
    "createEvent",
    "getElementById",
    "hasFocus",
    "open",
    "close",
    "write",
    "writeln",
];

impl NodeGraph {
    /// Build `#document > HTML > (HEAD > SCRIPT[src=script_url], BODY)` and
    /// make it this graph's document
    pub fn create_document(&self, url: &str, script_url: &str) -> NodeRef {
        let document = self.create_document_node();
        let html = self.create_element("HTML");
        let head = self.create_element("HEAD");
        let body = self.create_element("BODY");
        let script = self.create_element("SCRIPT");
        script.set_attribute("src", script_url);

        self.attach(&document, html.clone(), None);
        self.attach(&html, head.clone(), None);
        self.attach(&head, script, None);
        self.attach(&html, body.clone(), None);

        let inner = self.inner();
        *inner.document.borrow_mut() = Some(document.clone());
        *inner.url.borrow_mut() = url.to_string();
        *inner.ready_state.borrow_mut() = "loading".to_string();
        self.set_active_element(Some(&body));
        tracing::debug!("Created document for {}", url);
        document
    }

    pub fn document_element(&self) -> Option<NodeRef> {
        self.document()?
            .element_children()
            .into_iter()
            .find(|n| n.tag() == "HTML")
    }

    pub fn head(&self) -> Option<NodeRef> {
        self.root_child("HEAD")
    }

    pub fn body(&self) -> Option<NodeRef> {
        self.root_child("BODY")
    }

    fn root_child(&self, tag: &str) -> Option<NodeRef> {
        self.document_element()?
            .element_children()
            .into_iter()
            .find(|n| n.tag() == tag)
    }

    /// The SCRIPT the hosted payload presents as
    pub fn current_script(&self) -> Option<NodeRef> {
        self.head()?
            .element_children()
            .into_iter()
            .find(|n| n.tag() == "SCRIPT")
    }

    pub fn ready_state(&self) -> String {
        self.inner().ready_state.borrow().clone()
    }

    pub fn set_ready_state(&self, state: &str) {
        *self.inner().ready_state.borrow_mut() = state.to_string();
    }

    pub fn url(&self) -> String {
        self.inner().url.borrow().clone()
    }

    pub fn title(&self) -> String {
        self.inner().title.borrow().clone()
    }

    /// Back `document.cookie` with `jar`
    pub fn attach_cookies(&self, jar: Rc<CookieJar>) {
        *self.inner().cookies.borrow_mut() = Some(jar);
    }

    /// Root object reported as `document.defaultView`
    pub fn bind_window(&self, window: Weak<dyn HostObject>) {
        *self.inner().window.borrow_mut() = Some(window);
    }

    pub fn window(&self) -> Option<ObjectRef> {
        self.inner().window.borrow().as_ref()?.upgrade()
    }

    /// Queue that promise-returning node methods settle on
    pub fn bind_queue(&self, queue: Weak<TaskQueue>) {
        *self.inner().queue.borrow_mut() = queue;
    }

    pub fn queue(&self) -> Weak<TaskQueue> {
        self.inner().queue.borrow().clone()
    }

    /// `document.getElementById`, honoring the lookup policy
    pub fn get_element_by_id(&self, id: &str) -> NodeRef {
        match self.document() {
            Some(document) => self.find_by_id(&document, id),
            None => self.sentinel(),
        }
    }

    fn cookie_text(&self) -> String {
        self.inner()
            .cookies
            .borrow()
            .as_ref()
            .map(|jar| jar.document_cookie())
            .unwrap_or_default()
    }
}

pub(super) fn property(_node: &SyntheticNode, key: &str, graph: &NodeGraph) -> Option<Value> {
    let document = graph.document();
    let value = match key {
        "documentElement" => graph.document_element().map(Value::from_host).into(),
        "head" => graph.head().map(Value::from_host).into(),
        "body" => graph.body().map(Value::from_host).into(),
        "currentScript" => graph.current_script().map(Value::from_host).into(),
        "activeElement" => graph
            .active_element()
            .or_else(|| graph.body())
            .map(Value::from_host)
            .into(),
        "readyState" => Value::from(graph.ready_state()),
        "title" => Value::from(graph.title()),
        "cookie" => Value::from(graph.cookie_text()),
        "domain" => Value::from(UrlParts::parse(&graph.url()).hostname),
        "URL" | "documentURI" | "baseURI" => Value::from(graph.url()),
        "referrer" => Value::from(""),
        "characterSet" | "charset" | "inputEncoding" => Value::from("UTF-8"),
        "compatMode" => Value::from("CSS1Compat"),
        "contentType" => Value::from("text/html"),
        "visibilityState" => Value::from("visible"),
        "hidden" => Value::Bool(false),
        "defaultView" => graph.window().map(Value::Object).into(),
        "location" => graph
            .window()
            .map(|w| Value::Object(w).get_or_undefined("location"))
            .into(),
        "scripts" | "forms" | "images" => {
            let tag = match key {
                "scripts" => "SCRIPT",
                "forms" => "FORM",
                _ => "IMG",
            };
            let nodes = document
                .map(|d| graph.find_all_by_tag(&d, tag))
                .unwrap_or_default();
            node_list("HTMLCollection", nodes)
        }
        _ => return None,
    };
    Some(value)
}

/// Document-specific writes; `None` defers to the generic node surface
pub(super) fn assign(_node: &SyntheticNode, key: &str, value: &Value, graph: &NodeGraph) -> Option<bool> {
    match key {
        "cookie" => {
            if let Some(jar) = graph.inner().cookies.borrow().as_ref() {
                jar.set_document_cookie(&value.to_js_string());
            }
            Some(true)
        }
        "title" => {
            *graph.inner().title.borrow_mut() = value.to_js_string();
            Some(true)
        }
        "documentElement" | "head" | "body" | "currentScript" | "readyState" | "URL"
        | "domain" | "defaultView" => Some(false),
        _ => None,
    }
}

/// Document-specific methods; `None` defers to the generic node methods
pub(super) fn invoke(document: &NodeRef, graph: &NodeGraph, name: &str, args: &[Value]) -> Option<Completion> {
    let first = arg(args, 0);
    let result = match name {
        "createElement" => Value::from_host(graph.create_element(&first.to_js_string())),
        "createElementNS" => Value::from_host(graph.create_element(&arg(args, 1).to_js_string())),
        "createTextNode" => Value::from_host(graph.create_text(&first.to_js_string())),
        "createComment" => Value::from_host(graph.create_comment(&first.to_js_string())),
        "createDocumentFragment" => Value::from_host(graph.create_fragment()),
        "createEvent" => Value::from_host(Event::new("", EventInit::default())),
        "getElementById" => Value::from_host(graph.find_by_id(document, &first.to_js_string())),
        "hasFocus" => Value::Bool(true),
        "open" => document.to_value(),
        "close" | "write" | "writeln" => Value::Undefined,
        "appendChild" => append_to_document(document, graph, &first),
        "insertBefore" => {
            let reference = arg(args, 1);
            if !reference.is_nullish() && Locator::of(&reference).position_in(&document.children()).is_some() {
                return None;
            }
            // Unresolved (or absent) references land in body
            redirect_to_body(document, graph, &first)
        }
        _ => return None,
    };
    Some(Ok(result))
}

/// Only a root `HTML` element attaches to the document itself; everything
/// else goes to `body`
fn append_to_document(document: &NodeRef, graph: &NodeGraph, child: &Value) -> Value {
    let Some(node) = graph.resolve(child) else {
        return Value::Null;
    };
    if node.kind() == NodeKind::Element && node.tag() == "HTML" {
        if graph.document_element().is_none() {
            graph.attach(document, node, None);
        }
        return child.clone();
    }
    redirect_to_body(document, graph, child)
}

fn redirect_to_body(document: &NodeRef, graph: &NodeGraph, child: &Value) -> Value {
    let host = graph.body().unwrap_or_else(|| document.clone());
    match graph.append(&host, child) {
        Some(_) => child.clone(),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::LookupPolicy;
    use crate::intercept::Interceptor;
    use crate::layout::LayoutEstimator;

    const URL: &str = "https://challenges.example.com/cdn-cgi/challenge";
    const SCRIPT: &str = "https://challenges.example.com/turnstile/v0/api.js";

    fn document(policy: LookupPolicy) -> (NodeGraph, Value) {
        let graph = NodeGraph::new(policy, LayoutEstimator::default());
        let document = graph.create_document(URL, SCRIPT);
        (graph, document.to_value())
    }

    #[test]
    fn test_skeleton() {
        let (graph, doc) = document(LookupPolicy::Strict);
        let html = doc.get("documentElement").unwrap();
        assert!(html.get("tagName").unwrap().strict_eq(&Value::from("HTML")));
        let script = doc.get("currentScript").unwrap();
        assert!(script.get("src").unwrap().strict_eq(&Value::from(SCRIPT)));
        assert!(doc.get("domain").unwrap().strict_eq(&Value::from("challenges.example.com")));
        assert_eq!(graph.body().unwrap().parent().unwrap().tag(), "HTML");
        assert!(doc.get("activeElement").unwrap().strict_eq(&graph.body().unwrap().to_value()));
        assert!(doc.get("parentNode").unwrap().strict_eq(&Value::Null));
    }

    #[test]
    fn test_get_element_by_id_end_to_end() {
        let (graph, doc) = document(LookupPolicy::Strict);
        let div = doc.call_method("createElement", &[Value::from("div")]).unwrap();
        div.call_method("setAttribute", &[Value::from("id"), Value::from("a")]).unwrap();
        doc.get("body").unwrap().call_method("appendChild", &[div.clone()]).unwrap();

        let found = doc.call_method("getElementById", &[Value::from("a")]).unwrap();
        assert_eq!(
            found.get("__identity").unwrap().as_str(),
            div.get("__identity").unwrap().as_str()
        );

        let missing = doc.call_method("getElementById", &[Value::from("nope")]).unwrap();
        assert!(missing.strict_eq(&graph.sentinel().to_value()));
    }

    #[test]
    fn test_fabricate_policy_creates_placeholder() {
        let (graph, doc) = document(LookupPolicy::Fabricate);
        let made = graph.get_element_by_id("challenge-form");
        assert!(!made.is_sentinel());
        assert_eq!(made.id(), "challenge-form");
        assert_eq!(made.parent().unwrap().tag(), "BODY");
        let again = doc.call_method("getElementById", &[Value::from("challenge-form")]).unwrap();
        assert!(again.strict_eq(&made.to_value()));
    }

    #[test]
    fn test_append_redirects_to_body() {
        let (graph, doc) = document(LookupPolicy::Strict);
        let div = graph.create_element("div");
        doc.call_method("appendChild", &[div.to_value()]).unwrap();
        assert_eq!(div.parent().unwrap().tag(), "BODY");

        let extra_html = graph.create_element("html");
        doc.call_method("appendChild", &[extra_html.to_value()]).unwrap();
        assert!(extra_html.parent().is_none());
    }

    #[test]
    fn test_insert_before_unresolved_reference_goes_to_body() {
        let (graph, doc) = document(LookupPolicy::Strict);
        let span = graph.create_element("span");
        let stranger = graph.create_element("p");
        doc.call_method("insertBefore", &[span.to_value(), stranger.to_value()]).unwrap();
        assert_eq!(span.parent().unwrap().tag(), "BODY");

        // A wrapped reference to the document's own child resolves
        let html = graph.document_element().unwrap();
        let wrapped = Interceptor::default().wrap(&html.to_value(), "html");
        let comment = graph.create_comment("marker");
        doc.call_method("insertBefore", &[comment.to_value(), wrapped]).unwrap();
        assert_eq!(graph.document().unwrap().children()[0].uid(), comment.uid());
    }

    #[test]
    fn test_cookie_and_title() {
        let (graph, doc) = document(LookupPolicy::Strict);
        graph.attach_cookies(Rc::new(CookieJar::new()));
        doc.set("cookie", Value::from("a=1; path=/"));
        doc.set("cookie", Value::from("b=2"));
        assert!(doc.get("cookie").unwrap().strict_eq(&Value::from("a=1; b=2")));
        doc.set("title", Value::from("Just a moment..."));
        assert_eq!(graph.title(), "Just a moment...");
    }

    #[test]
    fn test_ready_state_tracks_lifecycle() {
        let (graph, doc) = document(LookupPolicy::Strict);
        assert!(doc.get("readyState").unwrap().strict_eq(&Value::from("loading")));
        graph.set_ready_state("complete");
        assert!(doc.get("readyState").unwrap().strict_eq(&Value::from("complete")));
        assert!(!doc.set("readyState", Value::from("loading")));
    }
}
