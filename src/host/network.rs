//! Network collaborator and `XMLHttpRequest`
//!
//! The environment never opens sockets. Requests go to a [`Network`]
//! implementation supplied by the orchestrator; [`OfflineNetwork`] answers
//! every request with an empty 200.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use super::cookies::CookieJar;
use super::navigator::UrlParts;
use super::timers::{TaskQueue, TimerId};
use crate::disguise::native;
use crate::error::Result;
use crate::events::{listener_method, Event, EventInit, EventRegistry, EventTarget, LISTENER_METHODS};
use crate::value::{arg, Completion, Exception, HostObject, PlainObject, PropertyDescriptor, Value};

/// Nominal latency of every exchange, in virtual milliseconds
pub const RESPONSE_DELAY_MS: u64 = 50;

/// An outgoing request as the collaborator sees it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    /// Absolute URL
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// First header named `name`, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response from the collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Values of every header named `name`, case-insensitively
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Request/response semantics supplied by the orchestrator
pub trait Network {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Answers everything with `200 OK` and an empty body
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

impl Network for OfflineNetwork {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        tracing::debug!("Offline network answering {} {}", request.method, request.url);
        Ok(HttpResponse::ok(""))
    }
}

/// What every `XMLHttpRequest` of one environment shares
pub struct NetworkContext {
    pub network: Rc<dyn Network>,
    pub queue: Weak<TaskQueue>,
    pub cookies: Rc<CookieJar>,
    /// Relative request URLs resolve against this
    pub base: UrlParts,
    pub user_agent: String,
}

impl NetworkContext {
    /// Run `request` through the collaborator, attaching cookies and user
    /// agent and feeding `Set-Cookie` back into the jar
    pub fn exchange(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        let cookie = self.cookies.cookie_header();
        if !cookie.is_empty() && request.header("cookie").is_none() {
            request.headers.push(("Cookie".to_string(), cookie));
        }
        if request.header("user-agent").is_none() {
            request
                .headers
                .push(("User-Agent".to_string(), self.user_agent.clone()));
        }

        let response = self.network.send(&request)?;
        for header in response.header_values("set-cookie") {
            self.cookies.set_from_header(header);
        }
        Ok(response)
    }
}

const XHR_METHODS: &[&str] = &[
    "open",
    "send",
    "abort",
    "setRequestHeader",
    "getResponseHeader",
    "getAllResponseHeaders",
    "overrideMimeType",
];

const UNSENT: u8 = 0;
const OPENED: u8 = 1;
const DONE: u8 = 4;

/// `new XMLHttpRequest()`
pub struct XmlHttpRequest {
    context: Rc<NetworkContext>,
    ready_state: Cell<u8>,
    method: RefCell<String>,
    url: RefCell<String>,
    request_headers: RefCell<Vec<(String, String)>>,
    response: RefCell<Option<HttpResponse>>,
    pending: Cell<Option<TimerId>>,
    events: EventRegistry,
    slots: PlainObject,
    this: Weak<XmlHttpRequest>,
}

impl XmlHttpRequest {
    pub fn new(context: Rc<NetworkContext>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            context,
            ready_state: Cell::new(UNSENT),
            method: RefCell::new("GET".to_string()),
            url: RefCell::new(String::new()),
            request_headers: RefCell::default(),
            response: RefCell::new(None),
            pending: Cell::new(None),
            events: EventRegistry::new(),
            slots: PlainObject::new("XMLHttpRequest"),
            this: this.clone(),
        })
    }

    pub fn ready_state(&self) -> u8 {
        self.ready_state.get()
    }

    pub fn url(&self) -> String {
        self.url.borrow().clone()
    }

    pub fn status(&self) -> u16 {
        self.response.borrow().as_ref().map_or(0, |r| r.status)
    }

    pub fn response_text(&self) -> String {
        self.response
            .borrow()
            .as_ref()
            .map(|r| r.body.clone())
            .unwrap_or_default()
    }

    fn fire(&self, ty: &str) {
        let time_stamp = self.context.queue.upgrade().map_or(0.0, |q| q.now() as f64);
        let event = Event::at(ty, EventInit::trusted(), time_stamp);
        self.dispatch_event(&Value::from_host(event));
    }

    pub fn open(&self, method: &str, url: &str) {
        self.cancel_pending();
        *self.method.borrow_mut() = method.to_ascii_uppercase();
        *self.url.borrow_mut() = self.context.base.join(url);
        self.request_headers.borrow_mut().clear();
        *self.response.borrow_mut() = None;
        self.ready_state.set(OPENED);
        self.fire("readystatechange");
    }

    pub fn set_request_header(&self, name: &str, value: &str) -> std::result::Result<(), Exception> {
        if self.ready_state.get() != OPENED {
            return Err(Exception::dom("InvalidStateError", "The object's state must be OPENED."));
        }
        self.request_headers
            .borrow_mut()
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Defer the exchange onto the task queue
    pub fn send(&self, body: Option<String>) -> std::result::Result<(), Exception> {
        if self.ready_state.get() != OPENED || self.pending.get().is_some() {
            return Err(Exception::dom("InvalidStateError", "The object's state must be OPENED."));
        }
        let Some(queue) = self.context.queue.upgrade() else {
            return Ok(());
        };
        let request = HttpRequest {
            method: self.method.borrow().clone(),
            url: self.url(),
            headers: self.request_headers.borrow().clone(),
            body,
        };

        // In-flight requests stay alive until they complete
        let Some(xhr) = self.this.upgrade() else {
            return Ok(());
        };
        let id = queue.defer(RESPONSE_DELAY_MS, move || {
            xhr.complete(request.clone());
            Ok(Value::Undefined)
        });
        self.pending.set(Some(id));
        Ok(())
    }

    fn complete(&self, request: HttpRequest) {
        self.pending.set(None);
        match self.context.exchange(request) {
            Ok(response) => {
                *self.response.borrow_mut() = Some(response);
                self.ready_state.set(DONE);
                self.fire("readystatechange");
                self.fire("load");
            }
            Err(e) => {
                tracing::warn!("XMLHttpRequest to {} failed: {}", self.url(), e);
                self.ready_state.set(DONE);
                self.fire("readystatechange");
                self.fire("error");
            }
        }
        self.fire("loadend");
    }

    fn cancel_pending(&self) -> bool {
        match (self.pending.take(), self.context.queue.upgrade()) {
            (Some(id), Some(queue)) => queue.cancel(id),
            _ => false,
        }
    }

    pub fn abort(&self) {
        if self.cancel_pending() {
            self.ready_state.set(UNSENT);
            self.fire("abort");
            self.fire("loadend");
        }
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        let response = self.response.borrow();
        let values = response.as_ref()?.header_values(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    pub fn all_response_headers(&self) -> String {
        self.response
            .borrow()
            .as_ref()
            .map(|r| {
                r.headers
                    .iter()
                    .filter(|(k, _)| !k.eq_ignore_ascii_case("set-cookie"))
                    .map(|(k, v)| format!("{}: {}\r\n", k.to_ascii_lowercase(), v))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn method(&self, name: &str) -> Value {
        if LISTENER_METHODS.contains(&name) {
            return listener_method(name, self.this.clone());
        }
        let owner = self.this.clone();
        let bound = name.to_string();
        native(name, move |_, args| match owner.upgrade() {
            Some(xhr) => xhr.invoke(&bound, args),
            None => Ok(Value::Undefined),
        })
    }

    fn invoke(&self, name: &str, args: &[Value]) -> Completion {
        match name {
            "open" => self.open(&arg(args, 0).to_js_string(), &arg(args, 1).to_js_string()),
            "send" => {
                let body = match arg(args, 0) {
                    Value::Undefined | Value::Null => None,
                    other => Some(other.to_js_string()),
                };
                self.send(body)?;
            }
            "abort" => self.abort(),
            "setRequestHeader" => {
                self.set_request_header(&arg(args, 0).to_js_string(), &arg(args, 1).to_js_string())?
            }
            "getResponseHeader" => {
                return Ok(self.response_header(&arg(args, 0).to_js_string()).into())
            }
            "getAllResponseHeaders" => return Ok(Value::from(self.all_response_headers())),
            _ => {}
        }
        Ok(Value::Undefined)
    }
}

impl EventTarget for XmlHttpRequest {
    fn event_registry(&self) -> &EventRegistry {
        &self.events
    }

    fn event_receiver(&self) -> Value {
        self.this
            .upgrade()
            .map_or(Value::Undefined, Value::from_host)
    }
}

impl HostObject for XmlHttpRequest {
    fn class_name(&self) -> &str {
        "XMLHttpRequest"
    }

    fn get(&self, key: &str, _receiver: &Value) -> Completion {
        if let Some(value) = self.slots.lookup(key) {
            return Ok(value);
        }
        Ok(match key {
            "readyState" => Value::from(u32::from(self.ready_state.get())),
            "status" => Value::from(u32::from(self.status())),
            "statusText" => Value::from(
                self.response
                    .borrow()
                    .as_ref()
                    .map(|r| r.status_text.clone())
                    .unwrap_or_default(),
            ),
            "responseText" | "response" => Value::from(self.response_text()),
            "responseURL" => Value::from(if self.ready_state.get() == DONE {
                self.url()
            } else {
                String::new()
            }),
            "responseType" => Value::from(""),
            "withCredentials" => Value::Bool(false),
            "timeout" => Value::from(0),
            "UNSENT" => Value::from(0),
            "OPENED" => Value::from(1),
            "HEADERS_RECEIVED" => Value::from(2),
            "LOADING" => Value::from(3),
            "DONE" => Value::from(4),
            key if XHR_METHODS.contains(&key) || LISTENER_METHODS.contains(&key) => {
                self.method(key)
            }
            key if key.starts_with("on") => Value::Null,
            _ => Value::Undefined,
        })
    }

    fn set(&self, key: &str, value: Value) -> bool {
        match key {
            "readyState" | "status" | "statusText" | "responseText" | "response" | "responseURL" => {
                false
            }
            _ => self.slots.set(key, value),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NativeFunction;

    /// Records requests and answers with a cookie
    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<HttpRequest>>,
    }

    impl Network for Recorder {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.seen.borrow_mut().push(request.clone());
            Ok(HttpResponse::ok("{\"ok\":true}")
                .with_header("Content-Type", "application/json")
                .with_header("Set-Cookie", "token=xyz; Path=/"))
        }
    }

    fn context(network: Rc<dyn Network>, queue: &Rc<TaskQueue>) -> Rc<NetworkContext> {
        let cookies = Rc::new(CookieJar::for_domain("example.com"));
        cookies.set_document_cookie("seed=1");
        Rc::new(NetworkContext {
            network,
            queue: Rc::downgrade(queue),
            cookies,
            base: UrlParts::parse("https://example.com/app/index.html"),
            user_agent: "TestAgent/1.0".to_string(),
        })
    }

    #[test]
    fn test_offline_network() {
        let response = OfflineNetwork.send(&HttpRequest::default()).unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_exchange_is_deferred_and_fires_events() {
        let queue = Rc::new(TaskQueue::new());
        let recorder = Rc::new(Recorder::default());
        let ctx = context(recorder.clone(), &queue);
        let xhr = XmlHttpRequest::new(ctx.clone());
        let value = Value::from_host(xhr.clone());

        let fired = Rc::new(RefCell::new(Vec::new()));
        let sink = fired.clone();
        value.set(
            "onload",
            NativeFunction::value("onload", move |_, _| {
                sink.borrow_mut().push("load");
                Ok(Value::Undefined)
            }),
        );

        value
            .call_method("open", &[Value::from("post"), Value::from("api/v1")])
            .unwrap();
        value
            .call_method("setRequestHeader", &[Value::from("X-Test"), Value::from("1")])
            .unwrap();
        value.call_method("send", &[Value::from("payload")]).unwrap();
        assert_eq!(xhr.ready_state(), OPENED);
        assert!(recorder.seen.borrow().is_empty());

        queue.advance(RESPONSE_DELAY_MS);
        assert_eq!(xhr.ready_state(), DONE);
        assert_eq!(*fired.borrow(), vec!["load"]);
        assert_eq!(xhr.status(), 200);
        assert_eq!(xhr.response_text(), "{\"ok\":true}");

        let seen = recorder.seen.borrow();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].url, "https://example.com/app/api/v1");
        assert_eq!(seen[0].header("cookie"), Some("seed=1"));
        assert_eq!(seen[0].header("user-agent"), Some("TestAgent/1.0"));
        assert_eq!(seen[0].header("x-test"), Some("1"));
        assert_eq!(seen[0].body.as_deref(), Some("payload"));

        assert_eq!(ctx.cookies.get("token").map(|c| c.value), Some("xyz".to_string()));
    }

    #[test]
    fn test_response_headers() {
        let queue = Rc::new(TaskQueue::new());
        let xhr = XmlHttpRequest::new(context(Rc::new(Recorder::default()), &queue));
        xhr.open("GET", "/data");
        xhr.send(None).unwrap();
        queue.run_until_idle(10);

        assert_eq!(
            xhr.response_header("content-type").as_deref(),
            Some("application/json")
        );
        assert_eq!(xhr.response_header("x-missing"), None);
        assert_eq!(xhr.all_response_headers(), "content-type: application/json\r\n");
    }

    #[test]
    fn test_send_before_open_throws() {
        let queue = Rc::new(TaskQueue::new());
        let xhr = Value::from_host(XmlHttpRequest::new(context(Rc::new(OfflineNetwork), &queue)));
        let err = xhr.call_method("send", &[]).unwrap_err();
        assert_eq!(err.name, "InvalidStateError");
    }

    #[test]
    fn test_abort_cancels_exchange() {
        let queue = Rc::new(TaskQueue::new());
        let recorder = Rc::new(Recorder::default());
        let xhr = XmlHttpRequest::new(context(recorder.clone(), &queue));
        xhr.open("GET", "/slow");
        xhr.send(None).unwrap();
        xhr.abort();
        queue.run_until_idle(10);
        assert!(recorder.seen.borrow().is_empty());
        assert_eq!(xhr.ready_state(), UNSENT);
    }
}
