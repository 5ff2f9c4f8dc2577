//! Root object
//!
//! [`HostWindow`] is the global the hosted script runs against. It reports
//! `is_root()`, so self-referential slots (`window`, `self`, `top`, ...) are
//! answered with whatever receiver the read came through instead of a stored
//! reference to itself.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use super::channel::message_channel;
use super::media;
use super::navigator::{history, location, navigator, screen};
use super::network::{NetworkContext, XmlHttpRequest};
use super::storage::Storage;
use super::timers::{delay_from, timer_id_from, Callback, TaskQueue, FRAME_DELAY_MS};
use crate::disguise::native;
use crate::dom::NodeGraph;
use crate::events::{listener_method, EventRegistry, EventTarget, LISTENER_METHODS};
use crate::intercept::DEFAULT_SELF_SLOTS;
use crate::profile::Profile;
use crate::value::{arg, Completion, Exception, HostObject, PlainObject, PropertyDescriptor, Value};

/// Vertical space taken by tabs and toolbars
const BROWSER_UI_HEIGHT: u32 = 85;

const WINDOW_METHODS: &[&str] = &[
    "setTimeout",
    "clearTimeout",
    "setInterval",
    "clearInterval",
    "requestAnimationFrame",
    "cancelAnimationFrame",
    "queueMicrotask",
    "atob",
    "btoa",
    "MessageChannel",
    "XMLHttpRequest",
    "AudioContext",
    "webkitAudioContext",
    "OfflineAudioContext",
    "webkitOfflineAudioContext",
    "RTCPeerConnection",
    "webkitRTCPeerConnection",
    "RTCSessionDescription",
    "RTCIceCandidate",
    "matchMedia",
    "getComputedStyle",
    "addEventListener",
    "removeEventListener",
    "dispatchEvent",
];

/// Keys script can't reassign
const READONLY_KEYS: &[&str] = &[
    "document",
    "navigator",
    "location",
    "innerWidth",
    "innerHeight",
];

/// `atob` is forgiving about padding and trailing bits
const FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// The synthetic global object
pub struct HostWindow {
    graph: NodeGraph,
    queue: Weak<TaskQueue>,
    network: Rc<NetworkContext>,
    profile: Profile,
    /// Host-provided members plus anything the script assigns
    members: PlainObject,
    methods: RefCell<HashMap<String, Value>>,
    events: EventRegistry,
    this: Weak<HostWindow>,
}

impl HostWindow {
    /// Build the root for `graph` and bind it as the document's default view
    pub fn new(
        profile: Profile,
        graph: NodeGraph,
        queue: &Rc<TaskQueue>,
        network: Rc<NetworkContext>,
    ) -> Rc<Self> {
        let window = Rc::new_cyclic(|this| Self {
            members: members(&profile, Rc::downgrade(queue)),
            graph,
            queue: Rc::downgrade(queue),
            network,
            profile,
            methods: RefCell::default(),
            events: EventRegistry::new(),
            this: this.clone(),
        });
        let weak: Weak<dyn HostObject> = Rc::downgrade(&window) as Weak<dyn HostObject>;
        window.graph.bind_window(weak);
        window.graph.bind_queue(Rc::downgrade(queue));
        window
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Expose `value` as a global named `name`
    pub fn define_global(&self, name: &str, value: Value) {
        self.members.insert(name, value);
    }

    fn queue(&self) -> Option<Rc<TaskQueue>> {
        self.queue.upgrade()
    }

    fn property(&self, key: &str) -> Option<Value> {
        let profile = &self.profile;
        let value: Value = match key {
            "document" => self.graph.document().map(Value::from_host).into(),
            "innerWidth" => Value::from(profile.viewport_width),
            "innerHeight" => Value::from(profile.viewport_height),
            "outerWidth" => Value::from(profile.viewport_width),
            "outerHeight" => Value::from(profile.viewport_height + BROWSER_UI_HEIGHT),
            "devicePixelRatio" => Value::from(1),
            "scrollX" | "scrollY" | "pageXOffset" | "pageYOffset" | "screenX" | "screenY"
            | "screenLeft" | "screenTop" => Value::from(0),
            "name" => Value::from(""),
            "closed" => Value::Bool(false),
            "length" => Value::from(0),
            "origin" => Value::from(self.network.base.origin.as_str()),
            "isSecureContext" => Value::Bool(self.network.base.protocol == "https:"),
            "opener" | "frameElement" => Value::Null,
            _ => return None,
        };
        Some(value)
    }

    fn method(&self, name: &str) -> Value {
        if let Some(method) = self.methods.borrow().get(name) {
            return method.clone();
        }
        let method = if LISTENER_METHODS.contains(&name) {
            listener_method(name, self.this.clone())
        } else {
            let owner = self.this.clone();
            let bound = name.to_string();
            native(name, move |this, args| match owner.upgrade() {
                Some(window) => window.invoke(&bound, this, args),
                None => Ok(Value::Undefined),
            })
        };
        self.methods
            .borrow_mut()
            .insert(name.to_string(), method.clone());
        method
    }

    fn invoke(&self, name: &str, this: &Value, args: &[Value]) -> Completion {
        match name {
            "setTimeout" | "setInterval" => {
                let Some(queue) = self.queue() else {
                    return Ok(Value::from(0));
                };
                let callback = script_callback(args, this);
                let delay = delay_from(&arg(args, 1));
                let id = if name == "setInterval" {
                    queue.schedule_interval(callback, delay)
                } else {
                    queue.schedule(callback, delay)
                };
                Ok(Value::from(id))
            }
            "clearTimeout" | "clearInterval" | "cancelAnimationFrame" => {
                if let (Some(queue), Some(id)) = (self.queue(), timer_id_from(&arg(args, 0))) {
                    queue.cancel(id);
                }
                Ok(Value::Undefined)
            }
            "requestAnimationFrame" => {
                let Some(queue) = self.queue() else {
                    return Ok(Value::from(0));
                };
                let stamp = (queue.now() + FRAME_DELAY_MS) as f64;
                let callback = Callback::script(arg(args, 0), this.clone(), vec![Value::from(stamp)]);
                Ok(Value::from(queue.schedule(callback, FRAME_DELAY_MS)))
            }
            "queueMicrotask" => {
                let task = arg(args, 0);
                if !task.is_callable() {
                    return Err(Exception::type_error(
                        "Failed to execute 'queueMicrotask' on 'Window': parameter 1 is not of type 'Function'.",
                    ));
                }
                if let Some(queue) = self.queue() {
                    queue.schedule(Callback::script(task, Value::Undefined, Vec::new()), 0);
                }
                Ok(Value::Undefined)
            }
            "atob" => atob(&arg(args, 0).to_js_string()).map(Value::from),
            "btoa" => btoa(&arg(args, 0).to_js_string()).map(Value::from),
            "MessageChannel" => Ok(self
                .queue()
                .map_or(Value::Undefined, |queue| message_channel(&queue))),
            "XMLHttpRequest" => Ok(Value::from_host(XmlHttpRequest::new(self.network.clone()))),
            "AudioContext" | "webkitAudioContext" => Ok(media::audio_context(&self.queue)),
            "OfflineAudioContext" | "webkitOfflineAudioContext" => {
                Ok(media::offline_audio_context(&self.queue, args))
            }
            "RTCPeerConnection" | "webkitRTCPeerConnection" => Ok(media::peer_connection(&self.queue)),
            "RTCSessionDescription" => Ok(media::session_description(&arg(args, 0))),
            "RTCIceCandidate" => Ok(media::ice_candidate(&arg(args, 0))),
            "matchMedia" => Ok(media_query_list(
                &arg(args, 0).to_js_string(),
                &self.profile,
            )),
            "getComputedStyle" => Ok(match self.graph.resolve(&arg(args, 0)) {
                Some(node) if !node.is_sentinel() => node.to_value().get_or_undefined("style"),
                _ => empty_style(),
            }),
            _ => Ok(Value::Undefined),
        }
    }
}

/// Build the callback for `setTimeout(f, delay, ...args)`.
/// String handlers would need `eval` and are dropped.
fn script_callback(args: &[Value], this: &Value) -> Callback {
    let function = arg(args, 0);
    if !function.is_callable() {
        tracing::debug!("Ignoring non-callable timer handler: {}", function.describe());
        return Callback::host(|| Ok(Value::Undefined));
    }
    let extra = args.get(2..).map(<[Value]>::to_vec).unwrap_or_default();
    Callback::script(function, this.clone(), extra)
}

/// `btoa` over Latin-1
pub fn btoa(input: &str) -> Result<String, Exception> {
    let mut bytes = Vec::with_capacity(input.len());
    for c in input.chars() {
        match u8::try_from(u32::from(c)) {
            Ok(byte) => bytes.push(byte),
            Err(_) => {
                return Err(Exception::dom(
                    "InvalidCharacterError",
                    "Failed to execute 'btoa' on 'Window': The string to be encoded contains characters outside of the Latin1 range.",
                ))
            }
        }
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// `atob` into a Latin-1 string
pub fn atob(input: &str) -> Result<String, Exception> {
    let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let invalid = || {
        Exception::dom(
            "InvalidCharacterError",
            "Failed to execute 'atob' on 'Window': The string to be decoded is not correctly encoded.",
        )
    };
    if compact.len() % 4 == 1 {
        return Err(invalid());
    }
    let bytes = FORGIVING.decode(compact.as_bytes()).map_err(|_| invalid())?;
    Ok(bytes.into_iter().map(char::from).collect())
}

fn media_query_list(query: &str, profile: &Profile) -> Value {
    let list = PlainObject::with_props(
        "MediaQueryList",
        [
            ("media", Value::from(query)),
            ("matches", Value::Bool(media_matches(query, profile))),
            ("onchange", Value::Null),
        ],
    );
    for name in ["addListener", "removeListener", "addEventListener", "removeEventListener"] {
        list.insert(name, native(name, |_, _| Ok(Value::Undefined)));
    }
    Value::from_host(Rc::new(list))
}

/// Every `(feature: value)` condition joined by `and` must hold; unknown
/// features never match
pub fn media_matches(query: &str, profile: &Profile) -> bool {
    let query = query.trim().to_ascii_lowercase();
    if query.is_empty() || query == "all" || query == "screen" {
        return true;
    }
    query.split(" and ").all(|part| {
        let part = part.trim();
        if part == "screen" || part == "all" {
            return true;
        }
        let Some(inner) = part.strip_prefix('(').and_then(|p| p.strip_suffix(')')) else {
            return false;
        };
        let (feature, value) = match inner.split_once(':') {
            Some((feature, value)) => (feature.trim(), value.trim()),
            None => (inner.trim(), ""),
        };
        let px = || crate::layout::parse_px(value);
        let width = f64::from(profile.viewport_width);
        let height = f64::from(profile.viewport_height);
        match feature {
            "min-width" => px().is_some_and(|v| width >= v),
            "max-width" => px().is_some_and(|v| width <= v),
            "min-height" => px().is_some_and(|v| height >= v),
            "max-height" => px().is_some_and(|v| height <= v),
            "orientation" => (value == "landscape") == (width >= height),
            "prefers-color-scheme" => value == "light",
            "prefers-reduced-motion" => value == "no-preference",
            "hover" => value == "hover",
            "pointer" => value == "fine",
            "color" => true,
            _ => false,
        }
    })
}

fn empty_style() -> Value {
    let style = PlainObject::new("CSSStyleDeclaration");
    style.insert(
        "getPropertyValue",
        native("getPropertyValue", |_, _| Ok(Value::from(""))),
    );
    style.define("length", PropertyDescriptor::hidden(Value::from(0)));
    Value::from_host(Rc::new(style))
}

fn members(profile: &Profile, queue: Weak<TaskQueue>) -> PlainObject {
    let performance = PlainObject::new("Performance");
    performance.insert("timeOrigin", Value::from(0));
    performance.insert(
        "now",
        native("now", move |_, _| {
            Ok(Value::from(queue.upgrade().map_or(0.0, |q| q.now() as f64)))
        }),
    );

    let chrome = PlainObject::with_props(
        "Object",
        [
            ("runtime", Value::from_host(Rc::new(PlainObject::new("Object")))),
            (
                "app",
                Value::from_host(Rc::new(PlainObject::with_props(
                    "Object",
                    [("isInstalled", Value::Bool(false))],
                ))),
            ),
            (
                "loadTimes",
                native("loadTimes", |_, _| {
                    Ok(Value::from_host(Rc::new(PlainObject::new("Object"))))
                }),
            ),
            (
                "csi",
                native("csi", |_, _| {
                    Ok(Value::from_host(Rc::new(PlainObject::new("Object"))))
                }),
            ),
        ],
    );

    let navigator = navigator(profile);
    PlainObject::with_props(
        "Window",
        [
            ("navigator", navigator.clone()),
            ("clientInformation", navigator),
            ("screen", screen(profile)),
            ("location", location(&profile.url)),
            ("history", history()),
            ("localStorage", Value::from_host(Storage::new())),
            ("sessionStorage", Value::from_host(Storage::new())),
            ("performance", Value::from_host(Rc::new(performance))),
            ("chrome", Value::from_host(Rc::new(chrome))),
        ],
    )
}

impl EventTarget for HostWindow {
    fn event_registry(&self) -> &EventRegistry {
        &self.events
    }

    fn event_receiver(&self) -> Value {
        self.this
            .upgrade()
            .map_or(Value::Undefined, Value::from_host)
    }
}

impl HostObject for HostWindow {
    fn class_name(&self) -> &str {
        "Window"
    }

    fn get(&self, key: &str, receiver: &Value) -> Completion {
        if DEFAULT_SELF_SLOTS.contains(&key) {
            return Ok(match receiver {
                Value::Object(_) => receiver.clone(),
                _ => self.event_receiver(),
            });
        }
        if let Some(value) = self.members.lookup(key) {
            return Ok(value);
        }
        if let Some(value) = self.property(key) {
            return Ok(value);
        }
        if WINDOW_METHODS.contains(&key) {
            return Ok(self.method(key));
        }
        if key.len() > 2 && key.starts_with("on") && key[2..].bytes().all(|b| b.is_ascii_lowercase()) {
            return Ok(Value::Null);
        }
        Ok(Value::Undefined)
    }

    fn set(&self, key: &str, value: Value) -> bool {
        if READONLY_KEYS.contains(&key) || DEFAULT_SELF_SLOTS.contains(&key) {
            return false;
        }
        self.members.set(key, value)
    }

    fn delete(&self, key: &str) -> bool {
        self.members.delete(key)
    }

    fn own_keys(&self) -> Vec<String> {
        self.members.own_keys()
    }

    fn own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        self.members.own_property(key)
    }

    fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> bool {
        self.members.define_property(key, descriptor)
    }

    fn is_root(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::LookupPolicy;
    use crate::host::cookies::CookieJar;
    use crate::host::navigator::UrlParts;
    use crate::host::network::OfflineNetwork;
    use crate::layout::LayoutEstimator;
    use crate::value::NativeFunction;

    fn window() -> (Rc<HostWindow>, Rc<TaskQueue>) {
        let profile = Profile::default();
        let graph = NodeGraph::new(LookupPolicy::Strict, LayoutEstimator::default());
        graph.create_document(&profile.url, &profile.script_url);
        let queue = Rc::new(TaskQueue::new());
        let network = Rc::new(NetworkContext {
            network: Rc::new(OfflineNetwork),
            queue: Rc::downgrade(&queue),
            cookies: Rc::new(CookieJar::new()),
            base: UrlParts::parse(&profile.url),
            user_agent: profile.user_agent.clone(),
        });
        (HostWindow::new(profile, graph, &queue, network), queue)
    }

    fn counter() -> (Rc<RefCell<u32>>, Value) {
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        let f = NativeFunction::value("tick", move |_, _| {
            *sink.borrow_mut() += 1;
            Ok(Value::Undefined)
        });
        (count, f)
    }

    #[test]
    fn test_self_slots_follow_receiver() {
        let (window, _queue) = window();
        let value = Value::from_host(window);
        let self_ref = value.get_or_undefined("self");
        assert!(self_ref.strict_eq(&value));
        assert!(value.get_or_undefined("top").strict_eq(&value));
        assert!(!value.set("window", Value::Null));
    }

    #[test]
    fn test_document_default_view() {
        let (window, _queue) = window();
        let value = Value::from_host(window);
        let document = value.get_or_undefined("document");
        assert!(document.get_or_undefined("defaultView").strict_eq(&value));
        assert_eq!(
            document
                .get_or_undefined("location")
                .get_or_undefined("hostname")
                .as_str(),
            Some("www.example.com")
        );
    }

    #[test]
    fn test_timers_through_script_surface() {
        let (window, queue) = window();
        let value = Value::from_host(window);
        let (count, tick) = counter();

        let id = value
            .call_method("setTimeout", &[tick.clone(), Value::from(50)])
            .unwrap();
        value
            .call_method("setTimeout", &[tick.clone(), Value::from(10)])
            .unwrap();
        value.call_method("clearTimeout", &[id]).unwrap();
        queue.advance(100);
        assert_eq!(*count.borrow(), 1);

        value.call_method("requestAnimationFrame", &[tick]).unwrap();
        queue.advance(FRAME_DELAY_MS);
        assert_eq!(*count.borrow(), 2);

        // Garbage handles are quiet
        value.call_method("clearTimeout", &[Value::from("nope")]).unwrap();
    }

    #[test]
    fn test_oversized_delay_runs_promptly() {
        let (window, queue) = window();
        let value = Value::from_host(window);
        let (count, tick) = counter();

        queue.advance(10);
        value
            .call_method("setTimeout", &[tick.clone(), Value::from(1e20)])
            .unwrap();
        let interval = value
            .call_method("setInterval", &[tick, Value::from(1e20)])
            .unwrap();
        queue.run_until_idle(5);
        assert_eq!(*count.borrow(), 5);
        value.call_method("clearInterval", &[interval]).unwrap();
        assert!(queue.is_idle());
    }

    #[test]
    fn test_media_constructors_settle_on_window_queue() {
        let (window, queue) = window();
        let value = Value::from_host(window);
        let (count, tick) = counter();

        let audio = value
            .call_method(
                "OfflineAudioContext",
                &[Value::from(1), Value::from(44100), Value::from(44100)],
            )
            .unwrap();
        audio
            .call_method("startRendering", &[])
            .unwrap()
            .call_method("then", &[tick.clone()])
            .unwrap();

        let video = value
            .get_or_undefined("document")
            .call_method("createElement", &[Value::from("video")])
            .unwrap();
        video
            .call_method("play", &[])
            .unwrap()
            .call_method("then", &[tick])
            .unwrap();
        assert_eq!(*count.borrow(), 0);
        queue.run_due();
        assert_eq!(*count.borrow(), 2);

        for name in ["AudioContext", "webkitAudioContext", "RTCPeerConnection"] {
            assert!(value.call_method(name, &[]).unwrap().is_object(), "{}", name);
        }
        let candidate = value.call_method("RTCIceCandidate", &[Value::Undefined]).unwrap();
        assert_eq!(candidate.get_or_undefined("candidate").as_str(), Some(""));
    }

    #[test]
    fn test_queue_microtask_rejects_non_callable() {
        let (window, _queue) = window();
        let value = Value::from_host(window);
        let err = value.call_method("queueMicrotask", &[Value::from(1)]).unwrap_err();
        assert_eq!(err.name, "TypeError");
    }

    #[test]
    fn test_base64() {
        assert_eq!(btoa("hello").unwrap(), "aGVsbG8=");
        assert_eq!(atob("aGVsbG8=").unwrap(), "hello");
        assert_eq!(atob("aGVsbG8").unwrap(), "hello");
        assert_eq!(atob(" aGVs bG8= ").unwrap(), "hello");
        assert_eq!(btoa("\u{ff}").unwrap(), "/w==");
        assert_eq!(atob("/w==").unwrap(), "\u{ff}");
        assert_eq!(btoa("\u{263a}").unwrap_err().name, "InvalidCharacterError");
        assert_eq!(atob("a").unwrap_err().name, "InvalidCharacterError");
        assert_eq!(atob("a$==").unwrap_err().name, "InvalidCharacterError");
    }

    #[test]
    fn test_media_queries() {
        let profile = Profile::default();
        assert!(media_matches("(min-width: 1024px)", &profile));
        assert!(!media_matches("(max-width: 600px)", &profile));
        assert!(media_matches("screen and (prefers-color-scheme: light)", &profile));
        assert!(!media_matches("(prefers-color-scheme: dark)", &profile));
        assert!(!media_matches("(unknown-feature)", &profile));
    }

    #[test]
    fn test_computed_style_of_node_and_junk() {
        let (window, _queue) = window();
        let value = Value::from_host(window.clone());
        let body = window.graph().body().unwrap();
        body.set_style("color", "red");

        let style = value
            .call_method("getComputedStyle", &[body.to_value()])
            .unwrap();
        assert_eq!(style.get_or_undefined("color").as_str(), Some("red"));

        let empty = value
            .call_method("getComputedStyle", &[Value::from(5)])
            .unwrap();
        let text = empty
            .call_method("getPropertyValue", &[Value::from("color")])
            .unwrap();
        assert_eq!(text.as_str(), Some(""));
    }

    #[test]
    fn test_methods_are_masked_and_stable() {
        let (window, _queue) = window();
        let value = Value::from_host(window);
        let first = value.get_or_undefined("setTimeout");
        assert!(first.strict_eq(&value.get_or_undefined("setTimeout")));
        assert!(crate::disguise::presents_native(&first));
    }

    #[test]
    fn test_globals_and_expandos() {
        let (window, _queue) = window();
        let value = Value::from_host(window.clone());
        window.define_global("__bag", Value::from("bag"));
        assert_eq!(value.get_or_undefined("__bag").as_str(), Some("bag"));
        assert!(value.set("custom", Value::from(1)));
        assert!(window.own_keys().iter().any(|k| k == "custom"));
        assert!(value.get_or_undefined("onload").is_nullish());
        assert!(value.get_or_undefined("navigator").is_object());
    }
}
