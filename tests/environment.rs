//! Integration tests for mirage
//!
//! Each test builds a fresh environment and drives it only through the
//! public API, the way an orchestrator would.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use mirage::value::NativeFunction;
use mirage::{
    is_wrapped, ClosureScript, EnvConfig, Error, Event, EventInit, EventTarget, HttpRequest,
    HttpResponse, Network, Profile, Runner, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn runner() -> Runner {
    init_tracing();
    Runner::new(Profile::default(), EnvConfig::default()).expect("Failed to build runner")
}

fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, label: &'static str) -> Value {
    let log = log.clone();
    NativeFunction::value(label, move |_, _| {
        log.borrow_mut().push(label);
        Ok(Value::Undefined)
    })
}

#[test]
fn test_wrap_is_idempotent() {
    let runner = runner();
    let env = runner.environment();
    let body = env.graph().body().unwrap().to_value();

    let once = env.wrap(&body, "body");
    let twice = env.wrap(&once, "body");
    assert!(is_wrapped(&once));
    assert!(twice.strict_eq(&once));
    assert_eq!(
        twice.get_or_undefined("nodeName").as_str(),
        once.get_or_undefined("nodeName").as_str()
    );
}

#[test]
fn test_root_self_reference() {
    let runner = runner();
    let root = runner.environment().root().clone();
    for slot in ["window", "self", "top", "parent", "globalThis", "frames"] {
        assert!(
            root.get_or_undefined(slot).strict_eq(&root),
            "{} should be the wrapped root",
            slot
        );
    }
    let nested = root.get_or_undefined("window").get_or_undefined("self");
    assert!(nested.strict_eq(&root));
}

#[test]
fn test_structural_round_trip() {
    let runner = runner();
    let graph = runner.environment().graph();
    let parent = graph.create_element("div");
    let node = graph.create_element("span");

    graph.append(&parent, &node.to_value());
    assert_eq!(parent.children().len(), 1);

    graph.remove(&parent, &node.to_value());
    assert!(parent.children().iter().all(|c| c.uid() != node.uid()));
    assert!(graph.parent_of(&node).is_sentinel());

    // The script sees the same thing
    let script_parent = node.to_value().get_or_undefined("parentNode");
    assert_eq!(
        script_parent.get_or_undefined("__identity").as_str(),
        Some(graph.sentinel().uid().to_string().as_str())
    );
}

#[test]
fn test_insert_before_through_wrapper() {
    let runner = runner();
    let env = runner.environment();
    let graph = env.graph();

    let build = |wrap_reference: bool| {
        let parent = graph.create_element("ul");
        let first = graph.create_element("li");
        first.set_attribute("id", "first");
        graph.append(&parent, &first.to_value());

        let inserted = graph.create_element("li");
        inserted.set_attribute("id", "inserted");
        let reference = if wrap_reference {
            env.wrap(&first.to_value(), "li")
        } else {
            first.to_value()
        };
        graph.insert_before(&parent, &inserted.to_value(), &reference);
        parent.children().iter().map(|c| c.id()).collect::<Vec<_>>()
    };

    assert_eq!(build(true), build(false));
    assert_eq!(build(true), vec!["inserted", "first"]);
}

#[test]
fn test_layout_boxes() {
    let runner = runner();
    let graph = runner.environment().graph();

    let sized = graph.create_element("div");
    sized.set_style("width", "500px");
    sized.set_style("height", "300px");
    let rect = sized
        .to_value()
        .call_method("getBoundingClientRect", &[])
        .unwrap();
    for (key, expected) in [("x", 0.0), ("y", 0.0), ("width", 500.0), ("height", 300.0)] {
        assert!(
            rect.get_or_undefined(key).strict_eq(&Value::from(expected)),
            "{} mismatch",
            key
        );
    }

    let hidden = graph.create_element("div");
    hidden.set_style("display", "none");
    let b = graph.layout().measure(&hidden);
    assert_eq!((b.x, b.y, b.width, b.height), (0.0, 0.0, 0.0, 0.0));
}

#[test]
fn test_dispatch_order_slot_first() {
    let runner = runner();
    let graph = runner.environment().graph();
    let log = Rc::new(RefCell::new(Vec::new()));

    let entity = graph.create_element("div");
    entity.add_event_listener("x", recorder(&log, "A"));
    entity.add_event_listener("x", recorder(&log, "B"));
    entity.to_value().set("onx", recorder(&log, "S"));

    let event = Event::new("x", EventInit::default());
    entity.dispatch_event(&Value::from_host(event));
    assert_eq!(*log.borrow(), vec!["S", "A", "B"]);
}

#[test]
fn test_timer_ordering_and_cancellation() {
    let runner = runner();
    let env = runner.environment();
    let root = env.root();
    let log = Rc::new(RefCell::new(Vec::new()));

    let cancelled = root
        .call_method("setTimeout", &[recorder(&log, "cancelled"), Value::from(30)])
        .unwrap();
    root.call_method("setTimeout", &[recorder(&log, "fifty"), Value::from(50)])
        .unwrap();
    root.call_method("setTimeout", &[recorder(&log, "ten"), Value::from(10)])
        .unwrap();
    root.call_method("clearTimeout", &[cancelled.clone()]).unwrap();

    env.queue().advance(100);
    assert_eq!(*log.borrow(), vec!["ten", "fifty"]);

    // Cancelling again is a quiet no-op
    root.call_method("clearTimeout", &[cancelled]).unwrap();
}

#[test]
fn test_get_element_by_id_end_to_end() {
    let runner = runner();
    let root = runner.environment().root().clone();
    let document = root.get("document").unwrap();

    let div = document
        .call_method("createElement", &[Value::from("DIV")])
        .unwrap();
    div.set("id", Value::from("a"));
    document
        .get("body")
        .unwrap()
        .call_method("appendChild", &[div.clone()])
        .unwrap();

    let found = document
        .call_method("getElementById", &[Value::from("a")])
        .unwrap();
    assert_eq!(
        found.get_or_undefined("__identity").as_str(),
        div.get_or_undefined("__identity").as_str()
    );

    let graph = runner.environment().graph();
    assert!(graph.get_element_by_id("missing").is_sentinel());
}

#[test]
fn test_fabricate_missing_is_opt_in() {
    init_tracing();
    let runner = Runner::new(Profile::default(), EnvConfig::permissive()).unwrap();
    let graph = runner.environment().graph();
    let made = graph.get_element_by_id("challenge-form");
    assert!(!made.is_sentinel());
    assert_eq!(made.id(), "challenge-form");
    assert!(graph.get_element_by_id("challenge-form").uid() == made.uid());
}

#[test]
fn test_host_functions_present_as_native() {
    let runner = runner();
    let root = runner.environment().root().clone();
    let document = root.get("document").unwrap();

    for f in [
        root.get_or_undefined("setTimeout"),
        document.get_or_undefined("createElement"),
        document.get_or_undefined("body").get_or_undefined("appendChild"),
    ] {
        let text = f.call_method("toString", &[]).unwrap();
        assert!(text.as_str().unwrap().contains("[native code]"));
        let meta = f
            .get_or_undefined("toString")
            .call_method("toString", &[])
            .unwrap();
        assert!(meta.as_str().unwrap().contains("[native code]"));
    }
}

#[test]
fn test_access_log_records_paths() {
    let runner = runner();
    let root = runner.environment().root().clone();
    let _ = root
        .get_or_undefined("navigator")
        .get_or_undefined("userAgent");

    let events = runner.environment().interceptor().log().events();
    assert!(events.iter().any(|e| e.path.contains("navigator")));
}

#[test]
fn test_navigator_matches_profile() {
    let profile = Profile {
        hardware_concurrency: 12,
        locale: "de-DE".into(),
        ..Profile::default()
    };
    let runner = Runner::new(profile, EnvConfig::quiet()).unwrap();
    let navigator = runner.environment().root().get_or_undefined("navigator");
    assert!(navigator
        .get_or_undefined("hardwareConcurrency")
        .strict_eq(&Value::from(12)));
    assert_eq!(navigator.get_or_undefined("language").as_str(), Some("de-DE"));
    assert!(navigator
        .get_or_undefined("webdriver")
        .strict_eq(&Value::Bool(false)));
    assert!(runner.environment().interceptor().log().is_empty());
}

/// Answers every request with a session cookie
struct CookieServer;

impl Network for CookieServer {
    fn send(&self, _request: &HttpRequest) -> mirage::Result<HttpResponse> {
        Ok(HttpResponse::ok("ok").with_header("Set-Cookie", "cf_clearance=granted; Path=/"))
    }
}

#[test]
fn test_xhr_feeds_cookie_jar() {
    init_tracing();
    let runner =
        Runner::with_network(Profile::default(), EnvConfig::default(), Rc::new(CookieServer))
            .unwrap();
    let script = ClosureScript::new("challenge.js", |window| {
        let xhr = window.call_method("XMLHttpRequest", &[])?;
        xhr.call_method("open", &[Value::from("POST"), Value::from("/verify")])?;
        xhr.call_method("send", &[Value::from("answer=42")])?;
        Ok(xhr)
    });
    let xhr = runner.execute(&script).unwrap();
    runner.environment().queue().run_until_idle(16);

    assert!(xhr.get_or_undefined("status").strict_eq(&Value::from(200)));
    let cookie = runner
        .environment()
        .root()
        .get_or_undefined("document")
        .get_or_undefined("cookie");
    assert_eq!(cookie.as_str(), Some("cf_clearance=granted"));
}

#[test]
fn test_script_fault_reaches_orchestrator_only() {
    let runner = runner();
    let script = ClosureScript::new("challenge.js", |window| {
        // Faulting reads inside the environment are contained
        let missing = window.get_or_undefined("nope").get_or_undefined("deeper");
        assert!(missing.is_undefined());
        window.get("nope")?.get("deeper")
    });
    let err = runner.execute(&script).unwrap_err();
    assert!(err.is_script_fault());

    // The environment keeps working afterwards
    assert!(runner.fire_load().is_ok());
    assert_eq!(runner.environment().graph().ready_state(), "complete");
}

#[test]
fn test_guest_sees_filtered_stacks() {
    let runner = runner();
    let script = ClosureScript::new("challenge.js", |window| {
        let err = window
            .call_method("atob", &[Value::from("%%%")])
            .unwrap_err();
        Ok(window.error_value(&err))
    });
    let error = runner.execute(&script).unwrap();
    let stack = error.get_or_undefined("stack").to_js_string();
    assert_eq!(error.get_or_undefined("name").as_str(), Some("InvalidCharacterError"));
    assert!(!stack.contains(".rs"));
}

#[test]
fn test_fingerprint_surfaces_answer_feature_detection() {
    let runner = runner();
    let script = ClosureScript::new("challenge.js", |window| {
        let document = window.get("document")?;
        let canvas = document.call_method("createElement", &[Value::from("canvas")])?;
        let gl = canvas.call_method("getContext", &[Value::from("webgl")])?;
        let renderer = gl.call_method("getParameter", &[Value::from(37446)])?;

        let audio = document.call_method("createElement", &[Value::from("audio")])?;
        let mp3 = audio.call_method("canPlayType", &[Value::from("audio/mpeg; codecs=mp3")])?;
        let mimes = window.get("navigator")?.get("mimeTypes")?.get("length")?;
        let peer = window.call_method("RTCPeerConnection", &[])?;
        Ok(Value::from(format!(
            "{}|{}|{}|{}",
            renderer.to_js_string(),
            mp3.to_js_string(),
            mimes.to_js_string(),
            peer.get("signalingState")?.to_js_string()
        )))
    });
    let summary = runner.execute(&script).unwrap();
    let parts = summary.as_str().unwrap().split('|').collect::<Vec<_>>();
    assert!(parts[0].starts_with("ANGLE"));
    assert_eq!(&parts[1..], ["probably", "2", "stable"]);
}

#[tokio::test]
async fn test_run_until_sees_completion_signal() {
    let runner = runner();
    let script = ClosureScript::new("challenge.js", |window| {
        let document = window.get("document")?;
        let input = document.call_method("createElement", &[Value::from("input")])?;
        input.set("name", Value::from("cf-turnstile-response"));
        document
            .get("body")?
            .call_method("appendChild", &[input.clone()])?;

        let solve = NativeFunction::value("solve", move |_, _| {
            input.set("value", Value::from("0.token"));
            Ok(Value::Undefined)
        });
        window.call_method("setTimeout", &[solve, Value::from(250)])?;
        Ok(Value::Undefined)
    });
    runner.execute(&script).unwrap();
    runner.schedule_lifecycle(10, 20);

    runner
        .run_until(
            |env| {
                env.input_fields()
                    .iter()
                    .any(|(name, value)| name == "cf-turnstile-response" && !value.is_empty())
            },
            Duration::from_secs(5),
        )
        .await
        .expect("signal should appear");
    assert!(runner.environment().queue().now() >= 250);
    assert_eq!(runner.environment().graph().ready_state(), "complete");
}

#[tokio::test]
async fn test_run_until_times_out() {
    let runner = runner();
    let result = runner
        .run_until(|_| false, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(Error::Timeout(_))));
}
