//! Orchestrator
//!
//! [`Runner`] builds a fresh [`Environment`] per run, exposes the challenge
//! configuration as a global, executes the hosted script against the wrapped
//! root and drives lifecycle events and the virtual clock.
//!
//! ```rust,no_run
//! use mirage::{ClosureScript, EnvConfig, Profile, Runner};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mirage::Result<()> {
//! let runner = Runner::new(Profile::default(), EnvConfig::default())?;
//! runner.inject_json("_opts", &serde_json::json!({ "mode": "managed" }))?;
//!
//! let script = ClosureScript::new("challenge.js", |window| {
//!     window.get("document")?.get("body")
//! });
//! runner.execute(&script)?;
//! runner.schedule_lifecycle(10, 50);
//!
//! runner
//!     .run_until(
//!         |env| env.input_fields().iter().any(|(_, value)| !value.is_empty()),
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::cell::{Cell, RefCell};
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::time::Instant;

use crate::disguise::{StackRewriter, StackRules};
use crate::dom::{LookupPolicy, NodeGraph};
use crate::error::{Error, Result};
use crate::events::{Event, EventInit, EventTarget};
use crate::host::{
    CookieJar, HostWindow, Network, NetworkContext, OfflineNetwork, TaskQueue, UrlParts,
};
use crate::intercept::Interceptor;
use crate::layout::LayoutEstimator;
use crate::profile::Profile;
use crate::value::{Completion, Exception, HostObject, PlainObject, Value};
use crate::EnvConfig;

/// An opaque script payload.
///
/// The adapter owns whatever engine actually evaluates the payload; the
/// environment only hands it the wrapped root and reads back the completion.
pub trait Script {
    /// Location the script's frames report, matched by stack rules
    fn label(&self) -> &str;

    fn run(&self, scope: &ScriptScope<'_>) -> Completion;
}

/// What a script adapter works with: the wrapped root, plus the stack
/// formatter for exceptions the guest catches. Derefs to the root.
pub struct ScriptScope<'a> {
    root: &'a Value,
    rewriter: &'a StackRewriter,
}

impl<'a> ScriptScope<'a> {
    pub fn new(root: &'a Value, rewriter: &'a StackRewriter) -> Self {
        Self { root, rewriter }
    }

    pub fn root(&self) -> &Value {
        self.root
    }

    pub fn rewriter(&self) -> &StackRewriter {
        self.rewriter
    }

    /// `error.stack` for a caught exception
    pub fn stack(&self, exception: &Exception) -> String {
        exception.stack(self.rewriter)
    }

    /// The guest's view of a caught exception: `name`, `message`, `stack`
    pub fn error_value(&self, exception: &Exception) -> Value {
        let error = PlainObject::with_props(
            exception.name.clone(),
            [
                ("name", Value::from(exception.name.as_str())),
                ("message", Value::from(exception.message.as_str())),
                ("stack", Value::from(self.stack(exception))),
            ],
        );
        Value::from_host(Rc::new(error))
    }
}

impl Deref for ScriptScope<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        self.root
    }
}

/// A script implemented as a Rust closure
pub struct ClosureScript<F> {
    label: String,
    body: F,
}

impl<F> ClosureScript<F>
where
    F: Fn(&ScriptScope<'_>) -> Completion,
{
    pub fn new(label: impl Into<String>, body: F) -> Self {
        Self {
            label: label.into(),
            body,
        }
    }
}

impl<F> Script for ClosureScript<F>
where
    F: Fn(&ScriptScope<'_>) -> Completion,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn run(&self, scope: &ScriptScope<'_>) -> Completion {
        (self.body)(scope)
    }
}

/// Everything one run owns. Nothing here is global; drop or
/// [`teardown`](Environment::teardown) it when the run is over.
pub struct Environment {
    profile: Profile,
    graph: NodeGraph,
    queue: Rc<TaskQueue>,
    interceptor: Interceptor,
    cookies: Rc<CookieJar>,
    window: Rc<HostWindow>,
    root: Value,
    stack_rules: Option<StackRules>,
    rewriter: RefCell<Rc<StackRewriter>>,
    torn_down: Cell<bool>,
}

impl Environment {
    /// Fresh root window and document for `profile`
    pub fn new(profile: Profile, config: &EnvConfig, network: Rc<dyn Network>) -> Result<Self> {
        profile.validate()?;

        let policy = if config.fabricate_missing {
            LookupPolicy::Fabricate
        } else {
            LookupPolicy::Strict
        };
        let layout = LayoutEstimator::with_viewport(profile.viewport_width, profile.viewport_height);
        let graph = NodeGraph::new(policy, layout);
        graph.create_document(&profile.url, &profile.script_url);

        let base = UrlParts::parse(&profile.url);
        let cookies = Rc::new(CookieJar::for_domain(base.hostname.clone()));
        graph.attach_cookies(cookies.clone());

        let queue = Rc::new(TaskQueue::new());
        let network = Rc::new(NetworkContext {
            network,
            queue: Rc::downgrade(&queue),
            cookies: cookies.clone(),
            base,
            user_agent: profile.user_agent.clone(),
        });
        let window = HostWindow::new(profile.clone(), graph.clone(), &queue, network);

        let interceptor = Interceptor::new(config.intercept.clone());
        let root = interceptor.wrap(&Value::from_host(window.clone()), "window");

        let label = default_script_label(&profile.script_url);
        let rewriter = build_rewriter(&profile.script_url, config.stack_rules.as_ref(), &label)?;

        tracing::debug!("Environment created for {}", profile.url);
        Ok(Self {
            profile,
            graph,
            queue,
            interceptor,
            cookies,
            window,
            root,
            stack_rules: config.stack_rules.clone(),
            rewriter: RefCell::new(Rc::new(rewriter)),
            torn_down: Cell::new(false),
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn queue(&self) -> &Rc<TaskQueue> {
        &self.queue
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    pub fn cookies(&self) -> &Rc<CookieJar> {
        &self.cookies
    }

    /// The unwrapped root, for host-side inspection
    pub fn window(&self) -> &Rc<HostWindow> {
        &self.window
    }

    /// The wrapped root the script sees
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Wrap any host value with this run's interceptor
    pub fn wrap(&self, target: &Value, label: &str) -> Value {
        self.interceptor.wrap(target, label)
    }

    /// Point stack rewriting at `script_label`: its frames are presented
    /// under the profile's script URL and host frames are hidden. Explicit
    /// [`EnvConfig::stack_rules`] take precedence over the label defaults.
    pub fn install_stack_rewriter(&self, script_label: &str) -> Result<()> {
        let rewriter = build_rewriter(&self.profile.script_url, self.stack_rules.as_ref(), script_label)?;
        *self.rewriter.borrow_mut() = Rc::new(rewriter);
        Ok(())
    }

    /// The formatter every guest-visible stack goes through
    pub fn stack_rewriter(&self) -> Rc<StackRewriter> {
        self.rewriter.borrow().clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// `(name, value)` of every INPUT currently in the document.
    ///
    /// Inputs without a `name` report their `id`.
    pub fn input_fields(&self) -> Vec<(String, String)> {
        let Some(document) = self.graph.document() else {
            return Vec::new();
        };
        self.graph
            .find_all_by_tag(&document, "INPUT")
            .into_iter()
            .map(|input| {
                let name = input
                    .attribute("name")
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| input.id());
                (name, input.attribute("value").unwrap_or_default())
            })
            .collect()
    }

    /// Drop pending tasks, listeners and the node registry
    pub fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        self.queue.clear();
        self.window.event_registry().clear();
        for key in self.window.own_keys() {
            self.window.delete(&key);
        }
        self.graph.teardown();
        tracing::info!("Environment torn down ({} nodes released)", self.graph.node_count());
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn build_rewriter(script_url: &str, rules: Option<&StackRules>, label: &str) -> Result<StackRewriter> {
    let rules = rules.cloned().unwrap_or_else(|| StackRules::for_target(label));
    StackRewriter::with_rules(script_url, rules)
}

/// File name of the script URL, used until a script is executed
fn default_script_label(script_url: &str) -> String {
    UrlParts::parse(script_url)
        .pathname
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("script")
        .to_string()
}

/// Drives one hosted script through one [`Environment`]
pub struct Runner {
    env: Environment,
    config: EnvConfig,
}

impl Runner {
    /// Runner over an [`OfflineNetwork`]
    pub fn new(profile: Profile, config: EnvConfig) -> Result<Self> {
        Self::with_network(profile, config, Rc::new(OfflineNetwork))
    }

    pub fn with_network(profile: Profile, config: EnvConfig, network: Rc<dyn Network>) -> Result<Self> {
        let env = Environment::new(profile, &config, network)?;
        Ok(Self { env, config })
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    fn ensure_live(&self) -> Result<()> {
        if self.env.is_torn_down() {
            return Err(Error::TornDown);
        }
        Ok(())
    }

    /// Expose `bag` as the global `name`, wrapped, and under `__name`
    pub fn inject_config(&self, name: &str, bag: Value) -> Result<()> {
        self.ensure_live()?;
        if name.is_empty() {
            return Err(Error::Config("config global needs a name".into()));
        }
        let wrapped = self.env.wrap(&bag, name);
        self.env.window.define_global(name, wrapped.clone());
        if !name.starts_with("__") {
            self.env.window.define_global(&format!("__{}", name), wrapped);
        }
        tracing::debug!("Injected config global '{}'", name);
        Ok(())
    }

    /// [`inject_config`](Self::inject_config) from JSON
    pub fn inject_json(&self, name: &str, bag: &serde_json::Value) -> Result<()> {
        self.inject_config(name, from_json(bag))
    }

    /// Run `script` against the wrapped root, then flush zero-delay tasks.
    ///
    /// A top-level throw comes back as [`Error::Script`] with the stack as
    /// the script would have seen it.
    pub fn execute(&self, script: &dyn Script) -> Result<Value> {
        self.ensure_live()?;
        let label = script.label();
        tracing::info!("Executing script '{}'", label);

        self.env.install_stack_rewriter(label)?;
        let rewriter = self.env.stack_rewriter();
        let scope = ScriptScope::new(&self.env.root, &rewriter);

        match script.run(&scope) {
            Ok(value) => {
                self.env.queue.run_due();
                Ok(value)
            }
            Err(exception) => {
                let stack = scope.stack(&exception);
                tracing::warn!("Script '{}' threw: {}", label, exception);
                Err(Error::script(label, exception, stack))
            }
        }
    }

    /// `readyState = "interactive"` and `DOMContentLoaded` on the document
    pub fn fire_content_ready(&self) -> Result<()> {
        self.ensure_live()?;
        content_ready(&self.env.graph, &Rc::downgrade(&self.env.window));
        Ok(())
    }

    /// `readyState = "complete"` and `load` on the root
    pub fn fire_load(&self) -> Result<()> {
        self.ensure_live()?;
        load(&self.env.graph, &Rc::downgrade(&self.env.window));
        Ok(())
    }

    /// Defer both lifecycle triggers onto the task queue
    pub fn schedule_lifecycle(&self, content_ready_ms: u64, load_ms: u64) {
        let graph = self.env.graph.clone();
        let window = Rc::downgrade(&self.env.window);
        self.env.queue.defer(content_ready_ms, move || {
            content_ready(&graph, &window);
            Ok(Value::Undefined)
        });

        let graph = self.env.graph.clone();
        let window = Rc::downgrade(&self.env.window);
        self.env.queue.defer(load_ms.max(content_ready_ms), move || {
            load(&graph, &window);
            Ok(Value::Undefined)
        });
    }

    /// See [`Environment::input_fields`]
    pub fn input_fields(&self) -> Vec<(String, String)> {
        self.env.input_fields()
    }

    /// Advance the virtual clock a tick at a time until `predicate` holds.
    ///
    /// Between ticks the runner sleeps for the configured poll interval, so
    /// `timeout` is wall-clock time.
    pub async fn run_until<P>(&self, mut predicate: P, timeout: Duration) -> Result<()>
    where
        P: FnMut(&Environment) -> bool,
    {
        self.ensure_live()?;
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.env) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "completion signal not seen within {:?} ({} ms virtual)",
                    timeout,
                    self.env.queue.now()
                )));
            }
            self.env.queue.advance(self.config.tick_ms);
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Tear the environment down. Further calls fail with [`Error::TornDown`].
    pub fn teardown(&self) {
        self.env.teardown();
    }
}

fn content_ready(graph: &NodeGraph, window: &Weak<HostWindow>) {
    graph.set_ready_state("interactive");
    tracing::info!("DOMContentLoaded");
    let Some(document) = graph.document() else {
        return;
    };
    let event = Event::new(
        "DOMContentLoaded",
        EventInit {
            bubbles: true,
            ..EventInit::trusted()
        },
    );
    let event_value = Value::from_host(event.clone());
    document.dispatch_event(&event_value);
    if !event.propagation_stopped() {
        if let Some(window) = window.upgrade() {
            window.dispatch_event(&event_value);
        }
    }
}

fn load(graph: &NodeGraph, window: &Weak<HostWindow>) {
    graph.set_ready_state("complete");
    tracing::info!("load");
    if let Some(window) = window.upgrade() {
        let event = Event::new("load", EventInit::trusted());
        window.dispatch_event(&Value::from_host(event));
    }
}

/// JSON into host values: objects become plain objects, arrays array-likes
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => Value::from_host(Rc::new(PlainObject::array(
            items.iter().map(from_json).collect(),
        ))),
        serde_json::Value::Object(map) => Value::from_host(Rc::new(PlainObject::with_props(
            "Object",
            map.iter().map(|(k, v)| (k.clone(), from_json(v))),
        ))),
    }
}
