//! # Mirage
//!
//! Synthetic browser host environment for running untrusted challenge
//! scripts outside a browser.
//!
//! Mirage fabricates the object graph a page script expects (a root window,
//! a document tree, navigator and friends) and mediates every access to it
//! through a transparent interception layer. Nothing renders and nothing
//! touches the network unless the orchestrator plugs a [`Network`] in.
//!
//! ## Features
//!
//! - **Transparent interception** - wrappers forward every operation, log
//!   access paths and answer self-references with the wrapper itself
//! - **Forgiving node graph** - structural misses fall back instead of
//!   throwing; detached lookups return a shared inert sentinel node
//! - **Disguise** - host functions stringify as built-ins, error stacks are
//!   rewritten to point at the script's public URL
//! - **Virtual clock** - timers, frames, message delivery and mocked network
//!   responses run deterministically when the orchestrator advances time
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mirage::{ClosureScript, EnvConfig, Profile, Runner, Value};
//!
//! fn main() -> mirage::Result<()> {
//!     let runner = Runner::new(Profile::random(), EnvConfig::default())?;
//!
//!     let script = ClosureScript::new("challenge.js", |window| {
//!         let document = window.get("document")?;
//!         let input = document.call_method("createElement", &[Value::from("input")])?;
//!         input.set("name", Value::from("cf-response"));
//!         input.set("value", Value::from("token"));
//!         document.get("body")?.call_method("appendChild", &[input])
//!     });
//!     runner.execute(&script)?;
//!     runner.fire_content_ready()?;
//!     runner.fire_load()?;
//!
//!     for (name, value) in runner.input_fields() {
//!         println!("{} = {}", name, value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use mirage::EnvConfig;
//!
//! // Fabricate placeholder elements for lookups that would otherwise miss
//! let config = EnvConfig {
//!     fabricate_missing: true,
//!     ..EnvConfig::quiet()
//! };
//! assert!(!config.intercept.log_access);
//! ```

pub mod disguise;
pub mod dom;
pub mod error;
pub mod events;
pub mod host;
pub mod intercept;
pub mod layout;
pub mod profile;
pub mod runner;
pub mod value;

use std::time::Duration;

// Re-exports
pub use disguise::{mask, StackRewriter, StackRules};
pub use dom::{LookupPolicy, NodeGraph, NodeKind, NodeRef, NodeUid, SyntheticNode};
pub use error::{Error, Result};
pub use events::{Event, EventInit, EventTarget};
pub use host::{CookieJar, HostWindow, HttpRequest, HttpResponse, Network, OfflineNetwork, TaskQueue};
pub use intercept::{is_wrapped, AccessEvent, AccessKind, InterceptConfig, Interceptor};
pub use layout::{LayoutBox, LayoutEstimator};
pub use profile::Profile;
pub use runner::{ClosureScript, Environment, Runner, Script, ScriptScope};
pub use value::{Completion, Exception, HostObject, Value};

/// Configuration for one environment
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Fabricate placeholder elements for missing id/tag lookups
    pub fabricate_missing: bool,
    /// Interception and access logging
    pub intercept: InterceptConfig,
    /// Stack frame rules (None = defaults for the script's label)
    pub stack_rules: Option<StackRules>,
    /// Virtual milliseconds advanced per polling tick
    pub tick_ms: u64,
    /// Wall-clock sleep between polling ticks
    pub poll_interval: Duration,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            fabricate_missing: false,
            intercept: InterceptConfig::default(),
            stack_rules: None,
            tick_ms: 100,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl EnvConfig {
    /// Strict lookups (missing elements resolve to the sentinel)
    pub fn strict() -> Self {
        Self::default()
    }

    /// Missing elements are fabricated instead of resolving to the sentinel
    pub fn permissive() -> Self {
        Self {
            fabricate_missing: true,
            ..Default::default()
        }
    }

    /// No access log; reads and writes are still forwarded
    pub fn quiet() -> Self {
        Self {
            intercept: InterceptConfig {
                log_access: false,
                log_capacity: 0,
                ..InterceptConfig::default()
            },
            ..Default::default()
        }
    }
}
