//! Stack trace rewriting
//!
//! Exceptions surfaced to the guest must not expose frames from this crate
//! or the orchestrator. Frames are classified by file name against ordered
//! substring rules, compiled once with Aho-Corasick. Classification is a
//! heuristic and best-effort only.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{CallSite, Exception};

/// What happens to a frame whose file name matches a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAction {
    /// Hide the frame
    Drop,
    /// Present the frame under the public script URL
    Rewrite,
    /// Show the frame as is
    Keep,
}

/// A file-name matching rule. Earlier rules win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRule {
    pub pattern: String,
    pub action: FrameAction,
    /// Match only at the start of the file name
    #[serde(default)]
    pub prefix: bool,
}

impl FrameRule {
    pub fn contains(pattern: impl Into<String>, action: FrameAction) -> Self {
        Self {
            pattern: pattern.into(),
            action,
            prefix: false,
        }
    }

    pub fn starts_with(pattern: impl Into<String>, action: FrameAction) -> Self {
        Self {
            pattern: pattern.into(),
            action,
            prefix: true,
        }
    }
}

/// Ordered rule set plus the action for frames no rule matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRules {
    pub rules: Vec<FrameRule>,
    #[serde(default = "default_fallback")]
    pub fallback: FrameAction,
}

fn default_fallback() -> FrameAction {
    FrameAction::Drop
}

/// Runtime and orchestrator locations that never reach the guest
const INTERNAL_PREFIXES: &[&str] = &["node:", "/rustc/"];
const INTERNAL_SUBSTRINGS: &[&str] = &[
    "internal/",
    ".cargo/registry",
    "node_modules",
    "src/",
    ".rs",
    "bridge.js",
    "vm.js",
];

impl StackRules {
    /// Default rules for a target script: its frames are rewritten, runtime
    /// internals are dropped, remote and eval'd sources are kept, anything
    /// else is dropped.
    pub fn for_target(script_label: &str) -> Self {
        let mut rules = vec![FrameRule::contains(script_label, FrameAction::Rewrite)];
        rules.extend(
            INTERNAL_PREFIXES
                .iter()
                .map(|p| FrameRule::starts_with(*p, FrameAction::Drop)),
        );
        rules.extend(
            INTERNAL_SUBSTRINGS
                .iter()
                .map(|p| FrameRule::contains(*p, FrameAction::Drop)),
        );
        rules.push(FrameRule::starts_with("http", FrameAction::Keep));
        rules.push(FrameRule::starts_with("eval", FrameAction::Keep));
        Self {
            rules,
            fallback: FrameAction::Drop,
        }
    }
}

/// Formats exception stacks the way a browser would present them
pub struct StackRewriter {
    public_url: String,
    rules: StackRules,
    matcher: AhoCorasick,
}

impl StackRewriter {
    /// Rewriter with the default rules for `script_label`
    pub fn new(script_label: &str, public_url: impl Into<String>) -> Result<Self> {
        Self::with_rules(public_url, StackRules::for_target(script_label))
    }

    pub fn with_rules(public_url: impl Into<String>, rules: StackRules) -> Result<Self> {
        let patterns: Vec<&str> = rules.rules.iter().map(|r| r.pattern.as_str()).collect();
        let matcher = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&patterns)
            .map_err(|e| Error::Config(format!("invalid frame rules: {}", e)))?;
        Ok(Self {
            public_url: public_url.into(),
            rules,
            matcher,
        })
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Classify a frame by its originating file name
    pub fn classify(&self, file: &str) -> FrameAction {
        if file.is_empty() {
            return FrameAction::Drop;
        }
        self.matcher
            .find_overlapping_iter(file)
            .filter(|m| !self.rules.rules[m.pattern().as_usize()].prefix || m.start() == 0)
            .map(|m| m.pattern().as_usize())
            .min()
            .map(|idx| self.rules.rules[idx].action)
            .unwrap_or(self.rules.fallback)
    }

    /// Render `exception` with hidden frames removed and target frames
    /// mapped onto the public URL
    pub fn format(&self, exception: &Exception) -> String {
        let mut stack = format!("{}: {}", exception.name, exception.message);
        for site in &exception.frames {
            let file = match self.classify(&site.file) {
                FrameAction::Drop => continue,
                FrameAction::Rewrite => self.public_url.as_str(),
                FrameAction::Keep => site.file.as_str(),
            };
            stack.push('\n');
            stack.push_str(&render_frame(site, file));
        }
        stack
    }
}

fn render_frame(site: &CallSite, file: &str) -> String {
    let line = site.line.max(1);
    let column = site.column.max(1);
    let location = format!("{}:{}:{}", file, line, column);
    match (&site.function, &site.type_name, &site.method) {
        (Some(function), _, _) => format!("    at {} ({})", function, location),
        (None, Some(type_name), Some(method)) => {
            format!("    at {}.{} ({})", type_name, method, location)
        }
        _ => format!("    at {}", location),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://challenges.example.com/turnstile/v0/api.js";

    fn rewriter() -> StackRewriter {
        StackRewriter::new("target.js", URL).unwrap()
    }

    #[test]
    fn test_classification() {
        let r = rewriter();
        assert_eq!(r.classify("/work/target.js"), FrameAction::Rewrite);
        assert_eq!(r.classify("src/dom/tree.rs"), FrameAction::Drop);
        assert_eq!(r.classify("node:internal/vm"), FrameAction::Drop);
        assert_eq!(r.classify("https://cdn.example.com/a.js"), FrameAction::Keep);
        assert_eq!(r.classify("eval at <anonymous>"), FrameAction::Keep);
        assert_eq!(r.classify("/opt/helper.js"), FrameAction::Drop);
        assert_eq!(r.classify(""), FrameAction::Drop);
    }

    #[test]
    fn test_prefix_rules_only_match_at_start() {
        let r = rewriter();
        // "http" appears, but not at the start
        assert_eq!(r.classify("/cache/http-mirror/lib.js"), FrameAction::Drop);
    }

    #[test]
    fn test_format_rewrites_and_drops() {
        let exc = Exception::error("boom")
            .with_frame(CallSite::new("target.js", 10, 5).with_function("solve"))
            .with_frame(CallSite::new("https://cdn.example.com/a.js", 1, 2))
            .with_frame(CallSite::new("orchestrator.js", 4, 4));
        let stack = rewriter().format(&exc);
        let lines: Vec<_> = stack.lines().collect();
        assert_eq!(lines[0], "Error: boom");
        assert_eq!(lines[1], format!("    at solve ({}:10:5)", URL));
        assert_eq!(lines[2], "    at https://cdn.example.com/a.js:1:2");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_rules_roundtrip_through_json() {
        let json = r#"{"rules":[{"pattern":"bundle.js","action":"rewrite"},{"pattern":"cdn","action":"keep"}]}"#;
        let rules: StackRules = serde_json::from_str(json).unwrap();
        assert_eq!(rules.fallback, FrameAction::Drop);
        let r = StackRewriter::with_rules(URL, rules).unwrap();
        assert_eq!(r.classify("/tmp/bundle.js"), FrameAction::Rewrite);
        assert_eq!(r.classify("https://cdn/x.js"), FrameAction::Keep);
    }

    #[test]
    fn test_method_frames() {
        let exc = Exception::error("x")
            .with_frame(CallSite::new("target.js", 0, 0).with_method("Solver", "run"));
        let stack = rewriter().format(&exc);
        assert!(stack.ends_with(&format!("    at Solver.run ({}:1:1)", URL)));
    }
}
