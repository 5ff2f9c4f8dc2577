//! Guest-visible exceptions

use std::panic::Location;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::disguise::StackRewriter;

/// One frame of an exception's call stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

impl CallSite {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            function: None,
            type_name: None,
            method: None,
        }
    }

    /// The Rust source location of the caller
    #[track_caller]
    pub fn here() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line(), location.column())
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn with_method(mut self, type_name: impl Into<String>, method: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self.method = Some(method.into());
        self
    }
}

/// An exception thrown inside the synthetic environment.
///
/// Frames are ordered innermost first. Host throw sites record their own
/// source location, so unfiltered stacks point into this crate.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{name}: {message}")]
pub struct Exception {
    pub name: String,
    pub message: String,
    pub frames: Vec<CallSite>,
}

impl Exception {
    #[track_caller]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            frames: vec![CallSite::here()],
        }
    }

    #[track_caller]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    #[track_caller]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// A DOMException-style error, e.g. `InvalidCharacterError`
    #[track_caller]
    pub fn dom(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, message)
    }

    /// Append an outer frame
    pub fn with_frame(mut self, site: CallSite) -> Self {
        self.frames.push(site);
        self
    }

    /// Stack text as the guest sees it, filtered through `rewriter`
    pub fn stack(&self, rewriter: &StackRewriter) -> String {
        rewriter.format(self)
    }

    /// Stack text with every frame, before any rewriting. Host diagnostics only.
    pub(crate) fn raw_stack(&self) -> String {
        let mut stack = format!("{}: {}", self.name, self.message);
        for site in &self.frames {
            stack.push_str(&format!("\n    at {}:{}:{}", site.file, site.line, site.column));
        }
        stack
    }
}
