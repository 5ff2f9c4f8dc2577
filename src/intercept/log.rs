//! Access log side channel
//!
//! Recording is observation only: it renders values with
//! [`Value::describe`], which never calls back into guest code.

use std::cell::RefCell;

use serde::Serialize;

use crate::error::Result;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
    Delete,
}

impl AccessKind {
    fn tag(self) -> &'static str {
        match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
            AccessKind::Delete => "delete",
        }
    }
}

/// One observed access through a wrapper
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessEvent {
    pub kind: AccessKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Bounded in-memory access recorder
#[derive(Debug)]
pub struct AccessLog {
    events: RefCell<Vec<AccessEvent>>,
    capacity: usize,
    max_value_len: usize,
}

impl AccessLog {
    pub fn new(capacity: usize, max_value_len: usize) -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            capacity,
            max_value_len,
        }
    }

    /// Record an access; past capacity, new events are dropped
    pub fn record(&self, kind: AccessKind, path: &str, value: Option<&Value>) {
        let value = value.map(|v| truncate(&v.describe(), self.max_value_len));
        tracing::trace!(
            target: "mirage::access",
            "[{}] {}{}",
            kind.tag(),
            path,
            value.as_deref().map(|v| format!(" = {}", v)).unwrap_or_default()
        );
        if self.capacity == 0 {
            return;
        }
        let mut events = self.events.borrow_mut();
        if events.len() < self.capacity {
            events.push(AccessEvent {
                kind,
                path: path.to_string(),
                value,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Snapshot without clearing
    pub fn events(&self) -> Vec<AccessEvent> {
        self.events.borrow().clone()
    }

    /// Take all recorded events
    pub fn drain(&self) -> Vec<AccessEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Serialize the recorded events as a JSON array
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&*self.events.borrow())?)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
