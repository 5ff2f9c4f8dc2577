//! Minimal CSS selector support for `querySelector(All)`
//!
//! Compound steps (`tag`, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`)
//! joined by descendant or child (`>`) combinators, in comma-separated
//! groups. Anything else is reported as unsupported and matches nothing.

use super::node::SyntheticNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrCondition {
    Exists(String),
    Equals(String, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Step {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Part {
    step: Step,
    /// How this part relates to the previous one
    combinator: Option<Combinator>,
}

/// A parsed selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    groups: Vec<Vec<Part>>,
}

impl Selector {
    /// Parse `text`, returning `None` for unsupported syntax
    pub fn parse(text: &str) -> Option<Self> {
        let groups = text
            .split(',')
            .map(parse_chain)
            .collect::<Option<Vec<_>>>()?;
        if groups.is_empty() {
            return None;
        }
        Some(Self { groups })
    }

    /// The id a bare `#id` selector names, if that is all it is
    pub fn bare_id(&self) -> Option<&str> {
        match self.groups.as_slice() {
            [chain] => match chain.as_slice() {
                [Part { step, .. }]
                    if step.tag.is_none() && step.classes.is_empty() && step.attrs.is_empty() =>
                {
                    step.id.as_deref()
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn matches(&self, node: &SyntheticNode) -> bool {
        self.groups.iter().any(|chain| matches_chain(node, chain))
    }
}

fn parse_chain(text: &str) -> Option<Vec<Part>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let spaced = text.replace('>', " > ");
    let mut parts = Vec::new();
    let mut pending = None;
    for token in spaced.split_whitespace() {
        if token == ">" {
            if parts.is_empty() || pending.is_some() {
                return None;
            }
            pending = Some(Combinator::Child);
            continue;
        }
        let combinator = if parts.is_empty() {
            None
        } else {
            Some(pending.take().unwrap_or(Combinator::Descendant))
        };
        parts.push(Part {
            step: parse_step(token)?,
            combinator,
        });
    }
    if parts.is_empty() || pending.is_some() {
        return None;
    }
    Some(parts)
}

fn parse_step(token: &str) -> Option<Step> {
    let mut step = Step::default();
    let mut rest = token;

    let name_len = rest
        .find(|c: char| matches!(c, '#' | '.' | '['))
        .unwrap_or(rest.len());
    let (name, tail) = rest.split_at(name_len);
    match name {
        "" | "*" => {}
        name if is_ident(name) => step.tag = Some(name.to_ascii_uppercase()),
        _ => return None,
    }
    rest = tail;

    while let Some(marker) = rest.chars().next() {
        rest = &rest[1..];
        match marker {
            '#' | '.' => {
                let end = rest
                    .find(|c: char| matches!(c, '#' | '.' | '['))
                    .unwrap_or(rest.len());
                let (ident, tail) = rest.split_at(end);
                if !is_ident(ident) {
                    return None;
                }
                if marker == '#' {
                    step.id = Some(ident.to_string());
                } else {
                    step.classes.push(ident.to_string());
                }
                rest = tail;
            }
            '[' => {
                let end = rest.find(']')?;
                step.attrs.push(parse_attr(&rest[..end])?);
                rest = &rest[end + 1..];
            }
            _ => return None,
        }
    }
    Some(step)
}

fn parse_attr(body: &str) -> Option<AttrCondition> {
    match body.split_once('=') {
        None if is_ident(body.trim()) => Some(AttrCondition::Exists(body.trim().to_string())),
        None => None,
        Some((key, value)) => {
            let key = key.trim();
            if !is_ident(key) {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some(AttrCondition::Equals(key.to_string(), value.to_string()))
        }
    }
}

fn is_ident(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn matches_chain(node: &SyntheticNode, chain: &[Part]) -> bool {
    let Some((last, earlier)) = chain.split_last() else {
        return false;
    };
    if !matches_step(node, &last.step) {
        return false;
    }
    let mut current = node.parent();
    let mut combinator = last.combinator;
    for part in earlier.iter().rev() {
        let found = match combinator {
            Some(Combinator::Child) => current.filter(|p| matches_step(p, &part.step)),
            _ => {
                let mut cursor = current;
                loop {
                    match cursor {
                        Some(p) if matches_step(&p, &part.step) => break Some(p),
                        Some(p) => cursor = p.parent(),
                        None => break None,
                    }
                }
            }
        };
        let Some(found) = found else {
            return false;
        };
        current = found.parent();
        combinator = part.combinator;
    }
    true
}

fn matches_step(node: &SyntheticNode, step: &Step) -> bool {
    if !node.is_element() {
        return false;
    }
    if step.tag.as_deref().is_some_and(|tag| tag != node.tag()) {
        return false;
    }
    if step.id.as_deref().is_some_and(|id| node.id() != id) {
        return false;
    }
    if !step.classes.iter().all(|c| node.has_class(c)) {
        return false;
    }
    step.attrs.iter().all(|cond| match cond {
        AttrCondition::Exists(key) => node.attribute(key).is_some(),
        AttrCondition::Equals(key, value) => node.attribute(key).as_deref() == Some(value),
    })
}
