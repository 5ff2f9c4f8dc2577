//! Layout Estimator
//!
//! Plausible geometry for probing queries (`getBoundingClientRect`,
//! `offsetWidth`, ...). This is a flat approximation: explicit inline style
//! wins, tag classes supply defaults, and vertical position is the sibling
//! index times a fixed line height. Nothing cascades and nothing renders.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::dom::{NodeKind, SyntheticNode};
use crate::value::{PlainObject, Value};

/// Tags that fill the whole viewport
const ROOT_TAGS: &[&str] = &["HTML", "BODY"];

/// Tags that fill the viewport width at one line of height
const BLOCK_TAGS: &[&str] = &[
    "DIV", "P", "FORM", "SECTION", "ARTICLE", "HEADER", "FOOTER", "NAV", "MAIN", "ASIDE", "UL",
    "OL", "LI", "H1", "H2", "H3", "H4", "H5", "H6", "TABLE", "PRE", "BLOCKQUOTE", "FIELDSET",
];

/// An axis-aligned box in CSS pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LayoutBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl LayoutBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Script-facing `DOMRect`
    pub fn to_rect(&self) -> Value {
        let rect = PlainObject::with_props(
            "DOMRect",
            [
                ("x", Value::from(self.x)),
                ("y", Value::from(self.y)),
                ("width", Value::from(self.width)),
                ("height", Value::from(self.height)),
                ("top", Value::from(self.y)),
                ("left", Value::from(self.x)),
                ("right", Value::from(self.right())),
                ("bottom", Value::from(self.bottom())),
            ],
        );
        Value::from_host(Rc::new(rect))
    }
}

/// Geometry defaults
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutEstimator {
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub line_height: f64,
    /// Width of the box given to inline tags without an explicit width
    pub inline_width: f64,
}

impl Default for LayoutEstimator {
    fn default() -> Self {
        Self {
            viewport_width: 1280.0,
            viewport_height: 720.0,
            line_height: 18.0,
            inline_width: 64.0,
        }
    }
}

impl LayoutEstimator {
    pub fn with_viewport(width: u32, height: u32) -> Self {
        Self {
            viewport_width: f64::from(width),
            viewport_height: f64::from(height),
            ..Self::default()
        }
    }

    /// Estimate the box of `node`
    pub fn measure(&self, node: &SyntheticNode) -> LayoutBox {
        if node.kind() != NodeKind::Element || is_hidden(node) {
            return LayoutBox::default();
        }

        let tag = node.tag();
        let (default_width, default_height) = if ROOT_TAGS.contains(&tag) {
            (self.viewport_width, self.viewport_height)
        } else if BLOCK_TAGS.contains(&tag) {
            (self.viewport_width, self.line_height)
        } else {
            (self.inline_width, self.line_height)
        };
        let width = style_px(node, "width").unwrap_or(default_width);
        let height = style_px(node, "height").unwrap_or(default_height);

        let x = style_px(node, "left").unwrap_or(0.0);
        let y = style_px(node, "top").unwrap_or(0.0) + sibling_index(node) as f64 * self.line_height;
        LayoutBox::new(x, y, width, height)
    }
}

fn is_hidden(node: &SyntheticNode) -> bool {
    node.style_value("display").as_deref() == Some("none")
        || node.style_value("visibility").as_deref() == Some("hidden")
}

fn style_px(node: &SyntheticNode, property: &str) -> Option<f64> {
    parse_px(&node.style_value(property)?)
}

/// `"500px"` and `"500"` parse; keywords and relative units do not
pub fn parse_px(text: &str) -> Option<f64> {
    let text = text.trim();
    let number = text.strip_suffix("px").unwrap_or(text).trim();
    number.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Position among the parent's element children
fn sibling_index(node: &SyntheticNode) -> usize {
    let Some(parent) = node.parent() else {
        return 0;
    };
    parent
        .children()
        .iter()
        .filter(|c| c.is_element())
        .position(|c| c.uid() == node.uid())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{LookupPolicy, NodeGraph};

    #[test]
    fn test_parse_px() {
        assert_eq!(parse_px("500px"), Some(500.0));
        assert_eq!(parse_px(" 12.5 "), Some(12.5));
        assert_eq!(parse_px("-4px"), Some(-4.0));
        assert_eq!(parse_px("auto"), None);
        assert_eq!(parse_px("50%"), None);
        assert_eq!(parse_px("inf"), None);
    }

    #[test]
    fn test_box_edges() {
        let b = LayoutBox::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(b.right(), 40.0);
        assert_eq!(b.bottom(), 60.0);
        assert!(!b.is_empty());
        assert!(LayoutBox::default().is_empty());
    }

    fn graph() -> (NodeGraph, LayoutEstimator) {
        let layout = LayoutEstimator::with_viewport(1024, 600);
        (NodeGraph::new(LookupPolicy::Strict, layout), layout)
    }

    #[test]
    fn test_tag_class_defaults() {
        let (graph, layout) = graph();
        for tag in ["html", "body"] {
            let b = layout.measure(&graph.create_element(tag));
            assert_eq!((b.width, b.height), (1024.0, 600.0), "{}", tag);
        }
        let div = layout.measure(&graph.create_element("div"));
        assert_eq!((div.width, div.height), (1024.0, layout.line_height));
        let span = layout.measure(&graph.create_element("span"));
        assert_eq!((span.width, span.height), (layout.inline_width, layout.line_height));
    }

    #[test]
    fn test_explicit_size_wins() {
        let (graph, layout) = graph();
        let node = graph.create_element("div");
        node.set_style("width", "500px");
        node.set_style("height", "300px");
        assert_eq!(layout.measure(&node), LayoutBox::new(0.0, 0.0, 500.0, 300.0));
    }

    #[test]
    fn test_siblings_stack_by_line_height() {
        let (graph, layout) = graph();
        let parent = graph.create_element("div");
        let first = graph.create_element("div");
        let second = graph.create_element("div");
        graph.append(&parent, &first.to_value());
        // Text nodes do not count as siblings
        graph.append(&parent, &graph.create_text("gap").to_value());
        graph.append(&parent, &second.to_value());

        assert_eq!(layout.measure(&first).y, 0.0);
        assert_eq!(layout.measure(&second).y, layout.line_height);

        second.set_style("top", "10px");
        second.set_style("left", "7px");
        let b = layout.measure(&second);
        assert_eq!((b.x, b.y), (7.0, 10.0 + layout.line_height));
    }

    #[test]
    fn test_hidden_nodes_measure_zero() {
        let (graph, layout) = graph();
        for (property, value) in [("display", "none"), ("visibility", "hidden")] {
            let node = graph.create_element("div");
            node.set_style("width", "500px");
            node.set_style(property, value);
            assert_eq!(layout.measure(&node), LayoutBox::default(), "{}", property);
        }
        let text = graph.create_text("hello");
        assert!(layout.measure(&text).is_empty());
    }

    #[test]
    fn test_rect_value() {
        let rect = LayoutBox::new(1.0, 2.0, 3.0, 4.0).to_rect();
        assert!(rect.get("right").unwrap().strict_eq(&Value::from(4.0)));
        assert!(rect.get("top").unwrap().strict_eq(&Value::from(2.0)));
    }
}
