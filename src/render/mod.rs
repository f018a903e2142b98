//! Text renderings of assembled structures.
//!
//! Everything here is a pure function of its input: identical structures give
//! byte-identical text and therefore identical digests.

mod gantt;
mod mermaid;
mod outline;

pub use outline::render_outline;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{MetaviewError, Result};
use crate::graph::{ContextPath, ProjectTimeline};
use crate::model::node::AssembledGraph;
use crate::model::relationship::RelatedElementSummary;

/// Mermaid flow direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    TD,
    LR,
    BT,
    RL,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::TD => "TD",
            Direction::LR => "LR",
            Direction::BT => "BT",
            Direction::RL => "RL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MetaviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TD" | "TB" => Ok(Direction::TD),
            "LR" => Ok(Direction::LR),
            "BT" => Ok(Direction::BT),
            "RL" => Ok(Direction::RL),
            other => Err(MetaviewError::InvalidInput(format!("unknown direction: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub direction: Direction,
    /// Add the element guid under each label
    pub show_guids: bool,
}

/// Rendered source text and the hex SHA-256 of that text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramSource {
    pub text: String,
    pub digest: String,
}

impl DiagramSource {
    pub fn new(text: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self { text, digest }
    }
}

impl fmt::Display for DiagramSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiagramRenderer {
    options: RenderOptions,
}

impl DiagramRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    /// Mermaid flowchart of an assembled graph.
    pub fn render(&self, graph: &AssembledGraph) -> DiagramSource {
        DiagramSource::new(mermaid::flowchart(graph, &self.options))
    }

    /// Mermaid chain from a leaf to its outermost container.
    pub fn render_context_path(&self, path: &ContextPath) -> DiagramSource {
        DiagramSource::new(mermaid::context_chain(path, &self.options))
    }

    pub fn render_gantt(&self, timeline: &ProjectTimeline) -> DiagramSource {
        DiagramSource::new(gantt::gantt(timeline))
    }
}

/// Flowchart with default options.
pub fn render(graph: &AssembledGraph) -> DiagramSource {
    DiagramRenderer::default().render(graph)
}

/// Escape text for a quoted Mermaid label.
pub fn escape_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("#quot;"),
            '<' => out.push_str("#lt;"),
            '>' => out.push_str("#gt;"),
            '#' => out.push_str("#35;"),
            '\r' => {}
            '\n' => out.push_str("<br/>"),
            other => out.push(other),
        }
    }
    out
}

/// Human label of an element; unrecognized kinds keep their type name visible.
pub(crate) fn element_label(element: &RelatedElementSummary) -> String {
    match element.properties.unrecognized_type_name() {
        Some(type_name) => match element.properties.qualified_name() {
            Some(name) => format!("{} ({})", name, type_name),
            None => format!("unrecognized ({})", type_name),
        },
        None => element.label(),
    }
}
