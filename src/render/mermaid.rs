use std::collections::HashMap;
use std::fmt::Write;

use super::{element_label, escape_label, RenderOptions};
use crate::graph::ContextPath;
use crate::model::node::{AssembledGraph, GraphNode, NodeMarker};
use crate::model::relationship::RelatedElementSummary;

const CLASS_DEFS: &str = concat!(
    "    classDef partial stroke:#d33,stroke-dasharray:4 2\n",
    "    classDef frontier stroke:#d90,stroke-width:2px\n",
    "    classDef stub fill:#eee,stroke-dasharray:2 2\n",
);

/// Flowchart state; expanded nodes are numbered `n0..` in pre-order.
struct Flowchart<'a> {
    options: &'a RenderOptions,
    first_expanded: HashMap<&'a str, String>,
    next_expanded: usize,
    orphans: usize,
    declarations: Vec<String>,
    edges: Vec<String>,
    classes: Vec<String>,
}

impl<'a> Flowchart<'a> {
    fn new(graph: &'a AssembledGraph, options: &'a RenderOptions) -> Self {
        // Shared stubs may point forward in pre-order, so number everything first.
        let mut first_expanded = HashMap::new();
        for (i, node) in graph.root.iter().filter(|n| !n.is_stub()).enumerate() {
            first_expanded.entry(node.guid()).or_insert_with(|| format!("n{}", i));
        }
        Self {
            options,
            first_expanded,
            next_expanded: 0,
            orphans: 0,
            declarations: Vec::new(),
            edges: Vec::new(),
            classes: Vec::new(),
        }
    }

    fn take_id(&mut self) -> String {
        let id = format!("n{}", self.next_expanded);
        self.next_expanded += 1;
        id
    }

    fn declare(&mut self, id: &str, node: &GraphNode) {
        let text = node_text(&node.element, self.options);
        if node.is_stub() {
            self.declarations.push(format!("    {}([\"{}\"])", id, text));
            self.classes.push(format!("    class {} stub", id));
        } else {
            self.declarations.push(format!("    {}[\"{}\"]", id, text));
        }
        if node.status.partial {
            self.classes.push(format!("    class {} partial", id));
        }
        if node.status.depth_exceeded {
            self.classes.push(format!("    class {} frontier", id));
        }
    }

    /// Already-rendered node a stub points back to.
    fn stub_target(&self, node: &GraphNode, ancestors: &[(&str, String)]) -> Option<String> {
        match node.status.marker {
            NodeMarker::VisitedStub => ancestors
                .iter()
                .rev()
                .find(|(guid, _)| *guid == node.guid())
                .map(|(_, id)| id.clone()),
            NodeMarker::SharedStub => self.first_expanded.get(node.guid()).cloned(),
            NodeMarker::Expanded => None,
        }
    }

    fn visit(&mut self, node: &'a GraphNode, id: String, ancestors: &mut Vec<(&'a str, String)>) {
        self.declare(&id, node);
        ancestors.push((node.guid(), id.clone()));

        for (group, child) in node.edges() {
            let label = edge_label(group, child);
            if child.is_stub() {
                let target = match self.stub_target(child, ancestors) {
                    Some(target) => target,
                    None => {
                        let orphan = format!("s{}", self.orphans);
                        self.orphans += 1;
                        self.declare(&orphan, child);
                        orphan
                    }
                };
                self.edges.push(format!("    {} -.->|\"{}\"| {}", id, label, target));
                continue;
            }
            let child_id = self.take_id();
            let arrow = if group.is_some() { "==>" } else { "-->" };
            self.edges.push(format!("    {} {}|\"{}\"| {}", id, arrow, label, child_id));
            self.visit(child, child_id, ancestors);
        }
        ancestors.pop();
    }
}

fn node_text(element: &RelatedElementSummary, options: &RenderOptions) -> String {
    let mut label = element_label(element);
    if options.show_guids {
        label.push('\n');
        label.push_str(element.guid());
    }
    escape_label(&label)
}

fn edge_label(group: Option<&str>, child: &GraphNode) -> String {
    let type_name = child
        .element
        .relationship_context
        .as_ref()
        .map(|c| c.type_name())
        .unwrap_or("related");
    match group {
        Some(name) => escape_label(&format!("{}: {}", name, type_name)),
        None => escape_label(type_name),
    }
}

pub(super) fn flowchart(graph: &AssembledGraph, options: &RenderOptions) -> String {
    let mut chart = Flowchart::new(graph, options);
    let root_id = chart.take_id();
    chart.visit(&graph.root, root_id, &mut Vec::new());

    let mut out = String::new();
    let _ = writeln!(out, "flowchart {}", options.direction);
    for line in chart.declarations.iter().chain(&chart.edges).chain(&chart.classes) {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(CLASS_DEFS);
    out
}

pub(super) fn context_chain(path: &ContextPath, options: &RenderOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "flowchart {}", options.direction);

    let elements: Vec<&RelatedElementSummary> = std::iter::once(&path.leaf).chain(path.ancestors.iter()).collect();
    for (i, element) in elements.iter().enumerate() {
        let _ = writeln!(out, "    n{}[\"{}\"]", i, node_text(element, options));
    }

    for (i, ancestor) in path.ancestors.iter().enumerate() {
        let (inner, outer) = (i, i + 1);
        let Some(ctx) = ancestor.relationship_context.as_ref() else {
            continue;
        };
        let label = escape_label(ctx.type_name());
        if ctx.related_is_source() {
            let _ = writeln!(out, "    n{} -->|\"{}\"| n{}", outer, label, inner);
        } else {
            let _ = writeln!(out, "    n{} -->|\"{}\"| n{}", inner, label, outer);
        }
    }

    let top = elements.len() - 1;
    if path.depth_exceeded {
        let _ = writeln!(out, "    class n{} frontier", top);
    }
    if path.partial {
        let _ = writeln!(out, "    class n{} partial", top);
    }
    if path.cycle_detected {
        let _ = writeln!(out, "    %% path cycles back above n{}", top);
    }
    out.push_str(CLASS_DEFS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_context_path, AssemblyRequest, ExpansionPolicy, GraphAssembler, RelationshipGroup};
    use crate::render::{DiagramRenderer, Direction};
    use crate::repository::InMemoryRepository;
    use serde_json::json;
    use std::sync::Arc;

    fn diamond() -> InMemoryRepository {
        InMemoryRepository::new()
            .with_element("c1", "Collection", json!({"displayName": "Root \"A\""}))
            .with_element("c2", "Collection", json!({"displayName": "C2"}))
            .with_element("m1", "Asset", json!({"displayName": "M1"}))
            .with_element("m2", "Asset", json!({"displayName": "M2"}))
            .with_relationship("r1", "CollectionMembership", "c1", "m1")
            .with_relationship("r2", "CollectionMembership", "c1", "m2")
            .with_relationship("r3", "CollectionMembership", "c1", "c2")
            .with_relationship("r4", "CollectionMembership", "c2", "m2")
    }

    async fn assemble(repo: InMemoryRepository, policy: ExpansionPolicy, depth: usize) -> AssembledGraph {
        let request = AssemblyRequest::new(
            "c1",
            vec![RelationshipGroup::new("children", &["CollectionMembership"])],
            depth,
            policy,
        );
        GraphAssembler::new(Arc::new(repo)).assemble(&request).await.unwrap()
    }

    #[tokio::test]
    async fn test_diamond_flowchart() {
        let graph = assemble(diamond(), ExpansionPolicy::DagWithSharing, 3).await;
        let text = flowchart(&graph, &RenderOptions::default());
        let expected = [
            "flowchart TD",
            "    n0[\"Root #quot;A#quot;\"]",
            "    n1[\"M1\"]",
            "    n2[\"C2\"]",
            "    n3[\"M2\"]",
            "    n0 -->|\"CollectionMembership\"| n1",
            "    n0 -.->|\"CollectionMembership\"| n3",
            "    n0 -->|\"CollectionMembership\"| n2",
            "    n2 -->|\"CollectionMembership\"| n3",
            "",
        ]
        .join("\n");
        assert!(text.starts_with(&expected), "{}", text);
        assert_eq!(text.matches("n3[").count(), 1);
    }

    #[tokio::test]
    async fn test_cycle_points_at_ancestor() {
        let repo = InMemoryRepository::new()
            .with_element("c1", "Collection", json!({}))
            .with_element("c2", "Collection", json!({}))
            .with_relationship("r1", "CollectionMembership", "c1", "c2")
            .with_relationship("r2", "CollectionMembership", "c2", "c1");
        let graph = assemble(repo, ExpansionPolicy::StrictTree, 5).await;
        let text = flowchart(&graph, &RenderOptions::default());
        assert!(text.contains("    n1 -.->|\"CollectionMembership\"| n0\n"), "{}", text);
        assert!(!text.contains("s0"));
    }

    #[tokio::test]
    async fn test_frontier_and_partial_classes() {
        let repo = diamond().with_failure("m1", crate::repository::FailureMode::Transient("x".into()));
        let graph = assemble(repo, ExpansionPolicy::StrictTree, 2).await;
        let text = flowchart(&graph, &RenderOptions { direction: Direction::LR, show_guids: true });
        assert!(text.starts_with("flowchart LR\n    n0[\"Root #quot;A#quot;<br/>c1\"]\n"));
        assert!(text.contains("    class n1 partial\n"));
        assert!(!text.lines().any(|l| l.starts_with("    class ") && l.ends_with(" frontier")));
        assert!(text.contains("classDef frontier"));
    }

    #[tokio::test]
    async fn test_render_is_deterministic() {
        let a = DiagramRenderer::default().render(&assemble(diamond(), ExpansionPolicy::DagWithSharing, 3).await);
        let b = DiagramRenderer::default().render(&assemble(diamond(), ExpansionPolicy::DagWithSharing, 3).await);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unrecognized_label() {
        let repo = InMemoryRepository::new()
            .with_element("c1", "Collection", json!({"displayName": "Root"}))
            .with_element("q1", "QuantumLedger", json!({"qualifiedName": "ledger::main"}))
            .with_relationship("r1", "CollectionMembership", "c1", "q1");
        let graph = assemble(repo, ExpansionPolicy::StrictTree, 1).await;
        let text = flowchart(&graph, &RenderOptions::default());
        assert!(text.contains("n1[\"ledger::main (QuantumLedger)\"]"), "{}", text);
    }

    #[tokio::test]
    async fn test_context_chain() {
        let repo = diamond();
        let assembler = GraphAssembler::new(Arc::new(repo));
        let path = build_context_path(&assembler, "m2", &["CollectionMembership".to_string()], 3)
            .await
            .unwrap();
        let text = context_chain(&path, &RenderOptions::default());
        assert!(text.starts_with("flowchart TD\n    n0[\"M2\"]\n    n1[\"Root #quot;A#quot;\"]\n"));
        assert!(text.contains("    n1 -->|\"CollectionMembership\"| n0\n"));
    }
}
