use std::fmt::Write;

use super::element_label;
use crate::model::node::{AssembledGraph, Completeness, GraphNode, NodeMarker};

/// Indented plain-text outline, one element per line.
pub fn render_outline(graph: &AssembledGraph) -> String {
    let mut out = String::new();
    write_node(&graph.root, None, 0, &mut out);
    match graph.completeness {
        Completeness::Complete => {}
        Completeness::Partial { failed_branches } => {
            let _ = writeln!(out, "(partial: {} failed branches)", failed_branches);
        }
        Completeness::Cancelled {
            completed_levels,
            failed_branches,
        } => {
            let _ = writeln!(
                out,
                "(cancelled after {} levels, {} failed branches)",
                completed_levels, failed_branches
            );
        }
    }
    out
}

fn write_node(node: &GraphNode, group: Option<&str>, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let bullet = if depth == 0 { "" } else { "- " };
    let _ = write!(out, "{}{}", indent, bullet);
    if let Some(name) = group {
        let _ = write!(out, "{}: ", name);
    }
    let _ = write!(
        out,
        "{} [{}] {}",
        element_label(&node.element),
        node.element.properties.kind(),
        node.guid()
    );
    if let Some(ctx) = &node.element.relationship_context {
        let _ = write!(out, " via {}", ctx.type_name());
    }
    match node.status.marker {
        NodeMarker::VisitedStub => out.push_str(" (cycle)"),
        NodeMarker::SharedStub => out.push_str(" (see above)"),
        NodeMarker::Expanded => {}
    }
    if node.status.partial {
        out.push_str(" (partial)");
    }
    if node.status.depth_exceeded {
        out.push_str(" (more)");
    }
    out.push('\n');

    for issue in &node.status.issues {
        let _ = writeln!(out, "{}    ! {}", indent, issue.message);
    }
    for (group, child) in node.edges() {
        write_node(child, group, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AssemblyRequest, ExpansionPolicy, GraphAssembler, RelationshipGroup};
    use crate::repository::{FailureMode, InMemoryRepository};
    use serde_json::json;
    use std::sync::Arc;

    fn request(depth: usize) -> AssemblyRequest {
        AssemblyRequest::new(
            "c1",
            vec![
                RelationshipGroup::new("children", &["CollectionMembership"]),
                RelationshipGroup::new("links", &["ResourceList"]),
            ],
            depth,
            ExpansionPolicy::DagWithSharing,
        )
    }

    fn repo() -> InMemoryRepository {
        InMemoryRepository::new()
            .with_element("c1", "Collection", json!({"displayName": "Root"}))
            .with_element("m1", "Asset", json!({"displayName": "Orders"}))
            .with_relationship("r1", "CollectionMembership", "c1", "m1")
            .with_relationship("r2", "ResourceList", "c1", "m1")
    }

    #[tokio::test]
    async fn test_outline() {
        let graph = GraphAssembler::new(Arc::new(repo()))
            .assemble(&request(2))
            .await
            .unwrap();
        let expected = [
            "Root [collection] c1",
            "  - Orders [asset] m1 via CollectionMembership",
            "  - links: Orders [asset] m1 via ResourceList (see above)",
            "",
        ]
        .join("\n");
        assert_eq!(render_outline(&graph), expected);
    }

    #[tokio::test]
    async fn test_outline_marks_failed_branch() {
        let repo = repo().with_failure("m1", FailureMode::Transient("store offline".into()));
        let graph = GraphAssembler::new(Arc::new(repo))
            .assemble(&request(2))
            .await
            .unwrap();
        let text = render_outline(&graph);
        assert!(text.contains("m1 via CollectionMembership (partial)\n"), "{}", text);
        assert!(text.contains("    ! "), "{}", text);
        assert!(text.ends_with("(partial: 1 failed branches)\n"), "{}", text);
    }
}
