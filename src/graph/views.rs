//! Named shapes over the assembler: hierarchy, graph, context path.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::{AssemblyRequest, CancelSignal, ExpansionPolicy, GraphAssembler, RelationshipGroup};
use crate::error::{MetaviewError, Result};
use crate::model::node::{AssembledGraph, NodeIssue};
use crate::model::relationship::RelatedElementSummary;
use crate::repository::TraversalDirection;

/// Group name used for the primary edges of a hierarchy.
pub const CHILDREN: &str = "children";

/// A pure tree through one set of relationship types.
///
/// Related elements of a different kind than the root are left out.
pub async fn build_hierarchy(
    assembler: &GraphAssembler,
    root_guid: &str,
    relationship_types: &[String],
    max_depth: usize,
    policy: ExpansionPolicy,
) -> Result<AssembledGraph> {
    build_hierarchy_with_cancel(assembler, root_guid, relationship_types, max_depth, policy, &CancelSignal::none()).await
}

pub async fn build_hierarchy_with_cancel(
    assembler: &GraphAssembler,
    root_guid: &str,
    relationship_types: &[String],
    max_depth: usize,
    policy: ExpansionPolicy,
    cancel: &CancelSignal,
) -> Result<AssembledGraph> {
    let group = RelationshipGroup {
        name: CHILDREN.to_string(),
        relationship_types: relationship_types.to_vec(),
        direction: TraversalDirection::Outgoing,
        same_kind_only: true,
    };
    assembler
        .assemble_with_cancel(&AssemblyRequest::new(root_guid, vec![group], max_depth, policy), cancel)
        .await
}

/// A tree through the first group, decorated with the other groups as links.
pub async fn build_graph(
    assembler: &GraphAssembler,
    root_guid: &str,
    groups: Vec<RelationshipGroup>,
    max_depth: usize,
    policy: ExpansionPolicy,
) -> Result<AssembledGraph> {
    build_graph_with_cancel(assembler, root_guid, groups, max_depth, policy, &CancelSignal::none()).await
}

pub async fn build_graph_with_cancel(
    assembler: &GraphAssembler,
    root_guid: &str,
    groups: Vec<RelationshipGroup>,
    max_depth: usize,
    policy: ExpansionPolicy,
    cancel: &CancelSignal,
) -> Result<AssembledGraph> {
    assembler
        .assemble_with_cancel(&AssemblyRequest::new(root_guid, groups, max_depth, policy), cancel)
        .await
}

/// Containers of an element, nearest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPath {
    pub leaf: RelatedElementSummary,
    /// Each entry carries the relationship that links it to the previous element
    pub ancestors: Vec<RelatedElementSummary>,
    pub max_depth: usize,
    /// The last ancestor has a container of its own beyond the depth limit
    pub depth_exceeded: bool,
    /// The walk came back to an element already on the path
    pub cycle_detected: bool,
    /// 1-based levels where more than one container existed; the first was taken
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambiguous_levels: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<NodeIssue>,
    pub partial: bool,
}

impl ContextPath {
    /// Leaf followed by its ancestors.
    pub fn guids(&self) -> Vec<&str> {
        std::iter::once(self.leaf.guid())
            .chain(self.ancestors.iter().map(|a| a.guid()))
            .collect()
    }

    /// Outermost container reached, or the leaf when it has none.
    pub fn top(&self) -> &RelatedElementSummary {
        self.ancestors.last().unwrap_or(&self.leaf)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Walk from `leaf_guid` toward its containers; the leaf is end2 of container relationships.
pub async fn build_context_path(
    assembler: &GraphAssembler,
    leaf_guid: &str,
    container_types: &[String],
    max_depth: usize,
) -> Result<ContextPath> {
    let group = RelationshipGroup {
        name: "containers".to_string(),
        relationship_types: container_types.to_vec(),
        direction: TraversalDirection::Incoming,
        same_kind_only: false,
    };
    build_context_path_in(assembler, leaf_guid, &group, max_depth).await
}

/// Context path through an explicit group, for repositories that point the other way.
pub async fn build_context_path_in(
    assembler: &GraphAssembler,
    leaf_guid: &str,
    group: &RelationshipGroup,
    max_depth: usize,
) -> Result<ContextPath> {
    AssemblyRequest::new(leaf_guid, vec![group.clone()], max_depth, ExpansionPolicy::StrictTree)
        .validate(assembler.options())?;

    let leaf = assembler.fetch_summary(leaf_guid).await?;
    let mut path = ContextPath {
        leaf,
        ancestors: Vec::new(),
        max_depth,
        depth_exceeded: false,
        cycle_detected: false,
        ambiguous_levels: Vec::new(),
        issues: Vec::new(),
        partial: false,
    };
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(leaf_guid.to_string());
    let mut current = leaf_guid.to_string();
    let mut exhausted = true;

    for level in 1..=max_depth {
        let containers = match containers_of(assembler, &current, group, &mut path.issues).await {
            Ok(containers) => containers,
            Err(err) if level == 1 => return Err(err),
            Err(err) => {
                log::warn!("context path above {} stopped: {}", current, err);
                path.issues.push(NodeIssue::from_error(&err, None));
                path.partial = true;
                exhausted = false;
                break;
            }
        };

        let mut containers = containers.into_iter();
        let Some(chosen) = containers.next() else {
            exhausted = false;
            break;
        };
        if containers.next().is_some() {
            path.ambiguous_levels.push(level);
        }
        if !visited.insert(chosen.guid().to_string()) {
            log::debug!("context path of {} cycles back to {}", leaf_guid, chosen.guid());
            path.cycle_detected = true;
            exhausted = false;
            break;
        }
        current = chosen.guid().to_string();
        path.ancestors.push(chosen);
    }

    if exhausted {
        let mut ignored = Vec::new();
        match containers_of(assembler, &current, group, &mut ignored).await {
            Ok(more) => path.depth_exceeded = !more.is_empty(),
            Err(err) => log::warn!("container probe for {} failed: {}", current, err),
        }
    }

    Ok(path)
}

async fn containers_of(
    assembler: &GraphAssembler,
    guid: &str,
    group: &RelationshipGroup,
    issues: &mut Vec<NodeIssue>,
) -> Result<Vec<RelatedElementSummary>> {
    let fetch = assembler.timed(guid, assembler.fetch_group(guid, group)).await?;
    let mut out = Vec::new();
    for record in fetch.records {
        match RelatedElementSummary::related(guid, &record.relationship, record.element.as_ref(), assembler.registry()) {
            Ok(summary) => out.push(summary),
            Err(err) => {
                log::warn!("skipping container edge of {}: {}", guid, err);
                issues.push(NodeIssue::from_error(&err, record.relationship.guid.as_deref()));
            }
        }
    }
    Ok(out)
}

/// Ready-made view configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewPreset {
    /// Nested collections through CollectionMembership
    CollectionHierarchy,
    /// Collection members plus ResourceList links
    CollectionGraph,
    GovernanceDefinitions,
    SupplyChainSegments,
    ProjectHierarchy,
    /// Context path from a segment up to its supply chains
    SupplyChainMembership,
}

/// What a preset produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PresetView {
    Graph(AssembledGraph),
    ContextPath(ContextPath),
}

impl ViewPreset {
    pub const ALL: [ViewPreset; 6] = [
        ViewPreset::CollectionHierarchy,
        ViewPreset::CollectionGraph,
        ViewPreset::GovernanceDefinitions,
        ViewPreset::SupplyChainSegments,
        ViewPreset::ProjectHierarchy,
        ViewPreset::SupplyChainMembership,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewPreset::CollectionHierarchy => "collection-hierarchy",
            ViewPreset::CollectionGraph => "collection-graph",
            ViewPreset::GovernanceDefinitions => "governance-definitions",
            ViewPreset::SupplyChainSegments => "supply-chain-segments",
            ViewPreset::ProjectHierarchy => "project-hierarchy",
            ViewPreset::SupplyChainMembership => "supply-chain-membership",
        }
    }

    pub fn groups(&self) -> Vec<RelationshipGroup> {
        match self {
            ViewPreset::CollectionHierarchy => {
                vec![RelationshipGroup::new(CHILDREN, &["CollectionMembership"]).same_kind_only()]
            }
            ViewPreset::CollectionGraph => vec![
                RelationshipGroup::new(CHILDREN, &["CollectionMembership"]),
                RelationshipGroup::new("links", &["ResourceList"]),
            ],
            ViewPreset::GovernanceDefinitions => vec![
                RelationshipGroup::new(CHILDREN, &["SupportingDefinition"]),
                RelationshipGroup::new("links", &["GovernedBy"]),
            ],
            ViewPreset::SupplyChainSegments => vec![
                RelationshipGroup::new("nestedSegments", &["InformationSupplyChainComposition"]),
                RelationshipGroup::new("links", &["InformationSupplyChainLink"]),
            ],
            ViewPreset::ProjectHierarchy => vec![
                RelationshipGroup::new(CHILDREN, &["ProjectHierarchy"]),
                RelationshipGroup::new("links", &["ProjectDependency"]),
            ],
            ViewPreset::SupplyChainMembership => vec![RelationshipGroup::new(
                "containers",
                &["InformationSupplyChainComposition"],
            )
            .direction(TraversalDirection::Incoming)],
        }
    }

    pub fn is_context_path(&self) -> bool {
        matches!(self, ViewPreset::SupplyChainMembership)
    }

    pub async fn build(
        &self,
        assembler: &GraphAssembler,
        guid: &str,
        max_depth: usize,
        policy: ExpansionPolicy,
    ) -> Result<PresetView> {
        self.build_with_cancel(assembler, guid, max_depth, policy, None).await
    }

    /// Like [`ViewPreset::build`]; a cancel signal only applies to graph presets.
    pub async fn build_with_cancel(
        &self,
        assembler: &GraphAssembler,
        guid: &str,
        max_depth: usize,
        policy: ExpansionPolicy,
        cancel: Option<&CancelSignal>,
    ) -> Result<PresetView> {
        let groups = self.groups();
        if self.is_context_path() {
            if cancel.is_some() {
                return Err(MetaviewError::InvalidInput(format!(
                    "the {} preset walks a context path and cannot be cancelled",
                    self
                )));
            }
            let group = &groups[0];
            return Ok(PresetView::ContextPath(
                build_context_path_in(assembler, guid, group, max_depth).await?,
            ));
        }
        let none = CancelSignal::none();
        let cancel = cancel.unwrap_or(&none);
        Ok(PresetView::Graph(
            build_graph_with_cancel(assembler, guid, groups, max_depth, policy, cancel).await?,
        ))
    }
}

impl fmt::Display for ViewPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewPreset {
    type Err = MetaviewError;

    fn from_str(s: &str) -> Result<Self> {
        ViewPreset::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ViewPreset::ALL.iter().map(|p| p.as_str()).collect();
                MetaviewError::InvalidInput(format!("unknown preset {} (known: {})", s, known.join(", ")))
            })
    }
}
