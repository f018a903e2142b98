//! Graph assembly: bounded, cycle-safe expansion from a root element.
//!
//! The assembler walks outward breadth-first through the relationship groups
//! of a request. View builders in [`views`] are thin configurations over it.

mod assembler;
pub mod timeline;
pub mod views;

pub use assembler::GraphAssembler;
pub use timeline::{ProjectTimeline, TimelineEntry};
pub use views::{
    build_context_path, build_graph, build_graph_with_cancel, build_hierarchy, build_hierarchy_with_cancel, ContextPath,
    ViewPreset,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{MetaviewError, Result};
use crate::repository::TraversalDirection;

/// What to do when an element is reached a second time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpansionPolicy {
    /// Re-expand in every branch; only the current path is checked for cycles
    #[default]
    StrictTree,
    /// Expand once per structure; later occurrences are back-reference stubs
    DagWithSharing,
}

impl ExpansionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionPolicy::StrictTree => "strict-tree",
            ExpansionPolicy::DagWithSharing => "dag-with-sharing",
        }
    }
}

impl fmt::Display for ExpansionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpansionPolicy {
    type Err = MetaviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strict-tree" => Ok(ExpansionPolicy::StrictTree),
            "dag-with-sharing" => Ok(ExpansionPolicy::DagWithSharing),
            other => Err(MetaviewError::InvalidInput(format!(
                "unknown expansion policy: {} (expected strict-tree or dag-with-sharing)",
                other
            ))),
        }
    }
}

/// A named set of relationship types followed together.
///
/// The first group of a request fills `children`; the rest fill `links[name]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipGroup {
    pub name: String,
    pub relationship_types: Vec<String>,
    #[serde(default)]
    pub direction: TraversalDirection,
    /// Only keep related elements of the root's kind
    #[serde(default)]
    pub same_kind_only: bool,
}

impl RelationshipGroup {
    pub fn new(name: &str, relationship_types: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            relationship_types: relationship_types.iter().map(|s| s.to_string()).collect(),
            direction: TraversalDirection::Outgoing,
            same_kind_only: false,
        }
    }

    pub fn direction(mut self, direction: TraversalDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn same_kind_only(mut self) -> Self {
        self.same_kind_only = true;
        self
    }

    pub fn accepts(&self, type_name: Option<&str>) -> bool {
        type_name
            .map(|t| self.relationship_types.iter().any(|r| r == t))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRequest {
    pub root_guid: String,
    pub groups: Vec<RelationshipGroup>,
    pub max_depth: usize,
    pub policy: ExpansionPolicy,
}

impl AssemblyRequest {
    pub fn new(root_guid: &str, groups: Vec<RelationshipGroup>, max_depth: usize, policy: ExpansionPolicy) -> Self {
        Self {
            root_guid: root_guid.to_string(),
            groups,
            max_depth,
            policy,
        }
    }

    pub fn validate(&self, options: &AssemblyOptions) -> Result<()> {
        if self.root_guid.trim().is_empty() {
            return Err(MetaviewError::InvalidInput("root guid is empty".to_string()));
        }
        if self.max_depth == 0 || self.max_depth > options.max_depth_limit {
            return Err(MetaviewError::InvalidInput(format!(
                "max depth must be between 1 and {}, got {}",
                options.max_depth_limit, self.max_depth
            )));
        }
        if self.groups.is_empty() {
            return Err(MetaviewError::InvalidInput(
                "at least one relationship group is required".to_string(),
            ));
        }
        for (i, group) in self.groups.iter().enumerate() {
            if group.name.trim().is_empty() {
                return Err(MetaviewError::InvalidInput(format!("relationship group {} has no name", i)));
            }
            if group.relationship_types.is_empty() || group.relationship_types.iter().any(|t| t.trim().is_empty()) {
                return Err(MetaviewError::InvalidInput(format!(
                    "relationship group {} needs at least one non-blank relationship type",
                    group.name
                )));
            }
            if self.groups[..i].iter().any(|g| g.name == group.name) {
                return Err(MetaviewError::InvalidInput(format!(
                    "duplicate relationship group name: {}",
                    group.name
                )));
            }
        }
        Ok(())
    }
}

/// Tuning for one assembler; usually built from `[assembly]` config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyOptions {
    pub concurrency_limit: usize,
    pub page_size: usize,
    /// Per-node timeout covering all pages of that node
    pub fetch_timeout: Option<Duration>,
    pub max_depth_limit: usize,
    /// Probe frontier nodes so `depthExceeded` can be reported
    pub probe_frontier: bool,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            page_size: 100,
            fetch_timeout: Some(Duration::from_secs(10)),
            max_depth_limit: 16,
            probe_frontier: true,
        }
    }
}

/// Sender side of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Checked between levels: a flag, a deadline, or both.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn channel() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle(tx),
            CancelSignal {
                flag: Some(rx),
                deadline: None,
            },
        )
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn after(timeout: Duration) -> Self {
        Self::none().with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        let flagged = self.flag.as_ref().map(|rx| *rx.borrow()).unwrap_or(false);
        let expired = self.deadline.map(|d| Instant::now() >= d).unwrap_or(false);
        flagged || expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(depth: usize) -> AssemblyRequest {
        AssemblyRequest::new(
            "c1",
            vec![RelationshipGroup::new("children", &["CollectionMembership"])],
            depth,
            ExpansionPolicy::StrictTree,
        )
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("dag-with-sharing".parse::<ExpansionPolicy>().unwrap(), ExpansionPolicy::DagWithSharing);
        let err = "breadth-first".parse::<ExpansionPolicy>().unwrap_err();
        assert!(matches!(err, MetaviewError::InvalidInput(_)));
        assert_eq!(ExpansionPolicy::default().to_string(), "strict-tree");
    }

    #[test]
    fn test_request_validation() {
        let options = AssemblyOptions::default();
        assert!(request(1).validate(&options).is_ok());
        assert!(request(0).validate(&options).is_err());
        assert!(request(options.max_depth_limit + 1).validate(&options).is_err());

        let mut empty = request(2);
        empty.groups.clear();
        assert!(empty.validate(&options).is_err());

        let mut blank = request(2);
        blank.groups[0].relationship_types = vec![" ".to_string()];
        assert!(blank.validate(&options).is_err());

        let mut dup = request(2);
        dup.groups.push(RelationshipGroup::new("children", &["ResourceList"]));
        assert!(dup.validate(&options).is_err());
    }

    #[test]
    fn test_group_accepts() {
        let group = RelationshipGroup::new("links", &["ResourceList"]);
        assert!(group.accepts(Some("ResourceList")));
        assert!(!group.accepts(Some("CollectionMembership")));
        assert!(!group.accepts(None));
    }

    #[tokio::test]
    async fn test_cancel_signal() {
        let (handle, signal) = CancelSignal::channel();
        assert!(!signal.is_cancelled());
        handle.cancel();
        assert!(signal.is_cancelled());

        assert!(CancelSignal::after(Duration::ZERO).is_cancelled());
        assert!(!CancelSignal::none().is_cancelled());
    }
}
