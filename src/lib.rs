pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod import;
pub mod model;
pub mod render;
pub mod repository;

pub use config::Config;
pub use error::{MetaviewError, Result};
pub use graph::{
    build_context_path, build_graph, build_graph_with_cancel, build_hierarchy, build_hierarchy_with_cancel,
    AssemblyOptions, AssemblyRequest, CancelHandle, CancelSignal, ContextPath, ExpansionPolicy, GraphAssembler,
    RelationshipGroup, ViewPreset,
};
pub use model::{AssembledGraph, GraphNode};
pub use render::{DiagramRenderer, DiagramSource};
pub use repository::{MetadataRepository, SqliteRepository};
