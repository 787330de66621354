//! Critique domain model: validated claim trees and the builder that
//! normalizes raw agent output into them.

pub mod builder;
pub mod node;

pub use builder::{BuildError, BuildResult, TreeBuilder, DEFAULT_MAX_DEPTH};
pub use node::{
    AgentId, AgentOutcome, CritiqueNode, CritiqueTree, NodePath, Severity, UnknownSeverity,
};
