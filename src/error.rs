use std::path::PathBuf;

use thiserror::Error;

/// Error values returned by merge entry points.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    /// An input mesh, prediction or settings file could not be obtained.
    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// The rigged result could not be written.
    #[error("failed to export {}: {reason}", path.display())]
    Export { path: PathBuf, reason: String },

    #[error("skeleton has no bones")]
    EmptySkeleton,

    #[error("spatial index was built over an empty point set")]
    EmptyIndex,

    #[error("{what} is empty")]
    EmptyInput { what: &'static str },

    #[error("{what} has {actual} entries, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what} contains a non-finite value at index {index}")]
    NonFiniteInput { what: &'static str, index: usize },

    #[error("face {face} references vertex {vertex}, but the mesh has {vertex_count} vertices")]
    InvalidFace {
        face: usize,
        vertex: usize,
        vertex_count: usize,
    },

    #[error("invalid bone hierarchy at bone {bone}: {reason}")]
    InvalidHierarchy { bone: usize, reason: String },

    #[error("invalid option: {0}")]
    InvalidOption(String),
}
