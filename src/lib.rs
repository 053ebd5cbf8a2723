//! Merge a predicted skeleton and skin weights onto an arbitrary target mesh.
//!
//! [`merge::merge`] is the engine entry point; [`format`] holds the file
//! adapters, [`pipeline`] the batch runner and [`settings`] the persisted
//! configuration used by the `rigmerge` binary.

pub mod error;
pub mod format;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod settings;

pub use error::MergeError;
