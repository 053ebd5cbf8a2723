//! Import/export boundary of the merge engine.
//!
//! The engine itself only sees [`Mesh`], [`Prediction`] and [`RiggedMesh`];
//! file formats are adapters behind [`MeshImporter`], [`PredictionLoader`]
//! and [`MeshExporter`].

mod glb;
mod prediction;

use std::path::Path;

use crate::error::MergeError;
use crate::merge::{Mesh, Prediction, RiggedMesh};

pub use glb::{GlbExporter, GltfImporter, encode_rigged_glb};
pub use prediction::{JsonPredictionLoader, PredictionFile, SkinPayload, load_prediction};

/// Reads a target mesh from some file format.
pub trait MeshImporter {
    fn import(&self, path: &Path) -> Result<Mesh, MergeError>;
}

/// Reads predictor output (skeleton, predicted cloud, skin weights).
pub trait PredictionLoader {
    fn load(&self, path: &Path) -> Result<Prediction, MergeError>;
}

/// Writes a rigged mesh to some file format.
pub trait MeshExporter {
    fn export(&self, rigged: &RiggedMesh, path: &Path) -> Result<(), MergeError>;
}

impl<T: MeshImporter + ?Sized> MeshImporter for &T {
    fn import(&self, path: &Path) -> Result<Mesh, MergeError> {
        (**self).import(path)
    }
}

impl<T: PredictionLoader + ?Sized> PredictionLoader for &T {
    fn load(&self, path: &Path) -> Result<Prediction, MergeError> {
        (**self).load(path)
    }
}

impl<T: MeshExporter + ?Sized> MeshExporter for &T {
    fn export(&self, rigged: &RiggedMesh, path: &Path) -> Result<(), MergeError> {
        (**self).export(rigged, path)
    }
}
