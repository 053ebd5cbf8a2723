use std::{fs, path::Path};

use anyhow::{Context, Result};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::merge::{BoneSegment, Prediction, SkinWeights, derive_tails};

use super::PredictionLoader;

/// Skin weights as written by the predictor: dense rows or sparse triplets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkinPayload {
    Dense(Vec<Vec<f32>>),
    Sparse { entries: Vec<(usize, usize, f32)> },
}

/// On-disk predictor output, all coordinates in the normalized frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionFile {
    /// Bone head positions.
    pub joints: Vec<[f32; 3]>,
    /// Bone tail positions; derived from the hierarchy when absent.
    #[serde(default)]
    pub tails: Option<Vec<[f32; 3]>>,
    /// Parent per bone; `null` or a negative value marks a root.
    pub parents: Vec<Option<i64>>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    pub vertices: Vec<[f32; 3]>,
    pub skin: SkinPayload,
}

impl PredictionFile {
    pub fn into_prediction(self) -> Result<Prediction, MergeError> {
        let bone_count = self.joints.len();
        if self.parents.len() != bone_count {
            return Err(MergeError::ShapeMismatch {
                what: "parent indices",
                expected: bone_count,
                actual: self.parents.len(),
            });
        }

        let parents: Vec<Option<usize>> = self
            .parents
            .iter()
            .map(|parent| parent.filter(|&index| index >= 0).map(|index| index as usize))
            .collect();
        let heads: Vec<Point3<f32>> = self.joints.iter().copied().map(Point3::from).collect();
        let tails: Vec<Point3<f32>> = match self.tails {
            Some(tails) if tails.len() != bone_count => {
                return Err(MergeError::ShapeMismatch {
                    what: "bone tails",
                    expected: bone_count,
                    actual: tails.len(),
                });
            }
            Some(tails) => tails.into_iter().map(Point3::from).collect(),
            None => derive_tails(&heads, &parents),
        };
        let names = self
            .names
            .unwrap_or_else(|| (0..bone_count).map(|bone| format!("bone_{bone}")).collect());

        let vertex_count = self.vertices.len();
        let weights = match self.skin {
            SkinPayload::Dense(rows) => {
                if rows.len() != vertex_count {
                    return Err(MergeError::ShapeMismatch {
                        what: "skin weight rows",
                        expected: vertex_count,
                        actual: rows.len(),
                    });
                }
                SkinWeights::from_rows(&rows, bone_count)?
            }
            SkinPayload::Sparse { entries } => {
                SkinWeights::from_sparse(vertex_count, bone_count, &entries)?
            }
        };

        Ok(Prediction {
            vertices: self.vertices.into_iter().map(Point3::from).collect(),
            bones: heads
                .into_iter()
                .zip(tails)
                .map(|(head, tail)| BoneSegment::new(head, tail))
                .collect(),
            parents,
            names,
            weights,
        })
    }
}

/// [`PredictionLoader`] for the JSON layout of [`PredictionFile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPredictionLoader;

impl PredictionLoader for JsonPredictionLoader {
    fn load(&self, path: &Path) -> Result<Prediction, MergeError> {
        load_prediction(path)
    }
}

/// Load a predictor output JSON file.
pub fn load_prediction(path: &Path) -> Result<Prediction, MergeError> {
    read_prediction_file(path)
        .map_err(|err| MergeError::Load {
            path: path.to_path_buf(),
            reason: format!("{err:#}"),
        })?
        .into_prediction()
}

fn read_prediction_file(path: &Path) -> Result<PredictionFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read prediction file: {}", path.display()))?;
    serde_json::from_str(&content).context("failed to parse prediction JSON")
}
