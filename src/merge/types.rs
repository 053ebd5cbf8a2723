use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::error::MergeError;

use super::skeleton::BoneNameMap;

// ─── Defaults ─────────────────────────────────────────────────────────────────

/// Upper bound on influences per vertex accepted by skinned exporters.
pub const MAX_INFLUENCES: usize = 4;

/// Default cap on predicted points used during orientation search.
pub const DEFAULT_SAMPLE_SIZE: usize = 16_384;

/// Seed used when settings do not ask for entropy.
pub const DEFAULT_ORIENTATION_SEED: u64 = 0x5eed;

/// Relative loss gap under which two orientation candidates count as tied.
pub const DEFAULT_TIE_TOLERANCE: f32 = 0.01;

pub const DEFAULT_ROOT_BONE_NAME: &str = "Root";

// ─── Geometry inputs ──────────────────────────────────────────────────────────

/// Target mesh as handed over by an importer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3<f32>>,
    /// Faces as vertex index lists (triangles or n-gons).
    pub faces: Vec<Vec<usize>>,
}

impl Mesh {
    pub fn new(vertices: Vec<Point3<f32>>, faces: Vec<Vec<usize>>) -> Self {
        Self { vertices, faces }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Fan-triangulated index list, skipping faces with fewer than 3 corners.
    pub fn triangle_indices(&self) -> Vec<usize> {
        let mut indices = Vec::with_capacity(self.faces.len() * 3);
        for face in &self.faces {
            if face.len() < 3 {
                continue;
            }
            for corner in 1..face.len() - 1 {
                indices.extend_from_slice(&[face[0], face[corner], face[corner + 1]]);
            }
        }
        indices
    }
}

/// Head/tail pair of a predicted bone before the skeleton is materialized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneSegment {
    pub head: Point3<f32>,
    pub tail: Point3<f32>,
}

impl BoneSegment {
    pub fn new(head: Point3<f32>, tail: Point3<f32>) -> Self {
        Self { head, tail }
    }
}

/// Dense `V x J` weight matrix produced alongside the predicted cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinWeights {
    vertex_count: usize,
    bone_count: usize,
    data: Vec<f32>,
}

impl SkinWeights {
    /// Build from dense rows; every row must hold exactly `bone_count` weights.
    pub fn from_rows(rows: &[Vec<f32>], bone_count: usize) -> Result<Self, MergeError> {
        let mut data = Vec::with_capacity(rows.len() * bone_count);
        for row in rows {
            if row.len() != bone_count {
                return Err(MergeError::ShapeMismatch {
                    what: "skin weight row",
                    expected: bone_count,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }

        Ok(Self {
            vertex_count: rows.len(),
            bone_count,
            data,
        })
    }

    /// Build from `(vertex, bone, weight)` triplets. Repeated pairs accumulate.
    pub fn from_sparse(
        vertex_count: usize,
        bone_count: usize,
        entries: &[(usize, usize, f32)],
    ) -> Result<Self, MergeError> {
        let mut data = vec![0.0f32; vertex_count * bone_count];
        for &(vertex, bone, weight) in entries {
            if vertex >= vertex_count {
                return Err(MergeError::ShapeMismatch {
                    what: "sparse skin vertex index bound",
                    expected: vertex_count,
                    actual: vertex + 1,
                });
            }
            if bone >= bone_count {
                return Err(MergeError::ShapeMismatch {
                    what: "sparse skin bone index bound",
                    expected: bone_count,
                    actual: bone + 1,
                });
            }
            data[vertex * bone_count + bone] += weight;
        }

        Ok(Self {
            vertex_count,
            bone_count,
            data,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn bone_count(&self) -> usize {
        self.bone_count
    }

    /// Weight row of one predicted vertex.
    pub fn row(&self, vertex: usize) -> &[f32] {
        let start = vertex * self.bone_count;
        &self.data[start..start + self.bone_count]
    }

    pub(super) fn first_non_finite(&self) -> Option<usize> {
        self.data
            .iter()
            .position(|weight| !weight.is_finite())
            .map(|flat| flat / self.bone_count.max(1))
    }
}

/// Everything the skeleton/skin predictor hands over, in its normalized frame.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub vertices: Vec<Point3<f32>>,
    pub bones: Vec<BoneSegment>,
    /// Parent index per bone; `None` marks a root.
    pub parents: Vec<Option<usize>>,
    pub names: Vec<String>,
    pub weights: SkinWeights,
}

// ─── Outputs ──────────────────────────────────────────────────────────────────

/// Up to [`MAX_INFLUENCES`] `(bone, weight)` pairs attached to one target vertex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexBoneBinding {
    influences: Vec<(usize, f32)>,
}

impl VertexBoneBinding {
    pub fn new(influences: Vec<(usize, f32)>) -> Self {
        Self { influences }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn influences(&self) -> &[(usize, f32)] {
        &self.influences
    }

    pub fn is_empty(&self) -> bool {
        self.influences.is_empty()
    }

    pub fn weight_sum(&self) -> f32 {
        self.influences.iter().map(|&(_, weight)| weight).sum()
    }

    /// Shift every bone index, used when a synthetic root is prepended.
    pub(super) fn offset_bones(mut self, offset: usize) -> Self {
        if offset != 0 {
            for (bone, _) in &mut self.influences {
                *bone += offset;
            }
        }
        self
    }
}

/// One bone of a materialized skeleton, in world space.
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    pub head: Point3<f32>,
    pub tail: Point3<f32>,
    pub parent: Option<usize>,
}

impl Bone {
    pub fn length(&self) -> f32 {
        (self.tail - self.head).norm()
    }
}

/// Bones stored so that `parent[i] < i` and bone 0 is the only root.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    pub(super) bones: Vec<Bone>,
    /// Number of bones prepended in front of the predicted ones.
    pub(super) source_offset: usize,
}

impl Skeleton {
    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn root(&self) -> Option<&Bone> {
        self.bones.first()
    }

    pub fn has_synthetic_root(&self) -> bool {
        self.source_offset > 0
    }

    /// Skeleton index of the bone that was `source_index` in the prediction.
    pub fn bone_for_source(&self, source_index: usize) -> usize {
        source_index + self.source_offset
    }

    pub fn parent_indices(&self) -> Vec<Option<usize>> {
        self.bones.iter().map(|bone| bone.parent).collect()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.bones
            .iter()
            .enumerate()
            .filter(move |(_, bone)| bone.parent == Some(index))
            .map(|(child, _)| child)
    }
}

/// Output of one merge, ready for an exporter.
#[derive(Debug, Clone)]
pub struct RiggedMesh {
    pub mesh: Mesh,
    pub skeleton: Skeleton,
    /// One binding per target vertex, in vertex order.
    pub bindings: Vec<VertexBoneBinding>,
    pub report: MergeReport,
}

// ─── Options ──────────────────────────────────────────────────────────────────

/// Orientation search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationOptions {
    pub sample_size: usize,
    /// `None` draws the subsample from OS entropy.
    pub seed: Option<u64>,
    pub tie_tolerance: f32,
}

impl Default for OrientationOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: Some(DEFAULT_ORIENTATION_SEED),
            tie_tolerance: DEFAULT_TIE_TOLERANCE,
        }
    }
}

/// Resolved options for a single merge.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub add_synthetic_root: bool,
    pub root_bone_name: String,
    pub max_influences: usize,
    pub orientation: OrientationOptions,
    pub name_map: Option<BoneNameMap>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            add_synthetic_root: false,
            root_bone_name: DEFAULT_ROOT_BONE_NAME.to_string(),
            max_influences: MAX_INFLUENCES,
            orientation: OrientationOptions::default(),
            name_map: None,
        }
    }
}

// ─── Reporting ────────────────────────────────────────────────────────────────

/// Severity level used by validation issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single non-fatal finding produced during a merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn warning(code: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message,
        }
    }

    pub fn info(code: &str, message: String) -> Self {
        Self {
            severity: Severity::Info,
            code: code.to_string(),
            message,
        }
    }
}

/// Orientation decision as recorded in the report.
#[derive(Debug, Clone, Serialize)]
pub struct OrientationSummary {
    pub permutation: [usize; 3],
    pub signs: [f32; 3],
    pub loss: f32,
    pub identity_loss: f32,
    pub runner_up_loss: Option<f32>,
    pub ambiguous: bool,
    pub sampled_points: usize,
}

/// Summary of one merge, serialized into the diagnostic log.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub target_vertex_count: usize,
    pub target_face_count: usize,
    pub predicted_vertex_count: usize,
    pub bone_count: usize,
    pub orientation: OrientationSummary,
    pub center: [f32; 3],
    pub scale: f32,
    pub degenerate_vertex_count: usize,
    pub issues: Vec<ValidationIssue>,
}
