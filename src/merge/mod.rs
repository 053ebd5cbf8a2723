mod diagnostic;
mod geometry;
mod orientation;
mod skeleton;
mod skinning;
mod spatial;
mod types;
mod validation;

use log::{info, warn};

use crate::error::MergeError;

// Re-export public types for callers of this module.
pub use diagnostic::{diagnostic_path_for_output, write_merge_diagnostic};
pub use geometry::{NormalizationFrame, bounding_box, denormalize};
pub use orientation::{AxisTransform, OrientationResolution, resolve as resolve_orientation};
pub use skeleton::{
    BoneNameMap, HUMANOID_BONE_MAP, SkeletonOptions, build_skeleton, derive_tails,
};
pub use skinning::{TransferOutcome, binding_from_weight_row, transfer_weights};
pub use spatial::{Nearest, SpatialIndex};
pub use types::{
    Bone, BoneSegment, DEFAULT_ORIENTATION_SEED, DEFAULT_ROOT_BONE_NAME, DEFAULT_SAMPLE_SIZE,
    DEFAULT_TIE_TOLERANCE, MAX_INFLUENCES, MergeOptions, MergeReport, Mesh, OrientationOptions,
    OrientationSummary, Prediction, RiggedMesh, Severity, Skeleton, SkinWeights,
    ValidationIssue, VertexBoneBinding,
};

use validation::validate_merge_inputs;

// ─── Public API ───────────────────────────────────────────────────────────────

/// Rig `target_mesh` with the predicted skeleton and skin weights.
///
/// Runs orientation resolution, denormalization into the target frame,
/// skeleton building and weight transfer in that order. Any failing step
/// aborts the merge without partial output.
pub fn merge(
    target_mesh: Mesh,
    prediction: &Prediction,
    options: &MergeOptions,
) -> Result<RiggedMesh, MergeError> {
    MergeContext::new(options).run(target_mesh, prediction)
}

/// Per-request state of a single merge. Built fresh for every request and
/// consumed by [`MergeContext::run`].
pub struct MergeContext<'a> {
    options: &'a MergeOptions,
    issues: Vec<ValidationIssue>,
}

impl<'a> MergeContext<'a> {
    pub fn new(options: &'a MergeOptions) -> Self {
        Self {
            options,
            issues: Vec::new(),
        }
    }

    pub fn run(
        mut self,
        target_mesh: Mesh,
        prediction: &Prediction,
    ) -> Result<RiggedMesh, MergeError> {
        self.issues = validate_merge_inputs(&target_mesh, prediction, self.options)?;

        // Compare orientations in the predictor's normalized frame, then map
        // the aligned result into world space with the same frame.
        let frame = NormalizationFrame::from_target(&target_mesh.vertices)?;
        let canonical_target = frame.normalize_points(&target_mesh.vertices);
        let orientation = resolve_orientation(
            &prediction.vertices,
            &canonical_target,
            &prediction.bones,
            &self.options.orientation,
        )?;
        self.record_orientation(&orientation);

        let (world_vertices, world_bones) =
            frame.denormalize(&orientation.aligned_vertices, &orientation.aligned_bones);

        let skeleton = build_skeleton(
            &world_bones,
            &prediction.parents,
            &prediction.names,
            SkeletonOptions {
                add_synthetic_root: self.options.add_synthetic_root,
                root_bone_name: &self.options.root_bone_name,
                name_map: self.options.name_map.as_ref(),
            },
        )?;

        let transfer = transfer_weights(
            &world_vertices,
            &target_mesh.vertices,
            &prediction.weights,
            self.options.max_influences,
        )?;
        if transfer.degenerate_vertex_count > 0 {
            self.issues.push(ValidationIssue::warning(
                "DEGENERATE_WEIGHTS",
                format!(
                    "{} target vertices matched predicted vertices without weights and have no bone influence",
                    transfer.degenerate_vertex_count
                ),
            ));
        }

        let source_offset = skeleton.bone_for_source(0);
        let bindings: Vec<VertexBoneBinding> = transfer
            .bindings
            .into_iter()
            .map(|binding| binding.offset_bones(source_offset))
            .collect();

        info!(
            "merged {} bones onto {} target vertices (center {:?}, scale {:.4})",
            skeleton.len(),
            target_mesh.vertex_count(),
            frame.center.as_slice(),
            frame.scale
        );

        let report = MergeReport {
            target_vertex_count: target_mesh.vertex_count(),
            target_face_count: target_mesh.faces.len(),
            predicted_vertex_count: prediction.vertices.len(),
            bone_count: skeleton.len(),
            orientation: OrientationSummary {
                permutation: orientation.transform.permutation,
                signs: orientation.transform.signs,
                loss: orientation.loss,
                identity_loss: orientation.identity_loss,
                runner_up_loss: orientation.runner_up_loss,
                ambiguous: orientation.ambiguous,
                sampled_points: orientation.sampled_points,
            },
            center: [frame.center.x, frame.center.y, frame.center.z],
            scale: frame.scale,
            degenerate_vertex_count: transfer.degenerate_vertex_count,
            issues: self.issues,
        };

        Ok(RiggedMesh {
            mesh: target_mesh,
            skeleton,
            bindings,
            report,
        })
    }

    fn record_orientation(&mut self, orientation: &OrientationResolution) {
        if orientation.ambiguous {
            warn!(
                "orientation {} is ambiguous: runner-up loss {:?} is within tolerance of {:.6}",
                orientation.transform, orientation.runner_up_loss, orientation.loss
            );
            self.issues.push(ValidationIssue::warning(
                "ORIENTATION_AMBIGUOUS",
                format!(
                    "orientation {} (loss {:.6}) has a runner-up within {:.1}% (loss {:.6}); the result may be mirrored",
                    orientation.transform,
                    orientation.loss,
                    self.options.orientation.tie_tolerance * 100.0,
                    orientation.runner_up_loss.unwrap_or(orientation.loss)
                ),
            ));
        }

        if orientation.transform.is_mirroring() {
            self.issues.push(ValidationIssue::info(
                "ORIENTATION_MIRRORED",
                format!(
                    "prediction was mirrored into the target frame by {}",
                    orientation.transform
                ),
            ));
        }
    }
}
