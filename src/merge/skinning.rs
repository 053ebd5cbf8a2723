use std::cmp::Ordering;

use log::{debug, warn};
use nalgebra::Point3;

use crate::error::MergeError;

use super::spatial::SpatialIndex;
use super::types::{MAX_INFLUENCES, SkinWeights, VertexBoneBinding};

/// Bindings for every target vertex plus bookkeeping for the report.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub bindings: Vec<VertexBoneBinding>,
    /// Target vertices whose nearest predicted vertex carried no weight.
    pub degenerate_vertex_count: usize,
    /// Distinct predicted vertices that were someone's nearest neighbour.
    pub matched_predicted_count: usize,
}

// ─── Weight transfer ──────────────────────────────────────────────────────────

/// Copy each target vertex's skin weights from its nearest predicted vertex,
/// keeping the strongest `max_influences` bones renormalized to sum to one.
///
/// The index over `world_predicted_vertices` is built once and shared by every
/// query. Bindings are computed once per predicted vertex and reused.
pub fn transfer_weights(
    world_predicted_vertices: &[Point3<f32>],
    target_vertices: &[Point3<f32>],
    skin_weights: &SkinWeights,
    max_influences: usize,
) -> Result<TransferOutcome, MergeError> {
    if max_influences == 0 || max_influences > MAX_INFLUENCES {
        return Err(MergeError::InvalidOption(format!(
            "max influences must be between 1 and {MAX_INFLUENCES}, got {max_influences}"
        )));
    }
    if skin_weights.vertex_count() != world_predicted_vertices.len() {
        return Err(MergeError::ShapeMismatch {
            what: "skin weight rows",
            expected: world_predicted_vertices.len(),
            actual: skin_weights.vertex_count(),
        });
    }

    let index = SpatialIndex::build(world_predicted_vertices)?;

    let mut per_predicted: Vec<Option<VertexBoneBinding>> = vec![None; index.len()];
    let mut bindings = Vec::with_capacity(target_vertices.len());
    let mut degenerate_vertex_count = 0usize;

    for vertex in target_vertices {
        let nearest = index.query_nearest(vertex);
        let binding = per_predicted[nearest.index].get_or_insert_with(|| {
            binding_from_weight_row(skin_weights.row(nearest.index), max_influences)
        });

        if binding.is_empty() {
            degenerate_vertex_count += 1;
        }
        bindings.push(binding.clone());
    }

    let matched_predicted_count = per_predicted.iter().filter(|slot| slot.is_some()).count();
    debug!(
        "transferred weights to {} target vertices from {} matched predicted vertices",
        bindings.len(),
        matched_predicted_count
    );
    if degenerate_vertex_count > 0 {
        warn!(
            "{degenerate_vertex_count} target vertices matched predicted vertices without weights and were left unbound"
        );
    }

    Ok(TransferOutcome {
        bindings,
        degenerate_vertex_count,
        matched_predicted_count,
    })
}

/// Strongest `max_influences` positive weights of `row`, renormalized.
///
/// A row whose kept weights sum to zero produces an empty binding.
pub fn binding_from_weight_row(row: &[f32], max_influences: usize) -> VertexBoneBinding {
    let mut ranked: Vec<(usize, f32)> = row
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, weight)| weight > 0.0)
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked.truncate(max_influences);

    let weight_sum: f32 = ranked.iter().map(|&(_, weight)| weight).sum();
    if weight_sum <= 0.0 {
        return VertexBoneBinding::empty();
    }

    VertexBoneBinding::new(
        ranked
            .into_iter()
            .map(|(bone, weight)| (bone, weight / weight_sum))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_cloud(count: usize, step: f32) -> Vec<Point3<f32>> {
        (0..count)
            .map(|i| Point3::new(i as f32 * step, 0.0, 0.0))
            .collect()
    }

    #[test]
    fn given_single_bone_weights_when_transferring_then_every_vertex_binds_fully_to_it() {
        let predicted = line_cloud(5, 1.0);
        let weights = SkinWeights::from_rows(&vec![vec![1.0]; 5], 1).expect("weights");
        let target = line_cloud(40, 0.1);

        let outcome = transfer_weights(&predicted, &target, &weights, 4).expect("transfer");

        assert_eq!(outcome.bindings.len(), target.len());
        for binding in &outcome.bindings {
            assert_eq!(binding.influences(), &[(0, 1.0)]);
        }
        assert_eq!(outcome.degenerate_vertex_count, 0);
    }

    #[test]
    fn given_wide_weight_row_when_binding_then_top_weights_are_kept_and_renormalized() {
        let row = [0.05, 0.3, 0.0, 0.2, 0.1, 0.35];
        let binding = binding_from_weight_row(&row, 4);

        let bones: Vec<usize> = binding.influences().iter().map(|&(bone, _)| bone).collect();
        assert_eq!(bones, vec![5, 1, 3, 4]);
        assert!((binding.weight_sum() - 1.0).abs() < 1e-5);
        assert!((binding.influences()[0].1 - 0.35 / 0.95).abs() < 1e-5);
    }

    #[test]
    fn given_equal_weights_when_binding_then_lower_bone_index_wins_the_tie() {
        let binding = binding_from_weight_row(&[0.25, 0.25, 0.25, 0.25, 0.25], 2);
        let bones: Vec<usize> = binding.influences().iter().map(|&(bone, _)| bone).collect();

        assert_eq!(bones, vec![0, 1]);
        assert!((binding.weight_sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn given_all_zero_row_when_transferring_then_vertex_gets_empty_binding() {
        let predicted = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0)];
        let weights =
            SkinWeights::from_rows(&[vec![0.0, 0.0], vec![0.4, 0.6]], 2).expect("weights");
        let target = vec![
            Point3::new(0.5, 0.0, 0.0),
            Point3::new(-0.5, 0.0, 0.0),
            Point3::new(9.0, 0.0, 0.0),
        ];

        let outcome = transfer_weights(&predicted, &target, &weights, 4).expect("transfer");

        assert!(outcome.bindings[0].is_empty());
        assert!(outcome.bindings[1].is_empty());
        assert_eq!(outcome.bindings[2].influences(), &[(1, 0.6), (0, 0.4)]);
        assert_eq!(outcome.degenerate_vertex_count, 2);
    }

    #[test]
    fn given_dense_target_when_transferring_then_each_vertex_receives_one_normalized_binding() {
        let predicted: Vec<Point3<f32>> = (0..50)
            .map(|i| {
                let t = i as f32 * 0.2;
                Point3::new(t.cos(), t.sin(), t * 0.1)
            })
            .collect();
        let rows: Vec<Vec<f32>> = (0..50)
            .map(|i| {
                (0..6)
                    .map(|bone| ((i * 7 + bone * 3) % 11) as f32 + 0.5)
                    .collect()
            })
            .collect();
        let weights = SkinWeights::from_rows(&rows, 6).expect("weights");
        let target: Vec<Point3<f32>> = (0..500)
            .map(|i| {
                let t = i as f32 * 0.02;
                Point3::new(t.cos() * 1.01, t.sin() * 0.99, t * 0.1)
            })
            .collect();

        let outcome = transfer_weights(&predicted, &target, &weights, 4).expect("transfer");

        assert_eq!(outcome.bindings.len(), 500);
        for binding in &outcome.bindings {
            assert_eq!(binding.influences().len(), 4);
            assert!((binding.weight_sum() - 1.0).abs() < 1e-5);
        }
        assert!(outcome.matched_predicted_count <= 50);
    }

    #[test]
    fn given_identical_inputs_when_transferring_twice_then_bindings_are_identical() {
        let predicted = line_cloud(8, 0.5);
        let rows: Vec<Vec<f32>> = (0..8)
            .map(|i| vec![i as f32, 8.0 - i as f32, 1.0])
            .collect();
        let weights = SkinWeights::from_rows(&rows, 3).expect("weights");
        let target = line_cloud(33, 0.11);

        let first = transfer_weights(&predicted, &target, &weights, 2).expect("first");
        let second = transfer_weights(&predicted, &target, &weights, 2).expect("second");

        assert_eq!(first.bindings, second.bindings);
    }

    #[test]
    fn given_mismatched_weight_rows_when_transferring_then_shape_error_is_returned() {
        let predicted = line_cloud(3, 1.0);
        let weights = SkinWeights::from_rows(&[vec![1.0], vec![1.0]], 1).expect("weights");

        let result = transfer_weights(&predicted, &predicted, &weights, 4);
        assert!(matches!(result, Err(MergeError::ShapeMismatch { .. })));
    }

    #[test]
    fn given_too_many_influences_when_transferring_then_option_error_is_returned() {
        let predicted = line_cloud(2, 1.0);
        let weights = SkinWeights::from_rows(&[vec![1.0], vec![1.0]], 1).expect("weights");

        let result = transfer_weights(&predicted, &predicted, &weights, 5);
        assert!(matches!(result, Err(MergeError::InvalidOption(_))));
    }
}
