use nalgebra::Point3;

use crate::error::MergeError;

use super::types::{MAX_INFLUENCES, Mesh, MergeOptions, Prediction, ValidationIssue};

/// Reject inputs a merge cannot proceed with; return non-fatal findings.
pub(super) fn validate_merge_inputs(
    target: &Mesh,
    prediction: &Prediction,
    options: &MergeOptions,
) -> Result<Vec<ValidationIssue>, MergeError> {
    if target.vertices.is_empty() {
        return Err(MergeError::EmptyInput {
            what: "target vertices",
        });
    }
    if prediction.vertices.is_empty() {
        return Err(MergeError::EmptyInput {
            what: "predicted vertices",
        });
    }
    if prediction.bones.is_empty() {
        return Err(MergeError::EmptySkeleton);
    }

    let bone_count = prediction.bones.len();
    check_len("parent indices", bone_count, prediction.parents.len())?;
    check_len("bone names", bone_count, prediction.names.len())?;
    check_len(
        "skin weight rows",
        prediction.vertices.len(),
        prediction.weights.vertex_count(),
    )?;
    check_len(
        "skin weight columns",
        bone_count,
        prediction.weights.bone_count(),
    )?;

    if options.max_influences == 0 || options.max_influences > MAX_INFLUENCES {
        return Err(MergeError::InvalidOption(format!(
            "max influences must be between 1 and {MAX_INFLUENCES}, got {}",
            options.max_influences
        )));
    }
    if options.orientation.sample_size == 0 {
        return Err(MergeError::InvalidOption(
            "orientation sample size must be positive".to_string(),
        ));
    }

    check_finite("target vertices", &target.vertices)?;
    check_finite("predicted vertices", &prediction.vertices)?;
    let bone_points: Vec<Point3<f32>> = prediction
        .bones
        .iter()
        .flat_map(|bone| [bone.head, bone.tail])
        .collect();
    if let Some(index) = first_non_finite(&bone_points) {
        return Err(MergeError::NonFiniteInput {
            what: "predicted bones",
            index: index / 2,
        });
    }
    if let Some(index) = prediction.weights.first_non_finite() {
        return Err(MergeError::NonFiniteInput {
            what: "skin weights",
            index,
        });
    }

    let vertex_count = target.vertex_count();
    for (face, corners) in target.faces.iter().enumerate() {
        if let Some(&vertex) = corners.iter().find(|&&vertex| vertex >= vertex_count) {
            return Err(MergeError::InvalidFace {
                face,
                vertex,
                vertex_count,
            });
        }
    }

    let mut issues = Vec::new();

    let degenerate_faces = target.faces.iter().filter(|face| face.len() < 3).count();
    if degenerate_faces > 0 {
        issues.push(ValidationIssue::warning(
            "DEGENERATE_FACES",
            format!("{degenerate_faces} face(s) have fewer than 3 corners and will not be exported"),
        ));
    }

    if prediction.vertices.len() > target.vertex_count() {
        issues.push(ValidationIssue::info(
            "DENSE_PREDICTION",
            format!(
                "predicted cloud has {} points, more than the {} target vertices",
                prediction.vertices.len(),
                target.vertex_count()
            ),
        ));
    }

    let unweighted_rows = (0..prediction.weights.vertex_count())
        .filter(|&row| prediction.weights.row(row).iter().all(|&w| w <= 0.0))
        .count();
    if unweighted_rows > 0 {
        issues.push(ValidationIssue::info(
            "UNWEIGHTED_PREDICTED_VERTICES",
            format!("{unweighted_rows} predicted vertices carry no positive weight"),
        ));
    }

    Ok(issues)
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), MergeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(MergeError::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}

fn check_finite(what: &'static str, points: &[Point3<f32>]) -> Result<(), MergeError> {
    match first_non_finite(points) {
        Some(index) => Err(MergeError::NonFiniteInput { what, index }),
        None => Ok(()),
    }
}

fn first_non_finite(points: &[Point3<f32>]) -> Option<usize> {
    points
        .iter()
        .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
}
