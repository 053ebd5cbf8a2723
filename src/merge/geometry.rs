use nalgebra::{Point3, Vector3};

use crate::error::MergeError;

use super::types::BoneSegment;

// ─── Normalization frame ──────────────────────────────────────────────────────

/// Affine map between the predictor's normalized space and a target mesh's
/// world space: `world = normalized * scale + center`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationFrame {
    pub center: Vector3<f32>,
    pub scale: f32,
}

impl NormalizationFrame {
    /// Frame fitted to the bounding box of `target_vertices`: center of the box
    /// and half of its largest extent. A box with no extent keeps unit scale.
    pub fn from_target(target_vertices: &[Point3<f32>]) -> Result<Self, MergeError> {
        let (min, max) = bounding_box(target_vertices).ok_or(MergeError::EmptyInput {
            what: "target vertices",
        })?;

        let center = (min + max) * 0.5;
        let half_extent = (max - min).max() * 0.5;
        let scale = if half_extent > f32::EPSILON {
            half_extent
        } else {
            1.0
        };

        Ok(Self { center, scale })
    }

    pub fn denormalize_point(&self, point: &Point3<f32>) -> Point3<f32> {
        Point3::from(point.coords * self.scale + self.center)
    }

    pub fn normalize_point(&self, point: &Point3<f32>) -> Point3<f32> {
        Point3::from((point.coords - self.center) / self.scale)
    }

    pub fn normalize_points(&self, points: &[Point3<f32>]) -> Vec<Point3<f32>> {
        points.iter().map(|p| self.normalize_point(p)).collect()
    }

    /// Map predicted vertices and bone segments into world space.
    pub fn denormalize(
        &self,
        predicted_vertices: &[Point3<f32>],
        predicted_bones: &[BoneSegment],
    ) -> (Vec<Point3<f32>>, Vec<BoneSegment>) {
        let world_vertices = predicted_vertices
            .iter()
            .map(|p| self.denormalize_point(p))
            .collect();
        let world_bones = predicted_bones
            .iter()
            .map(|bone| {
                BoneSegment::new(
                    self.denormalize_point(&bone.head),
                    self.denormalize_point(&bone.tail),
                )
            })
            .collect();

        (world_vertices, world_bones)
    }
}

/// Fit a frame to `target_vertices` and map the predicted data into it.
pub fn denormalize(
    target_vertices: &[Point3<f32>],
    predicted_vertices: &[Point3<f32>],
    predicted_bones: &[BoneSegment],
) -> Result<(Vec<Point3<f32>>, Vec<BoneSegment>), MergeError> {
    let frame = NormalizationFrame::from_target(target_vertices)?;
    Ok(frame.denormalize(predicted_vertices, predicted_bones))
}

// ─── Bounds ───────────────────────────────────────────────────────────────────

/// Component-wise min/max of a point set, `None` when empty.
pub fn bounding_box(points: &[Point3<f32>]) -> Option<(Vector3<f32>, Vector3<f32>)> {
    let first = points.first()?.coords;
    Some(points.iter().skip(1).fold((first, first), |(min, max), p| {
        (min.inf(&p.coords), max.sup(&p.coords))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_target() -> Vec<Point3<f32>> {
        vec![
            Point3::new(-1.0, 0.0, 2.0),
            Point3::new(3.0, 8.0, 4.0),
            Point3::new(1.0, 4.0, 3.0),
        ]
    }

    #[test]
    fn given_target_box_when_fitting_frame_then_center_and_largest_half_extent_are_used() {
        let frame = NormalizationFrame::from_target(&sample_target()).expect("frame");

        assert!((frame.center - Vector3::new(1.0, 4.0, 3.0)).norm() < 1e-6);
        assert!((frame.scale - 4.0).abs() < 1e-6);
    }

    #[test]
    fn given_normalized_point_when_denormalizing_then_original_is_recovered() {
        let frame = NormalizationFrame::from_target(&sample_target()).expect("frame");

        for p in [
            Point3::new(0.3, -12.5, 7.25),
            Point3::new(-1.0, 1.0, 0.0),
            Point3::new(1000.0, 0.001, -42.0),
        ] {
            let restored = frame.denormalize_point(&frame.normalize_point(&p));
            assert!((restored - p).norm() < 1e-3 * (1.0 + p.coords.norm()));
        }
    }

    #[test]
    fn given_unit_cube_corners_when_denormalizing_then_they_span_target_box() {
        let target = sample_target();
        let predicted = vec![Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0)];
        let bones = vec![BoneSegment::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.5, 0.0),
        )];

        let (world, world_bones) = denormalize(&target, &predicted, &bones).expect("denormalize");

        assert!((world[0] - Point3::new(-3.0, 0.0, -1.0)).norm() < 1e-6);
        assert!((world[1] - Point3::new(5.0, 8.0, 7.0)).norm() < 1e-6);
        assert!((world_bones[0].head - Point3::new(1.0, 4.0, 3.0)).norm() < 1e-6);
        assert!((world_bones[0].tail - Point3::new(1.0, 6.0, 3.0)).norm() < 1e-6);
    }

    #[test]
    fn given_single_point_target_when_fitting_frame_then_unit_scale_keeps_map_invertible() {
        let frame = NormalizationFrame::from_target(&[Point3::new(2.0, 2.0, 2.0)]).expect("frame");
        assert_eq!(frame.scale, 1.0);

        let p = Point3::new(0.5, 0.5, 0.5);
        assert!((frame.denormalize_point(&frame.normalize_point(&p)) - p).norm() < 1e-6);
    }

    #[test]
    fn given_empty_target_when_fitting_frame_then_error_is_returned() {
        assert!(matches!(
            NormalizationFrame::from_target(&[]),
            Err(MergeError::EmptyInput { .. })
        ));
    }
}
