use std::fmt;

use log::{debug, info};
use nalgebra::Point3;
use rand::{SeedableRng, rngs::StdRng, seq::index};

use crate::error::MergeError;

use super::spatial::SpatialIndex;
use super::types::{BoneSegment, OrientationOptions};

const AXIS_PERMUTATIONS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

// ─── Axis transforms ──────────────────────────────────────────────────────────

/// Signed axis permutation: output axis `i` takes `signs[i] * input[permutation[i]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisTransform {
    pub permutation: [usize; 3],
    pub signs: [f32; 3],
}

impl AxisTransform {
    pub const IDENTITY: Self = Self {
        permutation: [0, 1, 2],
        signs: [1.0, 1.0, 1.0],
    };

    /// All 48 permutation/sign combinations, identity first.
    pub fn candidates() -> Vec<Self> {
        let mut candidates = Vec::with_capacity(48);
        for permutation in AXIS_PERMUTATIONS {
            for mask in 0..8u8 {
                let sign = |axis: u8| -> f32 { if mask & (1 << axis) != 0 { -1.0 } else { 1.0 } };
                candidates.push(Self {
                    permutation,
                    signs: [sign(0), sign(1), sign(2)],
                });
            }
        }
        candidates
    }

    pub fn apply(&self, point: &Point3<f32>) -> Point3<f32> {
        Point3::new(
            self.signs[0] * point[self.permutation[0]],
            self.signs[1] * point[self.permutation[1]],
            self.signs[2] * point[self.permutation[2]],
        )
    }

    pub fn apply_all(&self, points: &[Point3<f32>]) -> Vec<Point3<f32>> {
        points.iter().map(|p| self.apply(p)).collect()
    }

    pub fn inverse(&self) -> Self {
        let mut inverse = Self::IDENTITY;
        for axis in 0..3 {
            inverse.permutation[self.permutation[axis]] = axis;
            inverse.signs[self.permutation[axis]] = self.signs[axis];
        }
        inverse
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// True when the transform flips handedness.
    pub fn is_mirroring(&self) -> bool {
        let sign_product: f32 = self.signs.iter().product();
        let [a, b, c] = self.permutation;
        let inversions = [(a, b), (a, c), (b, c)]
            .iter()
            .filter(|(lhs, rhs)| lhs > rhs)
            .count();
        let parity = if inversions % 2 == 0 { 1.0 } else { -1.0 };
        sign_product * parity < 0.0
    }
}

impl fmt::Display for AxisTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const AXES: [char; 3] = ['x', 'y', 'z'];
        let parts: Vec<String> = (0..3)
            .map(|axis| {
                let sign = if self.signs[axis] < 0.0 { '-' } else { '+' };
                format!("{sign}{}", AXES[self.permutation[axis]])
            })
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

// ─── Resolution ───────────────────────────────────────────────────────────────

/// Outcome of the 48-candidate orientation search.
#[derive(Debug, Clone)]
pub struct OrientationResolution {
    pub transform: AxisTransform,
    /// Mean nearest-neighbour distance of the chosen candidate.
    pub loss: f32,
    pub identity_loss: f32,
    /// Smallest loss among the other 47 candidates.
    pub runner_up_loss: Option<f32>,
    /// Runner-up within the tie tolerance of the best loss.
    pub ambiguous: bool,
    pub sampled_points: usize,
    pub aligned_vertices: Vec<Point3<f32>>,
    pub aligned_bones: Vec<BoneSegment>,
}

/// Find the signed axis permutation that best aligns `predicted_vertices` to
/// `target_vertices` and apply it to the full cloud and to every bone.
pub fn resolve(
    predicted_vertices: &[Point3<f32>],
    target_vertices: &[Point3<f32>],
    predicted_bones: &[BoneSegment],
    options: &OrientationOptions,
) -> Result<OrientationResolution, MergeError> {
    if target_vertices.is_empty() {
        return Err(MergeError::EmptyInput {
            what: "target vertices",
        });
    }
    if options.sample_size == 0 {
        return Err(MergeError::InvalidOption(
            "orientation sample size must be positive".to_string(),
        ));
    }

    let sample = subsample(predicted_vertices, options.sample_size, options.seed);
    if sample.is_empty() {
        return Err(MergeError::EmptyIndex);
    }

    let mut losses = Vec::with_capacity(48);
    for candidate in AxisTransform::candidates() {
        let index = SpatialIndex::build(&candidate.apply_all(&sample))?;
        let loss = index.mean_nearest_distance(target_vertices);
        debug!("orientation candidate {candidate}: loss {loss:.6}");
        losses.push((candidate, loss));
    }

    let identity_loss = losses[0].1;
    let mut best = 0usize;
    for (position, (_, loss)) in losses.iter().enumerate().skip(1) {
        if *loss < losses[best].1 {
            best = position;
        }
    }
    let (transform, loss) = losses[best];

    let runner_up_loss = losses
        .iter()
        .enumerate()
        .filter(|(position, _)| *position != best)
        .map(|(_, (_, loss))| *loss)
        .fold(None, |acc: Option<f32>, loss| match acc {
            Some(current) if current <= loss => Some(current),
            _ => Some(loss),
        });
    let ambiguous = runner_up_loss
        .map(|runner_up| runner_up - loss <= options.tie_tolerance * loss.max(f32::EPSILON))
        .unwrap_or(false);

    info!(
        "orientation resolved to {transform} (loss {loss:.6}, identity {identity_loss:.6}, {} sampled points)",
        sample.len()
    );

    let aligned_bones = predicted_bones
        .iter()
        .map(|bone| BoneSegment::new(transform.apply(&bone.head), transform.apply(&bone.tail)))
        .collect();

    Ok(OrientationResolution {
        transform,
        loss,
        identity_loss,
        runner_up_loss,
        ambiguous,
        sampled_points: sample.len(),
        aligned_vertices: transform.apply_all(predicted_vertices),
        aligned_bones,
    })
}

/// At most `sample_size` points drawn without replacement. Small clouds are
/// returned whole and in order.
fn subsample(points: &[Point3<f32>], sample_size: usize, seed: Option<u64>) -> Vec<Point3<f32>> {
    if points.len() <= sample_size {
        return points.to_vec();
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    index::sample(&mut rng, points.len(), sample_size)
        .into_iter()
        .map(|i| points[i])
        .collect()
}
