use std::collections::HashSet;

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point3, Rotation3};

use crate::error::MergeError;

/// Fixed, non-axis-aligned frame the tree is built in. Mesh data is full of
/// points sharing one coordinate (flat faces, axis-aligned panels, sampled
/// slices), and a k-d bucket whose points all share the split coordinate
/// cannot be split. Seen from this frame such points no longer line up.
const INDEX_FRAME_ANGLES: (f32, f32, f32) = (0.613_524_1, 0.371_904_6, 1.127_353_8);

/// Nearest indexed point for a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    /// Position of the point in the slice the index was built from.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f32,
}

/// Static k-d tree over a point set.
///
/// Coincident points are stored once, under the lowest input index, so a
/// query landing on a duplicated position always reports that index.
pub struct SpatialIndex {
    tree: KdTree<f32, 3>,
    frame: Rotation3<f32>,
    points: Vec<Point3<f32>>,
}

impl SpatialIndex {
    /// Index `points`. Fails with [`MergeError::EmptyIndex`] when there is
    /// nothing to index, so queries never run against an empty tree.
    pub fn build(points: &[Point3<f32>]) -> Result<Self, MergeError> {
        if points.is_empty() {
            return Err(MergeError::EmptyIndex);
        }
        if let Some(index) = points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(MergeError::NonFiniteInput {
                what: "indexed points",
                index,
            });
        }

        let (roll, pitch, yaw) = INDEX_FRAME_ANGLES;
        let frame = Rotation3::from_euler_angles(roll, pitch, yaw);

        let mut tree: KdTree<f32, 3> = KdTree::with_capacity(points.len());
        let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(points.len());
        for (index, point) in points.iter().enumerate() {
            let coords = index_coords(&frame, point);
            // +0.0 folds -0.0 into the same key
            let key = coords.map(|c| (c + 0.0).to_bits());
            if !seen.insert(key) {
                continue;
            }
            tree.add(&coords, index as u64);
        }

        Ok(Self {
            tree,
            frame,
            points: points.to_vec(),
        })
    }

    pub fn query_nearest(&self, query: &Point3<f32>) -> Nearest {
        let found = self
            .tree
            .nearest_one::<SquaredEuclidean>(&index_coords(&self.frame, query));
        let index = found.item as usize;

        Nearest {
            index,
            distance: (self.points[index] - query).norm(),
        }
    }

    /// Mean nearest-neighbour distance of `queries` against this index.
    pub fn mean_nearest_distance(&self, queries: &[Point3<f32>]) -> f32 {
        if queries.is_empty() {
            return 0.0;
        }

        let total: f64 = queries
            .iter()
            .map(|query| self.query_nearest(query).distance as f64)
            .sum();
        (total / queries.len() as f64) as f32
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn index_coords(frame: &Rotation3<f32>, point: &Point3<f32>) -> [f32; 3] {
    let p = frame * point;
    [p.x, p.y, p.z]
}
