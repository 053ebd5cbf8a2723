use std::collections::{HashMap, HashSet};

use log::warn;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::MergeError;

use super::types::{Bone, BoneSegment, Skeleton};

/// Mixamo-style bone names mapped to VRM humanoid names.
pub const HUMANOID_BONE_MAP: [(&str, &str); 22] = [
    ("Hips", "hips"),
    ("Spine", "spine"),
    ("Spine1", "chest"),
    ("Spine2", "upperChest"),
    ("Neck", "neck"),
    ("Head", "head"),
    ("LeftShoulder", "leftShoulder"),
    ("LeftArm", "leftUpperArm"),
    ("LeftForeArm", "leftLowerArm"),
    ("LeftHand", "leftHand"),
    ("RightShoulder", "rightShoulder"),
    ("RightArm", "rightUpperArm"),
    ("RightForeArm", "rightLowerArm"),
    ("RightHand", "rightHand"),
    ("LeftUpLeg", "leftUpperLeg"),
    ("LeftLeg", "leftLowerLeg"),
    ("LeftFoot", "leftFoot"),
    ("LeftToeBase", "leftToes"),
    ("RightUpLeg", "rightUpperLeg"),
    ("RightLeg", "rightLowerLeg"),
    ("RightFoot", "rightFoot"),
    ("RightToeBase", "rightToes"),
];

/// Tail offset used for leaves and roots without any direction to follow.
const FALLBACK_TAIL_OFFSET: f32 = 0.1;

// ─── Bone name mapping ────────────────────────────────────────────────────────

/// Injectable source-name to output-name table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoneNameMap(HashMap<String, String>);

impl BoneNameMap {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(source, target)| (source.to_string(), target.to_string()))
                .collect(),
        )
    }

    /// Built-in Mixamo-to-VRM humanoid table.
    pub fn humanoid() -> Self {
        Self::from_pairs(HUMANOID_BONE_MAP)
    }

    /// Lookup with a `prefix:` namespace (e.g. `mixamorig:Hips`) stripped as a
    /// fallback.
    pub fn map<'a>(&'a self, name: &'a str) -> &'a str {
        if let Some(mapped) = self.0.get(name) {
            return mapped;
        }
        name.rsplit_once(':')
            .and_then(|(_, bare)| self.0.get(bare))
            .map(String::as_str)
            .unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ─── Skeleton building ────────────────────────────────────────────────────────

/// Options for [`build_skeleton`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SkeletonOptions<'a> {
    /// Prepend a root bone at the world origin and parent every original root
    /// to it.
    pub add_synthetic_root: bool,
    pub root_bone_name: &'a str,
    pub name_map: Option<&'a BoneNameMap>,
}

/// Materialize a world-space skeleton from bone segments and parent indices.
///
/// Parents must already be topologically ordered (`parents[i] < i`) with bone
/// 0 as a root. Without a synthetic root, bone 0 must be the only root.
pub fn build_skeleton(
    world_bones: &[BoneSegment],
    parents: &[Option<usize>],
    names: &[String],
    options: SkeletonOptions<'_>,
) -> Result<Skeleton, MergeError> {
    if world_bones.is_empty() {
        return Err(MergeError::EmptySkeleton);
    }
    if parents.len() != world_bones.len() {
        return Err(MergeError::ShapeMismatch {
            what: "parent indices",
            expected: world_bones.len(),
            actual: parents.len(),
        });
    }
    if names.len() != world_bones.len() {
        return Err(MergeError::ShapeMismatch {
            what: "bone names",
            expected: world_bones.len(),
            actual: names.len(),
        });
    }
    validate_topological_order(parents, options.add_synthetic_root)?;

    let source_offset = usize::from(options.add_synthetic_root);
    let mut bones = Vec::with_capacity(world_bones.len() + source_offset);

    if options.add_synthetic_root {
        let origin = Point3::origin();
        let first_root_head = world_bones[0].head;
        let tail = if (first_root_head - origin).norm() > f32::EPSILON {
            first_root_head
        } else {
            origin + Vector3::y() * FALLBACK_TAIL_OFFSET
        };
        bones.push(Bone {
            name: options.root_bone_name.to_string(),
            head: origin,
            tail,
            parent: None,
        });
    }

    for ((segment, parent), name) in world_bones.iter().zip(parents).zip(names) {
        let name = options
            .name_map
            .map(|map| map.map(name))
            .unwrap_or(name.as_str());
        let parent = match parent {
            Some(parent) => Some(parent + source_offset),
            None if options.add_synthetic_root => Some(0),
            None => None,
        };

        bones.push(Bone {
            name: name.to_string(),
            head: segment.head,
            tail: segment.tail,
            parent,
        });
    }

    make_names_unique(&mut bones);

    Ok(Skeleton {
        bones,
        source_offset,
    })
}

fn validate_topological_order(
    parents: &[Option<usize>],
    allow_multiple_roots: bool,
) -> Result<(), MergeError> {
    if let Some(parent) = parents[0] {
        return Err(MergeError::InvalidHierarchy {
            bone: 0,
            reason: format!("first bone must be a root, found parent {parent}"),
        });
    }

    for (bone, parent) in parents.iter().enumerate().skip(1) {
        match parent {
            Some(parent) if *parent >= bone => {
                return Err(MergeError::InvalidHierarchy {
                    bone,
                    reason: format!("parent {parent} does not precede the bone"),
                });
            }
            None if !allow_multiple_roots => {
                return Err(MergeError::InvalidHierarchy {
                    bone,
                    reason: "additional root bone; enable the synthetic root to merge roots"
                        .to_string(),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

/// Suffix repeated names with `.001`, `.002`, ... in bone order.
fn make_names_unique(bones: &mut [Bone]) {
    let mut taken: HashSet<String> = HashSet::new();
    for index in 0..bones.len() {
        if taken.insert(bones[index].name.clone()) {
            continue;
        }

        let base = bones[index].name.clone();
        let mut counter = 1usize;
        let unique = loop {
            let candidate = format!("{base}.{counter:03}");
            if !taken.contains(&candidate) {
                break candidate;
            }
            counter += 1;
        };
        warn!("bone {index} renamed from duplicate name {base} to {unique}");
        taken.insert(unique.clone());
        bones[index].name = unique;
    }
}

// ─── Tail derivation ──────────────────────────────────────────────────────────

/// Tails for predictors that only emit joint heads: the first child's head,
/// else the head pushed along the parent-to-bone direction by half the parent
/// bone's length, else a short +Y offset.
pub fn derive_tails(heads: &[Point3<f32>], parents: &[Option<usize>]) -> Vec<Point3<f32>> {
    heads
        .iter()
        .enumerate()
        .map(|(bone, head)| {
            let first_child = parents
                .iter()
                .position(|parent| *parent == Some(bone))
                .filter(|&child| (heads[child] - head).norm() > f32::EPSILON);
            if let Some(child) = first_child {
                return heads[child];
            }

            let direction = parents
                .get(bone)
                .copied()
                .flatten()
                .and_then(|parent| heads.get(parent))
                .map(|parent_head| head - parent_head)
                .filter(|offset| offset.norm() > f32::EPSILON);
            match direction {
                Some(offset) => head + offset * 0.5,
                None => head + Vector3::y() * FALLBACK_TAIL_OFFSET,
            }
        })
        .collect()
}
