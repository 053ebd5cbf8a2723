use std::{borrow::Cow, fs, path::Path};

use anyhow::{Context, Result, bail};
use gltf::binary::{Glb, Header};
use log::{debug, warn};
use nalgebra::{Matrix4, Point3, Translation3};
use serde_json::{Value, json};

use crate::error::MergeError;
use crate::merge::{MAX_INFLUENCES, Mesh, RiggedMesh};

use super::{MeshExporter, MeshImporter};

const COMPONENT_UNSIGNED_SHORT: u64 = 5123;
const COMPONENT_UNSIGNED_INT: u64 = 5125;
const COMPONENT_FLOAT: u64 = 5126;
const TARGET_ARRAY_BUFFER: u64 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u64 = 34963;
const MODE_TRIANGLES: u64 = 4;

// ─── Import ───────────────────────────────────────────────────────────────────

/// Reads `.gltf`/`.glb` files, flattening every triangle primitive of the
/// default scene into one world-space mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct GltfImporter;

impl MeshImporter for GltfImporter {
    fn import(&self, path: &Path) -> Result<Mesh, MergeError> {
        read_gltf_mesh(path).map_err(|err| MergeError::Load {
            path: path.to_path_buf(),
            reason: format!("{err:#}"),
        })
    }
}

fn read_gltf_mesh(path: &Path) -> Result<Mesh> {
    let (document, buffers, _) = gltf::import(path)
        .with_context(|| format!("failed to parse glTF: {}", path.display()))?;

    let mut mesh = Mesh::default();
    match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => {
            for node in scene.nodes() {
                collect_node(&node, &Matrix4::identity(), &buffers, &mut mesh);
            }
        }
        None => {
            for source in document.meshes() {
                append_primitives(&source, &Matrix4::identity(), &buffers, &mut mesh);
            }
        }
    }

    if mesh.vertices.is_empty() {
        bail!("no triangle geometry found in {}", path.display());
    }
    debug!(
        "imported {} vertices / {} faces from {}",
        mesh.vertices.len(),
        mesh.faces.len(),
        path.display()
    );
    Ok(mesh)
}

fn collect_node(
    node: &gltf::Node,
    parent_world: &Matrix4<f32>,
    buffers: &[gltf::buffer::Data],
    out: &mut Mesh,
) {
    let world = parent_world * Matrix4::from(node.transform().matrix());
    if let Some(source) = node.mesh() {
        append_primitives(&source, &world, buffers, out);
    }
    for child in node.children() {
        collect_node(&child, &world, buffers, out);
    }
}

fn append_primitives(
    source: &gltf::Mesh,
    world: &Matrix4<f32>,
    buffers: &[gltf::buffer::Data],
    out: &mut Mesh,
) {
    for primitive in source.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            warn!(
                "skipping non-triangle primitive {} of mesh {:?}",
                primitive.index(),
                source.name()
            );
            continue;
        }
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
        let Some(positions) = reader.read_positions() else {
            continue;
        };

        let base = out.vertices.len();
        out.vertices
            .extend(positions.map(|p| world.transform_point(&Point3::from(p))));
        let count = out.vertices.len() - base;

        let indices: Vec<usize> = match reader.read_indices() {
            Some(indices) => indices.into_u32().map(|index| index as usize).collect(),
            None => (0..count).collect(),
        };
        out.faces.extend(
            indices
                .chunks_exact(3)
                .map(|tri| tri.iter().map(|&index| base + index).collect()),
        );
    }
}

// ─── Export ───────────────────────────────────────────────────────────────────

/// Writes a skinned binary glTF: one mesh node bound to one skin whose
/// joints are the skeleton bones in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlbExporter;

impl MeshExporter for GlbExporter {
    fn export(&self, rigged: &RiggedMesh, path: &Path) -> Result<(), MergeError> {
        write_rigged_glb(rigged, path).map_err(|err| MergeError::Export {
            path: path.to_path_buf(),
            reason: format!("{err:#}"),
        })
    }
}

fn write_rigged_glb(rigged: &RiggedMesh, path: &Path) -> Result<()> {
    let bytes = encode_rigged_glb(rigged)?;
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write output: {}", path.display()))
}

/// Encode `rigged` as GLB bytes.
pub fn encode_rigged_glb(rigged: &RiggedMesh) -> Result<Vec<u8>> {
    let vertices = &rigged.mesh.vertices;
    let bones = rigged.skeleton.bones();
    if rigged.bindings.len() != vertices.len() {
        bail!(
            "binding count {} does not match vertex count {}",
            rigged.bindings.len(),
            vertices.len()
        );
    }
    if bones.len() > usize::from(u16::MAX) + 1 {
        bail!("{} bones exceed the JOINTS_0 u16 range", bones.len());
    }

    let mut builder = BufferBuilder::default();

    // POSITION
    let (min, max) = position_bounds(vertices);
    let position_bytes: Vec<u8> = vertices
        .iter()
        .flat_map(|p| [p.x, p.y, p.z])
        .flat_map(f32::to_le_bytes)
        .collect();
    let position_view = builder.push_view(position_bytes, Some(TARGET_ARRAY_BUFFER));
    let position_accessor = builder.push_accessor(json!({
        "bufferView": position_view,
        "componentType": COMPONENT_FLOAT,
        "count": vertices.len(),
        "type": "VEC3",
        "min": min,
        "max": max,
    }));

    // JOINTS_0 / WEIGHTS_0, unused lanes zeroed. glTF needs every weight
    // row to sum to one, so unbound vertices follow joint 0 fully.
    let mut joint_bytes = Vec::with_capacity(vertices.len() * MAX_INFLUENCES * 2);
    let mut weight_bytes = Vec::with_capacity(vertices.len() * MAX_INFLUENCES * 4);
    const UNBOUND: [(usize, f32); 1] = [(0, 1.0)];
    for binding in &rigged.bindings {
        let influences = if binding.is_empty() {
            &UNBOUND[..]
        } else {
            binding.influences()
        };
        for lane in 0..MAX_INFLUENCES {
            let (bone, weight) = influences.get(lane).copied().unwrap_or((0, 0.0));
            joint_bytes.extend_from_slice(&(bone as u16).to_le_bytes());
            weight_bytes.extend_from_slice(&weight.to_le_bytes());
        }
    }
    let joints_view = builder.push_view(joint_bytes, Some(TARGET_ARRAY_BUFFER));
    let joints_accessor = builder.push_accessor(json!({
        "bufferView": joints_view,
        "componentType": COMPONENT_UNSIGNED_SHORT,
        "count": vertices.len(),
        "type": "VEC4",
    }));
    let weights_view = builder.push_view(weight_bytes, Some(TARGET_ARRAY_BUFFER));
    let weights_accessor = builder.push_accessor(json!({
        "bufferView": weights_view,
        "componentType": COMPONENT_FLOAT,
        "count": vertices.len(),
        "type": "VEC4",
    }));

    let mut primitive = json!({
        "attributes": {
            "POSITION": position_accessor,
            "JOINTS_0": joints_accessor,
            "WEIGHTS_0": weights_accessor,
        },
        "mode": MODE_TRIANGLES,
    });

    let indices = rigged.mesh.triangle_indices();
    if !indices.is_empty() {
        let index_bytes: Vec<u8> = indices
            .iter()
            .flat_map(|&index| (index as u32).to_le_bytes())
            .collect();
        let index_view = builder.push_view(index_bytes, Some(TARGET_ELEMENT_ARRAY_BUFFER));
        let index_accessor = builder.push_accessor(json!({
            "bufferView": index_view,
            "componentType": COMPONENT_UNSIGNED_INT,
            "count": indices.len(),
            "type": "SCALAR",
        }));
        primitive["indices"] = Value::from(index_accessor);
    }

    // Bones carry translation only, so the bind pose is a pure translation.
    let ibm_bytes: Vec<u8> = bones
        .iter()
        .flat_map(|bone| {
            let bind = Translation3::from(bone.head.coords).inverse().to_homogeneous();
            bind.as_slice().to_vec()
        })
        .flat_map(f32::to_le_bytes)
        .collect();
    let ibm_view = builder.push_view(ibm_bytes, None);
    let ibm_accessor = builder.push_accessor(json!({
        "bufferView": ibm_view,
        "componentType": COMPONENT_FLOAT,
        "count": bones.len(),
        "type": "MAT4",
    }));

    let mut nodes: Vec<Value> = bones
        .iter()
        .enumerate()
        .map(|(index, bone)| {
            let local = match bone.parent.and_then(|parent| bones.get(parent)) {
                Some(parent) => bone.head - parent.head,
                None => bone.head.coords,
            };
            let mut node = json!({
                "name": bone.name,
                "translation": [local.x, local.y, local.z],
                "extras": { "tail": [bone.tail.x, bone.tail.y, bone.tail.z] },
            });
            let children: Vec<usize> = rigged.skeleton.children(index).collect();
            if !children.is_empty() {
                node["children"] = json!(children);
            }
            node
        })
        .collect();
    let mesh_node = nodes.len();
    nodes.push(json!({ "name": "mesh", "mesh": 0, "skin": 0 }));

    let mut scene_nodes = vec![mesh_node];
    scene_nodes.extend(
        bones
            .iter()
            .enumerate()
            .filter(|(_, bone)| bone.parent.is_none())
            .map(|(index, _)| index),
    );

    let mut skin = json!({
        "joints": (0..bones.len()).collect::<Vec<_>>(),
        "inverseBindMatrices": ibm_accessor,
    });
    if let Some(root) = bones.iter().position(|bone| bone.parent.is_none()) {
        skin["skeleton"] = Value::from(root);
    }

    let BufferBuilder {
        bin,
        buffer_views,
        accessors,
    } = builder;
    let document = json!({
        "asset": { "version": "2.0", "generator": concat!("rigmerge ", env!("CARGO_PKG_VERSION")) },
        "scene": 0,
        "scenes": [{ "nodes": scene_nodes }],
        "nodes": nodes,
        "meshes": [{ "name": "mesh", "primitives": [primitive] }],
        "skins": [skin],
        "accessors": accessors,
        "bufferViews": buffer_views,
        "buffers": [{ "byteLength": bin.len() }],
    });

    let json_bytes = serde_json::to_vec(&document).context("failed to serialize glTF JSON")?;
    let glb = Glb {
        header: Header {
            magic: *b"glTF",
            version: 2,
            length: 0,
        },
        json: Cow::Owned(json_bytes),
        bin: Some(Cow::Owned(bin)),
    };

    let mut out = Vec::new();
    glb.to_writer(&mut out)
        .context("failed to write output GLB")?;
    Ok(out)
}

// ─── Buffer assembly ──────────────────────────────────────────────────────────

#[derive(Default)]
struct BufferBuilder {
    bin: Vec<u8>,
    buffer_views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BufferBuilder {
    /// Append `bytes` on a 4-byte boundary and return the new view index.
    fn push_view(&mut self, mut bytes: Vec<u8>, target: Option<u64>) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.bin.len(),
            "byteLength": bytes.len(),
        });
        if let Some(target) = target {
            view["target"] = Value::from(target);
        }
        self.bin.append(&mut bytes);
        self.buffer_views.push(view);
        self.buffer_views.len() - 1
    }

    fn push_accessor(&mut self, accessor: Value) -> usize {
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }
}

fn position_bounds(vertices: &[Point3<f32>]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for p in vertices {
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    if vertices.is_empty() {
        return ([0.0; 3], [0.0; 3]);
    }
    (min, max)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use nalgebra::Vector3;

    use crate::merge::{
        BoneSegment, MergeOptions, Prediction, SkinWeights, VertexBoneBinding, merge,
    };

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rigmerge-glb-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir.join(name)
    }

    fn rigged_column() -> RiggedMesh {
        let vertices: Vec<Point3<f32>> = (0..12)
            .map(|i| {
                let y = (i / 4) as f32;
                let corner = i % 4;
                Point3::new(
                    if corner & 1 == 0 { -0.2 } else { 0.2 },
                    y,
                    if corner & 2 == 0 { -0.2 } else { 0.2 },
                )
            })
            .collect();
        let faces = vec![
            vec![0, 1, 5, 4],
            vec![4, 5, 9, 8],
            vec![2, 3, 7, 6],
            vec![6, 7, 11, 10],
        ];
        // The column spans y in [0, 2], so the normalized frame is a unit
        // shift down with scale 1.
        let predicted: Vec<Point3<f32>> = vertices
            .iter()
            .map(|p| p - Vector3::new(0.0, 1.0, 0.0))
            .collect();
        let rows: Vec<Vec<f32>> = predicted
            .iter()
            .map(|p| if p.y < 0.0 { vec![1.0, 0.0] } else { vec![0.3, 0.7] })
            .collect();
        let prediction = Prediction {
            vertices: predicted,
            bones: vec![
                BoneSegment::new(Point3::new(0.0, -1.0, 0.0), Point3::origin()),
                BoneSegment::new(Point3::origin(), Point3::new(0.0, 1.0, 0.0)),
            ],
            parents: vec![None, Some(0)],
            names: vec!["hips".to_string(), "spine".to_string()],
            weights: SkinWeights::from_rows(&rows, 2).expect("weights"),
        };

        let options = MergeOptions {
            add_synthetic_root: true,
            ..MergeOptions::default()
        };
        merge(Mesh::new(vertices, faces), &prediction, &options).expect("merge")
    }

    #[test]
    fn given_rigged_mesh_when_exporting_then_importer_reads_same_geometry() {
        let rigged = rigged_column();
        let path = temp_path("roundtrip.glb");

        GlbExporter.export(&rigged, &path).expect("export");
        let imported = GltfImporter.import(&path).expect("import");

        assert_eq!(imported.vertices.len(), rigged.mesh.vertices.len());
        for (a, b) in imported.vertices.iter().zip(&rigged.mesh.vertices) {
            assert!((a - b).norm() < 1e-6);
        }
        // Quads come back as two triangles each.
        assert_eq!(imported.faces.len(), rigged.mesh.faces.len() * 2);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn given_rigged_mesh_when_exporting_then_skin_joints_and_weights_match_bindings() {
        let mut rigged = rigged_column();
        // Degenerate vertex left without influences by the transfer.
        rigged.bindings[0] = VertexBoneBinding::empty();
        let path = temp_path("skin.glb");
        GlbExporter.export(&rigged, &path).expect("export");

        let (document, buffers, _) = gltf::import(&path).expect("parse output");
        let skin = document.skins().next().expect("skin");
        assert_eq!(skin.joints().count(), rigged.skeleton.len());
        let joint_names: Vec<String> = skin
            .joints()
            .map(|joint| joint.name().unwrap_or_default().to_string())
            .collect();
        assert_eq!(joint_names, vec!["Root", "hips", "spine"]);

        let primitive = document
            .meshes()
            .next()
            .and_then(|mesh| mesh.primitives().next())
            .expect("primitive");
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
        let joints: Vec<[u16; 4]> = reader
            .read_joints(0)
            .expect("joints")
            .into_u16()
            .collect();
        let weights: Vec<[f32; 4]> = reader
            .read_weights(0)
            .expect("weights")
            .into_f32()
            .collect();

        for (vertex, binding) in rigged.bindings.iter().enumerate() {
            for (lane, &(bone, weight)) in binding.influences().iter().enumerate() {
                assert_eq!(usize::from(joints[vertex][lane]), bone);
                assert!((weights[vertex][lane] - weight).abs() < 1e-6);
            }
        }
        assert_eq!(joints[0], [0, 0, 0, 0]);
        assert_eq!(weights[0], [1.0, 0.0, 0.0, 0.0]);
        for row in &weights {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }

        let ibm: Vec<[[f32; 4]; 4]> = skin
            .reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]))
            .read_inverse_bind_matrices()
            .expect("inverse bind matrices")
            .collect();
        let spine = rigged.skeleton.find("spine").expect("spine bone");
        assert!((ibm[spine][3][1] + rigged.skeleton.bones()[spine].head.y).abs() < 1e-6);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn given_mismatched_bindings_when_encoding_then_error_is_returned() {
        let mut rigged = rigged_column();
        rigged.bindings.pop();

        assert!(encode_rigged_glb(&rigged).is_err());
    }

    #[test]
    fn given_missing_file_when_importing_then_load_error_is_returned() {
        let path = temp_path("does-not-exist.glb");

        assert!(matches!(
            GltfImporter.import(&path),
            Err(MergeError::Load { .. })
        ));
    }
}
