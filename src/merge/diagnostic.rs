use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

use super::types::{MergeReport, RiggedMesh};

// ─── Diagnostic structs ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct BoneDiagnostic {
    index: usize,
    name: String,
    parent_index: Option<usize>,
    parent_name: Option<String>,
    head: [f32; 3],
    tail: [f32; 3],
    length: f32,
    /// Target vertices listing this bone among their influences.
    influenced_vertices: usize,
    /// Target vertices whose strongest influence is this bone.
    dominant_vertices: usize,
}

#[derive(Debug, Clone, Serialize)]
struct MergeDiagnosticLog<'a> {
    output_path: String,
    report: &'a MergeReport,
    unbound_vertices: usize,
    max_influences_used: usize,
    bones: Vec<BoneDiagnostic>,
}

// ─── Path helper ──────────────────────────────────────────────────────────────

pub fn diagnostic_path_for_output(output_path: &Path) -> PathBuf {
    output_path.with_extension("diagnostic.json")
}

// ─── Diagnostic writer ────────────────────────────────────────────────────────

/// Write a JSON summary of `rigged` (report, skeleton, per-bone influence
/// counts) next to the exported file.
pub fn write_merge_diagnostic(
    rigged: &RiggedMesh,
    output_path: &Path,
    diagnostic_path: &Path,
) -> Result<()> {
    let bones = rigged.skeleton.bones();
    let mut influenced = vec![0usize; bones.len()];
    let mut dominant = vec![0usize; bones.len()];

    for binding in &rigged.bindings {
        for &(bone, _) in binding.influences() {
            if let Some(count) = influenced.get_mut(bone) {
                *count += 1;
            }
        }
        if let Some(count) = binding
            .influences()
            .first()
            .and_then(|&(bone, _)| dominant.get_mut(bone))
        {
            *count += 1;
        }
    }

    let bone_diagnostics = bones
        .iter()
        .enumerate()
        .map(|(index, bone)| BoneDiagnostic {
            index,
            name: bone.name.clone(),
            parent_index: bone.parent,
            parent_name: bone
                .parent
                .and_then(|parent| bones.get(parent))
                .map(|parent| parent.name.clone()),
            head: [bone.head.x, bone.head.y, bone.head.z],
            tail: [bone.tail.x, bone.tail.y, bone.tail.z],
            length: bone.length(),
            influenced_vertices: influenced[index],
            dominant_vertices: dominant[index],
        })
        .collect();

    let diagnostic = MergeDiagnosticLog {
        output_path: output_path.display().to_string(),
        report: &rigged.report,
        unbound_vertices: rigged.bindings.iter().filter(|b| b.is_empty()).count(),
        max_influences_used: rigged
            .bindings
            .iter()
            .map(|b| b.influences().len())
            .max()
            .unwrap_or(0),
        bones: bone_diagnostics,
    };

    let json_bytes = serde_json::to_vec_pretty(&diagnostic)
        .context("failed to serialize merge diagnostic JSON")?;
    fs::write(diagnostic_path, json_bytes).with_context(|| {
        format!(
            "failed to write merge diagnostic log: {}",
            diagnostic_path.display()
        )
    })?;

    Ok(())
}
