use std::{
    fs,
    ops::Range,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::MergeError;
use crate::format::{MeshExporter, MeshImporter, PredictionLoader};
use crate::logging::ResultExt;
use crate::merge::{
    MergeOptions, MergeReport, diagnostic_path_for_output, merge, write_merge_diagnostic,
};

/// Error values returned by batch entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("shard count must be positive")]
    ZeroShardCount,
    #[error("shard id {id} is out of range for {count} shard(s)")]
    ShardOutOfRange { id: usize, count: usize },
    #[error("--shard-count {count} needs --shard-id (or --all to run every shard)")]
    MissingShardId { count: usize },
}

// ─── Sharding ─────────────────────────────────────────────────────────────────

/// One of `count` contiguous partitions of a work list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    id: usize,
    count: usize,
}

impl Shard {
    pub fn new(id: usize, count: usize) -> Result<Self, PipelineError> {
        if count == 0 {
            return Err(PipelineError::ZeroShardCount);
        }
        if id >= count {
            return Err(PipelineError::ShardOutOfRange { id, count });
        }
        Ok(Self { id, count })
    }

    /// The whole work list as a single shard.
    pub fn all() -> Self {
        Self { id: 0, count: 1 }
    }

    /// Shard selected by optional `--shard-id`/`--shard-count` flags. No
    /// flags selects the whole list; a count without an id is rejected
    /// rather than guessing which shard was meant.
    pub fn from_args(id: Option<usize>, count: Option<usize>) -> Result<Self, PipelineError> {
        match (id, count) {
            (None, None) => Ok(Self::all()),
            (None, Some(count)) => Err(PipelineError::MissingShardId { count }),
            (Some(id), count) => Self::new(id, count.unwrap_or(1)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Item range owned by this shard. Shard sizes differ by at most one and
    /// the ranges of all shards tile `0..len` in order.
    pub fn range(&self, len: usize) -> Range<usize> {
        (len * self.id / self.count)..(len * (self.id + 1) / self.count)
    }
}

// ─── Manifest ─────────────────────────────────────────────────────────────────

/// One merge request of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Predictor output (skeleton and skin weights).
    pub source: PathBuf,
    /// Mesh to rig.
    pub target: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub items: Vec<BatchItem>,
}

/// Load a batch manifest. Relative item paths resolve against the manifest's
/// directory.
pub fn load_manifest(path: &Path) -> Result<BatchManifest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load batch manifest: {}", path.display()))?;
    let mut manifest: BatchManifest =
        serde_json::from_str(&content).context("failed to parse batch manifest JSON")?;

    if let Some(base) = path.parent() {
        for item in &mut manifest.items {
            for item_path in [&mut item.source, &mut item.target, &mut item.output] {
                if item_path.is_relative() {
                    *item_path = base.join(&*item_path);
                }
            }
        }
    }
    Ok(manifest)
}

// ─── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ItemSuccess {
    pub index: usize,
    pub output: PathBuf,
    pub report: MergeReport,
}

#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub index: usize,
    pub output: PathBuf,
    pub error: MergeError,
}

/// Outcome of one or more shards, items in manifest order.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<ItemSuccess>,
    pub failed: Vec<ItemFailure>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn absorb(&mut self, other: BatchSummary) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }
}

// ─── Runner ───────────────────────────────────────────────────────────────────

/// Runs merge requests through a fixed set of adapters and options.
///
/// Every item builds its own engine state; nothing is shared between items
/// except these read-only handles.
pub struct BatchRunner<'a, I, L, E> {
    importer: I,
    loader: L,
    exporter: E,
    options: &'a MergeOptions,
    write_diagnostics: bool,
}

impl<'a, I, L, E> BatchRunner<'a, I, L, E>
where
    I: MeshImporter,
    L: PredictionLoader,
    E: MeshExporter,
{
    pub fn new(importer: I, loader: L, exporter: E, options: &'a MergeOptions) -> Self {
        Self {
            importer,
            loader,
            exporter,
            options,
            write_diagnostics: false,
        }
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.write_diagnostics = enabled;
        self
    }

    /// Load, merge and export one item.
    pub fn run_item(&self, item: &BatchItem) -> Result<MergeReport, MergeError> {
        let prediction = self.loader.load(&item.source)?;
        let target = self.importer.import(&item.target)?;
        let rigged = merge(target, &prediction, self.options)?;
        self.exporter.export(&rigged, &item.output)?;

        if self.write_diagnostics {
            let diagnostic_path = diagnostic_path_for_output(&item.output);
            if let Err(err) = write_merge_diagnostic(&rigged, &item.output, &diagnostic_path) {
                warn!("{err:#}");
            }
        }
        Ok(rigged.report)
    }

    /// Process the items of `shard` one after another. A failed item is
    /// recorded and the shard moves on.
    pub fn run_shard(&self, items: &[BatchItem], shard: Shard) -> BatchSummary {
        let range = shard.range(items.len());
        info!(
            "shard {}/{}: items {}..{} of {}",
            shard.id() + 1,
            shard.count(),
            range.start,
            range.end,
            items.len()
        );

        let mut summary = BatchSummary::default();
        for index in range {
            let item = &items[index];
            let context = format!("item {index} ({})", item.target.display());
            match self.run_item(item).log_error(Some(&context)) {
                Ok(report) => summary.succeeded.push(ItemSuccess {
                    index,
                    output: item.output.clone(),
                    report,
                }),
                Err(error) => summary.failed.push(ItemFailure {
                    index,
                    output: item.output.clone(),
                    error,
                }),
            }
        }
        summary
    }
}

impl<I, L, E> BatchRunner<'_, I, L, E>
where
    I: MeshImporter + Sync,
    L: PredictionLoader + Sync,
    E: MeshExporter + Sync,
{
    /// Run `shard_count` shards on the rayon pool and merge their summaries.
    pub fn run_all_shards(
        &self,
        items: &[BatchItem],
        shard_count: usize,
    ) -> Result<BatchSummary, PipelineError> {
        let shards = (0..shard_count)
            .map(|id| Shard::new(id, shard_count))
            .collect::<Result<Vec<_>, _>>()?;
        if shards.is_empty() {
            return Err(PipelineError::ZeroShardCount);
        }

        let partials: Vec<BatchSummary> = shards
            .into_par_iter()
            .map(|shard| self.run_shard(items, shard))
            .collect();

        let mut summary = BatchSummary::default();
        for partial in partials {
            summary.absorb(partial);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use nalgebra::{Point3, Vector3};

    use crate::merge::{BoneSegment, Mesh, Prediction, RiggedMesh, SkinWeights};

    use super::*;

    struct ColumnImporter;

    impl MeshImporter for ColumnImporter {
        fn import(&self, path: &Path) -> Result<Mesh, MergeError> {
            if path.to_string_lossy().contains("broken") {
                return Err(MergeError::Load {
                    path: path.to_path_buf(),
                    reason: "unreadable".to_string(),
                });
            }
            Ok(Mesh::new(column_vertices(), vec![vec![0, 1, 5, 4]]))
        }
    }

    struct ColumnPrediction;

    impl PredictionLoader for ColumnPrediction {
        fn load(&self, _path: &Path) -> Result<Prediction, MergeError> {
            let vertices: Vec<Point3<f32>> = column_vertices()
                .iter()
                .map(|p| p - Vector3::new(0.0, 1.0, 0.0))
                .collect();
            let rows: Vec<Vec<f32>> = vertices
                .iter()
                .map(|p| if p.y < 0.0 { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect();
            Ok(Prediction {
                vertices,
                bones: vec![
                    BoneSegment::new(Point3::new(0.0, -1.0, 0.0), Point3::origin()),
                    BoneSegment::new(Point3::origin(), Point3::new(0.0, 1.0, 0.0)),
                ],
                parents: vec![None, Some(0)],
                names: vec!["hips".to_string(), "spine".to_string()],
                weights: SkinWeights::from_rows(&rows, 2)?,
            })
        }
    }

    #[derive(Default)]
    struct RecordingExporter {
        written: Mutex<Vec<PathBuf>>,
    }

    impl MeshExporter for RecordingExporter {
        fn export(&self, _rigged: &RiggedMesh, path: &Path) -> Result<(), MergeError> {
            self.written
                .lock()
                .map_err(|_| MergeError::Export {
                    path: path.to_path_buf(),
                    reason: "poisoned".to_string(),
                })?
                .push(path.to_path_buf());
            Ok(())
        }
    }

    fn column_vertices() -> Vec<Point3<f32>> {
        (0..12)
            .map(|i| {
                let corner = i % 4;
                Point3::new(
                    if corner & 1 == 0 { -0.2 } else { 0.2 },
                    (i / 4) as f32,
                    if corner & 2 == 0 { -0.2 } else { 0.2 },
                )
            })
            .collect()
    }

    fn items(targets: &[&str]) -> Vec<BatchItem> {
        targets
            .iter()
            .map(|target| BatchItem {
                source: PathBuf::from(format!("{target}.json")),
                target: PathBuf::from(format!("{target}.glb")),
                output: PathBuf::from(format!("out/{target}.glb")),
            })
            .collect()
    }

    #[test]
    fn given_invalid_shard_arguments_when_creating_shard_then_error_is_returned() {
        assert_eq!(Shard::new(0, 0), Err(PipelineError::ZeroShardCount));
        assert_eq!(
            Shard::new(3, 3),
            Err(PipelineError::ShardOutOfRange { id: 3, count: 3 })
        );
        assert!(Shard::new(2, 3).is_ok());
    }

    #[test]
    fn given_shards_when_partitioning_then_ranges_tile_the_work_list() {
        for len in [0usize, 1, 7, 10, 64] {
            for count in 1..=6 {
                let mut next = 0;
                for id in 0..count {
                    let range = Shard::new(id, count).expect("shard").range(len);
                    assert_eq!(range.start, next);
                    assert!(range.len() <= len / count + 1);
                    assert!(range.len() >= len / count);
                    next = range.end;
                }
                assert_eq!(next, len);
            }
        }
    }

    #[test]
    fn given_shard_count_without_id_when_selecting_shard_then_error_is_returned() {
        assert_eq!(
            Shard::from_args(None, Some(4)),
            Err(PipelineError::MissingShardId { count: 4 })
        );
        assert_eq!(Shard::from_args(None, None), Ok(Shard::all()));
        assert_eq!(
            Shard::from_args(Some(2), Some(4)).map(|shard| (shard.id(), shard.count())),
            Ok((2, 4))
        );
        assert_eq!(
            Shard::from_args(Some(1), None),
            Err(PipelineError::ShardOutOfRange { id: 1, count: 1 })
        );
    }

    #[test]
    fn given_failing_item_when_running_shard_then_siblings_still_succeed() {
        let options = MergeOptions::default();
        let exporter = RecordingExporter::default();
        let runner = BatchRunner::new(ColumnImporter, ColumnPrediction, &exporter, &options);
        let work = items(&["a", "broken", "c"]);

        let summary = runner.run_shard(&work, Shard::all());

        assert_eq!(summary.total(), 3);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].index, 1);
        assert!(matches!(summary.failed[0].error, MergeError::Load { .. }));
        let indices: Vec<usize> = summary.succeeded.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(exporter.written.lock().expect("lock").len(), 2);
    }

    #[test]
    fn given_shard_when_running_then_only_its_items_are_processed() {
        let options = MergeOptions::default();
        let exporter = RecordingExporter::default();
        let runner = BatchRunner::new(ColumnImporter, ColumnPrediction, &exporter, &options);
        let work = items(&["a", "b", "c", "d"]);

        let summary = runner.run_shard(&work, Shard::new(1, 2).expect("shard"));

        let indices: Vec<usize> = summary.succeeded.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![2, 3]);
    }

    #[test]
    fn given_all_shards_when_running_in_parallel_then_summary_keeps_manifest_order() {
        let options = MergeOptions::default();
        let exporter = RecordingExporter::default();
        let runner = BatchRunner::new(ColumnImporter, ColumnPrediction, &exporter, &options);
        let work = items(&["a", "b", "broken", "d", "e"]);

        let summary = runner.run_all_shards(&work, 3).expect("run");

        let indices: Vec<usize> = summary.succeeded.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 3, 4]);
        assert_eq!(summary.failed.len(), 1);
        assert!(!summary.is_success());
        assert!(matches!(
            runner.run_all_shards(&work, 0),
            Err(PipelineError::ZeroShardCount)
        ));
    }

    #[test]
    fn given_manifest_with_relative_paths_when_loading_then_paths_resolve_against_its_directory()
    {
        let dir = std::env::temp_dir().join(format!("rigmerge-manifest-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("batch.json");
        fs::write(
            &path,
            serde_json::json!({
                "items": [
                    { "source": "a.json", "target": "/abs/a.glb", "output": "out/a.glb" }
                ]
            })
            .to_string(),
        )
        .expect("write manifest");

        let manifest = load_manifest(&path).expect("load");

        assert_eq!(manifest.items[0].source, dir.join("a.json"));
        assert_eq!(manifest.items[0].target, PathBuf::from("/abs/a.glb"));
        assert_eq!(manifest.items[0].output, dir.join("out/a.glb"));
        let _ = fs::remove_dir_all(&dir);
    }
}
