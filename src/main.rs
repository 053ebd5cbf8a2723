use std::{path::PathBuf, process};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use rigmerge::format::{GlbExporter, GltfImporter, JsonPredictionLoader};
use rigmerge::logging::{LogLevel, init_logging};
use rigmerge::merge::MergeReport;
use rigmerge::pipeline::{BatchItem, BatchRunner, BatchSummary, Shard, load_manifest};
use rigmerge::settings::{MergeSettings, NameMapSetting, load_settings, save_settings};

#[derive(Parser)]
#[command(
    name = "rigmerge",
    version,
    about = "Rig a target mesh with a predicted skeleton and skin weights"
)]
struct Cli {
    /// More log output (-v debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge one prediction into one mesh
    Merge {
        /// Predictor output JSON (skeleton, cloud, skin weights)
        #[arg(long)]
        source: PathBuf,
        /// Mesh to rig (.glb/.gltf)
        #[arg(long)]
        target: PathBuf,
        /// Output .glb path
        #[arg(long, short)]
        output: PathBuf,
        /// Orientation subsample seed
        #[arg(long)]
        seed: Option<u64>,
        /// Bone name map: "humanoid", "none" or a JSON file path
        #[arg(long)]
        name_map: Option<NameMapSetting>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Merge every item of a manifest, optionally one shard of it
    Batch {
        /// Manifest JSON: {"items": [{"source", "target", "output"}]}
        #[arg(long)]
        manifest: PathBuf,
        /// Shard to process (0-based)
        #[arg(long, requires = "shard_count", conflicts_with = "all")]
        shard_id: Option<usize>,
        /// Number of shards the manifest is split into
        #[arg(long)]
        shard_count: Option<usize>,
        /// Run every shard in this process on a thread pool
        #[arg(long)]
        all: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Write a settings file with default values
    InitSettings {
        path: PathBuf,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Prepend a synthetic root bone at the origin
    #[arg(long)]
    add_root: bool,
    /// Merge settings JSON
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Write <output>.diagnostic.json next to each output
    #[arg(long)]
    diagnostics: bool,
}

impl CommonArgs {
    fn load_settings(&self) -> anyhow::Result<MergeSettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings(path)?,
            None => MergeSettings::default(),
        };
        if self.add_root {
            settings.add_synthetic_root = true;
        }
        if self.diagnostics {
            settings.write_diagnostics = true;
        }
        Ok(settings)
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_flags(cli.verbose, cli.quiet));

    match cli.command {
        Command::Merge {
            source,
            target,
            output,
            seed,
            name_map,
            common,
        } => {
            let mut settings = common.load_settings()?;
            if seed.is_some() {
                settings.orientation.seed = seed;
            }
            if let Some(name_map) = name_map {
                settings.name_map = name_map;
            }
            let options = settings.to_options()?;
            let runner = BatchRunner::new(GltfImporter, JsonPredictionLoader, GlbExporter, &options)
                .with_diagnostics(settings.write_diagnostics);

            let report = runner.run_item(&BatchItem {
                source,
                target,
                output: output.clone(),
            })?;
            println!("Output: {}", output.display());
            print_report(&report);
        }
        Command::Batch {
            manifest,
            shard_id,
            shard_count,
            all,
            common,
        } => {
            let shard = if all {
                None
            } else {
                Some(Shard::from_args(shard_id, shard_count)?)
            };
            let settings = common.load_settings()?;
            let options = settings.to_options()?;
            let items = load_manifest(&manifest)?.items;
            let runner = BatchRunner::new(GltfImporter, JsonPredictionLoader, GlbExporter, &options)
                .with_diagnostics(settings.write_diagnostics);

            let summary = match shard {
                Some(shard) => runner.run_shard(&items, shard),
                None => {
                    let count = shard_count.unwrap_or_else(rayon::current_num_threads);
                    runner.run_all_shards(&items, count)?
                }
            };
            print_summary(&summary);
            if !summary.is_success() {
                anyhow::bail!("{} of {} item(s) failed", summary.failed.len(), summary.total());
            }
        }
        Command::InitSettings { path } => {
            save_settings(&path, &MergeSettings::default())
                .with_context(|| format!("failed to initialize {}", path.display()))?;
            println!("Wrote default settings to {}", path.display());
        }
    }

    Ok(())
}

fn print_report(report: &MergeReport) {
    let orientation = &report.orientation;
    println!(
        "Target: {} vertices, {} faces; predicted cloud: {} points",
        report.target_vertex_count, report.target_face_count, report.predicted_vertex_count
    );
    println!("Bones: {}", report.bone_count);
    println!(
        "Orientation: perm {:?} signs {:?} (loss {:.5}, identity {:.5}{})",
        orientation.permutation,
        orientation.signs,
        orientation.loss,
        orientation.identity_loss,
        if orientation.ambiguous { ", ambiguous" } else { "" }
    );
    println!(
        "Frame: center [{:.4}, {:.4}, {:.4}] scale {:.4}",
        report.center[0], report.center[1], report.center[2], report.scale
    );
    println!("Degenerate vertices: {}", report.degenerate_vertex_count);
    for issue in &report.issues {
        println!("[{:?}] {}: {}", issue.severity, issue.code, issue.message);
    }
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "Merged: {} / {}",
        summary.succeeded.len(),
        summary.total()
    );
    for failure in &summary.failed {
        println!(
            "Failed #{} ({}): {}",
            failure.index,
            failure.output.display(),
            failure.error
        );
    }
}
