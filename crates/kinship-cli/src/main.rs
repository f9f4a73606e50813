//! Kinship CLI - train and score identity-linkage GCNs.
//!
//! # Usage
//!
//! ```bash
//! # Train from three .npy arrays
//! kinship train --features feats.npy --knn-graph knn.npy --labels labels.npy
//!
//! # Same, with hyperparameters from a JSON file and one override
//! kinship train --config run.json --epochs 10
//!
//! # Continue from a checkpoint
//! kinship train --config run.json --resume models/gcn-20240101120000/gcn-0003.safetensors
//!
//! # Score first-hop links with a checkpoint and dump them as CSV
//! kinship evaluate --config run.json --checkpoint models/.../gcn-0003.safetensors -o scores.csv
//!
//! # Print the subgraph sampled around one node
//! kinship inspect --config run.json --center 17
//! ```

mod config;

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, Parser, Subcommand};
use config::RunConfig;
use indicatif::{ProgressBar, ProgressStyle};
use kinship_core::{KnnDataset, SamplerConfig, SubgraphSampler};
use kinship_nn::{
    evaluate, load_checkpoint, read_meta, write_csv, CheckpointWriter, Gcn, GcnTrainer,
    ModelSpec, RunOutputs, SummaryWriter,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "kinship")]
#[command(version)]
#[command(about = "Identity-linkage GCN training on k-NN subgraphs", long_about = None)]
struct Cli {
    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DataArgs {
    /// JSON run configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node features (.npy, N x D)
    #[arg(long)]
    features: Option<PathBuf>,

    /// k-NN graph (.npy, N x K, column 0 is the node itself)
    #[arg(long)]
    knn_graph: Option<PathBuf>,

    /// Identity labels (.npy, N)
    #[arg(long)]
    labels: Option<PathBuf>,
}

impl DataArgs {
    fn run_config(self) -> Result<RunConfig> {
        let mut config = RunConfig::load(self.config.as_deref())?;
        config.override_data(self.features, self.knn_graph, self.labels)?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train a GCN
    Train {
        #[command(flatten)]
        data: DataArgs,

        /// Training epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Centers per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Neighbors kept per hop, e.g. 200,5
        #[arg(long, value_delimiter = ',')]
        k_at_hop: Option<Vec<usize>>,

        /// Neighbors per node that contribute edges
        #[arg(long)]
        active_connection: Option<usize>,

        /// Adam learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Steps between checkpoints
        #[arg(long)]
        checkpoint_every: Option<usize>,

        /// Shuffle seed
        #[arg(long)]
        seed: Option<u64>,

        /// Keep centers in index order
        #[arg(long)]
        no_shuffle: bool,

        /// Scalar log root
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Checkpoint root
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Checkpoint to continue from
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Stay on the CPU even when CUDA is available
        #[arg(long)]
        cpu: bool,
    },

    /// Score first-hop links with a checkpoint
    Evaluate {
        #[command(flatten)]
        data: DataArgs,

        /// Checkpoint (.safetensors with its .json sidecar)
        #[arg(long)]
        checkpoint: PathBuf,

        /// Write per-pair scores as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Centers per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Stay on the CPU even when CUDA is available
        #[arg(long)]
        cpu: bool,
    },

    /// Print the subgraph sampled around one center
    Inspect {
        #[command(flatten)]
        data: DataArgs,

        /// Center node
        #[arg(long)]
        center: usize,

        /// Neighbors kept per hop, e.g. 200,5
        #[arg(long, value_delimiter = ',')]
        k_at_hop: Option<Vec<usize>>,

        /// Neighbors per node that contribute edges
        #[arg(long)]
        active_connection: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Train {
            data,
            epochs,
            batch_size,
            k_at_hop,
            active_connection,
            lr,
            checkpoint_every,
            seed,
            no_shuffle,
            log_dir,
            model_dir,
            resume,
            cpu,
        } => {
            let mut config = data.run_config()?;
            config.sampler = apply_sampler_flags(config.sampler, k_at_hop, active_connection);
            let t = &mut config.training;
            if let Some(v) = epochs {
                t.epochs = v;
            }
            if let Some(v) = batch_size {
                t.batch_size = v;
            }
            if let Some(v) = lr {
                t.learning_rate = v;
            }
            if let Some(v) = checkpoint_every {
                t.checkpoint_every = v;
            }
            if let Some(v) = seed {
                t.seed = v;
            }
            if no_shuffle {
                t.shuffle = false;
            }
            if let Some(v) = log_dir {
                config.log_dir = v;
            }
            if let Some(v) = model_dir {
                config.model_dir = v;
            }
            cmd_train(&config, resume.as_deref(), cpu)
        }
        Commands::Evaluate {
            data,
            checkpoint,
            output,
            batch_size,
            cpu,
        } => {
            let mut config = data.run_config()?;
            if let Some(v) = batch_size {
                config.training.batch_size = v;
            }
            cmd_evaluate(&config, &checkpoint, output.as_deref(), cpu)
        }
        Commands::Inspect {
            data,
            center,
            k_at_hop,
            active_connection,
        } => {
            let mut config = data.run_config()?;
            config.sampler = apply_sampler_flags(config.sampler, k_at_hop, active_connection);
            cmd_inspect(&config, center)
        }
    }
}

fn apply_sampler_flags(
    mut sampler: SamplerConfig,
    k_at_hop: Option<Vec<usize>>,
    active_connection: Option<usize>,
) -> SamplerConfig {
    if let Some(v) = k_at_hop {
        sampler = sampler.with_k_at_hop(v);
    }
    if let Some(v) = active_connection {
        sampler = sampler.with_active_connection(v);
    }
    sampler
}

fn select_device(cpu: bool) -> Result<Device> {
    if cpu {
        return Ok(Device::Cpu);
    }
    let device = Device::cuda_if_available(0).context("Failed to initialize CUDA")?;
    info!(cuda = device.is_cuda(), "selected device");
    Ok(device)
}

fn load_dataset(config: &RunConfig, sampler: &SamplerConfig) -> Result<KnnDataset> {
    sampler.validate().context("Invalid sampler configuration")?;
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message("Loading dataset...");

    let paths = config.data()?;
    let dataset = KnnDataset::from_npy(paths, sampler.knn_width()).with_context(|| {
        format!(
            "Failed to load dataset ({}, {}, {})",
            paths.features.display(),
            paths.knn_graph.display(),
            paths.labels.display()
        )
    })?;

    pb.finish_with_message(format!(
        "Loaded {} nodes in {:.2?}",
        dataset.num_nodes(),
        start.elapsed()
    ));
    Ok(dataset)
}

fn cmd_train(config: &RunConfig, resume: Option<&Path>, cpu: bool) -> Result<()> {
    config
        .training
        .validate()
        .context("Invalid training configuration")?;
    let device = select_device(cpu)?;
    let dataset = load_dataset(config, &config.sampler)?;
    let sampler = SubgraphSampler::new(&dataset, config.sampler.clone())?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let gcn = Gcn::new(dataset.feature_dim(), vb)?;

    let meta = match resume {
        Some(path) => {
            let meta = load_checkpoint(&mut varmap, path)
                .with_context(|| format!("Failed to resume from {}", path.display()))?;
            if meta.spec.sampler != config.sampler {
                warn!(
                    saved = ?meta.spec.sampler,
                    current = ?config.sampler,
                    "sampler config differs from the checkpoint"
                );
            }
            Some(meta)
        }
        None => None,
    };

    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
    let spec = ModelSpec {
        input_dim: dataset.feature_dim(),
        sampler: sampler.config().clone(),
    };
    let mut outputs = RunOutputs {
        summary: Some(SummaryWriter::new(config.log_dir.join(&stamp))?),
        checkpoints: Some(CheckpointWriter::new(
            config.model_dir.join(format!("gcn-{stamp}")),
            "gcn",
            config.training.checkpoint_every,
            spec,
        )?),
    };

    let loader = config.training.loader(&sampler)?;
    let mut trainer = GcnTrainer::new(&gcn, &varmap, config.training.clone(), device)?;
    if let Some(meta) = &meta {
        trainer = trainer.resume(meta);
    }

    let pb = ProgressBar::new(trainer.remaining_steps(loader.num_batches()) as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
        )
        .context("Invalid progress template")?,
    );

    let start = Instant::now();
    let report = trainer.fit(&loader, &mut outputs, |record| {
        pb.set_message(format!("epoch {} loss {:.4}", record.epoch, record.loss));
        pb.inc(1);
    })?;
    pb.finish_with_message(format!("Trained in {:.2?}", start.elapsed()));

    println!("Training Summary");
    println!("================");
    println!("Steps:        {}", report.steps);
    if let Some(loss) = report.epoch_losses.last() {
        println!("Final loss:   {loss:.4}");
    }
    if let Some(m) = report.last_metrics {
        println!("Accuracy:     {:.4}", m.accuracy);
        println!("Precision:    {:.4}", m.precision);
        println!("Recall:       {:.4}", m.recall);
    }
    println!("Checkpoints:  {}", report.checkpoints.len());
    if let Some(path) = report.checkpoints.last() {
        println!("Latest:       {}", path.display());
    }
    Ok(())
}

fn cmd_evaluate(
    config: &RunConfig,
    checkpoint: &Path,
    output: Option<&Path>,
    cpu: bool,
) -> Result<()> {
    let meta = read_meta(checkpoint).with_context(|| {
        format!(
            "Failed to read checkpoint metadata for {}",
            checkpoint.display()
        )
    })?;
    let device = select_device(cpu)?;
    let dataset = load_dataset(config, &meta.spec.sampler)?;
    if dataset.feature_dim() != meta.spec.input_dim {
        anyhow::bail!(
            "Checkpoint expects {}-dimensional features, dataset has {}",
            meta.spec.input_dim,
            dataset.feature_dim()
        );
    }
    let sampler = SubgraphSampler::new(&dataset, meta.spec.sampler.clone())?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let gcn = Gcn::new(meta.spec.input_dim, vb)?;
    load_checkpoint(&mut varmap, checkpoint)
        .with_context(|| format!("Failed to load {}", checkpoint.display()))?;

    let training = config.training.clone().with_shuffle(false);
    let loader = training.loader(&sampler)?;
    let eval = evaluate(&gcn, &loader, &device, training.threshold, output.is_some())?;

    println!("Evaluation");
    println!("==========");
    println!("Checkpoint:   {} (step {})", checkpoint.display(), meta.step);
    println!("Pairs:        {}", eval.metrics.support);
    println!("Mean loss:    {:.4}", eval.mean_loss);
    println!("Accuracy:     {:.4}", eval.metrics.accuracy);
    println!("Precision:    {:.4}", eval.metrics.precision);
    println!("Recall:       {:.4}", eval.metrics.recall);

    if let Some(path) = output {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        write_csv(&mut BufWriter::new(file), &eval.scores)?;
        println!("Wrote {} scores to {}", eval.scores.len(), path.display());
    }
    Ok(())
}

fn cmd_inspect(config: &RunConfig, center: usize) -> Result<()> {
    let dataset = load_dataset(config, &config.sampler)?;
    if center >= dataset.num_nodes() {
        anyhow::bail!(
            "Center {} out of range for {} nodes",
            center,
            dataset.num_nodes()
        );
    }
    let sampler = SubgraphSampler::new(&dataset, config.sampler.clone())?;
    let sample = sampler.sample(center)?;

    println!("Subgraph of node {}", center);
    println!("==================");
    println!("Label:          {}", sampler.dataset().label(center));
    println!(
        "Nodes:          {} of {}",
        sample.num_nodes(),
        sample.max_num_nodes()
    );
    println!("Node list:      {:?}", sample.nodes.as_slice());
    println!("One-hop slots:  {:?}", sample.one_hop);
    println!("Degrees:        {:?}", sample.degrees);
    println!("Edge labels:    {:?}", sample.one_hop_edge_labels());
    if sample.is_degenerate() {
        println!("Isolated nodes: {}", sample.isolated_nodes());
    }
    Ok(())
}
