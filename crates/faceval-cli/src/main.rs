use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use faceval_core::pairs;
use faceval_core::scorer::normalized_distance;
use faceval_core::{Evaluation, OnnxEmbedder, Scorer};
use faceval_engine::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod watch;

#[derive(Parser)]
#[command(name = "faceval", about = "Face embedding verification scoring")]
struct Cli {
    /// TOML configuration file (FACEVAL_* variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EvalArgs {
    /// Exported ONNX embedding model
    #[arg(short, long)]
    model: Option<PathBuf>,
    /// Verification pair list
    #[arg(short, long)]
    pairs: Option<PathBuf>,
    /// Pairs per inference call
    #[arg(short, long)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the best-accuracy threshold for a model
    Evaluate {
        #[command(flatten)]
        args: EvalArgs,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print accuracy at every candidate threshold
    Sweep {
        #[command(flatten)]
        args: EvalArgs,
    },
    /// Distance between the embeddings of two face images
    Distance {
        #[arg(short, long)]
        model: Option<PathBuf>,
        first: PathBuf,
        second: PathBuf,
        /// Report same/different at this threshold
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Validate checkpoints as they appear in a directory
    Watch {
        /// Directory receiving exported *.onnx checkpoints
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long)]
        pairs: Option<PathBuf>,
        /// Process existing checkpoints and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Evaluate { args, json } => {
            args.apply(&mut config);
            let eval = evaluate(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&eval)?);
            } else {
                println!(
                    "accuracy: {:.4}  threshold: {:.2}  pairs: {}",
                    eval.accuracy(),
                    eval.threshold(),
                    eval.pair_count
                );
            }
        }
        Commands::Sweep { args } => {
            args.apply(&mut config);
            let eval = evaluate(&config)?;
            println!("{:>9}  {:>8}", "threshold", "accuracy");
            for point in &eval.sweep {
                let marker = if *point == eval.best { "  <- best" } else { "" };
                println!("{:>9.2}  {:>8.4}{marker}", point.threshold, point.accuracy);
            }
        }
        Commands::Distance {
            model,
            first,
            second,
            threshold,
        } => {
            if model.is_some() {
                config.model_path = model;
            }
            distance(&config, &first, &second, threshold)?;
        }
        Commands::Watch { dir, pairs, once } => {
            if pairs.is_some() {
                config.pairs_path = pairs;
            }
            run_watch(&config, dir, once).await?;
        }
    }

    Ok(())
}

impl EvalArgs {
    fn apply(self, config: &mut Config) {
        if let Some(model) = self.model {
            config.model_path = Some(model);
        }
        if let Some(pairs) = self.pairs {
            config.pairs_path = Some(pairs);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
    }
}

fn required<'a>(value: &'a Option<PathBuf>, what: &str, flag: &str, var: &str) -> Result<&'a Path> {
    value
        .as_deref()
        .with_context(|| format!("no {what} given; pass {flag} or set {var}"))
}

fn evaluate(config: &Config) -> Result<Evaluation> {
    let model_path = required(&config.model_path, "model", "--model", "FACEVAL_MODEL")?;
    let pairs_path = required(&config.pairs_path, "pair list", "--pairs", "FACEVAL_PAIRS")?;
    let scorer = config.scorer().context("invalid threshold range")?;

    let dataset = pairs::load_pairs(pairs_path)?
        .load_images(config.endpoints.input_size)
        .context("decoding pair images")?;
    let mut embedder = OnnxEmbedder::load(model_path, config.endpoints.clone())
        .context("loading embedding model")?;

    scorer
        .evaluate_batched(&mut embedder, &dataset, config.batch_size)
        .context("verification failed")
}

fn distance(config: &Config, first: &Path, second: &Path, threshold: Option<f32>) -> Result<()> {
    let model_path = required(&config.model_path, "model", "--model", "FACEVAL_MODEL")?;
    let mut embedder = OnnxEmbedder::load(model_path, config.endpoints.clone())
        .context("loading embedding model")?;

    let a = embedder
        .embed_file(first)
        .with_context(|| format!("embedding {}", first.display()))?;
    let b = embedder
        .embed_file(second)
        .with_context(|| format!("embedding {}", second.display()))?;

    let dist = normalized_distance(&a.values, &b.values)
        .context("embedding has zero norm or mismatched dimension")?;
    println!("distance: {dist:.4}  cosine: {:.4}", a.similarity(&b));

    if let Some(t) = threshold {
        let verdict = if dist < t { "same" } else { "different" };
        println!("{verdict} at threshold {t:.2}");
    }
    Ok(())
}

async fn run_watch(config: &Config, dir: PathBuf, once: bool) -> Result<()> {
    let pairs_path = required(&config.pairs_path, "pair list", "--pairs", "FACEVAL_PAIRS")?;
    let scorer: Scorer = config.scorer().context("invalid threshold range")?;
    let dataset = pairs::load_pairs(pairs_path)?
        .load_images(config.endpoints.input_size)
        .context("decoding pair images")?;

    tracing::info!(
        dir = %dir.display(),
        interval_secs = config.poll_interval_secs,
        floor = config.accuracy_floor,
        "watching for checkpoints"
    );

    let opts = watch::WatchOptions {
        dir,
        poll: Duration::from_secs(config.poll_interval_secs.max(1)),
        once,
        batch_size: config.batch_size,
    };
    let endpoints = config.endpoints.clone();
    let load = move |path: &Path| {
        OnnxEmbedder::load(path, endpoints.clone()).context("loading checkpoint")
    };
    watch::Watcher::new(opts, dataset, scorer, config.monitor(), load)
        .run()
        .await?;
    Ok(())
}
