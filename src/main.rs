//! Command-line runner for map, reduce and rereduce functions.
//!
//! Functions are WebAssembly text modules following the guest ABI described
//! in [`mapreduce_runtime::engine::wasm`]. Pair and reduction inputs are
//! wire-encoded files; map documents are passed through as raw bytes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mapreduce_runtime::config::{LogFormat, LoggingConfig};
use mapreduce_runtime::wire;
use mapreduce_runtime::{Runtime, RuntimeConfig, WasmEngine};

#[derive(Parser)]
#[command(name = "mapreduce")]
#[command(about = "Run map/reduce functions under a task timeout")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args)]
struct RunArgs {
    /// Function source file, repeat for several functions
    #[arg(short, long = "function", required = true)]
    functions: Vec<PathBuf>,

    /// Task timeout in milliseconds (overrides the config file)
    #[arg(short, long, env = "MAPREDUCE_TIMEOUT_MS")]
    timeout: Option<u64>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "MAPREDUCE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every map function over one document
    Map {
        #[command(flatten)]
        run: RunArgs,

        /// Document file, passed to the functions as-is
        #[arg(long)]
        doc: PathBuf,

        /// Document metadata file (defaults to `{}`)
        #[arg(long)]
        meta: Option<PathBuf>,
    },

    /// Reduce a wire-encoded pair list
    Reduce {
        #[command(flatten)]
        run: RunArgs,

        /// Wire-encoded pair list file
        #[arg(long)]
        pairs: PathBuf,

        /// Run only the function at this index
        #[arg(long)]
        index: Option<usize>,
    },

    /// Combine wire-encoded partial reductions with one function
    Rereduce {
        #[command(flatten)]
        run: RunArgs,

        /// Index of the function to run
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Wire-encoded reduction list file
        #[arg(long)]
        reductions: PathBuf,
    },
}

impl Commands {
    fn run_args(&self) -> &RunArgs {
        match self {
            Commands::Map { run, .. }
            | Commands::Reduce { run, .. }
            | Commands::Rereduce { run, .. } => run,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.command.run_args())?;
    init_logging(&config.logging)?;

    let sources = read_sources(&cli.command.run_args().functions)?;
    let engine = WasmEngine::new()?;
    let runtime = Runtime::start(engine, config)?;

    let mut stdout = io::stdout().lock();
    match &cli.command {
        Commands::Map { doc, meta, .. } => {
            let doc = read(doc)?;
            let meta = match meta {
                Some(path) => read(path)?,
                None => b"{}".to_vec(),
            };

            let mut ctx = runtime.start_map_context(&sources, "cli-map")?;
            let results = ctx.map_doc(&doc, &meta)?;
            info!(functions = results.len(), "map finished");

            for (function, pairs) in results.iter().enumerate() {
                for pair in pairs {
                    writeln!(
                        stdout,
                        "{function}\t{}\t{}",
                        pair.key.escape_ascii(),
                        pair.value.escape_ascii()
                    )?;
                }
            }
        }
        Commands::Reduce { pairs, index, .. } => {
            let pairs = wire::decode_pairs(&read(pairs)?)
                .with_context(|| format!("invalid pair list in {}", pairs.display()))?;

            let mut ctx = runtime.start_reduce_context(&sources, "cli-reduce")?;
            match index {
                Some(index) => {
                    let reduction = ctx.reduce_pairs_one(*index, &pairs)?;
                    writeln!(stdout, "{index}\t{}", reduction.escape_ascii())?;
                }
                None => {
                    for (function, reduction) in ctx.reduce_pairs(&pairs)?.iter().enumerate() {
                        writeln!(stdout, "{function}\t{}", reduction.escape_ascii())?;
                    }
                }
            }
        }
        Commands::Rereduce {
            index, reductions, ..
        } => {
            let reductions = wire::decode_byte_list(&read(reductions)?)
                .with_context(|| format!("invalid reduction list in {}", reductions.display()))?;

            let mut ctx = runtime.start_reduce_context(&sources, "cli-rereduce")?;
            let combined = ctx.rereduce(*index, &reductions)?;
            writeln!(stdout, "{}", combined.escape_ascii())?;
        }
    }

    runtime.shutdown();
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    Ok(config)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_sources(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|path| {
            fs::read_to_string(path)
                .with_context(|| format!("failed to read function {}", path.display()))
        })
        .collect()
}

/// Install a stderr subscriber; stdout carries results.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid log filter `{}`", config.level))?;

    match config.format {
        LogFormat::Text => {
            let layer = fmt::layer().with_writer(io::stderr);
            if config.timestamps {
                tracing_subscriber::registry().with(filter).with(layer).init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .init();
            }
        }
        LogFormat::Json => {
            let layer = fmt::layer().json().with_writer(io::stderr);
            if config.timestamps {
                tracing_subscriber::registry().with(filter).with(layer).init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .init();
            }
        }
    }

    Ok(())
}
