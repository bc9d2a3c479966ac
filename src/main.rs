use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ladderstore::store::SHARD_COUNT;
use ladderstore::{
    DerivativeService, Identifier, MetadataIndex, RungName, SqliteIndex, StoreConfig, StoreGate,
};

/// Content-addressed store for resized image derivatives
#[derive(Parser, Debug)]
#[command(name = "ladderstore", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Metadata index database (overrides the config file)
    #[arg(long, global = true, conflicts_with = "no_index")]
    index: Option<PathBuf>,

    /// Run without a metadata index
    #[arg(long, global = true)]
    no_index: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the shard tree and exit
    Provision,
    /// Ingest an image and print the identifiers of its derivatives
    Put {
        file: PathBuf,
    },
    /// Fetch stored bytes by identifier, or by rung of an original
    Get {
        id: Identifier,
        /// Treat ID as an original and fetch this rung of its family
        #[arg(long)]
        rung: Option<RungName>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Resolve the identifier of one rung of an original
    Lookup {
        original: Identifier,
        rung: RungName,
    },
    /// Show the derivative set an identifier belongs to
    Family {
        id: Identifier,
    },
    /// Count objects per shard
    Stats,
}

impl Commands {
    /// Whether the command may create the store
    fn writes(&self) -> bool {
        matches!(self, Commands::Provision | Commands::Put { .. })
    }
}

/// Response envelope: `{"status": "OK", "result": ...}`
#[derive(Serialize)]
struct Message<T: Serialize> {
    status: &'static str,
    result: T,
}

#[derive(Serialize)]
struct Provisioned<'a> {
    root: &'a Path,
    directories: u32,
}

fn print_message<T: Serialize>(status: &'static str, result: T) {
    match serde_json::to_string(&Message { status, result }) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!(error = %e, "unable to serialize response"),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };

    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(index) = &cli.index {
        config.index_path = Some(index.clone());
    }
    if cli.no_index {
        config.index_path = None;
    }

    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    // Only writers create the shard tree; readers need an existing one
    let gate = StoreGate::new();
    let store = if cli.command.writes() {
        gate.provision(config.root.clone())
            .await
            .context("store provisioning failed")?
    } else {
        gate.open_existing(config.root.clone())
            .await
            .context("store is not provisioned, run `ladderstore provision` first")?
    };

    let index: Option<Arc<dyn MetadataIndex>> = match &config.index_path {
        Some(path) => Some(Arc::new(SqliteIndex::open(path)?)),
        None => None,
    };
    let service = DerivativeService::new(Arc::clone(&store), index, &config);

    match cli.command {
        Commands::Provision => {
            print_message(
                "OK",
                Provisioned {
                    root: store.root(),
                    directories: SHARD_COUNT,
                },
            );
        }
        Commands::Put { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let set = service.ingest(bytes).await?;
            print_message("OK", &set);
        }
        Commands::Get { id, rung, output } => {
            let served = match rung {
                Some(rung) => service.fetch_rung(&id, rung)?,
                None => service.fetch(&id)?,
            };
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &served.bytes)
                        .await
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    print_message("OK", &served);
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&served.bytes)?;
                    stdout.flush()?;
                }
            }
        }
        Commands::Lookup { original, rung } => {
            let id = service.lookup(&original, rung)?;
            print_message("OK", id);
        }
        Commands::Family { id } => {
            let set = service.family(&id)?;
            print_message("OK", &set);
        }
        Commands::Stats => {
            let store = Arc::clone(&store);
            let stats = tokio::task::spawn_blocking(move || store.stats()).await??;
            print_message("OK", &stats);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr, stdout carries responses and image bytes
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_message("ERROR", format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
