//! # PlanPath CLI (`planpath`)
//!
//! ## Usage
//!
//! ```bash
//! planpath --config ./config/planpath.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `planpath jurisdictions` | List states, counties, and cities in the knowledge base |
//! | `planpath documents` | List documents filed under a jurisdiction |
//! | `planpath context` | Print the assembled reference context for a plan review |
//! | `planpath search "<query>"` | Semantic search over the knowledge base index |
//! | `planpath index build` | Extract, chunk, and embed the knowledge base into the index file |
//! | `planpath analyze <image>` | Assemble context and check a plan image for conflicts |
//! | `planpath serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! planpath documents --state Texas
//! planpath context --state California --city "El Segundo" --building-type residential
//! planpath search "emergency escape opening" --city "El Segundo"
//! planpath index build --progress human
//! planpath serve
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `planpath=info`).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use planpath::config::{self, Config};
use planpath::models::{JurisdictionFilter, JurisdictionPath};
use planpath::progress::ProgressMode;
use planpath::{commands, index_cmd, server};

const DEFAULT_CONFIG: &str = "./config/planpath.toml";

/// PlanPath: jurisdiction-aware building code retrieval for plan review.
#[derive(Parser)]
#[command(name = "planpath", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/planpath.toml`. When that file does not exist,
    /// built-in defaults are used (filesystem store rooted at `.`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Jurisdiction names. Empty values count as absent.
#[derive(Args, Clone, Default)]
struct JurisdictionArgs {
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    county: Option<String>,
    #[arg(long)]
    city: Option<String>,
}

impl JurisdictionArgs {
    fn path(&self) -> JurisdictionPath {
        JurisdictionPath::new(self.state.as_deref(), self.county.as_deref(), self.city.as_deref())
    }

    fn filter(&self) -> Option<JurisdictionFilter> {
        let path = self.path();
        if path.named_levels().is_empty() {
            None
        } else {
            Some(JurisdictionFilter::from(&path))
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List jurisdiction names that have folders in the knowledge base.
    Jurisdictions,

    /// List documents filed under a jurisdiction.
    Documents {
        #[command(flatten)]
        jurisdiction: JurisdictionArgs,
    },

    /// Print the assembled reference context for a plan review.
    Context {
        #[command(flatten)]
        jurisdiction: JurisdictionArgs,

        /// Building type, e.g. `residential` or `mixed use`.
        #[arg(long)]
        building_type: String,

        /// Use this store path as the only reference document.
        #[arg(long)]
        document: Option<String>,
    },

    /// Semantic search over the knowledge base index.
    Search {
        query: String,

        /// Number of results (defaults to `[index].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        #[command(flatten)]
        jurisdiction: JurisdictionArgs,
    },

    /// Manage the semantic index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Check a plan image for code conflicts.
    Analyze {
        /// Plan image (PNG, JPEG, WebP, or GIF).
        image: PathBuf,

        #[command(flatten)]
        jurisdiction: JurisdictionArgs,

        #[arg(long)]
        building_type: String,

        #[arg(long)]
        document: Option<String>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Build the index file from every document in the knowledge base.
    Build {
        /// Output path (defaults to `[index].path`).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Progress output on stderr (defaults to human on a TTY, off otherwise).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("planpath=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(&default)
            } else {
                tracing::debug!("no config file found, using defaults");
                Ok(Config::minimal())
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Jurisdictions => {
            commands::run_jurisdictions(&cfg).await?;
        }
        Commands::Documents { jurisdiction } => {
            commands::run_documents(&cfg, &jurisdiction.path()).await?;
        }
        Commands::Context {
            jurisdiction,
            building_type,
            document,
        } => {
            commands::run_context(&cfg, &jurisdiction.path(), &building_type, document.as_deref())
                .await?;
        }
        Commands::Search {
            query,
            top_k,
            jurisdiction,
        } => {
            commands::run_search(&cfg, &query, top_k, jurisdiction.filter().as_ref()).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Build { output, progress } => {
                let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
                index_cmd::run_index_build(&cfg, output.as_deref(), progress).await?;
            }
        },
        Commands::Analyze {
            image,
            jurisdiction,
            building_type,
            document,
        } => {
            commands::run_analyze(
                &cfg,
                &image,
                &jurisdiction.path(),
                &building_type,
                document.as_deref(),
            )
            .await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
