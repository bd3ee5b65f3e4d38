use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use qahistory::config::AppConfig;
use qahistory::context::AppContext;
use qahistory::modules::Module;
use qahistory::reconcile::Reconciler;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "qahistory",
    about = "Seven-day pass/fail history for QA regression logs",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $QAHISTORY_CONFIG, then ./qahistory.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and dashboard server
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Reconcile module histories with their logs
    Update {
        /// Module id, e.g. employer
        module: Option<Module>,

        /// Reconcile every module
        #[arg(long, conflicts_with = "module")]
        all: bool,
    },

    /// List the tests known for a module
    TestCases { module: Module },

    /// Show the recent history of one test as JSON
    History { module: Module, test: String },

    /// Parse a log file and dump its result candidates as JSON
    Parse { log: PathBuf },

    /// Render the static HTML dashboard
    Dashboard {
        /// Output file (overrides paths.dashboard_output)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // The configured level is not known yet; config loading logs through a
    // plain stderr subscriber until the real one is installed.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || AppConfig::resolve(cli.config.as_deref()))?;
    init_tracing(&config.logging.level, cli.log_json);

    let now = Local::now().naive_local();

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            tracing::info!(%bind, "Starting qahistory server");
            qahistory::serve(AppContext::shared(config), &bind).await?;
        }
        Commands::Update { module, all } => {
            let modules: Vec<Module> = match (module, all) {
                (Some(m), _) => vec![m],
                (None, true) => Module::ALL.to_vec(),
                (None, false) => bail!("name a module or pass --all"),
            };
            let ctx = AppContext::new(config);
            let reconciler = Reconciler::new(&ctx);
            for m in modules {
                let outcome = reconciler.run(m, now);
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
        }
        Commands::TestCases { module } => {
            let ctx = AppContext::new(config);
            let names = qahistory::view::test_cases(&ctx, module, now);
            if names.is_empty() {
                println!("No tests found for {module}.");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::History { module, test } => {
            let ctx = AppContext::new(config);
            let lookup = qahistory::view::history(&ctx, module, &test, now);
            if lookup.needs_refresh {
                tracing::info!(%module, "log is newer than stored history; run `qahistory update`");
            }
            println!("{}", serde_json::to_string_pretty(&lookup.entries)?);
        }
        Commands::Parse { log } => {
            let ctx = AppContext::new(config);
            let entries = ctx.parser.parse_file(&log);
            tracing::info!(path = %log.display(), candidates = entries.len(), "parsed log");
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Dashboard { output } => {
            let ctx = AppContext::new(config);
            let path = qahistory::dashboard::write(&ctx, now, output.as_deref())?;
            println!("Dashboard written to {}", path.display());
        }
    }

    Ok(())
}
