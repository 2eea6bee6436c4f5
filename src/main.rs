use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "sandlot")]
#[command(
    author,
    version,
    about = "Sandboxed execution engine for user-submitted tools"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tool bundle in a sandboxed session
    Run {
        /// Source files or directories making up the tool
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Display name for the tool
        #[arg(short, long)]
        name: Option<String>,

        /// Configuration file (default: sandlot.toml in the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the run time limit, in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Keep the session workspace after the run
        #[arg(long)]
        keep: bool,

        /// Print the final status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score a tool bundle against the security rules without running it
    Scan {
        /// Source files or directories making up the tool
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the assessment as JSON
        #[arg(long)]
        json: bool,
    },

    /// List runtime engines in selection order
    Engines,

    /// Delete leftover session workspaces
    Clean {
        /// Workspace root to sweep (default: the configured root)
        #[arg(long)]
        workspace_root: Option<PathBuf>,

        /// Remove workspaces older than this many hours (default: 1; 0 removes all)
        #[arg(long)]
        older_than: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("sandlot=debug")
    } else {
        EnvFilter::new("sandlot=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            files,
            name,
            config,
            timeout,
            keep,
            json,
        } => {
            let opts = commands::run_cmd::RunOptions {
                name,
                config,
                timeout,
                keep,
                json,
            };
            commands::run_cmd::run(files, opts).await?;
        }
        Commands::Scan { files, json } => {
            commands::scan::run(files, json).await?;
        }
        Commands::Engines => {
            commands::engines::run().await?;
        }
        Commands::Clean {
            workspace_root,
            older_than,
        } => {
            commands::clean::run(workspace_root, older_than).await?;
        }
    }

    Ok(())
}
