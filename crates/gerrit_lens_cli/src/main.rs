//! Gerrit Lens CLI - browse and check out Gerrit changes from a terminal.

mod commands;
mod config;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::output::OutputFormat;

#[derive(Parser)]
#[command(name = "gerrit-lens")]
#[command(version)]
#[command(about = "A terminal client for Gerrit code review")]
#[command(after_long_help = r#"EXAMPLES
    Show a change with its labels:
        $ gerrit-lens change 12345

    List open changes you own:
        $ gerrit-lens changes -f "status:open owner:self"

    Show unresolved comment threads:
        $ gerrit-lens comments 12345 --unresolved

    Check out a change, then go back:
        $ gerrit-lens checkout push 12345
        $ gerrit-lens checkout pop 12345

    Follow live updates for a change:
        $ gerrit-lens watch 12345

CONFIGURATION
    gerrit-lens reads configuration from:
      1. ~/.config/gerrit-lens/config.toml (or $XDG_CONFIG_HOME/gerrit-lens/config.toml)
      2. ./gerrit-lens.toml
      3. Environment variables (GERRIT_LENS_ prefix, e.g. GERRIT_LENS_GERRIT__URL)
      4. .env file in current directory
"#)]
struct Cli {
    /// Gerrit URL (overrides config)
    #[arg(long, global = true, env = "GERRIT_URL")]
    url: Option<String>,

    /// Refuse every mutating request
    #[arg(long, global = true)]
    read_only: bool,

    /// Log to stderr even on a terminal
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show one change
    Change {
        /// Change number, Change-Id or project~branch~Change-Id
        change: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Search changes
    Changes {
        /// Filter group, repeatable. Space-separated terms in one group are
        /// ANDed; groups are ORed.
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Free-text query appended to every group
        #[arg(short, long)]
        query: Option<String>,

        #[arg(short = 'n', long, default_value_t = 25)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// List files of a change's revision
    Files {
        change: String,

        /// Patchset number (default: current)
        #[arg(short, long)]
        patchset: Option<u32>,

        /// Compare against this patchset instead of the parent
        #[arg(short, long)]
        base: Option<u32>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Show comment threads of a change
    Comments {
        change: String,

        /// Only threads that still need attention
        #[arg(short, long)]
        unresolved: bool,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Follow a change and print every update
    Watch {
        /// Changes to follow
        #[arg(required = true)]
        changes: Vec<String>,
    },
    /// Quick checkout of changes into the current repository
    Checkout {
        #[command(subcommand)]
        action: CheckoutAction,

        /// Repository root (default: current directory)
        #[arg(short = 'C', long, global = true)]
        repo: Option<PathBuf>,
    },
    /// Show recent local commits with their Gerrit changes
    Log {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,

        /// Repository root (default: current directory)
        #[arg(short = 'C', long)]
        repo: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CheckoutAction {
    /// Park local work and check out a change's current patchset
    Push { change: String },
    /// List quick checkouts
    List {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Return to the original branch and restore parked work
    Pop { number: u64 },
    /// Forget a quick checkout and discard its parked work
    Drop { number: u64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.verbose || !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("gerrit_lens=info,gerrit_lens_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    if let Commands::Completions { shell } = &cli.command {
        commands::meta::handle_completions(*shell)?;
        return Ok(());
    }

    let mut config = config::Config::load();
    config.apply_overrides(cli.url, cli.read_only);

    match cli.command {
        Commands::Change { change, output } => {
            commands::change::handle_change(&config, &change, output).await?;
        }
        Commands::Changes {
            filters,
            query,
            limit,
            offset,
            output,
        } => {
            let search = commands::change::Search {
                filters,
                query,
                limit,
                offset,
            };
            commands::change::handle_changes(&config, search, output).await?;
        }
        Commands::Files {
            change,
            patchset,
            base,
            output,
        } => {
            commands::files::handle_files(&config, &change, patchset, base, output).await?;
        }
        Commands::Comments {
            change,
            unresolved,
            output,
        } => {
            commands::comments::handle_comments(&config, &change, unresolved, output).await?;
        }
        Commands::Watch { changes } => {
            commands::watch::handle_watch(&config, &changes).await?;
        }
        Commands::Checkout { action, repo } => {
            commands::checkout::handle_checkout(&config, action, repo).await?;
        }
        Commands::Log {
            count,
            repo,
            output,
        } => {
            commands::checkout::handle_log(count, repo, output).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
