//! Fleet: host sync agent, hub server, and fleet administration CLI.
//!
//! # Usage
//!
//! ```text
//! fleet agent register --hub-url <url> --token <token> [--vps-id <id>]
//! fleet agent sync [--dry-run] [--json]
//! fleet agent status [--json]
//! fleet hub serve [--bind <addr>] [--db <path>]
//! fleet vps list [--json]
//! fleet vps remove <vps-id>
//! fleet audit list [--actor ..] [--action ..] [--target ..] [--result ..]
//!                  [--since ..] [--until ..] [--page N] [--per-page N] [--json]
//! fleet audit export [--format csv|json] [--output <file>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{agent::AgentCommand, audit::AuditCommand, hub::HubCommand, vps::VpsCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fleet",
    version,
    about = "Sync hosts to a central hub and administer the fleet",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register this host and push its state to the hub.
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Run the hub server.
    Hub {
        #[command(subcommand)]
        command: HubCommand,
    },

    /// Inspect and remove hosts registered with the hub.
    Vps {
        #[command(subcommand)]
        command: VpsCommand,
    },

    /// Query or export this host's audit log.
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Agent { command } => {
            init_tracing();
            commands::agent::run(command)
        }
        // The hub installs its own subscriber.
        Commands::Hub { command } => commands::hub::run(command),
        Commands::Vps { command } => {
            init_tracing();
            commands::vps::run(command)
        }
        Commands::Audit { command } => {
            init_tracing();
            commands::audit::run(command)
        }
    }
}

/// Library logs go to stderr; quiet unless `RUST_LOG` asks for more.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
