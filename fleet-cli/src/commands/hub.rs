//! `fleet hub serve`: run the hub in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use fleet_core::config;

#[derive(Subcommand, Debug)]
pub enum HubCommand {
    /// Serve the hub API until ctrl-c.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address. Overrides `FLEET_HUB_BIND` and the config file.
    #[arg(long)]
    pub bind: Option<String>,

    /// SQLite database path.
    #[arg(long)]
    pub db: Option<PathBuf>,
}

pub fn run(command: HubCommand) -> Result<()> {
    match command {
        HubCommand::Serve(args) => serve(args),
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let mut cfg = config::load_hub().context("failed to load hub config")?;
    if let Some(bind) = args.bind {
        cfg.bind = bind;
    }
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    fleet_hub::start_blocking(cfg).context("hub exited with error")
}
