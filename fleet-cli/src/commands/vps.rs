//! `fleet vps`: fleet inventory through the hub API.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use fleet_agent::HttpHubClient;
use fleet_core::HostRecord;

use super::agent::load_config;

#[derive(Subcommand, Debug)]
pub enum VpsCommand {
    /// List hosts known to the hub.
    List(ListArgs),
    /// Remove a host and its routes, containers, and traffic from the hub.
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Host identifier as reported by its agent.
    pub vps_id: String,
}

#[derive(Tabled)]
struct VpsRow {
    #[tabled(rename = "vps id")]
    vps_id: String,
    hostname: String,
    #[tabled(rename = "ip")]
    ip_address: String,
    status: String,
    #[tabled(rename = "last seen")]
    last_seen: String,
}

pub fn run(command: VpsCommand) -> Result<()> {
    let cfg = load_config()?;
    let client = HttpHubClient::new(&cfg.hub_url, &cfg.token);
    match command {
        VpsCommand::List(args) => list(&client, args),
        VpsCommand::Remove(args) => remove(&client, args),
    }
}

fn list(client: &HttpHubClient, args: ListArgs) -> Result<()> {
    let body = client
        .get("/agent/vps")
        .with_context(|| format!("failed to list hosts from {}", client.base_url()))?;
    let hosts: Vec<HostRecord> =
        serde_json::from_value(body).context("unexpected host list from hub")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&hosts).context("failed to serialize host list")?
        );
        return Ok(());
    }
    if hosts.is_empty() {
        println!("No hosts registered with {}.", client.base_url());
        return Ok(());
    }

    let rows: Vec<VpsRow> = hosts
        .into_iter()
        .map(|h| VpsRow {
            vps_id: h.vps_id.to_string(),
            hostname: h.hostname,
            ip_address: h.ip_address,
            status: h.status.to_string(),
            last_seen: h
                .last_seen
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn remove(client: &HttpHubClient, args: RemoveArgs) -> Result<()> {
    client
        .delete(&format!("/agent/vps/{}", args.vps_id))
        .with_context(|| format!("failed to remove '{}'", args.vps_id))?;
    println!("{} removed {}", "✓".green(), args.vps_id.bold());
    Ok(())
}
