use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use fleet_agent::LocalAuditLog;
use fleet_core::config::{self, AgentConfig};
use fleet_core::{AuditEvent, AuditFilter, AuditResult, HostId};

fn fleet_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fleet"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env_remove("FLEET_HUB_URL")
        .env_remove("FLEET_AGENT_TOKEN")
        .env_remove("FLEET_VPS_ID")
        .env_remove("FLEET_ACTOR")
        .env_remove("RUST_LOG");
    cmd
}

/// Register an agent whose collectors all point inside `home`.
fn register_isolated(home: &Path, hub_url: &str) -> AgentConfig {
    let mut cfg = AgentConfig::new(hub_url, "test-token-123456", HostId::from("vps-cli"));
    cfg.vhost_dir = home.join("conf.d");
    cfg.traffic_log_dir = home.join("logs");
    cfg.proxy_compose_file = home.join("compose.yml");
    cfg.audit_db_path = home.join("audit.db");
    cfg.audit_jsonl_path = home.join("audit.jsonl");
    std::fs::create_dir_all(&cfg.vhost_dir).expect("vhost dir");
    std::fs::write(cfg.vhost_dir.join("cli.example.com.conf"), "set $upstream web:8080;\n")
        .expect("vhost");
    config::save_agent_at(home, &cfg).expect("save agent config");
    cfg
}

#[test]
fn register_writes_config_and_masks_token() {
    let home = TempDir::new().expect("home");

    fleet_cmd(home.path())
        .args([
            "agent",
            "register",
            "--hub-url",
            "http://hub.internal:8000/",
            "--token",
            "abcdefghijklmnop",
            "--vps-id",
            "vps-09",
        ])
        .assert()
        .success()
        .stdout(contains("vps-09"))
        .stdout(contains("abcdefgh..."));

    let cfg = config::load_agent_at(home.path()).expect("config saved");
    assert_eq!(cfg.hub_url, "http://hub.internal:8000");
    assert_eq!(cfg.vps_id, HostId::from("vps-09"));
}

#[test]
fn sync_requires_registration() {
    let home = TempDir::new().expect("home");
    fleet_cmd(home.path())
        .args(["agent", "sync"])
        .assert()
        .failure()
        .stderr(contains("fleet agent register"));
}

#[test]
fn dry_run_sync_reports_and_persists_nothing() {
    let home = TempDir::new().expect("home");
    register_isolated(home.path(), "http://127.0.0.1:9");

    let output = fleet_cmd(home.path())
        .args(["agent", "sync", "--dry-run", "--json"])
        .output()
        .expect("run fleet agent sync --dry-run");
    assert!(
        output.status.success(),
        "command failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["steps"].as_array().map(Vec::len), Some(6));
    assert_eq!(report["steps"][3]["step"], "domains");
    assert_eq!(report["steps"][3]["detail"], "would send 1 domain");

    assert!(!fleet_agent::cursor::state_path_at(home.path()).exists());
    assert!(!home.path().join("audit.db").exists());
}

#[test]
fn sync_against_unreachable_hub_fails_and_is_audited() {
    let home = TempDir::new().expect("home");
    let cfg = register_isolated(home.path(), "http://127.0.0.1:9");

    fleet_cmd(home.path())
        .args(["agent", "sync"])
        .assert()
        .failure()
        .stdout(contains("✗ Heartbeat"))
        .stderr(contains("sync cycle recorded as failed"))
        .stderr(contains("sync steps failed"));

    let log = LocalAuditLog::open_existing(&cfg.audit_db_path)
        .expect("open")
        .expect("audit db created");
    let events = log
        .query(&AuditFilter {
            action: Some("agent.sync".into()),
            ..Default::default()
        })
        .expect("query");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.result, AuditResult::Failure);
    assert!(cfg.audit_jsonl_path.exists());
}

#[test]
fn status_shows_pending_audit_events() {
    let home = TempDir::new().expect("home");
    let cfg = register_isolated(home.path(), "http://127.0.0.1:9");
    let log = LocalAuditLog::open(&cfg.audit_db_path, None).expect("audit db");
    for action in ["site.add", "site.remove"] {
        log.record(&AuditEvent::new(cfg.vps_id.clone(), "ops", action))
            .expect("record");
    }

    let output = fleet_cmd(home.path())
        .args(["agent", "status", "--json"])
        .output()
        .expect("run fleet agent status");
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(status["vps_id"], "vps-cli");
    assert_eq!(status["token"], "test-tok...");
    assert_eq!(status["pending_audit_events"], 2);
}

#[test]
fn audit_list_and_export_read_local_database() {
    let home = TempDir::new().expect("home");
    let db = home.path().join("audit.db");
    let log = LocalAuditLog::open(&db, None).expect("audit db");
    let rows = [
        ("ops", "site.add"),
        ("deploy", "container.restart"),
        ("ops", "site.remove"),
    ];
    for (actor, action) in rows {
        log.record(&AuditEvent::new(HostId::from("vps-01"), actor, action))
            .expect("record");
    }
    let db_arg = db.to_string_lossy().to_string();

    let output = fleet_cmd(home.path())
        .args(["audit", "list", "--db", &db_arg, "--actor", "ops", "--json"])
        .output()
        .expect("run fleet audit list");
    assert!(output.status.success());
    let page: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][0]["action"], "site.remove");

    fleet_cmd(home.path())
        .args(["audit", "export", "--db", &db_arg, "--format", "csv"])
        .assert()
        .success()
        .stdout(contains("timestamp,vps_id,actor,action,target,result,error,duration_ms"))
        .stdout(contains("container.restart"));

    fleet_cmd(home.path())
        .args(["audit", "list", "--db", &db_arg, "--per-page", "0"])
        .assert()
        .failure()
        .stderr(contains("per_page"));
}
