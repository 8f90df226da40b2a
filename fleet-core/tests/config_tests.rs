//! Config error-message and on-disk format tests.

use assert_fs::prelude::*;
use fleet_core::{
    config::{self, AgentConfig},
    ConfigError, HostId,
};
use predicates::prelude::predicate;
use rstest::rstest;
use std::fs;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn not_registered_message_points_at_register_command() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_agent_at(home.path()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("agent.yaml"), "got: {msg}");
    assert!(msg.contains("fleet agent register"), "got: {msg}");
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".fleet");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("agent.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_agent_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("agent.yaml"));
}

#[rstest]
#[case::missing_token("hub_url: http://hub\n")]
#[case::list_instead_of_map("- http://hub\n")]
fn incomplete_yaml_is_a_parse_error(#[case] body: &str) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".fleet/agent.yaml").write_str(body).expect("write");
    let err = config::load_agent_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. On-disk format
// ---------------------------------------------------------------------------

#[test]
fn saved_agent_config_is_plain_yaml() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::register_at(home.path(), "https://hub.example", "tok-123", Some(HostId::from("vps-07")))
        .expect("register");

    home.child(".fleet/agent.yaml")
        .assert(predicate::str::contains("hub_url: https://hub.example"))
        .assert(predicate::str::contains("vps_id: vps-07"));
}

#[test]
fn minimal_yaml_gets_default_paths() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".fleet/agent.yaml")
        .write_str("hub_url: http://hub\ntoken: abc\n")
        .expect("write");

    let cfg: AgentConfig = config::load_agent_at(home.path()).expect("load");
    assert_eq!(cfg.vps_id, HostId::from(config::DEFAULT_VPS_ID));
    assert_eq!(cfg.traffic_log_dir.to_str(), Some(config::DEFAULT_TRAFFIC_LOG_DIR));
}

#[test]
fn hub_config_roundtrip() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut cfg = config::HubConfig::default_at(home.path());
    cfg.api_token = "hub-token".into();
    cfg.local_audit_db = None;
    config::save_hub_at(home.path(), &cfg).expect("save");
    assert_eq!(config::load_hub_at(home.path()).expect("load"), cfg);
}
