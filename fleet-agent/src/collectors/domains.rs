//! Reverse-proxy routes declared in vhost files.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use fleet_core::DomainReport;

static UPSTREAM: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r"set\s+\$\w*upstream\s+([^\s;]+?):(\d+)\s*;") {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern"),
    }
});

/// One route per `<domain>.conf` in `vhost_dir` that declares an upstream,
/// in file-name order.
///
/// A missing directory or unreadable file contributes nothing.
pub fn collect_domain_routes(vhost_dir: &Path) -> Vec<DomainReport> {
    let entries = match std::fs::read_dir(vhost_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("vhost dir {} unreadable: {e}", vhost_dir.display());
            return Vec::new();
        }
    };

    let mut confs: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "conf") && path.is_file())
        .collect();
    confs.sort();

    confs
        .iter()
        .filter_map(|path| {
            let domain = path.file_stem()?.to_str()?;
            if !is_domain_like(domain) {
                return None;
            }
            let contents = match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::warn!("skipping {}: {e}", path.display());
                    return None;
                }
            };
            let (container, port) = parse_upstream(&contents)?;
            Some(DomainReport {
                domain: domain.to_string(),
                container: Some(container),
                port: Some(port),
            })
        })
        .collect()
}

/// First `set $<name>upstream <host>:<port>;` directive in `conf`.
pub fn parse_upstream(conf: &str) -> Option<(String, u16)> {
    let caps = UPSTREAM.captures(conf)?;
    let port = caps.get(2)?.as_str().parse().ok()?;
    Some((caps.get(1)?.as_str().to_string(), port))
}

/// Contains a dot, only `[A-Za-z0-9.-]`, no leading or trailing dot.
pub fn is_domain_like(name: &str) -> bool {
    name.contains('.')
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
