use std::net::{IpAddr, ToSocketAddrs};

use fleet_core::{HostId, HostIdentity};

/// Hostname plus the address it resolves to.
///
/// An unresolvable hostname leaves `ip` empty rather than failing the
/// heartbeat.
pub fn collect_identity(id: &HostId) -> HostIdentity {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let ip = resolve_ip(&hostname).map(|ip| ip.to_string()).unwrap_or_default();
    HostIdentity {
        id: id.clone(),
        hostname,
        ip,
    }
}

/// First IPv4 address for `host`, else the first address of any family.
pub(crate) fn resolve_ip(host: &str) -> Option<IpAddr> {
    if host.is_empty() {
        return None;
    }
    let addrs: Vec<IpAddr> = match (host, 0u16).to_socket_addrs() {
        Ok(iter) => iter.map(|sa| sa.ip()).collect(),
        Err(e) => {
            tracing::debug!("could not resolve {host}: {e}");
            return None;
        }
    };
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
