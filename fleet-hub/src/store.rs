//! Aggregate store: the fleet-wide view assembled from agent reports.
//!
//! Every ingest operation runs in a single transaction. Timestamps are
//! stored in the canonical RFC 3339 form from [`format_timestamp`] so that
//! text order equals time order.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use fleet_agent::audit_log::{self, insert_event};
use fleet_core::types::{format_timestamp, parse_timestamp};
use fleet_core::{
    AuditEvent, AuditFilter, CertStatus, CertificateRecord, CertificateReport, ContainerRecord,
    ContainerSnapshot, DomainReport, DomainRoute, HeartbeatPayload, HostId, HostRecord,
    HostStatus, StoredAuditEvent, TrafficRecord, TrafficStat,
};

use crate::error::{io_err, HubError};

/// Port recorded for a route that never reported one.
pub const DEFAULT_UPSTREAM_PORT: u16 = 3000;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vps_nodes (
    vps_id TEXT PRIMARY KEY,
    hostname TEXT NOT NULL DEFAULT '',
    ip_address TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'active',
    last_seen TEXT
);

CREATE TABLE IF NOT EXISTS container_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vps_id TEXT NOT NULL,
    container_name TEXT NOT NULL,
    image TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT '',
    ports TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_containers_vps ON container_snapshots(vps_id);

CREATE TABLE IF NOT EXISTS certificates (
    domain TEXT PRIMARY KEY,
    issuer TEXT NOT NULL DEFAULT 'Let''s Encrypt',
    expiry TEXT,
    status TEXT NOT NULL DEFAULT 'valid'
);

CREATE TABLE IF NOT EXISTS domains (
    domain TEXT PRIMARY KEY,
    vps_id TEXT NOT NULL,
    container TEXT NOT NULL DEFAULT '',
    port INTEGER NOT NULL DEFAULT 3000,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_domains_vps ON domains(vps_id);

CREATE TABLE IF NOT EXISTS traffic_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    vps_id TEXT NOT NULL,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    requests INTEGER NOT NULL DEFAULT 0,
    status_2xx INTEGER NOT NULL DEFAULT 0,
    status_3xx INTEGER NOT NULL DEFAULT 0,
    status_4xx INTEGER NOT NULL DEFAULT 0,
    status_5xx INTEGER NOT NULL DEFAULT 0,
    bytes_sent INTEGER NOT NULL DEFAULT 0,
    avg_request_time_ms INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_traffic_domain ON traffic_stats(domain);
CREATE INDEX IF NOT EXISTS idx_traffic_period ON traffic_stats(period_start);
"#;

/// Traffic query; every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficQuery {
    pub vps_id: Option<HostId>,
    pub domain: Option<String>,
    pub limit: Option<usize>,
}

pub struct HubStore {
    conn: Connection,
}

impl HubStore {
    pub fn open(path: &Path) -> Result<Self, HubError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, HubError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, HubError> {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(audit_log::SCHEMA)?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // 1. Ingest
    // -----------------------------------------------------------------------

    /// Register or refresh a host. Blank hostname or address keep the
    /// previous values.
    pub fn heartbeat(&mut self, payload: &HeartbeatPayload) -> Result<(), HubError> {
        require_host(&payload.id)?;
        self.conn.execute(
            "INSERT INTO vps_nodes (vps_id, hostname, ip_address, status, last_seen)
             VALUES (?1, ?2, ?3, 'active', ?4)
             ON CONFLICT(vps_id) DO UPDATE SET
                hostname = CASE WHEN excluded.hostname = '' THEN vps_nodes.hostname ELSE excluded.hostname END,
                ip_address = CASE WHEN excluded.ip_address = '' THEN vps_nodes.ip_address ELSE excluded.ip_address END,
                status = 'active',
                last_seen = excluded.last_seen",
            params![
                payload.id.as_str(),
                payload.hostname,
                payload.ip,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Delete every snapshot for `host`, then insert `containers`.
    pub fn replace_containers(
        &mut self,
        host: &HostId,
        containers: &[ContainerSnapshot],
    ) -> Result<usize, HubError> {
        require_host(host)?;
        let now = format_timestamp(Utc::now());
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM container_snapshots WHERE vps_id = ?1",
            [host.as_str()],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO container_snapshots
                 (vps_id, container_name, image, status, ports, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for c in containers {
                insert.execute(params![host.as_str(), c.name, c.image, c.status, c.ports, now])?;
            }
        }
        tx.commit()?;
        Ok(containers.len())
    }

    /// Upsert `certs` by domain, then delete every certificate not in the
    /// set. The scope is the whole table, not the reporting host.
    pub fn reconcile_certificates(
        &mut self,
        certs: &[CertificateReport],
    ) -> Result<usize, HubError> {
        let tx = self.conn.transaction()?;
        let mut reported: HashSet<&str> = HashSet::new();
        {
            let mut upsert = tx.prepare(
                "INSERT INTO certificates (domain, issuer, expiry, status)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(domain) DO UPDATE SET
                    issuer = excluded.issuer,
                    expiry = excluded.expiry,
                    status = excluded.status",
            )?;
            for cert in certs {
                let domain = cert.domain.trim();
                if domain.is_empty() {
                    continue;
                }
                let expiry = cert
                    .expiry
                    .as_deref()
                    .and_then(parse_timestamp)
                    .map(format_timestamp);
                upsert.execute(params![domain, cert.issuer, expiry, cert.status.as_str()])?;
                reported.insert(domain);
            }
        }
        let existing = column_values(&tx, "SELECT domain FROM certificates", [])?;
        for stale in existing.iter().filter(|d| !reported.contains(d.as_str())) {
            tx.execute("DELETE FROM certificates WHERE domain = ?1", [stale])?;
        }
        tx.commit()?;
        Ok(reported.len())
    }

    /// Upsert `domains` (re-assigning ownership to `host`), then delete the
    /// host's routes that were not reported.
    pub fn reconcile_domains(
        &mut self,
        host: &HostId,
        domains: &[DomainReport],
    ) -> Result<usize, HubError> {
        require_host(host)?;
        let now = format_timestamp(Utc::now());
        let tx = self.conn.transaction()?;
        let mut reported: HashSet<&str> = HashSet::new();
        {
            let mut upsert = tx.prepare(
                "INSERT INTO domains (domain, vps_id, container, port, status, created_at)
                 VALUES (?1, ?2, COALESCE(?3, ''), COALESCE(?4, ?5), 'active', ?6)
                 ON CONFLICT(domain) DO UPDATE SET
                    vps_id = excluded.vps_id,
                    container = COALESCE(?3, domains.container),
                    port = COALESCE(?4, domains.port),
                    status = 'active'",
            )?;
            for route in domains {
                let domain = route.domain.trim();
                if domain.is_empty() {
                    continue;
                }
                upsert.execute(params![
                    domain,
                    host.as_str(),
                    route.container,
                    route.port,
                    DEFAULT_UPSTREAM_PORT,
                    now,
                ])?;
                reported.insert(domain);
            }
        }
        let owned = column_values(
            &tx,
            "SELECT domain FROM domains WHERE vps_id = ?1",
            [host.as_str()],
        )?;
        for stale in owned.iter().filter(|d| !reported.contains(d.as_str())) {
            tx.execute("DELETE FROM domains WHERE domain = ?1", [stale])?;
        }
        tx.commit()?;
        Ok(reported.len())
    }

    pub fn append_audit(&mut self, events: &[AuditEvent]) -> Result<usize, HubError> {
        let tx = self.conn.transaction()?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Append one row per stat. Period strings that are not RFC 3339 are
    /// recorded as the time of ingest.
    pub fn append_traffic(
        &mut self,
        host: &HostId,
        stats: &[TrafficStat],
    ) -> Result<usize, HubError> {
        require_host(host)?;
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO traffic_stats
                 (domain, vps_id, period_start, period_end, requests, status_2xx, status_3xx,
                  status_4xx, status_5xx, bytes_sent, avg_request_time_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for stat in stats {
                let start = parse_timestamp(&stat.period_start).unwrap_or(now);
                let end = parse_timestamp(&stat.period_end).unwrap_or(now);
                insert.execute(params![
                    stat.domain,
                    host.as_str(),
                    format_timestamp(start),
                    format_timestamp(end),
                    to_sql_int(stat.requests),
                    to_sql_int(stat.status_2xx),
                    to_sql_int(stat.status_3xx),
                    to_sql_int(stat.status_4xx),
                    to_sql_int(stat.status_5xx),
                    to_sql_int(stat.bytes_sent),
                    to_sql_int(stat.avg_request_time_ms),
                ])?;
            }
        }
        tx.commit()?;
        Ok(stats.len())
    }

    // -----------------------------------------------------------------------
    // 2. Fleet management
    // -----------------------------------------------------------------------

    pub fn list_vps(&self) -> Result<Vec<HostRecord>, HubError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {HOST_COLUMNS} FROM vps_nodes ORDER BY vps_id"))?;
        let rows = stmt
            .query_map([], row_to_host)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_vps(&self, host: &HostId) -> Result<Option<HostRecord>, HubError> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT {HOST_COLUMNS} FROM vps_nodes WHERE vps_id = ?1"),
                [host.as_str()],
                row_to_host,
            )
            .optional()?;
        Ok(found)
    }

    /// Delete a host with its routes, snapshots, and traffic. Audit rows are
    /// history and stay. Returns `false` when the host was unknown.
    pub fn remove_vps(&mut self, host: &HostId) -> Result<bool, HubError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM domains WHERE vps_id = ?1", [host.as_str()])?;
        tx.execute(
            "DELETE FROM container_snapshots WHERE vps_id = ?1",
            [host.as_str()],
        )?;
        tx.execute("DELETE FROM traffic_stats WHERE vps_id = ?1", [host.as_str()])?;
        let removed = tx.execute("DELETE FROM vps_nodes WHERE vps_id = ?1", [host.as_str()])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // -----------------------------------------------------------------------
    // 3. Read paths
    // -----------------------------------------------------------------------

    pub fn list_containers(&self, host: Option<&HostId>) -> Result<Vec<ContainerRecord>, HubError> {
        let mut stmt = self.conn.prepare(
            "SELECT vps_id, container_name, image, status, ports FROM container_snapshots
             WHERE ?1 IS NULL OR vps_id = ?1
             ORDER BY vps_id, container_name",
        )?;
        let rows = stmt
            .query_map([host.map(HostId::as_str)], |row| {
                Ok(ContainerRecord {
                    vps_id: HostId(row.get(0)?),
                    container: ContainerSnapshot {
                        name: row.get(1)?,
                        image: row.get(2)?,
                        status: row.get(3)?,
                        ports: row.get(4)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_certificates(&self) -> Result<Vec<CertificateRecord>, HubError> {
        let mut stmt = self
            .conn
            .prepare("SELECT domain, issuer, expiry, status FROM certificates ORDER BY domain")?;
        let rows = stmt
            .query_map([], |row| {
                let expiry: Option<String> = row.get(2)?;
                let status: String = row.get(3)?;
                Ok(CertificateRecord {
                    domain: row.get(0)?,
                    issuer: row.get(1)?,
                    expiry: expiry.as_deref().and_then(parse_timestamp),
                    status: CertStatus::parse_lenient(&status),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_domains(&self, host: Option<&HostId>) -> Result<Vec<DomainRoute>, HubError> {
        let mut stmt = self.conn.prepare(
            "SELECT domain, vps_id, container, port, status FROM domains
             WHERE ?1 IS NULL OR vps_id = ?1
             ORDER BY domain",
        )?;
        let rows = stmt
            .query_map([host.map(HostId::as_str)], |row| {
                Ok(DomainRoute {
                    domain: row.get(0)?,
                    vps_id: HostId(row.get(1)?),
                    container: row.get(2)?,
                    port: row.get(3)?,
                    status: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Traffic rows, newest period first.
    pub fn list_traffic(&self, query: &TrafficQuery) -> Result<Vec<TrafficRecord>, HubError> {
        let limit = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            "SELECT vps_id, domain, period_start, period_end, requests, status_2xx, status_3xx,
                    status_4xx, status_5xx, bytes_sent, avg_request_time_ms
             FROM traffic_stats
             WHERE (?1 IS NULL OR vps_id = ?1) AND (?2 IS NULL OR domain = ?2)
             ORDER BY period_start DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![query.vps_id.as_ref().map(HostId::as_str), query.domain, limit],
                |row| {
                    let start: String = row.get(2)?;
                    let end: String = row.get(3)?;
                    Ok(TrafficRecord {
                        vps_id: HostId(row.get(0)?),
                        domain: row.get(1)?,
                        period_start: parse_timestamp(&start).unwrap_or_default(),
                        period_end: parse_timestamp(&end).unwrap_or_default(),
                        requests: from_sql_int(row.get(4)?),
                        status_2xx: from_sql_int(row.get(5)?),
                        status_3xx: from_sql_int(row.get(6)?),
                        status_4xx: from_sql_int(row.get(7)?),
                        status_5xx: from_sql_int(row.get(8)?),
                        bytes_sent: from_sql_int(row.get(9)?),
                        avg_request_time_ms: from_sql_int(row.get(10)?),
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Agent-synced audit events matching `filter`, newest first.
    pub fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<StoredAuditEvent>, HubError> {
        Ok(audit_log::query_events(&self.conn, filter)?)
    }
}

const HOST_COLUMNS: &str = "vps_id, hostname, ip_address, status, last_seen";

fn row_to_host(row: &rusqlite::Row) -> rusqlite::Result<HostRecord> {
    let status: String = row.get(3)?;
    let last_seen: Option<String> = row.get(4)?;
    Ok(HostRecord {
        vps_id: HostId(row.get(0)?),
        hostname: row.get(1)?,
        ip_address: row.get(2)?,
        status: if status == "inactive" {
            HostStatus::Inactive
        } else {
            HostStatus::Active
        },
        last_seen: last_seen.as_deref().and_then(parse_timestamp),
    })
}

fn require_host(host: &HostId) -> Result<(), HubError> {
    if host.as_str().trim().is_empty() {
        return Err(HubError::BadRequest("vps_id must not be empty".to_string()));
    }
    Ok(())
}

fn column_values<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params, |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(values)
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> HostId {
        HostId::from(id)
    }

    fn route(domain: &str, container: &str, port: u16) -> DomainReport {
        DomainReport {
            domain: domain.into(),
            container: Some(container.into()),
            port: Some(port),
        }
    }

    fn cert(domain: &str) -> CertificateReport {
        CertificateReport {
            domain: domain.into(),
            issuer: "Let's Encrypt".into(),
            expiry: Some("2099-03-15T12:00:00Z".into()),
            status: CertStatus::Valid,
        }
    }

    fn heartbeat(id: &str, hostname: &str, ip: &str) -> HeartbeatPayload {
        HeartbeatPayload {
            id: host(id),
            hostname: hostname.into(),
            ip: ip.into(),
        }
    }

    #[test]
    fn heartbeat_upserts_and_keeps_blank_fields() {
        let mut store = HubStore::open_in_memory().unwrap();
        store.heartbeat(&heartbeat("vps-01", "web1", "10.0.0.4")).unwrap();
        store.heartbeat(&heartbeat("vps-01", "", "")).unwrap();

        let hosts = store.list_vps().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostname, "web1");
        assert_eq!(hosts[0].ip_address, "10.0.0.4");
        assert_eq!(hosts[0].status, HostStatus::Active);
        assert!(hosts[0].last_seen.is_some());
        assert_eq!(store.get_vps(&host("vps-01")).unwrap().as_ref(), hosts.first());
        assert!(store.get_vps(&host("vps-02")).unwrap().is_none());
    }

    #[test]
    fn heartbeat_rejects_blank_host() {
        let mut store = HubStore::open_in_memory().unwrap();
        let err = store.heartbeat(&heartbeat(" ", "web1", "")).unwrap_err();
        assert!(matches!(err, HubError::BadRequest(_)));
    }

    #[test]
    fn containers_are_fully_replaced_per_host() {
        let mut store = HubStore::open_in_memory().unwrap();
        let snap = |name: &str| ContainerSnapshot {
            name: name.into(),
            ..Default::default()
        };
        store.replace_containers(&host("a"), &[snap("web"), snap("db")]).unwrap();
        store.replace_containers(&host("b"), &[snap("cache")]).unwrap();
        store.replace_containers(&host("a"), &[snap("web")]).unwrap();

        let a = store.list_containers(Some(&host("a"))).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].container.name, "web");
        assert_eq!(store.list_containers(None).unwrap().len(), 2);
    }

    #[test]
    fn domain_reconcile_is_idempotent() {
        let mut store = HubStore::open_in_memory().unwrap();
        let set = [route("a.example.com", "app", 3000), route("b.example.com", "api", 8080)];
        store.reconcile_domains(&host("vps-01"), &set).unwrap();
        let first = store.list_domains(None).unwrap();
        store.reconcile_domains(&host("vps-01"), &set).unwrap();
        assert_eq!(store.list_domains(None).unwrap(), first);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn domain_reconcile_removes_unreported_routes_of_that_host_only() {
        let mut store = HubStore::open_in_memory().unwrap();
        store
            .reconcile_domains(&host("a"), &[route("a1.com", "x", 1), route("a2.com", "x", 2)])
            .unwrap();
        store.reconcile_domains(&host("b"), &[route("b1.com", "y", 1)]).unwrap();

        store.reconcile_domains(&host("a"), &[route("a1.com", "x", 1)]).unwrap();
        let names: Vec<_> = store
            .list_domains(None)
            .unwrap()
            .into_iter()
            .map(|d| d.domain)
            .collect();
        assert_eq!(names, ["a1.com", "b1.com"]);
    }

    #[test]
    fn empty_domain_set_deletes_all_host_routes() {
        let mut store = HubStore::open_in_memory().unwrap();
        store.reconcile_domains(&host("a"), &[route("a1.com", "x", 1)]).unwrap();
        store.reconcile_domains(&host("b"), &[route("b1.com", "y", 1)]).unwrap();

        store.reconcile_domains(&host("a"), &[]).unwrap();
        assert!(store.list_domains(Some(&host("a"))).unwrap().is_empty());
        assert_eq!(store.list_domains(Some(&host("b"))).unwrap().len(), 1);
    }

    #[test]
    fn domain_reassignment_moves_ownership() {
        let mut store = HubStore::open_in_memory().unwrap();
        store.reconcile_domains(&host("a"), &[route("shop.com", "x", 1)]).unwrap();
        store.reconcile_domains(&host("b"), &[route("shop.com", "y", 2)]).unwrap();

        let routes = store.list_domains(None).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].vps_id, host("b"));
        assert_eq!(routes[0].container, "y");

        // The old owner's empty report no longer touches the moved route.
        store.reconcile_domains(&host("a"), &[]).unwrap();
        assert_eq!(store.list_domains(None).unwrap().len(), 1);
    }

    #[test]
    fn missing_port_defaults_then_keeps_previous() {
        let mut store = HubStore::open_in_memory().unwrap();
        let bare = DomainReport {
            domain: "new.com".into(),
            container: None,
            port: None,
        };
        store.reconcile_domains(&host("a"), &[bare.clone()]).unwrap();
        assert_eq!(store.list_domains(None).unwrap()[0].port, DEFAULT_UPSTREAM_PORT);

        store.reconcile_domains(&host("a"), &[route("new.com", "app", 8080)]).unwrap();
        store.reconcile_domains(&host("a"), &[bare]).unwrap();
        let r = &store.list_domains(None).unwrap()[0];
        assert_eq!((r.container.as_str(), r.port), ("app", 8080));
    }

    #[test]
    fn certificates_reconcile_globally() {
        let mut store = HubStore::open_in_memory().unwrap();
        store
            .reconcile_certificates(&[cert("a.com"), cert("b.com"), cert("")])
            .unwrap();
        assert_eq!(store.list_certificates().unwrap().len(), 2);

        store.reconcile_certificates(&[cert("b.com")]).unwrap();
        let names: Vec<_> = store
            .list_certificates()
            .unwrap()
            .into_iter()
            .map(|c| c.domain)
            .collect();
        assert_eq!(names, ["b.com"]);

        store.reconcile_certificates(&[]).unwrap();
        assert!(store.list_certificates().unwrap().is_empty());
    }

    #[test]
    fn unparseable_certificate_expiry_is_stored_null() {
        let mut store = HubStore::open_in_memory().unwrap();
        let mut c = cert("a.com");
        c.expiry = Some("soon".into());
        c.status = CertStatus::Unknown;
        store.reconcile_certificates(&[c]).unwrap();
        let stored = &store.list_certificates().unwrap()[0];
        assert!(stored.expiry.is_none());
        assert_eq!(stored.status, CertStatus::Unknown);
    }

    #[test]
    fn remove_vps_cascades_but_keeps_audit() {
        let mut store = HubStore::open_in_memory().unwrap();
        store.heartbeat(&heartbeat("a", "web", "")).unwrap();
        store.reconcile_domains(&host("a"), &[route("a1.com", "x", 1)]).unwrap();
        store
            .replace_containers(&host("a"), &[ContainerSnapshot::default()])
            .unwrap();
        store
            .append_traffic(
                &host("a"),
                &[TrafficStat {
                    domain: "a1.com".into(),
                    requests: 1,
                    ..Default::default()
                }],
            )
            .unwrap();
        store
            .append_audit(&[AuditEvent::new(host("a"), "ops", "site.add")])
            .unwrap();

        assert!(store.remove_vps(&host("a")).unwrap());
        assert!(store.list_vps().unwrap().is_empty());
        assert!(store.list_domains(None).unwrap().is_empty());
        assert!(store.list_containers(None).unwrap().is_empty());
        assert!(store.list_traffic(&TrafficQuery::default()).unwrap().is_empty());
        assert_eq!(store.query_audit(&AuditFilter::default()).unwrap().len(), 1);

        assert!(!store.remove_vps(&host("a")).unwrap());
    }

    #[test]
    fn traffic_periods_fall_back_to_ingest_time() {
        let mut store = HubStore::open_in_memory().unwrap();
        let before = Utc::now() - chrono::Duration::seconds(1);
        store
            .append_traffic(
                &host("a"),
                &[
                    TrafficStat {
                        domain: "a.com".into(),
                        requests: 3,
                        period_start: "2024-05-01T10:00:00+00:00".into(),
                        period_end: "2024-05-01T10:05:00+00:00".into(),
                        ..Default::default()
                    },
                    TrafficStat {
                        domain: "b.com".into(),
                        requests: 1,
                        period_start: "garbage".into(),
                        ..Default::default()
                    },
                ],
            )
            .unwrap();

        let rows = store.list_traffic(&TrafficQuery::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].domain, "b.com");
        assert!(rows[0].period_start >= before);

        let only_a = store
            .list_traffic(&TrafficQuery {
                domain: Some("a.com".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].requests, 3);
    }
}
