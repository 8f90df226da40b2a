//! Incremental tailing of per-domain JSON access logs.
//!
//! Each `<domain>.access.json` file holds one JSON object per line. The
//! tailer resumes from the byte offset recorded for the file, consumes only
//! complete (`\n`-terminated) lines, and reports the new offset so the
//! caller can persist it once the stats are delivered.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde_json::Value;

use fleet_core::TrafficStat;

pub const ACCESS_LOG_SUFFIX: &str = ".access.json";

/// Result of one tailing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficDeltas {
    /// One entry per file that yielded at least one record.
    pub stats: Vec<TrafficStat>,
    /// Offsets to persist, keyed by file name. Files that vanished are
    /// dropped; files that failed keep their previous offset.
    pub offsets: BTreeMap<String, u64>,
    /// File names that could not be read this pass.
    pub failed_files: Vec<String>,
}

/// Read everything appended to each access log since `offsets`.
///
/// A file smaller than its recorded offset was rotated and is read from 0.
/// A file whose size equals its offset is skipped. An unreadable directory
/// leaves every offset untouched.
pub fn collect_traffic_deltas(log_dir: &Path, offsets: &BTreeMap<String, u64>) -> TrafficDeltas {
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("traffic log dir {} unreadable: {e}", log_dir.display());
            return TrafficDeltas {
                offsets: offsets.clone(),
                ..Default::default()
            };
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.len() > ACCESS_LOG_SUFFIX.len() && name.ends_with(ACCESS_LOG_SUFFIX))
        .collect();
    names.sort();

    let mut deltas = TrafficDeltas::default();
    for name in names {
        let previous = offsets.get(&name).copied().unwrap_or(0);
        match tail_file(&log_dir.join(&name), previous) {
            Ok((new_offset, tally)) => {
                deltas.offsets.insert(name.clone(), new_offset);
                if let Some(tally) = tally {
                    let domain = name
                        .strip_suffix(ACCESS_LOG_SUFFIX)
                        .unwrap_or(&name)
                        .to_string();
                    deltas.stats.push(tally.into_stat(domain));
                }
            }
            Err(e) => {
                tracing::warn!("failed to read access log {name}: {e}");
                if offsets.contains_key(&name) {
                    deltas.offsets.insert(name.clone(), previous);
                }
                deltas.failed_files.push(name);
            }
        }
    }
    deltas
}

/// Tail one file from `offset`. Returns the new offset and, when at least
/// one record was read, its tally.
fn tail_file(path: &Path, offset: u64) -> std::io::Result<(u64, Option<Tally>)> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();

    let start = if size < offset {
        tracing::info!("{} shrank below offset {offset}; assuming rotation", path.display());
        0
    } else {
        offset
    };
    if size == start {
        return Ok((start, None));
    }

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity(usize::try_from(size - start).unwrap_or(0));
    file.read_to_end(&mut buf)?;

    // Only complete lines; a trailing partial record waits for the next pass.
    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok((start, None));
    };
    let consumed = &buf[..=last_newline];

    let mut tally = Tally::default();
    for line in consumed.split(|&b| b == b'\n') {
        let Ok(text) = std::str::from_utf8(line) else {
            continue;
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(record) if record.is_object() => tally.add(&record),
            _ => tracing::debug!("skipping malformed access log line in {}", path.display()),
        }
    }

    let new_offset = start + consumed.len() as u64;
    Ok((new_offset, (tally.requests > 0).then_some(tally)))
}

#[derive(Debug, Default)]
struct Tally {
    requests: u64,
    status_2xx: u64,
    status_3xx: u64,
    status_4xx: u64,
    status_5xx: u64,
    bytes_sent: u64,
    total_request_time: f64,
    period_start: Option<String>,
    period_end: Option<String>,
}

impl Tally {
    fn add(&mut self, record: &Value) {
        self.requests += 1;
        match lenient_u64(record.get("status")) {
            200..=299 => self.status_2xx += 1,
            300..=399 => self.status_3xx += 1,
            400..=499 => self.status_4xx += 1,
            500..=599 => self.status_5xx += 1,
            _ => {}
        }
        self.bytes_sent += lenient_u64(record.get("body_bytes_sent"));
        self.total_request_time += lenient_f64(record.get("request_time"));

        if let Some(ts) = record.get("time").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            if self.period_start.is_none() {
                self.period_start = Some(ts.to_string());
            }
            self.period_end = Some(ts.to_string());
        }
    }

    fn into_stat(self, domain: String) -> TrafficStat {
        let avg_ms = (self.total_request_time / self.requests as f64 * 1000.0).floor();
        TrafficStat {
            domain,
            requests: self.requests,
            status_2xx: self.status_2xx,
            status_3xx: self.status_3xx,
            status_4xx: self.status_4xx,
            status_5xx: self.status_5xx,
            bytes_sent: self.bytes_sent,
            avg_request_time_ms: if avg_ms.is_finite() && avg_ms > 0.0 { avg_ms as u64 } else { 0 },
            period_start: self.period_start.unwrap_or_default(),
            period_end: self.period_end.unwrap_or_default(),
        }
    }
}

/// Number or numeric string; anything else is 0.
fn lenient_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn lenient_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn tally_buckets_and_averages() {
        let mut tally = Tally::default();
        for (status, rt) in [(200, "0.010"), (302, "0.020"), (404, "0.003"), (503, "0.100")] {
            tally.add(&json!({"status": status, "body_bytes_sent": "100", "request_time": rt}));
        }
        let stat = tally.into_stat("example.com".into());
        assert_eq!(stat.requests, 4);
        assert_eq!(
            (stat.status_2xx, stat.status_3xx, stat.status_4xx, stat.status_5xx),
            (1, 1, 1, 1)
        );
        assert_eq!(stat.bytes_sent, 400);
        // mean 0.03325 s
        assert_eq!(stat.avg_request_time_ms, 33);
    }

    #[test]
    fn string_status_and_garbage_values_are_tolerated() {
        let mut tally = Tally::default();
        tally.add(&json!({"status": "201", "body_bytes_sent": "lots", "request_time": null}));
        tally.add(&json!({"status": "n/a"}));
        let stat = tally.into_stat("d".into());
        assert_eq!(stat.requests, 2);
        assert_eq!(stat.status_2xx, 1);
        assert_eq!(stat.bytes_sent, 0);
        assert_eq!(stat.avg_request_time_ms, 0);
    }

    #[test]
    fn period_tracks_first_and_last_timestamps() {
        let mut tally = Tally::default();
        tally.add(&json!({"status": 200, "time": "2024-05-01T10:00:00+00:00"}));
        tally.add(&json!({"status": 200}));
        tally.add(&json!({"status": 200, "time": "2024-05-01T10:05:00+00:00"}));
        let stat = tally.into_stat("d".into());
        assert_eq!(stat.period_start, "2024-05-01T10:00:00+00:00");
        assert_eq!(stat.period_end, "2024-05-01T10:05:00+00:00");
    }

    #[test]
    fn partial_trailing_line_is_left_for_next_pass() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.example.com.access.json");
        let complete = "{\"status\":200}\n";
        std::fs::write(&path, format!("{complete}{{\"status\":5")).unwrap();

        let deltas = collect_traffic_deltas(tmp.path(), &BTreeMap::new());
        assert_eq!(deltas.stats.len(), 1);
        assert_eq!(deltas.stats[0].requests, 1);
        assert_eq!(
            deltas.offsets.get("a.example.com.access.json"),
            Some(&(complete.len() as u64))
        );
    }

    #[test]
    fn malformed_lines_are_skipped_but_consumed() {
        let tmp = TempDir::new().unwrap();
        let body = "garbage\n{\"status\":200}\n[1,2]\n";
        std::fs::write(tmp.path().join("d.io.access.json"), body).unwrap();

        let deltas = collect_traffic_deltas(tmp.path(), &BTreeMap::new());
        assert_eq!(deltas.stats[0].requests, 1);
        assert_eq!(deltas.offsets["d.io.access.json"], body.len() as u64);
    }

    #[test]
    fn vanished_files_are_pruned_and_unrelated_files_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("error.log"), "x\n").unwrap();
        let mut offsets = BTreeMap::new();
        offsets.insert("gone.example.com.access.json".to_string(), 42);

        let deltas = collect_traffic_deltas(tmp.path(), &offsets);
        assert!(deltas.stats.is_empty());
        assert!(deltas.offsets.is_empty());
    }

    #[test]
    fn missing_dir_keeps_offsets() {
        let tmp = TempDir::new().unwrap();
        let mut offsets = BTreeMap::new();
        offsets.insert("a.access.json".to_string(), 7);
        let deltas = collect_traffic_deltas(&tmp.path().join("absent"), &offsets);
        assert_eq!(deltas.offsets, offsets);
        assert!(deltas.stats.is_empty());
    }
}
