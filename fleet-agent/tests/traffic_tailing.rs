use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use fleet_agent::collectors::collect_traffic_deltas;
use tempfile::TempDir;

const FILE: &str = "example.com.access.json";

fn record(status: u16, bytes: u64, time: &str) -> String {
    format!(
        "{{\"status\":{status},\"body_bytes_sent\":{bytes},\"request_time\":\"0.050\",\"time\":\"{time}\"}}\n"
    )
}

fn append(dir: &Path, body: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(FILE))
        .expect("open log");
    file.write_all(body.as_bytes()).expect("append");
}

#[test]
fn growth_yields_only_appended_records() {
    let logs = TempDir::new().expect("logs");
    let first = record(200, 10, "2024-05-01T10:00:00+00:00") + &record(404, 20, "2024-05-01T10:00:01+00:00");
    append(logs.path(), &first);

    let pass1 = collect_traffic_deltas(logs.path(), &BTreeMap::new());
    assert_eq!(pass1.stats.len(), 1);
    assert_eq!(pass1.stats[0].domain, "example.com");
    assert_eq!(pass1.stats[0].requests, 2);
    assert_eq!(pass1.offsets[FILE], first.len() as u64);

    let second = record(500, 5, "2024-05-01T10:01:00+00:00")
        + &record(201, 7, "2024-05-01T10:01:30+00:00")
        + &record(301, 0, "2024-05-01T10:02:00+00:00");
    append(logs.path(), &second);

    let pass2 = collect_traffic_deltas(logs.path(), &pass1.offsets);
    let stat = &pass2.stats[0];
    assert_eq!(stat.requests, 3);
    assert_eq!((stat.status_2xx, stat.status_3xx, stat.status_4xx, stat.status_5xx), (1, 1, 0, 1));
    assert_eq!(stat.bytes_sent, 12);
    assert_eq!(stat.avg_request_time_ms, 50);
    assert_eq!(stat.period_start, "2024-05-01T10:01:00+00:00");
    assert_eq!(stat.period_end, "2024-05-01T10:02:00+00:00");
    assert_eq!(pass2.offsets[FILE], (first.len() + second.len()) as u64);
}

#[test]
fn no_growth_yields_no_row() {
    let logs = TempDir::new().expect("logs");
    append(logs.path(), &record(200, 1, "t"));

    let pass1 = collect_traffic_deltas(logs.path(), &BTreeMap::new());
    let pass2 = collect_traffic_deltas(logs.path(), &pass1.offsets);
    assert!(pass2.stats.is_empty());
    assert_eq!(pass2.offsets, pass1.offsets);
}

#[test]
fn rotation_reads_from_start() {
    let logs = TempDir::new().expect("logs");
    let original = (0..5)
        .map(|_| record(200, 1, "2024-05-01T00:00:00+00:00"))
        .collect::<String>();
    append(logs.path(), &original);
    let pass1 = collect_traffic_deltas(logs.path(), &BTreeMap::new());

    let rotated = record(503, 9, "2024-05-02T00:00:00+00:00");
    fs::write(logs.path().join(FILE), &rotated).expect("rotate");

    let pass2 = collect_traffic_deltas(logs.path(), &pass1.offsets);
    assert_eq!(pass2.stats.len(), 1);
    assert_eq!(pass2.stats[0].requests, 1);
    assert_eq!(pass2.stats[0].status_5xx, 1);
    assert_eq!(pass2.offsets[FILE], rotated.len() as u64);
}

#[test]
fn offsets_summed_across_cycles_equal_bytes_consumed() {
    let logs = TempDir::new().expect("logs");
    let mut offsets = BTreeMap::new();
    let mut total = 0usize;
    let mut requests = 0u64;
    for batch in 1..=4 {
        let body: String = (0..batch).map(|_| record(200, 1, "t")).collect();
        total += body.len();
        append(logs.path(), &body);
        let deltas = collect_traffic_deltas(logs.path(), &offsets);
        requests += deltas.stats.iter().map(|s| s.requests).sum::<u64>();
        offsets = deltas.offsets;
    }
    assert_eq!(offsets[FILE], total as u64);
    assert_eq!(requests, 1 + 2 + 3 + 4);
}

#[test]
fn files_are_tailed_independently() {
    let logs = TempDir::new().expect("logs");
    fs::write(logs.path().join("a.example.com.access.json"), record(200, 1, "t")).expect("a");
    fs::write(logs.path().join("b.example.com.access.json"), record(404, 1, "t")).expect("b");

    let deltas = collect_traffic_deltas(logs.path(), &BTreeMap::new());
    let domains: Vec<_> = deltas.stats.iter().map(|s| s.domain.as_str()).collect();
    assert_eq!(domains, ["a.example.com", "b.example.com"]);
    assert_eq!(deltas.offsets.len(), 2);
}

#[test]
fn unreadable_file_keeps_its_offset_while_others_advance() {
    let logs = TempDir::new().expect("logs");
    let broken = "broken.example.com.access.json";
    // A directory under a log name opens but cannot be read.
    let dir = logs.path().join(broken);
    fs::create_dir(&dir).expect("dir");
    fs::write(dir.join("entry"), "x").expect("entry");
    let body = record(200, 1, "2024-05-01T10:00:00+00:00");
    append(logs.path(), &body);

    let previous = BTreeMap::from([(broken.to_string(), 7), (FILE.to_string(), 0)]);
    let deltas = collect_traffic_deltas(logs.path(), &previous);

    assert_eq!(deltas.failed_files, [broken.to_string()]);
    assert_eq!(deltas.offsets[broken], 7);
    assert_eq!(deltas.offsets[FILE], body.len() as u64);
    assert_eq!(deltas.stats.len(), 1);
    assert_eq!(deltas.stats[0].domain, "example.com");
}
