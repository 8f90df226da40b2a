//! TLS certificate expiries as seen by the reverse proxy.

use std::path::PathBuf;
use std::process::Command;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use fleet_core::types::DEFAULT_ISSUER;
use fleet_core::{CertStatus, CertificateReport};

/// Prints one `domain|expiry` line per issued certificate, where `expiry`
/// is the `notAfter` date as `openssl x509 -enddate` renders it.
const LISTING_SCRIPT: &str = concat!(
    r#"for dir in /etc/letsencrypt/live/*/; do "#,
    r#"[ -d "$dir" ] || continue; "#,
    r#"domain=$(basename "$dir"); "#,
    r#"[ "$domain" = "README" ] && continue; "#,
    r#"cert="$dir/cert.pem"; "#,
    r#"if [ -f "$cert" ]; then "#,
    r#"expiry=$(openssl x509 -noout -enddate -in "$cert" 2>/dev/null | cut -d= -f2); "#,
    r#"echo "$domain|$expiry"; "#,
    r#"fi; done"#,
);

/// Source of the raw `domain|expiry` listing.
pub trait CertificateSource {
    fn raw_listing(&self) -> std::io::Result<String>;
}

/// Runs the listing inside the proxy's `nginx` service via
/// `docker compose exec`.
#[derive(Debug, Clone)]
pub struct ComposeCertSource {
    compose_file: PathBuf,
    service: String,
}

impl ComposeCertSource {
    pub fn new(compose_file: impl Into<PathBuf>) -> Self {
        Self {
            compose_file: compose_file.into(),
            service: "nginx".to_string(),
        }
    }
}

impl CertificateSource for ComposeCertSource {
    fn raw_listing(&self) -> std::io::Result<String> {
        let output = Command::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .args(["exec", "-T", &self.service, "sh", "-c", LISTING_SCRIPT])
            .output()?;
        if !output.status.success() {
            tracing::debug!(
                "certificate listing exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        // Partial output is still usable; the script prints as it goes.
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Certificates the proxy currently serves. Source failures yield an empty
/// list.
pub fn collect_certificates(source: &dyn CertificateSource) -> Vec<CertificateReport> {
    match source.raw_listing() {
        Ok(raw) => parse_cert_output(&raw, Utc::now()),
        Err(e) => {
            tracing::warn!("certificate listing unavailable: {e}");
            Vec::new()
        }
    }
}

/// Parse `domain|expiry` lines, classifying each against `now`.
///
/// Lines without a `|` or with a blank domain are skipped. An expiry that
/// cannot be parsed is kept verbatim with status `unknown`.
pub fn parse_cert_output(raw: &str, now: DateTime<Utc>) -> Vec<CertificateReport> {
    raw.lines()
        .filter_map(|line| line.split_once('|'))
        .filter_map(|(domain, expiry_raw)| {
            let domain = domain.trim();
            if domain.is_empty() {
                return None;
            }
            let expiry_raw = expiry_raw.trim();
            let (expiry, status) = match parse_openssl_date(expiry_raw) {
                Some(expiry) => {
                    let status = if expiry < now {
                        CertStatus::Expired
                    } else {
                        CertStatus::Valid
                    };
                    (expiry.to_rfc3339_opts(SecondsFormat::Secs, true), status)
                }
                None => (expiry_raw.to_string(), CertStatus::Unknown),
            };
            Some(CertificateReport {
                domain: domain.to_string(),
                issuer: DEFAULT_ISSUER.to_string(),
                expiry: Some(expiry),
                status,
            })
        })
        .collect()
}

/// `Mar 15 12:00:00 2099 GMT` → UTC instant.
///
/// openssl pads single-digit days with a space, so whitespace runs are
/// collapsed before parsing.
pub fn parse_openssl_date(raw: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let [month, day, time, year, zone] = parts.as_slice() else {
        return None;
    };
    if !matches!(*zone, "GMT" | "UTC") {
        return None;
    }
    let normalized = format!("{month} {day} {time} {year}");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[rstest]
    #[case("example.com|Mar 15 12:00:00 2099 GMT", CertStatus::Valid)]
    #[case("old.example.com|Jan  2 00:00:00 2020 GMT", CertStatus::Expired)]
    #[case("weird.example.com|soon", CertStatus::Unknown)]
    #[case("blank.example.com|", CertStatus::Unknown)]
    fn classifies_expiry(#[case] line: &str, #[case] expected: CertStatus) {
        let certs = parse_cert_output(line, now());
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].status, expected);
        assert_eq!(certs[0].issuer, "Let's Encrypt");
    }

    #[test]
    fn parsed_expiry_is_rfc3339() {
        let certs = parse_cert_output("example.com|Mar 15 12:00:00 2099 GMT\n", now());
        assert_eq!(certs[0].expiry.as_deref(), Some("2099-03-15T12:00:00Z"));
    }

    #[test]
    fn unparseable_expiry_is_kept_verbatim() {
        let certs = parse_cert_output("example.com|not a date", now());
        assert_eq!(certs[0].expiry.as_deref(), Some("not a date"));
    }

    #[test]
    fn lines_without_separator_are_skipped() {
        let raw = "garbage\nexample.com|Mar 15 12:00:00 2099 GMT\n|Mar 15 12:00:00 2099 GMT\n";
        let certs = parse_cert_output(raw, now());
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].domain, "example.com");
    }

    #[test]
    fn non_utc_zone_is_rejected() {
        assert!(parse_openssl_date("Mar 15 12:00:00 2099 PST").is_none());
        assert!(parse_openssl_date("Mar 15 12:00:00 2099 UTC").is_some());
    }

    struct Fixed(&'static str);

    impl CertificateSource for Fixed {
        fn raw_listing(&self) -> std::io::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn collect_uses_source_listing() {
        let certs = collect_certificates(&Fixed("a.example.com|Mar 15 12:00:00 2099 GMT\n"));
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].status, CertStatus::Valid);
    }
}
