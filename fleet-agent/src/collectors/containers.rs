use std::process::Command;

use serde::Deserialize;

use fleet_core::ContainerSnapshot;

/// Source of the raw container listing: one JSON object per line, in
/// `docker ps -a --format '{{json .}}'` shape.
pub trait ContainerRuntime {
    fn list(&self) -> std::io::Result<String>;
}

/// The local `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ContainerRuntime for DockerCli {
    fn list(&self) -> std::io::Result<String> {
        let output = Command::new(&self.program)
            .args(["ps", "-a", "--format", "{{json .}}"])
            .output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{} ps exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct DockerPsLine {
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

/// Every container the runtime knows about, running or stopped.
///
/// An unavailable runtime is an empty list, not an error.
pub fn collect_containers(runtime: &dyn ContainerRuntime) -> Vec<ContainerSnapshot> {
    match runtime.list() {
        Ok(raw) => parse_container_lines(&raw),
        Err(e) => {
            tracing::warn!("container runtime unavailable: {e}");
            Vec::new()
        }
    }
}

/// Parse the line-delimited listing; malformed lines are skipped.
pub fn parse_container_lines(raw: &str) -> Vec<ContainerSnapshot> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<DockerPsLine>(line) {
            Ok(entry) => Some(ContainerSnapshot {
                name: entry.names,
                image: entry.image,
                status: entry.status,
                ports: entry.ports,
            }),
            Err(e) => {
                tracing::debug!("skipping malformed container line: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingRuntime;

    impl ContainerRuntime for FailingRuntime {
        fn list(&self) -> std::io::Result<String> {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "docker: not found",
            ))
        }
    }

    #[test]
    fn parses_running_and_stopped_containers() {
        let raw = concat!(
            r#"{"Names":"web","Image":"nginx:1.25","Status":"Up 3 hours","Ports":"0.0.0.0:80->80/tcp"}"#,
            "\n",
            r#"{"Names":"job","Image":"alpine","Status":"Exited (0) 2 days ago","Ports":""}"#,
            "\n"
        );
        let containers = parse_container_lines(raw);
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "web");
        assert_eq!(containers[0].ports, "0.0.0.0:80->80/tcp");
        assert!(containers[1].status.starts_with("Exited"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let raw = "not json\n\n{\"Names\":\"db\",\"Image\":\"postgres\"}\n";
        let containers = parse_container_lines(raw);
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "db");
        assert_eq!(containers[0].status, "");
    }

    #[test]
    fn unavailable_runtime_yields_empty_list() {
        assert!(collect_containers(&FailingRuntime).is_empty());
    }

    #[test]
    fn missing_binary_is_an_error_not_a_panic() {
        let cli = DockerCli::with_program("fleet-test-no-such-binary");
        assert!(cli.list().is_err());
        assert!(collect_containers(&cli).is_empty());
    }
}
