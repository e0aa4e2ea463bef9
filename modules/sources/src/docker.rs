//! Container runtime: published host ports of running Docker containers.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use svcscan_core::{Candidate, Protocol};
use tracing::debug;

use crate::command::run_command;
use crate::{port_of, Enumerator};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    names: String,
    image: String,
    #[serde(default)]
    ports: String,
}

/// Published mappings from a `docker ps` Ports column, e.g.
/// `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 5432/tcp, 0.0.0.0:9000-9001->9000-9001/tcp`.
/// Exposed-only ports (no `->`) are not reachable from the host and are skipped.
pub fn parse_ports(column: &str) -> Vec<(u16, Protocol)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for mapping in column.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        let Some((host, container)) = mapping.split_once("->") else { continue };
        let protocol = container
            .rsplit_once('/')
            .and_then(|(_, p)| p.parse::<Protocol>().ok())
            .unwrap_or(Protocol::Tcp);
        let Some((_, host_ports)) = host.rsplit_once(':') else { continue };
        let ports: Vec<u16> = match host_ports.split_once('-') {
            Some((a, b)) => match (a.parse::<u16>(), b.parse::<u16>()) {
                (Ok(a), Ok(b)) if a <= b => (a..=b).collect(),
                _ => continue,
            },
            None => port_of(host).into_iter().collect(),
        };
        for port in ports {
            if seen.insert((port, protocol)) {
                out.push((port, protocol));
            }
        }
    }
    out
}

/// One JSON object per line from `docker ps --format '{{json .}}'`.
pub fn parse_ps(text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let row: PsLine = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                debug!("skipping docker ps line: {}", e);
                continue;
            }
        };
        let name = row.names.split(',').next().unwrap_or("").trim().to_string();
        for (port, protocol) in parse_ports(&row.ports) {
            out.push(Candidate::new(name.clone(), protocol, port, "docker").with_note(format!("image={}", row.image)));
        }
    }
    out
}

pub struct DockerEnumerator {
    limit: Duration,
}

impl DockerEnumerator {
    pub fn new(limit: Duration) -> Self {
        DockerEnumerator { limit }
    }
}

#[async_trait]
impl Enumerator for DockerEnumerator {
    fn name(&self) -> &'static str { "docker" }

    async fn enumerate(&self) -> Result<Vec<Candidate>> {
        let text = run_command("docker", &["ps", "--format", "{{json .}}"], self.limit).await?;
        Ok(parse_ps(&text))
    }
}
