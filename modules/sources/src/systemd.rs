//! Init system: listening sockets owned by running systemd services.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use svcscan_core::{Candidate, ScanError};

use crate::command::run_command;
use crate::native::{listening_sockets, NativeSocket};
use crate::Enumerator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: String,
    pub main_pid: u32,
    pub description: String,
}

impl Unit {
    /// `nginx.service` -> `nginx`
    pub fn short_name(&self) -> &str {
        self.id.strip_suffix(".service").unwrap_or(&self.id)
    }
}

/// Unit ids from `systemctl list-units --type=service --state=running --no-legend --plain`.
pub fn parse_unit_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|l| l.split_whitespace().next())
        .filter(|id| id.ends_with(".service"))
        .map(str::to_string)
        .collect()
}

/// Blank-line separated `Key=Value` blocks from `systemctl show -p Id -p MainPID -p Description`.
pub fn parse_show(text: &str) -> Vec<Unit> {
    let mut out = Vec::new();
    for block in text.split("\n\n") {
        let mut fields = HashMap::new();
        for line in block.lines() {
            if let Some((k, v)) = line.split_once('=') {
                fields.insert(k.trim(), v.trim());
            }
        }
        let Some(id) = fields.get("Id") else { continue };
        let main_pid = fields.get("MainPID").and_then(|p| p.parse().ok()).unwrap_or(0);
        let description = fields.get("Description").copied().unwrap_or("").to_string();
        out.push(Unit { id: id.to_string(), main_pid, description });
    }
    out
}

/// Service unit named in a `/proc/<pid>/cgroup` file, e.g. `0::/system.slice/nginx.service`.
pub fn cgroup_unit(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|l| l.rsplit(':').next())
        .flat_map(|path| path.split('/'))
        .filter(|seg| seg.ends_with(".service"))
        .last()
        .map(str::to_string)
}

fn pid_cgroup_unit(pid: u32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{pid}/cgroup")).ok().and_then(|t| cgroup_unit(&t))
}

pub struct SystemdEnumerator {
    limit: Duration,
}

impl SystemdEnumerator {
    pub fn new(limit: Duration) -> Self {
        SystemdEnumerator { limit }
    }

    async fn running_units(&self) -> Result<Vec<Unit>> {
        let list = run_command(
            "systemctl",
            &["list-units", "--type=service", "--state=running", "--no-legend", "--plain"],
            self.limit,
        )
        .await?;
        let ids = parse_unit_list(&list);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["show", "-p", "Id", "-p", "MainPID", "-p", "Description", "--"];
        args.extend(ids.iter().map(String::as_str));
        let shown = run_command("systemctl", &args, self.limit).await?;
        Ok(parse_show(&shown))
    }
}

/// Attribute sockets to units, first by the owner's cgroup, then by main PID.
pub fn unit_sockets<F>(sockets: &[NativeSocket], units: &[Unit], cgroup_of: F) -> Vec<Candidate>
where
    F: Fn(u32) -> Option<String>,
{
    let by_id: HashMap<&str, &Unit> = units.iter().map(|u| (u.id.as_str(), u)).collect();
    let by_pid: HashMap<u32, &Unit> = units.iter().filter(|u| u.main_pid != 0).map(|u| (u.main_pid, u)).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for sock in sockets {
        let Some(pid) = sock.pid else { continue };
        let from_cgroup = cgroup_of(pid).and_then(|id| by_id.get(id.as_str()).copied());
        let Some(unit) = from_cgroup.or_else(|| by_pid.get(&pid).copied()) else { continue };
        if !seen.insert((unit.id.clone(), sock.protocol, sock.port)) {
            continue;
        }
        let mut c = Candidate::new(unit.short_name(), sock.protocol, sock.port, "systemd");
        if !unit.description.is_empty() {
            c = c.with_note(format!("desc={}", unit.description));
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl Enumerator for SystemdEnumerator {
    fn name(&self) -> &'static str { "systemd" }

    async fn enumerate(&self) -> Result<Vec<Candidate>> {
        if !cfg!(target_os = "linux") {
            return Err(ScanError::Unsupported("systemd").into());
        }
        let units = self.running_units().await?;
        let found = tokio::task::spawn_blocking(move || -> Result<Vec<Candidate>> {
            let sockets = listening_sockets()?;
            Ok(unit_sockets(&sockets, &units, pid_cgroup_unit))
        })
        .await??;
        Ok(found)
    }
}
