//! Socket tables scraped from `ss`, `netstat` or `lsof` output. Each tool has
//! its own adapter; the first tool that runs successfully is used.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use svcscan_core::{Candidate, Protocol, ServiceNames};
use tracing::debug;

use crate::command::run_command;
use crate::processes::ProcessTable;
use crate::{port_of, Enumerator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub process: Option<String>,
    pub pid: Option<u32>,
    pub protocol: Protocol,
    pub port: u16,
}

/// Fill in process names for entries that only carry a PID.
pub fn fill_process_names<F>(entries: &mut [SocketEntry], process_name: F)
where
    F: Fn(u32) -> Option<String>,
{
    for e in entries.iter_mut().filter(|e| e.process.is_none()) {
        e.process = e.pid.and_then(&process_name);
    }
}

fn ss_users_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"users:\(\("([^"]+)",pid=(\d+)"#).expect("static regex"))
}

fn netstat_pid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(?:/(.+))?$").expect("static regex"))
}

/// `ss -H -lntup`:
/// `tcp LISTEN 0 128 0.0.0.0:22 0.0.0.0:* users:(("sshd",pid=812,fd=3))`
pub fn parse_ss(text: &str) -> Vec<SocketEntry> {
    let mut out = Vec::new();
    for line in text.lines() {
        let f: Vec<&str> = line.split_whitespace().collect();
        if f.len() < 5 {
            continue;
        }
        let Ok(protocol) = f[0].parse::<Protocol>() else { continue };
        if protocol == Protocol::Tcp && f[1] != "LISTEN" {
            continue;
        }
        let Some(port) = port_of(f[4]) else { continue };
        let users = ss_users_re().captures(line);
        let process = users.as_ref().map(|c| c[1].to_string());
        let pid = users.as_ref().and_then(|c| c[2].parse().ok());
        out.push(SocketEntry { process, pid, protocol, port });
    }
    out
}

/// `netstat -lntup` (Linux) or `netstat -ano` (Windows). Linux rows carry
/// Recv-Q/Send-Q columns before the local address, Windows rows do not.
pub fn parse_netstat(text: &str) -> Vec<SocketEntry> {
    let mut out = Vec::new();
    for line in text.lines() {
        let f: Vec<&str> = line.split_whitespace().collect();
        if f.len() < 3 {
            continue;
        }
        let Ok(protocol) = f[0].parse::<Protocol>() else { continue };
        let local = if f[1].parse::<u64>().is_ok() && f.len() > 3 { f[3] } else { f[1] };
        if protocol == Protocol::Tcp && !f.iter().any(|t| t.starts_with("LISTEN")) {
            continue;
        }
        let Some(port) = port_of(local) else { continue };
        // `812/sshd` on Linux, a bare `1044` on Windows
        let owner = f.last().and_then(|t| netstat_pid_re().captures(t));
        let pid = owner.as_ref().and_then(|c| c[1].parse().ok());
        let process = owner.as_ref().and_then(|c| c.get(2)).map(|m| m.as_str().trim().to_string());
        out.push(SocketEntry { process, pid, protocol, port });
    }
    out
}

/// `lsof -nP -iTCP -sTCP:LISTEN` / `lsof -nP -iUDP`:
/// `sshd 812 root 3u IPv4 23456 0t0 TCP *:22 (LISTEN)`
pub fn parse_lsof(text: &str) -> Vec<SocketEntry> {
    let mut out = Vec::new();
    for line in text.lines().skip(1) {
        let f: Vec<&str> = line.split_whitespace().collect();
        if f.len() < 9 {
            continue;
        }
        let Ok(protocol) = f[7].parse::<Protocol>() else { continue };
        // connected UDP sockets show `local->remote`
        if f[8].contains("->") {
            continue;
        }
        let Some(port) = port_of(f[8]) else { continue };
        let process = Some(f[0].replace("\\x20", " "));
        let pid = f[1].parse().ok();
        out.push(SocketEntry { process, pid, protocol, port });
    }
    out
}

pub struct SocketTableEnumerator {
    names: Arc<ServiceNames>,
    limit: Duration,
}

impl SocketTableEnumerator {
    pub fn new(names: Arc<ServiceNames>, limit: Duration) -> Self {
        SocketTableEnumerator { names, limit }
    }

    async fn query(&self) -> Result<(&'static str, Vec<SocketEntry>)> {
        if !cfg!(windows) {
            match run_command("ss", &["-H", "-lntup"], self.limit).await {
                Ok(text) => return Ok(("ss", parse_ss(&text))),
                Err(e) => debug!("ss unavailable: {}", e),
            }
        }
        let netstat_args: &[&str] = if cfg!(windows) { &["-ano"] } else { &["-lntup"] };
        match run_command("netstat", netstat_args, self.limit).await {
            Ok(text) => return Ok(("netstat", parse_netstat(&text))),
            Err(e) => debug!("netstat unavailable: {}", e),
        }
        let tcp = run_command("lsof", &["-nP", "-iTCP", "-sTCP:LISTEN"], self.limit)
            .await
            .map_err(|e| anyhow!("no socket listing tool available (ss, netstat, lsof): {e}"))?;
        let mut entries = parse_lsof(&tcp);
        match run_command("lsof", &["-nP", "-iUDP"], self.limit).await {
            Ok(udp) => entries.extend(parse_lsof(&udp)),
            Err(e) => debug!("lsof UDP listing failed: {}", e),
        }
        Ok(("lsof", entries))
    }
}

#[async_trait]
impl Enumerator for SocketTableEnumerator {
    fn name(&self) -> &'static str { "sockets" }

    async fn enumerate(&self) -> Result<Vec<Candidate>> {
        let (tool, mut entries) = self.query().await?;
        if entries.iter().any(|e| e.process.is_none() && e.pid.is_some()) {
            entries = tokio::task::spawn_blocking(move || {
                let table = ProcessTable::snapshot();
                fill_process_names(&mut entries, |pid| table.name(pid));
                entries
            })
            .await?;
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for e in entries {
            let name = self.names.resolve(e.process.as_deref(), e.port, e.protocol);
            if seen.insert((name.clone(), e.protocol, e.port)) {
                out.push(Candidate::new(name, e.protocol, e.port, tool));
            }
        }
        Ok(out)
    }
}
