//! Downstream parser: turns a scan log into a per-device JSON inventory.

use serde::{Deserialize, Serialize};
use svcscan_core::{ProbeStatus, Protocol, ScanError};

use crate::emit::{DEVICE_LEGEND, RECORD_LEGEND};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub port: u16,
    pub name: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Image", default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInventory {
    pub name: String,
    pub os: String,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub macs: Vec<String>,
    pub http: Vec<ServiceEntry>,
    pub https: Vec<ServiceEntry>,
    pub ssh: Vec<ServiceEntry>,
    pub sftp: Vec<ServiceEntry>,
    pub ftp: Vec<ServiceEntry>,
    pub vnc: Vec<ServiceEntry>,
    pub rdp: Vec<ServiceEntry>,
    pub tcp: Vec<ServiceEntry>,
    pub udp: Vec<ServiceEntry>,
    pub lastupdated: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Http,
    Https,
    Ssh,
    Sftp,
    Ftp,
    Vnc,
    Rdp,
    Tcp,
    Udp,
}

fn bucket_for(protocol: Protocol, port: u16, name: &str) -> Bucket {
    let name = name.to_ascii_lowercase();
    match protocol {
        Protocol::Http => return Bucket::Http,
        Protocol::Https => return Bucket::Https,
        Protocol::Udp => return Bucket::Udp,
        Protocol::Tcp => {}
    }
    if name == "sftp" {
        Bucket::Sftp
    } else if port == 22 || name == "ssh" || name == "sshd" {
        Bucket::Ssh
    } else if port == 21 || name == "ftp" {
        Bucket::Ftp
    } else if (5900..=5903).contains(&port) || name == "vnc" {
        Bucket::Vnc
    } else if port == 3389 || name == "rdp" {
        Bucket::Rdp
    } else {
        Bucket::Tcp
    }
}

impl DeviceInventory {
    fn bucket_mut(&mut self, b: Bucket) -> &mut Vec<ServiceEntry> {
        match b {
            Bucket::Http => &mut self.http,
            Bucket::Https => &mut self.https,
            Bucket::Ssh => &mut self.ssh,
            Bucket::Sftp => &mut self.sftp,
            Bucket::Ftp => &mut self.ftp,
            Bucket::Vnc => &mut self.vnc,
            Bucket::Rdp => &mut self.rdp,
            Bucket::Tcp => &mut self.tcp,
            Bucket::Udp => &mut self.udp,
        }
    }

    /// Add an entry unless its bucket already lists the port.
    fn insert(&mut self, b: Bucket, entry: ServiceEntry) {
        let list = self.bucket_mut(b);
        if !list.iter().any(|e| e.port == entry.port) {
            list.push(entry);
        }
    }
}

fn split_list(field: &str) -> Vec<String> {
    field.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Device metadata from a comment line, skipping the column legends.
fn device_line(body: &str) -> Option<DeviceInventory> {
    if body == DEVICE_LEGEND || body == RECORD_LEGEND {
        return None;
    }
    let f: Vec<&str> = body.split(';').collect();
    if f.len() != 5 || f[0].trim().is_empty() {
        return None;
    }
    Some(DeviceInventory {
        name: f[0].trim().to_string(),
        os: f[1].trim().to_string(),
        ipv4: split_list(f[2]),
        ipv6: split_list(f[3]),
        macs: split_list(f[4]),
        ..Default::default()
    })
}

fn entry_from(name: &str, port: u16, note: &str) -> ServiceEntry {
    let mut entry = ServiceEntry { port, name: name.to_string(), ..Default::default() };
    for token in note.split(" | ").map(str::trim).filter(|t| !t.is_empty()) {
        if let Some(image) = token.strip_prefix("image=") {
            entry.image = Some(image.to_string());
        } else if let Some(desc) = token.strip_prefix("desc=") {
            entry.description = Some(desc.to_string());
        } else {
            entry.notes.push(token.to_string());
        }
    }
    entry
}

/// Build the inventory of the first device in `log`: its metadata line and
/// every reachable service recorded for it. UDP services, which are never
/// probed, count as reachable when listed.
pub fn parse_log(log: &str, lastupdated: &str) -> Result<DeviceInventory, ScanError> {
    let mut inv = log
        .lines()
        .filter_map(|l| l.trim().strip_prefix('#'))
        .find_map(|body| device_line(body.trim()))
        .ok_or_else(|| ScanError::Parse("no device metadata line in log".into()))?;

    for line in log.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')) {
        let f: Vec<&str> = line.splitn(8, ';').collect();
        if f.len() != 8 || f[0] != inv.name {
            continue;
        }
        let (Ok(protocol), Ok(port)) = (f[2].parse::<Protocol>(), f[3].parse::<u16>()) else { continue };
        let reachable = match f[4].parse::<ProbeStatus>() {
            Ok(status) => status == ProbeStatus::Success,
            Err(_) => protocol == Protocol::Udp && f[4].is_empty(),
        };
        if !reachable {
            continue;
        }
        let bucket = bucket_for(protocol, port, f[1]);
        inv.insert(bucket, entry_from(f[1], port, f[7]));
    }
    inv.lastupdated = lastupdated.to_string();
    Ok(inv)
}
