//! Service-name resolution: process name, then the services database, then a
//! static well-known-port table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Protocol;

pub const UNKNOWN_SERVICE: &str = "Unknown";

/// Static fallback table, consulted after the services database.
const WELL_KNOWN: &[(u16, &str)] = &[
    (20, "FTP-Data"),
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (67, "DHCP"),
    (69, "TFTP"),
    (80, "HTTP"),
    (110, "POP3"),
    (111, "RPCBind"),
    (123, "NTP"),
    (135, "MSRPC"),
    (137, "NetBIOS-NS"),
    (139, "NetBIOS-SSN"),
    (143, "IMAP"),
    (161, "SNMP"),
    (389, "LDAP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (465, "SMTPS"),
    (514, "Syslog"),
    (587, "Submission"),
    (631, "IPP"),
    (636, "LDAPS"),
    (873, "Rsync"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1433, "MSSQL"),
    (1521, "Oracle"),
    (1883, "MQTT"),
    (2049, "NFS"),
    (2375, "Docker"),
    (2376, "Docker-TLS"),
    (3000, "Grafana"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5353, "mDNS"),
    (5432, "PostgreSQL"),
    (5672, "RabbitMQ"),
    (5900, "VNC"),
    (5985, "WinRM"),
    (5986, "WinRM-HTTPS"),
    (6379, "Redis"),
    (6443, "Kubernetes-API"),
    (8000, "HTTP-Alt"),
    (8080, "HTTP-Alt"),
    (8443, "HTTPS-Alt"),
    (8888, "HTTP-Alt"),
    (9000, "HTTP-Alt"),
    (9090, "Prometheus"),
    (9092, "Kafka"),
    (9100, "Node-Exporter"),
    (9200, "Elasticsearch"),
    (10250, "Kubelet"),
    (11211, "Memcached"),
    (15672, "RabbitMQ-Mgmt"),
    (27017, "MongoDB"),
];

/// Name from the static well-known-port table.
pub fn well_known(port: u16) -> Option<&'static str> {
    WELL_KNOWN.iter().find(|(p, _)| *p == port).map(|(_, n)| *n)
}

/// True for names that carry no information.
pub fn is_unknown(name: &str) -> bool {
    let t = name.trim();
    t.is_empty() || t.eq_ignore_ascii_case(UNKNOWN_SERVICE) || t == "-"
}

/// Location of the OS services database.
pub fn default_services_path() -> PathBuf {
    if cfg!(windows) {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
        Path::new(&root).join(r"System32\drivers\etc\services")
    } else {
        PathBuf::from("/etc/services")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceNames {
    db: HashMap<(u16, String), String>,
}

impl ServiceNames {
    /// Load the system services database. A missing or unreadable file leaves
    /// only the static table.
    pub fn load_default() -> Self {
        Self::load(&default_services_path())
    }

    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let names = Self::parse(&text);
                if names.is_empty() {
                    debug!("services database {} has no entries", path.display());
                } else {
                    debug!(entries = names.len(), "loaded services database {}", path.display());
                }
                names
            }
            Err(e) => {
                debug!("services database {} unavailable: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse `/etc/services` syntax: `name port/proto [aliases...] [# comment]`.
    /// The first entry for a port/proto pair wins.
    pub fn parse(text: &str) -> Self {
        let mut db = HashMap::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else { continue };
            let Some((port, proto)) = port_proto.split_once('/') else { continue };
            let Ok(port) = port.parse::<u16>() else { continue };
            db.entry((port, proto.to_ascii_lowercase())).or_insert_with(|| name.to_string());
        }
        ServiceNames { db }
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Services database entry, then the static table.
    pub fn lookup(&self, port: u16, protocol: Protocol) -> Option<String> {
        self.db
            .get(&(port, protocol.transport().to_string()))
            .cloned()
            .or_else(|| well_known(port).map(str::to_string))
    }

    /// Full fallback chain ending in `Unknown`.
    pub fn resolve(&self, process: Option<&str>, port: u16, protocol: Protocol) -> String {
        if let Some(p) = process.map(str::trim).filter(|p| !is_unknown(p)) {
            return p.to_string();
        }
        self.lookup(port, protocol).unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
    }
}
