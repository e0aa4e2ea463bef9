//! Scan data model: candidates, probe results and the aggregated records.

use std::fmt;
use std::str::FromStr;

use crate::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
        }
    }

    /// Transport the protocol runs over, used for services database lookups.
    pub fn transport(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            _ => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" | "TCP6" => Ok(Protocol::Tcp),
            "UDP" | "UDP6" => Ok(Protocol::Udp),
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            other => Err(ScanError::Parse(format!("unknown protocol: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeStatus {
    Success,
    Refused,
    Timeout,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Success => "success",
            ProbeStatus::Refused => "refused",
            ProbeStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeStatus {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "success" => Ok(ProbeStatus::Success),
            "refused" => Ok(ProbeStatus::Refused),
            "timeout" => Ok(ProbeStatus::Timeout),
            other => Err(ScanError::Parse(format!("unknown status: {other}"))),
        }
    }
}

/// An unverified claim from one enumerator that something listens on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub service_name: String,
    pub protocol: Protocol,
    pub port: u16,
    pub source: String,
    /// Enumerator-supplied detail such as `image=nginx:1.25` or `desc=OpenSSH server`.
    pub note: Option<String>,
}

impl Candidate {
    pub fn new(service_name: impl Into<String>, protocol: Protocol, port: u16, source: impl Into<String>) -> Self {
        Candidate { service_name: service_name.into(), protocol, port, source: source.into(), note: None }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.note = if note.is_empty() { None } else { Some(note) };
        self
    }
}

/// Outcome of a raw TCP connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResult {
    pub status: ProbeStatus,
    pub latency_ms: u64,
}

/// Outcome of application-layer protocol detection on an open port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffResult {
    pub protocol: Protocol,
    pub note: String,
}

impl SniffResult {
    pub fn plain_tcp() -> Self {
        SniffResult { protocol: Protocol::Tcp, note: String::new() }
    }
}

/// Combined result of one probe-and-sniff task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// `None` for ports that are never actively probed (UDP).
    pub status: Option<ProbeStatus>,
    pub latency_ms: Option<u64>,
    pub detected_protocol: Protocol,
    pub note: String,
}

impl ProbeOutcome {
    /// Listening but not probed.
    pub fn unprobed(protocol: Protocol) -> Self {
        ProbeOutcome { status: None, latency_ms: None, detected_protocol: protocol, note: String::new() }
    }

    /// Abandoned at the scan deadline.
    pub fn abandoned(protocol: Protocol, latency_ms: u64) -> Self {
        ProbeOutcome {
            status: Some(ProbeStatus::Timeout),
            latency_ms: Some(latency_ms),
            detected_protocol: protocol,
            note: String::new(),
        }
    }
}

/// The aggregated, user-visible unit of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub hostname: String,
    pub service_name: String,
    pub protocol: Protocol,
    pub port: u16,
    pub status: Option<ProbeStatus>,
    pub latency_ms: Option<u64>,
    pub source: String,
    pub note: String,
}

/// Metadata describing the scanned device, written ahead of the records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub hostname: String,
    pub os: String,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub macs: Vec<String>,
}
