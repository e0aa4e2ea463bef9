//! Semicolon-delimited report lines, appended to the scan log and echoed to stdout.
//!
//! ```text
//! # scan 2026-10-18T09:12:44Z
//! # hostname;os;ipv4s;ipv6s;macs
//! # web01;Ubuntu 24.04 LTS;10.0.0.5,127.0.0.1;::1;52:54:00:12:34:56
//! # hostname;serviceName;protocol;port;status;latencyMs;source;note
//! web01;sshd;TCP;22;success;0;proc;pid=812 | SSH-2.0-OpenSSH_9.6
//! ```

use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use svcscan_core::{DeviceInfo, ScanError, ServiceRecord};

pub const LOG_FILE_NAME: &str = "service-discovery.log";
pub const DEVICE_LEGEND: &str = "hostname;os;ipv4s;ipv6s;macs";
pub const RECORD_LEGEND: &str = "hostname;serviceName;protocol;port;status;latencyMs;source;note";

pub fn default_log_path() -> PathBuf {
    std::env::temp_dir().join(LOG_FILE_NAME)
}

/// Keep a value inside its field: no delimiters, no line breaks.
pub fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| match c {
            ';' => ',',
            '\r' | '\n' => ' ',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn render_device(d: &DeviceInfo) -> String {
    format!(
        "# {};{};{};{};{}",
        sanitize(&d.hostname),
        sanitize(&d.os),
        sanitize(&d.ipv4.join(",")),
        sanitize(&d.ipv6.join(",")),
        sanitize(&d.macs.join(",")),
    )
}

pub fn render_record(r: &ServiceRecord) -> String {
    format!(
        "{};{};{};{};{};{};{};{}",
        sanitize(&r.hostname),
        sanitize(&r.service_name),
        r.protocol,
        r.port,
        r.status.map(|s| s.to_string()).unwrap_or_default(),
        r.latency_ms.map(|l| l.to_string()).unwrap_or_default(),
        sanitize(&r.source),
        sanitize(&r.note),
    )
}

/// Header block followed by one line per record.
pub fn render_report(device: &DeviceInfo, records: &[ServiceRecord], started_at: &str) -> Vec<String> {
    let mut lines = Vec::with_capacity(records.len() + 4);
    lines.push(format!("# scan {started_at}"));
    lines.push(format!("# {DEVICE_LEGEND}"));
    lines.push(render_device(device));
    lines.push(format!("# {RECORD_LEGEND}"));
    lines.extend(records.iter().map(render_record));
    lines
}

/// Append-only writer for the scan log. Any failure to open or write it is fatal.
pub struct ReportWriter {
    path: PathBuf,
    out: BufWriter<File>,
    echo: bool,
}

impl ReportWriter {
    pub fn open(path: &Path, echo: bool) -> Result<Self, ScanError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ScanError::LogWrite { path: path.to_path_buf(), source })?;
        Ok(ReportWriter { path: path.to_path_buf(), out: BufWriter::new(file), echo })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_lines(&mut self, lines: &[String]) -> Result<(), ScanError> {
        for line in lines {
            writeln!(self.out, "{line}").map_err(|source| self.log_error(source))?;
            if self.echo {
                println!("{line}");
            }
        }
        self.out.flush().map_err(|source| self.log_error(source))
    }

    fn log_error(&self, source: std::io::Error) -> ScanError {
        ScanError::LogWrite { path: self.path.clone(), source }
    }
}

/// Same records as CSV with a header row.
pub fn write_csv(path: &Path, records: &[ServiceRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(File::create(path)?);
    wtr.write_record(["hostname", "serviceName", "protocol", "port", "status", "latencyMs", "source", "note"])?;
    for r in records {
        wtr.write_record([
            r.hostname.clone(),
            r.service_name.clone(),
            r.protocol.to_string(),
            r.port.to_string(),
            r.status.map(|s| s.to_string()).unwrap_or_default(),
            r.latency_ms.map(|l| l.to_string()).unwrap_or_default(),
            r.source.clone(),
            r.note.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
