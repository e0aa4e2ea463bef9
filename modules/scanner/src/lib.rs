//! Scan pipeline: enumerate, probe each unique port once, aggregate.

use anyhow::Result;
use probe::{run_pool, NetTransport, PoolOptions, ProbeOptions, ProbeTask, Prober, Transport};
use sources::{build_enumerators, enumerate_all, SourceConfig};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use svcscan_core::ratelimiter::RateLimiter;
use svcscan_core::{Candidate, DeviceInfo, ProbeOutcome, ServiceNames, ServiceRecord};
use tokio::time::Instant;
use tracing::{info, warn};

pub mod device;

pub use device::device_info;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Address every candidate port is probed on.
    pub host: IpAddr,
    pub probe: ProbeOptions,
    pub workers: usize,
    /// Global deadline for the probe phase.
    pub scan_timeout: Option<Duration>,
    /// Connect attempts per second; 0 disables pacing.
    pub qps: u32,
    pub sources: SourceConfig,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            probe: ProbeOptions::default(),
            workers: 10,
            scan_timeout: None,
            qps: 0,
            sources: SourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub started_at: String,
    pub device: DeviceInfo,
    pub records: Vec<ServiceRecord>,
    pub candidates: usize,
    pub dropped: usize,
}

impl ScanReport {
    pub fn lines(&self) -> Vec<String> {
        report::render_report(&self.device, &self.records, &self.started_at)
    }
}

/// Probe the candidates' ports and merge them into records. Each distinct
/// `(port, declared protocol)` becomes one pool task; the probe cache makes
/// any further overlap free.
pub async fn scan_candidates(
    candidates: &[Candidate],
    transport: Arc<dyn Transport>,
    names: &ServiceNames,
    hostname: &str,
    opts: &ScanOptions,
) -> (Vec<ServiceRecord>, usize) {
    let task_of = |c: &Candidate| ProbeTask { host: opts.host, port: c.port, protocol: c.protocol };
    let mut seen = HashSet::new();
    let tasks: Vec<ProbeTask> = candidates.iter().map(task_of).filter(|t| seen.insert(*t)).collect();

    let mut prober = Prober::new(transport, opts.probe.clone());
    if opts.qps > 0 {
        prober = prober.with_rate_limit(Arc::new(RateLimiter::new(opts.qps)));
    }
    let pool = PoolOptions { width: opts.workers, deadline: opts.scan_timeout.map(|t| Instant::now() + t) };
    let outcomes = run_pool(Arc::new(prober), tasks, pool).await;

    let pairs: Vec<(&Candidate, ProbeOutcome)> = candidates
        .iter()
        .map(|c| {
            let outcome = outcomes.get(&task_of(c)).cloned().unwrap_or_else(|| ProbeOutcome::abandoned(c.protocol, 0));
            (c, outcome)
        })
        .collect();
    report::aggregate(hostname, names, pairs.iter().map(|(c, o)| (*c, o)))
}

/// Full local scan with the network transport and the configured enumerators.
pub async fn scan(opts: &ScanOptions) -> Result<ScanReport> {
    let started_at = report::now_rfc3339();
    let device = tokio::task::spawn_blocking(device_info).await?;
    if !opts.sources.any_enabled() {
        warn!("no enumerator enabled, nothing to scan");
        return Ok(ScanReport { started_at, device, records: Vec::new(), candidates: 0, dropped: 0 });
    }

    let names = Arc::new(tokio::task::spawn_blocking(ServiceNames::load_default).await?);
    let enumerators = build_enumerators(&opts.sources, names.clone());
    let candidates = enumerate_all(&enumerators).await;
    let transport: Arc<dyn Transport> = Arc::new(NetTransport::new()?);

    let (records, dropped) = scan_candidates(&candidates, transport, &names, &device.hostname, opts).await;
    info!(candidates = candidates.len(), records = records.len(), dropped, "scan complete");
    Ok(ScanReport { started_at, device, records, candidates: candidates.len(), dropped })
}
