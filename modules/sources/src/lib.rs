//! Source enumerators: backends that list locally claimed listening ports
//! without testing reachability.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use svcscan_core::{Candidate, ServiceNames};
use tracing::{debug, info, warn};

pub mod command;
pub mod docker;
pub mod kubernetes;
pub mod native;
pub mod processes;
pub mod sockets;
pub mod systemd;

pub use docker::DockerEnumerator;
pub use kubernetes::KubernetesEnumerator;
pub use native::NativeEnumerator;
pub use sockets::SocketTableEnumerator;
pub use systemd::SystemdEnumerator;

#[async_trait]
pub trait Enumerator: Send + Sync {
    /// Backend name used in diagnostics.
    fn name(&self) -> &'static str;
    async fn enumerate(&self) -> Result<Vec<Candidate>>;
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub proc: bool,
    pub sockets: bool,
    pub docker: bool,
    pub systemd: bool,
    pub kubernetes: bool,
    /// Upper bound for each backend command invocation.
    pub command_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            proc: true,
            sockets: true,
            docker: true,
            systemd: true,
            kubernetes: true,
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl SourceConfig {
    pub fn any_enabled(&self) -> bool {
        self.proc || self.sockets || self.docker || self.systemd || self.kubernetes
    }
}

/// Build the enabled enumerators in the fixed source order:
/// native socket table, command socket table, container runtime, init system, orchestrator.
pub fn build_enumerators(cfg: &SourceConfig, names: Arc<ServiceNames>) -> Vec<Box<dyn Enumerator>> {
    let mut out: Vec<Box<dyn Enumerator>> = Vec::new();
    if cfg.proc {
        out.push(Box::new(NativeEnumerator::new(names.clone())));
    }
    if cfg.sockets {
        out.push(Box::new(SocketTableEnumerator::new(names.clone(), cfg.command_timeout)));
    }
    if cfg.docker {
        out.push(Box::new(DockerEnumerator::new(cfg.command_timeout)));
    }
    if cfg.systemd {
        out.push(Box::new(SystemdEnumerator::new(cfg.command_timeout)));
    }
    if cfg.kubernetes {
        out.push(Box::new(KubernetesEnumerator::new(cfg.command_timeout)));
    }
    out
}

/// Run every enumerator in order. A failing backend is logged and contributes
/// nothing; the returned list preserves source order.
pub async fn enumerate_all(enumerators: &[Box<dyn Enumerator>]) -> Vec<Candidate> {
    let mut all = Vec::new();
    for e in enumerators {
        match e.enumerate().await {
            Ok(found) => {
                info!(source = e.name(), count = found.len(), "enumerated candidates");
                for c in &found {
                    debug!(source = %c.source, port = c.port, protocol = %c.protocol, name = %c.service_name, "candidate");
                }
                all.extend(found);
            }
            Err(err) => warn!(source = e.name(), "enumerator failed: {:#}", err),
        }
    }
    all
}

/// Port from an address such as `0.0.0.0:22`, `[::]:80`, `*:5353` or `127.0.0.53%lo:53`.
pub(crate) fn port_of(addr: &str) -> Option<u16> {
    let (_, port) = addr.rsplit_once(':')?;
    port.parse().ok().filter(|p: &u16| *p != 0)
}
