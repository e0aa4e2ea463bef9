//! Native socket table from the OS (netlink/sysctl/IP Helper through
//! `netstat2`), with owning processes resolved through `sysinfo`.

use anyhow::Result;
use async_trait::async_trait;
use netstat2::{get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState};
use std::collections::HashSet;
use std::sync::Arc;
use svcscan_core::{Candidate, Protocol, ServiceNames};

use crate::processes::ProcessTable;
use crate::Enumerator;

/// A listening TCP socket or a bound UDP socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSocket {
    pub protocol: Protocol,
    pub port: u16,
    pub pid: Option<u32>,
}

/// Blocking: queries the kernel socket table for both address families.
pub fn listening_sockets() -> Result<Vec<NativeSocket>> {
    let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
    let proto_flags = ProtocolFlags::TCP | ProtocolFlags::UDP;
    let mut out = Vec::new();
    for si in get_sockets_info(af_flags, proto_flags)? {
        let protocol = match &si.protocol_socket_info {
            ProtocolSocketInfo::Tcp(tcp) if matches!(tcp.state, TcpState::Listen) => Protocol::Tcp,
            ProtocolSocketInfo::Tcp(_) => continue,
            ProtocolSocketInfo::Udp(_) => Protocol::Udp,
        };
        let port = si.local_port();
        if port == 0 {
            continue;
        }
        out.push(NativeSocket { protocol, port, pid: si.associated_pids.first().copied() });
    }
    Ok(out)
}

/// One candidate per resolved `(name, protocol, port)`.
pub fn to_candidates<F>(sockets: &[NativeSocket], names: &ServiceNames, process_name: F) -> Vec<Candidate>
where
    F: Fn(u32) -> Option<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for sock in sockets {
        let process = sock.pid.and_then(&process_name);
        let name = names.resolve(process.as_deref(), sock.port, sock.protocol);
        if !seen.insert((name.clone(), sock.protocol, sock.port)) {
            continue;
        }
        let mut c = Candidate::new(name, sock.protocol, sock.port, "proc");
        if let Some(pid) = sock.pid {
            c = c.with_note(format!("pid={pid}"));
        }
        out.push(c);
    }
    out
}

pub struct NativeEnumerator {
    names: Arc<ServiceNames>,
}

impl NativeEnumerator {
    pub fn new(names: Arc<ServiceNames>) -> Self {
        NativeEnumerator { names }
    }
}

#[async_trait]
impl Enumerator for NativeEnumerator {
    fn name(&self) -> &'static str { "proc" }

    async fn enumerate(&self) -> Result<Vec<Candidate>> {
        let names = self.names.clone();
        let found = tokio::task::spawn_blocking(move || -> Result<Vec<Candidate>> {
            let sockets = listening_sockets()?;
            let table = ProcessTable::snapshot();
            Ok(to_candidates(&sockets, &names, |pid| table.name(pid)))
        })
        .await??;
        Ok(found)
    }
}
