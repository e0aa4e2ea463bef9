//! Real network transport: tokio sockets for connect and banner, reqwest for HTTP(S).

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use svcscan_core::{ConnectResult, ProbeStatus, SniffResult};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::{banner, sniff, Transport};

pub struct NetTransport {
    client: Client,
}

impl NetTransport {
    pub fn new() -> Result<Self> {
        let client = sniff::build_client(&format!("svcscan/{}", env!("CARGO_PKG_VERSION")))?;
        Ok(NetTransport { client })
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn connect(&self, addr: SocketAddr, limit: Duration) -> ConnectResult {
        let start = Instant::now();
        let status = match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => ProbeStatus::Success,
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => ProbeStatus::Timeout,
            Ok(Err(e)) => {
                trace!("{} connect error: {}", addr, e);
                ProbeStatus::Refused
            }
            Err(_) => ProbeStatus::Timeout,
        };
        ConnectResult { status, latency_ms: start.elapsed().as_millis() as u64 }
    }

    async fn sniff(&self, addr: SocketAddr, limit: Duration) -> SniffResult {
        if let Some(hit) = sniff::detect(&self.client, addr, limit).await {
            return SniffResult { protocol: hit.protocol, note: hit.summary() };
        }
        match banner::grab(addr, limit).await {
            Ok(text) if !text.is_empty() => SniffResult { note: text, ..SniffResult::plain_tcp() },
            Ok(_) => SniffResult::plain_tcp(),
            Err(e) => {
                trace!("{} banner grab failed: {}", addr, e);
                SniffResult::plain_tcp()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcscan_core::Protocol;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn closed_port_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let t = NetTransport::new().unwrap();
        let r = t.connect(addr, Duration::from_millis(500)).await;
        assert!(matches!(r.status, ProbeStatus::Refused | ProbeStatus::Timeout));
        assert!(r.latency_ms <= 500);
    }

    #[tokio::test]
    async fn open_port_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let t = NetTransport::new().unwrap();
        let r = t.connect(addr, Duration::from_millis(500)).await;
        assert_eq!(r.status, ProbeStatus::Success);
        drop(listener);
    }

    #[tokio::test]
    async fn banner_service_stays_tcp_with_note() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut s, _)) = listener.accept().await else { break };
                let _ = s.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
            }
        });
        let t = NetTransport::new().unwrap();
        let r = t.sniff(addr, Duration::from_millis(500)).await;
        assert_eq!(r.protocol, Protocol::Tcp);
        assert_eq!(r.note, "SSH-2.0-OpenSSH_9.6");
    }
}
