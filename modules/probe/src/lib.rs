//! Probe engine: TCP connect with timeout, protocol sniffing and banner
//! capture, memoized per `(host, port)` for the lifetime of one scan.

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use svcscan_core::ratelimiter::RateLimiter;
use svcscan_core::{ConnectResult, ProbeOutcome, ProbeStatus, Protocol, SniffResult};
use tracing::debug;

pub mod banner;
pub mod cache;
pub mod net;
pub mod pool;
pub mod sniff;

pub use cache::ProbeCache;
pub use net::NetTransport;
pub use pool::{run_pool, PoolOptions};

/// Network operations behind the probe engine.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, addr: SocketAddr, limit: Duration) -> ConnectResult;
    async fn sniff(&self, addr: SocketAddr, limit: Duration) -> SniffResult;
}

/// One unit of probe work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeTask {
    pub host: IpAddr,
    pub port: u16,
    /// Declared protocol of the candidate that requested the probe.
    pub protocol: Protocol,
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub timeout: Duration,
    /// Extra connect attempts after a timeout.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions { timeout: Duration::from_millis(500), retries: 0, retry_delay: Duration::from_millis(50) }
    }
}

pub struct Prober {
    transport: Arc<dyn Transport>,
    opts: ProbeOptions,
    limiter: Option<Arc<RateLimiter>>,
    connects: ProbeCache<ConnectResult>,
    sniffs: ProbeCache<SniffResult>,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>, opts: ProbeOptions) -> Self {
        Prober { transport, opts, limiter: None, connects: ProbeCache::new(), sniffs: ProbeCache::new() }
    }

    /// Pace uncached connect attempts through a shared rate limiter.
    pub fn with_rate_limit(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Cached TCP connect. Timeouts are retried with exponential backoff and jitter.
    pub async fn connect(&self, host: IpAddr, port: u16) -> ConnectResult {
        let addr = SocketAddr::new(host, port);
        self.connects
            .get_or_probe((host, port), || async move {
                let mut attempts = 0;
                loop {
                    if let Some(l) = &self.limiter {
                        l.acquire().await;
                    }
                    let r = self.transport.connect(addr, self.opts.timeout).await;
                    attempts += 1;
                    if r.status != ProbeStatus::Timeout || attempts > self.opts.retries {
                        debug!(%addr, status = %r.status, latency_ms = r.latency_ms, "connect probe");
                        return r;
                    }
                    let base = self.opts.retry_delay.as_millis() as u64;
                    let exp = base.saturating_mul(1u64 << attempts.min(6));
                    let jitter = thread_rng().gen_range(0..(exp / 4 + 1));
                    tokio::time::sleep(Duration::from_millis(exp + jitter)).await;
                }
            })
            .await
    }

    /// Cached protocol sniff, independent of the connect cache.
    pub async fn sniff(&self, host: IpAddr, port: u16) -> SniffResult {
        let addr = SocketAddr::new(host, port);
        self.sniffs
            .get_or_probe((host, port), || async move {
                let s = self.transport.sniff(addr, self.opts.timeout).await;
                debug!(%addr, protocol = %s.protocol, note = %s.note, "protocol sniff");
                s
            })
            .await
    }

    /// Connect, then sniff when the port is open and declared as plain TCP.
    /// UDP is never probed.
    pub async fn probe(&self, task: ProbeTask) -> ProbeOutcome {
        if task.protocol == Protocol::Udp {
            return ProbeOutcome::unprobed(Protocol::Udp);
        }
        let c = self.connect(task.host, task.port).await;
        let mut outcome = ProbeOutcome {
            status: Some(c.status),
            latency_ms: Some(c.latency_ms),
            detected_protocol: task.protocol,
            note: String::new(),
        };
        if c.status == ProbeStatus::Success && task.protocol == Protocol::Tcp {
            let s = self.sniff(task.host, task.port).await;
            outcome.detected_protocol = s.protocol;
            outcome.note = s.note;
        }
        outcome
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::Ordering;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn http_on(port: u16) -> MockTransport {
        let mut m = MockTransport::default();
        m.open.insert(port, SniffResult { protocol: Protocol::Http, note: "status=200".into() });
        m
    }

    #[tokio::test]
    async fn same_port_is_connected_once() {
        let mock = Arc::new(MockTransport { delay: Duration::from_millis(20), ..Default::default() });
        let prober = Prober::new(mock.clone(), ProbeOptions::default());
        let task = ProbeTask { host: LOCAL, port: 22, protocol: Protocol::Tcp };
        let (a, b) = tokio::join!(prober.probe(task), prober.probe(task));
        let c = prober.probe(task).await;
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.status, Some(ProbeStatus::Refused));
        assert_eq!(mock.connects.load(Ordering::SeqCst), 1);
        assert_eq!(mock.sniffs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_tcp_port_is_sniffed_once() {
        let mock = Arc::new(http_on(8080));
        let prober = Prober::new(mock.clone(), ProbeOptions::default());
        let task = ProbeTask { host: LOCAL, port: 8080, protocol: Protocol::Tcp };
        let first = prober.probe(task).await;
        let second = prober.probe(task).await;
        assert_eq!(first.detected_protocol, Protocol::Http);
        assert_eq!(first.status, Some(ProbeStatus::Success));
        assert_eq!(first, second);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 1);
        assert_eq!(mock.sniffs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn udp_is_never_probed() {
        let mock = Arc::new(MockTransport::default());
        let prober = Prober::new(mock.clone(), ProbeOptions::default());
        let out = prober.probe(ProbeTask { host: LOCAL, port: 53, protocol: Protocol::Udp }).await;
        assert_eq!(out.status, None);
        assert_eq!(out.latency_ms, None);
        assert_eq!(out.detected_protocol, Protocol::Udp);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn real_http_stub_is_detected() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut s, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = s.read(&mut buf).await;
                    let _ = s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
                });
            }
        });
        let prober = Prober::new(Arc::new(NetTransport::new().unwrap()), ProbeOptions::default());
        let out = prober.probe(ProbeTask { host: LOCAL, port, protocol: Protocol::Tcp }).await;
        assert_eq!(out.status, Some(ProbeStatus::Success));
        assert_eq!(out.detected_protocol, Protocol::Http);
    }

    fn retrying(retries: u32) -> ProbeOptions {
        ProbeOptions { retries, retry_delay: Duration::from_millis(1), ..ProbeOptions::default() }
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_cached() {
        let mut m = MockTransport::default();
        m.filtered.insert(9);
        let mock = Arc::new(m);
        let prober = Prober::new(mock.clone(), retrying(2));
        let task = ProbeTask { host: LOCAL, port: 9, protocol: Protocol::Tcp };
        let first = prober.probe(task).await;
        assert_eq!(first.status, Some(ProbeStatus::Timeout));
        assert_eq!(mock.connects.load(Ordering::SeqCst), 3);

        let again = prober.probe(task).await;
        assert_eq!(again, first);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn refused_is_not_retried() {
        let mock = Arc::new(MockTransport::default());
        let prober = Prober::new(mock.clone(), retrying(2));
        let out = prober.probe(ProbeTask { host: LOCAL, port: 22, protocol: Protocol::Tcp }).await;
        assert_eq!(out.status, Some(ProbeStatus::Refused));
        assert_eq!(mock.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limited_prober_paces_connects() {
        let mock = Arc::new(http_on(8080));
        let prober = Prober::new(mock.clone(), ProbeOptions::default()).with_rate_limit(Arc::new(RateLimiter::new(5)));
        let start = std::time::Instant::now();
        for port in [8080, 8081, 8082, 8083, 8084, 8085, 8080] {
            prober.probe(ProbeTask { host: LOCAL, port, protocol: Protocol::Tcp }).await;
        }
        // five permits in the first burst, the sixth distinct port waits for a refill
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(mock.connects.load(Ordering::SeqCst), 6);
        assert_eq!(mock.sniffs.load(Ordering::SeqCst), 1);
    }
}
