//! HTTP/HTTPS detection on an open port.

use anyhow::Result;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use svcscan_core::Protocol;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHit {
    pub protocol: Protocol,
    pub status: u16,
    pub server: Option<String>,
    pub cert_cn: Option<String>,
}

impl HttpHit {
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("status={}", self.status)];
        if let Some(s) = &self.server {
            parts.push(format!("server={s}"));
        }
        if let Some(cn) = &self.cert_cn {
            parts.push(format!("cert_cn={cn}"));
        }
        parts.join(" ")
    }
}

/// One client for both schemes: no proxy, no redirects, any certificate.
pub fn build_client(user_agent: &str) -> Result<Client> {
    let client = Client::builder()
        .redirect(Policy::none())
        .no_proxy()
        .danger_accept_invalid_certs(true)
        .tls_info(true)
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

/// GET `<scheme>://addr/`; any status line in 100..=599 is a hit.
pub async fn request(client: &Client, scheme: &str, addr: SocketAddr, limit: Duration) -> Option<HttpHit> {
    let url = format!("{scheme}://{addr}/");
    let resp = match client.get(&url).timeout(limit).send().await {
        Ok(r) => r,
        Err(e) => {
            trace!("{} no response: {}", url, e);
            return None;
        }
    };
    let status = resp.status().as_u16();
    if !(100..=599).contains(&status) {
        return None;
    }
    let server = resp
        .headers()
        .get(reqwest::header::SERVER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let cert_cn = resp
        .extensions()
        .get::<reqwest::tls::TlsInfo>()
        .and_then(|info| info.peer_certificate())
        .and_then(subject_cn);
    let protocol = if scheme == "https" { Protocol::Https } else { Protocol::Http };
    Some(HttpHit { protocol, status, server, cert_cn })
}

/// Plain HTTP first, then HTTPS. A `400` over plain HTTP is what most TLS
/// servers answer to cleartext, so HTTPS is tried and preferred in that case.
pub async fn detect(client: &Client, addr: SocketAddr, limit: Duration) -> Option<HttpHit> {
    let plain = request(client, "http", addr, limit).await;
    match plain {
        Some(hit) if hit.status != StatusCode::BAD_REQUEST.as_u16() => Some(hit),
        other => request(client, "https", addr, limit).await.or(other),
    }
}

fn subject_cn(der: &[u8]) -> Option<String> {
    use x509_parser::prelude::*;
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let cn = cert.subject().iter_common_name().next().and_then(|cn| cn.as_str().ok())?;
    Some(cn.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn stub(response: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut s, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = s.read(&mut buf).await;
                    let _ = s.write_all(response).await;
                    let _ = s.shutdown().await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn detects_plain_http() {
        let addr = stub(b"HTTP/1.1 200 OK\r\nServer: stub/1.0\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;
        let client = build_client("svcscan-test").unwrap();
        let hit = detect(&client, addr, Duration::from_millis(1000)).await.unwrap();
        assert_eq!(hit.protocol, Protocol::Http);
        assert_eq!(hit.status, 200);
        assert_eq!(hit.summary(), "status=200 server=stub/1.0");
    }

    #[tokio::test]
    async fn non_http_service_is_not_a_hit() {
        let addr = stub(b"SSH-2.0-OpenSSH_9.6\r\n").await;
        let client = build_client("svcscan-test").unwrap();
        assert!(detect(&client, addr, Duration::from_millis(500)).await.is_none());
    }

    /// Answers cleartext with 400 and TLS with 200, like most HTTPS servers.
    async fn tls_stub() -> SocketAddr {
        use std::sync::Arc;
        use tokio_rustls::rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
        use tokio_rustls::rustls::{crypto::ring, ServerConfig};

        let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key)
            .unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut s, _)) = listener.accept().await else { break };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let mut first = [0u8; 1];
                    if s.peek(&mut first).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let mut buf = [0u8; 2048];
                    // 0x16: TLS handshake record
                    if first[0] == 0x16 {
                        let Ok(mut tls) = acceptor.accept(s).await else { return };
                        let _ = tls.read(&mut buf).await;
                        let _ = tls
                            .write_all(b"HTTP/1.1 200 OK\r\nServer: tls-stub\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                            .await;
                        let _ = tls.shutdown().await;
                    } else {
                        let _ = s.read(&mut buf).await;
                        let _ = s.write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
                        let _ = s.shutdown().await;
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn bad_request_over_http_upgrades_to_https() {
        let addr = tls_stub().await;
        let client = build_client("svcscan-test").unwrap();
        let hit = detect(&client, addr, Duration::from_millis(2000)).await.unwrap();
        assert_eq!(hit.protocol, Protocol::Https);
        assert_eq!(hit.status, 200);
        assert_eq!(hit.server.as_deref(), Some("tls-stub"));
        assert!(hit.cert_cn.is_some());
        assert!(hit.summary().contains("cert_cn="));
    }

    #[tokio::test]
    async fn bad_request_without_tls_stays_http() {
        let addr = stub(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let client = build_client("svcscan-test").unwrap();
        let hit = detect(&client, addr, Duration::from_millis(1000)).await.unwrap();
        assert_eq!(hit.protocol, Protocol::Http);
        assert_eq!(hit.status, 400);
    }
}
