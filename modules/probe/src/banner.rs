//! Raw banner capture for services that speak first.

use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

pub const BANNER_MAX: usize = 1024;

/// Connect and read up to `BANNER_MAX` bytes until EOF or the time budget runs out.
pub async fn grab(addr: SocketAddr, limit: Duration) -> Result<String> {
    let deadline = Instant::now() + limit;
    let mut stream = timeout(limit, TcpStream::connect(addr)).await??;
    let mut buf = vec![0u8; BANNER_MAX];
    let mut filled = 0;
    while filled < BANNER_MAX {
        match timeout_at(deadline, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if filled == 0 => return Err(e.into()),
            Ok(Err(_)) => break,
        }
    }
    Ok(clean_banner(&buf[..filled]))
}

/// Replace control characters with spaces and collapse whitespace runs.
pub fn clean_banner(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let spaced: String = text.chars().map(|c| if c.is_control() { ' ' } else { c }).collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}
