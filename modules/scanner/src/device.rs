//! Metadata of the scanned machine for the report header.

use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::collections::BTreeSet;
use std::net::IpAddr;
use svcscan_core::DeviceInfo;
use tracing::warn;

pub fn hostname() -> String {
    let from_os = match ::hostname::get() {
        Ok(h) => Some(h.to_string_lossy().trim().to_string()),
        Err(e) => {
            warn!("reading hostname failed: {}", e);
            None
        }
    };
    from_os
        .filter(|h| !h.is_empty())
        .or_else(|| {
            ["HOSTNAME", "COMPUTERNAME"]
                .iter()
                .find_map(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()))
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// `PRETTY_NAME` from an os-release file.
pub fn pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|l| {
        let v = l.trim().strip_prefix("PRETTY_NAME=")?;
        let v = v.trim_matches('"').trim_matches('\'').trim();
        (!v.is_empty()).then(|| v.to_string())
    })
}

pub fn os_name() -> String {
    ["/etc/os-release", "/usr/lib/os-release"]
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok().and_then(|s| pretty_name(&s)))
        .unwrap_or_else(|| std::env::consts::OS.to_string())
}

/// Hostname, OS, addresses and MACs. Interface listing failures leave the
/// address lists empty.
pub fn device_info() -> DeviceInfo {
    let mut info = DeviceInfo { hostname: hostname(), os: os_name(), ..Default::default() };
    let interfaces = match NetworkInterface::show() {
        Ok(list) => list,
        Err(e) => {
            warn!("listing network interfaces failed: {}", e);
            return info;
        }
    };
    let mut v4 = BTreeSet::new();
    let mut v6 = BTreeSet::new();
    let mut macs = BTreeSet::new();
    for iface in interfaces {
        for addr in &iface.addr {
            match addr.ip() {
                IpAddr::V4(ip) => {
                    v4.insert(ip.to_string());
                }
                IpAddr::V6(ip) => {
                    v6.insert(ip.to_string());
                }
            }
        }
        if let Some(mac) = iface.mac_addr.filter(|m| !m.is_empty() && m != "00:00:00:00:00:00") {
            macs.insert(mac.to_lowercase());
        }
    }
    info.ipv4 = v4.into_iter().collect();
    info.ipv6 = v6.into_iter().collect();
    info.macs = macs.into_iter().collect();
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_release_pretty_name() {
        let text = "NAME=\"Ubuntu\"\nVERSION_ID=\"24.04\"\nPRETTY_NAME=\"Ubuntu 24.04 LTS\"\n";
        assert_eq!(pretty_name(text).as_deref(), Some("Ubuntu 24.04 LTS"));
        assert_eq!(pretty_name("NAME=Alpine\n"), None);
    }

    #[test]
    fn device_has_hostname_and_os() {
        let d = device_info();
        assert!(!d.hostname.is_empty());
        assert!(!d.os.is_empty());
    }
}
