use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// `scan:` section of `svcscan.yaml`. Every key mirrors a command-line flag.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    pub host: Option<String>,
    pub timeout_ms: Option<u64>,
    pub scan_timeout_ms: Option<u64>,
    pub workers: Option<usize>,
    pub qps: Option<u32>,
    pub retries: Option<u32>,
    pub no_proc: Option<bool>,
    pub no_sockets: Option<bool>,
    pub no_docker: Option<bool>,
    pub no_systemd: Option<bool>,
    pub no_kubernetes: Option<bool>,
    pub log: Option<PathBuf>,
    pub csv: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub scan: Option<ScanConfig>,
}

pub fn parse_config(text: &str) -> Option<Config> {
    match serde_yaml::from_str(text) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!("ignoring config file: {}", e);
            None
        }
    }
}

/// Load `path`, or `./svcscan.yaml` when present.
pub fn load_config(path: Option<&Path>) -> Option<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("svcscan.yaml");
            if p.exists() { p.to_path_buf() } else { return None; }
        }
    };
    match fs::read_to_string(&path) {
        Ok(s) => parse_config(&s),
        Err(e) => {
            warn!(path = %path.display(), "cannot read config file: {}", e);
            None
        }
    }
}
