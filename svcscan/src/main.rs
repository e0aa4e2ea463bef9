use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use probe::ProbeOptions;
use report::ReportWriter;
use scanner::ScanOptions;
use sources::SourceConfig;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_TIMEOUT_MS: u64 = 500;
const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "svcscan", version, about = "Local service discovery scanner")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./svcscan.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug diagnostics on stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true, env = "SVCSCAN_VERBOSE")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Enumerate and probe locally listening services, append the report to the log
    Scan(ScanArgs),
    /// Build the JSON device inventory from a scan log
    Parse {
        /// Scan log to read (default: <temp>/service-discovery.log)
        #[arg(long, value_name = "FILE")]
        log: Option<PathBuf>,
        /// Output file (overwrites). Default: stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Address the discovered ports are probed on
    #[arg(long, env = "SVCSCAN_HOST", default_value = DEFAULT_HOST)]
    host: String,
    /// Timeout per probe in milliseconds
    #[arg(long, env = "SVCSCAN_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
    /// Deadline for the whole probe phase in milliseconds
    #[arg(long, env = "SVCSCAN_SCAN_TIMEOUT_MS")]
    scan_timeout_ms: Option<u64>,
    /// Max concurrent probes
    #[arg(long, env = "SVCSCAN_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    /// QPS cap for connection attempts; 0 disables pacing
    #[arg(long, env = "SVCSCAN_QPS", default_value_t = 0)]
    qps: u32,
    /// Retries per port after a timeout
    #[arg(long, env = "SVCSCAN_RETRIES", default_value_t = 0)]
    retries: u32,
    /// Skip the native socket table
    #[arg(long, env = "SVCSCAN_NO_PROC")]
    no_proc: bool,
    /// Skip ss/netstat/lsof
    #[arg(long, env = "SVCSCAN_NO_SOCKETS")]
    no_sockets: bool,
    /// Skip Docker containers
    #[arg(long, env = "SVCSCAN_NO_DOCKER")]
    no_docker: bool,
    /// Skip systemd units
    #[arg(long, env = "SVCSCAN_NO_SYSTEMD")]
    no_systemd: bool,
    /// Skip Kubernetes services
    #[arg(long, env = "SVCSCAN_NO_KUBERNETES")]
    no_kubernetes: bool,
    /// Scan log, appended to (default: <temp>/service-discovery.log)
    #[arg(long, env = "SVCSCAN_LOG", value_name = "FILE")]
    log: Option<PathBuf>,
    /// Also write the records as CSV (overwrites)
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,
}

impl ScanArgs {
    /// Apply file values to every setting still at its default.
    fn merge(&mut self, s: &config::ScanConfig) {
        if self.host == DEFAULT_HOST { if let Some(v) = &s.host { self.host = v.clone(); } }
        if self.timeout_ms == DEFAULT_TIMEOUT_MS { if let Some(v) = s.timeout_ms { self.timeout_ms = v; } }
        if self.scan_timeout_ms.is_none() { self.scan_timeout_ms = s.scan_timeout_ms; }
        if self.workers == DEFAULT_WORKERS { if let Some(v) = s.workers { self.workers = v; } }
        if self.qps == 0 { if let Some(v) = s.qps { self.qps = v; } }
        if self.retries == 0 { if let Some(v) = s.retries { self.retries = v; } }
        self.no_proc |= s.no_proc.unwrap_or(false);
        self.no_sockets |= s.no_sockets.unwrap_or(false);
        self.no_docker |= s.no_docker.unwrap_or(false);
        self.no_systemd |= s.no_systemd.unwrap_or(false);
        self.no_kubernetes |= s.no_kubernetes.unwrap_or(false);
        if self.log.is_none() { self.log = s.log.clone(); }
        if self.csv.is_none() { self.csv = s.csv.clone(); }
    }

    fn options(&self) -> Result<ScanOptions> {
        let host: IpAddr = self.host.parse().with_context(|| format!("invalid --host {:?}", self.host))?;
        Ok(ScanOptions {
            host,
            probe: ProbeOptions {
                timeout: Duration::from_millis(self.timeout_ms.max(1)),
                retries: self.retries,
                ..ProbeOptions::default()
            },
            workers: self.workers.max(1),
            scan_timeout: self.scan_timeout_ms.map(Duration::from_millis),
            qps: self.qps,
            sources: SourceConfig {
                proc: !self.no_proc,
                sockets: !self.no_sockets,
                docker: !self.no_docker,
                systemd: !self.no_systemd,
                kubernetes: !self.no_kubernetes,
                ..SourceConfig::default()
            },
        })
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_scan(args: &ScanArgs) -> Result<()> {
    let opts = args.options()?;
    let log_path = args.log.clone().unwrap_or_else(report::default_log_path);
    // open first so an unwritable log fails before any probing
    let mut writer = ReportWriter::open(&log_path, true)?;
    let start = Instant::now();
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(scanner::scan(&opts))?;
    writer.write_lines(&result.lines())?;
    if let Some(path) = &args.csv {
        report::write_csv(path, &result.records).with_context(|| format!("writing {}", path.display()))?;
    }
    info!(
        log = %writer.path().display(),
        records = result.records.len(),
        candidates = result.candidates,
        dropped = result.dropped,
        duration_ms = start.elapsed().as_millis() as u64,
        "report written"
    );
    Ok(())
}

fn run_parse(log: &Path, out: Option<&Path>) -> Result<()> {
    let text = std::fs::read_to_string(log).with_context(|| format!("reading {}", log.display()))?;
    let inventory = report::parse_log(&text, &report::now_rfc3339())?;
    let json = serde_json::to_string_pretty(&inventory)?;
    match out {
        Some(path) => std::fs::write(path, json + "\n").with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let loaded_cfg = config::load_config(cli.config.as_deref());
    match cli.command {
        Commands::Version => {
            println!("svcscan {} (core {})", env!("CARGO_PKG_VERSION"), svcscan_core::version());
        }
        Commands::Scan(mut args) => {
            if let Some(s) = loaded_cfg.as_ref().and_then(|c| c.scan.as_ref()) {
                args.merge(s);
            }
            run_scan(&args)?;
        }
        Commands::Parse { log, out } => {
            let log = log.unwrap_or_else(report::default_log_path);
            run_parse(&log, out.as_deref())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_args(argv: &[&str]) -> ScanArgs {
        let mut full = vec!["svcscan", "scan"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Scan(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn defaults() {
        let opts = scan_args(&[]).options().unwrap();
        assert_eq!(opts.host.to_string(), "127.0.0.1");
        assert_eq!(opts.workers, 10);
        assert_eq!(opts.probe.timeout, Duration::from_millis(500));
        assert!(opts.scan_timeout.is_none());
        assert!(opts.sources.any_enabled());
    }

    #[test]
    fn file_values_fill_defaults_only() {
        let mut args = scan_args(&["--workers", "3", "--no-docker"]);
        let file = config::ScanConfig {
            workers: Some(8),
            timeout_ms: Some(250),
            no_systemd: Some(true),
            ..Default::default()
        };
        args.merge(&file);
        let opts = args.options().unwrap();
        assert_eq!(opts.workers, 3);
        assert_eq!(opts.probe.timeout, Duration::from_millis(250));
        assert!(!opts.sources.docker);
        assert!(!opts.sources.systemd);
        assert!(opts.sources.proc);
    }

    #[test]
    fn bad_host_is_rejected() {
        assert!(scan_args(&["--host", "not-an-ip"]).options().is_err());
    }

    #[test]
    fn parse_writes_inventory_json() {
        let dir = std::env::temp_dir();
        let log = dir.join(format!("svcscan-cli-{}.log", std::process::id()));
        let out = dir.join(format!("svcscan-cli-{}.json", std::process::id()));
        std::fs::write(
            &log,
            "# scan 2026-10-18T09:12:44Z\n# hostname;os;ipv4s;ipv6s;macs\n# web01;Linux;10.0.0.5;;\n\
             # hostname;serviceName;protocol;port;status;latencyMs;source;note\nweb01;SSH;TCP;22;success;0;proc;\n",
        )
        .unwrap();
        run_parse(&log, Some(&out)).unwrap();
        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(v["name"], "web01");
        assert_eq!(v["ssh"][0]["port"], 22);
        let _ = std::fs::remove_file(&log);
        let _ = std::fs::remove_file(&out);
    }
}
