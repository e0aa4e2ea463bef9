//! Aggregation, report emission and the downstream inventory parser.

pub mod aggregate;
pub mod emit;
pub mod inventory;

pub use aggregate::{aggregate, Aggregator};
pub use emit::{default_log_path, render_report, write_csv, ReportWriter};
pub use inventory::{parse_log, DeviceInventory, ServiceEntry};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}
