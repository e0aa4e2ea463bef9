use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("cannot write report log {path}: {source}")]
    LogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{program}` failed: {reason}")]
    Command { program: String, reason: String },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("parse error: {0}")]
    Parse(String),
}
