#[cfg(test)]
pub mod fake;
pub mod system;

use crate::state::ServiceState;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Reason a single probe could not produce a value. The sampler substitutes
/// a default for the affected field and carries on.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe unavailable: {0}")]
    Unavailable(String),
    #[error("probe i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of raw host measurements.
///
/// Calls are synchronous and may block (sysinfo refreshes, `systemctl`,
/// directory walks); the sampler runs each one on the blocking pool under a
/// timeout.
pub trait SystemProbe: Send + Sync + 'static {
    fn cpu_percent(&self) -> Result<f64, ProbeError>;

    fn memory_percent(&self) -> Result<f64, ProbeError>;

    fn disk_percent(&self) -> Result<u8, ProbeError>;

    fn load_average(&self) -> Result<f64, ProbeError>;

    fn service_state(&self, name: &str) -> Result<ServiceState, ProbeError>;

    /// Counts regular files below `path`. An empty `extensions` list counts
    /// every file.
    fn count_files(&self, path: &Path, extensions: &[String]) -> Result<u64, ProbeError>;
}
