use crate::collectors::{ProbeError, SystemProbe};
use crate::state::ServiceState;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic probe for tests. `None` fields report unavailable.
#[derive(Default)]
pub struct StaticProbe {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub disk: Option<u8>,
    pub load: Option<f64>,
    pub services: HashMap<String, ServiceState>,
    pub file_counts: HashMap<PathBuf, u64>,
    /// Blocks `cpu_percent` for this long before answering.
    pub cpu_delay: Option<Duration>,
    /// Makes `memory_percent` panic, which aborts the sampling cycle.
    pub panic_on_memory: bool,
    pub calls: Mutex<Vec<String>>,
}

impl StaticProbe {
    pub fn healthy() -> Self {
        Self {
            cpu: Some(50.0),
            memory: Some(40.0),
            disk: Some(10),
            load: Some(0.5),
            services: [
                ("sunshine", ServiceState::Active),
                ("coinops-web", ServiceState::Active),
                ("x11-server", ServiceState::Active),
                ("openbox", ServiceState::Inactive),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
            ..Self::default()
        }
    }

    fn record(&self, call: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.to_string());
        }
    }
}

fn unavailable<T>(value: Option<T>, what: &str) -> Result<T, ProbeError> {
    value.ok_or_else(|| ProbeError::Unavailable(what.to_string()))
}

impl SystemProbe for StaticProbe {
    fn cpu_percent(&self) -> Result<f64, ProbeError> {
        self.record("cpu");
        if let Some(delay) = self.cpu_delay {
            std::thread::sleep(delay);
        }
        unavailable(self.cpu, "cpu")
    }

    fn memory_percent(&self) -> Result<f64, ProbeError> {
        self.record("memory");
        if self.panic_on_memory {
            panic!("memory probe exploded");
        }
        unavailable(self.memory, "memory")
    }

    fn disk_percent(&self) -> Result<u8, ProbeError> {
        self.record("disk");
        unavailable(self.disk, "disk")
    }

    fn load_average(&self) -> Result<f64, ProbeError> {
        self.record("load");
        unavailable(self.load, "load")
    }

    fn service_state(&self, name: &str) -> Result<ServiceState, ProbeError> {
        self.record(name);
        unavailable(self.services.get(name).copied(), name)
    }

    fn count_files(&self, path: &Path, _extensions: &[String]) -> Result<u64, ProbeError> {
        self.record("count_files");
        unavailable(
            self.file_counts.get(path).copied(),
            &path.display().to_string(),
        )
    }
}
