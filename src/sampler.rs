use crate::collectors::{ProbeError, SystemProbe};
use crate::config::Config;
use crate::health::classify;
use crate::state::{HealthState, MetricsSnapshot, Resources, ServiceState, SnapshotStore};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("probe task failed: {0}")]
    ProbeTask(#[from] JoinError),
}

/// The parts of [`Config`] the sampler needs.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub services: Vec<String>,
    pub critical_services: Vec<String>,
    pub roms_path: PathBuf,
    pub saves_path: PathBuf,
    pub rom_extensions: Vec<String>,
    pub probe_timeout: Duration,
}

impl From<&Config> for SamplerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            services: cfg.services.iter().map(|s| s.name.clone()).collect(),
            critical_services: cfg.critical_services(),
            roms_path: cfg.roms_path.clone(),
            saves_path: cfg.saves_path.clone(),
            rom_extensions: cfg.rom_extensions.clone(),
            probe_timeout: cfg.probe_timeout(),
        }
    }
}

pub struct Sampler {
    probe: Arc<dyn SystemProbe>,
    store: Arc<SnapshotStore>,
    cfg: SamplerConfig,
    force_error: bool,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Sampler {
    pub fn new(probe: Arc<dyn SystemProbe>, store: Arc<SnapshotStore>, cfg: SamplerConfig) -> Self {
        Self {
            probe,
            store,
            cfg,
            force_error: false,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Gathers one snapshot without publishing it. A probe that fails or
    /// times out only zeroes its own field; a probe task that dies takes the
    /// whole cycle down.
    pub async fn sample(&self) -> Result<MetricsSnapshot, SampleError> {
        let cpu_percent = self.probe_or("cpu", 0.0, |p| p.cpu_percent()).await?;
        let memory_percent = self.probe_or("memory", 0.0, |p| p.memory_percent()).await?;
        let disk_percent = self.probe_or("disk", 0, |p| p.disk_percent()).await?;
        let load_average = self.probe_or("load", 0.0, |p| p.load_average()).await?;
        let resources = Resources {
            cpu_percent,
            memory_percent,
            disk_percent,
            load_average,
        };

        let rom_count = {
            let path = self.cfg.roms_path.clone();
            let extensions = self.cfg.rom_extensions.clone();
            self.probe_or("rom_count", 0, move |p| p.count_files(&path, &extensions))
                .await?
        };
        let save_count = {
            let path = self.cfg.saves_path.clone();
            self.probe_or("save_count", 0, move |p| p.count_files(&path, &[]))
                .await?
        };

        let mut services = crate::state::ServiceStatuses::new();
        for name in &self.cfg.services {
            let unit = name.clone();
            let state = self
                .probe_or(name, ServiceState::Unknown, move |p| p.service_state(&unit))
                .await?;
            services.insert(name.clone(), state);
        }

        let health = classify(&resources, &services, &self.cfg.critical_services);
        let counters = self.store.counters();

        Ok(MetricsSnapshot {
            http_requests: counters.requests,
            http_errors: counters.errors,
            health,
            services,
            last_update: SystemTime::now(),
            start_time: self.store.current().start_time,
            rom_count,
            save_count,
            resources,
        })
    }

    /// One sampling cycle. On failure the previous snapshot stays current
    /// and the next snapshot that does get built is marked `Error`.
    pub async fn run_cycle(&mut self) -> Result<(), SampleError> {
        match self.sample().await {
            Ok(mut snapshot) => {
                if self.force_error {
                    snapshot.health = HealthState::Error;
                    self.force_error = false;
                }
                debug!(
                    health = snapshot.health.as_str(),
                    cpu = snapshot.resources.cpu_percent,
                    memory = snapshot.resources.memory_percent,
                    roms = snapshot.rom_count,
                    saves = snapshot.save_count,
                    "snapshot published"
                );
                self.store.publish(snapshot);
                Ok(())
            }
            Err(err) => {
                self.force_error = true;
                Err(err)
            }
        }
    }

    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("sampler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        error!(error = %err, "sampling cycle failed, keeping previous snapshot");
                    }
                }
            }
        }
    }

    async fn probe_or<T, F>(&self, field: &str, default: T, call: F) -> Result<T, SampleError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SystemProbe) -> Result<T, ProbeError> + Send + 'static,
    {
        // A call that outlived its timeout still occupies a blocking thread.
        // Until it returns, the field is not probed again.
        let Some(guard) = InFlight::claim(&self.in_flight, field) else {
            debug!(field, "previous probe call still running, using default");
            return Ok(default);
        };
        let call = move |probe: &dyn SystemProbe| {
            let _guard = guard;
            call(probe)
        };

        match run_probe(&self.probe, self.cfg.probe_timeout, call).await? {
            Ok(value) => Ok(value),
            Err(err @ ProbeError::Timeout(_)) => {
                warn!(field, error = %err, "probe timed out, using default");
                Ok(default)
            }
            Err(err) => {
                debug!(field, error = %err, "probe unavailable, using default");
                Ok(default)
            }
        }
    }
}

/// Marks a field as having a probe call on the blocking pool; released on
/// drop, including when the call panics.
struct InFlight {
    fields: Arc<Mutex<HashSet<String>>>,
    field: String,
}

impl InFlight {
    fn claim(fields: &Arc<Mutex<HashSet<String>>>, field: &str) -> Option<Self> {
        let mut set = fields.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(field.to_string()) {
            return None;
        }
        Some(Self {
            fields: Arc::clone(fields),
            field: field.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self
            .fields
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.field);
    }
}

/// Runs one blocking probe call under `timeout`. A timed out call keeps
/// running on the blocking pool but its result is discarded.
async fn run_probe<T, F>(
    probe: &Arc<dyn SystemProbe>,
    timeout: Duration,
    call: F,
) -> Result<Result<T, ProbeError>, SampleError>
where
    T: Send + 'static,
    F: FnOnce(&dyn SystemProbe) -> Result<T, ProbeError> + Send + 'static,
{
    let probe = Arc::clone(probe);
    let task = tokio::task::spawn_blocking(move || call(probe.as_ref()));
    match tokio::time::timeout(timeout, task).await {
        Ok(joined) => Ok(joined?),
        Err(_elapsed) => Ok(Err(ProbeError::Timeout(timeout))),
    }
}
