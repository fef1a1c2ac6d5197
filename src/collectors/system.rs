use crate::collectors::{ProbeError, SystemProbe};
use crate::state::ServiceState;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::debug;

/// Probe backed by the running host: sysinfo for resources, `systemctl` for
/// unit state and a plain directory walk for file counts.
pub struct HostProbe {
    system: Mutex<System>,
    command_timeout: Duration,
}

impl HostProbe {
    /// `command_timeout` bounds each `systemctl` child; it is killed once
    /// the limit passes.
    pub fn new(command_timeout: Duration) -> Self {
        let mut system = System::new();
        // baseline for the first CPU delta
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
            command_timeout,
        }
    }

    /// Never waits: a refresh still stuck from an earlier cycle makes the
    /// other sysinfo fields unavailable instead of queueing behind it.
    fn system(&self) -> Result<MutexGuard<'_, System>, ProbeError> {
        self.system.try_lock().map_err(|err| match err {
            TryLockError::WouldBlock => {
                ProbeError::Unavailable("sysinfo refresh still in progress".to_string())
            }
            TryLockError::Poisoned(_) => {
                ProbeError::Unavailable("sysinfo state poisoned".to_string())
            }
        })
    }
}

impl SystemProbe for HostProbe {
    fn cpu_percent(&self) -> Result<f64, ProbeError> {
        let mut system = self.system()?;
        system.refresh_cpu();
        if system.cpus().is_empty() {
            return Err(ProbeError::Unavailable("no cpus reported".to_string()));
        }
        Ok(system.global_cpu_info().cpu_usage() as f64)
    }

    fn memory_percent(&self) -> Result<f64, ProbeError> {
        let mut system = self.system()?;
        system.refresh_memory();
        percent(system.used_memory(), system.total_memory())
            .ok_or_else(|| ProbeError::Unavailable("total memory is 0".to_string()))
    }

    fn disk_percent(&self) -> Result<u8, ProbeError> {
        let mut system = self.system()?;
        system.refresh_disks_list();
        system.refresh_disks();
        let root = system
            .disks()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .ok_or_else(|| ProbeError::Unavailable("no filesystem mounted at /".to_string()))?;

        let total = root.total_space();
        let used = total.saturating_sub(root.available_space());
        let pct = percent(used, total)
            .ok_or_else(|| ProbeError::Unavailable("root filesystem size is 0".to_string()))?;
        // Rounded up like df. sysinfo only reports available space, so
        // blocks reserved for root count as used here.
        Ok(pct.ceil().clamp(0.0, 100.0) as u8)
    }

    fn load_average(&self) -> Result<f64, ProbeError> {
        let system = self.system()?;
        let one = system.load_average().one;
        if one < 0.0 {
            return Err(ProbeError::Unavailable(
                "load average not supported on this platform".to_string(),
            ));
        }
        Ok(one)
    }

    fn service_state(&self, name: &str) -> Result<ServiceState, ProbeError> {
        let runtime = Handle::try_current()
            .map_err(|_| ProbeError::Unavailable("no runtime for systemctl".to_string()))?;
        let mut command = Command::new("systemctl");
        command.args(["is-active", name]).kill_on_drop(true);

        let output = runtime
            .block_on(async { tokio::time::timeout(self.command_timeout, command.output()).await })
            .map_err(|_| ProbeError::Timeout(self.command_timeout))??;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let state = if stdout.trim() == "active" {
            ServiceState::Active
        } else {
            ServiceState::Inactive
        };
        debug!(service = %name, raw = %stdout.trim(), "systemctl is-active");
        Ok(state)
    }

    fn count_files(&self, path: &Path, extensions: &[String]) -> Result<u64, ProbeError> {
        count_matching_files(path, extensions)
    }
}

/// Walks `root` without following symlinks. Only an unreadable `root` is an
/// error; unreadable subdirectories are skipped.
pub fn count_matching_files(root: &Path, extensions: &[String]) -> Result<u64, ProbeError> {
    let suffixes: Vec<String> = extensions.iter().map(|e| format!(".{e}")).collect();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    let mut count = 0_u64;

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if dir == root => return Err(err.into()),
            Err(err) => {
                debug!(path = %dir.display(), error = %err, "skipping unreadable directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() && has_suffix(&entry.file_name(), &suffixes) {
                count += 1;
            }
        }
    }

    Ok(count)
}

fn has_suffix(file_name: &std::ffi::OsStr, suffixes: &[String]) -> bool {
    if suffixes.is_empty() {
        return true;
    }
    let name = file_name.to_string_lossy();
    suffixes.iter().any(|s| name.ends_with(s.as_str()))
}

fn percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((used as f64 / total as f64) * 100.0)
}
