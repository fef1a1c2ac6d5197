use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Resources {
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    #[serde(rename = "memory")]
    pub memory_percent: f64,
    #[serde(rename = "disk")]
    pub disk_percent: u8,
    #[serde(rename = "load")]
    pub load_average: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Active,
    Inactive,
    Unknown,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Warning,
    Critical,
    Error,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Error => "error",
        }
    }

    /// Value of the `gameserver_system_health` gauge.
    pub fn gauge_value(self) -> f64 {
        match self {
            Self::Healthy => 2.0,
            Self::Warning => 1.0,
            Self::Critical | Self::Error => 0.0,
        }
    }
}

pub type ServiceStatuses = BTreeMap<String, ServiceState>;

/// One published generation of metrics. Never mutated after it reaches the
/// store; the sampler replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub http_requests: u64,
    pub http_errors: u64,
    #[serde(rename = "systemStatus")]
    pub health: HealthState,
    #[serde(rename = "servicesStatus")]
    pub services: ServiceStatuses,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub last_update: SystemTime,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub start_time: SystemTime,
    pub rom_count: u64,
    pub save_count: u64,
    #[serde(rename = "systemResources")]
    pub resources: Resources,
}

impl MetricsSnapshot {
    /// Stand-in published when the very first sampling cycle fails.
    pub fn unavailable<'a>(
        start_time: SystemTime,
        services: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            http_requests: 0,
            http_errors: 0,
            health: HealthState::Error,
            services: services
                .into_iter()
                .map(|name| (name.to_string(), ServiceState::Unknown))
                .collect(),
            last_update: start_time,
            start_time,
            rom_count: 0,
            save_count: 0,
            resources: Resources::default(),
        }
    }

    pub fn uptime_seconds(&self, now: SystemTime) -> u64 {
        now.duration_since(self.start_time)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn with_counters(mut self, counters: RequestCounters) -> Self {
        self.http_requests = counters.requests;
        self.http_errors = counters.errors;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounters {
    pub requests: u64,
    pub errors: u64,
}

/// Holds the current snapshot plus the process-wide request counters.
///
/// The sampler is the only writer of the snapshot; request handlers read it
/// and bump the counters. Readers clone an `Arc` out of the watch channel, so
/// they always see one complete generation and never wait on a probe.
pub struct SnapshotStore {
    current: watch::Sender<Arc<MetricsSnapshot>>,
    requests: AtomicU64,
    errors: AtomicU64,
}

impl SnapshotStore {
    pub fn new(initial: MetricsSnapshot) -> Self {
        let (current, _) = watch::channel(Arc::new(initial));
        Self {
            current,
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Arc<MetricsSnapshot> {
        self.current.borrow().clone()
    }

    /// Current snapshot with the live counters instead of the ones captured
    /// at build time.
    pub fn view(&self) -> MetricsSnapshot {
        let counters = self.counters();
        self.current().as_ref().clone().with_counters(counters)
    }

    pub fn publish(&self, snapshot: MetricsSnapshot) {
        self.current.send_modify(|current| {
            let mut next = snapshot;
            if next.last_update < current.last_update {
                next.last_update = current.last_update;
            }
            *current = Arc::new(next);
        });
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<Arc<MetricsSnapshot>> {
        self.current.subscribe()
    }

    pub fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn counters(&self) -> RequestCounters {
        // errors first: an error is always counted after its request, so this
        // order keeps requests >= errors in every reading
        let errors = self.errors.load(Ordering::SeqCst);
        let requests = self.requests.load(Ordering::SeqCst);
        RequestCounters { requests, errors }
    }
}

fn serialize_rfc3339<S: Serializer>(t: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_rfc3339_millis(*t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn snapshot_at(secs: u64) -> MetricsSnapshot {
        let mut s = MetricsSnapshot::unavailable(UNIX_EPOCH, ["sunshine"]);
        s.last_update = UNIX_EPOCH + Duration::from_secs(secs);
        s
    }

    #[test]
    fn publish_replaces_current_snapshot() {
        let store = SnapshotStore::new(snapshot_at(10));
        let before = store.current();

        let mut next = snapshot_at(20);
        next.rom_count = 7;
        store.publish(next);

        assert_eq!(before.rom_count, 0);
        assert_eq!(store.current().rom_count, 7);
        assert_eq!(
            store.current().last_update,
            UNIX_EPOCH + Duration::from_secs(20)
        );
    }

    #[test]
    fn last_update_never_moves_backwards() {
        let store = SnapshotStore::new(snapshot_at(100));
        let mut stale = snapshot_at(50);
        stale.save_count = 3;
        store.publish(stale);

        let current = store.current();
        assert_eq!(current.save_count, 3);
        assert_eq!(current.last_update, UNIX_EPOCH + Duration::from_secs(100));
    }

    #[test]
    fn view_overlays_live_counters() {
        let store = SnapshotStore::new(snapshot_at(1));
        store.increment_requests();
        store.increment_requests();
        store.increment_errors();

        let view = store.view();
        assert_eq!(view.http_requests, 2);
        assert_eq!(view.http_errors, 1);
        assert_eq!(store.current().http_requests, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(SnapshotStore::new(snapshot_at(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        store.increment_requests();
                        if i % 10 == 0 {
                            store.increment_errors();
                        }
                        let c = store.counters();
                        assert!(c.requests >= c.errors);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(
            store.counters(),
            RequestCounters {
                requests: 8000,
                errors: 800
            }
        );
    }

    #[test]
    fn readers_never_observe_a_mixed_generation() {
        let store = Arc::new(SnapshotStore::new(snapshot_at(0)));
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 1..=500_u64 {
                    let mut s = snapshot_at(i);
                    s.rom_count = i;
                    s.save_count = i;
                    store.publish(s);
                }
            })
        };

        for _ in 0..2000 {
            let s = store.current();
            assert_eq!(s.rom_count, s.save_count);
        }
        writer.join().unwrap();
        assert_eq!(store.current().rom_count, 500);
    }

    #[test]
    fn snapshot_serializes_with_camel_case_names() {
        let mut s = snapshot_at(0);
        s.resources = Resources {
            cpu_percent: 12.5,
            memory_percent: 40.0,
            disk_percent: 10,
            load_average: 0.5,
        };
        let json = serde_json::to_value(&s).unwrap();

        assert_eq!(json["systemStatus"], "error");
        assert_eq!(json["servicesStatus"]["sunshine"], "unknown");
        assert_eq!(json["systemResources"]["cpu"], 12.5);
        assert_eq!(json["systemResources"]["disk"], 10);
        assert_eq!(json["startTime"], "1970-01-01T00:00:00.000Z");
        assert!(json.get("romCount").is_some());
    }

    #[test]
    fn health_gauge_mapping() {
        assert_eq!(HealthState::Healthy.gauge_value(), 2.0);
        assert_eq!(HealthState::Warning.gauge_value(), 1.0);
        assert_eq!(HealthState::Critical.gauge_value(), 0.0);
        assert_eq!(HealthState::Error.gauge_value(), 0.0);
    }
}
