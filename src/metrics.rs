use crate::state::MetricsSnapshot;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, IntCounter, Registry, TextEncoder};
use std::sync::{Arc, Mutex};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Prometheus view of a snapshot. Every scrape re-projects the snapshot it
/// is given; `render_lock` keeps concurrent scrapes from interleaving.
pub struct Metrics {
    registry: Registry,
    render_lock: Mutex<()>,
    pub http_requests_total: IntCounter,
    pub http_errors_total: IntCounter,
    pub uptime_seconds: Gauge,
    pub system_cpu_percent: Gauge,
    pub system_memory_percent: Gauge,
    pub system_disk_percent: Gauge,
    pub system_load: Gauge,
    pub rom_count: Gauge,
    pub save_count: Gauge,
    pub service_status: GaugeVec,
    pub system_health: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounter::with_opts(opts!(
            "gameserver_http_requests_total",
            "Total HTTP requests received"
        ))?;
        let http_errors_total = IntCounter::with_opts(opts!(
            "gameserver_http_errors_total",
            "Total HTTP errors"
        ))?;
        let uptime_seconds = Gauge::with_opts(opts!(
            "gameserver_uptime_seconds",
            "Server uptime in seconds"
        ))?;
        let system_cpu_percent = Gauge::with_opts(opts!(
            "gameserver_system_cpu_percent",
            "CPU usage percentage"
        ))?;
        let system_memory_percent = Gauge::with_opts(opts!(
            "gameserver_system_memory_percent",
            "Memory usage percentage"
        ))?;
        let system_disk_percent = Gauge::with_opts(opts!(
            "gameserver_system_disk_percent",
            "Disk usage percentage"
        ))?;
        let system_load = Gauge::with_opts(opts!("gameserver_system_load", "Load average"))?;
        let rom_count =
            Gauge::with_opts(opts!("gameserver_rom_count", "Number of ROM files"))?;
        let save_count =
            Gauge::with_opts(opts!("gameserver_save_count", "Number of save files"))?;
        let service_status = GaugeVec::new(
            opts!(
                "gameserver_service_status",
                "Service status (1=active, 0=inactive)"
            ),
            &["service"],
        )?;
        let system_health = Gauge::with_opts(opts!(
            "gameserver_system_health",
            "Overall system health (2=healthy, 1=warning, 0=critical)"
        ))?;

        register(&registry, &http_requests_total)?;
        register(&registry, &http_errors_total)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &system_cpu_percent)?;
        register(&registry, &system_memory_percent)?;
        register(&registry, &system_disk_percent)?;
        register(&registry, &system_load)?;
        register(&registry, &rom_count)?;
        register(&registry, &save_count)?;
        register(&registry, &service_status)?;
        register(&registry, &system_health)?;

        Ok(Arc::new(Self {
            registry,
            render_lock: Mutex::new(()),
            http_requests_total,
            http_errors_total,
            uptime_seconds,
            system_cpu_percent,
            system_memory_percent,
            system_disk_percent,
            system_load,
            rom_count,
            save_count,
            service_status,
            system_health,
        }))
    }

    /// Loads `snapshot` into the registry and encodes it in the text format.
    pub fn render(
        &self,
        snapshot: &MetricsSnapshot,
        uptime_seconds: u64,
    ) -> Result<String, prometheus::Error> {
        let _guard = self
            .render_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        self.http_requests_total.reset();
        self.http_requests_total.inc_by(snapshot.http_requests);
        self.http_errors_total.reset();
        self.http_errors_total.inc_by(snapshot.http_errors);
        self.uptime_seconds.set(uptime_seconds as f64);

        let r = &snapshot.resources;
        self.system_cpu_percent.set(r.cpu_percent);
        self.system_memory_percent.set(r.memory_percent);
        self.system_disk_percent.set(f64::from(r.disk_percent));
        self.system_load.set(r.load_average);
        self.rom_count.set(snapshot.rom_count as f64);
        self.save_count.set(snapshot.save_count as f64);

        self.service_status.reset();
        for (service, state) in &snapshot.services {
            self.service_status
                .with_label_values(&[service.as_str()])
                .set(if state.is_active() { 1.0 } else { 0.0 });
        }
        self.system_health.set(snapshot.health.gauge_value());

        self.encode()
    }

    fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        String::from_utf8(buf).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
