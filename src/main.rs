mod collectors;
mod config;
mod dashboard;
mod health;
mod http;
mod metrics;
mod notify;
mod sampler;
mod state;

use axum::serve;
use clap::Parser;
use collectors::system::HostProbe;
use config::Config;
use metrics::Metrics;
use notify::{Notifier, Priority};
use sampler::{Sampler, SamplerConfig};
use state::{MetricsSnapshot, SnapshotStore};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BIND_FAILURE_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "gamestatd")]
#[command(version, about = "Game server status dashboard and Prometheus exporter")]
struct Cli {
    /// YAML config file; environment variables override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let addr = cfg.listen_display();

    info!(
        listen = %addr,
        server = %cfg.server_name,
        interval_secs = cfg.interval_secs,
        "starting gamestatd"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics registry");
            std::process::exit(1);
        }
    };
    let notifier = Notifier::new(&cfg.notify);
    match notifier.endpoint() {
        Some(endpoint) => info!(endpoint, "notifications enabled"),
        None => info!("notifications disabled"),
    }

    let start_time = SystemTime::now();
    let store = Arc::new(SnapshotStore::new(MetricsSnapshot::unavailable(
        start_time,
        cfg.services.iter().map(|s| s.name.as_str()),
    )));

    // The first cycle runs before the listener opens so no request ever sees
    // a snapshot that was never sampled.
    let command_timeout = cfg.probe_timeout();
    let probe = tokio::task::spawn_blocking(move || HostProbe::new(command_timeout));
    let probe = Arc::new(probe.await.unwrap_or_else(|err| {
        error!(error = %err, "host probe initialisation panicked");
        std::process::exit(1);
    }));
    let mut sampler = Sampler::new(probe, store.clone(), SamplerConfig::from(cfg.as_ref()));
    if let Err(err) = sampler.run_cycle().await {
        error!(error = %err, "initial sampling cycle failed, serving an error snapshot");
    }

    let listener = match TcpListener::bind((cfg.bind_host(), cfg.port)).await {
        Ok(l) => l,
        Err(err) => {
            if err.kind() == ErrorKind::AddrInUse {
                error!(
                    listen = %addr,
                    "port {} is already in use; stop the existing service or set COINOPS_PORT to another port",
                    cfg.port
                );
            } else {
                error!(error = %err, listen = %addr, "failed to bind HTTP listener");
            }
            let message = format!(
                "Game server web interface failed to start on {}.\n\
                 Error: {}\n\
                 Port: {}\n\
                 Time: {}",
                cfg.server_name,
                err,
                cfg.port,
                humantime::format_rfc3339_seconds(SystemTime::now()),
            );
            if let Some(delivery) = notifier.send("Web Interface Error", message, Priority::High) {
                let _ = tokio::time::timeout(BIND_FAILURE_NOTIFY_TIMEOUT, delivery).await;
            }
            std::process::exit(1);
        }
    };

    info!(
        server = %cfg.server_name,
        admin = %cfg.admin_email,
        host = %cfg.host,
        port = cfg.port,
        moonlight_port = cfg.moonlight_port,
        "game server web interface listening"
    );
    for endpoint in ["/", "/metrics", "/api/status", "/api/metrics", "/api/services", "/api/gaming"] {
        info!(endpoint, "serving");
    }
    notifier.send(
        "Web Interface Started",
        startup_message(&cfg, &store.current(), start_time),
        Priority::Low,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sampler_task = tokio::spawn(sampler.run(cfg.interval(), shutdown_rx.clone()));

    let http_task = {
        let app = http::build_router(http::HttpAppState {
            store: store.clone(),
            metrics: metrics.clone(),
            config: cfg.clone(),
        });
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping");

    let _ = shutdown_tx.send(true);
    let _ = sampler_task.await;
    let _ = http_task.await;
    info!("gamestatd stopped");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn startup_message(cfg: &Config, snapshot: &MetricsSnapshot, start_time: SystemTime) -> String {
    let base = format!("http://{}:{}", display_host(cfg.bind_host()), cfg.port);
    format!(
        "Enhanced game server web interface started.\n\
         Dashboard: {base}/\n\
         Metrics: {base}/metrics\n\
         Moonlight port: {}\n\
         Server: {}\n\
         Status: {}\n\
         Started: {}",
        cfg.moonlight_port,
        cfg.server_name,
        snapshot.health.as_str(),
        humantime::format_rfc3339_seconds(start_time),
    )
}

/// Wildcard bind addresses are not reachable URLs; advertise localhost.
fn display_host(host: &str) -> String {
    match host {
        "0.0.0.0" | "::" | "" => "localhost".to_string(),
        h if h.contains(':') => format!("[{h}]"),
        h => h.to_string(),
    }
}
