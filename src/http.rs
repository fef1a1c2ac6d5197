use crate::config::Config;
use crate::dashboard::{render_dashboard, render_internal_error, render_not_found};
use crate::metrics::{Metrics, CONTENT_TYPE as METRICS_CONTENT_TYPE};
use crate::state::{HealthState, Resources, ServiceStatuses, SnapshotStore};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub store: Arc<SnapshotStore>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
    #[error("failed to serialize response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to render page: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Failure on an HTML or text route; answered with the HTML 500 page.
#[derive(Debug)]
pub struct PageError(RenderError);

/// Failure on an `/api/*` route; answered with a JSON 500 body.
#[derive(Debug)]
pub struct ApiError(RenderError);

impl<E: Into<RenderError>> From<E> for PageError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl<E: Into<RenderError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "page handler failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Html(render_internal_error())).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "api handler failed");
        let body = serde_json::json!({
            "error": "Internal server error",
            "message": self.0.to_string(),
        });
        (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody<'a> {
    status: &'static str,
    server: &'a str,
    uptime: u64,
    system_health: HealthState,
    timestamp: String,
    services: &'a ServiceStatuses,
    resources: &'a Resources,
}

#[derive(Serialize)]
struct ServicesBody<'a> {
    services: &'a ServiceStatuses,
    ports: Ports,
    paths: Paths,
}

#[derive(Serialize)]
struct Ports {
    moonlight: u16,
    web: u16,
}

#[derive(Serialize)]
struct Paths {
    roms: String,
    saves: String,
    config: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GamingBody {
    rom_count: u64,
    save_count: u64,
    roms_path: String,
    saves_path: String,
    moonlight_port: u16,
}

pub fn build_router(state: HttpAppState) -> Router {
    let routes = Router::new()
        .route("/", get(dashboard_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(api_status))
        .route("/api/metrics", get(api_metrics))
        .route("/api/services", get(api_services))
        .route("/api/gaming", get(api_gaming))
        .fallback(not_found);
    with_request_tracking(routes, state)
}

fn with_request_tracking(routes: Router<HttpAppState>, state: HttpAppState) -> Router {
    routes
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .with_state(state)
}

/// Counts every request before it is handled and every 5xx after.
async fn track_requests(State(state): State<HttpAppState>, request: Request, next: Next) -> Response {
    state.store.increment_requests();
    let response = next.run(request).await;
    if response.status().is_server_error() {
        state.store.increment_errors();
    }
    response
}

async fn dashboard_handler(State(state): State<HttpAppState>) -> Result<Html<String>, PageError> {
    let snapshot = state.store.view();
    let html = render_dashboard(&state.config, &snapshot, SystemTime::now())?;
    Ok(Html(html))
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Result<Response, PageError> {
    let snapshot = state.store.view();
    let uptime = snapshot.uptime_seconds(SystemTime::now());
    let encoded = state.metrics.render(&snapshot, uptime)?;

    let mut response = Response::new(Body::from(encoded));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(METRICS_CONTENT_TYPE),
    );
    Ok(response)
}

async fn api_status(State(state): State<HttpAppState>) -> Result<Response, ApiError> {
    let snapshot = state.store.view();
    let now = SystemTime::now();
    json_response(&StatusBody {
        status: "ok",
        server: &state.config.server_name,
        uptime: snapshot.uptime_seconds(now),
        system_health: snapshot.health,
        timestamp: humantime::format_rfc3339_millis(now).to_string(),
        services: &snapshot.services,
        resources: &snapshot.resources,
    })
}

async fn api_metrics(State(state): State<HttpAppState>) -> Result<Response, ApiError> {
    json_response(&state.store.view())
}

async fn api_services(State(state): State<HttpAppState>) -> Result<Response, ApiError> {
    let snapshot = state.store.current();
    let cfg = &state.config;
    json_response(&ServicesBody {
        services: &snapshot.services,
        ports: Ports {
            moonlight: cfg.moonlight_port,
            web: cfg.port,
        },
        paths: Paths {
            roms: cfg.roms_path.display().to_string(),
            saves: cfg.saves_path.display().to_string(),
            config: cfg.config_path.display().to_string(),
        },
    })
}

async fn api_gaming(State(state): State<HttpAppState>) -> Result<Response, ApiError> {
    let snapshot = state.store.current();
    let cfg = &state.config;
    json_response(&GamingBody {
        rom_count: snapshot.rom_count,
        save_count: snapshot.save_count,
        roms_path: cfg.roms_path.display().to_string(),
        saves_path: cfg.saves_path.display().to_string(),
        moonlight_port: cfg.moonlight_port,
    })
}

async fn not_found(uri: Uri) -> Response {
    if uri.path().starts_with("/api/") {
        let body = serde_json::json!({ "error": "API endpoint not found" });
        (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
    } else {
        (StatusCode::NOT_FOUND, Html(render_not_found())).into_response()
    }
}

fn json_response<T: Serialize>(body: &T) -> Result<Response, ApiError> {
    let bytes = serde_json::to_vec(body)?;
    let mut response = Response::new(Body::from(bytes));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::fake::StaticProbe;
    use crate::sampler::{Sampler, SamplerConfig};
    use crate::state::{MetricsSnapshot, ServiceState};
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::time::UNIX_EPOCH;
    use tower::ServiceExt;

    fn app_state() -> HttpAppState {
        let config = Config::default();
        let snapshot =
            MetricsSnapshot::unavailable(UNIX_EPOCH, config.services.iter().map(|s| s.name.as_str()));
        HttpAppState {
            store: Arc::new(SnapshotStore::new(snapshot)),
            metrics: Metrics::new().expect("metrics init"),
            config: Arc::new(config),
        }
    }

    async fn sampled_state(probe: StaticProbe) -> HttpAppState {
        let state = app_state();
        let mut sampler = Sampler::new(
            Arc::new(probe),
            state.store.clone(),
            SamplerConfig::from(state.config.as_ref()),
        );
        sampler.run_cycle().await.expect("sampling cycle");
        state
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, String, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthy_host_reports_healthy_status() {
        let state = sampled_state(StaticProbe::healthy()).await;
        let (status, content_type, body) = fetch(build_router(state), "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "application/json");
        assert!(body.contains("\"systemHealth\":\"healthy\""), "{body}");
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["server"], "game-server");
        assert_eq!(json["resources"]["cpu"], 50.0);
        assert_eq!(json["services"]["sunshine"], "active");
    }

    #[tokio::test]
    async fn failed_rom_probe_reports_zero_everywhere() {
        let state = sampled_state(StaticProbe::healthy()).await;
        let app = build_router(state.clone());

        let (status, _, body) = fetch(app.clone(), "/api/gaming").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["romCount"], 0);
        assert_eq!(json["romsPath"], "/opt/coinops/roms");
        assert_eq!(json["moonlightPort"], 47984);

        let (status, content_type, text) = fetch(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, METRICS_CONTENT_TYPE);
        assert!(text.lines().any(|l| l == "gameserver_rom_count 0"));
    }

    #[tokio::test]
    async fn api_metrics_round_trips_snapshot_values() {
        let state = app_state();
        let mut snapshot = (*state.store.current()).clone();
        snapshot.resources = Resources {
            cpu_percent: 33.3,
            memory_percent: 71.25,
            disk_percent: 64,
            load_average: 1.75,
        };
        snapshot.rom_count = 1234;
        snapshot.save_count = 56;
        snapshot.health = HealthState::Warning;
        snapshot
            .services
            .insert("sunshine".to_string(), ServiceState::Active);
        state.store.publish(snapshot);
        let app = build_router(state);

        let (_, _, body) = fetch(app.clone(), "/api/metrics").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["systemResources"]["cpu"], 33.3);
        assert_eq!(json["systemResources"]["memory"], 71.25);
        assert_eq!(json["systemResources"]["disk"], 64);
        assert_eq!(json["systemResources"]["load"], 1.75);
        assert_eq!(json["romCount"], 1234);
        assert_eq!(json["saveCount"], 56);
        assert_eq!(json["systemStatus"], "warning");
        assert_eq!(json["servicesStatus"]["sunshine"], "active");
        assert_eq!(json["httpRequests"], 1);

        let (_, _, text) = fetch(app, "/metrics").await;
        for line in [
            "gameserver_system_cpu_percent 33.3",
            "gameserver_system_memory_percent 71.25",
            "gameserver_system_disk_percent 64",
            "gameserver_system_load 1.75",
            "gameserver_rom_count 1234",
            "gameserver_save_count 56",
            "gameserver_system_health 1",
            "gameserver_service_status{service=\"sunshine\"} 1",
            "gameserver_http_requests_total 2",
        ] {
            assert!(text.lines().any(|l| l == line), "missing {line}\n{text}");
        }
    }

    #[tokio::test]
    async fn unknown_page_is_html_404() {
        let state = app_state();
        let (status, content_type, body) = fetch(build_router(state), "/foo").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(content_type.starts_with("text/html"));
        assert!(body.contains("404"));
    }

    #[tokio::test]
    async fn unknown_api_path_is_json_404() {
        let state = app_state();
        let (status, content_type, body) = fetch(build_router(state), "/api/foo").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(content_type, "application/json");
        assert_eq!(body, r#"{"error":"API endpoint not found"}"#);
    }

    #[tokio::test]
    async fn every_request_is_counted() {
        let state = app_state();
        let app = build_router(state.clone());
        for uri in ["/", "/metrics", "/api/status", "/api/gaming", "/foo", "/api/foo"] {
            fetch(app.clone(), uri).await;
        }
        let counters = state.store.counters();
        assert_eq!(counters.requests, 6);
        assert_eq!(counters.errors, 0);
    }

    #[tokio::test]
    async fn handler_failures_are_500_and_counted() {
        async fn broken_page() -> Result<Html<String>, PageError> {
            Err(std::fmt::Error.into())
        }
        async fn broken_api() -> Result<Response, ApiError> {
            Err(std::fmt::Error.into())
        }

        let state = app_state();
        let routes = Router::new()
            .route("/broken", get(broken_page))
            .route("/api/broken", get(broken_api))
            .fallback(not_found);
        let app = with_request_tracking(routes, state.clone());

        let (status, content_type, body) = fetch(app.clone(), "/broken").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(content_type.starts_with("text/html"));
        assert!(body.contains("500"));

        let (status, content_type, body) = fetch(app.clone(), "/api/broken").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(content_type, "application/json");
        assert!(body.contains("\"error\":\"Internal server error\""));

        fetch(app, "/nothing-here").await;
        assert_eq!(
            state.store.counters(),
            crate::state::RequestCounters {
                requests: 3,
                errors: 2
            }
        );
    }

    #[tokio::test]
    async fn repeated_reads_without_sampling_are_identical() {
        let state = sampled_state(StaticProbe::healthy()).await;
        let app = build_router(state);

        for uri in ["/api/services", "/api/gaming"] {
            let (_, _, first) = fetch(app.clone(), uri).await;
            let (_, _, second) = fetch(app.clone(), uri).await;
            assert_eq!(first, second, "{uri}");
        }

        let (_, _, first) = fetch(app.clone(), "/metrics").await;
        let (_, _, second) = fetch(app, "/metrics").await;
        let stable = |text: &str| -> Vec<String> {
            text.lines()
                .filter(|l| {
                    !l.starts_with("gameserver_http_requests_total")
                        && !l.starts_with("gameserver_uptime_seconds")
                })
                .map(str::to_string)
                .collect()
        };
        assert_eq!(stable(&first), stable(&second));
    }

    #[tokio::test]
    async fn services_endpoint_echoes_configuration() {
        let state = app_state();
        let (status, _, body) = fetch(build_router(state), "/api/services").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["ports"]["moonlight"], 47984);
        assert_eq!(json["ports"]["web"], 8080);
        assert_eq!(json["paths"]["saves"], "/opt/coinops/saves");
        assert_eq!(json["paths"]["config"], "/home/gameuser/.config");
        assert_eq!(json["services"]["openbox"], "unknown");
    }

    #[tokio::test]
    async fn dashboard_renders_html() {
        let state = sampled_state(StaticProbe::healthy()).await;
        let (status, content_type, body) = fetch(build_router(state), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/html"));
        assert!(body.contains("Sunshine GameStream"));
        assert!(body.contains(">healthy<"));
    }
}
