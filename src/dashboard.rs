use crate::config::Config;
use crate::state::{HealthState, MetricsSnapshot, ServiceState};
use std::fmt::Write;
use std::time::SystemTime;

const STYLE: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: #333; min-height: 100vh; padding: 20px; }
.container { max-width: 1200px; margin: 0 auto; background: rgba(255,255,255,0.95); border-radius: 15px; box-shadow: 0 20px 40px rgba(0,0,0,0.1); overflow: hidden; }
.header { background: linear-gradient(135deg, #2c3e50 0%, #34495e 100%); color: white; padding: 30px; text-align: center; position: relative; }
.header h1 { font-size: 2.5em; margin-bottom: 10px; }
.system-status { position: absolute; top: 20px; right: 30px; padding: 10px 20px; border-radius: 25px; color: white; font-weight: bold; text-transform: uppercase; font-size: 0.9em; }
.grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(300px, 1fr)); gap: 20px; padding: 30px; }
.card { background: white; border-radius: 10px; padding: 25px; box-shadow: 0 5px 15px rgba(0,0,0,0.1); border-left: 5px solid #3498db; }
.card h3 { color: #2c3e50; margin-bottom: 20px; font-size: 1.2em; }
.metric { display: flex; justify-content: space-between; align-items: center; padding: 12px 0; border-bottom: 1px solid #eee; }
.metric:last-child { border-bottom: none; }
.metric-label { font-weight: 600; color: #555; }
.metric-value { font-weight: bold; padding: 5px 10px; border-radius: 5px; background: #f8f9fa; }
.status-active { background: #d4edda !important; color: #155724; }
.status-inactive { background: #f8d7da !important; color: #721c24; }
.status-unknown { background: #fff3cd !important; color: #856404; }
.progress-bar { width: 100%; height: 8px; background: #e9ecef; border-radius: 4px; overflow: hidden; margin-top: 5px; }
.progress-fill { height: 100%; border-radius: 4px; }
.progress-low { background: #28a745; }
.progress-medium { background: #ffc107; }
.progress-high { background: #dc3545; }
.actions { padding: 30px; background: #f8f9fa; text-align: center; }
.btn { display: inline-block; padding: 12px 24px; margin: 5px; background: #3498db; color: white; text-decoration: none; border-radius: 5px; font-weight: 600; }
.footer { padding: 20px 30px; background: #2c3e50; color: white; text-align: center; font-size: 0.9em; }
"#;

const ERROR_STYLE: &str = "body { font-family: Arial, sans-serif; text-align: center; padding: 50px; background: #f5f5f5; } \
.container { background: white; padding: 40px; border-radius: 10px; display: inline-block; box-shadow: 0 5px 15px rgba(0,0,0,0.1); } \
h1 { color: #e74c3c; margin-bottom: 20px; } a { color: #3498db; text-decoration: none; font-weight: bold; }";

pub fn render_dashboard(
    cfg: &Config,
    snapshot: &MetricsSnapshot,
    now: SystemTime,
) -> Result<String, std::fmt::Error> {
    let uptime = format_uptime(snapshot.uptime_seconds(now));
    let server = escape(&cfg.server_name);
    let admin = escape(&cfg.admin_email);
    let last_update = humantime::format_rfc3339_seconds(snapshot.last_update);
    let r = &snapshot.resources;

    let mut html = String::with_capacity(8 * 1024);
    write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{server} - Game Server Dashboard</title>
<style>{STYLE}</style>
</head>
<body>
<div class="container">
<div class="header">
<div class="system-status" style="background: {color}">{health}</div>
<h1>{server}</h1>
<div class="subtitle">Moonlight GameStream + CoinOps Emulation Platform</div>
</div>
<div class="grid">
<div class="card">
<h3>System Resources</h3>
"#,
        color = health_color(snapshot.health),
        health = snapshot.health.as_str(),
    )?;

    percent_row(&mut html, "CPU Usage", r.cpu_percent, format!("{:.1}%", r.cpu_percent))?;
    percent_row(
        &mut html,
        "Memory Usage",
        r.memory_percent,
        format!("{:.1}%", r.memory_percent),
    )?;
    percent_row(
        &mut html,
        "Disk Usage",
        f64::from(r.disk_percent),
        format!("{}%", r.disk_percent),
    )?;
    value_row(&mut html, "Load Average", &format!("{:.2}", r.load_average), "")?;

    html.push_str("</div>\n<div class=\"card\">\n<h3>Game Services</h3>\n");
    for service in &cfg.services {
        let state = snapshot
            .services
            .get(&service.name)
            .copied()
            .unwrap_or(ServiceState::Unknown);
        value_row(
            &mut html,
            &service.display_name,
            state.as_str(),
            &format!("status-{}", state.as_str()),
        )?;
    }

    html.push_str("</div>\n<div class=\"card\">\n<h3>Gaming Statistics</h3>\n");
    value_row(&mut html, "ROM Collection", &format!("{} games", snapshot.rom_count), "")?;
    value_row(&mut html, "Save Files", &format!("{} saves", snapshot.save_count), "")?;
    value_row(&mut html, "Moonlight Port", &cfg.moonlight_port.to_string(), "")?;
    value_row(&mut html, "Web Interface", &format!("Port {}", cfg.port), "")?;

    html.push_str("</div>\n<div class=\"card\">\n<h3>Server Information</h3>\n");
    value_row(&mut html, "Uptime", &uptime, "")?;
    value_row(&mut html, "HTTP Requests", &snapshot.http_requests.to_string(), "")?;
    value_row(&mut html, "Last Update", &last_update.to_string(), "")?;
    value_row(&mut html, "Admin Contact", &cfg.admin_email, "")?;

    write!(
        html,
        r#"</div>
</div>
<div class="actions">
<a href="/metrics" class="btn">Prometheus Metrics</a>
<a href="/api/status" class="btn">API Status</a>
<a href="/api/services" class="btn">Services Info</a>
<a href="/" class="btn">Refresh Dashboard</a>
</div>
<div class="footer">
<p>{server} - Enhanced Game Server Interface | Maintainer: {admin}</p>
<p>Last updated: {last_update} | Server uptime: {uptime}</p>
</div>
</div>
<script>setTimeout(() => location.reload(), 30000);</script>
</body>
</html>
"#
    )?;

    Ok(html)
}

pub fn render_not_found() -> String {
    error_page(
        "404 - Not Found",
        "404 - Page Not Found",
        "The requested page could not be found on the game server.",
    )
}

pub fn render_internal_error() -> String {
    error_page(
        "500 - Internal Server Error",
        "500 - Internal Server Error",
        "An error occurred while processing your request.",
    )
}

fn error_page(title: &str, heading: &str, message: &str) -> String {
    format!(
        "<html>\n<head>\n<title>{title}</title>\n<style>{ERROR_STYLE}</style>\n</head>\n<body>\n\
<div class=\"container\">\n<h1>{heading}</h1>\n<p>{message}</p>\n\
<p><a href=\"/\">&larr; Back to Dashboard</a></p>\n</div>\n</body>\n</html>\n"
    )
}

fn percent_row(
    html: &mut String,
    label: &str,
    value: f64,
    shown: String,
) -> std::fmt::Result {
    let level = if value > 80.0 {
        "progress-high"
    } else if value > 60.0 {
        "progress-medium"
    } else {
        "progress-low"
    };
    write!(
        html,
        "<div class=\"metric\"><span class=\"metric-label\">{label}</span><div>\
<span class=\"metric-value\">{shown}</span>\
<div class=\"progress-bar\"><div class=\"progress-fill {level}\" style=\"width: {width:.1}%\"></div></div>\
</div></div>\n",
        width = value.clamp(0.0, 100.0),
    )
}

fn value_row(html: &mut String, label: &str, value: &str, class: &str) -> std::fmt::Result {
    writeln!(
        html,
        "<div class=\"metric\"><span class=\"metric-label\">{}</span>\
<span class=\"metric-value {}\">{}</span></div>",
        escape(label),
        class,
        escape(value)
    )
}

fn health_color(health: HealthState) -> &'static str {
    match health {
        HealthState::Healthy => "#28a745",
        HealthState::Warning => "#ffc107",
        HealthState::Critical | HealthState::Error => "#dc3545",
    }
}

/// `1d 2h 3m 4s`, omitting leading zero units; seconds are always shown.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d "));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h "));
    }
    if mins > 0 {
        out.push_str(&format!("{mins}m "));
    }
    out.push_str(&format!("{secs}s"));
    out
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
