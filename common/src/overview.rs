//! Diagnostics shown on the `/system` page.

use std::fmt::{Display, Write};

use chrono::{DateTime, TimeZone};

use crate::{session::SessionSnapshot, types::SessionState};

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkMode {
    Station { ssid: String, rssi_dbm: Option<i8> },
    AccessPoint { ssid: String },
    Host,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimeSync {
    Synced { local_time: Option<String> },
    NotSynced,
    /// Access point mode has no upstream network to sync against.
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemOverview {
    pub platform: String,
    pub ip: String,
    pub free_heap_kb: Option<u32>,
    pub network: NetworkMode,
    pub time: TimeSync,
    pub session: SessionSnapshot,
    pub ir_protocol: String,
    pub ir_enabled: bool,
    pub http_port: u16,
    pub uptime_s: u64,
}

const STYLE: &str = "body{background:#1a1a1a;color:#ff6b6b;font-family:monospace;margin:0;padding:20px}\
.container{max-width:800px;margin:0 auto}h1,h2{color:#ff6b6b}\
.component{background:#2a2a2a;padding:15px;border-radius:8px;margin:15px 0}\
.status-ok{color:#4CAF50}.status-warn{color:#FFC107}.status-err{color:#F44336}\
.back{color:#ff6b6b;text-decoration:none}";

impl SystemOverview {
    pub fn render_html(&self) -> String {
        let mut html = String::with_capacity(4096);
        // Writing into a String cannot fail.
        let _ = self.write_html(&mut html);
        html
    }

    fn write_html(&self, out: &mut String) -> std::fmt::Result {
        write!(
            out,
            "<!DOCTYPE html><html><head><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>AstroController - System Overview</title><style>{STYLE}</style></head><body><div class=\"container\">\
<h1>AstroController System</h1><a href=\"/\" class=\"back\">&larr; Back to Control</a>"
        )?;

        write!(
            out,
            "<h2>System Architecture</h2><div class=\"component\"><h3>{}</h3>\
<p><strong>Function:</strong> IR sender for camera, session management, web interface</p>\
<p><strong>Status:</strong> <span class=\"status-ok\">Online</span></p>\
<p><strong>IP:</strong> {}</p>",
            escape(&self.platform),
            escape(&self.ip),
        )?;
        if let Some(heap_kb) = self.free_heap_kb {
            write!(out, "<p><strong>Memory:</strong> {heap_kb} KB free</p>")?;
        }
        out.push_str("</div>");

        let session = &self.session;
        let (class, label) = state_label(session.state);
        write!(
            out,
            "<h2>Current Session</h2><div class=\"component\">\
<p><strong>Status:</strong> <span class=\"{class}\">{label}</span></p>\
<p><strong>Photo Interval:</strong> {} seconds</p>\
<p><strong>Photos Taken:</strong> {} / {}</p>\
<p><strong>Runtime:</strong> {} seconds</p>\
<p><strong>Temperature:</strong> {:.1}&deg;C (simulated)</p></div>",
            session.interval_ms / 1_000,
            session.current_shot,
            session.total_shots,
            session.runtime_ms / 1_000,
            session.temperature_c,
        )?;

        let (ir_class, ir_label) = if self.ir_enabled {
            ("status-ok", "Ready")
        } else {
            ("status-err", "Disabled")
        };
        write!(
            out,
            "<h2>Hardware Status</h2><div class=\"component\">\
<p><strong>IR Sender:</strong> <span class=\"{ir_class}\">{ir_label} ({})</span></p>",
            escape(&self.ir_protocol),
        )?;

        match &self.network {
            NetworkMode::Station { ssid, rssi_dbm } => {
                write!(
                    out,
                    "<p><strong>WiFi:</strong> <span class=\"status-ok\">Connected</span> to {}",
                    escape(ssid)
                )?;
                if let Some(rssi) = rssi_dbm {
                    write!(out, " (RSSI: {rssi} dBm)")?;
                }
                out.push_str("</p>");
            }
            NetworkMode::AccessPoint { ssid } => write!(
                out,
                "<p><strong>WiFi:</strong> <span class=\"status-warn\">Access Point</span> {}</p>",
                escape(ssid)
            )?,
            NetworkMode::Host => out.push_str(
                "<p><strong>WiFi:</strong> <span class=\"status-warn\">Not available (host build)</span></p>",
            ),
        }

        write!(
            out,
            "<p><strong>Web Server:</strong> <span class=\"status-ok\">Running on Port {}</span></p>",
            self.http_port
        )?;

        match &self.time {
            TimeSync::Synced {
                local_time: Some(time),
            } => write!(
                out,
                "<p><strong>NTP Sync:</strong> <span class=\"status-ok\">Synchronized</span> ({})</p>",
                escape(time)
            )?,
            TimeSync::Synced { local_time: None } => out.push_str(
                "<p><strong>NTP Sync:</strong> <span class=\"status-ok\">Synchronized</span></p>",
            ),
            TimeSync::NotSynced => out.push_str(
                "<p><strong>NTP Sync:</strong> <span class=\"status-warn\">Not Synchronized</span></p>",
            ),
            TimeSync::Offline => out.push_str(
                "<p><strong>NTP Sync:</strong> <span class=\"status-warn\">AP Mode - No Internet</span></p>",
            ),
        }
        out.push_str("</div>");

        write!(
            out,
            "<h2>Usage</h2><div class=\"component\">\
<p><strong>1. Start Session:</strong> Enter time &rarr; Start Session</p>\
<p><strong>2. Single Shot:</strong> Single Shot button</p>\
<p><strong>3. Automated:</strong> the controller handles timing automatically</p>\
<p><strong>4. Network:</strong> Web interface via WiFi</p></div>\
<p style=\"text-align:center;margin-top:30px;color:#666\">AstroController | {} | Uptime: {}s</p>\
</div></body></html>",
            escape(&self.platform),
            self.uptime_s,
        )
    }
}

fn state_label(state: SessionState) -> (&'static str, &'static str) {
    match state {
        SessionState::Idle => ("status-ok", "Ready"),
        SessionState::Running => ("status-warn", "Running"),
        SessionState::Paused => ("status-warn", "Paused"),
        SessionState::Completed => ("status-ok", "Completed"),
    }
}

pub fn format_local_time<Tz>(time: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;

    fn overview(state: SessionState) -> SystemOverview {
        SystemOverview {
            platform: "ESP32 D32 Pro".to_string(),
            ip: "192.168.4.1".to_string(),
            free_heap_kb: Some(212),
            network: NetworkMode::AccessPoint {
                ssid: "AstroController".to_string(),
            },
            time: TimeSync::Offline,
            session: SessionSnapshot {
                state,
                total_minutes: 1,
                total_shots: 6,
                current_shot: 2,
                interval_ms: 10_000,
                runtime_ms: 25_400,
                remaining_min: 0,
                temperature_c: 20.0,
                max_minutes: 480,
            },
            ir_protocol: "Sony SIRC 20-bit".to_string(),
            ir_enabled: true,
            http_port: 80,
            uptime_s: 3_600,
        }
    }

    #[test]
    fn renders_session_progress() {
        let html = overview(SessionState::Running).render_html();

        assert!(html.contains("<span class=\"status-warn\">Running</span>"));
        assert!(html.contains("<strong>Photos Taken:</strong> 2 / 6"));
        assert!(html.contains("<strong>Photo Interval:</strong> 10 seconds"));
        assert!(html.contains("<strong>Runtime:</strong> 25 seconds"));
        assert!(html.contains("20.0&deg;C"));
        assert!(html.contains("212 KB free"));
        assert!(html.contains("AP Mode - No Internet"));
        assert!(html.contains("Uptime: 3600s"));
    }

    #[test]
    fn labels_every_state() {
        for (state, label) in [
            (SessionState::Idle, "Ready"),
            (SessionState::Paused, "Paused"),
            (SessionState::Completed, "Completed"),
        ] {
            assert!(overview(state).render_html().contains(label));
        }
    }

    #[test]
    fn shows_station_signal_and_sync_time() {
        let mut overview = overview(SessionState::Idle);
        overview.network = NetworkMode::Station {
            ssid: "observatory".to_string(),
            rssi_dbm: Some(-61),
        };
        overview.time = TimeSync::Synced {
            local_time: Some("2026-10-19 21:04:00".to_string()),
        };
        overview.free_heap_kb = None;

        let html = overview.render_html();

        assert!(html.contains("RSSI: -61 dBm"));
        assert!(html.contains("Synchronized</span> (2026-10-19 21:04:00)"));
        assert!(!html.contains("KB free"));
    }

    #[test]
    fn escapes_network_names() {
        let mut overview = overview(SessionState::Idle);
        overview.network = NetworkMode::Station {
            ssid: "<script>alert('x')</script>".to_string(),
            rssi_dbm: None,
        };

        let html = overview.render_html();

        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
    }

    #[test]
    fn formats_local_time() {
        let time = FixedOffset::east_opt(3_600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, 22, 30, 15)
            .unwrap();

        assert_eq!(format_local_time(&time), "2026-01-05 22:30:15");
    }
}
