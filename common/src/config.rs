use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub interval_ms: u32,
    pub start_delay_ms: u64,
    pub max_session_minutes: u16,
    pub burst_count: u8,
    pub burst_delay_ms: u64,
    pub max_burst_count: u8,
    pub loop_interval_ms: u64,
    /// No sensor is fitted; this value is reported as the current reading.
    pub temperature_c: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            start_delay_ms: 5_000,
            max_session_minutes: 480,
            burst_count: 10,
            burst_delay_ms: 1_000,
            max_burst_count: 50,
            loop_interval_ms: 100,
            temperature_c: 20.0,
        }
    }
}

impl SessionConfig {
    pub fn sanitize(&mut self) {
        self.interval_ms = self.interval_ms.clamp(1_000, 3_600_000);
        self.start_delay_ms = self.start_delay_ms.min(60_000);
        // The shot counters are u16; the longest session must still fit.
        let max_fitting = u64::from(u16::MAX) * u64::from(self.interval_ms) / 60_000;
        let max_fitting = u16::try_from(max_fitting).unwrap_or(u16::MAX);
        self.max_session_minutes = self.max_session_minutes.clamp(1, 1_440_u16.min(max_fitting));
        self.max_burst_count = self.max_burst_count.max(1);
        self.burst_count = self.burst_count.clamp(1, self.max_burst_count);
        self.burst_delay_ms = self.burst_delay_ms.min(10_000);
        self.loop_interval_ms = self.loop_interval_ms.clamp(10, 1_000);
        if !self.temperature_c.is_finite() {
            self.temperature_c = 20.0;
        }
    }

    /// Shots taken by a session of `minutes`, one per interval.
    pub fn total_shots(&self, minutes: u16) -> u16 {
        let shots = u64::from(minutes) * 60_000 / u64::from(self.interval_ms.max(1));
        shots.try_into().unwrap_or(u16::MAX)
    }
}

/// The Sony SIRC code the camera listens for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CameraRemoteConfig {
    pub address: u16,
    pub command: u8,
    pub bits: u8,
    pub repeats: u8,
}

impl Default for CameraRemoteConfig {
    fn default() -> Self {
        Self {
            address: 0x1E3A,
            command: 0x2D,
            bits: 20,
            repeats: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IrHardwareConfig {
    pub tx_pin: i32,
    pub rmt_channel: u8,
    pub carrier_khz: u32,
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            tx_pin: 4,
            rmt_channel: 0,
            carrier_khz: 40,
        }
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.tx_pin < 0 {
            self.tx_pin = 4;
        }

        if self.rmt_channel > 7 {
            self.rmt_channel = 0;
        }

        self.carrier_khz = self.carrier_khz.clamp(10, 100);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub ap_ssid: String,
    pub ap_pass: String,
    pub ap_ip: [u8; 4],
    pub ap_prefix_len: u8,
    pub connect_timeout_ms: u64,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            ap_ssid: "AstroController".to_string(),
            ap_pass: "astro2024".to_string(),
            ap_ip: [192, 168, 4, 1],
            ap_prefix_len: 24,
            connect_timeout_ms: 10_000,
            http_port: 80,
        }
    }
}

impl NetworkConfig {
    pub fn has_station_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }

    pub fn sanitize(&mut self) {
        // WPA2 needs at least 8 characters; fall back to the stock password.
        if !self.ap_pass.is_empty() && self.ap_pass.len() < 8 {
            self.ap_pass = NetworkConfig::default().ap_pass;
        }
        if self.ap_ssid.trim().is_empty() {
            self.ap_ssid = NetworkConfig::default().ap_ssid;
        }
        self.ap_prefix_len = self.ap_prefix_len.clamp(8, 30);
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(1_000, 60_000);
        if self.http_port == 0 {
            self.http_port = 80;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub ntp_server: String,
    pub timezone: String,
    pub sync_timeout_ms: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            ntp_server: "pool.ntp.org".to_string(),
            timezone: "Europe/Berlin".to_string(),
            sync_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub session: SessionConfig,
    pub camera: CameraRemoteConfig,
    pub ir: IrHardwareConfig,
    pub network: NetworkConfig,
    pub time: TimeConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.session.sanitize();
        self.ir.sanitize();
        self.network.sanitize();
    }
}
