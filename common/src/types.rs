use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

impl SessionState {
    /// Numeric code used by `/api/status`; the control page switches on it.
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Paused => 2,
            Self::Completed => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl Serialize for SessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub current: u16,
    pub total: u16,
    /// Minutes until the last scheduled shot; zero unless running.
    pub remaining: u64,
    pub temperature: f32,
    /// Seconds between scheduled shots.
    pub interval: u32,
    #[serde(rename = "maxMinutes")]
    pub max_minutes: u16,
}

/// Largest request body either HTTP front end accepts.
pub const MAX_REQUEST_BODY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StartRequest {
    /// Missing means zero, which fails duration validation.
    #[serde(default)]
    pub minutes: u32,
}

impl StartRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IrDiagnostics {
    pub enabled: bool,
    pub protocol: String,
    #[serde(rename = "carrierKHz")]
    pub carrier_khz: u32,
    #[serde(rename = "frameCount")]
    pub frame_count: u8,
    #[serde(rename = "repeatGapMs")]
    pub repeat_gap_ms: u64,
    #[serde(rename = "lastSendMs")]
    pub last_send_ms: Option<u64>,
    #[serde(rename = "sentShots")]
    pub sent_shots: u64,
    #[serde(rename = "failedShots")]
    pub failed_shots: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessBody {
    pub success: bool,
}

impl SuccessBody {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
