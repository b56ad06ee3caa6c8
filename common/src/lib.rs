pub mod command;
pub mod config;
pub mod overview;
pub mod session;
pub mod sirc;
pub mod types;

pub use command::{Command, CommandReply};
pub use config::{CameraRemoteConfig, IrHardwareConfig, RuntimeConfig, SessionConfig};
pub use overview::{NetworkMode, SystemOverview, TimeSync};
pub use session::{Session, SessionError, SessionSnapshot, ShotAction, ShotKind};
pub use sirc::{SircCode, SircError};
pub use types::{
    ErrorBody, IrDiagnostics, SessionState, SessionStatus, StartRequest, SuccessBody,
    MAX_REQUEST_BODY,
};
