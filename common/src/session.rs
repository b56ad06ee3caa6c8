use std::fmt;

use thiserror::Error;

use crate::{
    config::SessionConfig,
    types::{SessionState, SessionStatus},
};

/// What a single IR transmission is for; only used for logging and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotKind {
    Scheduled { shot: u16, total: u16 },
    Single,
    Burst { shot: u8, count: u8 },
}

impl fmt::Display for ShotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled { shot, total } => write!(f, "shot {shot}/{total}"),
            Self::Single => f.write_str("single shot"),
            Self::Burst { shot, count } => write!(f, "burst shot {shot}/{count}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShotAction {
    Fire(ShotKind),
    Delay(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session already running")]
    AlreadyRunning,
    #[error("Invalid duration")]
    InvalidDuration { minutes: u32, max: u16 },
    #[error("Invalid burst count")]
    InvalidBurstCount { count: u32, max: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub total_minutes: u16,
    pub total_shots: u16,
    pub current_shot: u16,
    pub interval_ms: u32,
    pub runtime_ms: u64,
    pub remaining_min: u64,
    pub temperature_c: f32,
    pub max_minutes: u16,
}

impl SessionSnapshot {
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            current: self.current_shot,
            total: self.total_shots,
            remaining: self.remaining_min,
            temperature: self.temperature_c,
            interval: self.interval_ms / 1_000,
            max_minutes: self.max_minutes,
        }
    }
}

/// A bounded run of scheduled shots.
///
/// Owned by the control loop for the life of the process. The scheduler and
/// the command handlers never transmit themselves: they return
/// [`ShotAction`]s that the loop executes on the IR emitter in order.
#[derive(Debug, Clone)]
pub struct Session {
    pub config: SessionConfig,

    state: SessionState,
    total_minutes: u16,
    total_shots: u16,
    current_shot: u16,
    interval_ms: u32,

    start_ms: Option<u64>,
    next_shot_ms: Option<u64>,
}

impl Session {
    pub fn new(mut config: SessionConfig) -> Self {
        config.sanitize();
        let interval_ms = config.interval_ms;
        Self {
            config,
            state: SessionState::Idle,
            total_minutes: 0,
            total_shots: 0,
            current_shot: 0,
            interval_ms,
            start_ms: None,
            next_shot_ms: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn total_shots(&self) -> u16 {
        self.total_shots
    }

    pub fn current_shot(&self) -> u16 {
        self.current_shot
    }

    pub fn next_shot_ms(&self) -> Option<u64> {
        self.next_shot_ms
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn start(&mut self, minutes: u32, now_ms: u64) -> Result<(), SessionError> {
        // Completed is terminal; only a fresh controller accepts a new session.
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyRunning);
        }

        let max = self.config.max_session_minutes;
        let invalid = SessionError::InvalidDuration { minutes, max };
        let minutes = match u16::try_from(minutes) {
            Ok(minutes) if (1..=max).contains(&minutes) => minutes,
            _ => return Err(invalid),
        };

        // A session shorter than one interval would never reach its first shot.
        let total_shots = self.config.total_shots(minutes);
        if total_shots == 0 {
            return Err(invalid);
        }

        self.total_minutes = minutes;
        self.total_shots = total_shots;
        self.interval_ms = self.config.interval_ms;
        self.current_shot = 0;
        self.start_ms = Some(now_ms);
        self.next_shot_ms = Some(now_ms.saturating_add(self.config.start_delay_ms));
        self.state = SessionState::Running;

        Ok(())
    }

    /// Returns whether a running session was stopped.
    pub fn stop(&mut self) -> bool {
        if self.state == SessionState::Running {
            self.state = SessionState::Idle;
            true
        } else {
            false
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<ShotAction> {
        if self.state != SessionState::Running {
            return Vec::new();
        }

        let Some(due_ms) = self.next_shot_ms else {
            return Vec::new();
        };
        if now_ms < due_ms {
            return Vec::new();
        }

        let action = ShotAction::Fire(ShotKind::Scheduled {
            shot: self.current_shot + 1,
            total: self.total_shots,
        });

        self.current_shot += 1;
        // Rescheduled from the actual fire time, so late ticks accumulate drift.
        self.next_shot_ms = Some(now_ms.saturating_add(u64::from(self.interval_ms)));

        if self.current_shot >= self.total_shots {
            self.state = SessionState::Completed;
        }

        vec![action]
    }

    pub fn single_shot(&self) -> Vec<ShotAction> {
        vec![ShotAction::Fire(ShotKind::Single)]
    }

    /// `None` fires the configured default burst.
    pub fn burst(&self, count: Option<u32>) -> Result<Vec<ShotAction>, SessionError> {
        let max = self.config.max_burst_count;
        let count = match count {
            None => self.config.burst_count,
            Some(count) => match u8::try_from(count) {
                Ok(count) if (1..=max).contains(&count) => count,
                _ => return Err(SessionError::InvalidBurstCount { count, max }),
            },
        };

        let mut actions = Vec::with_capacity(usize::from(count) * 2);
        for shot in 1..=count {
            actions.push(ShotAction::Fire(ShotKind::Burst { shot, count }));
            if shot < count {
                actions.push(ShotAction::Delay(self.config.burst_delay_ms));
            }
        }

        Ok(actions)
    }

    pub fn remaining_minutes(&self) -> u64 {
        if self.state != SessionState::Running || self.total_shots == 0 {
            return 0;
        }

        let remaining_shots = u64::from(self.total_shots.saturating_sub(self.current_shot));
        remaining_shots * u64::from(self.interval_ms) / 60_000
    }

    pub fn runtime_ms(&self, now_ms: u64) -> u64 {
        self.start_ms
            .map(|start| now_ms.saturating_sub(start))
            .unwrap_or(0)
    }

    pub fn snapshot(&self, now_ms: u64) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            total_minutes: self.total_minutes,
            total_shots: self.total_shots,
            current_shot: self.current_shot,
            interval_ms: self.interval_ms,
            runtime_ms: self.runtime_ms(now_ms),
            remaining_min: self.remaining_minutes(),
            temperature_c: self.config.temperature_c,
            max_minutes: self.config.max_session_minutes,
        }
    }

    pub fn status(&self, now_ms: u64) -> SessionStatus {
        self.snapshot(now_ms).status()
    }
}
