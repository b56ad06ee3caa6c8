use crate::session::{Session, SessionError, SessionSnapshot, ShotAction};

/// Requests delivered from the HTTP transport to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start { minutes: u32 },
    Stop,
    SingleShot,
    Burst { count: Option<u32> },
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Done,
    Status(SessionSnapshot),
    Rejected(SessionError),
}

impl Session {
    /// Applies `command` and returns the reply together with the shots the
    /// loop has to transmit before answering.
    pub fn handle_command(
        &mut self,
        command: Command,
        now_ms: u64,
    ) -> (CommandReply, Vec<ShotAction>) {
        match command {
            Command::Start { minutes } => match self.start(minutes, now_ms) {
                Ok(()) => (CommandReply::Done, Vec::new()),
                Err(err) => (CommandReply::Rejected(err), Vec::new()),
            },
            Command::Stop => {
                self.stop();
                (CommandReply::Done, Vec::new())
            }
            Command::SingleShot => (CommandReply::Done, self.single_shot()),
            Command::Burst { count } => match self.burst(count) {
                Ok(actions) => (CommandReply::Done, actions),
                Err(err) => (CommandReply::Rejected(err), Vec::new()),
            },
            Command::Status => (CommandReply::Status(self.snapshot(now_ms)), Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SessionConfig,
        session::ShotKind,
        types::SessionState,
    };

    #[test]
    fn start_then_status_reports_running() {
        let mut session = Session::new(SessionConfig::default());

        let (reply, actions) = session.handle_command(Command::Start { minutes: 1 }, 0);
        assert_eq!(reply, CommandReply::Done);
        assert!(actions.is_empty());

        let (reply, _) = session.handle_command(Command::Status, 0);
        let CommandReply::Status(snapshot) = reply else {
            panic!("expected status reply, got {reply:?}");
        };
        assert_eq!(snapshot.state, SessionState::Running);
        assert_eq!(snapshot.total_shots, 6);
    }

    #[test]
    fn rejected_start_carries_error() {
        let mut session = Session::new(SessionConfig::default());
        session.handle_command(Command::Start { minutes: 1 }, 0);

        let (reply, _) = session.handle_command(Command::Start { minutes: 1 }, 10);

        assert_eq!(reply, CommandReply::Rejected(SessionError::AlreadyRunning));
    }

    #[test]
    fn shot_commands_return_actions_without_state_change() {
        let mut session = Session::new(SessionConfig::default());

        let (reply, actions) = session.handle_command(Command::SingleShot, 0);
        assert_eq!(reply, CommandReply::Done);
        assert_eq!(actions, vec![ShotAction::Fire(ShotKind::Single)]);

        let (reply, actions) = session.handle_command(Command::Burst { count: Some(2) }, 0);
        assert_eq!(reply, CommandReply::Done);
        assert_eq!(actions.len(), 3);

        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn stop_is_always_accepted() {
        let mut session = Session::new(SessionConfig::default());

        assert_eq!(session.handle_command(Command::Stop, 0).0, CommandReply::Done);

        session.handle_command(Command::Start { minutes: 3 }, 0);
        assert_eq!(session.handle_command(Command::Stop, 1).0, CommandReply::Done);
        assert_eq!(session.state(), SessionState::Idle);
    }
}
