//! Session state and observer snapshots

use serde::{Deserialize, Serialize};

/// Operating mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// React to DM1 frames from an external sender, reply with FF99
    Listen,
    /// Transmit DM1 entries from a list and verify each reading
    Send,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Listen => write!(f, "listen"),
            Mode::Send => write!(f, "send"),
        }
    }
}

/// Scheduler state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    RunningIdle,
    AcquisitionScheduled,
}

/// Mutable state of one session, owned by the scheduler
#[derive(Debug, Clone)]
pub struct AcquisitionSession {
    pub mode: Mode,
    pub running: bool,
    /// Entry under test (send mode)
    pub current_index: usize,
    /// Last entry whose acquisition completed (send mode)
    pub last_processed_index: Option<usize>,
    /// Payload of the last DM1 that led to an acquisition (listen mode)
    pub last_processed_signature: Option<[u8; 8]>,
    /// Payload of the DM1 whose settle timer is pending (listen mode)
    pub pending_signature: Option<[u8; 8]>,
    pub acquisition_scheduled: bool,
    /// Frames transmitted in this session
    pub message_counter: u64,
    /// Bumped on every start and stop; stale timers compare against it
    pub generation: u64,
}

impl Default for AcquisitionSession {
    fn default() -> Self {
        Self {
            mode: Mode::Listen,
            running: false,
            current_index: 0,
            last_processed_index: None,
            last_processed_signature: None,
            pending_signature: None,
            acquisition_scheduled: false,
            message_counter: 0,
            generation: 0,
        }
    }
}

impl AcquisitionSession {
    pub fn state(&self) -> SchedulerState {
        match (self.running, self.acquisition_scheduled) {
            (false, _) => SchedulerState::Idle,
            (true, false) => SchedulerState::RunningIdle,
            (true, true) => SchedulerState::AcquisitionScheduled,
        }
    }

    /// Reset for a new session in `mode`, keeping the generation counter
    pub(crate) fn restart(&mut self, mode: Mode) {
        let generation = self.generation + 1;
        *self = Self {
            mode,
            running: true,
            generation,
            ..Self::default()
        };
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            running: self.running,
            state: self.state(),
            current_index: self.current_index,
            acquisition_scheduled: self.acquisition_scheduled,
            message_counter: self.message_counter,
            generation: self.generation,
            has_signature: self.last_processed_signature.is_some(),
        }
    }
}

/// Immutable copy of the session handed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub running: bool,
    pub state: SchedulerState,
    pub current_index: usize,
    pub acquisition_scheduled: bool,
    pub message_counter: u64,
    pub generation: u64,
    pub has_signature: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_derivation() {
        let mut session = AcquisitionSession::default();
        assert_eq!(session.state(), SchedulerState::Idle);

        session.restart(Mode::Send);
        assert_eq!(session.state(), SchedulerState::RunningIdle);

        session.acquisition_scheduled = true;
        assert_eq!(session.state(), SchedulerState::AcquisitionScheduled);

        session.running = false;
        assert_eq!(session.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_restart_clears_session() {
        let mut session = AcquisitionSession::default();
        session.restart(Mode::Listen);
        session.last_processed_signature = Some([1; 8]);
        session.message_counter = 7;
        session.current_index = 3;

        session.restart(Mode::Send);
        assert_eq!(session.generation, 2);
        assert_eq!(session.mode, Mode::Send);
        assert_eq!(session.message_counter, 0);
        assert_eq!(session.current_index, 0);
        assert!(session.last_processed_signature.is_none());
        assert!(!session.snapshot().has_signature);
    }
}
