//! Session lifecycle: states, run identity and the transition function
//!
//! The lifecycle of one run is
//!
//! ```text
//! Idle ──run──▶ Connecting ──Opened──▶ Running ──Data──▶ Running
//!                   │                     │
//!                   ├──Closed─────────────┼──▶ Closed
//!                   └──Error──────────────┴──▶ Failed
//! ```
//!
//! `Closed` and `Failed` are terminal for the run; only a new run request
//! leaves them. [`transition`] is pure: it maps a state and an event to the
//! next state plus the effects the owner has to carry out.

use std::fmt;

use playground_protocol::Source;

use crate::connection::{ConnectionEvent, Termination};

/// Lifecycle state of the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No run has been requested yet
    #[default]
    Idle,
    /// Channel requested, handshake not complete
    Connecting,
    /// Channel open, request sent, output streaming
    Running,
    /// The service ended the run
    Closed,
    /// The channel failed to open or broke
    Failed,
}

impl SessionState {
    /// A connection is attributed to the session in this state
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Running => "running",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        })
    }
}

/// Identity of one run, and of the connection opened for it.
///
/// Strictly increasing per client, so events from a superseded connection can
/// be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work the owner performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send the source snapshot as the first frame
    SendRequest,
    /// Append a chunk to the output log
    Append(String),
    /// Record the failure reason
    Fail(String),
    /// Record how the run ended
    Finish(Termination),
    /// Close and drop the connection
    Release,
}

/// Result of [`transition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

impl Step {
    fn to(next: SessionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    /// The event does not apply in the current state
    fn ignore(state: SessionState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }

    pub fn is_ignored(&self, from: SessionState) -> bool {
        self.next == from && self.effects.is_empty()
    }
}

/// Apply one connection event to a session state.
pub fn transition(state: SessionState, event: &ConnectionEvent) -> Step {
    use SessionState::*;

    match (state, event) {
        (Connecting, ConnectionEvent::Opened) => Step::to(Running, vec![Effect::SendRequest]),
        (Running, ConnectionEvent::Data(chunk)) => {
            Step::to(Running, vec![Effect::Append(chunk.clone())])
        }
        (Connecting | Running, ConnectionEvent::Closed(termination)) => Step::to(
            Closed,
            vec![Effect::Finish(termination.clone()), Effect::Release],
        ),
        (Connecting | Running, ConnectionEvent::Error(reason)) => {
            Step::to(Failed, vec![Effect::Fail(reason.clone()), Effect::Release])
        }
        _ => Step::ignore(state),
    }
}

/// The active-or-most-recent run
#[derive(Debug, Clone)]
pub struct Session {
    run: RunId,
    source: Source,
    state: SessionState,
    last_error: Option<String>,
    termination: Option<Termination>,
}

impl Session {
    /// A session that has just requested its connection
    pub fn connecting(run: RunId, source: Source) -> Self {
        Self {
            run,
            source,
            state: SessionState::Connecting,
            last_error: None,
            termination: None,
        }
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    /// Snapshot of the source taken when the run was requested
    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set only in [`SessionState::Failed`]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn fail(&mut self, reason: String) {
        self.state = SessionState::Failed;
        self.last_error = Some(reason);
    }

    pub(crate) fn finish(&mut self, termination: Termination) {
        self.termination = Some(termination);
    }
}
