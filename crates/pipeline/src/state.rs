//! Export session state machine.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use trackmux_common::MuxError;

/// Observable state of an export session.
///
/// Moves `Unknown → Exporting → {Finished | Cancelled | Failed}`, or
/// straight from `Unknown` to `Failed` when setup fails. Equality compares
/// the variant only, so two failures with different errors are equal.
#[derive(Debug, Clone)]
pub enum SessionState {
    Unknown,
    Exporting,
    Cancelled,
    Finished,
    Failed(Arc<MuxError>),
}

impl SessionState {
    pub fn failed(error: MuxError) -> Self {
        SessionState::Failed(Arc::new(error))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Cancelled | SessionState::Finished | SessionState::Failed(_)
        )
    }

    pub fn error(&self) -> Option<&MuxError> {
        match self {
            SessionState::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Exporting => "exporting",
            SessionState::Cancelled => "cancelled",
            SessionState::Finished => "finished",
            SessionState::Failed(_) => "failed",
        }
    }
}

impl PartialEq for SessionState {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for SessionState {}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed(error) => write!(f, "failed: {error}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Single-writer slot holding the session state.
///
/// Every transition goes through [`watch::Sender::send_if_modified`], so
/// concurrent attempts to resolve the session settle on exactly one
/// terminal value.
#[derive(Debug)]
pub struct StateSlot {
    tx: watch::Sender<SessionState>,
}

impl Default for StateSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Unknown);
        Self { tx }
    }

    pub fn get(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// `Unknown → Exporting`. Returns whether the transition happened.
    pub fn begin_exporting(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, SessionState::Unknown) {
                *state = SessionState::Exporting;
                true
            } else {
                false
            }
        })
    }

    /// Move to a terminal state unless one was already recorded.
    ///
    /// Only `Failed` may be entered directly from `Unknown`.
    pub fn resolve(&self, terminal: SessionState) -> bool {
        if !terminal.is_terminal() {
            tracing::warn!(state = terminal.name(), "Refusing non-terminal resolution");
            return false;
        }
        let changed = self.tx.send_if_modified(|state| {
            let allowed = match state {
                SessionState::Exporting => true,
                SessionState::Unknown => matches!(terminal, SessionState::Failed(_)),
                _ => false,
            };
            if allowed {
                *state = terminal.clone();
            }
            allowed
        });
        if !changed {
            tracing::debug!(
                current = self.tx.borrow().name(),
                attempted = terminal.name(),
                "Session state already settled"
            );
        }
        changed
    }
}
