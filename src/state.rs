use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::error::RfcError;

/// Lifecycle of one accepted or connected session.
///
/// Regular path: `None → Accepting/Connecting → Open → Closing → Closed`.
/// Refusal path: `None → Rejecting → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Accepting,
    Connecting,
    Open,
    Closing,
    Rejecting,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SessionState::None => "not opened",
            SessionState::Accepting => "accepting",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Rejecting => "rejecting",
            SessionState::Closed => "closed",
        })
    }
}

/// Shared state cell consulted before every state-dependent operation.
///
/// One cell is shared between a transport adapter and its communicator; the
/// adapter drives the transitions, the communicator only inspects.
#[derive(Debug)]
pub struct StateCell(Mutex<SessionState>);

impl StateCell {
    pub fn new(initial: SessionState) -> Self {
        Self(Mutex::new(initial))
    }

    pub fn get(&self) -> SessionState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, next: SessionState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Whether a frame may be sent or a call issued right now. Every state
    /// other than open is a violation naming the offending state.
    pub fn inspect_outbound(&self) -> Result<(), RfcError> {
        match self.get() {
            SessionState::Open => Ok(()),
            state => Err(RfcError::StateViolation {
                operation: "send",
                state,
            }),
        }
    }

    /// Whether waiting for teardown is legal right now. Joining a session
    /// that was never opened would wait forever, so it fails instead.
    pub fn inspect_join(&self) -> Result<(), RfcError> {
        match self.get() {
            SessionState::Open | SessionState::Closing | SessionState::Closed => Ok(()),
            state => Err(RfcError::StateViolation {
                operation: "join",
                state,
            }),
        }
    }

    /// Compare-and-transition guard: moves `from → via` atomically, or
    /// reports which state made `operation` illegal.
    pub(crate) fn begin(
        &self,
        operation: &'static str,
        from: SessionState,
        via: SessionState,
    ) -> Result<(), RfcError> {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != from {
            return Err(RfcError::StateViolation {
                operation,
                state: *current,
            });
        }
        *current = via;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_is_legal_only_while_open() {
        for (state, ok) in [
            (SessionState::None, false),
            (SessionState::Accepting, false),
            (SessionState::Connecting, false),
            (SessionState::Open, true),
            (SessionState::Closing, false),
            (SessionState::Rejecting, false),
            (SessionState::Closed, false),
        ] {
            let cell = StateCell::new(state);
            assert_eq!(cell.inspect_outbound().is_ok(), ok, "state {state}");
        }
    }

    #[test]
    fn closed_sessions_also_report_a_send_violation() {
        let cell = StateCell::new(SessionState::Closed);
        assert_eq!(
            cell.inspect_outbound(),
            Err(RfcError::StateViolation {
                operation: "send",
                state: SessionState::Closed,
            })
        );
    }

    #[test]
    fn join_is_legal_from_open_onwards() {
        for (state, ok) in [
            (SessionState::None, false),
            (SessionState::Accepting, false),
            (SessionState::Open, true),
            (SessionState::Closing, true),
            (SessionState::Closed, true),
        ] {
            let cell = StateCell::new(state);
            assert_eq!(cell.inspect_join().is_ok(), ok, "state {state}");
        }
    }

    #[test]
    fn begin_guards_the_transition_source() {
        let cell = StateCell::new(SessionState::None);
        cell.begin("accept", SessionState::None, SessionState::Accepting)
            .unwrap();
        assert_eq!(cell.get(), SessionState::Accepting);

        // a second accept must name the state that made it illegal
        assert_eq!(
            cell.begin("accept", SessionState::None, SessionState::Accepting),
            Err(RfcError::StateViolation {
                operation: "accept",
                state: SessionState::Accepting,
            })
        );
    }
}
