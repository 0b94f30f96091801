//! The session state machine.
//!
//! ```text
//! DISCONNECTED --connect()-->         CONNECTING
//! CONNECTING   --socket open-->       CONNECTED   (start ping timer, emit `connected`)
//! CONNECTING   --socket error/timeout--> ERROR
//! CONNECTED    --socket closed/err-->  RECONNECTING (unless attempts exhausted -> DISCONNECTED)
//! RECONNECTING --backoff expires-->   CONNECTING  (reopen socket; re-auth; re-subscribe)
//! RECONNECTING --attempts exhausted--> DISCONNECTED
//! any          --disconnect()-->      DISCONNECTED
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl SessionState {
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, SessionState::Error)
    }

    pub fn can_send(self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Reconnecting => "RECONNECTING",
            SessionState::Error => "ERROR",
        };
        f.write_str(s)
    }
}
