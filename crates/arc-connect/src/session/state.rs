use serde::Serialize;
use std::fmt;

/// Lifecycle of one terminal session.
///
/// ```text
/// CONNECTING -> AUTHENTICATING -> ACTIVE -> CLOSING -> CLOSED
///                      \-> AUTH_FAILED
/// ```
/// `CLOSING` is also reachable from `CONNECTING` and `AUTHENTICATING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    AuthFailed,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "CONNECTING",
            SessionState::Authenticating => "AUTHENTICATING",
            SessionState::Active => "ACTIVE",
            SessionState::AuthFailed => "AUTH_FAILED",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        }
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Connecting, Closing)
                | (Authenticating, Active)
                | (Authenticating, AuthFailed)
                | (Authenticating, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::AuthFailed | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
