use serde::Serialize;

/// Lifecycle of one live session.
///
/// `Idle → Connecting → Open → (Active ⇄ Interrupted) → Closing → Idle`, with
/// `Error` reachable from any state that has a session in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Active,
    Interrupted,
    Closing,
    Error,
}

impl SessionState {
    /// A session is opening or open.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Open
                | SessionState::Active
                | SessionState::Interrupted
        )
    }

    /// Server messages are routed only in these states.
    pub fn accepts_messages(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Interrupted)
    }
}
