//! Session lifecycle as an explicit state machine.
//!
//! The connection loop in [`client`](crate::client) drives these
//! transitions; keeping them as a pure function means the lifecycle can be
//! tested without a transport.

/// One connection attempt's lifecycle. `Closed` is terminal and reached
/// only on explicit shutdown or a fatal authentication rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    Closed,
}

/// Observations that move the session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport dial succeeded.
    TransportOpened,
    /// `auth_ack { accepted: true }` received.
    AuthAccepted,
    /// `auth_ack { accepted: false }` received. Fatal: operators must see
    /// this, so it is never absorbed into the retry loop.
    AuthRejected,
    /// No `auth_ack` within the handshake timeout. Transient.
    HandshakeTimeout,
    /// Transport dropped or the server closed the channel.
    TransportLost,
    /// No inbound traffic for the idle grace window.
    IdleExpired,
    /// Backoff interval elapsed; time to dial again.
    BackoffElapsed,
    /// Explicit shutdown requested.
    Shutdown,
}

impl SessionState {
    /// Apply one event. Unexpected events leave the state unchanged.
    pub fn on(self, event: SessionEvent) -> SessionState {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (_, Shutdown) => Closed,
            (Closed, _) => Closed,

            (Connecting, TransportOpened) => Authenticating,
            (Connecting, TransportLost) => Reconnecting,

            (Authenticating, AuthAccepted) => Connected,
            (Authenticating, AuthRejected) => Closed,
            (Authenticating, HandshakeTimeout) => Reconnecting,
            (Authenticating, TransportLost) => Reconnecting,

            (Connected, TransportLost) => Reconnecting,
            (Connected, IdleExpired) => Reconnecting,

            (Reconnecting, BackoffElapsed) => Connecting,

            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}
