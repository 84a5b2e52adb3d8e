//! Control session state machine
//!
//! Pure transition logic, no I/O. The worker in the parent module applies
//! these transitions around its network calls, which keeps the reconnect
//! policy testable without a device.

use std::time::Duration;

/// Session lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Reconnecting { attempt: u32 },
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed)
    }

    /// Whether a negotiated endpoint may be exposed in this state
    pub fn endpoint_valid(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Streaming)
    }

    /// Coarse label for the status surface
    pub fn status_label(&self) -> &'static str {
        match self {
            SessionState::Streaming => "streaming",
            SessionState::Connected | SessionState::Reconnecting { .. } => "not_streaming",
            _ => "not_initialized",
        }
    }

    /// A connect attempt is starting
    pub fn connect_requested(self) -> Self {
        match self {
            SessionState::Disconnected => SessionState::Connecting,
            other => other,
        }
    }

    /// Endpoint negotiation succeeded
    pub fn connect_succeeded(self) -> Self {
        match self {
            SessionState::Connecting | SessionState::Reconnecting { .. } => SessionState::Connected,
            other => other,
        }
    }

    /// Endpoint negotiation failed. Fatal on the first connect, one more
    /// attempt while reconnecting.
    pub fn connect_failed(self) -> Self {
        match self {
            SessionState::Connecting => SessionState::Failed,
            SessionState::Reconnecting { attempt } => SessionState::Reconnecting {
                attempt: attempt.saturating_add(1),
            },
            other => other,
        }
    }

    /// The acquisition loop decoded its first frame
    pub fn first_frame(self) -> Self {
        match self {
            SessionState::Connected => SessionState::Streaming,
            other => other,
        }
    }

    /// The acquisition loop crossed its consecutive-failure threshold.
    /// Also reachable from Connected: an endpoint that negotiates but never
    /// opens must be renegotiated, not waited on.
    pub fn transport_lost(self) -> Self {
        match self {
            SessionState::Connected | SessionState::Streaming => {
                SessionState::Reconnecting { attempt: 0 }
            }
            other => other,
        }
    }

    /// Explicit stop
    pub fn stop_requested(self) -> Self {
        if self.is_terminal() {
            self
        } else {
            SessionState::Failed
        }
    }
}

/// Reconnect backoff: `initial` doubling per attempt up to `cap`.
pub fn backoff_delay(initial: Duration, cap: Duration, attempt: u32) -> Duration {
    initial
        .checked_mul(1u32 << attempt.min(16))
        .map(|delay| delay.min(cap))
        .unwrap_or(cap)
}
