use std::fmt;

use serde::{Deserialize, Serialize};

/// The scannable credential artifact produced while a pairing is pending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeArtifact(String);

impl ChallengeArtifact {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines; artifacts are credentials and should not be
    /// written out in full.
    pub fn preview(&self) -> String {
        let head: String = self.0.chars().take(20).collect();
        if head.len() < self.0.len() {
            format!("{head}...")
        } else {
            head
        }
    }
}

/// Lifecycle state of the active session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    LoadingProgress { percent: u32, message: String },
    ChallengePending { challenge: ChallengeArtifact },
    PairingCodeIssued { code: String },
    Authenticated,
    Ready,
    AuthFailed { reason: String },
    Disconnected { reason: String },
    LoggedOut,
}

impl SessionStatus {
    /// Whether a session in this state can relay outbound messages.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether this status means the pairing handshake already completed, so
    /// any previously issued challenge is spent.
    pub fn consumes_challenge(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Ready)
    }
}

/// Human-readable rendering carried in `status` stream events.
impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => f.write_str("INITIALIZING"),
            Self::LoadingProgress { percent, message } => {
                if message.is_empty() {
                    write!(f, "LOADING: {percent}%")
                } else {
                    write!(f, "LOADING: {percent}% {message}")
                }
            }
            Self::ChallengePending { .. } => f.write_str("QR_RECEIVED"),
            Self::PairingCodeIssued { .. } => f.write_str("PAIRING_CODE_ISSUED"),
            Self::Authenticated => f.write_str("AUTHENTICATED"),
            Self::Ready => f.write_str("READY"),
            Self::AuthFailed { reason } => write!(f, "AUTH_FAILURE: {reason}"),
            Self::Disconnected { reason } => write!(f, "DISCONNECTED: {reason}"),
            Self::LoggedOut => f.write_str("LOGGED_OUT"),
        }
    }
}

/// The single authoritative state value replayed to late joiners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub challenge: Option<ChallengeArtifact>,
}

impl SessionSnapshot {
    pub fn initializing() -> Self {
        Self {
            status: SessionStatus::Initializing,
            challenge: None,
        }
    }

    pub fn logged_out() -> Self {
        Self {
            status: SessionStatus::LoggedOut,
            challenge: None,
        }
    }

    /// Derive the next snapshot for a new status.
    ///
    /// A `ChallengePending` status installs its artifact; statuses past the
    /// handshake clear it; everything else keeps the pending artifact.
    pub fn transition(&self, status: SessionStatus) -> Self {
        let challenge = match &status {
            SessionStatus::ChallengePending { challenge } => Some(challenge.clone()),
            s if s.consumes_challenge() => None,
            _ => self.challenge.clone(),
        };
        Self { status, challenge }
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::initializing()
    }
}
