//! Contract of the external pairing client.
//!
//! The client is opaque: it is constructed for an identity, initialized,
//! destroyed, asked to log out or send, and reports its lifecycle through a
//! channel of [`Notification`]s.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::destination::Destination;
use crate::errors::ClientError;
use crate::ids::{MessageId, SessionIdentity};
use crate::status::ChallengeArtifact;

/// Lifecycle notifications a pairing client can emit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Notification {
    LoadingProgress { percent: u32, message: String },
    Challenge(ChallengeArtifact),
    PairingCode(String),
    Authenticated,
    AuthFailure(String),
    Ready,
    Disconnected(String),
    /// Raw client connection state (e.g. `CONFLICT`, `UNPAIRED`). Logged
    /// only; observers never see it.
    StateChanged(String),
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoadingProgress { .. } => "loading_progress",
            Self::Challenge(_) => "challenge",
            Self::PairingCode(_) => "pairing_code",
            Self::Authenticated => "authenticated",
            Self::AuthFailure(_) => "auth_failure",
            Self::Ready => "ready",
            Self::Disconnected(_) => "disconnected",
            Self::StateChanged(_) => "state_changed",
        }
    }
}

/// Operator diagnostics observed on the client's underlying page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageDiagnostic {
    PageError { message: String },
    RequestFailed { url: String, reason: Option<String> },
    HttpError { status: u16, url: String },
}

#[async_trait]
pub trait PairingClient: Send + Sync {
    /// Start the pairing workflow. Notifications flow once this runs.
    async fn initialize(&self) -> Result<(), ClientError>;

    /// Release the client; persisted credentials are kept.
    async fn destroy(&self) -> Result<(), ClientError>;

    /// End the paired session and discard its credentials.
    async fn logout(&self) -> Result<(), ClientError>;

    async fn send_message(
        &self,
        destination: &Destination,
        text: &str,
    ) -> Result<MessageId, ClientError>;

    /// Version string of the remote counterpart, for operator logs.
    async fn version(&self) -> Result<String, ClientError>;

    /// Start forwarding page diagnostics into `sink`.
    fn attach_diagnostics(&self, sink: mpsc::Sender<PageDiagnostic>) -> Result<(), ClientError>;
}

/// Builds clients. `notifications` must be wired up before the client is
/// returned so nothing emitted during `initialize` is lost.
pub trait PairingClientFactory: Send + Sync {
    fn create(
        &self,
        identity: &SessionIdentity,
        notifications: mpsc::Sender<Notification>,
    ) -> Result<Arc<dyn PairingClient>, ClientError>;
}
