pub mod client;
pub mod destination;
pub mod errors;
pub mod events;
pub mod ids;
pub mod status;

pub use client::{Notification, PageDiagnostic, PairingClient, PairingClientFactory};
pub use destination::Destination;
pub use errors::{ClientError, RelayError, SessionError, SinkError};
pub use events::{FrameDecoder, StreamEvent, StreamEventKind};
pub use ids::{MessageId, SessionIdentity, SubscriberId};
pub use status::{ChallengeArtifact, SessionSnapshot, SessionStatus};
