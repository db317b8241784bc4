//! Owner of the single active pairing session.
//!
//! All lifecycle changes (start, restart, terminate) and the normalization of
//! client notifications go through one async mutex, so the snapshot on the
//! bus only ever reflects the session that is currently active. Read-only
//! accessors never take that mutex; it is held across teardown.

use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use pairline_core::{
    ClientError, Destination, MessageId, Notification, PageDiagnostic, PairingClient,
    PairingClientFactory, RelayError, SessionError, SessionIdentity, SessionSnapshot,
    SessionStatus, StreamEvent,
};
use pairline_settings::SessionSettings;

use crate::background::BackgroundTracker;
use crate::bus::EventBus;

const DIAGNOSTIC_BUFFER: usize = 64;

struct ActiveSession {
    generation: u64,
    identity: SessionIdentity,
    client: Arc<dyn PairingClient>,
}

#[derive(Default)]
struct State {
    active: Option<ActiveSession>,
    next_generation: u64,
}

struct Inner {
    state: Mutex<State>,
    /// Mirror of `state.active`'s identity.
    identity: RwLock<Option<SessionIdentity>>,
    bus: Arc<EventBus>,
    factory: Arc<dyn PairingClientFactory>,
    settings: SessionSettings,
    background: BackgroundTracker,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        bus: Arc<EventBus>,
        factory: Arc<dyn PairingClientFactory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                identity: RwLock::new(None),
                bus,
                factory,
                settings,
                background: BackgroundTracker::new(),
            }),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn background(&self) -> &BackgroundTracker {
        &self.inner.background
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.bus.snapshot()
    }

    /// Identity of the active session, if any. Answers immediately even
    /// while a restart or logout is tearing a session down.
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.inner.identity.read().clone()
    }

    /// Replace whatever session is active with a new one.
    ///
    /// The previous session is destroyed first (bounded by the teardown
    /// timeout, failures only logged). Observers see `INITIALIZING` before the
    /// new client exists. The client's `initialize` runs in the background.
    pub async fn start(&self, fresh: bool) -> Result<SessionIdentity, SessionError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if let Some(previous) = inner.take_active(&mut state) {
            inner.teardown(previous).await;
        }

        inner.bus.publish(
            SessionSnapshot::initializing(),
            StreamEvent::status(&SessionStatus::Initializing),
        );

        let identity = if fresh {
            SessionIdentity::fresh()
        } else {
            SessionIdentity::from_raw(inner.settings.default_identity.clone())
        };

        let (tx, rx) = mpsc::channel(inner.settings.notification_buffer.max(1));
        let client = inner.factory.create(&identity, tx).map_err(|e| {
            error!(identity = %identity, error = %e, "failed to construct pairing client");
            SessionError::StartFailed(e)
        })?;

        state.next_generation += 1;
        let generation = state.next_generation;
        tokio::spawn(pump(Arc::downgrade(inner), generation, rx));

        state.active = Some(ActiveSession {
            generation,
            identity: identity.clone(),
            client: Arc::clone(&client),
        });
        *inner.identity.write() = Some(identity.clone());
        drop(state);

        info!(identity = %identity, generation, fresh, "session started");
        inner
            .background
            .spawn("initialize", async move { client.initialize().await });
        Ok(identity)
    }

    /// Start over with a fresh identity, forcing a new pairing.
    pub async fn restart(&self) -> Result<SessionIdentity, SessionError> {
        self.start(true).await
    }

    /// Run `start(fresh)` in the background; failures are logged.
    pub fn schedule_start(&self, fresh: bool) {
        let this = self.clone();
        self.inner.background.spawn("start", async move {
            this.start(fresh).await.map(|_| ())
        });
    }

    /// Log the active session out and destroy it. Observers see `LOGGED_OUT`
    /// whether or not a session was active.
    pub async fn terminate(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if let Some(session) = inner.take_active(&mut state) {
            match inner.bounded(session.client.logout()).await {
                Ok(()) => debug!(identity = %session.identity, "logged out"),
                Err(e) => warn!(identity = %session.identity, error = %e, "logout failed"),
            }
            inner.teardown(session).await;
        }

        inner.bus.publish(
            SessionSnapshot::logged_out(),
            StreamEvent::status(&SessionStatus::LoggedOut),
        );
        info!("session terminated");
    }

    /// Send `text` to `destination` through the active session.
    ///
    /// The controller lock is only held to look up the client; the send
    /// itself runs unlocked.
    pub async fn relay(&self, destination: &str, text: &str) -> Result<MessageId, RelayError> {
        let destination = Destination::parse(destination)?;
        if text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let client = {
            let state = self.inner.state.lock().await;
            match &state.active {
                Some(session) if self.inner.bus.snapshot().status.can_send() => {
                    Arc::clone(&session.client)
                }
                _ => return Err(RelayError::SessionNotReady),
            }
        };

        match client.send_message(&destination, text).await {
            Ok(id) => {
                info!(to = %destination, message_id = %id, "message relayed");
                Ok(id)
            }
            Err(e) => {
                warn!(to = %destination, error = %e, "relay failed");
                Err(RelayError::SendFailed(e.to_string()))
            }
        }
    }

    /// Destroy the active session, keeping its credentials. Used when the
    /// process exits.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(session) = self.inner.take_active(&mut state) {
            self.inner.teardown(session).await;
        }
    }
}

impl Inner {
    fn take_active(&self, state: &mut State) -> Option<ActiveSession> {
        let session = state.active.take();
        if session.is_some() {
            *self.identity.write() = None;
        }
        session
    }

    async fn bounded<F>(&self, op: F) -> Result<(), ClientError>
    where
        F: Future<Output = Result<(), ClientError>>,
    {
        let limit = self.settings.teardown_timeout();
        tokio::time::timeout(limit, op)
            .await
            .unwrap_or(Err(ClientError::Timeout(limit)))
    }

    async fn teardown(&self, session: ActiveSession) {
        match self.bounded(session.client.destroy()).await {
            Ok(()) => debug!(
                identity = %session.identity,
                generation = session.generation,
                "session destroyed"
            ),
            Err(e) => {
                let err = SessionError::TeardownFailed(e);
                warn!(identity = %session.identity, error = %err, "teardown failed");
            }
        }
    }

    /// Fold one notification into the snapshot. Returns `false` if the
    /// session that produced it is no longer active.
    async fn apply(&self, generation: u64, notification: Notification) -> bool {
        let state = self.state.lock().await;
        let client = match &state.active {
            Some(session) if session.generation == generation => Arc::clone(&session.client),
            _ => {
                debug!(
                    generation,
                    event = notification.name(),
                    "discarding notification from replaced session"
                );
                return false;
            }
        };

        match &notification {
            Notification::Ready => self.on_ready(client),
            Notification::StateChanged(client_state) => {
                info!(generation, state = %client_state, "client state changed")
            }
            _ => {}
        }
        let Some((snapshot, event)) = normalize(&self.bus.snapshot(), notification) else {
            return true;
        };
        match &snapshot.challenge {
            Some(challenge) if matches!(snapshot.status, SessionStatus::ChallengePending { .. }) => {
                info!(generation, challenge = %challenge.preview(), "challenge issued")
            }
            _ => info!(generation, status = %snapshot.status, "session status changed"),
        }
        self.bus.publish(snapshot, event);
        drop(state);
        true
    }

    fn on_ready(&self, client: Arc<dyn PairingClient>) {
        let (tx, mut rx) = mpsc::channel(DIAGNOSTIC_BUFFER);
        match client.attach_diagnostics(tx) {
            Ok(()) => {
                tokio::spawn(async move {
                    while let Some(diagnostic) = rx.recv().await {
                        log_diagnostic(&diagnostic);
                    }
                });
            }
            Err(e) => warn!(error = %e, "could not attach page diagnostics"),
        }

        self.background.spawn("version_check", async move {
            let version = client.version().await?;
            info!(version = %version, "pairing client ready");
            Ok::<(), ClientError>(())
        });
    }
}

async fn pump(inner: Weak<Inner>, generation: u64, mut rx: mpsc::Receiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.apply(generation, notification).await {
            break;
        }
    }
    debug!(generation, "notification pump stopped");
}

/// Map a client notification to the next snapshot and the event observers
/// receive for it. `None` for notifications that are only logged.
fn normalize(
    current: &SessionSnapshot,
    notification: Notification,
) -> Option<(SessionSnapshot, StreamEvent)> {
    let next = match notification {
        Notification::LoadingProgress { percent, message } => {
            status_change(current, SessionStatus::LoadingProgress { percent, message })
        }
        Notification::Challenge(challenge) => {
            let event = StreamEvent::qr(&challenge);
            (
                current.transition(SessionStatus::ChallengePending { challenge }),
                event,
            )
        }
        Notification::PairingCode(code) => {
            let event = StreamEvent::code(&code);
            (
                current.transition(SessionStatus::PairingCodeIssued { code }),
                event,
            )
        }
        Notification::Authenticated => status_change(current, SessionStatus::Authenticated),
        Notification::AuthFailure(reason) => {
            status_change(current, SessionStatus::AuthFailed { reason })
        }
        Notification::Ready => status_change(current, SessionStatus::Ready),
        Notification::Disconnected(reason) => {
            status_change(current, SessionStatus::Disconnected { reason })
        }
        Notification::StateChanged(_) => return None,
    };
    Some(next)
}

fn status_change(
    current: &SessionSnapshot,
    status: SessionStatus,
) -> (SessionSnapshot, StreamEvent) {
    let event = StreamEvent::status(&status);
    (current.transition(status), event)
}

fn log_diagnostic(diagnostic: &PageDiagnostic) {
    match diagnostic {
        PageDiagnostic::PageError { message } => warn!(message = %message, "page error"),
        PageDiagnostic::RequestFailed { url, reason } => warn!(
            url = %url,
            reason = reason.as_deref().unwrap_or("unknown"),
            "page request failed"
        ),
        PageDiagnostic::HttpError { status, url } => {
            warn!(status, url = %url, "page request returned an error status")
        }
    }
}
