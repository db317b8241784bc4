//! Deterministic in-process pairing client.
//!
//! Plays a [`Script`] of notifications once initialized and records every
//! call made against it. Tests grab the created clients from the
//! [`ScriptedFactory`] to emit further notifications by hand.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use pairline_core::{
    ChallengeArtifact, ClientError, Destination, MessageId, Notification, PageDiagnostic,
    PairingClient, PairingClientFactory, SessionIdentity,
};

#[derive(Clone, Debug)]
pub enum ScriptStep {
    Notify(Notification),
    Delay(Duration),
}

#[derive(Clone, Debug, Default)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(mut self, notification: Notification) -> Self {
        self.steps.push(ScriptStep::Notify(notification));
        self
    }

    pub fn delay(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Delay(duration));
        self
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    /// A first-time pairing: loading screen, a challenge, then the scan
    /// completes after `scan_after`.
    pub fn pairing(identity: &SessionIdentity, scan_after: Duration) -> Self {
        let artifact = ChallengeArtifact::new(format!(
            "2@{},{}",
            Uuid::now_v7().simple(),
            identity
        ));
        Self::new()
            .notify(loading(0, "starting"))
            .delay(Duration::from_millis(200))
            .notify(loading(50, "connecting"))
            .delay(Duration::from_millis(200))
            .notify(Notification::Challenge(artifact))
            .delay(scan_after)
            .notify(Notification::Authenticated)
            .notify(loading(100, "syncing"))
            .notify(Notification::StateChanged("CONNECTED".into()))
            .notify(Notification::Ready)
    }

    /// Stored credentials are accepted without a challenge.
    pub fn resume() -> Self {
        Self::new()
            .notify(loading(100, "restoring"))
            .notify(Notification::Authenticated)
            .notify(Notification::StateChanged("CONNECTED".into()))
            .notify(Notification::Ready)
    }
}

fn loading(percent: u32, message: &str) -> Notification {
    Notification::LoadingProgress {
        percent,
        message: message.to_string(),
    }
}

/// Failure injection for a scripted client.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBehavior {
    pub initialize_error: Option<ClientError>,
    pub destroy_error: Option<ClientError>,
    pub logout_error: Option<ClientError>,
    pub send_error: Option<ClientError>,
    pub diagnostics_error: Option<ClientError>,
    /// Simulated latency of `send_message`.
    pub send_delay: Option<Duration>,
    /// Simulated latency of `destroy`.
    pub destroy_delay: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCall {
    Initialize,
    Destroy,
    Logout,
    Send { to: String, text: String },
    Version,
    AttachDiagnostics,
}

pub struct ScriptedClient {
    identity: SessionIdentity,
    notifications: mpsc::Sender<Notification>,
    script: Script,
    behavior: ScriptedBehavior,
    calls: Mutex<Vec<ClientCall>>,
    runner: Mutex<Option<JoinHandle<()>>>,
    diagnostics: Mutex<Option<mpsc::Sender<PageDiagnostic>>>,
    sent: AtomicU64,
}

impl ScriptedClient {
    fn new(
        identity: SessionIdentity,
        notifications: mpsc::Sender<Notification>,
        script: Script,
        behavior: ScriptedBehavior,
    ) -> Self {
        Self {
            identity,
            notifications,
            script,
            behavior,
            calls: Mutex::new(Vec::new()),
            runner: Mutex::new(None),
            diagnostics: Mutex::new(None),
            sent: AtomicU64::new(0),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().clone()
    }

    pub fn was_called(&self, call: &ClientCall) -> bool {
        self.calls.lock().contains(call)
    }

    /// Push a notification as if the remote side produced it.
    pub async fn emit(&self, notification: Notification) -> bool {
        self.notifications.send(notification).await.is_ok()
    }

    /// Push a page diagnostic; `false` if no sink is attached.
    pub async fn emit_diagnostic(&self, diagnostic: PageDiagnostic) -> bool {
        let sink = self.diagnostics.lock().clone();
        match sink {
            Some(tx) => tx.send(diagnostic).await.is_ok(),
            None => false,
        }
    }

    fn record(&self, call: ClientCall) {
        self.calls.lock().push(call);
    }

    fn stop_runner(&self) {
        if let Some(handle) = self.runner.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl PairingClient for ScriptedClient {
    async fn initialize(&self) -> Result<(), ClientError> {
        self.record(ClientCall::Initialize);
        if let Some(e) = &self.behavior.initialize_error {
            return Err(e.clone());
        }

        let steps = self.script.steps().to_vec();
        let tx = self.notifications.clone();
        let handle = tokio::spawn(async move {
            for step in steps {
                match step {
                    ScriptStep::Delay(d) => tokio::time::sleep(d).await,
                    ScriptStep::Notify(n) => {
                        if tx.send(n).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        if let Some(previous) = self.runner.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        self.record(ClientCall::Destroy);
        self.stop_runner();
        if let Some(d) = self.behavior.destroy_delay {
            tokio::time::sleep(d).await;
        }
        match &self.behavior.destroy_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.record(ClientCall::Logout);
        self.stop_runner();
        match &self.behavior.logout_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn send_message(
        &self,
        destination: &Destination,
        text: &str,
    ) -> Result<MessageId, ClientError> {
        self.record(ClientCall::Send {
            to: destination.chat_address(),
            text: text.to_string(),
        });
        if let Some(d) = self.behavior.send_delay {
            tokio::time::sleep(d).await;
        }
        if let Some(e) = &self.behavior.send_error {
            return Err(e.clone());
        }
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(MessageId::from_raw(format!(
            "true_{}_{n:08}",
            destination.chat_address()
        )))
    }

    async fn version(&self) -> Result<String, ClientError> {
        self.record(ClientCall::Version);
        Ok("scripted".to_string())
    }

    fn attach_diagnostics(&self, sink: mpsc::Sender<PageDiagnostic>) -> Result<(), ClientError> {
        self.record(ClientCall::AttachDiagnostics);
        if let Some(e) = &self.behavior.diagnostics_error {
            return Err(e.clone());
        }
        *self.diagnostics.lock() = Some(sink);
        Ok(())
    }
}

type ScriptFn = Arc<dyn Fn(&SessionIdentity) -> Script + Send + Sync>;

/// Builds [`ScriptedClient`]s. It only tracks them weakly: a client the
/// controller has let go of is dropped, closing its notification channel.
pub struct ScriptedFactory {
    script: ScriptFn,
    behavior: Mutex<ScriptedBehavior>,
    create_error: Mutex<Option<ClientError>>,
    created: Mutex<Vec<Weak<ScriptedClient>>>,
    created_count: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&SessionIdentity) -> Script + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            behavior: Mutex::new(ScriptedBehavior::default()),
            create_error: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            created_count: AtomicUsize::new(0),
        }
    }

    /// Clients that emit nothing on their own.
    pub fn silent() -> Self {
        Self::new(|_| Script::new())
    }

    /// Fresh identities always pair from scratch; the default identity
    /// resumes its stored credentials.
    pub fn demo(scan_after: Duration) -> Self {
        Self::new(move |identity| {
            if identity.is_fresh() {
                Script::pairing(identity, scan_after)
            } else {
                Script::resume()
            }
        })
    }

    pub fn with_behavior(self, behavior: ScriptedBehavior) -> Self {
        *self.behavior.lock() = behavior;
        self
    }

    /// Behavior applied to clients created from now on.
    pub fn set_behavior(&self, behavior: ScriptedBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Make the next `create` call fail.
    pub fn fail_next_create(&self, error: ClientError) {
        *self.create_error.lock() = Some(error);
    }

    /// Clients built so far that are still alive, oldest first.
    pub fn created(&self) -> Vec<Arc<ScriptedClient>> {
        self.created.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Total number of clients built, alive or not.
    pub fn created_count(&self) -> usize {
        self.created_count.load(Ordering::Relaxed)
    }

    /// The most recently built client, if it is still alive.
    pub fn latest(&self) -> Option<Arc<ScriptedClient>> {
        self.created.lock().last().and_then(Weak::upgrade)
    }
}

impl PairingClientFactory for ScriptedFactory {
    fn create(
        &self,
        identity: &SessionIdentity,
        notifications: mpsc::Sender<Notification>,
    ) -> Result<Arc<dyn PairingClient>, ClientError> {
        if let Some(e) = self.create_error.lock().take() {
            return Err(e);
        }
        let client = Arc::new(ScriptedClient::new(
            identity.clone(),
            notifications,
            (self.script)(identity),
            self.behavior.lock().clone(),
        ));
        let mut created = self.created.lock();
        created.retain(|c| c.strong_count() > 0);
        created.push(Arc::downgrade(&client));
        self.created_count.fetch_add(1, Ordering::Relaxed);
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SessionIdentity {
        SessionIdentity::from_raw("default")
    }

    #[tokio::test]
    async fn script_plays_after_initialize() {
        let factory = ScriptedFactory::new(|_| {
            Script::new()
                .notify(Notification::Authenticated)
                .notify(Notification::Ready)
        });
        let (tx, mut rx) = mpsc::channel(8);
        let client = factory.create(&identity(), tx).unwrap();

        assert!(rx.try_recv().is_err());
        client.initialize().await.unwrap();

        assert_eq!(rx.recv().await, Some(Notification::Authenticated));
        assert_eq!(rx.recv().await, Some(Notification::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_stops_the_script() {
        let factory = ScriptedFactory::new(|_| {
            Script::new()
                .delay(Duration::from_secs(5))
                .notify(Notification::Ready)
        });
        let (tx, mut rx) = mpsc::channel(8);
        let client = factory.create(&identity(), tx).unwrap();
        client.initialize().await.unwrap();
        client.destroy().await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn calls_are_recorded() {
        let factory = ScriptedFactory::silent();
        let (tx, _rx) = mpsc::channel(8);
        let client = factory.create(&identity(), tx).unwrap();
        let dest = Destination::parse("593987654321").unwrap();

        client.initialize().await.unwrap();
        let id = client.send_message(&dest, "hola").await.unwrap();
        client.logout().await.unwrap();

        assert!(id.as_str().contains("593987654321@c.us"));
        let scripted = factory.latest().unwrap();
        assert_eq!(
            scripted.calls(),
            vec![
                ClientCall::Initialize,
                ClientCall::Send {
                    to: "593987654321@c.us".into(),
                    text: "hola".into()
                },
                ClientCall::Logout,
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_surface() {
        let factory = ScriptedFactory::silent().with_behavior(ScriptedBehavior {
            destroy_error: Some(ClientError::Unavailable("browser crashed".into())),
            send_error: Some(ClientError::Rejected("not on network".into())),
            ..ScriptedBehavior::default()
        });
        let (tx, _rx) = mpsc::channel(8);
        let client = factory.create(&identity(), tx).unwrap();
        let dest = Destination::parse("593987654321").unwrap();

        assert!(client.destroy().await.is_err());
        assert!(client.send_message(&dest, "x").await.is_err());
    }

    #[test]
    fn fail_next_create_applies_once() {
        let factory = ScriptedFactory::silent();
        factory.fail_next_create(ClientError::Unavailable("no browser".into()));
        let (tx, _rx) = mpsc::channel(8);
        assert!(factory.create(&identity(), tx.clone()).is_err());
        assert!(factory.create(&identity(), tx).is_ok());
        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test]
    async fn released_clients_are_not_kept_alive() {
        let factory = ScriptedFactory::silent();
        let (tx, mut rx) = mpsc::channel(8);
        let client = factory.create(&identity(), tx).unwrap();
        assert_eq!(factory.created().len(), 1);

        drop(client);
        assert!(factory.latest().is_none());
        assert!(factory.created().is_empty());
        assert_eq!(factory.created_count(), 1);
        // The notification channel closes with the client.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn emit_reaches_the_channel() {
        let factory = ScriptedFactory::silent();
        let (tx, mut rx) = mpsc::channel(8);
        let _client = factory.create(&identity(), tx).unwrap();
        let scripted = factory.latest().unwrap();

        assert!(scripted.emit(Notification::PairingCode("ABCD-1234".into())).await);
        assert_eq!(
            rx.recv().await,
            Some(Notification::PairingCode("ABCD-1234".into()))
        );
    }

    #[tokio::test]
    async fn diagnostics_flow_once_attached() {
        let factory = ScriptedFactory::silent();
        let (tx, _rx) = mpsc::channel(8);
        let client = factory.create(&identity(), tx).unwrap();
        let scripted = factory.latest().unwrap();
        let diag = PageDiagnostic::PageError {
            message: "boom".into(),
        };

        assert!(!scripted.emit_diagnostic(diag.clone()).await);

        let (diag_tx, mut diag_rx) = mpsc::channel(8);
        client.attach_diagnostics(diag_tx).unwrap();
        assert!(scripted.emit_diagnostic(diag.clone()).await);
        assert_eq!(diag_rx.recv().await, Some(diag));
    }

    #[test]
    fn demo_script_depends_on_identity() {
        let fresh = SessionIdentity::fresh();
        let pairing = Script::pairing(&fresh, Duration::from_secs(1));
        assert!(pairing
            .steps()
            .iter()
            .any(|s| matches!(s, ScriptStep::Notify(Notification::Challenge(_)))));
        assert!(!Script::resume()
            .steps()
            .iter()
            .any(|s| matches!(s, ScriptStep::Notify(Notification::Challenge(_)))));
    }
}
