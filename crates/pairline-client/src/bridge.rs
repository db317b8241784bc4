//! Pairing client backed by an external helper process.
//!
//! The helper owns the real automation stack. We spawn it per session with
//! `--identity <id>` appended to the configured args and talk to it over
//! newline-delimited JSON (see [`crate::protocol`]).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pairline_core::{
    ClientError, Destination, MessageId, Notification, PageDiagnostic, PairingClient,
    PairingClientFactory, SessionIdentity,
};
use pairline_settings::BridgeSettings;

use crate::protocol::{BridgeCommand, CommandEnvelope, Inbound};

const EXITED: &str = "bridge process exited";

type ReplyResult = Result<Option<Value>, ClientError>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ReplyResult>>>>;
type DiagnosticSlot = Arc<Mutex<Option<mpsc::Sender<PageDiagnostic>>>>;

/// Spawns one helper process per session.
pub struct BridgeFactory {
    settings: BridgeSettings,
}

impl BridgeFactory {
    pub fn new(settings: BridgeSettings) -> Self {
        Self { settings }
    }

    fn spawn_child(&self, program: &str, identity: &SessionIdentity) -> std::io::Result<Child> {
        let mut cmd = Command::new(program);
        cmd.args(&self.settings.args)
            .arg("--identity")
            .arg(identity.as_str())
            .envs(&self.settings.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd.spawn()
    }
}

impl PairingClientFactory for BridgeFactory {
    fn create(
        &self,
        identity: &SessionIdentity,
        notifications: mpsc::Sender<Notification>,
    ) -> Result<Arc<dyn PairingClient>, ClientError> {
        let program = self
            .settings
            .command
            .as_deref()
            .ok_or_else(|| ClientError::Unavailable("no bridge command configured".into()))?;

        let mut child = self.spawn_child(program, identity)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Unavailable("bridge stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Unavailable("bridge stdout not captured".into()))?;

        info!(
            program,
            identity = %identity,
            pid = child.id(),
            "spawned bridge process"
        );

        Ok(Arc::new(BridgeClient::new(
            child,
            stdin,
            stdout,
            notifications,
            self.settings.request_timeout(),
        )))
    }
}

pub struct BridgeClient {
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: PendingMap,
    diagnostics: DiagnosticSlot,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl BridgeClient {
    fn new(
        child: Child,
        stdin: ChildStdin,
        stdout: ChildStdout,
        notifications: mpsc::Sender<Notification>,
        request_timeout: Duration,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics: DiagnosticSlot = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            stdout,
            notifications,
            Arc::clone(&pending),
            Arc::clone(&diagnostics),
            Arc::clone(&closed),
        ));

        Self {
            stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            diagnostics,
            closed,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader,
        }
    }

    async fn request(&self, command: BridgeCommand) -> ReplyResult {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = command.name();
        let line = CommandEnvelope { id, command }.to_line()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().remove(&id);
            return Err(ClientError::Unavailable(EXITED.into()));
        }

        if let Err(e) = write_line(&self.stdin, &line).await {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }
        debug!(id, cmd = name, "bridge command sent");

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Unavailable(EXITED.into())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(ClientError::Timeout(self.request_timeout))
            }
        }
    }

    /// Signal the helper to die without waiting; tokio reaps the child.
    fn kill(&self) {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            match child.start_kill() {
                Ok(()) => debug!(pid = child.id(), "bridge process killed"),
                Err(e) => debug!(error = %e, "bridge process already gone"),
            }
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.kill();
        self.reader.abort();
    }
}

/// Kills the helper when dropped, so a `destroy` abandoned by the caller's
/// timeout still takes the process down.
struct KillOnDrop<'a>(&'a BridgeClient);

impl Drop for KillOnDrop<'_> {
    fn drop(&mut self) {
        self.0.kill();
    }
}

async fn write_line(
    stdin: &tokio::sync::Mutex<ChildStdin>,
    line: &str,
) -> std::io::Result<()> {
    let mut stdin = stdin.lock().await;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn read_loop(
    stdout: ChildStdout,
    notifications: mpsc::Sender<Notification>,
    pending: PendingMap,
    diagnostics: DiagnosticSlot,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match Inbound::decode(&line) {
                    Ok(Inbound::Reply(reply)) => {
                        let waiter = pending.lock().remove(&reply.id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(reply.into_result());
                            }
                            None => debug!(id = reply.id, "reply for unknown request"),
                        }
                    }
                    Ok(Inbound::Diagnostic(diagnostic)) => {
                        let sink = diagnostics.lock().clone();
                        if let Some(sink) = sink {
                            if sink.try_send(diagnostic).is_err() {
                                debug!("diagnostic sink unavailable, dropping");
                            }
                        }
                    }
                    Ok(Inbound::Notification(notification)) => {
                        if notifications.send(notification).await.is_err() {
                            debug!("notification channel closed");
                            break;
                        }
                    }
                    Err(e) => warn!(line = %line, error = %e, "unparseable bridge line"),
                }
            }
            Ok(None) => {
                debug!("bridge stdout closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "error reading bridge stdout");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let waiters: Vec<_> = pending.lock().drain().map(|(_, tx)| tx).collect();
    for tx in waiters {
        let _ = tx.send(Err(ClientError::Unavailable(EXITED.into())));
    }
    let _ = notifications
        .send(Notification::Disconnected(EXITED.into()))
        .await;
}

#[async_trait]
impl PairingClient for BridgeClient {
    async fn initialize(&self) -> Result<(), ClientError> {
        self.request(BridgeCommand::Initialize).await.map(|_| ())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        let _kill = KillOnDrop(self);
        self.request(BridgeCommand::Destroy).await.map(|_| ())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.request(BridgeCommand::Logout).await.map(|_| ())
    }

    async fn send_message(
        &self,
        destination: &Destination,
        text: &str,
    ) -> Result<MessageId, ClientError> {
        let result = self
            .request(BridgeCommand::Send {
                to: destination.chat_address(),
                text: text.to_string(),
            })
            .await?;
        message_id(result)
            .ok_or_else(|| ClientError::Protocol("send reply carried no message id".into()))
    }

    async fn version(&self) -> Result<String, ClientError> {
        match self.request(BridgeCommand::Version).await? {
            Some(Value::String(v)) => Ok(v),
            other => Err(ClientError::Protocol(format!(
                "unexpected version reply: {other:?}"
            ))),
        }
    }

    fn attach_diagnostics(&self, sink: mpsc::Sender<PageDiagnostic>) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable(EXITED.into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;
        *self.diagnostics.lock() = Some(sink);

        // The reply is not awaited; it lands as an unknown id and is ignored.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = CommandEnvelope {
            id,
            command: BridgeCommand::Diagnostics,
        }
        .to_line()?;
        let stdin = Arc::clone(&self.stdin);
        runtime.spawn(async move {
            if let Err(e) = write_line(&stdin, &line).await {
                warn!(error = %e, "failed to enable bridge diagnostics");
            }
        });
        Ok(())
    }
}

fn message_id(result: Option<Value>) -> Option<MessageId> {
    match result? {
        Value::String(id) => Some(MessageId::from_raw(id)),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .map(MessageId::from_raw),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_shapes() {
        assert_eq!(
            message_id(Some(Value::from("abc"))).unwrap().as_str(),
            "abc"
        );
        assert_eq!(
            message_id(Some(serde_json::json!({"id": "true_x@c.us_1"})))
                .unwrap()
                .as_str(),
            "true_x@c.us_1"
        );
        assert!(message_id(Some(serde_json::json!({"ack": 1}))).is_none());
        assert!(message_id(None).is_none());
    }

    #[tokio::test]
    async fn missing_command_is_unavailable() {
        let factory = BridgeFactory::new(BridgeSettings::default());
        let (tx, _rx) = mpsc::channel(8);
        let err = factory
            .create(&SessionIdentity::from_raw("default"), tx)
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Unavailable(_)));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use pairline_core::ChallengeArtifact;

        const ECHO_BRIDGE: &str = r#"
echo '{"event":"loading_progress","data":{"percent":10,"message":"boot"}}'
echo '{"event":"challenge","data":"2@'"$2"'"}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"cmd":"send"'*) echo '{"event":"reply","id":'"$id"',"ok":true,"result":{"id":"msg-'"$id"'"}}' ;;
    *'"cmd":"version"'*) echo '{"event":"reply","id":'"$id"',"ok":true,"result":"2.3000.1"}' ;;
    *'"cmd":"logout"'*) echo '{"event":"reply","id":'"$id"',"ok":false,"error":"not paired"}' ;;
    *'"cmd":"diagnostics"'*) echo '{"event":"diagnostic","data":{"kind":"page_error","message":"boom"}}' ;;
    *'"cmd":"destroy"'*) echo '{"event":"reply","id":'"$id"',"ok":true}'; exit 0 ;;
    *) echo '{"event":"reply","id":'"$id"',"ok":true}' ;;
  esac
done
"#;

        fn settings(script: &str, timeout_ms: u64) -> BridgeSettings {
            BridgeSettings {
                command: Some("sh".into()),
                args: vec!["-c".into(), script.into(), "bridge".into()],
                request_timeout_ms: timeout_ms,
                ..BridgeSettings::default()
            }
        }

        #[tokio::test]
        async fn notifications_and_commands_round_trip() {
            let factory = BridgeFactory::new(settings(ECHO_BRIDGE, 5_000));
            let (tx, mut rx) = mpsc::channel(16);
            let client = factory
                .create(&SessionIdentity::from_raw("default"), tx)
                .unwrap();

            assert_eq!(
                rx.recv().await,
                Some(Notification::LoadingProgress {
                    percent: 10,
                    message: "boot".into()
                })
            );
            assert_eq!(
                rx.recv().await,
                Some(Notification::Challenge(ChallengeArtifact::new("2@default")))
            );

            client.initialize().await.unwrap();
            assert_eq!(client.version().await.unwrap(), "2.3000.1");

            let dest = Destination::parse("593987654321").unwrap();
            let id = client.send_message(&dest, "hola").await.unwrap();
            assert!(id.as_str().starts_with("msg-"));

            let err = client.logout().await.unwrap_err();
            assert!(matches!(err, ClientError::Rejected(ref m) if m == "not paired"));

            let (diag_tx, mut diag_rx) = mpsc::channel(4);
            client.attach_diagnostics(diag_tx).unwrap();
            assert_eq!(
                diag_rx.recv().await,
                Some(PageDiagnostic::PageError {
                    message: "boom".into()
                })
            );

            client.destroy().await.unwrap();
            assert_eq!(
                rx.recv().await,
                Some(Notification::Disconnected(EXITED.into()))
            );
        }

        #[tokio::test]
        async fn silent_bridge_times_out() {
            let factory = BridgeFactory::new(settings("while read -r l; do :; done", 200));
            let (tx, _rx) = mpsc::channel(16);
            let client = factory
                .create(&SessionIdentity::from_raw("default"), tx)
                .unwrap();

            let err = client.initialize().await.unwrap_err();
            assert!(matches!(err, ClientError::Timeout(_)));
        }

        #[tokio::test]
        async fn abandoned_destroy_still_kills_the_helper() {
            let factory = BridgeFactory::new(settings("while read -r l; do :; done", 30_000));
            let (tx, mut rx) = mpsc::channel(16);
            let client = factory
                .create(&SessionIdentity::from_raw("default"), tx)
                .unwrap();
            let init = {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.initialize().await })
            };

            let destroyed = tokio::time::timeout(Duration::from_millis(200), client.destroy()).await;
            assert!(destroyed.is_err());

            // The helper is gone long before its 30 s request timeout.
            let exited = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("helper still running after abandoned destroy");
            assert_eq!(exited, Some(Notification::Disconnected(EXITED.into())));

            let init = tokio::time::timeout(Duration::from_secs(5), init)
                .await
                .expect("initialize still waiting on a dead helper")
                .unwrap();
            assert!(matches!(
                init,
                Err(ClientError::Unavailable(_) | ClientError::Io(_))
            ));
        }

        #[tokio::test]
        async fn exited_bridge_fails_requests() {
            let factory = BridgeFactory::new(settings("exit 0", 5_000));
            let (tx, mut rx) = mpsc::channel(16);
            let client = factory
                .create(&SessionIdentity::from_raw("default"), tx)
                .unwrap();

            assert_eq!(
                rx.recv().await,
                Some(Notification::Disconnected(EXITED.into()))
            );
            let err = client.initialize().await.unwrap_err();
            assert!(matches!(
                err,
                ClientError::Unavailable(_) | ClientError::Io(_)
            ));
        }
    }
}
