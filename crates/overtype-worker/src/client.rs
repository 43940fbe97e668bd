//! Channel owner for the long-lived AI worker subprocess.
//!
//! The client spawns the worker with piped standard streams, performs the
//! readiness handshake, and demultiplexes streaming chunks by correlation
//! id onto per-request channels. Chunk ordering per id follows from the
//! single reader task. Request timeouts are not enforced here; the
//! orchestrator is the one timeout authority per correlation id.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use overtype_foundation::WorkerError;

use crate::protocol::{decode_line, encode_line, GenerationChunk, WorkerCommand, WorkerEvent};
use crate::request::GenerationRequest;

const PER_REQUEST_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Provider keys and settings handed to the child environment.
    pub envs: Vec<(String, String)>,
    pub ready_timeout: Duration,
}

impl WorkerConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// Out-of-band conditions the supervisor reacts to.
#[derive(Debug)]
pub enum WorkerNotice {
    Exited { status: Option<i32> },
    ProtocolError { line: String },
    WorkerError { message: String },
}

type PendingMap = Arc<Mutex<HashMap<u64, mpsc::Sender<Result<GenerationChunk, WorkerError>>>>>;

#[derive(Debug)]
pub struct WorkerClient {
    pid: u32,
    next_id: AtomicU64,
    command_tx: mpsc::Sender<WorkerCommand>,
    pending: PendingMap,
    pong_slot: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    wait_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
}

impl WorkerClient {
    /// Spawn the worker and wait for its `started` line.
    pub async fn spawn(
        config: WorkerConfig,
        notice_tx: mpsc::Sender<WorkerNotice>,
    ) -> Result<Self, WorkerError> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.envs {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| WorkerError::Unavailable(format!("failed to spawn worker: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Unavailable("worker stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Unavailable("worker stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::Unavailable("worker stderr not piped".into()))?;

        let mut reader = BufReader::new(stdout).lines();

        // Readiness handshake: the first output line must be `started`.
        let first_line = tokio::time::timeout(config.ready_timeout, reader.next_line())
            .await
            .map_err(|_| WorkerError::Unavailable("worker readiness handshake timed out".into()))?
            .map_err(WorkerError::Io)?
            .ok_or_else(|| WorkerError::Unavailable("worker closed stdout before ready".into()))?;

        let pid = match decode_line(&first_line) {
            Ok(WorkerEvent::Started { success: true, pid }) => pid,
            Ok(WorkerEvent::Started { success: false, .. }) => {
                return Err(WorkerError::Unavailable(
                    "worker reported unsuccessful start".into(),
                ))
            }
            Ok(other) => {
                return Err(WorkerError::Protocol(format!(
                    "expected started event, got {:?}",
                    other
                )))
            }
            Err(err) => {
                return Err(WorkerError::Protocol(format!(
                    "unparseable readiness line: {err}"
                )))
            }
        };
        tracing::info!(pid, "AI worker ready");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pong_slot: Arc<Mutex<Option<oneshot::Sender<()>>>> = Arc::new(Mutex::new(None));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();

        let writer_handle = tokio::spawn(writer_task(stdin, command_rx));
        let reader_handle = tokio::spawn(reader_task(
            reader,
            Arc::clone(&pending),
            Arc::clone(&pong_slot),
            notice_tx.clone(),
        ));
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(target: "worker-stderr", "{line}");
            }
        });
        let wait_handle = tokio::spawn(wait_task(child, kill_rx, notice_tx));

        Ok(Self {
            pid,
            next_id: AtomicU64::new(1),
            command_tx,
            pending,
            pong_slot,
            kill_tx: Mutex::new(Some(kill_tx)),
            reader_handle,
            writer_handle,
            wait_handle,
            stderr_handle,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Issue a generation. The returned receiver yields in-order chunks for
    /// this correlation id and closes after the final one.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<Result<GenerationChunk, WorkerError>>, WorkerError> {
        let (tx, rx) = mpsc::channel(PER_REQUEST_CHANNEL_CAPACITY);
        self.pending.lock().insert(request.id, tx);

        if self.command_tx.send(request.to_command()).await.is_err() {
            self.pending.lock().remove(&request.id);
            return Err(WorkerError::Unavailable("worker channel closed".into()));
        }
        Ok(rx)
    }

    /// Best-effort cancel. The pending entry is removed immediately so any
    /// chunks the worker still emits for this id are discarded.
    pub async fn cancel(&self, id: u64) {
        self.pending.lock().remove(&id);
        if self
            .command_tx
            .send(WorkerCommand::Cancel { id })
            .await
            .is_err()
        {
            tracing::debug!(id, "cancel not delivered; worker channel closed");
        }
    }

    pub async fn ping(&self, timeout: Duration) -> Result<(), WorkerError> {
        let (tx, rx) = oneshot::channel();
        *self.pong_slot.lock() = Some(tx);
        self.command_tx
            .send(WorkerCommand::Ping)
            .await
            .map_err(|_| WorkerError::Unavailable("worker channel closed".into()))?;
        tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| WorkerError::Unavailable("ping timed out".into()))?
            .map_err(|_| WorkerError::Unavailable("worker exited during ping".into()))
    }

    /// Force-kill the child; the wait task reports the exit.
    pub fn kill(&self) {
        if let Some(tx) = self.kill_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Graceful stop: ask the worker to exit, then reap the channel tasks.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.command_tx.send(WorkerCommand::Shutdown).await;
        tokio::time::sleep(grace).await;
        self.kill();
        self.reader_handle.abort();
        self.writer_handle.abort();
        self.stderr_handle.abort();
        let _ = self.wait_handle.await;
    }
}

/// What the orchestrator needs from a generation channel. `WorkerClient`
/// is the production implementation; tests substitute scripted backends.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    fn allocate_id(&self) -> u64;
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<Result<GenerationChunk, WorkerError>>, WorkerError>;
    async fn cancel(&self, id: u64);
}

#[async_trait::async_trait]
impl GenerationBackend for WorkerClient {
    fn allocate_id(&self) -> u64 {
        WorkerClient::allocate_id(self)
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<Result<GenerationChunk, WorkerError>>, WorkerError> {
        WorkerClient::generate(self, request).await
    }

    async fn cancel(&self, id: u64) {
        WorkerClient::cancel(self, id).await
    }
}

async fn writer_task(
    stdin: tokio::process::ChildStdin,
    mut command_rx: mpsc::Receiver<WorkerCommand>,
) {
    let mut stdin = stdin;
    while let Some(command) = command_rx.recv().await {
        let line = match encode_line(&command) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!("failed to encode worker command: {err}");
                continue;
            }
        };
        if stdin.write_all(line.as_bytes()).await.is_err() {
            tracing::debug!("worker stdin closed");
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

async fn reader_task(
    mut reader: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
    pending: PendingMap,
    pong_slot: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    notice_tx: mpsc::Sender<WorkerNotice>,
) {
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                fail_all(&pending, "worker output stream closed");
                break;
            }
            Err(err) => {
                fail_all(&pending, &format!("worker read error: {err}"));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match decode_line(&line) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!("worker protocol violation: {err}: {line}");
                fail_all(&pending, "worker protocol violation");
                let _ = notice_tx.send(WorkerNotice::ProtocolError { line }).await;
                break;
            }
        };

        match event {
            WorkerEvent::Chunk { .. } | WorkerEvent::Complete { .. } => {
                let chunk = GenerationChunk::from_event(event)
                    .expect("chunk/complete always map to a generation chunk");
                route_chunk(&pending, chunk).await;
            }
            WorkerEvent::Error {
                id: Some(id),
                message,
            } => {
                let sender = pending.lock().remove(&id);
                if let Some(sender) = sender {
                    let _ = sender.send(Err(WorkerError::Request { id, message })).await;
                } else {
                    tracing::debug!(id, "error for unknown correlation id");
                }
            }
            WorkerEvent::Error { id: None, message } => {
                tracing::warn!("worker-level error: {message}");
                let _ = notice_tx.send(WorkerNotice::WorkerError { message }).await;
            }
            WorkerEvent::Pong => {
                if let Some(tx) = pong_slot.lock().take() {
                    let _ = tx.send(());
                }
            }
            WorkerEvent::Started { .. } => {
                tracing::debug!("duplicate started event ignored");
            }
        }
    }
}

async fn route_chunk(pending: &PendingMap, chunk: GenerationChunk) {
    let id = chunk.id;
    let is_final = chunk.is_final;
    let sender = pending.lock().get(&id).cloned();
    match sender {
        Some(sender) => {
            if sender.send(Ok(chunk)).await.is_err() {
                tracing::debug!(id, "session receiver dropped; discarding chunk");
                pending.lock().remove(&id);
            } else if is_final {
                pending.lock().remove(&id);
            }
        }
        None => {
            // Canceled or unknown id; chunks are discarded by id.
            tracing::debug!(id, "chunk for inactive correlation id discarded");
        }
    }
}

fn fail_all(pending: &PendingMap, reason: &str) {
    let drained: Vec<_> = pending.lock().drain().collect();
    for (id, sender) in drained {
        let err = WorkerError::Unavailable(format!("{reason} (request {id})"));
        let _ = sender.try_send(Err(err));
    }
}

async fn wait_task(
    mut child: tokio::process::Child,
    kill_rx: oneshot::Receiver<()>,
    notice_tx: mpsc::Sender<WorkerNotice>,
) {
    tokio::select! {
        status = child.wait() => {
            let code = status.ok().and_then(|s| s.code());
            tracing::warn!(?code, "AI worker exited");
            let _ = notice_tx.send(WorkerNotice::Exited { status: code }).await;
        }
        _ = kill_rx => {
            let _ = child.start_kill();
            let status = child.wait().await.ok().and_then(|s| s.code());
            let _ = notice_tx.send(WorkerNotice::Exited { status }).await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::request::GenerationMode;

    /// A stand-in worker speaking the wire protocol from a shell script.
    fn scripted_worker(script_body: &str) -> WorkerConfig {
        let mut config = WorkerConfig::new("/bin/sh");
        config.args = vec!["-c".to_string(), script_body.to_string()];
        config
    }

    const ECHO_WORKER: &str = r#"
echo '{"event":"started","success":true,"pid":4242}'
while IFS= read -r line; do
  case "$line" in
    *'"cmd":"generate"'*)
      echo '{"event":"chunk","id":1,"text":"Hel","final":false}'
      echo '{"event":"chunk","id":1,"text":"lo","final":true}'
      ;;
    *'"cmd":"ping"'*)
      echo '{"event":"pong"}'
      ;;
    *'"cmd":"shutdown"'*)
      exit 0
      ;;
  esac
done
"#;

    #[tokio::test]
    async fn handshake_and_streamed_generation() {
        let (notice_tx, _notice_rx) = mpsc::channel(8);
        let client = WorkerClient::spawn(scripted_worker(ECHO_WORKER), notice_tx)
            .await
            .expect("worker should start");
        assert_eq!(client.pid(), 4242);

        let id = client.allocate_id();
        assert_eq!(id, 1);
        let request = GenerationRequest::new(id, GenerationMode::GrammarFix, "hellow");
        let mut rx = client.generate(&request).await.unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.text, "Hel");
        assert!(!first.is_final);

        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.text, "lo");
        assert!(second.is_final);

        // Stream closes after the final chunk.
        assert!(rx.recv().await.is_none());

        client.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let (notice_tx, _notice_rx) = mpsc::channel(8);
        let client = WorkerClient::spawn(scripted_worker(ECHO_WORKER), notice_tx)
            .await
            .unwrap();
        client.ping(Duration::from_secs(2)).await.unwrap();
        client.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn failed_start_is_reported() {
        let (notice_tx, _notice_rx) = mpsc::channel(8);
        let config = scripted_worker(
            "echo '{\"event\":\"started\",\"success\":false,\"pid\":1}'; sleep 1",
        );
        let err = WorkerClient::spawn(config, notice_tx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn crash_mid_stream_fails_pending_and_notifies() {
        let (notice_tx, mut notice_rx) = mpsc::channel(8);
        let config = scripted_worker(
            r#"
echo '{"event":"started","success":true,"pid":7}'
IFS= read -r line
echo '{"event":"chunk","id":1,"text":"Hel","final":false}'
echo '{"event":"chunk","id":1,"text":"lo","final":false}'
exit 3
"#,
        );
        let client = WorkerClient::spawn(config, notice_tx).await.unwrap();

        let request =
            GenerationRequest::new(client.allocate_id(), GenerationMode::GrammarFix, "x");
        let mut rx = client.generate(&request).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().unwrap().text, "Hel");
        assert_eq!(rx.recv().await.unwrap().unwrap().text, "lo");
        // Stream ends with an error once the process dies without `final`.
        match rx.recv().await {
            Some(Err(WorkerError::Unavailable(_))) | None => {}
            other => panic!("expected failure, got {:?}", other),
        }

        // The supervisor hears about the exit.
        let mut saw_exit = false;
        while let Ok(Some(notice)) =
            tokio::time::timeout(Duration::from_secs(2), notice_rx.recv()).await
        {
            if matches!(notice, WorkerNotice::Exited { status: Some(3) }) {
                saw_exit = true;
                break;
            }
        }
        assert!(saw_exit, "expected exit notice with status 3");
    }

    #[tokio::test]
    async fn canceled_id_discards_late_chunks() {
        let (notice_tx, _notice_rx) = mpsc::channel(8);
        // This worker answers slowly so the cancel always lands first.
        let config = scripted_worker(
            r#"
echo '{"event":"started","success":true,"pid":9}'
while IFS= read -r line; do
  case "$line" in
    *'"cmd":"generate"'*)
      sleep 1
      echo '{"event":"chunk","id":1,"text":"late","final":true}'
      ;;
  esac
done
"#,
        );
        let client = WorkerClient::spawn(config, notice_tx).await.unwrap();

        let request =
            GenerationRequest::new(client.allocate_id(), GenerationMode::GrammarFix, "x");
        let mut rx = client.generate(&request).await.unwrap();
        client.cancel(request.id).await;

        // The pending entry is gone, so the receiver only observes closure.
        assert!(rx.recv().await.is_none());
        client.shutdown(Duration::from_millis(50)).await;
    }
}
