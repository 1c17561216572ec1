use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{CoreError, CoreResult};

use super::rpc::{error_codes, IncomingMessage, RpcError, RpcRequest, RpcResponse};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// Lines queued for the writer task.
const OUTGOING_CAPACITY: usize = 32;

/// Why a request did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCallError {
    /// The channel closed before (or while) the request was in flight.
    ConnectionLost(String),
    Timeout,
    /// The server answered with a JSON-RPC error.
    Rpc(RpcError),
    /// The server answered with something unusable.
    Protocol(String),
}

impl fmt::Display for RemoteCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCallError::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            RemoteCallError::Timeout => write!(f, "request timed out"),
            RemoteCallError::Rpc(error) => write!(f, "rpc error {}: {}", error.code, error.message),
            RemoteCallError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for RemoteCallError {}

/// Persistent, message-oriented connection to a remote tool server.
///
/// Requests are multiplexed over one channel. A writer task owns the outgoing
/// half and writes whole lines only; a reader task routes each response to
/// the request with the same id.
pub struct RemoteConnection {
    outgoing: mpsc::Sender<Vec<u8>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    _child: Option<Child>,
}

impl RemoteConnection {
    /// Wrap an already-established byte stream pair.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(reader, writer, None)
    }

    /// Spawn a server process and talk to it over its stdio.
    pub async fn spawn(program: &Path, args: &[String]) -> CoreResult<Self> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|error| {
            CoreError::Internal(format!(
                "failed to spawn remote tool server {}: {error}",
                program.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::Internal("remote server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::Internal("remote server stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CoreError::Internal("remote server stderr unavailable".to_string()))?;

        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                tracing::warn!("remote-server stderr: {}", line);
            }
        });

        Ok(Self::build(stdout, stdin, Some(child)))
    }

    fn build<R, W>(reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (outgoing, queued) = mpsc::channel(OUTGOING_CAPACITY);
        let writer_task = tokio::spawn(write_loop(writer, queued, pending.clone(), closed.clone()));
        let reader_task = tokio::spawn(read_loop(
            reader,
            outgoing.clone(),
            pending.clone(),
            closed.clone(),
        ));

        Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader_task,
            writer_task,
            _child: child,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send `method` and wait for the correlated response. `timeout` covers
    /// both queueing the request and waiting for the reply.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, RemoteCallError> {
        if self.is_closed() {
            return Err(RemoteCallError::ConnectionLost("connection closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params);
        let mut payload = serde_json::to_vec(&request).map_err(|error| {
            RemoteCallError::Protocol(format!("failed to serialize rpc request: {error}"))
        })?;
        payload.push(b'\n');

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        // Removes the entry however this future ends, including when dropped.
        let _entry = PendingEntry {
            pending: &self.pending,
            id,
        };
        // The reader and writer flag `closed` before draining, so a request
        // registered after the drain is caught here.
        if self.is_closed() {
            return Err(RemoteCallError::ConnectionLost("connection closed".to_string()));
        }

        let exchange = async {
            self.outgoing.send(payload).await.map_err(|_| {
                RemoteCallError::ConnectionLost(format!(
                    "connection closed before {method} was sent"
                ))
            })?;
            rx.await.map_err(|_| {
                RemoteCallError::ConnectionLost(format!(
                    "connection closed while waiting for {method} (id {id})"
                ))
            })
        };
        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(response) => response?,
            Err(_) => return Err(RemoteCallError::Timeout),
        };

        match (response.result, response.error) {
            (_, Some(error)) => Err(RemoteCallError::Rpc(error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(RemoteCallError::Protocol(format!(
                "response {id} carries neither result nor error"
            ))),
        }
    }

    pub fn pending_requests(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}

impl Drop for RemoteConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

struct PendingEntry<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcResponse>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fail every in-flight request. Dropping the senders wakes each waiter with
/// a receive error.
fn close(pending: &PendingMap, closed: &AtomicBool) {
    closed.store(true, Ordering::SeqCst);
    lock_pending(pending).clear();
}

async fn write_loop<W>(
    mut writer: W,
    mut queued: mpsc::Receiver<Vec<u8>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    while let Some(line) = queued.recv().await {
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        };
        if let Err(error) = written.await {
            tracing::warn!("remote-server write error: {}", error);
            close(&pending, &closed);
            return;
        }
    }
}

async fn read_loop<R>(
    reader: R,
    outgoing: mpsc::Sender<Vec<u8>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match IncomingMessage::parse(&line) {
                    Ok(IncomingMessage::Response(response)) => {
                        let id = response.id;
                        match lock_pending(&pending).remove(&id) {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => tracing::warn!(
                                id,
                                "remote-server response for unknown or expired request"
                            ),
                        }
                    }
                    Ok(IncomingMessage::Request(request)) => {
                        tracing::warn!(
                            id = request.id,
                            method = %request.method,
                            "remote-server request refused"
                        );
                        refuse(&outgoing, &request);
                    }
                    Ok(IncomingMessage::Notification(notification)) => {
                        tracing::debug!(
                            method = %notification.method,
                            "remote-server notification ignored"
                        );
                    }
                    Err(error) => {
                        tracing::warn!("remote-server stdout parse error: {} line={}", error, line);
                    }
                }
            }
            Ok(None) => {
                tracing::warn!("remote-server connection closed");
                break;
            }
            Err(error) => {
                tracing::warn!("remote-server read error: {}", error);
                break;
            }
        }
    }

    close(&pending, &closed);
}

/// Answer a server-initiated call with "method not found" without blocking
/// the reader.
fn refuse(outgoing: &mpsc::Sender<Vec<u8>>, request: &RpcRequest) {
    let reply = RpcResponse::error(
        request.id,
        error_codes::METHOD_NOT_FOUND,
        &format!("client does not serve {}", request.method),
    );
    let Ok(mut line) = serde_json::to_vec(&reply) else {
        return;
    };
    line.push(b'\n');
    if outgoing.try_send(line).is_err() {
        tracing::warn!(id = request.id, "remote-server request dropped; outgoing queue full");
    }
}
