//! Child-process execution contexts.
//!
//! Each callback handle maps to an entry point in `config.yaml`. The child
//! reads one JSON frame per line on stdin and answers requests on stdout:
//!
//! ```text
//! → {"id":1,"method":"onStart","data":null}
//! ← {"id":1,"ok":true}
//! → {"method":"onRepeatEvent","data":null}
//! ← {"id":2,"error":{"code":"E_IO","message":"disk full"}}
//! ← {"id":3,"not_implemented":true}
//! ```
//!
//! Lines on stdout that are not reply frames are forwarded to the log.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use keepalive_core::{CallbackHandle, EntryPoint};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::{Engine, EngineContext, MethodReply, ReplyReceiver};
use crate::error::{io_err, ServiceError};

/// Environment variable carrying the callback handle into the child.
pub const CALLBACK_HANDLE_ENV: &str = "KEEPALIVE_CALLBACK_HANDLE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: u64,
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
    #[serde(default)]
    pub not_implemented: bool,
}

impl ReplyFrame {
    /// An error outranks `not_implemented`, which outranks `ok`. A frame with
    /// none of them set is treated as success.
    pub fn into_reply(self) -> MethodReply {
        if let Some(error) = self.error {
            MethodReply::Error {
                code: error.code,
                message: error.message,
            }
        } else if self.not_implemented {
            MethodReply::NotImplemented
        } else {
            MethodReply::Success
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<MethodReply>>>>;

/// Spawns one child process per execution context.
#[derive(Debug, Clone, Default)]
pub struct ProcessEngine {
    entry_points: BTreeMap<CallbackHandle, EntryPoint>,
}

impl ProcessEngine {
    pub fn new(entry_points: BTreeMap<CallbackHandle, EntryPoint>) -> Self {
        Self { entry_points }
    }
}

impl Engine for ProcessEngine {
    fn create(&self, handle: CallbackHandle) -> Result<Box<dyn EngineContext>, ServiceError> {
        let entry = self.entry_points.get(&handle).ok_or_else(|| {
            ServiceError::Bridge(format!("no entry point registered for callback handle {handle}"))
        })?;

        let mut child = Command::new(&entry.command)
            .args(&entry.args)
            .env(CALLBACK_HANDLE_ENV, handle.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| io_err(&entry.command, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or(ServiceError::ChannelClosed("child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ServiceError::ChannelClosed("child stdout"))?;

        let pending: Pending = Arc::default();
        let attached = Arc::new(AtomicBool::new(true));
        let open = Arc::new(AtomicBool::new(true));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(writer_task(stdin, outbound_rx));
        let reader = tokio::spawn(reader_task(
            handle,
            stdout,
            pending.clone(),
            attached.clone(),
            open.clone(),
        ));

        tracing::info!(%handle, command = %entry.command.display(), pid = ?child.id(), "execution context spawned");
        Ok(Box::new(ProcessContext {
            handle,
            child,
            outbound,
            pending,
            attached,
            open,
            next_id: 1,
            writer,
            reader,
        }))
    }
}

struct ProcessContext {
    handle: CallbackHandle,
    child: Child,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    pending: Pending,
    attached: Arc<AtomicBool>,
    /// Cleared by the reader once the child's stdout is gone.
    open: Arc<AtomicBool>,
    next_id: u64,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl EngineContext for ProcessContext {
    fn invoke(&mut self, method: &str, data: Option<String>) -> Result<ReplyReceiver, ServiceError> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let frame = OutboundFrame {
            id: Some(id),
            method: method.to_string(),
            data,
        };
        // The reader may have drained `pending` before the insert above.
        if !self.open.load(Ordering::SeqCst) || self.outbound.send(frame).is_err() {
            lock(&self.pending).remove(&id);
            return Err(ServiceError::ChannelClosed("execution context"));
        }
        Ok(rx)
    }

    fn notify(&mut self, method: &str, data: Option<String>) -> Result<(), ServiceError> {
        self.outbound
            .send(OutboundFrame {
                id: None,
                method: method.to_string(),
                data,
            })
            .map_err(|_| ServiceError::ChannelClosed("execution context"))
    }

    fn detach(&mut self) {
        self.attached.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();
    }

    fn dispose(mut self: Box<Self>) {
        self.writer.abort();
        self.reader.abort();
        if let Err(err) = self.child.start_kill() {
            tracing::debug!(handle = %self.handle, error = %err, "child already gone");
        }
        tracing::info!(handle = %self.handle, "execution context disposed");
    }
}

async fn writer_task(mut stdin: ChildStdin, mut outbound: mpsc::UnboundedReceiver<OutboundFrame>) {
    while let Some(frame) = outbound.recv().await {
        let mut line = match serde_json::to_vec(&frame) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(method = %frame.method, error = %err, "failed to encode frame");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(err) = async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await
        {
            tracing::warn!(error = %err, "execution context stdin closed");
            break;
        }
    }
}

async fn reader_task(
    handle: CallbackHandle,
    stdout: ChildStdout,
    pending: Pending,
    attached: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%handle, error = %err, "execution context stdout failed");
                break;
            }
        };
        if !attached.load(Ordering::SeqCst) {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ReplyFrame>(trimmed) {
            Ok(frame) => {
                let id = frame.id;
                match lock(&pending).remove(&id) {
                    Some(respond_to) => {
                        let _ = respond_to.send(frame.into_reply());
                    }
                    None => tracing::debug!(%handle, id, "reply for unknown request"),
                }
            }
            Err(_) => tracing::info!(%handle, output = trimmed, "application output"),
        }
    }
    // Dropping the senders resolves every outstanding request as closed.
    open.store(false, Ordering::SeqCst);
    lock(&pending).clear();
    tracing::info!(%handle, "execution context channel closed");
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<MethodReply>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}
