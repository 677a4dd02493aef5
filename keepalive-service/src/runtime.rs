//! Service runtime: reconciler owner task + socket server + signal handler.
//!
//! Every lifecycle signal, repeat firing, relayed event and status query is
//! queued onto one owner task, which is the only code that touches the
//! [`Reconciler`]. The runtime exits once the reconciler reports the service
//! finished, returning the stickiness of that exit.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keepalive_core::{FileStore, ServiceAction};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::engine::ProcessEngine;
use crate::error::{io_err, ServiceError};
use crate::notification::FilePresenter;
use crate::observer::ObserverRegistry;
use crate::paths::{notification_path, run_dir, socket_path};
use crate::protocol::{ServiceRequest, ServiceResponse};
use crate::reconciler::{
    Collaborators, ExternalEvent, FireSink, Reconciler, ReconcilerSettings, SessionStatus, Signal,
    Stickiness, TaskRemovedDirective,
};
use crate::resources::InProcessLocks;
use crate::restart::RelaunchArranger;

const COMMAND_QUEUE: usize = 64;
/// How long in-flight socket clients get to receive their response on shutdown.
const CLIENT_DRAIN: Duration = Duration::from_secs(2);

/// How the process was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Launch {
    /// Relaunched by the supervisor rather than by a user request.
    pub resurrected: bool,
}

enum Command {
    Signal {
        signal: Signal,
        respond_to: oneshot::Sender<Stickiness>,
    },
    RepeatFired(u64),
    External {
        event: ExternalEvent,
        payload: Option<String>,
        respond_to: oneshot::Sender<()>,
    },
    SendData {
        payload: String,
        respond_to: oneshot::Sender<bool>,
    },
    TaskRemoved {
        respond_to: oneshot::Sender<TaskRemovedDirective>,
    },
    Status {
        respond_to: oneshot::Sender<SessionStatus>,
    },
    Terminate,
}

/// Cloneable handle onto the owner task.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Command>,
}

impl ServiceHandle {
    pub async fn signal(&self, signal: Signal) -> Result<Stickiness, ServiceError> {
        self.request(|respond_to| Command::Signal { signal, respond_to })
            .await
    }

    pub async fn external_event(
        &self,
        event: ExternalEvent,
        payload: Option<String>,
    ) -> Result<(), ServiceError> {
        self.request(|respond_to| Command::External {
            event,
            payload,
            respond_to,
        })
        .await
    }

    pub async fn send_data(&self, payload: String) -> Result<bool, ServiceError> {
        self.request(|respond_to| Command::SendData { payload, respond_to })
            .await
    }

    pub async fn task_removed(&self) -> Result<TaskRemovedDirective, ServiceError> {
        self.request(|respond_to| Command::TaskRemoved { respond_to })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, ServiceError> {
        self.request(|respond_to| Command::Status { respond_to }).await
    }

    /// Unsolicited termination: tear down and exit.
    pub async fn terminate(&self) -> Result<(), ServiceError> {
        self.tx
            .send(Command::Terminate)
            .await
            .map_err(|_| ServiceError::ChannelClosed("service queue"))
    }

    /// Sink the scheduler hands its firings to. Never blocks; a full queue
    /// drops the firing.
    pub fn fire_sink(&self) -> FireSink {
        let tx = self.tx.clone();
        Arc::new(move |generation: u64| match tx.try_send(Command::RepeatFired(generation)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ServiceError::Protocol(
                "service queue full; repeat event dropped".to_string(),
            )),
            Err(TrySendError::Closed(_)) => Err(ServiceError::ChannelClosed("service queue")),
        })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| ServiceError::ChannelClosed("service queue"))?;
        rx.await
            .map_err(|_| ServiceError::ChannelClosed("service response"))
    }
}

/// Spawn the owner task around the reconciler `build` returns. The task ends
/// when the service finishes (STOP, termination, or stop-with-task removal)
/// and yields the stickiness of that exit.
pub fn spawn_service(
    build: impl FnOnce(FireSink) -> Reconciler,
) -> (ServiceHandle, JoinHandle<Stickiness>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let handle = ServiceHandle { tx };
    let reconciler = build(handle.fire_sink());
    let task = tokio::spawn(owner_task(reconciler, rx));
    (handle, task)
}

async fn owner_task(mut reconciler: Reconciler, mut rx: mpsc::Receiver<Command>) -> Stickiness {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Signal { signal, respond_to } => {
                let stickiness = reconciler.on_signal(signal).await;
                let _ = respond_to.send(stickiness);
                if reconciler.stop_requested() {
                    tracing::info!("service stopped");
                    return reconciler.on_terminated().await;
                }
            }
            Command::RepeatFired(generation) => reconciler.on_repeat_fired(generation),
            Command::External {
                event,
                payload,
                respond_to,
            } => {
                reconciler.on_external_event(event, payload);
                let _ = respond_to.send(());
            }
            Command::SendData {
                payload,
                respond_to,
            } => {
                let _ = respond_to.send(reconciler.send_data(payload));
            }
            Command::TaskRemoved { respond_to } => {
                let directive = reconciler.on_task_removed();
                let _ = respond_to.send(directive);
                if directive == TaskRemovedDirective::StopSelf {
                    return reconciler.on_terminated().await;
                }
            }
            Command::Status { respond_to } => {
                let _ = respond_to.send(reconciler.status());
            }
            Command::Terminate => {
                tracing::info!("service terminating");
                return reconciler.on_terminated().await;
            }
        }
    }
    tracing::warn!("service queue closed; terminating");
    reconciler.on_terminated().await
}

// ---------------------------------------------------------------------------
// Host runtime
// ---------------------------------------------------------------------------

/// Start the service runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, launch: Launch) -> Result<Stickiness, ServiceError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), launch))
}

/// Run the service with the host collaborators rooted at `home`.
pub async fn run(home: PathBuf, launch: Launch) -> Result<Stickiness, ServiceError> {
    ensure_runtime_dirs(&home)?;
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let config = keepalive_core::config::load_at(&home)?;
    let program = std::env::current_exe().map_err(|e| io_err("current executable", e))?;
    let collaborators = Collaborators {
        store: Arc::new(FileStore::at(&home)),
        presenter: Box::new(FilePresenter::new(notification_path(&home))),
        restarts: Box::new(RelaunchArranger::new(&home, program)),
        locks: Arc::new(InProcessLocks::new()),
        engine: Arc::new(ProcessEngine::new(config.callbacks.clone())),
        observers: ObserverRegistry::global().clone(),
    };
    let settings = ReconcilerSettings::from(&config);
    let (handle, owner) = spawn_service(|sink| Reconciler::new(collaborators, settings, sink));

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    let started_at = Utc::now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let handle = handle.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let socket = socket.clone();
        tokio::spawn(async move {
            socket_server_task(listener, socket, handle, started_at, shutdown_rx).await
        })
    };

    let signal_handle = {
        let handle = handle.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { signal_task(handle, shutdown_rx).await })
    };

    let initial = if launch.resurrected {
        Signal::resurrected()
    } else {
        Signal {
            action: None,
            external_trigger: true,
        }
    };
    match handle.signal(initial).await {
        Ok(stickiness) => tracing::info!(resurrected = launch.resurrected, %stickiness, "service started"),
        Err(err) => tracing::warn!(error = %err, "initial signal was not processed"),
    }
    drop(handle);

    let stickiness = owner
        .await
        .map_err(|err| ServiceError::Protocol(format!("owner task join failure: {err}")))?;
    let _ = shutdown_tx.send(());

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!(%stickiness, "service exited");
    Ok(stickiness)
}

async fn signal_task(
    handle: ServiceHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServiceError> {
    let mut term = unix_signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown_rx.recv() => return Ok(()),
        result = tokio::signal::ctrl_c() => {
            result.map_err(|err| ServiceError::Protocol(format!("ctrl-c handler failed: {err}")))?;
            tracing::info!("received ctrl-c");
        }
        _ = term.recv() => tracing::info!("received SIGTERM"),
    }
    if let Err(err) = handle.terminate().await {
        tracing::debug!(error = %err, "service already finishing");
    }
    Ok(())
}

async fn socket_server_task(
    listener: UnixListener,
    socket: PathBuf,
    handle: ServiceHandle,
    started_at: DateTime<Utc>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServiceError> {
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let handle = handle.clone();
                let socket = socket.clone();
                clients.spawn(async move {
                    if let Err(err) = handle_socket_client(stream, handle, socket, started_at).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    let _ = tokio::time::timeout(CLIENT_DRAIN, async {
        while clients.join_next().await.is_some() {}
    })
    .await;
    clients.abort_all();

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    handle: ServiceHandle,
    socket: PathBuf,
    started_at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("service socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ServiceRequest>(&line) {
            Ok(request) => dispatch(&handle, request, &socket, started_at).await,
            Err(err) => ServiceResponse::error(format!("invalid request JSON: {err}")),
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

async fn dispatch(
    handle: &ServiceHandle,
    request: ServiceRequest,
    socket: &Path,
    started_at: DateTime<Utc>,
) -> ServiceResponse {
    let result = match request.cmd.as_str() {
        "status" => handle
            .status()
            .await
            .map(|session| build_status_payload(session, socket, started_at)),
        "signal" => match request.action.as_deref().map(ServiceAction::parse) {
            Some(None) => {
                return ServiceResponse::error(format!(
                    "unknown action '{}'",
                    request.action.unwrap_or_default()
                ))
            }
            Some(Some(action)) => handle
                .signal(Signal::external(action))
                .await
                .map(|stickiness| json!({ "stickiness": stickiness })),
            None => handle
                .signal(Signal {
                    action: None,
                    external_trigger: true,
                })
                .await
                .map(|stickiness| json!({ "stickiness": stickiness })),
        },
        "event" => {
            let Some(event) = request.kind.as_deref().and_then(ExternalEvent::parse) else {
                return ServiceResponse::error(format!(
                    "unknown event kind '{}'",
                    request.kind.unwrap_or_default()
                ));
            };
            handle
                .external_event(event, request.data)
                .await
                .map(|()| json!({ "relayed": event }))
        }
        "send" => {
            let Some(data) = request.data else {
                return ServiceResponse::error("send requires data");
            };
            handle
                .send_data(data)
                .await
                .map(|delivered| json!({ "delivered": delivered }))
        }
        "task-removed" => handle
            .task_removed()
            .await
            .map(|directive| json!({ "directive": directive })),
        other => return ServiceResponse::error(format!("unknown command '{other}'")),
    };

    match result {
        Ok(data) => ServiceResponse::ok(data),
        Err(err) => ServiceResponse::error(err.to_string()),
    }
}

fn build_status_payload(session: SessionStatus, socket: &Path, started_at: DateTime<Utc>) -> Value {
    json!({
        "pid": std::process::id(),
        "socket": socket.display().to_string(),
        "started_at": started_at.to_rfc3339(),
        "uptime_seconds": (Utc::now() - started_at).num_seconds().max(0),
        "session": session,
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), ServiceError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(ServiceError::AlreadyRunning {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale service socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), ServiceError> {
    for dir in [run_dir(home), crate::paths::logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &ServiceResponse,
) -> Result<(), ServiceError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("service socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("service socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("service socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), ServiceError>, tokio::task::JoinError>,
) -> Result<(), ServiceError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(ServiceError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn set_socket_permissions(path: &Path) -> Result<(), ServiceError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
