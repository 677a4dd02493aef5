//! Client side of the service socket: one newline-delimited JSON request,
//! one response per connection.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use keepalive_core::ServiceAction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, ServiceError};
use crate::paths::socket_path;

/// Upper bound on a single exchange. A signal may wait on two bridge
/// requests (destroy, then start) before it answers.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub cmd: String,
    /// `signal`: the action just persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// `event`: `pressed`, `dismissed` or `button`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// `event` payload or `send` data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ServiceRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }

    pub fn signal(action: ServiceAction) -> Self {
        Self {
            action: Some(action.as_str().to_string()),
            ..Self::new("signal")
        }
    }

    pub fn event(kind: &str, data: Option<String>) -> Self {
        Self {
            kind: Some(kind.to_string()),
            data,
            ..Self::new("event")
        }
    }

    pub fn send(data: String) -> Self {
        Self {
            data: Some(data),
            ..Self::new("send")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful response; a refusal becomes a protocol error.
    pub fn into_data(self) -> Result<Value, ServiceError> {
        match (self.ok, self.error) {
            (true, _) => Ok(self.data.unwrap_or(Value::Null)),
            (false, Some(message)) => Err(ServiceError::Protocol(message)),
            (false, None) => Err(ServiceError::Protocol("service refused the request".to_string())),
        }
    }
}

/// Exchange one request for one response over the service socket.
pub fn send_request(home: &Path, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError> {
    let socket = socket_path(home);
    let not_running = || ServiceError::ServiceNotRunning {
        socket: socket.clone(),
    };

    let mut stream = UnixStream::connect(&socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
            not_running()
        }
        _ => io_err(&socket, err),
    })?;
    stream
        .set_read_timeout(Some(RESPONSE_TIMEOUT))
        .map_err(|e| io_err(&socket, e))?;

    let mut frame = serde_json::to_vec(request)?;
    frame.push(b'\n');
    stream.write_all(&frame).map_err(|e| io_err(&socket, e))?;

    let line = match BufReader::new(stream).lines().next() {
        Some(Ok(line)) => line,
        Some(Err(err)) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            return Err(ServiceError::Protocol(format!(
                "no response to '{}' within {}s",
                request.cmd,
                RESPONSE_TIMEOUT.as_secs()
            )));
        }
        Some(Err(err)) => return Err(io_err(&socket, err)),
        None => {
            return Err(ServiceError::Protocol(format!(
                "service closed the connection before answering '{}'",
                request.cmd
            )));
        }
    };
    Ok(serde_json::from_str(&line)?)
}

fn call(home: &Path, request: ServiceRequest) -> Result<Value, ServiceError> {
    send_request(home, &request)?.into_data()
}

/// Query the live session. Retries briefly so a service that is still
/// binding its socket is not reported as down.
pub fn request_status(home: &Path) -> Result<Value, ServiceError> {
    let mut attempt = 1;
    loop {
        match call(home, ServiceRequest::new("status")) {
            Err(ServiceError::ServiceNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                attempt += 1;
                sleep(STATUS_RETRY_DELAY);
            }
            result => return result,
        }
    }
}

/// Tell a running service that `action` was persisted.
pub fn request_signal(home: &Path, action: ServiceAction) -> Result<Value, ServiceError> {
    call(home, ServiceRequest::signal(action))
}

pub fn request_event(home: &Path, kind: &str, data: Option<String>) -> Result<Value, ServiceError> {
    call(home, ServiceRequest::event(kind, data))
}

pub fn request_send(home: &Path, data: String) -> Result<Value, ServiceError> {
    call(home, ServiceRequest::send(data))
}

pub fn request_task_removed(home: &Path) -> Result<Value, ServiceError> {
    call(home, ServiceRequest::new("task-removed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn requests_omit_absent_fields() {
        let request = ServiceRequest::signal(ServiceAction::Update);
        assert_eq!(
            serde_json::to_string(&request).expect("encode"),
            r#"{"cmd":"signal","action":"update"}"#
        );
        let decoded: ServiceRequest = serde_json::from_str(r#"{"cmd":"status"}"#).expect("decode");
        assert!(decoded.action.is_none() && decoded.kind.is_none() && decoded.data.is_none());
    }

    #[test]
    fn error_responses_become_protocol_errors() {
        let err = ServiceResponse::error("unknown command 'x'").into_data().unwrap_err();
        assert!(matches!(err, ServiceError::Protocol(ref m) if m.contains("unknown command")));

        let bare = ServiceResponse {
            ok: false,
            data: None,
            error: None,
        };
        assert!(matches!(bare.into_data(), Err(ServiceError::Protocol(_))));
        assert_eq!(ServiceResponse::ok(Value::Null).into_data().expect("ok"), Value::Null);
    }

    #[test]
    fn stale_socket_file_means_not_running() {
        let home = TempDir::new().expect("tempdir");
        let socket = socket_path(home.path());
        std::fs::create_dir_all(socket.parent().expect("run dir")).expect("run dir");
        drop(std::os::unix::net::UnixListener::bind(&socket).expect("bind"));

        let err = request_status(home.path()).unwrap_err();
        assert!(matches!(err, ServiceError::ServiceNotRunning { .. }), "got: {err}");
    }

    #[test]
    fn a_silent_peer_is_reported_by_command() {
        let home = TempDir::new().expect("tempdir");
        let socket = socket_path(home.path());
        std::fs::create_dir_all(socket.parent().expect("run dir")).expect("run dir");
        let listener = std::os::unix::net::UnixListener::bind(&socket).expect("bind");
        let peer = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).expect("read");
            line
        });

        let err = send_request(home.path(), &ServiceRequest::send("hi".into())).unwrap_err();
        assert!(
            matches!(err, ServiceError::Protocol(ref m) if m.contains("'send'")),
            "got: {err}"
        );
        assert_eq!(peer.join().expect("peer"), "{\"cmd\":\"send\",\"data\":\"hi\"}\n");
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = TempDir::new().expect("tempdir");
        let err = send_request(home.path(), &ServiceRequest::new("status")).unwrap_err();
        assert!(matches!(err, ServiceError::ServiceNotRunning { .. }), "got: {err}");
    }
}
