//! Loopback request channel into the running event loop.
//!
//! The live instance binds an ephemeral port on 127.0.0.1 and publishes it,
//! with a per-run token, in `runtime.json` next to the config file. A client
//! sends the token line and then one JSON request line, and reads one JSON
//! response line back.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::{self, ErrorCode};

const LOG_TARGET: &str = "runtime";
pub const INSTANCE_FILE_NAME: &str = "runtime.json";
const MAX_REQUEST_BYTES: u64 = 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// How long a connection waits for the event loop to answer.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceInfo {
    pub port: u16,
    pub pid: u32,
    pub token: String,
}

/// One request waiting for the event loop, with the way back to its caller.
#[derive(Debug)]
pub struct InboundRequest {
    pub payload: String,
    reply: Sender<String>,
}

impl InboundRequest {
    pub fn new(payload: impl Into<String>) -> (Self, Receiver<String>) {
        let (reply, response) = mpsc::channel();
        (
            Self {
                payload: payload.into(),
                reply,
            },
            response,
        )
    }

    pub fn respond(self, response: String) {
        if self.reply.send(response).is_err() {
            log::warn!(target: LOG_TARGET, "request caller went away before the reply");
        }
    }
}

pub fn instance_file(config_path: &Path) -> PathBuf {
    config_path.with_file_name(INSTANCE_FILE_NAME)
}

/// Accepts loopback connections and hands their requests to the event loop.
/// Dropping it removes the instance file.
#[derive(Debug)]
pub struct RequestServer {
    info: InstanceInfo,
    info_path: PathBuf,
}

impl RequestServer {
    pub fn start(info_path: &Path, sender: Sender<InboundRequest>) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let info = InstanceInfo {
            port: listener.local_addr()?.port(),
            pid: std::process::id(),
            token: uuid::Uuid::new_v4().to_string(),
        };

        if let Some(parent) = info_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec_pretty(&info)
            .map_err(|error| std::io::Error::new(ErrorKind::InvalidData, error))?;
        std::fs::write(info_path, encoded)?;

        let token = info.token.clone();
        std::thread::Builder::new()
            .name("ipc-accept".to_string())
            .spawn(move || accept_loop(listener, &token, sender))?;

        log::info!(
            target: LOG_TARGET,
            "accepting requests on 127.0.0.1:{} ({})",
            info.port,
            info_path.display()
        );
        Ok(Self {
            info,
            info_path: info_path.to_path_buf(),
        })
    }

    pub fn port(&self) -> u16 {
        self.info.port
    }

    pub fn info(&self) -> &InstanceInfo {
        &self.info
    }
}

impl Drop for RequestServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.info_path);
    }
}

fn accept_loop(listener: TcpListener, token: &str, sender: Sender<InboundRequest>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if !serve_connection(stream, token, &sender) {
                    log::info!(target: LOG_TARGET, "event loop closed; request listener stopping");
                    break;
                }
            }
            Err(error) => log::warn!(target: LOG_TARGET, "request accept failed: {error}"),
        }
    }
}

/// Returns `false` once the event loop has dropped its end of the channel.
fn serve_connection(stream: TcpStream, token: &str, sender: &Sender<InboundRequest>) -> bool {
    if let Err(error) = stream.set_read_timeout(Some(REPLY_TIMEOUT)) {
        log::warn!(target: LOG_TARGET, "request socket setup failed: {error}");
        return true;
    }
    let read_half = match stream.try_clone() {
        Ok(read_half) => read_half,
        Err(error) => {
            log::warn!(target: LOG_TARGET, "request socket setup failed: {error}");
            return true;
        }
    };
    let mut reader = BufReader::new(read_half.take(MAX_REQUEST_BYTES));

    let mut presented = String::new();
    let mut payload = String::new();
    if let Err(error) = reader
        .read_line(&mut presented)
        .and_then(|_| reader.read_line(&mut payload))
    {
        log::warn!(target: LOG_TARGET, "request read failed: {error}");
        return true;
    }

    let mut keep_serving = true;
    let response = if presented.trim() != token {
        log::warn!(target: LOG_TARGET, "rejected request with a wrong instance token");
        transport::error_json(ErrorCode::InvalidRequest, "instance token mismatch")
    } else {
        let (request, reply) = InboundRequest::new(payload.trim());
        if sender.send(request).is_err() {
            keep_serving = false;
            transport::error_json(ErrorCode::Unavailable, "running instance is shutting down")
        } else {
            match reply.recv_timeout(REPLY_TIMEOUT) {
                Ok(response) => response,
                Err(_) => transport::error_json(
                    ErrorCode::Unavailable,
                    "running instance did not answer in time",
                ),
            }
        }
    };

    let mut stream = stream;
    if let Err(error) = writeln!(stream, "{response}") {
        log::warn!(target: LOG_TARGET, "request reply failed: {error}");
    }
    keep_serving
}

/// Sends `payload` to the live instance published in `info_path`.
/// `Ok(None)` means no instance is listening and the caller should handle
/// the request itself.
pub fn forward_request(info_path: &Path, payload: &str) -> Result<Option<String>, std::io::Error> {
    let raw = match std::fs::read(info_path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };
    let info: InstanceInfo = match serde_json::from_slice(&raw) {
        Ok(info) => info,
        Err(error) => {
            log::warn!(
                target: LOG_TARGET,
                "ignoring unreadable instance file {}: {error}",
                info_path.display()
            );
            return Ok(None);
        }
    };

    let address = SocketAddr::from((Ipv4Addr::LOCALHOST, info.port));
    let mut stream = match TcpStream::connect_timeout(&address, CONNECT_TIMEOUT) {
        Ok(stream) => stream,
        Err(error) => {
            log::debug!(target: LOG_TARGET, "no live instance on port {}: {error}", info.port);
            return Ok(None);
        }
    };
    stream.set_read_timeout(Some(REPLY_TIMEOUT + Duration::from_secs(1)))?;

    // JSON never needs a raw line break outside a string.
    let single_line: String = payload
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    write!(stream, "{}\n{single_line}\n", info.token)?;
    stream.flush()?;

    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line)?;
    let line = line.trim_end().to_string();
    let is_response = serde_json::from_str::<serde_json::Value>(&line)
        .map(|value| value.get("status").is_some())
        .unwrap_or(false);
    if !is_response {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("unexpected reply from port {}", info.port),
        ));
    }
    Ok(Some(line))
}
