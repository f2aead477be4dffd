/*!
 * Network delegate workers
 *
 * Protocol: one JSON object per line over TCP. ESSIDs, passwords and PMKs
 * travel hex-encoded.
 *
 * ```text
 * -> {"op":"ping"}
 * <- {"status":"pong","name":"CPU (8 threads)"}
 * -> {"op":"compute","essid":"6c696e6b737973","passwords":["6469..."]}
 * <- {"status":"pmks","pmks":["f42c..."]}
 * <- {"status":"error","message":"..."}
 * ```
 *
 * The client keeps one connection open and reconnects after any failure.
 * The server side wraps any local backend.
 */

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Backend, BackendKind};
use crate::dispatch::StopToken;
use crate::error::BackendError;
use crate::model::{Essid, Password, Pmk};

/// Default port of a delegate worker.
pub const DEFAULT_PORT: u16 = 19935;

/// Upper bound on one request line accepted by the server.
const MAX_REQUEST_BYTES: u64 = 64 * 1024 * 1024;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Compute {
        essid: String,
        passwords: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Pong { name: String },
    Pmks { pmks: Vec<String> },
    Error { message: String },
}

type Connection = (BufReader<TcpStream>, TcpStream);

/// Client side of a delegate worker.
pub struct RemoteBackend {
    addr: SocketAddr,
    name: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl RemoteBackend {
    pub fn new(addr: SocketAddr, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            addr,
            name: format!("Network ({})", addr),
            connect_timeout,
            io_timeout,
            conn: Mutex::new(None),
        }
    }

    fn connect(&self) -> io::Result<Connection> {
        let stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        debug!(addr = %self.addr, "connected to delegate");
        Ok((reader, stream))
    }

    /// Send one request and wait for its response. The connection is
    /// dropped on any failure so the next call starts clean.
    fn roundtrip(&self, request: &Request) -> Result<Response, BackendError> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }

        let result = match guard.as_mut() {
            Some((reader, writer)) => exchange(reader, writer, request),
            None => Err(BackendError::Unavailable(format!("{} not connected", self.addr))),
        };
        if result.is_err() {
            *guard = None;
        }
        result
    }

    /// Ask the delegate for its name.
    pub fn ping(&self) -> Result<String, BackendError> {
        match self.roundtrip(&Request::Ping)? {
            Response::Pong { name } => Ok(name),
            Response::Error { message } => Err(BackendError::Remote(message)),
            other => Err(BackendError::Protocol(format!("unexpected response {:?}", other))),
        }
    }
}

fn exchange(
    reader: &mut BufReader<TcpStream>,
    writer: &mut TcpStream,
    request: &Request,
) -> Result<Response, BackendError> {
    let mut line = serde_json::to_vec(request).map_err(|e| BackendError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;

    let mut buf = String::new();
    if reader.read_line(&mut buf)? == 0 {
        return Err(BackendError::Remote("connection closed by delegate".into()));
    }
    serde_json::from_str(&buf).map_err(|e| BackendError::Protocol(e.to_string()))
}

fn decode_pmk(s: &str) -> Result<Pmk, BackendError> {
    let mut pmk = [0u8; 32];
    hex::decode_to_slice(s, &mut pmk).map_err(|e| BackendError::Protocol(format!("bad PMK: {}", e)))?;
    Ok(pmk)
}

impl Backend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn submit(&self, essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError> {
        let request = Request::Compute {
            essid: essid.to_hex(),
            passwords: passwords.iter().map(|pw| hex::encode(pw.as_bytes())).collect(),
        };
        match self.roundtrip(&request)? {
            Response::Pmks { pmks } => {
                if pmks.len() != passwords.len() {
                    return Err(BackendError::LengthMismatch {
                        expected: passwords.len(),
                        got: pmks.len(),
                    });
                }
                pmks.iter().map(|s| decode_pmk(s)).collect()
            }
            Response::Error { message } => Err(BackendError::Remote(message)),
            other => Err(BackendError::Protocol(format!("unexpected response {:?}", other))),
        }
    }
}

/// Serve `backend` to delegate clients until `stop` is raised.
///
/// Each client gets its own thread; requests on one connection are handled
/// in order.
pub fn serve_delegate(
    listener: TcpListener,
    backend: Arc<dyn Backend>,
    stop: &StopToken,
) -> io::Result<()> {
    listener.set_nonblocking(true)?;
    info!(addr = %listener.local_addr()?, backend = backend.name(), "delegate server listening");

    while !stop.is_stopped() {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "delegate client connected");
                let backend = Arc::clone(&backend);
                std::thread::Builder::new()
                    .name(format!("pmkforge-delegate-{}", peer))
                    .spawn(move || {
                        if let Err(e) = handle_client(stream, backend.as_ref()) {
                            warn!(%peer, error = %e, "delegate client failed");
                        }
                    })?;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => return Err(e),
        }
    }
    info!("delegate server stopped");
    Ok(())
}

fn handle_client(stream: TcpStream, backend: &dyn Backend) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let n = (&mut reader).take(MAX_REQUEST_BYTES).read_line(&mut line)?;
        if n == 0 {
            return Ok(());
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => answer(backend, request),
            Err(e) => Response::Error {
                message: format!("malformed request: {}", e),
            },
        };
        let mut out = serde_json::to_vec(&response).map_err(io::Error::other)?;
        out.push(b'\n');
        writer.write_all(&out)?;
        writer.flush()?;
    }
}

fn answer(backend: &dyn Backend, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong {
            name: backend.name().to_string(),
        },
        Request::Compute { essid, passwords } => {
            let essid = match Essid::from_hex(&essid) {
                Ok(essid) => essid,
                Err(e) => return Response::Error { message: e.to_string() },
            };
            let passwords: Result<Vec<Password>, String> = passwords
                .iter()
                .map(|p| {
                    let bytes = hex::decode(p).map_err(|e| e.to_string())?;
                    Password::new(bytes).map_err(|e| e.to_string())
                })
                .collect();
            let passwords = match passwords {
                Ok(passwords) => passwords,
                Err(message) => return Response::Error { message },
            };
            match backend.submit(&essid, &passwords) {
                Ok(pmks) => Response::Pmks {
                    pmks: pmks.iter().map(hex::encode).collect(),
                },
                Err(e) => Response::Error { message: e.to_string() },
            }
        }
    }
}
