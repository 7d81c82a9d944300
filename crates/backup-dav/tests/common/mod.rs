//! In-process WebDAV server for integration tests.
//!
//! A `dav-server` in-memory filesystem is mounted below one DAV root prefix
//! and served over HTTP/1. The wrapping service records every request,
//! enforces Basic auth, answers 404 outside the mounted prefix and can be told
//! to fail selected requests or to read their bodies slowly.

#![allow(dead_code)]

use backup_dav::StoreConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use dav_server::{fakels::FakeLs, memfs::MemFs, DavHandler};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "correct horse";

/// DAV root of the per-user layout for [`USERNAME`].
pub const USER_ROOT: &str = "/remote.php/dav/files/alice";
/// DAV root of the legacy layout.
pub const LEGACY_ROOT: &str = "/remote.php/webdav";
/// Default backup folder below the DAV root.
pub const FOLDER: &str = "/HomeAssistant/Backups";

type TestBody = UnsyncBoxBody<Bytes, io::Error>;

/// One request as seen by the server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub depth: Option<String>,
    pub content_length: Option<u64>,
    pub chunked: bool,
}

struct Fault {
    method: Method,
    path_suffix: String,
    status: StatusCode,
}

struct Throttle {
    method: Method,
    path_suffix: String,
    bytes_per_sec: u64,
}

struct State {
    handler: DavHandler,
    prefix: String,
    expected_auth: String,
    requests: Mutex<Vec<Recorded>>,
    faults: Mutex<Vec<Fault>>,
    throttles: Mutex<Vec<Throttle>>,
}

impl State {
    fn fault_for(&self, method: &Method, path: &str) -> Option<StatusCode> {
        self.faults
            .lock()
            .unwrap()
            .iter()
            .find(|f| &f.method == method && path.ends_with(&f.path_suffix))
            .map(|f| f.status)
    }

    fn throttle_for(&self, method: &Method, path: &str) -> Option<u64> {
        self.throttles
            .lock()
            .unwrap()
            .iter()
            .find(|t| &t.method == method && path.ends_with(&t.path_suffix))
            .map(|t| t.bytes_per_sec)
    }
}

/// Running test server. Shut down on drop.
pub struct TestDav {
    addr: SocketAddr,
    state: Arc<State>,
    http: reqwest::Client,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestDav {
    /// Serve an empty filesystem below `prefix` (e.g. [`USER_ROOT`]).
    pub async fn start(prefix: &str) -> Self {
        let handler = DavHandler::builder()
            .filesystem(MemFs::new())
            .locksystem(FakeLs::new())
            .strip_prefix(prefix)
            .build_handler();

        let state = Arc::new(State {
            handler,
            prefix: prefix.to_string(),
            expected_auth: format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", USERNAME, PASSWORD))
            ),
            requests: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            throttles: Mutex::new(Vec::new()),
        });

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        let state = server_state.clone();
                        tokio::spawn(async move {
                            let _ = http1::Builder::new()
                                .serve_connection(
                                    TokioIo::new(stream),
                                    service_fn(move |req| handle(state.clone(), req)),
                                )
                                .await;
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            addr,
            state,
            http: reqwest::Client::new(),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Store configuration pointing at this server, spooling into `spool_dir`.
    pub fn config(&self, spool_dir: &Path) -> StoreConfig {
        StoreConfig::new(self.base_url(), USERNAME, PASSWORD).with_spool_dir(spool_dir)
    }

    /// Server path of a file in the default backup folder.
    pub fn object_path(&self, file_name: &str) -> String {
        format!("{}{}/{}", self.state.prefix, FOLDER, file_name)
    }

    /// Answer every `method` request whose path ends with `path_suffix` with `status`.
    pub fn fail(&self, method: Method, path_suffix: &str, status: StatusCode) {
        self.state.faults.lock().unwrap().push(Fault {
            method,
            path_suffix: path_suffix.to_string(),
            status,
        });
    }

    /// Read the body of every matching request at about `bytes_per_sec`.
    ///
    /// The request is only handed to the filesystem once its whole body has
    /// arrived, so an abandoned upload leaves no file behind.
    pub fn throttle(&self, method: Method, path_suffix: &str, bytes_per_sec: u64) {
        self.state.throttles.lock().unwrap().push(Throttle {
            method,
            path_suffix: path_suffix.to_string(),
            bytes_per_sec,
        });
    }

    pub fn clear_faults(&self) {
        self.state.faults.lock().unwrap().clear();
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.state.requests.lock().unwrap().clear();
    }

    /// Requests with `method` whose path ends with `suffix`.
    pub fn count(&self, method: &str, suffix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.ends_with(suffix))
            .count()
    }

    /// PUT a file directly, bypassing the store.
    pub async fn put_raw(&self, path: &str, body: impl Into<reqwest::Body>) -> StatusCode {
        let status = self
            .http
            .put(format!("{}{}", self.base_url(), path))
            .basic_auth(USERNAME, Some(PASSWORD))
            .body(body)
            .send()
            .await
            .unwrap()
            .status();
        StatusCode::from_u16(status.as_u16()).unwrap()
    }

    /// Create a collection directly, bypassing the store.
    pub async fn mkcol_raw(&self, path: &str) -> StatusCode {
        let status = self
            .http
            .request(
                reqwest::Method::from_bytes(b"MKCOL").unwrap(),
                format!("{}{}", self.base_url(), path),
            )
            .basic_auth(USERNAME, Some(PASSWORD))
            .send()
            .await
            .unwrap()
            .status();
        StatusCode::from_u16(status.as_u16()).unwrap()
    }

    /// GET a file directly. `None` if it does not exist.
    pub async fn get_raw(&self, path: &str) -> Option<Bytes> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url(), path))
            .basic_auth(USERNAME, Some(PASSWORD))
            .send()
            .await
            .unwrap();
        if response.status().as_u16() == 404 {
            return None;
        }
        assert!(response.status().is_success(), "GET {} failed", path);
        Some(response.bytes().await.unwrap())
    }
}

impl Drop for TestDav {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(state: Arc<State>, req: Request<Incoming>) -> Result<Response<TestBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let headers = req.headers();

    state.requests.lock().unwrap().push(Recorded {
        method: method.to_string(),
        path: path.clone(),
        depth: headers
            .get("depth")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        content_length: headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
        chunked: headers
            .get(TRANSFER_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.contains("chunked")),
    });

    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == state.expected_auth);

    let short_circuit = if !authorized {
        Some(StatusCode::UNAUTHORIZED)
    } else if let Some(status) = state.fault_for(&method, &path) {
        Some(status)
    } else if !path.starts_with(&state.prefix) {
        Some(StatusCode::NOT_FOUND)
    } else {
        None
    };

    if let Some(status) = short_circuit {
        // Drain the body so the client sees the status, not a reset.
        let _ = req.into_body().collect().await;
        return Ok(empty(status));
    }

    if let Some(bytes_per_sec) = state.throttle_for(&method, &path) {
        let (parts, body) = req.into_parts();
        let Some(data) = read_slowly(body, bytes_per_sec).await else {
            return Ok(empty(StatusCode::BAD_REQUEST));
        };
        let response = state
            .handler
            .handle(Request::from_parts(parts, Full::new(data)))
            .await;
        return Ok(response.map(|body| body.boxed_unsync()));
    }

    let response = state.handler.handle(req).await;
    Ok(response.map(|body| body.boxed_unsync()))
}

/// Collect a body, pausing after each frame as if the link ran at `bytes_per_sec`.
/// `None` if the client went away.
async fn read_slowly(mut body: Incoming, bytes_per_sec: u64) -> Option<Bytes> {
    let mut data = Vec::new();
    let mut owed = Duration::ZERO;
    while let Some(frame) = body.frame().await {
        let frame = frame.ok()?;
        if let Ok(chunk) = frame.into_data() {
            owed += Duration::from_secs_f64(chunk.len() as f64 / bytes_per_sec as f64);
            data.extend_from_slice(&chunk);
            if owed >= Duration::from_millis(10) {
                tokio::time::sleep(owed).await;
                owed = Duration::ZERO;
            }
        }
    }
    Some(Bytes::from(data))
}

fn empty(status: StatusCode) -> Response<TestBody> {
    let body = Full::new(Bytes::new())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}
