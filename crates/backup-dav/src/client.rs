//! Authenticated HTTP transport for WebDAV verbs.
//!
//! [`DavClient`] sends one request per call and hands back the raw
//! [`Response`]. Interpreting status codes is left to the caller, since the
//! same status means different things to different operations (a 404 on
//! DELETE is success, on GET it is "not found").
//!
//! Small requests (PROPFIND, MKCOL, DELETE, sidecars) are bounded as a whole by
//! the configured stall timeout. Archive transfers are bounded only by
//! progress: an upload fails once its body has not advanced for that long, and
//! a download stream fails once no chunk arrives for that long.

use crate::config::StoreConfig;
use crate::spool::SpoolHandle;
use crate::{Result, StoreError};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use log::{trace, warn};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Method, Response, Url};
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;

/// Properties requested when probing a candidate root.
pub(crate) const PROBE_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

/// Properties requested when listing or stating files.
pub(crate) const LIST_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
  </d:prop>
</d:propfind>"#;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// `Depth` header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    fn as_str(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
        }
    }
}

/// HTTP client bound to one set of credentials.
#[derive(Clone)]
pub struct DavClient {
    http: Client,
    username: String,
    credential: SecretString,
    stall_timeout: Duration,
}

impl DavClient {
    /// Build a client with the timeouts and TLS policy of `config`.
    ///
    /// No client-wide request timeout is set; see the module docs.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .user_agent(concat!("dav-backup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            username: config.username.clone(),
            credential: config.credential.clone(),
            stall_timeout: config.stall_timeout,
        })
    }

    fn request(&self, method: Method, url: &Url) -> reqwest::RequestBuilder {
        trace!("{} {}", method, url);
        self.http
            .request(method, url.clone())
            .basic_auth(&self.username, Some(self.credential.expose_secret()))
    }

    pub async fn propfind(&self, url: &Url, depth: Depth, body: &'static str) -> Result<Response> {
        let method = dav_method(b"PROPFIND")?;
        self.request(method, url)
            .header("Depth", depth.as_str())
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(body)
            .timeout(self.stall_timeout)
            .send()
            .await
            .map_err(StoreError::transport("PROPFIND"))
    }

    pub async fn mkcol(&self, url: &Url) -> Result<Response> {
        let method = dav_method(b"MKCOL")?;
        self.request(method, url)
            .timeout(self.stall_timeout)
            .send()
            .await
            .map_err(StoreError::transport("MKCOL"))
    }

    /// Upload a spooled file with its exact length.
    ///
    /// Fails with [`StoreError::Stalled`] when the server stops taking the body,
    /// or stops answering after it, for longer than the stall timeout.
    pub async fn put_file(&self, url: &Url, spooled: &SpoolHandle) -> Result<Response> {
        let file = spooled.open().await?;
        let watch = ProgressWatch::new();
        let progress = watch.clone();
        let chunks = ReaderStream::new(file).inspect(move |_| progress.touch());

        let send = self
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, spooled.len())
            .header(CONTENT_TYPE, "application/x-tar")
            .body(Body::wrap_stream(chunks))
            .send();

        tokio::select! {
            result = send => result.map_err(StoreError::transport("PUT")),
            idle = watch.stalled(self.stall_timeout) => {
                warn!("PUT {} made no progress for {:?}", url, idle);
                Err(StoreError::Stalled { op: "PUT", idle })
            }
        }
    }

    pub async fn put_bytes(&self, url: &Url, bytes: Vec<u8>, content_type: &str) -> Result<Response> {
        self.request(Method::PUT, url)
            .header(CONTENT_TYPE, content_type)
            .body(Bytes::from(bytes))
            .timeout(self.stall_timeout)
            .send()
            .await
            .map_err(StoreError::transport("PUT"))
    }

    /// GET a small object. The whole exchange, body included, is time-limited.
    pub async fn get(&self, url: &Url) -> Result<Response> {
        self.request(Method::GET, url)
            .timeout(self.stall_timeout)
            .send()
            .await
            .map_err(StoreError::transport("GET"))
    }

    /// GET an archive for streaming.
    ///
    /// Only the wait for the response head is time-limited. Read the body with
    /// [`DavClient::body_stream`].
    pub async fn get_stream(&self, url: &Url) -> Result<Response> {
        let send = self.request(Method::GET, url).send();
        match tokio::time::timeout(self.stall_timeout, send).await {
            Ok(result) => result.map_err(StoreError::transport("GET")),
            Err(_) => Err(StoreError::Stalled {
                op: "GET",
                idle: self.stall_timeout,
            }),
        }
    }

    /// Response body as a stream that fails once no chunk arrives within the
    /// stall timeout. The stream ends after the first error.
    pub fn body_stream(&self, response: Response) -> BoxStream<'static, Result<Bytes>> {
        guard_chunks(response.bytes_stream().boxed(), self.stall_timeout)
    }

    pub async fn delete(&self, url: &Url) -> Result<Response> {
        self.request(Method::DELETE, url)
            .timeout(self.stall_timeout)
            .send()
            .await
            .map_err(StoreError::transport("DELETE"))
    }
}

/// Time of the last observed progress of a transfer.
#[derive(Clone)]
struct ProgressWatch {
    origin: Instant,
    last_ms: Arc<AtomicU64>,
}

impl ProgressWatch {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }

    /// Resolves once no progress has been seen for `limit`.
    async fn stalled(&self, limit: Duration) -> Duration {
        loop {
            let idle = self.idle();
            if idle >= limit {
                return idle;
            }
            tokio::time::sleep(limit - idle).await;
        }
    }
}

fn guard_chunks(
    chunks: BoxStream<'static, reqwest::Result<Bytes>>,
    limit: Duration,
) -> BoxStream<'static, Result<Bytes>> {
    stream::unfold(Some(chunks), move |state| async move {
        let mut chunks = state?;
        match tokio::time::timeout(limit, chunks.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(chunks))),
            Ok(Some(Err(source))) => Some((Err(StoreError::Transport { op: "GET", source }), None)),
            Ok(None) => None,
            Err(_) => Some((Err(StoreError::Stalled { op: "GET", idle: limit }), None)),
        }
    })
    .boxed()
}

fn dav_method(name: &'static [u8]) -> Result<Method> {
    Method::from_bytes(name).map_err(|e| StoreError::Config(format!("invalid HTTP method: {}", e)))
}
