//! # Downloader Module
//!
//! Scheme-dispatched fetchers for repository manifests and plugin
//! artifacts.
//!
//! ## Overview
//!
//! A downloader turns a source URL into a byte stream. The set is
//! extensible: adding a scheme means implementing [`Downloader`] and
//! registering it with [`DownloaderSet`]; the installer and catalog
//! refresher dispatch on the URL scheme without knowing the transports.
//!
//! Two downloaders ship by default:
//!
//! - **`http(s)`**: opens a GET and streams the body. Any non-200
//!   response fails with an error carrying the status code and up to 512
//!   bytes of the response body.
//! - **`file`**: resolves the URL path to a local filesystem path
//!   (stripping the spurious leading separator before a Windows drive
//!   letter) and streams the file.
//!
//! Streams end when dropped; callers that abort mid-download simply drop
//! the stream.

use crate::gateway_error::GatewayError;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Maximum number of response-body bytes echoed into a download error.
const ERROR_BODY_LIMIT: usize = 512;

/// A stream of downloaded chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, GatewayError>> + Send>>;

/// One transport capable of fetching URLs of a single scheme.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// The URL scheme this downloader serves (`http`, `file`, ...).
    fn scheme(&self) -> &'static str;

    /// Open the URL and return its contents as a byte stream.
    async fn fetch(&self, url: &str) -> Result<ByteStream, GatewayError>;
}

/// HTTP and HTTPS downloader backed by a shared `reqwest` client.
pub struct HttpDownloader {
    http: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    fn scheme(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<ByteStream, GatewayError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Internal {
                message: format!("download request failed for {url}: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            let excerpt = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_LIMIT)])
                .into_owned();
            return Err(GatewayError::Internal {
                message: format!("download of {url} failed with status {status}: {excerpt}"),
            });
        }

        let stream = resp
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(move |e| GatewayError::Internal {
                message: format!("download stream error: {e}"),
            });
        Ok(Box::pin(stream))
    }
}

/// Downloader for `file://` URLs, used by local repositories and tests.
pub struct FileDownloader;

impl FileDownloader {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a `file://` URL to a local path.
    ///
    /// A path of the shape `/C:/...` keeps the Windows drive letter and
    /// drops the spurious leading separator.
    fn resolve_path(url: &str) -> Result<PathBuf, GatewayError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| GatewayError::Validation {
            message: format!("invalid file url {url}: {e}"),
        })?;

        let mut path = parsed.path().to_string();
        let bytes = path.as_bytes();
        if bytes.len() >= 3
            && bytes[0] == b'/'
            && bytes[1].is_ascii_alphabetic()
            && bytes[2] == b':'
        {
            path.remove(0);
        }

        Ok(PathBuf::from(path))
    }
}

impl Default for FileDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Downloader for FileDownloader {
    fn scheme(&self) -> &'static str {
        "file"
    }

    async fn fetch(&self, url: &str) -> Result<ByteStream, GatewayError> {
        let path = Self::resolve_path(url)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| GatewayError::NotFound {
                message: format!("cannot open {}: {e}", path.display()),
            })?;

        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buf = vec![0u8; 64 * 1024];
            let n = file.read(&mut buf).await.map_err(|e| GatewayError::Internal {
                message: format!("file read error: {e}"),
            })?;
            if n == 0 {
                Ok(None)
            } else {
                buf.truncate(n);
                Ok(Some((buf, file)))
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Registry of downloaders keyed by scheme.
pub struct DownloaderSet {
    downloaders: HashMap<&'static str, Arc<dyn Downloader>>,
}

impl DownloaderSet {
    /// An empty set. Most callers want [`DownloaderSet::with_defaults`].
    pub fn new() -> Self {
        Self {
            downloaders: HashMap::new(),
        }
    }

    /// The standard set: `http`/`https` and `file`.
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        let http: Arc<dyn Downloader> = Arc::new(HttpDownloader::new());
        set.downloaders.insert("http", http.clone());
        set.downloaders.insert("https", http);
        set.register(Arc::new(FileDownloader::new()));
        set
    }

    /// Register a downloader under its scheme, replacing any previous one.
    pub fn register(&mut self, downloader: Arc<dyn Downloader>) {
        self.downloaders.insert(downloader.scheme(), downloader);
    }

    /// Fetch a URL through the downloader matching its scheme.
    pub async fn fetch(&self, url: &str) -> Result<ByteStream, GatewayError> {
        let scheme = url.split("://").next().filter(|s| !s.is_empty() && *s != url);
        let scheme = scheme.ok_or_else(|| GatewayError::Validation {
            message: format!("url carries no scheme: {url}"),
        })?;

        let downloader = self
            .downloaders
            .get(scheme)
            .ok_or_else(|| GatewayError::Validation {
                message: format!("no downloader registered for scheme {scheme}"),
            })?;
        downloader.fetch(url).await
    }

    /// Fetch a URL and collect the whole body into memory.
    ///
    /// Used for manifests, which are small; artifact downloads stream.
    pub async fn fetch_all(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        let mut stream = self.fetch(url).await?;
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }
}

impl Default for DownloaderSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}
