//! Byte-fetching interface to the static host serving the gallery.
//!
//! The transport is opaque to the rest of the system: anything that can
//! resolve a gallery-relative path into a status, headers and a body works.
//! Remote galleries use the HTTP fetcher, local ones the directory fetcher;
//! fixtures use the in-memory fetcher.

use {
    bytes::Bytes,
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        future::Future,
        path::{Component, Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
    },
    thiserror::Error,
    url::Url,
};

/// Network-level failure. Distinct from an unsuccessful status code, which
/// travels back as a regular response.
#[derive(Debug, Clone, Error)]
#[error("fetch failed: {0}")]
pub struct FetchError(pub String);

/// A fetched (or decrypted, or cached) response.
#[derive(Debug, Clone)]
pub struct GalleryResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl GalleryResponse {
    #[must_use]
    pub fn new(status: u16, content_type: Option<&str>, body: Bytes) -> Self {
        let mut headers = Vec::new();
        if let Some(content_type) = content_type {
            headers.push(("content-type".to_owned(), content_type.to_owned()));
        }
        headers.push(("content-length".to_owned(), body.len().to_string()));
        Self {
            status,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Same response with a replaced body and corrected content-length.
    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        for (key, value) in &mut self.headers {
            if key.eq_ignore_ascii_case("content-length") {
                *value = body.len().to_string();
            }
        }
        self.body = body;
        self
    }
}

pub trait Fetcher: Send + Sync + 'static {
    /// Resolves a gallery-relative path into a response. Transport failure
    /// is an error; an unsuccessful status code is not.
    fn fetch(&self, path: &str)
    -> impl Future<Output = Result<GalleryResponse, FetchError>> + Send;
}

impl<F: Fetcher> Fetcher for Arc<F> {
    fn fetch(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<GalleryResponse, FetchError>> + Send {
        (**self).fetch(path)
    }
}

/// Fetches from a remote static host over HTTP(S).
pub struct HttpFetcher {
    client: reqwest::Client,
    base: Url,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<GalleryResponse, FetchError> {
        let url = self
            .base
            .join(path)
            .map_err(|err| FetchError(err.to_string()))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError(err.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                Some((key.as_str().to_owned(), value.to_str().ok()?.to_owned()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError(err.to_string()))?;
        Ok(GalleryResponse {
            status,
            headers,
            body,
        })
    }
}

/// Serves a gallery that lives in a local directory.
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl Fetcher for DirFetcher {
    async fn fetch(&self, path: &str) -> Result<GalleryResponse, FetchError> {
        let content_type = content_type_for(path);
        let Some(full_path) = self.resolve(path) else {
            return Ok(GalleryResponse::new(404, None, Bytes::new()));
        };
        let read = tokio::task::spawn_blocking(move || fs_err::read(full_path))
            .await
            .map_err(|err| FetchError(err.to_string()))?;
        match read {
            Ok(data) => Ok(GalleryResponse::new(200, content_type, data.into())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(GalleryResponse::new(404, None, Bytes::new()))
            }
            Err(err) => Err(FetchError(err.to_string())),
        }
    }
}

/// In-memory gallery used by fixtures and tests.
#[derive(Default)]
pub struct MemoryFetcher {
    entries: Mutex<HashMap<String, GalleryResponse>>,
    fetches: AtomicU64,
}

impl MemoryFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, response: GalleryResponse) {
        self.entries.lock().insert(path.to_owned(), response);
    }

    pub fn insert_bytes(&self, path: &str, content_type: &str, body: impl Into<Bytes>) {
        self.insert(path, GalleryResponse::new(200, Some(content_type), body.into()));
    }

    /// Total number of fetches served, including misses.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl Fetcher for MemoryFetcher {
    async fn fetch(&self, path: &str) -> Result<GalleryResponse, FetchError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        match self.entries.lock().get(path) {
            Some(response) => Ok(response.clone()),
            None => Ok(GalleryResponse::new(404, None, Bytes::new())),
        }
    }
}

/// Content type by file extension, for responses assembled locally.
#[must_use]
pub fn content_type_for(path: &str) -> Option<&'static str> {
    let extension = Path::new(path).extension()?.to_str()?;
    let content_type = match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(content_type)
}
