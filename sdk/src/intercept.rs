//! Transparent rewrite of image loads into decrypt-then-serve responses.
//!
//! Sits between "a resource was requested" and "bytes were returned":
//! consults the decrypted-response cache, falls back to the network,
//! recognizes encrypted payloads by the envelope marker, asks the host to
//! decrypt, and caches the result. Failing closed means an image request
//! that cannot be decrypted gets a fixed placeholder with a successful
//! status — ciphertext is never served as an image, and a failed image
//! never re-triggers its own error handling.

use {
    crate::{
        cache::ResponseCache,
        fetch::{FetchError, Fetcher, GalleryResponse, content_type_for},
        host::HostApi,
        page::RemotePage,
        store::ConfigStore,
    },
    bytes::Bytes,
    std::{sync::Arc, time::Duration},
    tokio::time::timeout,
    tracing::{debug, info, warn},
    veiled_protocol::{GalleryId, envelope},
};

/// How long the late-initialization path waits for a page context to hand
/// over its persisted config before falling back to the placeholder.
const CONFIG_LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);

/// Inline fallback image served whenever decryption cannot proceed.
pub const PLACEHOLDER_SVG: &str = r#"<svg width="200" height="200" xmlns="http://www.w3.org/2000/svg">
 <rect fill="#ffffff" width="200" height="200"/>
 <g fill="#7f7f7f" font-family="Helvetica, Arial, sans-serif" font-size="36">
  <text x="23" y="62">Could not</text>
  <text x="66" y="113">load</text>
  <text x="51" y="163">image</text>
 </g>
</svg>"#;

/// Placeholder with a successful status, so image elements don't loop on
/// their own error handling.
#[must_use]
pub fn placeholder_response() -> GalleryResponse {
    GalleryResponse::new(
        200,
        Some("image/svg+xml"),
        Bytes::from_static(PLACEHOLDER_SVG.as_bytes()),
    )
}

/// What the requester said it is loading. Unknown destinations are still
/// intercepted when the response declares an image content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Image,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub path: String,
    pub destination: Destination,
}

impl ResourceRequest {
    /// Destination inferred from the path extension, the way a proxy that
    /// sees only the URL has to.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let destination = match content_type_for(&path) {
            Some(content_type) if content_type.starts_with("image/") => Destination::Image,
            _ => Destination::Unknown,
        };
        Self { path, destination }
    }
}

pub struct Interceptor<F, H> {
    cache: Arc<dyn ResponseCache>,
    fetcher: Arc<F>,
    host: H,
    /// Live page context to ask for a persisted config when the host is not
    /// ready yet. Optional: without one, late initialization is skipped.
    page: Option<RemotePage>,
    store: Arc<dyn ConfigStore>,
    gallery_id: GalleryId,
}

impl<F: Fetcher, H: HostApi> Interceptor<F, H> {
    pub fn new(
        cache: Arc<dyn ResponseCache>,
        fetcher: Arc<F>,
        host: H,
        page: Option<RemotePage>,
        store: Arc<dyn ConfigStore>,
        gallery_id: GalleryId,
    ) -> Self {
        Self {
            cache,
            fetcher,
            host,
            page,
            store,
            gallery_id,
        }
    }

    /// Serves one intercepted request: cache, then network, then — for
    /// encrypted image payloads — decrypt-and-cache, falling back to the
    /// placeholder rather than ever exposing ciphertext.
    pub async fn intercept(
        &self,
        request: &ResourceRequest,
    ) -> Result<GalleryResponse, FetchError> {
        if let Some(cached) = self.cache.get(&request.path) {
            debug!(path = %request.path, "cache hit");
            return Ok(cached);
        }

        let response = self.fetcher.fetch(&request.path).await?;
        if !response.is_success() {
            return Ok(response);
        }
        if !is_image(request, &response) {
            return Ok(response);
        }
        if !envelope::has_marker(&response.body).unwrap_or(false) {
            // Never encrypted; plain assets are mixed into the gallery.
            return Ok(response);
        }

        if !self.host_ready().await {
            self.late_init().await;
            if !self.host_ready().await {
                debug!(path = %request.path, "host not ready, serving placeholder");
                return Ok(placeholder_response());
            }
        }

        match self.host.decrypt_blob(response.body.clone()).await {
            Ok(plaintext) => {
                let decrypted = response.with_body(plaintext);
                self.cache.put(&request.path, decrypted.clone());
                Ok(decrypted)
            }
            Err(err) => {
                warn!(path = %request.path, %err, "decryption failed, serving placeholder");
                if err.is_auth_failure() {
                    self.purge_config();
                }
                Ok(placeholder_response())
            }
        }
    }

    /// Retry entrypoint for image elements that failed to load: refetches
    /// and decrypts inline, returning bytes for the element to display.
    /// Unsuccessful statuses are a fetch failure here — the element already
    /// failed once and there is no original response worth preserving.
    pub async fn retry_fetch(&self, path: &str) -> Result<GalleryResponse, FetchError> {
        let response = self.fetcher.fetch(path).await?;
        if !response.is_success() {
            return Err(FetchError(format!("status {}", response.status)));
        }
        if !envelope::has_marker(&response.body).unwrap_or(false) {
            return Ok(response);
        }

        if !self.host_ready().await {
            self.late_init().await;
            if !self.host_ready().await {
                return Ok(placeholder_response());
            }
        }

        match self.host.decrypt_blob(response.body.clone()).await {
            Ok(plaintext) => Ok(response.with_body(plaintext)),
            Err(err) => {
                warn!(path, %err, "image retry failed");
                if err.is_auth_failure() {
                    self.purge_config();
                }
                Ok(placeholder_response())
            }
        }
    }

    async fn host_ready(&self) -> bool {
        self.host.is_ready().await.unwrap_or(false)
    }

    /// Best effort: some page context may have unlocked this gallery
    /// already; ask for its persisted config, bounded by a short timeout.
    async fn late_init(&self) {
        let Some(page) = &self.page else {
            return;
        };
        let lookup = timeout(CONFIG_LOOKUP_TIMEOUT, page.fetch_config(&self.gallery_id)).await;
        let config = match lookup {
            Ok(Ok(Some(config))) => config,
            Ok(Ok(None)) => return,
            Ok(Err(err)) => {
                debug!(%err, "config lookup failed");
                return;
            }
            Err(_) => {
                debug!("config lookup timed out");
                return;
            }
        };
        info!(gallery_id = %self.gallery_id, "late host initialization from persisted config");
        if let Err(err) = self.host.init(config).await {
            warn!(%err, "late host initialization failed");
        }
    }

    fn purge_config(&self) {
        info!(gallery_id = %self.gallery_id, "purging persisted config after authentication failure");
        if let Err(err) = self.store.remove(&self.gallery_id) {
            warn!(?err, "failed to purge persisted config");
        }
    }
}

fn is_image(request: &ResourceRequest, response: &GalleryResponse) -> bool {
    request.destination == Destination::Image
        || response
            .content_type()
            .is_some_and(|content_type| content_type.starts_with("image/"))
}
