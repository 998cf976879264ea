//! Decrypted-response cache.
//!
//! Keyed by request path; only responses that decrypted successfully are
//! ever stored, so a cache hit can always be served as-is. There is no
//! expiry policy: if a publisher re-encrypts a gallery under a new
//! password, stale decrypted entries persist until the substrate evicts
//! them or the process restarts. Known gap, left to the substrate.

use {
    crate::fetch::GalleryResponse,
    parking_lot::Mutex,
    std::collections::HashMap,
};

pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<GalleryResponse>;
    fn put(&self, key: &str, response: GalleryResponse);
}

/// Process-lifetime in-memory cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, GalleryResponse>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<GalleryResponse> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: &str, response: GalleryResponse) {
        self.entries.lock().insert(key.to_owned(), response);
    }
}
