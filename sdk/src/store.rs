//! Persisted unlocked-config store.
//!
//! Keyed by gallery id; the value is the full gallery config including the
//! plaintext password, written only after the derived key has been
//! verified. Presence of an entry therefore means "this gallery has been
//! unlocked on this device before". The store is sensitive and is purged
//! for a gallery whenever decryption fails authentication.

use {
    anyhow::Result,
    parking_lot::Mutex,
    std::{collections::HashMap, path::Path},
    veiled_protocol::{GalleryConfig, GalleryId},
};

pub trait ConfigStore: Send + Sync {
    fn get(&self, gallery_id: &GalleryId) -> Result<Option<GalleryConfig>>;
    fn put(&self, config: &GalleryConfig) -> Result<()>;
    fn remove(&self, gallery_id: &GalleryId) -> Result<()>;
}

/// Sled-backed store for the viewer's state directory.
pub struct SledStore {
    #[expect(dead_code, reason = "keeps the database open")]
    db: sled::Db,
    galleries: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let galleries = db.open_tree("galleries")?;
        Ok(Self { db, galleries })
    }
}

impl ConfigStore for SledStore {
    fn get(&self, gallery_id: &GalleryId) -> Result<Option<GalleryConfig>> {
        let Some(value) = self.galleries.get(gallery_id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&value)?))
    }

    fn put(&self, config: &GalleryConfig) -> Result<()> {
        self.galleries.insert(
            config.gallery_id.as_bytes(),
            serde_json::to_vec(config)?,
        )?;
        self.galleries.flush()?;
        Ok(())
    }

    fn remove(&self, gallery_id: &GalleryId) -> Result<()> {
        self.galleries.remove(gallery_id.as_bytes())?;
        self.galleries.flush()?;
        Ok(())
    }
}

/// In-memory store for tests and for viewers that must not persist
/// passwords to disk.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<GalleryId, GalleryConfig>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, gallery_id: &GalleryId) -> Result<Option<GalleryConfig>> {
        Ok(self.entries.lock().get(gallery_id).cloned())
    }

    fn put(&self, config: &GalleryConfig) -> Result<()> {
        self.entries
            .lock()
            .insert(config.gallery_id.clone(), config.clone());
        Ok(())
    }

    fn remove(&self, gallery_id: &GalleryId) -> Result<()> {
        self.entries.lock().remove(gallery_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[test]
    fn sled_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path().join("state")).unwrap();
        let id: GalleryId = "g1".into();
        assert!(store.get(&id).unwrap().is_none());

        let config = GalleryConfig {
            gallery_id: id.clone(),
            password: Some("pw".into()),
            kdf_salt: "salt".into(),
            kdf_iters: 1000,
            gcm_tag: "tag".into(),
            host_script: None,
        };
        store.put(&config).unwrap();
        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded.password.as_deref(), Some("pw"));
        assert_eq!(loaded.kdf_salt, "salt");

        store.remove(&id).unwrap();
        assert!(store.get(&id).unwrap().is_none());
        // Removing again is fine.
        store.remove(&id).unwrap();
    }
}
