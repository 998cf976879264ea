use {
    derivative::Derivative,
    serde::{Deserialize, Serialize},
    std::{net::SocketAddr, path::PathBuf},
    veiled_protocol::{DEFAULT_KDF_ITERS, GalleryConfig, GalleryId},
};

/// Viewer configuration, loaded from a json5 file. The crypto parameters
/// come from the gallery's publisher; the rest is local.
#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Config {
    /// Where the encrypted gallery lives: an http(s) URL or a local
    /// directory path.
    pub gallery: String,
    #[serde(rename = "galleryId")]
    pub gallery_id: GalleryId,
    pub kdf_salt: String,
    #[serde(default = "default_kdf_iters")]
    pub kdf_iters: u32,
    pub gcm_tag: String,
    /// Publisher-embedded password. When absent the viewer prompts once.
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub password: Option<String>,
    pub bind_addr: SocketAddr,
    /// Where verified gallery configs are persisted. Defaults to the
    /// platform data directory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_kdf_iters() -> u32 {
    DEFAULT_KDF_ITERS
}

impl Config {
    /// The gallery config template handed to the session coordinator.
    #[must_use]
    pub fn gallery_config(&self) -> GalleryConfig {
        GalleryConfig {
            gallery_id: self.gallery_id.clone(),
            password: self.password.clone(),
            kdf_salt: self.kdf_salt.clone(),
            kdf_iters: self.kdf_iters,
            gcm_tag: self.gcm_tag.clone(),
            host_script: None,
        }
    }
}
