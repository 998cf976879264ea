//! Shared fixtures: in-memory and on-disk encrypted galleries.

use {
    anyhow::Result,
    std::{path::Path, sync::Arc},
    veiled_protocol::{GalleryConfig, KEY_CHECK_PATH},
    veiled_sdk::{
        crypto::{GalleryCipher, derive_key},
        fetch::{MemoryFetcher, content_type_for},
        session::PasswordPrompt,
    },
};

pub const PASSWORD: &str = "correct-horse";

#[must_use]
pub fn gallery_config(gallery_id: &str) -> GalleryConfig {
    GalleryConfig {
        gallery_id: gallery_id.into(),
        password: None,
        kdf_salt: "fixture-salt".into(),
        kdf_iters: 100,
        gcm_tag: "fixture-tag".into(),
        host_script: None,
    }
}

#[must_use]
pub fn cipher_for(config: &GalleryConfig, password: &str) -> GalleryCipher {
    GalleryCipher::new(
        &derive_key(password, &config.kdf_salt, config.kdf_iters),
        &config.gcm_tag,
    )
}

/// In-memory gallery: key-check object, the given images encrypted under
/// the fixture password, one plain image, and a plain html page.
#[must_use]
pub fn build_gallery(config: &GalleryConfig, images: &[(&str, &[u8])]) -> Arc<MemoryFetcher> {
    let cipher = cipher_for(config, PASSWORD);
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert_bytes(
        KEY_CHECK_PATH,
        "text/plain",
        cipher.encrypt(b"key check").unwrap(),
    );
    for (path, plaintext) in images {
        let content_type = content_type_for(path).unwrap_or("image/jpeg");
        fetcher.insert_bytes(path, content_type, cipher.encrypt(plaintext).unwrap());
    }
    fetcher.insert_bytes("/plain.png", "image/png", &b"\x89PNG plain bytes"[..]);
    fetcher.insert_bytes("/index.html", "text/html", &b"<html>gallery</html>"[..]);
    fetcher
}

/// Same gallery written into a directory, for serving through the proxy.
pub fn write_gallery_dir(
    root: &Path,
    config: &GalleryConfig,
    images: &[(&str, &[u8])],
) -> Result<()> {
    let cipher = cipher_for(config, PASSWORD);
    let key_check_path = root.join(KEY_CHECK_PATH);
    fs_err::create_dir_all(key_check_path.parent().unwrap())?;
    fs_err::write(key_check_path, cipher.encrypt(b"key check")?)?;
    for (path, plaintext) in images {
        let full_path = root.join(path.trim_start_matches('/'));
        if let Some(parent) = full_path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::write(full_path, cipher.encrypt(plaintext)?)?;
    }
    fs_err::write(root.join("plain.png"), b"\x89PNG plain bytes")?;
    fs_err::write(root.join("index.html"), b"<html>gallery</html>")?;
    Ok(())
}

/// Prompt that always answers with the same scripted response.
pub struct ScriptedPrompt(pub Option<String>);

impl PasswordPrompt for ScriptedPrompt {
    fn prompt(&self, _gallery_id: &veiled_protocol::GalleryId) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}
