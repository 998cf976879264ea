pub mod envelope;
pub mod rpc;

use {
    anyhow::anyhow,
    derive_more::{Display, From, Into},
    rand::{
        distr::{Alphanumeric, SampleString},
        rand_core,
        rngs::OsRng,
    },
    serde::{Deserialize, Serialize},
    std::{
        any::Any,
        fmt::{self, Debug},
        panic::catch_unwind,
    },
};

/// Sentinel stored in place of a real password when the viewer cancels the
/// prompt. It is guaranteed to fail verification, so the cancelled-prompt
/// case flows through the same rejected-unlock path as a wrong password.
pub const WRONG_PASSWORD: &str = "__wrong_password__";

/// Well-known relative path of the key-check object published alongside
/// every encrypted gallery. Its decrypted content is never inspected beyond
/// "did decryption succeed".
pub const KEY_CHECK_PATH: &str = "static/keycheck.txt";

/// Default PBKDF2 iteration count used by publishers that don't pick one.
pub const DEFAULT_KDF_ITERS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
pub struct GalleryId(pub String);

impl GalleryId {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for GalleryId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

/// Everything a viewing context needs to unlock one gallery.
///
/// Created by the publisher's page template (or the viewer's config file),
/// owned by the session coordinator, and persisted to the config store only
/// after the derived key has been verified. The persisted copy includes the
/// plaintext password, so the store must be treated as sensitive.
#[derive(Clone, Serialize, Deserialize)]
pub struct GalleryConfig {
    #[serde(rename = "galleryId")]
    pub gallery_id: GalleryId,
    #[serde(default)]
    pub password: Option<String>,
    pub kdf_salt: String,
    #[serde(default = "default_kdf_iters")]
    pub kdf_iters: u32,
    pub gcm_tag: String,
    /// Script reference used by integrations that boot the privileged
    /// context from a published script. The in-process runtime ignores it.
    #[serde(default)]
    pub host_script: Option<String>,
}

fn default_kdf_iters() -> u32 {
    DEFAULT_KDF_ITERS
}

const SALT_LENGTH: usize = 16;
const TAG_LENGTH: usize = 16;
const GALLERY_ID_LENGTH: usize = 6;

fn format_panic_message(err: &(dyn Any + Send + 'static)) -> String {
    err.downcast_ref::<&'static str>()
        .map(|&s| s.to_owned())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| format!("{err:?}"))
}

/// Random alphanumeric token from the OS RNG.
pub fn random_token(length: usize) -> anyhow::Result<String> {
    catch_unwind(|| Alphanumeric.sample_string(&mut rand_core::UnwrapErr(OsRng), length))
        .map_err(|err| anyhow!(format_panic_message(&*err)))
}

impl GalleryConfig {
    /// Fresh credentials for a newly published gallery.
    pub fn generate(password: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            gallery_id: GalleryId(random_token(GALLERY_ID_LENGTH)?),
            password,
            kdf_salt: random_token(SALT_LENGTH)?,
            kdf_iters: DEFAULT_KDF_ITERS,
            gcm_tag: random_token(TAG_LENGTH)?,
            host_script: None,
        })
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl Debug for GalleryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GalleryConfig")
            .field("gallery_id", &self.gallery_id)
            .field("kdf_salt", &self.kdf_salt)
            .field("kdf_iters", &self.kdf_iters)
            .field("gcm_tag", &self.gcm_tag)
            .field("host_script", &self.host_script)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_credentials_are_distinct() {
        let a = GalleryConfig::generate(None).unwrap();
        let b = GalleryConfig::generate(None).unwrap();
        assert_eq!(a.kdf_salt.len(), SALT_LENGTH);
        assert_eq!(a.gcm_tag.len(), TAG_LENGTH);
        assert_eq!(a.gallery_id.0.len(), GALLERY_ID_LENGTH);
        assert_ne!(a.kdf_salt, b.kdf_salt);
        assert_ne!(a.gcm_tag, b.gcm_tag);
    }

    #[test]
    fn debug_masks_password() {
        let config = GalleryConfig::generate(Some("hunter2".into())).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = GalleryConfig {
            gallery_id: "g1".into(),
            password: Some("pw".into()),
            kdf_salt: "salt".into(),
            kdf_iters: 1000,
            gcm_tag: "tag".into(),
            host_script: None,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"galleryId\":\"g1\""));
        let parsed: GalleryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.gallery_id, config.gallery_id);
        assert_eq!(parsed.password, config.password);
        assert_eq!(parsed.kdf_iters, 1000);
    }

    #[test]
    fn missing_iters_fall_back_to_default() {
        let parsed: GalleryConfig = serde_json::from_str(
            r#"{"galleryId": "g", "kdf_salt": "s", "gcm_tag": "t"}"#,
        )
        .unwrap();
        assert_eq!(parsed.kdf_iters, DEFAULT_KDF_ITERS);
        assert_eq!(parsed.password, None);
    }
}
