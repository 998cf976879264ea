//! Key derivation and the gallery cipher.
//!
//! One 128-bit key is stretched out of the viewer's password with
//! PBKDF2-HMAC-SHA1 over the publisher-chosen salt and iteration count.
//! The same password, salt and iteration count always derive the same key,
//! so verification is simply "does the key-check object decrypt".

mod cipher;

pub use cipher::{DecryptError, GalleryCipher};

use {
    anyhow::{Error, format_err},
    base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD},
    pbkdf2::pbkdf2_hmac,
    sha1::Sha1,
    std::{
        fmt::{self, Debug},
        str::FromStr,
    },
};

pub const KEY_LEN: usize = 16;

/// Derived symmetric key. Never serialized; never leaves the context that
/// derived it.
#[derive(Clone)]
pub struct DecryptKey([u8; KEY_LEN]);

impl DecryptKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Debug for DecryptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptKey").finish()
    }
}

impl FromStr for DecryptKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(s)?;
        let array = <[u8; KEY_LEN]>::try_from(bytes).map_err(|bytes| {
            format_err!("invalid key length: {}, expected {KEY_LEN}", bytes.len())
        })?;
        Ok(Self(array))
    }
}

/// Stretches a password into a decryption key. Cost is dominated by
/// `iterations`; call through `spawn_blocking` from async code.
#[must_use]
pub fn derive_key(password: &str, salt: &str, iterations: u32) -> DecryptKey {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha1>(password.as_bytes(), salt.as_bytes(), iterations, &mut key);
    DecryptKey(key)
}
