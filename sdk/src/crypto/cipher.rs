use {
    crate::crypto::DecryptKey,
    aes_gcm::{
        Aes128Gcm, Key, KeyInit, Nonce,
        aead::{Aead, AeadCore, OsRng, Payload},
    },
    anyhow::{Result, anyhow},
    thiserror::Error,
    veiled_protocol::envelope,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecryptError {
    /// Envelope shorter than the minimum viable size; the cipher is never
    /// invoked for these.
    #[error("envelope too short")]
    TooShort,
    /// Authentication or format failure. Covers a wrong password and
    /// corrupted ciphertext alike; the two are intentionally
    /// indistinguishable at this level.
    #[error("decryption failed")]
    DecryptionFailed,
}

/// AES-128-GCM bound to one gallery: the derived key plus the gallery's
/// `gcm_tag` as additional authenticated data. The AAD binding means a
/// ciphertext lifted from another gallery fails authentication here even
/// under the same password.
#[derive(Clone)]
pub struct GalleryCipher {
    cipher: Aes128Gcm,
    aad: Vec<u8>,
}

impl GalleryCipher {
    #[must_use]
    pub fn new(key: &DecryptKey, gcm_tag: &str) -> Self {
        Self {
            cipher: Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key.as_bytes())),
            aad: gcm_tag.as_bytes().to_vec(),
        }
    }

    /// Decrypts an envelope, or passes unencrypted data through.
    ///
    /// With `check_marker` set, input that doesn't start with the envelope
    /// marker is returned unchanged; galleries mix encrypted and plain
    /// assets and the caller may not know which this is. Without it the
    /// input must be an envelope and short buffers fail with
    /// [`DecryptError::TooShort`].
    pub fn decrypt(&self, bytes: &[u8], check_marker: bool) -> Result<Vec<u8>, DecryptError> {
        if check_marker && !envelope::has_marker(bytes).unwrap_or(false) {
            return Ok(bytes.to_vec());
        }
        let (iv, ciphertext) = match envelope::split(bytes) {
            Ok(parts) => parts,
            Err(_) => return Err(DecryptError::TooShort),
        };
        self.cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: ciphertext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| DecryptError::DecryptionFailed)
    }

    /// Publisher-side counterpart: fresh random IV, AAD-bound ciphertext,
    /// assembled into the envelope layout.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| anyhow!("encryption failed"))?;
        Ok(envelope::compose(&nonce, &ciphertext))
    }
}
