//! On-the-wire format of every encrypted gallery asset:
//!
//! - marker (`MAGIC.len()` bytes) - fixed ASCII tag identifying the blob as
//!   an envelope; legitimate images cannot start with it
//! - IV (12 bytes) - the GCM nonce chosen at encryption time
//! - ciphertext + tag - AES-GCM output, authentication tag appended by the
//!   cipher itself
//!
//! Assets that don't start with the marker were never encrypted and are
//! served as-is by callers that opted into marker checking.

use thiserror::Error;

/// File type marker stored at the beginning of every encrypted asset.
pub const MAGIC: &[u8] = b"_e_n_c_r_y_p_t_e_d_";

/// GCM standard nonce size.
pub const IV_LEN: usize = 12;

/// Smallest buffer that can possibly be a valid envelope. Anything shorter
/// is rejected before the cipher ever sees it.
pub const MIN_LEN: usize = MAGIC.len() + IV_LEN + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Envelope shorter than the minimum viable size.
    #[error("envelope too short")]
    TooShort,
    /// Buffer too short to even carry the marker. A pass-through signal for
    /// callers doing marker checks, not a failure.
    #[error("input does not carry the envelope marker")]
    MalformedInput,
}

/// Whether the buffer starts with the envelope marker.
pub fn has_marker(bytes: &[u8]) -> Result<bool, EnvelopeError> {
    let Some(head) = bytes.get(..MAGIC.len()) else {
        return Err(EnvelopeError::MalformedInput);
    };
    Ok(head == MAGIC)
}

/// Splits an envelope into its IV and ciphertext+tag parts.
///
/// Does not verify the marker; callers that need the check use
/// [`has_marker`] first.
pub fn split(bytes: &[u8]) -> Result<(&[u8], &[u8]), EnvelopeError> {
    if bytes.len() < MIN_LEN {
        return Err(EnvelopeError::TooShort);
    }
    let (_, rest) = bytes.split_at(MAGIC.len());
    Ok(rest.split_at(IV_LEN))
}

/// Publisher-side counterpart of [`split`].
pub fn compose(iv: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC.len() + iv.len() + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(iv);
    out.extend_from_slice(ciphertext);
    out
}
