use {
    crate::cli::CredentialArgs,
    anyhow::{Result, bail},
    std::path::Path,
    tracing::info,
    veiled_protocol::envelope,
    veiled_sdk::crypto::{DecryptKey, GalleryCipher, derive_key},
};

fn cipher_for(credentials: &CredentialArgs) -> Result<GalleryCipher> {
    let key: DecryptKey = if let Some(key) = &credentials.key {
        key.parse()?
    } else if let Some(password) = &credentials.password {
        derive_key(password, &credentials.kdf_salt, credentials.kdf_iters)
    } else {
        bail!("either --password or --key is required");
    };
    Ok(GalleryCipher::new(&key, &credentials.gcm_tag))
}

pub fn encrypt_file(input: &Path, output: &Path, credentials: &CredentialArgs) -> Result<()> {
    let cipher = cipher_for(credentials)?;
    let data = fs_err::read(input)?;
    if envelope::has_marker(&data).unwrap_or(false) {
        bail!("input is already encrypted");
    }
    fs_err::write(output, cipher.encrypt(&data)?)?;
    info!("encrypted {} -> {}", input.display(), output.display());
    Ok(())
}

pub fn decrypt_file(input: &Path, output: &Path, credentials: &CredentialArgs) -> Result<()> {
    let cipher = cipher_for(credentials)?;
    let data = fs_err::read(input)?;
    if !envelope::has_marker(&data).unwrap_or(false) {
        bail!("input is not encrypted");
    }
    fs_err::write(output, cipher.decrypt(&data, false)?)?;
    info!("decrypted {} -> {}", input.display(), output.display());
    Ok(())
}
