//! The decryption host: the one context allowed to hold the derived key.
//!
//! A host instance moves through
//! `Uninitialized -> Deriving -> Verifying -> Ready | Rejected`. Derivation
//! starts when a gallery config with a password arrives (locally or over
//! RPC); verification fetches the gallery's key-check object and tries to
//! decrypt it; the outcome is broadcast to every context of the instance.
//! `Ready` and `Rejected` are terminal: a wrong password stays wrong until
//! a fresh host is spawned with a new config.
//!
//! Other contexts address the host through [`HostApi`], implemented both by
//! the in-context singleton and by the RPC stub, so callers never know or
//! care where the host actually lives.

use {
    crate::{
        crypto::{DecryptError, GalleryCipher, derive_key},
        fetch::Fetcher,
        rpc::{Handler, IncomingCall, Peer},
        store::ConfigStore,
    },
    base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD},
    bytes::Bytes,
    parking_lot::Mutex,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::{future::Future, sync::Arc},
    thiserror::Error,
    tokio::sync::broadcast,
    tracing::{debug, info, warn},
    veiled_protocol::{
        GalleryConfig, GalleryId, KEY_CHECK_PATH, WRONG_PASSWORD,
        rpc::{RpcError, host_methods},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Uninitialized,
    Deriving,
    Verifying,
    Ready,
    Rejected,
}

/// Broadcast to every context of the instance when the host settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Ready {
        gallery_id: GalleryId,
        /// True the first time this gallery becomes ready on this device;
        /// consumers reload content rendered before interception was
        /// active.
        first_unlock: bool,
    },
    Rejected {
        gallery_id: GalleryId,
    },
}

#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// Asked to decrypt before reaching `Ready`.
    #[error("not initialized")]
    NotInitialized,
    #[error(transparent)]
    Decrypt(#[from] DecryptError),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("{0}")]
    Other(String),
}

impl HostError {
    /// Reconstructs the failure kind from a remote error message, so RPC
    /// callers observe the same taxonomy as local ones.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        if message.starts_with("decryption failed") {
            Self::Decrypt(DecryptError::DecryptionFailed)
        } else if message.starts_with("envelope too short") {
            Self::Decrypt(DecryptError::TooShort)
        } else if message.starts_with("not initialized") {
            Self::NotInitialized
        } else if let Some(rest) = message.strip_prefix("fetch failed: ") {
            Self::Fetch(rest.to_owned())
        } else {
            Self::Other(message.to_owned())
        }
    }

    /// Whether this failure means the key (hence the stored password) is
    /// wrong for the data.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Decrypt(DecryptError::DecryptionFailed))
    }
}

impl From<RpcError> for HostError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(message) => Self::from_message(&message),
            other => Self::Other(other.to_string()),
        }
    }
}

/// The callable surface of the host, identical whether the host lives in
/// this context or behind the RPC transport.
pub trait HostApi: Send + Sync {
    fn init(
        &self,
        config: GalleryConfig,
    ) -> impl Future<Output = Result<HostStatus, HostError>> + Send;
    fn is_ready(&self) -> impl Future<Output = Result<bool, HostError>> + Send;
    fn decrypt_blob(&self, blob: Bytes) -> impl Future<Output = Result<Bytes, HostError>> + Send;
}

impl<T: HostApi> HostApi for Arc<T> {
    fn init(
        &self,
        config: GalleryConfig,
    ) -> impl Future<Output = Result<HostStatus, HostError>> + Send {
        (**self).init(config)
    }

    fn is_ready(&self) -> impl Future<Output = Result<bool, HostError>> + Send {
        (**self).is_ready()
    }

    fn decrypt_blob(&self, blob: Bytes) -> impl Future<Output = Result<Bytes, HostError>> + Send {
        (**self).decrypt_blob(blob)
    }
}

enum State {
    Uninitialized,
    Deriving,
    Verifying,
    Ready(Arc<GalleryCipher>),
    Rejected,
}

impl State {
    fn status(&self) -> HostStatus {
        match self {
            State::Uninitialized => HostStatus::Uninitialized,
            State::Deriving => HostStatus::Deriving,
            State::Verifying => HostStatus::Verifying,
            State::Ready(_) => HostStatus::Ready,
            State::Rejected => HostStatus::Rejected,
        }
    }
}

/// Singleton per privileged context. Constructed explicitly with its
/// dependencies; nothing looks it up by ambient name.
pub struct DecryptionHost<F> {
    fetcher: Arc<F>,
    store: Arc<dyn ConfigStore>,
    events: broadcast::Sender<HostEvent>,
    state: Mutex<State>,
}

impl<F: Fetcher> DecryptionHost<F> {
    pub fn new(
        fetcher: Arc<F>,
        store: Arc<dyn ConfigStore>,
        events: broadcast::Sender<HostEvent>,
    ) -> Self {
        Self {
            fetcher,
            store,
            events,
            state: Mutex::new(State::Uninitialized),
        }
    }

    #[must_use]
    pub fn status(&self) -> HostStatus {
        self.state.lock().status()
    }

    async fn run_init(&self, config: GalleryConfig) -> Result<HostStatus, HostError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Uninitialized) {
                // A derivation is in flight or already settled; deriving
                // the same key twice is harmless but would double the
                // broadcast, so later calls just report the current state.
                return Ok(state.status());
            }
            *state = State::Deriving;
        }

        let gallery_id = config.gallery_id.clone();
        debug!(%gallery_id, iterations = config.kdf_iters, "deriving key");
        let password = config
            .password
            .clone()
            .unwrap_or_else(|| WRONG_PASSWORD.to_owned());
        let salt = config.kdf_salt.clone();
        let iterations = config.kdf_iters;
        let key = tokio::task::spawn_blocking(move || derive_key(&password, &salt, iterations))
            .await
            .map_err(|err| HostError::Other(err.to_string()))?;
        let cipher = GalleryCipher::new(&key, &config.gcm_tag);

        *self.state.lock() = State::Verifying;
        let key_check = match self.fetch_key_check().await {
            Ok(body) => body,
            Err(err) => {
                // Not a verdict on the password; allow a later retry.
                warn!(%gallery_id, %err, "could not fetch key-check object");
                *self.state.lock() = State::Uninitialized;
                return Err(err);
            }
        };

        match cipher.decrypt(&key_check, true) {
            Ok(_) => {
                let first_unlock = match self.store.get(&gallery_id) {
                    Ok(saved) => saved.is_none(),
                    Err(_) => true,
                };
                if let Err(err) = self.store.put(&config) {
                    warn!(%gallery_id, ?err, "failed to persist verified config");
                }
                *self.state.lock() = State::Ready(Arc::new(cipher));
                info!(%gallery_id, "host ready");
                let _ = self.events.send(HostEvent::Ready {
                    gallery_id,
                    first_unlock,
                });
                Ok(HostStatus::Ready)
            }
            Err(err) => {
                *self.state.lock() = State::Rejected;
                warn!(%gallery_id, %err, "password verification failed");
                if let Err(err) = self.store.remove(&gallery_id) {
                    warn!(%gallery_id, ?err, "failed to purge persisted config");
                }
                let _ = self.events.send(HostEvent::Rejected { gallery_id });
                Ok(HostStatus::Rejected)
            }
        }
    }

    async fn fetch_key_check(&self) -> Result<Bytes, HostError> {
        let response = self
            .fetcher
            .fetch(KEY_CHECK_PATH)
            .await
            .map_err(|err| HostError::Fetch(err.to_string()))?;
        if !response.is_success() {
            return Err(HostError::Fetch(format!(
                "key-check object returned status {}",
                response.status
            )));
        }
        Ok(response.body)
    }
}

impl<F: Fetcher> HostApi for DecryptionHost<F> {
    async fn init(&self, config: GalleryConfig) -> Result<HostStatus, HostError> {
        self.run_init(config).await
    }

    async fn is_ready(&self) -> Result<bool, HostError> {
        Ok(matches!(*self.state.lock(), State::Ready(_)))
    }

    async fn decrypt_blob(&self, blob: Bytes) -> Result<Bytes, HostError> {
        let cipher = match *self.state.lock() {
            State::Ready(ref cipher) => cipher.clone(),
            _ => return Err(HostError::NotInitialized),
        };
        // The caller already checked the marker; anything here must be a
        // complete envelope.
        let plaintext = cipher.decrypt(&blob, false)?;
        Ok(plaintext.into())
    }
}

/// RPC-side face of the privileged context.
///
/// The singleton is created by the static `init` call (or handed in
/// pre-constructed when the interceptor shares the context); instance
/// methods before construction report `NotCallable`, unknown names
/// `NoSuchMethod` — both as ordinary error replies.
pub struct HostHandler<F> {
    deps: Option<HostDeps<F>>,
    instance: Mutex<Option<Arc<DecryptionHost<F>>>>,
}

struct HostDeps<F> {
    fetcher: Arc<F>,
    store: Arc<dyn ConfigStore>,
    events: broadcast::Sender<HostEvent>,
}

impl<F: Fetcher> HostHandler<F> {
    #[must_use]
    pub fn new(
        fetcher: Arc<F>,
        store: Arc<dyn ConfigStore>,
        events: broadcast::Sender<HostEvent>,
    ) -> Self {
        Self {
            deps: Some(HostDeps {
                fetcher,
                store,
                events,
            }),
            instance: Mutex::new(None),
        }
    }

    /// Serves an already-constructed singleton, e.g. one shared with an
    /// in-context interceptor.
    #[must_use]
    pub fn with_instance(host: Arc<DecryptionHost<F>>) -> Self {
        Self {
            deps: None,
            instance: Mutex::new(Some(host)),
        }
    }

    fn instance(&self) -> Result<Arc<DecryptionHost<F>>, RpcError> {
        self.instance
            .lock()
            .clone()
            .ok_or_else(|| RpcError::NotCallable("decryptor".into()))
    }

    fn get_or_create(&self, is_static: bool) -> Result<Arc<DecryptionHost<F>>, RpcError> {
        let mut instance = self.instance.lock();
        if let Some(host) = &*instance {
            return Ok(host.clone());
        }
        if !is_static {
            return Err(RpcError::NotCallable("decryptor".into()));
        }
        let Some(deps) = &self.deps else {
            return Err(RpcError::NotCallable("decryptor".into()));
        };
        let host = Arc::new(DecryptionHost::new(
            deps.fetcher.clone(),
            deps.store.clone(),
            deps.events.clone(),
        ));
        *instance = Some(host.clone());
        Ok(host)
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|err| RpcError::Remote(err.to_string()))
}

impl<F: Fetcher> Handler for HostHandler<F> {
    async fn handle(&self, call: IncomingCall) -> Result<Value, RpcError> {
        match call.method.as_str() {
            host_methods::INIT => {
                let host = self.get_or_create(call.is_static)?;
                let config: GalleryConfig = call
                    .args
                    .into_iter()
                    .next()
                    .and_then(|arg| serde_json::from_value(arg).ok())
                    .ok_or_else(|| RpcError::Remote("invalid gallery config".into()))?;
                let status = host
                    .init(config)
                    .await
                    .map_err(|err| RpcError::Remote(err.to_string()))?;
                to_value(&status)
            }
            host_methods::IS_READY => {
                let host = self.instance()?;
                let ready = host
                    .is_ready()
                    .await
                    .map_err(|err| RpcError::Remote(err.to_string()))?;
                Ok(Value::Bool(ready))
            }
            host_methods::DECRYPT_BLOB => {
                let host = self.instance()?;
                let encoded = call
                    .args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::Remote("invalid blob argument".into()))?;
                let blob = BASE64_URL_SAFE_NO_PAD
                    .decode(encoded)
                    .map_err(|err| RpcError::Remote(err.to_string()))?;
                let plaintext = host
                    .decrypt_blob(blob.into())
                    .await
                    .map_err(|err| RpcError::Remote(err.to_string()))?;
                Ok(Value::String(BASE64_URL_SAFE_NO_PAD.encode(plaintext)))
            }
            other => Err(RpcError::NoSuchMethod(other.into())),
        }
    }
}

/// Stub for calling a host that lives in another context. Same interface,
/// same error kinds; only the latency differs.
#[derive(Clone)]
pub struct RemoteHost {
    peer: Peer,
}

impl RemoteHost {
    #[must_use]
    pub fn new(peer: Peer) -> Self {
        Self { peer }
    }
}

impl HostApi for RemoteHost {
    async fn init(&self, config: GalleryConfig) -> Result<HostStatus, HostError> {
        let config = serde_json::to_value(&config).map_err(|err| HostError::Other(err.to_string()))?;
        let value = self
            .peer
            .call_static(host_methods::INIT, vec![config])
            .await?;
        serde_json::from_value(value).map_err(|err| HostError::Other(err.to_string()))
    }

    async fn is_ready(&self) -> Result<bool, HostError> {
        let value = self.peer.call(host_methods::IS_READY, vec![]).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn decrypt_blob(&self, blob: Bytes) -> Result<Bytes, HostError> {
        let encoded = Value::String(BASE64_URL_SAFE_NO_PAD.encode(&blob));
        let value = self
            .peer
            .call(host_methods::DECRYPT_BLOB, vec![encoded])
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| HostError::Other("invalid decrypt reply".into()))?;
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|err| HostError::Other(err.to_string()))?;
        Ok(bytes.into())
    }
}
