//! Page-context role of the cross-context protocol.
//!
//! A page context answers one question for the privileged side: "do you
//! have a persisted config for this gallery?" The interceptor uses it for
//! best-effort late initialization when an image request arrives before
//! any unlock ran in the privileged context.

use {
    crate::{
        rpc::{Handler, IncomingCall, Peer},
        store::ConfigStore,
    },
    serde_json::Value,
    std::sync::Arc,
    veiled_protocol::{GalleryConfig, GalleryId, rpc::{RpcError, page_methods}},
};

pub struct PageHandler {
    store: Arc<dyn ConfigStore>,
}

impl PageHandler {
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }
}

impl Handler for PageHandler {
    async fn handle(&self, call: IncomingCall) -> Result<Value, RpcError> {
        match call.method.as_str() {
            page_methods::FETCH_CONFIG => {
                let gallery_id = call
                    .args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::Remote("invalid gallery id argument".into()))?;
                let config = self
                    .store
                    .get(&GalleryId(gallery_id.to_owned()))
                    .map_err(|err| RpcError::Remote(err.to_string()))?;
                match config {
                    Some(config) => serde_json::to_value(&config)
                        .map_err(|err| RpcError::Remote(err.to_string())),
                    None => Ok(Value::Null),
                }
            }
            other => Err(RpcError::NoSuchMethod(other.into())),
        }
    }
}

/// Stub for asking a live page context for its persisted config.
#[derive(Clone)]
pub struct RemotePage {
    peer: Peer,
}

impl RemotePage {
    #[must_use]
    pub fn new(peer: Peer) -> Self {
        Self { peer }
    }

    pub async fn fetch_config(
        &self,
        gallery_id: &GalleryId,
    ) -> Result<Option<GalleryConfig>, RpcError> {
        let value = self
            .peer
            .call(
                page_methods::FETCH_CONFIG,
                vec![Value::String(gallery_id.0.clone())],
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| RpcError::Remote(err.to_string()))
    }
}
