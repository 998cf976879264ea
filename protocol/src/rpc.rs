//! Wire shapes of the cross-context call protocol.
//!
//! Two message kinds travel over a channel: a call names a method on the
//! remote context's singleton (statically or on the live instance) and a
//! reply carries back either a value or an error message. Replies are
//! correlated to calls purely by id, so they may arrive in any order.

use {
    derive_more::{Display, From, Into},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    thiserror::Error,
};

/// Correlation id, unique per calling context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
pub struct CallId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    Call {
        id: CallId,
        method_name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        is_static: bool,
    },
    #[serde(rename_all = "camelCase")]
    Reply {
        id: CallId,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl Message {
    /// Wraps an invocation outcome the way it crosses the channel: failures
    /// become `ok: false` replies, never a transport break.
    pub fn reply(id: CallId, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Message::Reply {
                id,
                ok: true,
                value: Some(value),
                error_message: None,
            },
            Err(err) => Message::Reply {
                id,
                ok: false,
                value: None,
                error_message: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The remote context does not declare this method.
    #[error("no such method: {0}")]
    NoSuchMethod(String),
    /// The method exists but there is no live instance to invoke it on.
    #[error("not callable: {0}")]
    NotCallable(String),
    /// The remote invocation failed; carries the remote error message.
    #[error("{0}")]
    Remote(String),
    /// The other endpoint went away before replying.
    #[error("rpc channel closed")]
    ChannelClosed,
}

/// Callable surface of the decryption host as seen by other contexts.
pub mod host_methods {
    /// Static: starts key derivation from a gallery config.
    pub const INIT: &str = "init";
    pub const IS_READY: &str = "isReady";
    pub const DECRYPT_BLOB: &str = "decryptBlob";
}

/// Callable surface of a page context as seen by the privileged context.
pub mod page_methods {
    /// Returns the locally persisted config for a gallery id, if any.
    pub const FETCH_CONFIG: &str = "fetchConfig";
}
