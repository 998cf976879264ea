//! Drives one page context's unlock: find a config (persisted, embedded,
//! or prompted), hand it to the host, and resolve the outcome from the
//! host's broadcast.
//!
//! A cancelled or empty prompt is not an abort: it becomes the known-bad
//! sentinel password, so the ordinary wrong-password path (host rejection,
//! placeholder images) handles it uniformly.

use {
    crate::{
        host::{HostApi, HostEvent, HostStatus},
        store::ConfigStore,
    },
    anyhow::Result,
    std::sync::Arc,
    tokio::sync::broadcast::{self, error::RecvError},
    tracing::{debug, info, warn},
    veiled_protocol::{GalleryConfig, GalleryId, WRONG_PASSWORD},
};

/// Asks the viewer for the gallery password. Interactive in the binary,
/// scripted in tests. `None` means the viewer cancelled.
pub trait PasswordPrompt: Send + Sync {
    fn prompt(&self, gallery_id: &GalleryId) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The host for this instance was already ready; nothing to do.
    AlreadyReady,
    Ready {
        /// First time this gallery became ready on this device. Consumers
        /// reload content that rendered before interception was active.
        first_unlock: bool,
    },
    Rejected,
}

pub struct SessionCoordinator<H> {
    template: GalleryConfig,
    store: Arc<dyn ConfigStore>,
    prompt: Box<dyn PasswordPrompt>,
    host: H,
    events: broadcast::Receiver<HostEvent>,
}

impl<H: HostApi> SessionCoordinator<H> {
    pub fn new(
        template: GalleryConfig,
        store: Arc<dyn ConfigStore>,
        prompt: Box<dyn PasswordPrompt>,
        host: H,
        events: broadcast::Receiver<HostEvent>,
    ) -> Self {
        Self {
            template,
            store,
            prompt,
            host,
            events,
        }
    }

    /// Runs the unlock once. Consumes the coordinator: a reload supersedes
    /// the whole session.
    pub async fn unlock(mut self) -> Result<UnlockOutcome> {
        if self.host.is_ready().await.unwrap_or(false) {
            debug!(gallery_id = %self.template.gallery_id, "host already ready");
            return Ok(UnlockOutcome::AlreadyReady);
        }

        let config = match self.store.get(&self.template.gallery_id)? {
            Some(saved) => {
                // Persisted configs were verified once already; skip the
                // prompt entirely.
                debug!(gallery_id = %saved.gallery_id, "using persisted config");
                saved
            }
            None => {
                let mut config = self.template.clone();
                if config.password.is_none() {
                    config.password = Some(self.acquire_password()?);
                }
                config
            }
        };

        let status = self.host.init(config).await?;
        match status {
            HostStatus::Ready => {
                let first_unlock = self.drain_ready_flag();
                info!(gallery_id = %self.template.gallery_id, first_unlock, "gallery unlocked");
                Ok(UnlockOutcome::Ready { first_unlock })
            }
            HostStatus::Rejected => {
                warn!(gallery_id = %self.template.gallery_id, "wrong password");
                Ok(UnlockOutcome::Rejected)
            }
            // Another context won the derivation race; wait for its verdict.
            _ => self.wait_for_verdict().await,
        }
    }

    fn acquire_password(&self) -> Result<String> {
        let entered = self.prompt.prompt(&self.template.gallery_id)?;
        Ok(match entered {
            Some(password) if !password.is_empty() => password,
            _ => {
                // Encoded as a known-bad password rather than aborting.
                info!("password prompt cancelled");
                WRONG_PASSWORD.to_owned()
            }
        })
    }

    /// The readiness broadcast for our own init is already buffered on this
    /// receiver; pull the first-unlock flag out of it. An earlier unlock by
    /// another context predates our subscription, in which case it wasn't
    /// the first.
    fn drain_ready_flag(&mut self) -> bool {
        while let Ok(event) = self.events.try_recv() {
            if let HostEvent::Ready {
                gallery_id,
                first_unlock,
            } = event
            {
                if gallery_id == self.template.gallery_id {
                    return first_unlock;
                }
            }
        }
        false
    }

    async fn wait_for_verdict(&mut self) -> Result<UnlockOutcome> {
        loop {
            match self.events.recv().await {
                Ok(HostEvent::Ready {
                    gallery_id,
                    first_unlock,
                }) if gallery_id == self.template.gallery_id => {
                    return Ok(UnlockOutcome::Ready { first_unlock });
                }
                Ok(HostEvent::Rejected { gallery_id })
                    if gallery_id == self.template.gallery_id =>
                {
                    return Ok(UnlockOutcome::Rejected);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    // Event channel gone; fall back to asking directly.
                    let ready = self.host.is_ready().await.unwrap_or(false);
                    return Ok(if ready {
                        UnlockOutcome::Ready { first_unlock: false }
                    } else {
                        UnlockOutcome::Rejected
                    });
                }
            }
        }
    }
}
