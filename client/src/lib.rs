pub mod cli;
pub mod config;
pub mod files;
pub mod serve;

use {
    anyhow::{Context as _, Result, anyhow},
    config::Config,
    std::{path::PathBuf, sync::Arc},
    tokio::sync::broadcast,
    tracing::{info, warn},
    url::Url,
    veiled_protocol::GalleryId,
    veiled_sdk::{
        cache::MemoryCache,
        fetch::{DirFetcher, Fetcher, HttpFetcher},
        host::{DecryptionHost, HostHandler, RemoteHost},
        intercept::Interceptor,
        page::{PageHandler, RemotePage},
        rpc,
        session::{PasswordPrompt, SessionCoordinator, UnlockOutcome},
        store::{ConfigStore, SledStore},
    },
};

/// Interactive password prompt on the controlling terminal.
struct TermPrompt;

impl PasswordPrompt for TermPrompt {
    fn prompt(&self, gallery_id: &GalleryId) -> Result<Option<String>> {
        let password =
            rpassword::prompt_password(format!("Password for gallery {gallery_id}: "))?;
        Ok(if password.is_empty() { None } else { Some(password) })
    }
}

enum GallerySource {
    Remote(Url),
    Local(PathBuf),
}

fn gallery_source(gallery: &str) -> Result<GallerySource> {
    if gallery.starts_with("http://") || gallery.starts_with("https://") {
        // The fetcher joins relative paths, so the base must end in a slash.
        let mut base = gallery.to_owned();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(GallerySource::Remote(base.parse()?))
    } else {
        Ok(GallerySource::Local(PathBuf::from(gallery)))
    }
}

fn state_dir(config: &Config) -> Result<PathBuf> {
    if let Some(dir) = &config.state_dir {
        return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir().ok_or_else(|| anyhow!("cannot find data dir"))?;
    Ok(data_dir.join("veiled"))
}

pub async fn serve(config: Config) -> Result<()> {
    let store: Arc<dyn ConfigStore> = Arc::new(
        SledStore::open(state_dir(&config)?).context("failed to open the state store")?,
    );
    match gallery_source(&config.gallery)? {
        GallerySource::Remote(base) => {
            run_with(config, store, Arc::new(HttpFetcher::new(base))).await
        }
        GallerySource::Local(root) => {
            run_with(config, store, Arc::new(DirFetcher::new(root))).await
        }
    }
}

/// Wires the three contexts of a viewer instance: the page context (session
/// coordinator, answers config lookups), the privileged context (host), and
/// the proxy serving layer (interceptor, co-located with the host). Page
/// and host talk over one RPC channel; the interceptor uses its end of the
/// same channel to reach page contexts for late initialization.
async fn run_with<F: Fetcher>(
    config: Config,
    store: Arc<dyn ConfigStore>,
    fetcher: Arc<F>,
) -> Result<()> {
    let (events_tx, _) = broadcast::channel(16);
    let host = Arc::new(DecryptionHost::new(
        fetcher.clone(),
        store.clone(),
        events_tx.clone(),
    ));

    let (page_end, host_end) = rpc::pair();
    let host_peer = rpc::spawn(host_end, HostHandler::with_instance(host.clone()));
    let page_peer = rpc::spawn(page_end, PageHandler::new(store.clone()));

    let coordinator = SessionCoordinator::new(
        config.gallery_config(),
        store.clone(),
        Box::new(TermPrompt),
        RemoteHost::new(page_peer),
        events_tx.subscribe(),
    );
    tokio::spawn(async move {
        match coordinator.unlock().await {
            Ok(UnlockOutcome::Ready { first_unlock: true }) => {
                info!("gallery unlocked; reload any views opened before now");
            }
            Ok(UnlockOutcome::Ready { .. } | UnlockOutcome::AlreadyReady) => {
                info!("gallery unlocked");
            }
            Ok(UnlockOutcome::Rejected) => {
                warn!("gallery stays locked: wrong password; restart to retry");
            }
            Err(err) => warn!(?err, "unlock failed"),
        }
    });

    let interceptor = Arc::new(Interceptor::new(
        Arc::new(MemoryCache::new()),
        fetcher,
        host,
        Some(RemotePage::new(host_peer)),
        store,
        config.gallery_id.clone(),
    ));
    serve::run(config.bind_addr, interceptor).await
}
