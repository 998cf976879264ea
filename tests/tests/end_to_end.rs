//! Full-stack scenarios: page context, privileged host context and the
//! proxy wired together the way the viewer binary wires them.

use {
    anyhow::Result,
    portpicker::pick_unused_port,
    std::{net::SocketAddr, sync::Arc, time::Duration},
    tempfile::TempDir,
    tokio::sync::broadcast,
    veiled::serve,
    veiled_protocol::GalleryConfig,
    veiled_sdk::{
        cache::MemoryCache,
        fetch::{DirFetcher, MemoryFetcher},
        host::{DecryptionHost, HostApi, HostEvent, HostHandler, RemoteHost},
        intercept::{Interceptor, PLACEHOLDER_SVG, ResourceRequest},
        page::{PageHandler, RemotePage},
        rpc,
        session::{SessionCoordinator, UnlockOutcome},
        store::{ConfigStore, MemoryStore},
    },
    veiled_tests::{PASSWORD, ScriptedPrompt, build_gallery, gallery_config, write_gallery_dir},
};

const PHOTO_PIXELS: &[u8] = b"photo one pixels";

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct Instance {
    config: GalleryConfig,
    fetcher: Arc<MemoryFetcher>,
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
    remote_host: RemoteHost,
    remote_page: RemotePage,
    events: broadcast::Sender<HostEvent>,
}

/// Wires a page context and a privileged host context over one RPC channel,
/// mirroring the viewer binary. The host singleton is created by the static
/// `init` call, not pre-constructed.
fn instance() -> Instance {
    init_logging();
    let config = gallery_config("g1");
    let fetcher = build_gallery(&config, &[("/album/photo1.jpg", PHOTO_PIXELS)]);
    let store = Arc::new(MemoryStore::new());
    let (events, _) = broadcast::channel(16);

    let (page_end, host_end) = rpc::pair();
    let host_peer = rpc::spawn(
        host_end,
        HostHandler::new(fetcher.clone(), store.clone(), events.clone()),
    );
    let page_peer = rpc::spawn(page_end, PageHandler::new(store.clone()));

    Instance {
        config,
        fetcher,
        store,
        cache: Arc::new(MemoryCache::new()),
        remote_host: RemoteHost::new(page_peer),
        remote_page: RemotePage::new(host_peer),
        events,
    }
}

impl Instance {
    fn coordinator(&self, password: &str) -> SessionCoordinator<RemoteHost> {
        SessionCoordinator::new(
            self.config.clone(),
            self.store.clone(),
            Box::new(ScriptedPrompt(Some(password.into()))),
            self.remote_host.clone(),
            self.events.subscribe(),
        )
    }

    fn interceptor(&self) -> Interceptor<MemoryFetcher, RemoteHost> {
        Interceptor::new(
            self.cache.clone(),
            self.fetcher.clone(),
            self.remote_host.clone(),
            Some(self.remote_page.clone()),
            self.store.clone(),
            self.config.gallery_id.clone(),
        )
    }
}

#[tokio::test]
async fn correct_password_unlocks_and_decrypts() -> Result<()> {
    let instance = instance();

    let outcome = instance.coordinator(PASSWORD).unlock().await?;
    assert_eq!(outcome, UnlockOutcome::Ready { first_unlock: true });
    assert!(instance.remote_host.is_ready().await?);
    // The verified config, password included, is persisted for siblings.
    let saved = instance.store.get(&instance.config.gallery_id)?.unwrap();
    assert_eq!(saved.password.as_deref(), Some(PASSWORD));

    let interceptor = instance.interceptor();
    let request = ResourceRequest::new("/album/photo1.jpg");
    let response = interceptor.intercept(&request).await?;
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], PHOTO_PIXELS);

    // Second request is a cache hit: no second fetch, no second decryption.
    let fetches = instance.fetcher.fetch_count();
    let again = interceptor.intercept(&request).await?;
    assert_eq!(&again.body[..], PHOTO_PIXELS);
    assert_eq!(instance.fetcher.fetch_count(), fetches);

    // Plain assets pass through untouched.
    let plain = interceptor.intercept(&ResourceRequest::new("/plain.png")).await?;
    assert_eq!(&plain.body[..], b"\x89PNG plain bytes");
    let page = interceptor.intercept(&ResourceRequest::new("/index.html")).await?;
    assert_eq!(&page.body[..], b"<html>gallery</html>");
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected_and_images_fail_closed() -> Result<()> {
    let instance = instance();

    let outcome = instance.coordinator("wrong").unlock().await?;
    assert_eq!(outcome, UnlockOutcome::Rejected);
    assert!(!instance.remote_host.is_ready().await?);
    assert!(instance.store.get(&instance.config.gallery_id)?.is_none());

    // The encrypted image comes back as the placeholder, never ciphertext.
    let interceptor = instance.interceptor();
    let response = interceptor
        .intercept(&ResourceRequest::new("/album/photo1.jpg"))
        .await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some("image/svg+xml"));
    assert_eq!(&response.body[..], PLACEHOLDER_SVG.as_bytes());
    assert!(instance.cache.is_empty());
    Ok(())
}

#[tokio::test]
async fn sibling_context_skips_the_prompt_after_unlock() -> Result<()> {
    let instance = instance();
    instance.coordinator(PASSWORD).unlock().await?;

    // A later context of the same instance finds the host ready and never
    // prompts; the scripted "wrong" answer must stay unused.
    let outcome = instance.coordinator("wrong").unlock().await?;
    assert_eq!(outcome, UnlockOutcome::AlreadyReady);
    Ok(())
}

async fn get(client: &reqwest::Client, addr: SocketAddr, path: &str) -> Result<reqwest::Response> {
    Ok(client.get(format!("http://{addr}{path}")).send().await?)
}

async fn wait_until_serving(client: &reqwest::Client, addr: SocketAddr) -> Result<()> {
    for _ in 0..50 {
        if get(client, addr, "/index.html").await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("proxy did not come up on {addr}");
}

/// The real HTTP round trip: a gallery directory served through the
/// decrypting proxy.
#[tokio::test]
async fn proxy_serves_decrypted_gallery_over_http() -> Result<()> {
    init_logging();
    let config = gallery_config("g1");
    let dir = TempDir::new()?;
    write_gallery_dir(dir.path(), &config, &[("/album/photo1.jpg", PHOTO_PIXELS)])?;

    let fetcher = Arc::new(DirFetcher::new(dir.path().to_path_buf()));
    let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new());
    let (events, _) = broadcast::channel(16);
    let host = Arc::new(DecryptionHost::new(fetcher.clone(), store.clone(), events));
    host.init(config.clone().with_password(PASSWORD)).await?;

    let interceptor = Arc::new(Interceptor::new(
        Arc::new(MemoryCache::new()),
        fetcher,
        host,
        None,
        store,
        config.gallery_id.clone(),
    ));
    let port = pick_unused_port().expect("failed to pick port");
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;
    tokio::spawn(serve::run(addr, interceptor));

    let client = reqwest::Client::new();
    wait_until_serving(&client, addr).await?;

    let photo = get(&client, addr, "/album/photo1.jpg").await?;
    assert_eq!(photo.status(), 200);
    assert_eq!(photo.headers()["content-type"], "image/jpeg");
    assert_eq!(&photo.bytes().await?[..], PHOTO_PIXELS);

    let page = get(&client, addr, "/").await?;
    assert_eq!(page.status(), 200);
    assert_eq!(&page.bytes().await?[..], b"<html>gallery</html>");

    let plain = get(&client, addr, "/plain.png").await?;
    assert_eq!(&plain.bytes().await?[..], b"\x89PNG plain bytes");

    let missing = get(&client, addr, "/album/gone.jpg").await?;
    assert_eq!(missing.status(), 404);

    let post = client
        .post(format!("http://{addr}/album/photo1.jpg"))
        .send()
        .await?;
    assert_eq!(post.status(), 405);
    Ok(())
}

/// A proxy whose host never unlocked serves the placeholder for encrypted
/// images while plain assets keep working.
#[tokio::test]
async fn locked_proxy_fails_closed() -> Result<()> {
    init_logging();
    let config = gallery_config("g1");
    let dir = TempDir::new()?;
    write_gallery_dir(dir.path(), &config, &[("/album/photo1.jpg", PHOTO_PIXELS)])?;

    let fetcher = Arc::new(DirFetcher::new(dir.path().to_path_buf()));
    let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new());
    let (events, _) = broadcast::channel(16);
    let host = Arc::new(DecryptionHost::new(fetcher.clone(), store.clone(), events));

    let interceptor = Arc::new(Interceptor::new(
        Arc::new(MemoryCache::new()),
        fetcher,
        host,
        None,
        store,
        config.gallery_id.clone(),
    ));
    let port = pick_unused_port().expect("failed to pick port");
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;
    tokio::spawn(serve::run(addr, interceptor));

    let client = reqwest::Client::new();
    wait_until_serving(&client, addr).await?;

    let photo = get(&client, addr, "/album/photo1.jpg").await?;
    assert_eq!(photo.status(), 200);
    assert_eq!(photo.headers()["content-type"], "image/svg+xml");
    assert_eq!(&photo.bytes().await?[..], PLACEHOLDER_SVG.as_bytes());

    let plain = get(&client, addr, "/plain.png").await?;
    assert_eq!(&plain.bytes().await?[..], b"\x89PNG plain bytes");
    Ok(())
}
