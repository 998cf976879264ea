use {
    anyhow::Result,
    bytes::Bytes,
    http_body_util::Full,
    hyper::{
        Method, Request, Response, StatusCode, body::Incoming, server::conn::http1,
        service::service_fn,
    },
    hyper_util::rt::TokioIo,
    std::{convert::Infallible, error::Error, io, net::SocketAddr, pin::pin, sync::Arc},
    tokio::net::TcpListener,
    tracing::{debug, info, warn},
    veiled_sdk::{
        fetch::{Fetcher, GalleryResponse},
        host::HostApi,
        intercept::{Interceptor, ResourceRequest},
        signal::shutdown_signal,
    },
};

/// Accept loop of the decrypting proxy. Every request is funneled through
/// the interceptor; what comes back is already decrypted, passed through,
/// or the placeholder.
pub async fn run<F, H>(bind_addr: SocketAddr, interceptor: Arc<Interceptor<F, H>>) -> Result<()>
where
    F: Fetcher,
    H: HostApi + 'static,
{
    let listener = TcpListener::bind(bind_addr).await?;
    info!("listening on http://{bind_addr}");

    let mut shutdown = pin!(shutdown_signal());
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let interceptor = interceptor.clone();
                    tokio::spawn(async move {
                        serve_connection(stream, &interceptor).await;
                    });
                }
                Err(err) => warn!(?err, "failed to accept"),
            },
            signal = &mut shutdown => {
                info!("shutting down on {}", signal?);
                return Ok(());
            }
        }
    }
}

/// Serves one HTTP/1 connection. A page closing mid image load is routine,
/// so disconnects are logged at debug rather than propagated.
async fn serve_connection<F, H>(stream: tokio::net::TcpStream, interceptor: &Arc<Interceptor<F, H>>)
where
    F: Fetcher,
    H: HostApi,
{
    let interceptor = &**interceptor;
    let serving = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(
            TokioIo::new(stream),
            service_fn(move |request| handle_request(interceptor, request)),
        )
        .await;
    if let Err(err) = serving {
        if is_disconnect(&err) {
            debug!(error = ?err, "request interrupted by the client");
        } else {
            warn!(error = ?err, "failed to serve HTTP");
        }
    }
}

fn is_disconnect(err: &hyper::Error) -> bool {
    if err.is_incomplete_message() {
        return true;
    }
    err.source()
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|io_err| {
            matches!(
                io_err.kind(),
                io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset
            )
        })
}

async fn handle_request<F, H>(
    interceptor: &Interceptor<F, H>,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    F: Fetcher,
    H: HostApi,
{
    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED));
    }
    let mut path = request.uri().path().to_owned();
    if path.ends_with('/') {
        path.push_str("index.html");
    }

    let resource = ResourceRequest::new(path);
    match interceptor.intercept(&resource).await {
        Ok(response) => Ok(to_http(response)),
        Err(err) => {
            warn!(path = %resource.path, %err, "upstream fetch failed");
            Ok(status_response(StatusCode::BAD_GATEWAY))
        }
    }
}

fn to_http(response: GalleryResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);
    for (key, value) in &response.headers {
        builder = builder.header(key, value);
    }
    builder
        .body(Full::new(response.body))
        .unwrap_or_else(|err| {
            warn!(?err, "failed to assemble response");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        })
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(status.as_str().to_owned())))
        .expect("status-only response")
}
