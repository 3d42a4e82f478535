//! Per-connection proxy pipeline and the accept loop.
//!
//! Each accepted client gets its own task owning its socket; the cache
//! handle is the only shared state. The pipeline reads one request,
//! consults the cache, and on a miss dials the origin and streams the
//! response back while tee-buffering it for admission.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::cache::ProxyCache;
use crate::error::ProxyError;
use crate::http::{build_upstream_request, parse_request, parse_uri};
use crate::{MAX_OBJECT_SIZE, MAX_REQUEST_SIZE};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept clients forever, one spawned task per connection.
pub async fn serve(listener: TcpListener, cache: ProxyCache) {
    loop {
        match listener.accept().await {
            Ok((client, addr)) => {
                debug!("accepted connection from {addr}");
                let cache = cache.clone();
                tokio::spawn(async move {
                    handle_client(client, cache).await;
                });
            }
            Err(e) => {
                error!("failed to accept connection: {e}");
            }
        }
    }
}

/// Run the pipeline for one client; on failure, send the synthetic error
/// page where one applies and close.
pub async fn handle_client(mut client: TcpStream, cache: ProxyCache) {
    if let Err(err) = run_pipeline(&mut client, &cache).await {
        if let Some(page) = err.error_page() {
            let _ = client.write_all(&page).await;
        }
        debug!("connection closed: {err}");
    }
}

/// Read the request head from the client, up to and including the blank
/// line. Bounded by `MAX_REQUEST_SIZE`.
async fn read_request(client: &mut TcpStream) -> Result<BytesMut, ProxyError> {
    let mut buffer = BytesMut::with_capacity(8192);
    loop {
        let n = timeout(IO_TIMEOUT, client.read_buf(&mut buffer)).await??;
        if n == 0 {
            if buffer.is_empty() {
                return Err(ProxyError::ClientGone);
            }
            // Early EOF; let the parser decide whether the head was whole.
            return Ok(buffer);
        }
        if buffer.len() > MAX_REQUEST_SIZE {
            return Err(ProxyError::BadRequest);
        }
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(buffer);
        }
    }
}

async fn run_pipeline(client: &mut TcpStream, cache: &ProxyCache) -> Result<(), ProxyError> {
    let buffer = read_request(client).await?;
    let request = parse_request(&buffer).ok_or(ProxyError::BadRequest)?;

    if !request.method.eq_ignore_ascii_case("GET") {
        return Err(ProxyError::Unsupported(request.method));
    }
    if request.uri.contains("https") {
        return Err(ProxyError::Unsupported(request.uri));
    }

    let target = parse_uri(&request.uri);
    let key = target.cache_key();

    if let Some(hit) = cache.lookup(&key).await {
        info!("cache hit: {key}");
        timeout(IO_TIMEOUT, client.write_all(hit.body())).await??;
        return Ok(());
    }
    debug!("cache miss: {key}");

    let mut upstream = match timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((target.host.as_str(), target.port)),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        _ => {
            return Err(ProxyError::DialFailed {
                host: target.host,
                port: target.port,
            })
        }
    };

    let outbound = build_upstream_request(&target, &request.headers);
    timeout(IO_TIMEOUT, upstream.write_all(&outbound)).await??;

    // Stream origin -> client, teeing into a local buffer while the
    // running total still fits a cache slot. Any failure past this point
    // aborts without admission.
    let mut tee = BytesMut::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    let mut total: usize = 0;
    loop {
        let n = timeout(IO_TIMEOUT, upstream.read(&mut chunk)).await??;
        if n == 0 {
            break;
        }
        total += n;
        if total <= MAX_OBJECT_SIZE {
            tee.extend_from_slice(&chunk[..n]);
        }
        timeout(IO_TIMEOUT, client.write_all(&chunk[..n])).await??;
    }

    if total <= MAX_OBJECT_SIZE {
        if cache.admit(&key, tee.freeze()).await {
            info!("cached: {key} ({total} bytes)");
        } else {
            debug!("cache rejected: {key}");
        }
    } else {
        debug!("not cached (too large): {key} ({total} bytes)");
    }
    Ok(())
}
