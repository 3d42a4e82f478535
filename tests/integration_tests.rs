//! End-to-end tests: a real proxy instance on a loopback port talking to
//! a stub origin server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tinysquid::{serve, ProxyCache};

/// Bind the proxy on an ephemeral port and run it in the background.
async fn spawn_proxy(cache: ProxyCache) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve(listener, cache));
    port
}

struct StubOrigin {
    port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

/// An origin that answers every connection with the same canned response
/// and closes, recording each request head it saw.
async fn spawn_origin(response: Vec<u8>) -> StubOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let conn_count = connections.clone();
    let seen = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                break;
            };
            conn_count.fetch_add(1, Ordering::SeqCst);
            let response = response.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    match conn.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            head.extend_from_slice(&buf[..n]);
                            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                seen.lock().unwrap().push(head);
                let _ = conn.write_all(&response).await;
            });
        }
    });

    StubOrigin {
        port,
        connections,
        requests,
    }
}

/// One shot request through the proxy, reading the response to EOF.
async fn fetch(proxy_port: u16, request: &str) -> Vec<u8> {
    let mut conn = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    conn.write_all(request.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    conn.read_to_end(&mut out).await.unwrap();
    out
}

fn canned_response(body: &[u8]) -> Vec<u8> {
    let mut resp = format!(
        "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    resp.extend_from_slice(body);
    resp
}

#[tokio::test]
async fn miss_then_hit_serves_identical_bytes_without_redialing() {
    let response = canned_response(&[b'x'; 120]);
    let origin = spawn_origin(response.clone()).await;
    let cache = ProxyCache::new();
    let proxy = spawn_proxy(cache.clone()).await;

    let request = format!(
        "GET http://127.0.0.1:{}/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        origin.port
    );

    let first = fetch(proxy, &request).await;
    assert_eq!(first, response);
    assert_eq!(origin.connections.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len().await, 1);

    // Second round must come from cache: same bytes, no new origin dial.
    let second = fetch(proxy, &request).await;
    assert_eq!(second, response);
    assert_eq!(origin.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn upstream_request_is_rewritten() {
    let origin = spawn_origin(canned_response(b"ok")).await;
    let proxy = spawn_proxy(ProxyCache::new()).await;

    let request = format!(
        "GET http://127.0.0.1:{}/page HTTP/1.1\r\n\
         Host: spoofed.example\r\n\
         User-Agent: curl/8.0\r\n\
         Connection: keep-alive\r\n\
         Proxy-Connection: keep-alive\r\n\
         Accept: text/plain\r\n\r\n",
        origin.port
    );
    fetch(proxy, &request).await;

    let seen = origin.requests.lock().unwrap();
    let head = String::from_utf8(seen[0].clone()).unwrap();
    assert!(head.starts_with("GET /page HTTP/1.0\r\n"), "got: {head}");
    assert!(head.contains(&format!("Host: 127.0.0.1:{}\r\n", origin.port)));
    assert!(head.contains("Connection: close\r\n"));
    assert!(head.contains("Proxy-Connection: close\r\n"));
    assert!(head.contains("Accept: text/plain\r\n"));
    assert!(!head.contains("spoofed.example"));
    assert!(!head.contains("keep-alive"));
    assert!(!head.contains("curl/8.0"));
}

#[tokio::test]
async fn oversize_response_is_forwarded_but_not_cached() {
    let response = canned_response(&vec![b'z'; 200 * 1024]);
    let origin = spawn_origin(response.clone()).await;
    let cache = ProxyCache::new();
    let proxy = spawn_proxy(cache.clone()).await;

    let request = format!(
        "GET http://127.0.0.1:{}/big HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        origin.port
    );

    let first = fetch(proxy, &request).await;
    assert_eq!(first, response);
    assert!(cache.is_empty().await);

    // Still a miss the second time around.
    let second = fetch(proxy, &request).await;
    assert_eq!(second, response);
    assert_eq!(origin.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn post_is_rejected_without_dialing() {
    let origin = spawn_origin(canned_response(b"never")).await;
    let proxy = spawn_proxy(ProxyCache::new()).await;

    let request = format!(
        "POST http://127.0.0.1:{}/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        origin.port
    );
    let response = fetch(proxy, &request).await;

    assert!(response.starts_with(b"HTTP/1.0 501 Not Implemented\r\n"));
    let text = String::from_utf8_lossy(&response);
    assert!(text.contains("Tiny Error"));
    assert_eq!(origin.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn https_is_rejected() {
    let proxy = spawn_proxy(ProxyCache::new()).await;
    let response = fetch(
        proxy,
        "GET https://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n",
    )
    .await;
    assert!(response.starts_with(b"HTTP/1.0 501 Not Implemented\r\n"));
}

#[tokio::test]
async fn dial_failure_yields_404_and_leaves_cache_alone() {
    let cache = ProxyCache::new();
    let proxy = spawn_proxy(cache.clone()).await;

    // Port 1 on loopback refuses connections.
    let response = fetch(
        proxy,
        "GET http://127.0.0.1:1/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
    )
    .await;

    assert!(response.starts_with(b"HTTP/1.0 404 Not Found\r\n"));
    let text = String::from_utf8_lossy(&response);
    assert!(text.contains("Tiny Error"));
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn garbage_request_yields_501() {
    let proxy = spawn_proxy(ProxyCache::new()).await;
    let response = fetch(proxy, "utter nonsense\r\n\r\n").await;
    assert!(response.starts_with(b"HTTP/1.0 501 Not Implemented\r\n"));
}

#[tokio::test]
async fn concurrent_clients_are_served_independently() {
    let origin = spawn_origin(canned_response(b"shared payload")).await;
    let proxy = spawn_proxy(ProxyCache::new()).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let port = origin.port;
        tasks.push(tokio::spawn(async move {
            let request = format!(
                "GET http://127.0.0.1:{port}/item{} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                i % 4
            );
            fetch(proxy, &request).await
        }));
    }
    let expected = canned_response(b"shared payload");
    for task in tasks {
        assert_eq!(task.await.unwrap(), expected);
    }
}
