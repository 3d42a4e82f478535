use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use tinysquid::{serve, ProxyCache, CACHE_SLOTS, MAX_OBJECT_SIZE};

fn usage() -> ! {
    eprintln!("usage: tinysquid <port>");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Writes to disconnected clients surface as I/O errors on the failing
    // pipeline only; the Rust runtime already ignores SIGPIPE.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tinysquid=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        usage();
    }
    let port: u16 = match args[1].parse() {
        Ok(port) => port,
        Err(_) => usage(),
    };

    info!("tinysquid - caching HTTP/1.x forward proxy");
    info!("listening on port {port}");
    info!("cache: {CACHE_SLOTS} slots, {} KiB max object", MAX_OBJECT_SIZE / 1024);

    let cache = ProxyCache::new();
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = serve(listener, cache) => {}
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    Ok(())
}
