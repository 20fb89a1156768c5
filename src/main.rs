// servcore demo bootstrap.
//
// Wires up a cache, a scheduler with one pool, and a channel registry
// behind a toy in-process driver, then drives a handful of requests
// through `queue_conn` so the pieces can be watched working together.
// A real embedder supplies its own `Driver`/`RequestHooks` and calls the
// same `Server`/`Cache`/`ChannelRegistry` API from its own accept loop.

use log::warn;
use servcore::cache::{Cache, CacheConfig};
use servcore::connchan::ChannelRegistry;
use servcore::driver::{Driver, Sock};
use servcore::scheduler::{PoolConfig, Server};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

struct DemoDriver {
    served: AtomicU64,
}

impl Driver for DemoDriver {
    fn name(&self) -> &str {
        "demo"
    }

    fn send(&self, _sock: &mut Sock, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn recv(&self, _sock: &mut Sock, _buf: &mut [u8], _timeout: Option<Duration>) -> std::io::Result<usize> {
        Ok(0)
    }

    fn request(&self, conn: &mut servcore::scheduler::Conn) -> Option<u16> {
        let n = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        info!(conn_id = conn.id, served = n, "handled demo request");
        Some(200)
    }
}

#[tokio::main]
async fn main() -> servcore::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).with_level(true).init();

    info!("starting servcore demo");

    let cache = Cache::new(
        "demo-cache",
        CacheConfig {
            max_size: 1024 * 1024,
            max_entry: 64 * 1024,
            default_ttl: Some(Duration::from_secs(60)),
            default_wait_timeout: Some(Duration::from_secs(5)),
        },
        None,
    );
    let computed = cache
        .get_or_compute("greeting", Some(Duration::from_secs(60)), || {
            (bytes::Bytes::from_static(b"hello from servcore"), Duration::from_micros(50))
        })
        .expect("demo compute should not time out against an empty cache");
    info!(bytes = computed.len(), "warmed demo cache entry");

    let driver = Arc::new(DemoDriver { served: AtomicU64::new(0) });
    let server = Server::new("demo", driver.clone());
    server.add_pool(
        "default",
        PoolConfig {
            max_connections: 64,
            min_threads: 2,
            max_threads: 8,
            idle_timeout: Duration::from_secs(10),
            conns_per_thread: 0,
            spread: 20,
            concurrent_create_threshold: 50,
            wait_timeout: None,
        },
    );
    server.start_server()?;

    let channels = Arc::new(ChannelRegistry::new(driver.clone()));

    for i in 0..5u32 {
        let id = server.queue_conn(None, Sock::new(format!("127.0.0.1:{}", 9000 + i), i as i32))?;
        info!(connection_id = id, "queued demo connection");
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    if channels.list().is_empty() {
        warn!("no channels were detached during this demo run");
    }

    server.stop_server();
    server.wait_server();
    info!("servcore demo finished cleanly");
    Ok(())
}
