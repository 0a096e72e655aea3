//! Contention demo: a handful of workers hammer a few named resources, each
//! resource guarded by one keyed lock. Run with `RUST_LOG=latchkey=trace` to
//! watch entries get created and evicted.

use std::time::Duration;

use latchkey::KeyedLock;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let lock = KeyedLock::<String>::new();
    let resources = ["alpha", "beta", "gamma"];

    let mut workers = Vec::new();
    for worker in 0..6usize {
        let lock = lock.clone();
        workers.push(tokio::spawn(async move {
            for round in 0..4usize {
                let key = resources[(worker + round) % resources.len()];
                let guard = lock.acquire(key.to_owned()).await.expect("lock not closed");
                info!(worker, key, round, "holding");
                tokio::time::sleep(Duration::from_millis(25)).await;
                guard.release();
            }
        }));
    }
    for worker in workers {
        worker.await.expect("worker panicked");
    }

    info!(outstanding_keys = lock.len(), "done");
}
