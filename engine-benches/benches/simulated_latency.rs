//! Benchmarks the Bitswap `WantAsync` → `Found` round trip under
//! simulated network latency: a one-way latency plus a per-byte delay
//! derived from typical mobile upload/download bandwidth brackets a
//! simulated peer delivering each wanted block back through
//! `BitswapEngine::found`.

use std::time::Duration;

use blockswap_engine::bitswap::{BitswapConfig, BitswapEngine};
use blockswap_engine::block::DataBlock;
use blockswap_engine::external::PeerId;
use blockswap_engine::store::Store;
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::RngCore;
use tokio_util::sync::CancellationToken;

/// One-way network latency.
const LATENCY: Duration = Duration::from_millis(150);
/// ~42 Mbps download, inverted to nanoseconds per byte.
const DOWNLOAD_DELAY_PER_BYTE: Duration = Duration::from_nanos(227);

async fn simulate_remote_delivery(engine: &BitswapEngine, block: DataBlock) {
    let delay = LATENCY + DOWNLOAD_DELAY_PER_BYTE * block.size as u32;
    tokio::time::sleep(delay).await;
    engine.found(&block.id, &block).await;
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

fn temp_dir(tag: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "blockswap-engine-bench-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&path).unwrap();
    path
}

pub fn want_resolves_with_simulated_latency_10kb_blocks(c: &mut Criterion) {
    want_resolves_with_simulated_latency(c, 10 * 1024);
}

pub fn want_resolves_with_simulated_latency_1kb_blocks(c: &mut Criterion) {
    want_resolves_with_simulated_latency(c, 1024);
}

fn want_resolves_with_simulated_latency(c: &mut Criterion, block_size: usize) {
    let rt = runtime();
    let bench_name = format!("want_async resolution, {block_size} byte block, simulated latency");

    c.bench_function(&bench_name, |b| {
        b.iter_batched(
            || {
                let path = temp_dir("simulated-latency");
                let store = Store::new(&path);
                rt.block_on(store.init()).unwrap();
                let engine =
                    std::sync::Arc::new(BitswapEngine::new(store, &BitswapConfig::default()));
                rt.block_on(engine.start()).unwrap();

                let mut bytes = vec![0u8; block_size];
                rand::thread_rng().fill_bytes(&mut bytes);
                let block = DataBlock::new_raw(Bytes::from(bytes));
                (engine, path, block)
            },
            |(engine, path, block)| {
                rt.block_on(async {
                    let cid = block.id.clone();
                    let engine_for_delivery = engine.clone();
                    let block_for_delivery = block.clone();
                    tokio::spawn(async move {
                        simulate_remote_delivery(&engine_for_delivery, block_for_delivery).await;
                    });
                    engine
                        .want_async(cid, PeerId("bench-peer".into()), CancellationToken::new())
                        .await
                        .unwrap();
                });
                std::fs::remove_dir_all(&path).ok();
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = want_resolves_with_simulated_latency_10kb_blocks, want_resolves_with_simulated_latency_1kb_blocks
}
criterion_main!(benches);
