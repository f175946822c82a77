//! Criterion benchmarks for the hot paths: share intake, the hashrate pass
//! over a populated registry and proportional allocation of a full cycle.

use anyhow::Result;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use primitive_types::U256;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kaspool::blockchain::{PowCheck, TemplateSource, TemplateState};
use kaspool::hashrate::HashrateEstimator;
use kaspool::metrics::NoopMetrics;
use kaspool::rewards::compute_allocation;
use kaspool::shares::{Contribution, MinerRegistry, SharesManager};

struct EasyWork;

impl TemplateState for EasyWork {
    fn check_work(&self, _nonce: u64) -> PowCheck {
        PowCheck {
            is_block: false,
            proof: U256::zero(),
        }
    }
}

struct LiveTemplate(Arc<EasyWork>);

impl TemplateSource for LiveTemplate {
    type State = EasyWork;

    fn resolve(&self, _hash: &str) -> Option<Arc<EasyWork>> {
        Some(self.0.clone())
    }

    async fn submit(&self, _miner_id: &str, _hash: &str, _nonce: u64) -> Result<bool> {
        Ok(false)
    }
}

fn bench_add_share(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mgr = SharesManager::new(Arc::new(NoopMetrics));
    let src = LiveTemplate(Arc::new(EasyWork));
    let nonce = AtomicU64::new(0);
    let (mgr, src, nonce) = (&mgr, &src, &nonce);

    let mut group = c.benchmark_group("share-intake");
    group.throughput(Throughput::Elements(1));
    group.bench_function("add-share", |b| {
        b.to_async(&rt).iter(move || async move {
            let n = nonce.fetch_add(1, Ordering::Relaxed);
            let address = format!("kaspa:{}", n % 64);
            black_box(mgr.add_share("rig", &address, "t", 4.0, n, src).await).ok();
        });
    });
    group.finish();
}

fn bench_hashrate_pass(c: &mut Criterion) {
    let now = 600_000;
    let mut group = c.benchmark_group("hashrate");
    group.bench_function("estimate-1k-workers", |b| {
        b.iter_batched(
            || {
                let registry = MinerRegistry::new();
                (0..1_000u64).into_par_iter().for_each(|w| {
                    let address = format!("kaspa:{}", w / 4);
                    let worker = format!("rig{}", w % 4);
                    for t in 0..60 {
                        registry.record_attempt(&address, &worker, 16.0, t * 10_000);
                    }
                });
                registry
            },
            |registry| {
                let estimator = HashrateEstimator::new("kaspa:pool".into(), 86_400, Arc::new(NoopMetrics));
                black_box(estimator.estimate_at(&registry, now))
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let contributions: Vec<Contribution> = (0..100_000u64)
        .into_par_iter()
        .map(|i| Contribution {
            address: format!("kaspa:{}", i % 500),
            miner_id: format!("rig{}", i % 7),
            difficulty: 1.0 + (i % 4096) as f64,
            timestamp: i as i64,
        })
        .collect();

    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Elements(contributions.len() as u64));
    group.bench_function("100k-contributions-500-addresses", |b| {
        b.iter(|| black_box(compute_allocation(black_box(&contributions), 50_000_000_000)));
    });
    group.finish();
}

criterion_group!(benches, bench_add_share, bench_hashrate_pass, bench_allocation);
criterion_main!(benches);
