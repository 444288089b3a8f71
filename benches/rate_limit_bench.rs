use ablage::db::{SqliteManager, SqlitePool};
use ablage::rate_limit::{EndpointRateLimiter, RateLimiter, RatePolicy};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn benchmark_single_key(c: &mut Criterion) {
    let limiter = RateLimiter::new();

    c.bench_function("admit_single_key", |b| {
        b.iter(|| black_box(limiter.admit(black_box("203.0.113.7"), u32::MAX, 60)))
    });
}

fn benchmark_many_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("admit_many_keys");

    for keys in [100usize, 10_000, 100_000].iter() {
        let limiter = RateLimiter::new();
        let names: Vec<String> = (0..*keys).map(|i| format!("10.{}.{}.{}", i >> 16, (i >> 8) & 0xff, i & 0xff)).collect();
        for name in &names {
            limiter.admit(name, 20, 5);
        }

        group.bench_with_input(BenchmarkId::from_parameter(keys), &names, |b, names| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % names.len();
                black_box(limiter.admit(&names[i], 20, 5))
            })
        });
    }
    group.finish();
}

fn benchmark_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("admit_contended");

    for threads in [2usize, 4, 8].iter() {
        let limiter = Arc::new(EndpointRateLimiter::new().with_limits([("api", RatePolicy::new(u32::MAX, 60))]));

        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &threads| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let limiter = limiter.clone();
                        thread::spawn(move || {
                            let key = format!("192.0.2.{}", t);
                            for _ in 0..1_000 {
                                black_box(limiter.check("api", &key));
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            })
        });
    }
    group.finish();
}

fn benchmark_evict_idle(c: &mut Criterion) {
    c.bench_function("evict_idle_10k_live_keys", |b| {
        let limiter = RateLimiter::new();
        for i in 0..10_000 {
            limiter.admit(&format!("key-{}", i), 20, 60);
        }
        b.iter(|| black_box(limiter.evict_idle(10)))
    });
}

fn benchmark_pool_lease(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("bench.db").display());
    let pool = SqlitePool::new(SqliteManager::from_url(&url).unwrap(), 4);
    rt.block_on(pool.warm_up(4)).unwrap();

    c.bench_function("pool_acquire_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
                black_box(&conn);
            })
        })
    });
}

criterion_group!(
    benches,
    benchmark_single_key,
    benchmark_many_keys,
    benchmark_contended,
    benchmark_evict_idle,
    benchmark_pool_lease
);
criterion_main!(benches);
