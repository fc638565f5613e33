use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fieldgrid_backends::{configure_1d, configure_3d, Backend, BufferPool, CpuBackend, PlatformLimits};
use fieldgrid_tracing::{init_global_tracing, TracingConfig};
use std::sync::Once;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let mut config = TracingConfig::from_env();
        config.default_directive = "warn".to_string();
        if let Err(e) = init_global_tracing(&config) {
            eprintln!("tracing disabled: {e}");
        }
    });
}

fn bench_configure(c: &mut Criterion) {
    init_tracing();
    let limits = PlatformLimits::default();
    let mut group = c.benchmark_group("configure");

    for &n in &[1_000usize, 1_000_000, 512 * 65_536 * 4] {
        group.bench_with_input(BenchmarkId::new("1d", n), &n, |b, &n| {
            b.iter(|| configure_1d(black_box(n), &limits))
        });
    }

    for size in [[64usize, 64, 1], [256, 256, 32], [1024, 1024, 128]] {
        let label = format!("{}x{}x{}", size[0], size[1], size[2]);
        group.bench_with_input(BenchmarkId::new("3d", label), &size, |b, &size| {
            b.iter(|| configure_3d(black_box(size), &limits))
        });
    }

    group.finish();
}

fn bench_pool(c: &mut Criterion) {
    init_tracing();
    c.bench_function("pool_get_recycle_64k", |b| {
        let mut backend = CpuBackend::new();
        let mut pool = BufferPool::new();
        b.iter(|| {
            let handle = pool.get(&mut backend, 64 * 1024).unwrap();
            pool.recycle(black_box(handle)).unwrap();
        });
        pool.free_all(&mut backend);
    });

    c.bench_function("async_upload_chunk_16", |b| {
        let mut backend = CpuBackend::new();
        let buffer = backend.allocate_buffer(16 * 4 * 64).unwrap();
        let stream = backend.create_stream().unwrap();
        let chunk = [1.0f32; 16];
        let mut slot = 0usize;
        b.iter(|| {
            backend
                .copy_to_buffer_async(buffer, slot * 64, bytemuck::cast_slice(&chunk), stream)
                .unwrap();
            backend.synchronize_stream(stream).unwrap();
            slot = (slot + 1) % 64;
        });
    });
}

criterion_group!(benches, bench_configure, bench_pool);
criterion_main!(benches);
