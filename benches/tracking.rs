use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use subleak::{LeakDetector, NoCapture, Observable, StreamType};

fn quiet_detector(ty: &Arc<StreamType>) -> LeakDetector {
    LeakDetector::builder()
        .stream_type(ty)
        .capture(Arc::new(NoCapture))
        .build()
}

fn bench_unpatched_subscribe(c: &mut Criterion) {
    let ty = StreamType::new("Observable");
    let source = Observable::<u64>::never().with_stream_type(&ty);

    c.bench_function("tracking/unpatched_subscribe", |b| {
        b.iter(|| source.subscribe(|_| {}).unsubscribe());
    });
}

fn bench_scoped_spy_outside_context(c: &mut Criterion) {
    let ty = StreamType::new("Observable");
    let detector = quiet_detector(&ty);
    let source = Observable::<u64>::never().with_stream_type(&ty);
    let spy = detector.scoped_spy().unwrap();

    // Patched, but every call fails the context check.
    c.bench_function("tracking/scoped_spy_outside_context", |b| {
        b.iter(|| source.subscribe(|_| {}).unsubscribe());
    });

    spy.disable();
}

fn bench_tracked_subscribe(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracking");
    group.throughput(Throughput::Elements(1));

    group.bench_function("tracked_subscribe_release", |b| {
        b.iter_custom(|iters| {
            // Fresh detector per sample so the sequence counter starts at zero.
            let ty = StreamType::new("Observable");
            let detector = quiet_detector(&ty);
            let source = Observable::<u64>::never().with_stream_type(&ty);
            let spy = detector.spy().unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                source.subscribe(|_| {}).unsubscribe();
            }
            let elapsed = start.elapsed();

            spy.disable();
            assert_eq!(detector.open_count(), 0);
            elapsed
        });
    });

    group.bench_function("tracked_snapshot_256_open", |b| {
        let ty = StreamType::new("Observable");
        let detector = quiet_detector(&ty);
        let source = Observable::<u64>::never().with_stream_type(&ty);
        let spy = detector.spy().unwrap();
        let subs: Vec<_> = (0..256).map(|_| source.subscribe(|_| {})).collect();
        spy.disable();

        b.iter(|| detector.snapshot().len());

        for sub in subs {
            sub.unsubscribe();
        }
    });

    group.finish();
}

criterion_group!(
    tracking,
    bench_unpatched_subscribe,
    bench_scoped_spy_outside_context,
    bench_tracked_subscribe
);
criterion_main!(tracking);
