//! Synthetic trace replay benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tagheap_harness::{Profile, ReplayOptions, replay, synthesize};

fn bench_replay_profiles(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for profile in Profile::ALL {
        let trace = synthesize(profile, 0xDEAD_BEEF, 5_000, 4096);
        group.throughput(Throughput::Elements(trace.ops.len() as u64));
        group.bench_with_input(BenchmarkId::new("profile", profile.name()), &trace, |b, t| {
            b.iter(|| replay(t, &ReplayOptions::default()).expect("replay"));
        });
    }

    group.finish();
}

fn bench_replay_checked(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_checked");
    let trace = synthesize(Profile::Churn, 7, 1_000, 1024);
    let options = ReplayOptions {
        check_each_op: true,
        ..ReplayOptions::default()
    };
    group.throughput(Throughput::Elements(trace.ops.len() as u64));
    group.bench_function("churn_1000", |b| {
        b.iter(|| replay(&trace, &options).expect("replay"));
    });
    group.finish();
}

criterion_group!(benches, bench_replay_profiles, bench_replay_checked);
criterion_main!(benches);
