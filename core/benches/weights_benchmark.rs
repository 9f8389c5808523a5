use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use veriscore_core::reputation::{HistoryConfig, HistoryTracker, Ranker, RankedParticipant, Ranking};
use veriscore_core::{ListSnapshot, MinerUid, RegisteredNeuron, ScoringConfig, WeightAllocator};

fn ranking(n: u16) -> Ranking {
    Ranking {
        entries: (1..=n)
            .map(|i| RankedParticipant {
                uid: MinerUid::new(i),
                moving_average: f64::from(n - i),
            })
            .collect(),
    }
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("weight_allocation");
    let allocator = WeightAllocator::from_config(&ScoringConfig::default());

    for n in [1u16, 16, 64, 255].iter() {
        let ranking = ranking(*n);
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, _| {
            b.iter(|| black_box(allocator.allocate(&ranking)));
        });
    }
    group.finish();
}

fn bench_history_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_update");

    for n in [64u16, 255].iter() {
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            let mut tracker = HistoryTracker::new(HistoryConfig::default());
            b.iter(|| {
                for uid in 0..n {
                    tracker.update(MinerUid::new(uid), black_box(1.25));
                }
            });
        });
    }
    group.finish();
}

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranking");
    let lists = ListSnapshot::empty();

    for n in [64u16, 255].iter() {
        let registry: Vec<RegisteredNeuron> = (0..*n)
            .map(|i| RegisteredNeuron::miner(i, format!("hk_{}", i)))
            .collect();
        let mut tracker = HistoryTracker::new(HistoryConfig::default());
        for i in 0..*n {
            tracker.update(MinerUid::new(i), f64::from(i % 17) - 5.0);
        }
        let ranker = Ranker::new(MinerUid::new(0));

        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, _| {
            b.iter(|| black_box(ranker.rank(&registry, &tracker, &lists)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_allocate, bench_history_update, bench_rank);
criterion_main!(benches);
