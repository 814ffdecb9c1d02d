use std::hint::black_box;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use research_gate::gate::lookup_coverage;
use research_gate::normalize::best_match;
use research_gate::{normalize, NewCoverage, Stores};

const SUBJECTS: [&str; 8] = [
    "remote work", "battery supply", "chip exports", "housing prices", "solar adoption", "wage growth",
    "office demand", "ev charging",
];

fn question(i: usize) -> String {
    format!("How does {} affect region {} in year {}?", SUBJECTS[i % SUBJECTS.len()], i / 8, 2000 + i % 25)
}

fn seeded_stores(n: usize) -> Stores {
    let stores = Stores::in_memory();
    let now = Utc::now();
    for i in 0..n {
        stores
            .coverage
            .append(NewCoverage::new("Bench", question(i), Vec::new(), Vec::new(), now))
            .unwrap();
    }
    stores
}

fn bench_best_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("fuzzy_scan/best_match");
    for n in [16usize, 256, 4096] {
        let keys: Vec<String> = (0..n).map(|i| normalize(&question(i))).collect();
        let query = normalize("What is the effect of wage growth on region 3 in year 2011?");
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &keys, |b, keys| {
            b.iter(|| best_match(black_box(&query), keys.iter(), |k| (*k).clone()));
        });
    }
    group.finish();
}

fn bench_lookup_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("fuzzy_scan/lookup_coverage_miss");
    for n in [16usize, 256, 4096] {
        let stores = seeded_stores(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &stores, |b, stores| {
            // Cold topic cache per iteration: exact miss, full listing, full scan.
            b.iter(|| {
                let mut cache = None;
                lookup_coverage(
                    stores.coverage.as_ref(),
                    "Bench",
                    black_box("completely unrelated question text"),
                    &mut cache,
                )
                .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(fuzzy_scan, bench_best_match, bench_lookup_miss);
criterion_main!(fuzzy_scan);
