//! Benchmarks for whitelist matching.
//!
//! Measures how quickly a resolved name is checked against the patterns.

use criterion::{BenchmarkId, Criterion, Throughput, black_box};

use gatedns::filter::{DomainFilter, FilterSet};

fn whitelist() -> FilterSet {
    let mut patterns: Vec<String> = (0..200)
        .map(|i| format!(r"(^|\.)service{}\.corp\.example$", i))
        .collect();
    patterns.push(r"(^|\.)example\.com$".to_string());
    patterns.push(r"^10\.".to_string());
    FilterSet::from_patterns(patterns.iter().map(String::as_str))
}

fn bench_allows(c: &mut Criterion) {
    let filter = DomainFilter::new(whitelist(), FilterSet::empty());

    let mut group = c.benchmark_group("filter");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("allows", "first_pattern"), |b| {
        b.iter(|| filter.allows(black_box("service0.corp.example.")))
    });

    group.bench_function(BenchmarkId::new("allows", "late_match"), |b| {
        b.iter(|| filter.allows(black_box("www.example.com.")))
    });

    group.bench_function(BenchmarkId::new("allows", "ip_literal"), |b| {
        b.iter(|| filter.allows(black_box("10.1.2.3")))
    });

    group.bench_function(BenchmarkId::new("allows", "miss"), |b| {
        b.iter(|| filter.allows(black_box("a.b.c.d.e.f.example.org.")))
    });

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_allows(&mut criterion);
    criterion.final_summary();
}
