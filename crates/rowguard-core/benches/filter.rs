//! Record filtering benchmarks.
//!
//! Measures record-rule evaluation over batches of candidate records, and
//! domain parsing with and without the cache.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rowguard_core::{
    AccessRule, DomainCache, FieldDef, FieldKind, ModelDef, Operation, PolicyBundle, PolicyEngine,
    Principal, RecordRuleDef,
};
use rowguard_domain::{parse, MemoryRecord, MemoryRecords, RecordId};

const RULE: &str = "['|', ('owner', '=', 42), '&', ('price', '>', 10), ('contact.phone', '!=', '')]";

fn engine() -> PolicyEngine {
    let bundle = PolicyBundle::new()
        .with_model(ModelDef::new("partner").with_field(FieldDef::new("phone", FieldKind::Char)))
        .with_model(
            ModelDef::new("doc")
                .with_field(FieldDef::new("owner", FieldKind::Integer))
                .with_field(FieldDef::new("price", FieldKind::Float))
                .with_field(FieldDef::many2one("contact", "partner")),
        )
        .with_access_rule(AccessRule::new("doc_read", "doc").allow(Operation::Read))
        .with_record_rule(RecordRuleDef::new("visible", "doc", RULE).on(Operation::Read))
        .with_record_rule(
            RecordRuleDef::new("sales", "doc", "[('price', '<', 500)]")
                .for_group("sales")
                .on(Operation::Read),
        );
    PolicyEngine::with_bundle(&bundle).unwrap()
}

/// Documents 1..=count, each pointing at one of 10 partners.
fn records(count: i64) -> (MemoryRecords, Vec<RecordId>) {
    let mut records = MemoryRecords::new();
    for partner in 0..10 {
        let phone = if partner % 3 == 0 { "" } else { "555-0100" };
        records.insert(MemoryRecord::new(1_000_000 + partner).with_field("phone", phone));
    }
    let mut ids = Vec::with_capacity(count as usize);
    for id in 1..=count {
        records.insert(
            MemoryRecord::new(id)
                .with_field("owner", id % 50)
                .with_field("price", (id % 1000) as f64)
                .with_field("contact", RecordId(1_000_000 + id % 10)),
        );
        ids.push(RecordId(id));
    }
    (records, ids)
}

fn bench_filter_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter/records");
    let engine = engine();
    let plain = Principal::new("u");
    let seller = Principal::new("s").with_group("sales");

    for size in [100, 1000, 10000] {
        let (records, ids) = records(size);

        group.bench_with_input(BenchmarkId::new("global", size), &ids, |b, ids| {
            b.iter(|| {
                let allowed = engine
                    .filter_records(&plain, "doc", Operation::Read, ids, &records)
                    .unwrap();
                black_box(allowed.len());
            });
        });

        group.bench_with_input(BenchmarkId::new("global+group", size), &ids, |b, ids| {
            b.iter(|| {
                let allowed = engine
                    .filter_records(&seller, "doc", Operation::Read, ids, &records)
                    .unwrap();
                black_box(allowed.len());
            });
        });
    }

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter/parse");

    group.bench_function("uncached", |b| {
        b.iter(|| black_box(parse(black_box(RULE)).unwrap()));
    });

    group.bench_function("cached", |b| {
        let cache = DomainCache::default();
        b.iter(|| black_box(cache.get_or_parse(black_box(RULE), 1).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_filter_records, bench_parse);

criterion_main!(benches);
