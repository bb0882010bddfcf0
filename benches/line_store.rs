use altre_doc::{Change, Engine, Pos};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn bench_insert_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_store_insert");
    group.bench_function("sequential_line_insert", |b| {
        b.iter_batched(
            || {
                let mut engine = Engine::default();
                let doc = engine.create_doc("");
                (engine, doc)
            },
            |(mut engine, doc)| {
                for i in 0..1024 {
                    engine.apply(doc, Change::insert(Pos::new(i, 0), "a\n")).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let text = (0..20_000).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    let mut engine = Engine::default();
    let doc = engine.create_doc(&text);

    let mut group = c.benchmark_group("line_store_lookup");
    group.bench_function("line_and_height", |b| {
        b.iter(|| {
            let d = engine.doc(doc).unwrap();
            let mut total = 0.0;
            for n in (0..20_000).step_by(97) {
                total += d.height_at_line(n).unwrap();
                total += d.line_at_height(n as f64) as f64;
            }
            total
        });
    });
    group.finish();
}

criterion_group!(benches, bench_insert_sequential, bench_lookup);
criterion_main!(benches);
