//! Criterion benchmarks for weight adaptation.

use cl_core::{adapt_state_dict, adapt_weights, HostTensor, StateDict};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn filled(shape: Vec<usize>, value: f32) -> HostTensor {
    HostTensor::full(shape, value)
}

/// A detector-sized state dict whose class head grew from 6 to 11 outputs.
fn make_state_dicts() -> (StateDict, StateDict) {
    let mut old = StateDict::new();
    let mut live = StateDict::new();
    for layer in 0..6 {
        let name = format!("decoder.layers.{}.linear.weight", layer);
        old.insert(name.clone(), filled(vec![256, 256], 0.1));
        live.insert(name, filled(vec![256, 256], 0.0));
        let head = format!("class_embed.{}.weight", layer);
        old.insert(head.clone(), filled(vec![6, 256], 0.1));
        live.insert(head, filled(vec![11, 256], 0.0));
    }
    old.insert("backbone.conv.weight".into(), filled(vec![64, 32, 3, 3, 3], 0.1));
    live.insert("backbone.conv.weight".into(), filled(vec![64, 32, 3, 3, 3], 0.0));
    (old, live)
}

fn bench_adapt_weights(c: &mut Criterion) {
    let mut group = c.benchmark_group("adapt_weights");
    for rows in [16usize, 128, 1024] {
        let old = filled(vec![rows, 256], 1.0);
        let template = filled(vec![rows + rows / 2, 256], 0.0);
        group.throughput(Throughput::Elements((rows * 256) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| black_box(adapt_weights(black_box(&old), black_box(&template))))
        });
    }
    group.finish();

    c.bench_function("adapt_weights_conv3d", |b| {
        let old = filled(vec![32, 16, 3, 3, 3], 1.0);
        let template = filled(vec![48, 16, 3, 3, 3], 0.0);
        b.iter(|| black_box(adapt_weights(black_box(&old), black_box(&template))))
    });
}

fn bench_adapt_state_dict(c: &mut Criterion) {
    let (old, live) = make_state_dicts();
    c.bench_function("adapt_state_dict_detector", |b| {
        b.iter(|| black_box(adapt_state_dict(black_box(&old), black_box(&live))))
    });
}

criterion_group!(benches, bench_adapt_weights, bench_adapt_state_dict);
criterion_main!(benches);
