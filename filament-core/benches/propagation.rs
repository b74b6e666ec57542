use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use filament_core::Runtime;

criterion_main!(benches);
criterion_group!(benches, criterion_benchmark);

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("signal_effect 10000", |b| b.iter(|| signal_effect_n(10_000)));
    c.bench_function("memo_chain 100x100", |b| b.iter(|| memo_chain_n(100, 100)));
    c.bench_function("diamond_fan 100x100", |b| b.iter(|| diamond_fan_n(100, 100)));
    c.bench_function("batched_sources 100x100", |b| {
        b.iter(|| batched_sources_n(100, 100))
    });
}

fn signal_effect_n(n: usize) {
    let rt = Runtime::new();
    let cell = rt.create_signal(0);
    let sum = Rc::new(Cell::new(0));

    let (c, s) = (cell.clone(), sum.clone());
    rt.create_effect(move || s.set(s.get() + c.get()));

    for i in 1..n {
        cell.set(i);
    }
    black_box(sum.get());
}

fn memo_chain_n(depth: usize, writes: usize) {
    let rt = Runtime::new();
    let cell = rt.create_signal(0);

    let c = cell.clone();
    let mut last = rt.create_memo(move || c.get() + 1);
    for _ in 1..depth {
        let prev = last.clone();
        last = rt.create_memo(move || prev.get() + 1);
    }

    let out = Rc::new(Cell::new(0));
    let (l, o) = (last.clone(), out.clone());
    rt.create_effect(move || o.set(l.get()));

    for i in 0..writes {
        cell.set(i);
    }
    black_box(out.get());
}

fn diamond_fan_n(width: usize, writes: usize) {
    let rt = Runtime::new();
    let cell = rt.create_signal(0);

    let memos: Vec<_> = (0..width)
        .map(|k| {
            let c = cell.clone();
            rt.create_memo(move || c.get() + k)
        })
        .collect();

    let out = Rc::new(Cell::new(0));
    let o = out.clone();
    rt.create_effect(move || o.set(memos.iter().map(|m| m.get()).sum::<usize>()));

    for i in 0..writes {
        cell.set(i);
    }
    black_box(out.get());
}

fn batched_sources_n(sources: usize, rounds: usize) {
    let rt = Runtime::new();
    let cells: Vec<_> = (0..sources).map(|_| rt.create_signal(0)).collect();

    let out = Rc::new(Cell::new(0));
    let (cs, o) = (cells.clone(), out.clone());
    rt.create_effect(move || o.set(cs.iter().map(|c| c.get()).sum::<usize>()));

    for round in 1..=rounds {
        rt.batch(|| {
            for cell in &cells {
                cell.set(round);
            }
        });
    }
    black_box(out.get());
}
