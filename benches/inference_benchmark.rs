//! Inference benchmarks over generated programs.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use moca_infer::compiler::ast::{AstBuilder, BinaryOp, Item, Program};
use moca_infer::{EngineConfig, analyze};

/// `f0(x) = x + x`, `fi(x) = f{i-1}(x) + x`, `main() = f{n-1}(1)`.
fn call_chain(n: usize) -> Program {
    let mut b = AstBuilder::new();
    let mut items = Vec::new();
    for i in 0..n {
        let lhs = if i == 0 {
            b.ident("x")
        } else {
            let x = b.ident("x");
            b.call(&format!("f{}", i - 1), vec![x])
        };
        let x = b.ident("x");
        let sum = b.binary(BinaryOp::Add, lhs, x);
        let ret = b.ret(sum);
        items.push(Item::Function(b.function(&format!("f{}", i), &["x"], vec![ret])));
    }
    let one = b.int(1);
    let call = b.call(&format!("f{}", n - 1), vec![one]);
    let ret = b.ret(call);
    items.push(Item::Function(b.function("main", &[], vec![ret])));
    Program { items }
}

/// `n` classes with an `area` method, each passed to one generic function.
fn wide_classes(n: usize) -> Program {
    let mut b = AstBuilder::new();
    let mut items = Vec::new();
    let mut calls = Vec::new();
    for i in 0..n {
        let me = b.ident("self");
        let side = b.field(me, "side");
        let me = b.ident("self");
        let other = b.field(me, "side");
        let product = b.binary(BinaryOp::Mul, side, other);
        let ret = b.ret(product);
        let area = b.function("area", &[], vec![ret]);
        let name = format!("Shape{}", i);
        items.push(Item::Class(b.class(&name, &[("side", "int")], vec![area])));

        let two = b.int(2);
        let value = b.call(&name, vec![two]);
        let call = b.call("measure", vec![value]);
        calls.push(b.stmt(call));
    }
    let s = b.ident("s");
    let area = b.method(s, "area", vec![]);
    let ret = b.ret(area);
    items.push(Item::Function(b.function("measure", &["s"], vec![ret])));
    items.push(Item::Function(b.function("main", &[], calls)));
    Program { items }
}

/// A list appended to `n` times with alternating element types.
fn appended_list(n: usize) -> Program {
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let list = b.list(vec![one]);
    let mut body = vec![b.let_("xs", list)];
    for i in 0..n {
        let xs = b.ident("xs");
        let value = if i % 2 == 0 { b.string("s") } else { b.int(i as i64) };
        let append = b.method(xs, "append", vec![value]);
        body.push(b.stmt(append));
    }
    let xs = b.ident("xs");
    let zero = b.int(0);
    let element = b.index(xs, zero);
    let format = b.method(element, "format", vec![]);
    body.push(b.ret(format));
    Program {
        items: vec![Item::Function(b.function("main", &[], body))],
    }
}

fn bench_call_chain(c: &mut Criterion) {
    let config = EngineConfig::default();
    let mut group = c.benchmark_group("analyze/call_chain");
    for size in [10, 50, 200] {
        let program = call_chain(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &program, |b, program| {
            b.iter(|| black_box(analyze(black_box(program), &config)))
        });
    }
    group.finish();
}

fn bench_wide_classes(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze/wide_classes");
    for parallel in [false, true] {
        let config = EngineConfig {
            parallel,
            ..EngineConfig::default()
        };
        let program = wide_classes(100);
        let label = if parallel { "parallel" } else { "sequential" };
        group.bench_with_input(BenchmarkId::new(label, 100), &program, |b, program| {
            b.iter(|| black_box(analyze(black_box(program), &config)))
        });
    }
    group.finish();
}

fn bench_appended_list(c: &mut Criterion) {
    let config = EngineConfig::default();
    let program = appended_list(500);
    c.bench_function("analyze/appended_list", |b| {
        b.iter(|| black_box(analyze(black_box(&program), &config)))
    });
}

criterion_group!(
    benches,
    bench_call_chain,
    bench_wide_classes,
    bench_appended_list
);
criterion_main!(benches);
