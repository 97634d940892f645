//! Call-site benchmarks: linked calls, a numeric loop and generic calls.
//!
//! Run with: cargo bench --bench call_site

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use subset_lua_jit::*;

fn add_proto() -> Arc<FunctionPrototype> {
    FunctionPrototype::builder("add")
        .param("a")
        .param("b")
        .body(vec![Stmt::ret(Expr::binary(
            BinOp::Add,
            Expr::local(0),
            Expr::local(1),
        ))])
        .build()
}

/// `function drive(x, y) return add(x, y) end`
fn driver_proto() -> Arc<FunctionPrototype> {
    FunctionPrototype::builder("drive")
        .param("x")
        .param("y")
        .body(vec![Stmt::Return(vec![Expr::call(
            Expr::global("add"),
            vec![Expr::local(0), Expr::local(1)],
        )])])
        .build()
}

/// `local s = 0; for i = 1, n do s = s + i end; return s`
fn loop_proto() -> Arc<FunctionPrototype> {
    FunctionPrototype::builder("sum")
        .param("n")
        .local("s")
        .local("i")
        .body(vec![
            Stmt::Local {
                slot: 1,
                value: Some(Expr::int(0)),
            },
            Stmt::NumericFor {
                var: 2,
                start: Expr::int(1),
                limit: Expr::local(0),
                step: None,
                body: vec![Stmt::Assign {
                    slot: 1,
                    value: Expr::binary(BinOp::Add, Expr::local(1), Expr::local(2)),
                }],
            },
            Stmt::ret(Expr::local(1)),
        ])
        .build()
}

fn bench_linked_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("linked_call");
    let engine = Engine::with_default_config();
    engine.set_global("add", engine.instantiate(&add_proto()));
    let drive = engine.instantiate(&driver_proto());

    group.bench_function("float_add", |b| {
        b.iter(|| {
            black_box(
                engine
                    .call(&drive, vec![Value::Float(1.5), Value::Float(2.5)])
                    .unwrap(),
            )
        });
    });

    group.bench_function("int_add", |b| {
        b.iter(|| {
            black_box(
                engine
                    .call(&drive, vec![Value::Int(1), Value::Int(2)])
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_numeric_loop(c: &mut Criterion) {
    let engine = Engine::with_default_config();
    let sum = engine.instantiate(&loop_proto());

    c.bench_function("numeric_loop_1000", |b| {
        b.iter(|| black_box(engine.call(&sum, vec![Value::Int(1000)]).unwrap()));
    });
}

fn bench_specialize_cold(c: &mut Criterion) {
    let engine = Engine::with_default_config();

    c.bench_function("specialize_cold", |b| {
        b.iter(|| {
            let proto = add_proto();
            black_box(
                proto
                    .specialize(&engine, vec![Type::Float, Type::Float], vec![], false)
                    .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_linked_call,
    bench_numeric_loop,
    bench_specialize_cold
);
criterion_main!(benches);
