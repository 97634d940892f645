//! Compilation and linking from several threads at once.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use subset_lua_jit::*;

const THREADS: usize = 8;

#[test]
fn test_concurrent_requests_compile_once() {
    let engine = engine();
    let proto = add_proto();
    let barrier = Barrier::new(THREADS);

    let specializations: Vec<Arc<Specialization>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    proto
                        .specialize(&engine, vec![Type::Float, Type::Float], vec![], false)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let first = &specializations[0];
    assert!(specializations.iter().all(|s| Arc::ptr_eq(s, first)));
    assert_eq!(proto.cache().compile_count(), 1);
    assert_eq!(engine.stats().snapshot().compilations, 1);
}

#[test]
fn test_concurrent_calls_through_one_site() {
    let engine = engine();
    let add = add_proto();
    engine.set_global("add", engine.instantiate(&add));
    // function drive(x) return add(x, 1) end
    let driver = FunctionPrototype::builder("drive")
        .param("x")
        .body(vec![Stmt::Return(vec![Expr::call(
            Expr::global("add"),
            vec![Expr::local(0), Expr::int(1)],
        )])])
        .build();
    let f = engine.instantiate(&driver);
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let (engine, f, barrier) = (&engine, &f, &barrier);
            scope.spawn(move || {
                barrier.wait();
                for i in 0..100i64 {
                    let x = (t as i64) * 1000 + i;
                    assert_eq!(call1(engine, f, vec![Value::Int(x)]), Value::Int(x + 1));
                }
            });
        }
    });

    // Racing links may each publish; all of them bind the same signature.
    let site = site(&driver, 0);
    assert!(site.relinks() >= 1);
    assert_eq!(site.snapshot().type_changes, 0);
    assert_eq!(add.cache().len(), 1);
    assert_eq!(driver.cache().len(), 1);
}
