//! Shared helpers for integration tests
// Consumed selectively by the integration test files; not every helper is
// referenced from every test target.
#![allow(dead_code)]

use std::sync::Arc;

use subset_lua_jit::*;

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn engine() -> Arc<Engine> {
    init_logging();
    Engine::with_default_config()
}

/// `function add(a, b) return a + b end`
pub fn add_proto() -> Arc<FunctionPrototype> {
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

/// `function cat(a, b) return a .. b end`
pub fn concat_proto() -> Arc<FunctionPrototype> {
    FunctionPrototype::builder("cat")
        .param("a")
        .param("b")
        .body(vec![Stmt::ret(Expr::binary(
            BinOp::Concat,
            Expr::local(0),
            Expr::local(1),
        ))])
        .build()
}

/// Parameterless driver: `return <callee>(<args>...)`, everything read
/// from globals so the call site has no static argument types.
pub fn global_driver(callee: &str, args: &[&str]) -> Arc<FunctionPrototype> {
    FunctionPrototype::builder("driver")
        .body(vec![Stmt::Return(vec![Expr::call(
            Expr::global(callee),
            args.iter().map(|name| Expr::global(name)).collect(),
        )])])
        .build()
}

/// Call and expect exactly one result.
pub fn call1(engine: &Arc<Engine>, f: &Value, args: Vec<Value>) -> Value {
    let mut out = engine
        .call(f, args)
        .unwrap_or_else(|e| panic!("call failed: {}", e));
    assert_eq!(out.len(), 1, "expected one result, got {:?}", out);
    out.remove(0)
}

/// The only specialization of `proto`.
pub fn only_specialization(proto: &FunctionPrototype) -> Arc<Specialization> {
    let specs = proto.cache().specializations();
    assert_eq!(specs.len(), 1, "expected one specialization");
    specs.into_iter().next().expect("one specialization")
}

/// The `index`-th call site of the only specialization of `proto`.
pub fn site(proto: &FunctionPrototype, index: usize) -> Arc<CallSite> {
    Arc::clone(&only_specialization(proto).call_sites()[index])
}
