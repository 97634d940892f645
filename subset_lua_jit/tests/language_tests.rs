//! End-to-end behavior of specialized code: closures, control flow,
//! multiple results, globals and arithmetic.

mod common;

use std::sync::Arc;

use common::*;
use pretty_assertions::assert_eq;
use subset_lua_jit::*;

fn local(slot: usize, value: Expr) -> Stmt {
    Stmt::Local {
        slot,
        value: Some(value),
    }
}

fn assign(slot: usize, value: Expr) -> Stmt {
    Stmt::Assign { slot, value }
}

fn add(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinOp::Add, lhs, rhs)
}

fn make_counter_proto() -> Arc<FunctionPrototype> {
    // function() n = n + 1; return n end
    let inc = FunctionPrototype::builder("inc")
        .upvalue(UpvalueTemplate::new("n"))
        .body(vec![
            Stmt::SetUpvalue {
                index: 0,
                value: add(Expr::upvalue(0), Expr::int(1)),
            },
            Stmt::ret(Expr::upvalue(0)),
        ])
        .build();
    // function make_counter() local n = 0; return function() ... end end
    FunctionPrototype::builder("make_counter")
        .local("n")
        .body(vec![
            local(0, Expr::int(0)),
            Stmt::ret(Expr::function(inc, vec![Capture::Local(0)])),
        ])
        .build()
}

#[test]
fn test_counters_share_their_own_cell() {
    let engine = engine();
    let make = engine.instantiate(&make_counter_proto());

    let a = call1(&engine, &make, vec![]);
    let b = call1(&engine, &make, vec![]);
    assert_eq!(call1(&engine, &a, vec![]), Value::Int(1));
    assert_eq!(call1(&engine, &a, vec![]), Value::Int(2));
    assert_eq!(call1(&engine, &b, vec![]), Value::Int(1));
    assert_eq!(call1(&engine, &a, vec![]), Value::Int(3));
}

#[test]
fn test_loop_closures_capture_each_iteration() {
    let engine = engine();
    let get_i = FunctionPrototype::builder("get_i")
        .upvalue(UpvalueTemplate::new("i"))
        .body(vec![Stmt::ret(Expr::upvalue(0))])
        .build();
    // local t = {}
    // for i = 1, 3 do t[i] = function() return i end end
    // return t[1](), t[2](), t[3]()
    let proto = FunctionPrototype::builder("collect")
        .local("t")
        .local("i")
        .body(vec![
            local(0, Expr::table(vec![])),
            Stmt::NumericFor {
                var: 1,
                start: Expr::int(1),
                limit: Expr::int(3),
                step: None,
                body: vec![Stmt::SetIndex {
                    target: Expr::local(0),
                    key: Expr::local(1),
                    value: Expr::function(get_i, vec![Capture::Local(1)]),
                }],
            },
            Stmt::Return(
                (1..=3)
                    .map(|n| Expr::call(Expr::index(Expr::local(0), Expr::int(n)), vec![]))
                    .collect(),
            ),
        ])
        .build();
    let f = engine.instantiate(&proto);

    let out = engine.call(&f, vec![]).unwrap();
    assert_eq!(out, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn test_sealed_upvalue_enters_the_signature() {
    let engine = engine();
    // function(x) return x * k end, with k never reassigned
    let scale = FunctionPrototype::builder("scale")
        .param("x")
        .upvalue(UpvalueTemplate::new("k").sealed())
        .body(vec![Stmt::ret(Expr::binary(
            BinOp::Mul,
            Expr::local(0),
            Expr::upvalue(0),
        ))])
        .build();
    let by_float =
        engine.instantiate_with(&scale, vec![Arc::new(UpvalueCell::new(Value::Float(2.0)))]);
    let by_int = engine.instantiate_with(&scale, vec![Arc::new(UpvalueCell::new(Value::Int(3)))]);

    assert_eq!(call1(&engine, &by_float, vec![Value::Float(1.5)]), Value::Float(3.0));
    assert_eq!(call1(&engine, &by_int, vec![Value::Float(1.5)]), Value::Float(4.5));

    let mut upvalue_types: Vec<Vec<Type>> = scale
        .cache()
        .signatures()
        .into_iter()
        .map(|key| key.upvalue_types)
        .collect();
    upvalue_types.sort_by_key(|types| format!("{:?}", types));
    assert_eq!(upvalue_types, vec![vec![Type::Float], vec![Type::Integer]]);
}

#[test]
fn test_while_with_break() {
    let engine = engine();
    // local i = 0
    // while true do i = i + 1; if i >= 5 then break end end
    // return i
    let proto = FunctionPrototype::builder("count")
        .local("i")
        .body(vec![
            local(0, Expr::int(0)),
            Stmt::While {
                cond: Expr::bool(true),
                body: vec![
                    assign(0, add(Expr::local(0), Expr::int(1))),
                    Stmt::If {
                        cond: Expr::binary(BinOp::Ge, Expr::local(0), Expr::int(5)),
                        then_block: vec![Stmt::Break],
                        else_block: vec![],
                    },
                ],
            },
            Stmt::ret(Expr::local(0)),
        ])
        .build();
    let f = engine.instantiate(&proto);
    assert_eq!(call1(&engine, &f, vec![]), Value::Int(5));
}

fn sum_loop(start: Expr, limit: Expr, step: Option<Expr>, init: Expr) -> Arc<FunctionPrototype> {
    // local s = init; for i = start, limit, step do s = s + i end; return s
    FunctionPrototype::builder("sum")
        .param("p")
        .local("s")
        .local("i")
        .body(vec![
            local(1, init),
            Stmt::NumericFor {
                var: 2,
                start,
                limit,
                step,
                body: vec![assign(1, add(Expr::local(1), Expr::local(2)))],
            },
            Stmt::ret(Expr::local(1)),
        ])
        .build()
}

#[test]
fn test_numeric_for_variants() {
    let engine = engine();

    let ints = sum_loop(Expr::int(10), Expr::int(1), Some(Expr::int(-3)), Expr::int(0));
    let f = engine.instantiate(&ints);
    assert_eq!(call1(&engine, &f, vec![Value::Nil]), Value::Int(22));

    let floats = sum_loop(
        Expr::int(1),
        Expr::int(2),
        Some(Expr::float(0.5)),
        Expr::float(0.0),
    );
    let f = engine.instantiate(&floats);
    assert_eq!(call1(&engine, &f, vec![Value::Nil]), Value::Float(4.5));

    // Float limit on an integer loop is floored.
    let floored = sum_loop(Expr::int(1), Expr::float(3.9), None, Expr::int(0));
    let f = engine.instantiate(&floored);
    assert_eq!(call1(&engine, &f, vec![Value::Nil]), Value::Int(6));

    // Limit only known at run time.
    let dynamic = sum_loop(Expr::int(1), Expr::local(0), None, Expr::int(0));
    let f = engine.instantiate(&dynamic);
    assert_eq!(call1(&engine, &f, vec![Value::Int(4)]), Value::Int(10));
    assert_eq!(call1(&engine, &f, vec![Value::Float(2.5)]), Value::Int(3));
}

#[test]
fn test_numeric_for_errors() {
    let engine = engine();

    let zero = sum_loop(Expr::int(1), Expr::int(10), Some(Expr::int(0)), Expr::int(0));
    let f = engine.instantiate(&zero);
    let err = engine.call(&f, vec![Value::Nil]).unwrap_err();
    assert_eq!(err.to_string(), "'for' step is zero");

    let bad_limit = sum_loop(Expr::int(1), Expr::local(0), None, Expr::int(0));
    let f = engine.instantiate(&bad_limit);
    let err = engine.call(&f, vec![Value::from("ten")]).unwrap_err();
    assert_eq!(err.to_string(), "TypeError: 'for' limit must be a number");
}

#[test]
fn test_multiple_results() {
    let engine = engine();
    let pair = FunctionPrototype::builder("pair")
        .body(vec![Stmt::Return(vec![
            Expr::int(1),
            Expr::str("a"),
            Expr::bool(true),
        ])])
        .build();
    engine.set_global("pair", engine.instantiate(&pair));
    let call_pair = || Expr::call(Expr::global("pair"), vec![]);

    // return pair()
    let forward = FunctionPrototype::builder("forward")
        .body(vec![Stmt::Return(vec![call_pair()])])
        .build();
    // local x = pair(); return x
    let first = FunctionPrototype::builder("first")
        .local("x")
        .body(vec![local(0, call_pair()), Stmt::ret(Expr::local(0))])
        .build();
    // return pair(), 5
    let mixed = FunctionPrototype::builder("mixed")
        .body(vec![Stmt::Return(vec![call_pair(), Expr::int(5)])])
        .build();
    // pair() as a statement, then nothing
    let discard = FunctionPrototype::builder("discard")
        .body(vec![Stmt::Expr(call_pair())])
        .build();

    let run = |proto: &Arc<FunctionPrototype>| engine.call(&engine.instantiate(proto), vec![]).unwrap();
    assert_eq!(
        run(&forward),
        vec![Value::Int(1), Value::from("a"), Value::Bool(true)]
    );
    assert_eq!(run(&first), vec![Value::Int(1)]);
    assert_eq!(run(&mixed), vec![Value::Int(1), Value::Int(5)]);
    assert_eq!(run(&discard), Vec::<Value>::new());

    // Forwarding and truncating sites bind separate specializations.
    assert_eq!(pair.cache().len(), 2);
}

#[test]
fn test_globals_written_by_code() {
    let engine = engine();
    // G = G .. "!"
    let proto = FunctionPrototype::builder("shout")
        .body(vec![Stmt::set_global(
            "G",
            Expr::binary(BinOp::Concat, Expr::global("G"), Expr::str("!")),
        )])
        .build();
    let f = engine.instantiate(&proto);
    engine.set_global("G", Value::from("hi"));
    engine.call(&f, vec![]).unwrap();
    engine.call(&f, vec![]).unwrap();
    assert_eq!(engine.get_global("G"), Value::from("hi!!"));
}

#[test]
fn test_logical_operators_yield_operands() {
    let engine = engine();
    // function(a, b) return a and b, a or b, not a end
    let proto = FunctionPrototype::builder("logic")
        .param("a")
        .param("b")
        .body(vec![Stmt::Return(vec![
            Expr::logical(LogicalOp::And, Expr::local(0), Expr::local(1)),
            Expr::logical(LogicalOp::Or, Expr::local(0), Expr::local(1)),
            Expr::unary(UnOp::Not, Expr::local(0)),
        ])])
        .build();
    let f = engine.instantiate(&proto);

    let out = engine.call(&f, vec![Value::Nil, Value::Int(2)]).unwrap();
    assert_eq!(out, vec![Value::Nil, Value::Int(2), Value::Bool(true)]);
    let out = engine.call(&f, vec![Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(out, vec![Value::Int(2), Value::Int(1), Value::Bool(false)]);
    let out = engine.call(&f, vec![Value::Bool(true), Value::Bool(false)]).unwrap();
    assert_eq!(out, vec![Value::Bool(false), Value::Bool(true), Value::Bool(false)]);
}

#[test]
fn test_arithmetic_and_comparison() {
    let engine = engine();
    // function(a, b) return a / b, a // b, a % b, a < b, a == b end
    let proto = FunctionPrototype::builder("arith")
        .param("a")
        .param("b")
        .body(vec![Stmt::Return(vec![
            Expr::binary(BinOp::Div, Expr::local(0), Expr::local(1)),
            Expr::binary(BinOp::IntDiv, Expr::local(0), Expr::local(1)),
            Expr::binary(BinOp::Mod, Expr::local(0), Expr::local(1)),
            Expr::binary(BinOp::Lt, Expr::local(0), Expr::local(1)),
            Expr::binary(BinOp::Eq, Expr::local(0), Expr::local(1)),
        ])])
        .build();
    let f = engine.instantiate(&proto);

    let out = engine.call(&f, vec![Value::Int(7), Value::Int(2)]).unwrap();
    assert_eq!(
        out,
        vec![
            Value::Float(3.5),
            Value::Int(3),
            Value::Int(1),
            Value::Bool(false),
            Value::Bool(false)
        ]
    );

    // Mixed operands widen to float.
    let out = engine.call(&f, vec![Value::Int(2), Value::Float(2.0)]).unwrap();
    assert_eq!(out[0], Value::Float(1.0));
    assert_eq!(out[3], Value::Bool(false));
    assert_eq!(out[4], Value::Bool(true));

    let err = engine.call(&f, vec![Value::Int(1), Value::Int(0)]).unwrap_err();
    assert!(err.to_string().starts_with("ArithmeticError"), "{}", err);

    let err = engine.call(&f, vec![Value::from("x"), Value::Int(1)]).unwrap_err();
    assert!(err.to_string().starts_with("TypeError"), "{}", err);
}

#[test]
fn test_mixed_comparisons_are_exact() {
    let engine = engine();
    // function(a, b) return a == b, a < b, a > b end
    let proto = FunctionPrototype::builder("cmp")
        .param("a")
        .param("b")
        .body(vec![Stmt::Return(vec![
            Expr::binary(BinOp::Eq, Expr::local(0), Expr::local(1)),
            Expr::binary(BinOp::Lt, Expr::local(0), Expr::local(1)),
            Expr::binary(BinOp::Gt, Expr::local(0), Expr::local(1)),
        ])])
        .build();
    let f = engine.instantiate(&proto);
    let odd = (1i64 << 53) + 1;
    let even = (1i64 << 53) as f64;

    let out = engine.call(&f, vec![Value::Int(odd), Value::Float(even)]).unwrap();
    assert_eq!(out, vec![Value::Bool(false), Value::Bool(false), Value::Bool(true)]);
    let out = engine.call(&f, vec![Value::Float(even), Value::Int(odd)]).unwrap();
    assert_eq!(out, vec![Value::Bool(false), Value::Bool(true), Value::Bool(false)]);
    let out = engine.call(&f, vec![Value::Int(odd - 1), Value::Float(even)]).unwrap();
    assert_eq!(out, vec![Value::Bool(true), Value::Bool(false), Value::Bool(false)]);
    assert_eq!(proto.cache().len(), 2);
}

#[test]
fn test_invalid_prototypes_fail_to_compile() {
    let engine = engine();

    let stray_break = FunctionPrototype::builder("bad").body(vec![Stmt::Break]).build();
    let err = engine
        .call(&engine.instantiate(&stray_break), vec![])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "InternalError: compilation failed: break outside of a loop in bad"
    );

    let bad_slot = FunctionPrototype::builder("slot")
        .body(vec![Stmt::ret(Expr::local(3))])
        .build();
    let err = engine
        .call(&engine.instantiate(&bad_slot), vec![])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "InternalError: compilation failed: local slot 3 out of range in slot (0 locals)"
    );
    // A failed compilation is retried on the next request.
    assert!(engine.call(&engine.instantiate(&bad_slot), vec![]).is_err());
    assert_eq!(bad_slot.cache().compile_count(), 2);
    assert!(bad_slot.cache().is_empty());
}

#[test]
fn test_stats_snapshot_serializes() {
    let engine = engine();
    let add = engine.instantiate(&add_proto());
    call1(&engine, &add, vec![Value::Int(1), Value::Int(2)]);

    let stats = engine.stats().snapshot();
    assert_eq!(stats.compilations, 1);
    let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
    assert_eq!(json["compilations"], 1);
    assert_eq!(json["relinks"], 0);
}
