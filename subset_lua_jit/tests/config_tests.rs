//! Engine configuration loaded from files and its effect on linking.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::*;
use pretty_assertions::assert_eq;
use subset_lua_jit::config::TYPE_CHANGE_LIMIT_ENV;
use subset_lua_jit::*;

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// for i = 1, n do local g = function() return i end; s = s + g() end
fn fresh_closure_loop(n: i64) -> Arc<FunctionPrototype> {
    let inner = FunctionPrototype::builder("inner")
        .upvalue(UpvalueTemplate::new("i"))
        .body(vec![Stmt::ret(Expr::upvalue(0))])
        .build();
    FunctionPrototype::builder("loop")
        .local("s")
        .local("i")
        .local("g")
        .body(vec![
            Stmt::Local {
                slot: 0,
                value: Some(Expr::int(0)),
            },
            Stmt::NumericFor {
                var: 1,
                start: Expr::int(1),
                limit: Expr::int(n),
                step: None,
                body: vec![
                    Stmt::Local {
                        slot: 2,
                        value: Some(Expr::function(inner, vec![Capture::Local(1)])),
                    },
                    Stmt::Assign {
                        slot: 0,
                        value: Expr::binary(
                            BinOp::Add,
                            Expr::local(0),
                            Expr::call(Expr::local(2), vec![]),
                        ),
                    },
                ],
            },
            Stmt::ret(Expr::local(0)),
        ])
        .build()
}

#[test]
fn test_config_file_sets_relink_limit() {
    init_logging();
    let file = write_config("relink_limit = 2\ntype_change_limit = 1\n");
    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.relink_limit, 2);
    assert_eq!(config.type_change_limit, 1);
    assert_eq!(config.max_inference_iterations, 8);

    let engine = Engine::new(config);
    let proto = fresh_closure_loop(6);
    let f = engine.instantiate(&proto);
    assert_eq!(call1(&engine, &f, vec![]), Value::Int(21));

    let snapshot = site(&proto, 0).snapshot();
    assert_eq!(snapshot.relinks, 3);
    assert_eq!(snapshot.guard, Some(GuardKind::Prototype));
}

#[test]
fn test_zero_relink_limit_links_prototypes_immediately() {
    init_logging();
    let engine = Engine::new(EngineConfig {
        relink_limit: 0,
        ..EngineConfig::default()
    });
    let proto = fresh_closure_loop(4);
    let f = engine.instantiate(&proto);
    assert_eq!(call1(&engine, &f, vec![]), Value::Int(10));

    let snapshot = site(&proto, 0).snapshot();
    assert_eq!(snapshot.relinks, 1);
    assert_eq!(snapshot.guard, Some(GuardKind::Prototype));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn test_malformed_file_is_a_parse_error() {
    let file = write_config("relink_limit = \"five\"\n");
    let err = EngineConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_config_serializes_back_to_toml() {
    let config = EngineConfig {
        relink_limit: 9,
        ..EngineConfig::default()
    };
    let text = toml::to_string(&config).unwrap();
    assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
}

// The only test in this binary that touches the process environment.
#[test]
fn test_environment_overrides_defaults_and_files() {
    std::env::set_var(TYPE_CHANGE_LIMIT_ENV, "4");
    let from_env = EngineConfig::from_env();
    let file = write_config("relink_limit = 2\ntype_change_limit = 1\n");
    let layered = EngineConfig::from_file(file.path()).and_then(EngineConfig::with_env_overrides);
    std::env::remove_var(TYPE_CHANGE_LIMIT_ENV);

    assert_eq!(
        from_env.unwrap(),
        EngineConfig {
            type_change_limit: 4,
            ..EngineConfig::default()
        }
    );
    let layered = layered.unwrap();
    assert_eq!(layered.relink_limit, 2);
    assert_eq!(layered.type_change_limit, 4);
}
