// Integration tests for the EBS interpreter
//
// These tests build complete programs as ASTs, run them and check the printed
// output and the outcome. Tests cover:
// - Variables, typed declarations and scoping
// - Control flow and the loop guard
// - User functions, named and default arguments, call depth
// - Exceptions: standard, custom, re-raise, locations
// - Arrays, records, bitmaps and JSON
// - Database statements against SQLite and a mock adapter
// - Timers, imports and host builtins

use ebscript::ast::{
    Argument, BinaryOp, Block, Expr, ExceptionHandler, ForLoop, HandlerTarget, Parameter, Program, Stmt, StmtKind,
};
use ebscript::config::DEFAULT_MAX_CALL_DEPTH;
use ebscript::interpreter::{
    ConnectionTarget, DbAdapter, DbConnection, DbCursor, DbError, Interpreter, MaterializedCursor, Row, Value,
};
use ebscript::types::{BitField, BitFields, DataType, RecordType, TypeSpec};
use ebscript::{ErrorType, InterpreterConfig, ScriptException};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn run_with(mut interp: Interpreter, stmts: Vec<Stmt>) -> (Interpreter, Result<(), ScriptException>, String) {
    let out = Arc::new(Mutex::new(Vec::new()));
    interp.set_output(out.clone());
    let result = interp.run_program(&Program::new(stmts));
    let text = String::from_utf8(out.lock().unwrap().clone()).unwrap();
    (interp, result, text)
}

fn run(stmts: Vec<Stmt>) -> (Result<(), ScriptException>, String) {
    let (_, result, text) = run_with(Interpreter::new(), stmts);
    (result, text)
}

fn run_ok(stmts: Vec<Stmt>) -> String {
    let (result, text) = run(stmts);
    if let Err(e) = result {
        panic!("program failed: {}", e);
    }
    text
}

fn run_err(stmts: Vec<Stmt>) -> ScriptException {
    run(stmts).0.expect_err("program should fail")
}

fn add(l: Expr, r: Expr) -> Expr {
    Expr::binary(l, BinaryOp::Add, r)
}

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ebs-it-{}-{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_typed_variables_and_arithmetic() {
    let out = run_ok(vec![
        Stmt::var("x", DataType::Integer, Some(Expr::int(2))),
        Stmt::var("y", DataType::Double, Some(Expr::int(3))),
        Stmt::print(add(Expr::var("x"), Expr::binary(Expr::int(3), BinaryOp::Mul, Expr::int(4)))),
        Stmt::print(Expr::var("Y")),
        Stmt::print(add(Expr::str("x = "), Expr::var("x"))),
    ]);
    assert_eq!(out, "14\n3.0\nx = 2\n");
}

#[test]
fn test_uninitialised_declarations_get_type_defaults() {
    let out = run_ok(vec![
        Stmt::var("i", DataType::Integer, None),
        Stmt::var("s", DataType::String, None),
        Stmt::var("b", DataType::Bool, None),
        Stmt::print(Expr::var("i")),
        Stmt::print(add(Expr::str("["), add(Expr::var("s"), Expr::str("]")))),
        Stmt::print(Expr::var("b")),
    ]);
    assert_eq!(out, "0\n[]\nfalse\n");
}

#[test]
fn test_implicit_narrowing_is_a_type_error() {
    let err = run_err(vec![Stmt::var("x", DataType::Integer, Some(Expr::long(5)))]);
    assert_eq!(err.error_type(), Some(ErrorType::TypeError));

    let err = run_err(vec![
        Stmt::var("x", DataType::Integer, Some(Expr::int(1))),
        Stmt::assign("x", Expr::double(1.5)),
    ]);
    assert_eq!(err.error_type(), Some(ErrorType::TypeError));
}

#[test]
fn test_constants_cannot_be_reassigned() {
    let err = run_err(vec![
        Stmt::constant("limit", DataType::Integer, Expr::int(10)),
        Stmt::assign("limit", Expr::int(11)),
    ]);
    assert_eq!(err.error_type(), Some(ErrorType::AccessError));
}

#[test]
fn test_block_scope_shadows_and_restores() {
    let out = run_ok(vec![
        Stmt::var("x", DataType::Integer, Some(Expr::int(1))),
        Stmt::block(Block::new(vec![
            Stmt::var("x", DataType::Integer, Some(Expr::int(2))),
            Stmt::print(Expr::var("x")),
        ])),
        Stmt::print(Expr::var("x")),
    ]);
    assert_eq!(out, "2\n1\n");
}

#[test]
fn test_block_locals_do_not_leak() {
    let err = run_err(vec![
        Stmt::block(Block::new(vec![Stmt::var("inner", DataType::Integer, Some(Expr::int(1)))])),
        Stmt::print(Expr::var("inner")).at(2),
    ]);
    assert_eq!(err.error_type(), Some(ErrorType::NotFoundError));
    assert_eq!(err.location.line, 2);
}

#[test]
fn test_block_locals_are_gone_after_exception_exit() {
    let (interp, result, out) = run_with(
        Interpreter::new(),
        vec![
            Stmt::try_catch(
                vec![
                    Stmt::var("inner", DataType::Integer, Some(Expr::int(1))),
                    Stmt::raise(ErrorType::MathError, Some(Expr::str("boom"))),
                ],
                vec![ExceptionHandler::named("ANY_ERROR", None, vec![Stmt::print(Expr::str("handled"))])],
            ),
            Stmt::print(Expr::var("inner")).at(5),
        ],
    );
    assert_eq!(out, "handled\n");
    let err = result.unwrap_err();
    assert_eq!(err.error_type(), Some(ErrorType::NotFoundError));
    assert_eq!(err.location.line, 5);
    assert_eq!(interp.env.depth(), 1);
}

#[test]
fn test_block_locals_are_gone_after_break_and_return() {
    let err = run_err(vec![
        Stmt::while_loop(
            Expr::bool(true),
            vec![Stmt::var("inner", DataType::Integer, Some(Expr::int(1))), Stmt::new(StmtKind::Break)],
        ),
        Stmt::print(Expr::var("inner")),
    ]);
    assert_eq!(err.error_type(), Some(ErrorType::NotFoundError));

    let early = Stmt::function(Block::function(
        "early",
        vec![],
        vec![Stmt::var("inner", DataType::Integer, Some(Expr::int(1))), Stmt::ret(Some(Expr::int(7)))],
    ));
    let (interp, result, out) = run_with(
        Interpreter::new(),
        vec![early, Stmt::print(Expr::call("early", vec![])), Stmt::print(Expr::var("inner"))],
    );
    assert_eq!(out, "7\n");
    assert_eq!(result.unwrap_err().error_type(), Some(ErrorType::NotFoundError));
    assert_eq!(interp.env.depth(), 1);
}

#[test]
fn test_undefined_variable_suggests_close_name() {
    let err = run_err(vec![
        Stmt::var("counter", DataType::Integer, Some(Expr::int(1))),
        Stmt::print(Expr::var("countr")),
    ]);
    assert_eq!(err.suggestion.as_deref(), Some("counter"));
}

#[test]
fn test_if_else_and_while_with_break_continue() {
    // prints odd numbers below 7
    let out = run_ok(vec![
        Stmt::var("i", DataType::Integer, Some(Expr::int(0))),
        Stmt::while_loop(
            Expr::bool(true),
            vec![
                Stmt::assign("i", add(Expr::var("i"), Expr::int(1))),
                Stmt::if_else(
                    Expr::binary(Expr::var("i"), BinaryOp::Ge, Expr::int(7)),
                    vec![Stmt::new(StmtKind::Break)],
                    None,
                ),
                Stmt::if_else(
                    Expr::binary(
                        Expr::binary(Expr::var("i"), BinaryOp::Mod, Expr::int(2)),
                        BinaryOp::Eq,
                        Expr::int(0),
                    ),
                    vec![Stmt::new(StmtKind::Continue)],
                    Some(vec![Stmt::print(Expr::var("i"))]),
                ),
            ],
        ),
    ]);
    assert_eq!(out, "1\n3\n5\n");
}

#[test]
fn test_for_loop_runs_update_after_continue() {
    let out = run_ok(vec![
        Stmt::var("total", DataType::Integer, Some(Expr::int(0))),
        Stmt::new(StmtKind::For(ForLoop {
            init: Some(Box::new(Stmt::var("i", DataType::Integer, Some(Expr::int(0))))),
            condition: Some(Expr::binary(Expr::var("i"), BinaryOp::Lt, Expr::int(5))),
            update: Some(Box::new(Stmt::assign("i", add(Expr::var("i"), Expr::int(1))))),
            body: vec![
                Stmt::if_else(
                    Expr::binary(Expr::var("i"), BinaryOp::Eq, Expr::int(2)),
                    vec![Stmt::new(StmtKind::Continue)],
                    None,
                ),
                Stmt::assign("total", add(Expr::var("total"), Expr::var("i"))),
            ],
        })),
        Stmt::print(Expr::var("total")),
    ]);
    assert_eq!(out, "8\n");
}

#[test]
fn test_do_while_runs_body_once() {
    let out = run_ok(vec![Stmt::new(StmtKind::DoWhile {
        body: vec![Stmt::print(Expr::str("once"))],
        condition: Expr::bool(false),
    })]);
    assert_eq!(out, "once\n");
}

#[test]
fn test_conditions_must_be_bool() {
    let err = run_err(vec![Stmt::if_else(Expr::int(1), vec![], None)]);
    assert_eq!(err.error_type(), Some(ErrorType::TypeError));
}

#[test]
fn test_loop_guard_stops_runaway_loops() {
    let config = InterpreterConfig { max_loop_iterations: Some(10), ..InterpreterConfig::default() };
    let (_, result, _) = run_with(
        Interpreter::with_config(config),
        vec![Stmt::while_loop(Expr::bool(true), vec![])],
    );
    assert_eq!(result.unwrap_err().error_type(), Some(ErrorType::ValidationError));
}

#[test]
fn test_foreach_over_array_and_record_keys() {
    let out = run_ok(vec![
        Stmt::var("sum", DataType::Integer, Some(Expr::int(0))),
        Stmt::foreach(
            "n",
            Expr::ArrayLiteral(vec![Expr::int(1), Expr::int(2), Expr::int(3)]),
            vec![Stmt::assign("sum", add(Expr::var("sum"), Expr::var("n")))],
        ),
        Stmt::print(Expr::var("sum")),
        Stmt::var(
            "r",
            DataType::Record,
            Some(Expr::call("json.parse", vec![Expr::str(r#"{"a": 1, "b": 2}"#)])),
        ),
        Stmt::foreach("k", Expr::var("r"), vec![Stmt::print(Expr::var("k"))]),
    ]);
    assert_eq!(out, "6\na\nb\n");
}

#[test]
fn test_chain_comparison_and_short_circuit() {
    let out = run_ok(vec![
        Stmt::print(Expr::Chain {
            operands: vec![Expr::int(1), Expr::int(2), Expr::int(3)],
            ops: vec![BinaryOp::Lt, BinaryOp::Lt],
        }),
        Stmt::print(Expr::Chain {
            operands: vec![Expr::int(3), Expr::int(2), Expr::int(2)],
            ops: vec![BinaryOp::Gt, BinaryOp::Gt],
        }),
        // the right side would divide by zero
        Stmt::print(Expr::binary(
            Expr::bool(false),
            BinaryOp::And,
            Expr::binary(Expr::binary(Expr::int(1), BinaryOp::Div, Expr::int(0)), BinaryOp::Eq, Expr::int(1)),
        )),
    ]);
    assert_eq!(out, "true\nfalse\nfalse\n");
}

#[test]
fn test_division_by_zero_is_math_error() {
    let err = run_err(vec![Stmt::print(Expr::binary(Expr::int(1), BinaryOp::Div, Expr::int(0))).at(4)]);
    assert_eq!(err.error_type(), Some(ErrorType::MathError));
    assert_eq!(err.location.line, 4);
}

fn add_function() -> Stmt {
    Stmt::function(
        Block::function(
            "add",
            vec![Parameter::required("a", DataType::Integer), Parameter::required("b", DataType::Integer)],
            vec![Stmt::ret(Some(add(Expr::var("a"), Expr::var("b"))))],
        )
        .with_return_type(DataType::Integer),
    )
}

#[test]
fn test_functions_are_hoisted() {
    let out = run_ok(vec![Stmt::print(Expr::call("add", vec![Expr::int(2), Expr::int(3)])), add_function()]);
    assert_eq!(out, "5\n");
}

#[test]
fn test_named_and_default_arguments() {
    let greet = Stmt::function(
        Block::function(
            "greet",
            vec![
                Parameter::required("name", DataType::String),
                Parameter::optional("greeting", DataType::String, Some(Expr::str("Hello"))),
            ],
            vec![Stmt::ret(Some(add(Expr::var("greeting"), add(Expr::str(", "), Expr::var("name")))))],
        )
        .with_return_type(DataType::String),
    );
    let out = run_ok(vec![
        greet,
        Stmt::print(Expr::call_with("greet", vec![Argument::named("name", Expr::str("Bob"))])),
        Stmt::print(Expr::call_with(
            "greet",
            vec![Argument::named("greeting", Expr::str("Hi")), Argument::positional(Expr::str("Ann"))],
        )),
    ]);
    assert_eq!(out, "Hello, Bob\nHi, Ann\n");
}

#[test]
fn test_defaults_are_evaluated_at_call_time() {
    // b defaults to a * g, where g is whatever the caller has when it calls
    let scale = Stmt::function(
        Block::function(
            "scale",
            vec![
                Parameter::required("a", DataType::Integer),
                Parameter::optional(
                    "b",
                    DataType::Integer,
                    Some(Expr::binary(Expr::var("a"), BinaryOp::Mul, Expr::var("g"))),
                ),
            ],
            vec![Stmt::ret(Some(Expr::var("b")))],
        )
        .with_return_type(DataType::Integer),
    );
    let out = run_ok(vec![
        scale,
        Stmt::var("g", DataType::Integer, Some(Expr::int(2))),
        Stmt::print(Expr::call("scale", vec![Expr::int(3)])),
        Stmt::assign("g", Expr::int(10)),
        Stmt::print(Expr::call("scale", vec![Expr::int(3)])),
        Stmt::print(Expr::call("scale", vec![Expr::int(3), Expr::int(1)])),
    ]);
    assert_eq!(out, "6\n30\n1\n");
}

#[test]
fn test_defaults_see_earlier_parameters() {
    let label = Stmt::function(
        Block::function(
            "label",
            vec![
                Parameter::required("name", DataType::String),
                Parameter::optional("title", DataType::String, Some(add(Expr::var("name"), Expr::str("!")))),
            ],
            vec![Stmt::ret(Some(Expr::var("title")))],
        )
        .with_return_type(DataType::String),
    );
    let out = run_ok(vec![
        label,
        Stmt::print(Expr::call_with("label", vec![Argument::named("name", Expr::str("bo"))])),
    ]);
    assert_eq!(out, "bo!\n");
}

#[test]
fn test_argument_errors() {
    let err = run_err(vec![add_function(), Stmt::call("add", vec![Expr::int(1)])]);
    assert_eq!(err.error_type(), Some(ErrorType::NotFoundError));
    assert!(err.message.contains("Missing mandatory parameter"));

    let err = run_err(vec![add_function(), Stmt::call("add", vec![Expr::int(1), Expr::int(2), Expr::int(3)])]);
    assert_eq!(err.error_type(), Some(ErrorType::ValidationError));

    let err = run_err(vec![add_function(), Stmt::call("add", vec![Expr::str("x"), Expr::int(2)])]);
    assert_eq!(err.error_type(), Some(ErrorType::TypeError));
}

#[test]
fn test_unknown_function_suggests_close_name() {
    let err = run_err(vec![add_function(), Stmt::call("ad", vec![Expr::int(1), Expr::int(2)])]);
    assert_eq!(err.error_type(), Some(ErrorType::NotFoundError));
    assert_eq!(err.suggestion.as_deref(), Some("add"));
}

#[test]
fn test_callee_sees_caller_variables() {
    let show = Stmt::function(Block::function("show", vec![], vec![Stmt::print(Expr::var("y"))]));
    let out = run_ok(vec![
        show,
        Stmt::block(Block::new(vec![
            Stmt::var("y", DataType::Integer, Some(Expr::int(5))),
            Stmt::call("show", vec![]),
        ])),
    ]);
    assert_eq!(out, "5\n");
}

#[test]
fn test_call_depth_limit() {
    let recurse = Stmt::function(Block::function("down", vec![], vec![Stmt::call("down", vec![])]));
    let config = InterpreterConfig { max_call_depth: 8, ..InterpreterConfig::default() };
    let (_, result, _) = run_with(Interpreter::with_config(config), vec![recurse, Stmt::call("down", vec![])]);
    let err = result.unwrap_err();
    assert_eq!(err.error_type(), Some(ErrorType::AnyError));
    assert_eq!(err.stack.len(), 8);
}

#[test]
fn test_try_catches_matching_category() {
    let out = run_ok(vec![Stmt::try_catch(
        vec![Stmt::raise(ErrorType::MathError, Some(Expr::str("boom"))), Stmt::print(Expr::str("unreached"))],
        vec![
            ExceptionHandler::named("IO_ERROR", None, vec![Stmt::print(Expr::str("io"))]),
            ExceptionHandler::named("MATH_ERROR", Some("e"), vec![Stmt::print(Expr::var("e"))]),
        ],
    )]);
    assert_eq!(out, "boom\n");
}

#[test]
fn test_any_error_catches_custom_exceptions() {
    let out = run_ok(vec![Stmt::try_catch(
        vec![Stmt::raise_custom("Overdrawn", vec![Expr::int(10), Expr::str("eur")])],
        vec![ExceptionHandler::named("ANY_ERROR", Some("e"), vec![Stmt::print(Expr::var("e"))])],
    )]);
    assert_eq!(out, "Overdrawn(10, eur)\n");
}

#[test]
fn test_custom_handlers_match_by_name() {
    let out = run_ok(vec![Stmt::try_catch(
        vec![Stmt::raise_custom("Overdrawn", vec![])],
        vec![
            ExceptionHandler::named("Underflow", None, vec![Stmt::print(Expr::str("wrong"))]),
            ExceptionHandler::named("OVERDRAWN", None, vec![Stmt::print(Expr::str("caught"))]),
        ],
    )]);
    assert_eq!(out, "caught\n");

    let err = run_err(vec![Stmt::try_catch(
        vec![Stmt::raise_custom("Overdrawn", vec![])],
        vec![ExceptionHandler::named("MATH_ERROR", None, vec![])],
    )]);
    assert!(err.is_custom());
    assert_eq!(err.name(), "Overdrawn");
}

#[test]
fn test_raise_from_handler_reaches_outer_try() {
    let out = run_ok(vec![Stmt::try_catch(
        vec![Stmt::try_catch(
            vec![Stmt::raise(ErrorType::IoError, Some(Expr::str("disk")))],
            vec![ExceptionHandler::named(
                "IO_ERROR",
                None,
                vec![Stmt::raise(ErrorType::DbError, Some(Expr::str("wrapped")))],
            )],
        )],
        vec![ExceptionHandler::named("DB_ERROR", Some("e"), vec![Stmt::print(Expr::var("e"))])],
    )]);
    assert_eq!(out, "wrapped\n");
}

#[test]
fn test_function_handlers_supply_the_return_value() {
    let safe_div = Stmt::function(
        Block::function(
            "safeDiv",
            vec![Parameter::required("a", DataType::Integer), Parameter::required("b", DataType::Integer)],
            vec![Stmt::ret(Some(Expr::binary(Expr::var("a"), BinaryOp::Div, Expr::var("b"))))],
        )
        .with_return_type(DataType::Integer)
        .with_handlers(vec![ExceptionHandler::named("MATH_ERROR", None, vec![Stmt::ret(Some(Expr::int(-1)))])]),
    );
    let out = run_ok(vec![
        safe_div,
        Stmt::print(Expr::call("safeDiv", vec![Expr::int(9), Expr::int(3)])),
        Stmt::print(Expr::call("safeDiv", vec![Expr::int(9), Expr::int(0)])),
    ]);
    assert_eq!(out, "3\n-1\n");
}

#[test]
fn test_unhandled_exception_carries_line_and_stack() {
    let inner = Stmt::function(Block::function(
        "inner",
        vec![],
        vec![Stmt::raise(ErrorType::ValidationError, Some(Expr::str("bad input"))).at(3)],
    ))
    .at(2);
    let err = run_err(vec![inner, Stmt::call("inner", vec![]).at(10)]);

    assert_eq!(err.error_type(), Some(ErrorType::ValidationError));
    assert_eq!(err.message, "bad input");
    assert_eq!(err.location.line, 3);
    assert_eq!(err.stack.len(), 1);
    assert_eq!(err.stack[0].function, "inner");
    assert_eq!(err.stack[0].line, 10);
}

#[test]
fn test_fixed_and_dynamic_arrays() {
    let out = run_ok(vec![
        Stmt::var("a", TypeSpec::array(DataType::Integer, Some(3)), None),
        Stmt::new(StmtKind::IndexAssign { target: "a".into(), index: Expr::int(1), value: Expr::int(5) }),
        Stmt::print(Expr::var("a")),
        Stmt::var("b", TypeSpec::array(DataType::Integer, None), None),
        Stmt::new(StmtKind::IndexAssign { target: "b".into(), index: Expr::int(2), value: Expr::int(7) }),
        Stmt::print(Expr::var("b")),
        Stmt::print(Expr::Length(Box::new(Expr::var("b")))),
    ]);
    assert_eq!(out, "[0, 5, 0]\n[0, 0, 7]\n3\n");

    let err = run_err(vec![
        Stmt::var("a", TypeSpec::array(DataType::Integer, Some(3)), None),
        Stmt::new(StmtKind::IndexAssign { target: "a".into(), index: Expr::int(3), value: Expr::int(1) }),
    ]);
    assert_eq!(err.error_type(), Some(ErrorType::IndexError));
}

#[test]
fn test_arrays_are_copied_on_assignment() {
    let out = run_ok(vec![
        Stmt::var("a", TypeSpec::array(DataType::Integer, None), Some(Expr::ArrayLiteral(vec![Expr::int(1)]))),
        Stmt::var("b", DataType::Any, Some(Expr::var("a"))),
        Stmt::new(StmtKind::IndexAssign { target: "b".into(), index: Expr::int(0), value: Expr::int(9) }),
        Stmt::print(Expr::var("a")),
        Stmt::print(Expr::var("b")),
    ]);
    assert_eq!(out, "[1]\n[9]\n");
}

#[test]
fn test_shaped_records_through_typedef() {
    let person = TypeSpec::record(RecordType::new().field("name", DataType::String).field("age", DataType::Integer));
    let out = run_ok(vec![
        Stmt::new(StmtKind::Typedef { name: "Person".into(), spec: person }),
        Stmt::var("p", TypeSpec::named("person"), None),
        Stmt::new(StmtKind::PropertyAssign { target: "p".into(), property: "Name".into(), value: Expr::str("Ann") }),
        Stmt::new(StmtKind::PropertyAssign { target: "p".into(), property: "age".into(), value: Expr::int(30) }),
        Stmt::print(Expr::var("p")),
        Stmt::print(Expr::property(Expr::var("p"), "AGE")),
    ]);
    assert_eq!(out, "{name: \"Ann\", age: 30}\n30\n");

    let err = run_err(vec![
        Stmt::var("p", TypeSpec::record(RecordType::new().field("name", DataType::String)), None),
        Stmt::new(StmtKind::PropertyAssign { target: "p".into(), property: "salary".into(), value: Expr::int(1) }),
    ]);
    assert_eq!(err.error_type(), Some(ErrorType::NotFoundError));
}

#[test]
fn test_bitmap_fields() {
    let layout = BitFields::bitmap(vec![BitField::new("low", 0, 3), BitField::new("high", 4, 7)]).unwrap();
    let flags = TypeSpec::bitmap(layout);
    let out = run_ok(vec![
        Stmt::var("f", flags.clone(), None),
        Stmt::new(StmtKind::PropertyAssign { target: "f".into(), property: "low".into(), value: Expr::int(5) }),
        Stmt::new(StmtKind::PropertyAssign { target: "f".into(), property: "high".into(), value: Expr::int(2) }),
        Stmt::print(Expr::var("f")),
        Stmt::print(Expr::property(Expr::var("f"), "high")),
    ]);
    assert_eq!(out, "37\n2\n");

    let err = run_err(vec![
        Stmt::var("f", flags, None),
        Stmt::new(StmtKind::PropertyAssign { target: "f".into(), property: "low".into(), value: Expr::int(16) }),
    ]);
    assert_eq!(err.error_type(), Some(ErrorType::ValidationError));
}

#[test]
fn test_json_navigation() {
    let out = run_ok(vec![
        Stmt::var("j", DataType::Json, Some(Expr::call("json.parse", vec![Expr::str(r#"{"a": [1, 2], "b": "x"}"#)]))),
        Stmt::print(Expr::index(Expr::property(Expr::var("j"), "a"), Expr::int(1))),
        Stmt::print(Expr::index(Expr::var("j"), Expr::str("b"))),
        Stmt::print(Expr::Length(Box::new(Expr::property(Expr::var("j"), "a")))),
    ]);
    assert_eq!(out, "2\nx\n2\n");
}

#[test]
fn test_casts_parse_strings() {
    let out = run_ok(vec![
        Stmt::print(add(Expr::cast(DataType::Integer, Expr::str("41")), Expr::int(1))),
        Stmt::print(Expr::cast(DataType::Bool, Expr::str("true"))),
    ]);
    assert_eq!(out, "42\ntrue\n");

    let err = run_err(vec![Stmt::print(Expr::cast(DataType::Integer, Expr::str("forty")))]);
    assert_eq!(err.error_type(), Some(ErrorType::ParseError));
}

#[test]
fn test_builtins_win_over_user_functions() {
    let shadow = Stmt::function(
        Block::function("math.abs", vec![Parameter::required("n", DataType::Integer)], vec![Stmt::ret(Some(Expr::int(0)))]),
    );
    let out = run_ok(vec![shadow, Stmt::print(Expr::call("math.abs", vec![Expr::int(-3)]))]);
    assert_eq!(out, "3\n");
}

#[test]
fn test_host_builtins_can_be_registered_and_replaced() {
    let mut interp = Interpreter::new();
    interp.builtins_mut().register(
        "host.twice",
        vec![Parameter::required("n", DataType::Integer)],
        Some(DataType::Integer),
        |args| Ok(Value::Int(args[0].as_i64().unwrap_or(0) as i32 * 2)),
    );
    interp.builtins_mut().register(
        "HOST.Twice",
        vec![Parameter::required("n", DataType::Integer)],
        Some(DataType::Integer),
        |args| Ok(Value::Int(args[0].as_i64().unwrap_or(0) as i32 * 3)),
    );
    let (_, result, out) = run_with(interp, vec![Stmt::print(Expr::call("host.twice", vec![Expr::int(7)]))]);
    result.unwrap();
    assert_eq!(out, "21\n");
}

#[test]
fn test_standard_library_builtins_in_scripts() {
    let out = run_ok(vec![
        Stmt::print(Expr::call("str.upper", vec![Expr::str("ebs")])),
        Stmt::print(Expr::call("math.max", vec![Expr::int(3), Expr::int(9)])),
        Stmt::print(Expr::call_with(
            "str.lpad",
            vec![
                Argument::positional(Expr::str("7")),
                Argument::named("width", Expr::int(3)),
                Argument::named("fill", Expr::str("0")),
            ],
        )),
    ]);
    assert_eq!(out, "EBS\n9\n007\n");
}

#[test]
fn test_sqlite_cursor_and_select() {
    let dir = scratch_dir("sqlite");
    let path = dir.join("people.db");
    let _ = std::fs::remove_file(&path);
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE people (name TEXT, age INTEGER);
             INSERT INTO people VALUES ('ann', 31), ('bob', 17), ('cy', 45);",
        )
        .unwrap();
    }

    let url = format!("sqlite:{}", path.display());
    let out = run_ok(vec![
        Stmt::new(StmtKind::Connect { name: "db".into(), spec: Expr::str(&url) }),
        Stmt::new(StmtKind::UseConnection {
            name: "DB".into(),
            body: vec![
                Stmt::new(StmtKind::CursorDecl {
                    name: "adults".into(),
                    sql: "SELECT name FROM people WHERE age >= :min ORDER BY name".into(),
                }),
                Stmt::new(StmtKind::OpenCursor {
                    name: "adults".into(),
                    args: vec![Argument::named("min", Expr::int(18))],
                }),
                Stmt::while_loop(
                    Expr::CursorHasNext("adults".into()),
                    vec![
                        Stmt::var("row", DataType::Record, Some(Expr::CursorNext("adults".into()))),
                        Stmt::print(Expr::property(Expr::var("row"), "name")),
                    ],
                ),
                Stmt::new(StmtKind::CloseCursor("adults".into())),
                Stmt::print(Expr::Length(Box::new(Expr::Select {
                    sql: "SELECT * FROM people".into(),
                    params: vec![],
                }))),
            ],
        }),
        Stmt::new(StmtKind::CloseConnection("db".into())),
    ]);
    assert_eq!(out, "ann\ncy\n3\n");
}

#[test]
fn test_cursor_needs_a_use_block() {
    let err = run_err(vec![Stmt::new(StmtKind::CursorDecl { name: "c".into(), sql: "SELECT 1".into() })]);
    assert_eq!(err.error_type(), Some(ErrorType::DbError));

    let err = run_err(vec![Stmt::new(StmtKind::UseConnection { name: "nowhere".into(), body: vec![] })]);
    assert_eq!(err.error_type(), Some(ErrorType::NotFoundError));
}

/// Adapter that serves fixed rows and counts cursor closes
struct CountingAdapter {
    closed: Arc<AtomicUsize>,
}

struct CountingConnection {
    closed: Arc<AtomicUsize>,
}

struct CountingCursor {
    inner: MaterializedCursor,
    closed: Arc<AtomicUsize>,
    done: bool,
}

impl DbAdapter for CountingAdapter {
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn DbConnection>, DbError> {
        assert_eq!(target.driver, "mock");
        Ok(Box::new(CountingConnection { closed: self.closed.clone() }))
    }
}

fn sample_rows() -> Vec<Row> {
    (1..=3)
        .map(|n| {
            let mut row = Row::new();
            row.insert("n".into(), Value::Int(n));
            row
        })
        .collect()
}

impl DbConnection for CountingConnection {
    fn open_cursor(&mut self, _: &str, _: &[(String, Value)], _: &[Value]) -> Result<Box<dyn DbCursor>, DbError> {
        Ok(Box::new(CountingCursor {
            inner: MaterializedCursor::new(sample_rows()),
            closed: self.closed.clone(),
            done: false,
        }))
    }

    fn execute_select(&mut self, _: &str, _: &[(String, Value)], _: &[Value]) -> Result<Vec<Row>, DbError> {
        Ok(sample_rows())
    }

    fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

impl DbCursor for CountingCursor {
    fn has_next(&mut self) -> Result<bool, DbError> {
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<Row, DbError> {
        self.inner.next()
    }

    fn close(&mut self) -> Result<(), DbError> {
        if !self.done {
            self.done = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.close()
    }
}

#[test]
fn test_cursor_is_closed_when_an_exception_leaves_its_block() {
    let closed = Arc::new(AtomicUsize::new(0));
    let interp = Interpreter::new().with_database_adapter(CountingAdapter { closed: closed.clone() });
    let (_, result, out) = run_with(
        interp,
        vec![
            Stmt::new(StmtKind::Connect { name: "m".into(), spec: Expr::str("mock:rows") }),
            Stmt::try_catch(
                vec![Stmt::new(StmtKind::UseConnection {
                    name: "m".into(),
                    body: vec![
                        Stmt::new(StmtKind::CursorDecl { name: "c".into(), sql: "SELECT n".into() }),
                        Stmt::new(StmtKind::OpenCursor { name: "c".into(), args: vec![] }),
                        Stmt::print(Expr::property(Expr::CursorNext("c".into()), "n")),
                        Stmt::raise(ErrorType::IoError, Some(Expr::str("lost"))),
                    ],
                })],
                vec![ExceptionHandler::named("IO_ERROR", None, vec![Stmt::print(Expr::str("recovered"))])],
            ),
        ],
    );
    result.unwrap();
    assert_eq!(out, "1\nrecovered\n");
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_timers_fire_until_idle() {
    let mut interp = Interpreter::new();
    let out = Arc::new(Mutex::new(Vec::new()));
    interp.set_output(out.clone());

    let program = Program::new(vec![
        Stmt::function(Block::function(
            "onTick",
            vec![Parameter::required("name", DataType::String)],
            vec![Stmt::print(add(Expr::str("tick "), Expr::var("name")))],
        )),
        Stmt::call("thread.timerStart", vec![Expr::str("t1"), Expr::int(5), Expr::str("onTick")]),
    ]);
    interp.run_program(&program).unwrap();
    interp.run_until_idle().unwrap();

    let text = String::from_utf8(out.lock().unwrap().clone()).unwrap();
    assert_eq!(text, "tick t1\n");
    assert_eq!(interp.active_timers(), 0);
}

#[test]
fn test_imports_run_once() {
    let dir = scratch_dir("import");
    let module = Program::new(vec![
        Stmt::print(Expr::str("loaded")),
        Stmt::function(Block::function("helper", vec![], vec![Stmt::ret(Some(Expr::int(42)))])),
    ]);
    let path = dir.join("helpers.json");
    std::fs::write(&path, module.to_json().unwrap()).unwrap();
    let name = path.display().to_string();

    let out = run_ok(vec![
        Stmt::new(StmtKind::Import(name.clone())),
        Stmt::new(StmtKind::Import(name)),
        Stmt::print(Expr::call("helper", vec![])),
    ]);
    assert_eq!(out, "loaded\n42\n");

    let err = run_err(vec![Stmt::new(StmtKind::Import("no/such/module".into()))]);
    assert_eq!(err.error_type(), Some(ErrorType::IoError));
}

#[test]
fn test_break_is_never_caught_by_handlers() {
    let out = run_ok(vec![
        Stmt::var("i", DataType::Integer, Some(Expr::int(0))),
        Stmt::while_loop(
            Expr::binary(Expr::var("i"), BinaryOp::Lt, Expr::int(10)),
            vec![
                Stmt::assign("i", add(Expr::var("i"), Expr::int(1))),
                Stmt::try_catch(
                    vec![Stmt::new(StmtKind::Break)],
                    vec![ExceptionHandler::named("ANY_ERROR", None, vec![Stmt::print(Expr::str("caught"))])],
                ),
            ],
        ),
        Stmt::print(Expr::var("i")),
    ]);
    assert_eq!(out, "1\n");
}

#[test]
fn test_function_level_handler_catches_not_found() {
    let lookup = Stmt::function(
        Block::function("lookup", vec![], vec![Stmt::print(Expr::var("missing"))]).with_handlers(vec![
            ExceptionHandler::named("NOT_FOUND_ERROR", Some("e"), vec![Stmt::print(Expr::str("handled"))]),
        ]),
    );
    let out = run_ok(vec![lookup, Stmt::call("lookup", vec![]), Stmt::print(Expr::str("after"))]);
    assert_eq!(out, "handled\nafter\n");
}

#[test]
fn test_stopped_timers_never_call_back() {
    let mut interp = Interpreter::new();
    let out = Arc::new(Mutex::new(Vec::new()));
    interp.set_output(out.clone());

    let program = Program::new(vec![
        Stmt::function(Block::function("late", vec![], vec![Stmt::print(Expr::str("late"))])),
        Stmt::call("thread.timerStart", vec![Expr::str("t"), Expr::int(5), Expr::str("late")]),
        Stmt::print(Expr::call("thread.timerStop", vec![Expr::str("T")])),
    ]);
    interp.run_program(&program).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(30));
    assert_eq!(interp.pump_timers().unwrap(), 0);
    interp.run_until_idle().unwrap();

    let text = String::from_utf8(out.lock().unwrap().clone()).unwrap();
    assert_eq!(text, "true\n");
}

#[test]
fn test_globals_remain_inspectable_after_run() {
    let (interp, result, _) = run_with(
        Interpreter::new(),
        vec![
            Stmt::var("total", DataType::Long, Some(Expr::int(40))),
            Stmt::assign("total", add(Expr::var("total"), Expr::int(2))),
            add_function(),
        ],
    );
    result.unwrap();
    assert_eq!(interp.env.get("TOTAL"), Some(Value::Long(42)));
    assert!(interp.has_function("Add"));
}


#[test]
fn test_deep_recursion_within_default_call_depth() {
    // count(n) = count(n - 1) + 1, count(0) = 0
    let count = Stmt::function(
        Block::function(
            "count",
            vec![Parameter::required("n", DataType::Integer)],
            vec![
                Stmt::if_else(
                    Expr::binary(Expr::var("n"), BinaryOp::Gt, Expr::int(0)),
                    vec![Stmt::ret(Some(add(
                        Expr::call("count", vec![Expr::binary(Expr::var("n"), BinaryOp::Sub, Expr::int(1))]),
                        Expr::int(1),
                    )))],
                    None,
                ),
                Stmt::ret(Some(Expr::int(0))),
            ],
        )
        .with_return_type(DataType::Integer),
    );
    let deepest = (DEFAULT_MAX_CALL_DEPTH - 1) as i32;
    let out = run_ok(vec![count.clone(), Stmt::print(Expr::call("count", vec![Expr::int(deepest)]))]);
    assert_eq!(out, format!("{}\n", deepest));

    let err = run_err(vec![count, Stmt::print(Expr::call("count", vec![Expr::int(deepest + 1)]))]);
    assert_eq!(err.error_type(), Some(ErrorType::AnyError));
}

#[test]
fn test_category_names_raised_by_name_are_standard() {
    let out = run_ok(vec![Stmt::try_catch(
        vec![Stmt::raise_custom("io_error", vec![Expr::str("x")])],
        vec![ExceptionHandler::named("IO_ERROR", Some("e"), vec![Stmt::print(Expr::var("e"))])],
    )]);
    assert_eq!(out, "x\n");

    let out = run_ok(vec![Stmt::try_catch(
        vec![Stmt::print(Expr::binary(Expr::int(1), BinaryOp::Div, Expr::int(0)))],
        vec![ExceptionHandler::new(
            HandlerTarget::Custom("Math_Error".into()),
            None,
            vec![Stmt::print(Expr::str("caught"))],
        )],
    )]);
    assert_eq!(out, "caught\n");

    let err = run_err(vec![Stmt::raise_custom("DB_ERROR", vec![Expr::int(1), Expr::int(2)])]);
    assert_eq!(err.error_type(), Some(ErrorType::ValidationError));
}

#[test]
fn test_outer_try_catches_what_inner_try_does_not() {
    let out = run_ok(vec![Stmt::try_catch(
        vec![
            Stmt::try_catch(
                vec![Stmt::raise(ErrorType::IoError, Some(Expr::str("disk")))],
                vec![ExceptionHandler::named("MATH_ERROR", None, vec![Stmt::print(Expr::str("inner"))])],
            ),
            Stmt::print(Expr::str("unreached")),
        ],
        vec![ExceptionHandler::named("IO_ERROR", Some("e"), vec![Stmt::print(Expr::var("e"))])],
    )]);
    assert_eq!(out, "disk\n");
}

#[test]
fn test_each_run_imports_modules_again() {
    let dir = scratch_dir("rerun");
    let module = Program::new(vec![
        Stmt::print(Expr::str("loaded")),
        Stmt::function(Block::function("helper", vec![], vec![Stmt::ret(Some(Expr::int(42)))])),
    ]);
    let path = dir.join("helpers.json");
    std::fs::write(&path, module.to_json().unwrap()).unwrap();
    let program = Program::new(vec![
        Stmt::new(StmtKind::Import(path.display().to_string())),
        Stmt::print(Expr::call("helper", vec![])),
    ]);

    let mut interp = Interpreter::new();
    let out = Arc::new(Mutex::new(Vec::new()));
    interp.set_output(out.clone());
    interp.run_program(&program).unwrap();
    interp.run_program(&program).unwrap();

    let text = String::from_utf8(out.lock().unwrap().clone()).unwrap();
    assert_eq!(text, "loaded\n42\nloaded\n42\n");
}
