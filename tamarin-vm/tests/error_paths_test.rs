// tamarin-vm - VM error path tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Tests for out-of-band failures: type mismatches, call protocol
//! violations, structural limits, and compile-time resolution errors.

use tamarin_parser::Parser;
use tamarin_vm::{Compiler, VM};

fn compile_and_run(source: &str) -> Result<String, String> {
    let program = Parser::parse_str(source).map_err(|e| format!("parse error: {}", e))?;
    let mut compiler = Compiler::new();
    compiler
        .compile(&program)
        .map_err(|e| format!("compile error: {}", e))?;

    let mut machine = VM::new(compiler.bytecode());
    match machine.run() {
        Ok(()) => Ok(machine.last_popped_stack_elem().to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn expect_error(source: &str, expected: &str) {
    match compile_and_run(source) {
        Err(message) => assert_eq!(message, expected, "source: {}", source),
        Ok(value) => panic!(
            "expected error '{}', but got value {} for source: {}",
            expected, value, source
        ),
    }
}

// =============================================================================
// Call protocol
// =============================================================================

#[test]
fn wrong_number_of_arguments() {
    expect_error("fn() { 5; }(1)", "wrong number of arguments: want=0 got=1");
    expect_error(
        "fn(a, b) { a + b }(3)",
        "wrong number of arguments: want=2 got=1",
    );
    expect_error(
        "fn(a) { a }(1, 2)",
        "wrong number of arguments: want=1 got=2",
    );
}

#[test]
fn calling_non_function() {
    expect_error("5(1)", "calling non-function");
    expect_error("let x = true; x()", "calling non-function");
    expect_error(r#""not a fn"()"#, "calling non-function");
}

// =============================================================================
// Type mismatches
// =============================================================================

#[test]
fn unsupported_binary_types() {
    expect_error(
        "1 + true",
        "unsupported types for binary operation: integer boolean",
    );
    expect_error(
        r#""a" + 1"#,
        "unsupported types for binary operation: string integer",
    );
    expect_error(
        "[1] + [2]",
        "unsupported types for binary operation: array array",
    );
}

#[test]
fn unknown_string_operator() {
    expect_error(r#""a" - "b""#, "unknown string operator: OpSub");
    expect_error(r#""a" * "b""#, "unknown string operator: OpMul");
}

#[test]
fn unsupported_negation() {
    expect_error("-true", "unsupported type for negation: boolean");
    expect_error(r#"-"s""#, "unsupported type for negation: string");
}

#[test]
fn index_operator_not_supported() {
    expect_error("5[0]", "index operator not supported: integer");
    expect_error(r#""s"[0]"#, "index operator not supported: string");
    expect_error("5[0] = 1", "index assign operator not supported: integer");
    expect_error("true[0] = 1", "index assign operator not supported: boolean");
}

#[test]
fn unusable_hash_keys() {
    expect_error("{}[[]]", "unusable hash key: array");
    expect_error("{[]: 1}", "unusable as hash key: array");
    expect_error("let h = {}; h[[1]] = 2", "unusable hash key: array");
    expect_error("{{}: 1}", "unusable as hash key: hash");
}

// =============================================================================
// Structural
// =============================================================================

#[test]
fn runaway_recursion_overflows() {
    expect_error("let f = fn() { f() }; f();", "stack overflow");
}

#[test]
fn division_by_zero() {
    expect_error("5 / 0", "division by zero");
    expect_error("let f = fn(a, b) { a / b }; f(10, 0)", "division by zero");
}

// =============================================================================
// Compile-time resolution
// =============================================================================

#[test]
fn undefined_variable() {
    expect_error("foobar", "compile error: undefined variable foobar");
    expect_error(
        "fn() { undefinedInsideFunction }",
        "compile error: undefined variable undefinedInsideFunction",
    );
}
