//! Compiler for `.pym` scripts: Python source with `@external` function
//! declarations and `Input(...)` bindings, compiled into stripped code, a
//! type stub and a compatibility report for the Monty interpreter.

#[allow(clippy::wildcard_imports)]
pub mod syntax;

pub mod artifacts;
pub mod compiler;
pub mod config;
pub mod error;
pub mod script;

pub use compiler::{
    check, check_with, compile, generate, synthesize_stub, CheckResult, ParseResult, SourceMap,
};
pub use error::{GrailError, Result};
