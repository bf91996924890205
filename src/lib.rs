//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` turns source text into tokens, inserting statement
//!   terminators at line ends.
//! - `parser` builds the AST for every function and binds calls to their
//!   callees once the whole program has been read.
//! - `typeck` gives every expression a type and infers the types of
//!   `:=` variables.
//! - `layout` assigns frame offsets to parameters, results and locals.
//! - `codegen` lowers the program into x86-64 Intel-syntax assembly.
//! - `error` carries the diagnostics shared by all stages.

pub mod ast;
pub mod error;
pub mod layout;
pub mod parser;
pub mod symbols;
pub mod tokenizer;
pub mod ty;
pub mod typeck;

mod codegen;

use log::debug;

pub use error::{CompileError, CompileResult, ErrorKind};

use ast::Program;
use typeck::TypeTable;

/// A program that has been parsed, type-checked and laid out, ready for
/// code generation.
#[derive(Debug)]
pub struct Compilation {
  pub program: Program,
  pub types: TypeTable,
}

/// Run every stage up to, but not including, code generation.
pub fn compile(source: &str) -> CompileResult<Compilation> {
  let tokens = tokenizer::tokenize(source)?;
  debug!("{} tokens", tokens.len());
  let mut program = parser::parse(tokens, source)?;
  debug!("parsed {} functions", program.functions.len());
  let types = typeck::check_program(&mut program, source)?;
  layout::layout_program(&mut program, &types, source)?;
  Ok(Compilation { program, types })
}

/// Compile a source string into Intel-syntax assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let compilation = compile(source)?;
  codegen::generate(&compilation.program, &compilation.types, source)
}
