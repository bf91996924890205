//! Shared error utilities used across the compilation pipeline.
//!
//! Diagnostics are kept lightweight: an error anchored in the source shows
//! the offending line with a caret under the offending byte, in the style
//! of chibicc. Errors that have no source position only carry a message.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// Which stage rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Lex,
  Syntax,
  Semantic,
  Codegen,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::Lex => "lex",
      ErrorKind::Syntax => "syntax",
      ErrorKind::Semantic => "semantic",
      ErrorKind::Codegen => "codegen",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("{kind} error at {line}:{column}\n{source_line}\n{marker} {message}"))]
  WithLocation {
    kind: ErrorKind,
    line: usize,
    column: usize,
    source_line: String,
    marker: String,
    message: String,
  },
  #[snafu(display("{kind} error: {message}"))]
  Detached { kind: ErrorKind, message: String },
}

impl CompileError {
  /// Construct an error anchored at a specific byte offset in the source.
  pub fn at(kind: ErrorKind, src: &str, loc: usize, message: impl Into<String>) -> Self {
    let safe_loc = loc.min(src.len());
    let line_start = src[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = src[safe_loc..]
      .find('\n')
      .map_or(src.len(), |i| safe_loc + i);
    let line = src[..line_start].matches('\n').count() + 1;
    let column = src[line_start..safe_loc].chars().count() + 1;
    let marker = format!("{}^", " ".repeat(column - 1));
    Self::WithLocation {
      kind,
      line,
      column,
      source_line: src[line_start..line_end].to_string(),
      marker,
      message: message.into(),
    }
  }

  /// Construct an error that has no meaningful source position.
  pub fn detached(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self::Detached {
      kind,
      message: message.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::WithLocation { kind, .. } | Self::Detached { kind, .. } => *kind,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Self::WithLocation { message, .. } | Self::Detached { message, .. } => message,
    }
  }
}
