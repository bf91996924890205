//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! Besides recognising operators, literals, keywords and type names, the
//! tokenizer reconstructs statement boundaries: at every newline (and at the
//! end of input) a `;` token is synthesized when the line ends in a token
//! that can close a statement. Multi-character punctuators are matched
//! before single-character ones to avoid ambiguity.

use log::trace;

use crate::error::{CompileError, CompileResult, ErrorKind};

pub const KEYWORDS: [&str; 7] = ["func", "return", "if", "else", "for", "var", "struct"];
pub const TYPE_NAMES: [&str; 3] = ["int", "byte", "bool"];

const TWO_CHAR_PUNCTS: [&str; 5] = ["<=", ">=", "==", "!=", ":="];

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Num,
  Char,
  Bool,
  Punct,
  Keyword,
  Ident,
  TypeName,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
///
/// `text` is the lexeme (`";"` for synthesized terminators, which have
/// zero length in the source). `value` holds the numeric value of
/// number, char and bool literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub value: Option<i64>,
  pub loc: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, text: impl Into<String>, loc: usize, value: Option<i64>) -> Self {
    Self {
      kind,
      text: text.into(),
      value,
      loc,
    }
  }

  pub fn is(&self, kind: TokenKind, text: &str) -> bool {
    self.kind == kind && self.text == text
  }

  pub fn is_literal(&self) -> bool {
    matches!(self.kind, TokenKind::Num | TokenKind::Char | TokenKind::Bool)
  }

  /// Whether a line ending right after this token ends a statement.
  fn ends_statement(&self) -> bool {
    match self.kind {
      TokenKind::Num | TokenKind::Char | TokenKind::Bool => true,
      TokenKind::Ident | TokenKind::TypeName => true,
      TokenKind::Keyword => self.text == "return",
      TokenKind::Punct => matches!(self.text.as_str(), ")" | "]" | "}"),
      TokenKind::Eof => false,
    }
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens: Vec<Token> = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];

    if c == b'\n' {
      terminate_line(&mut tokens, i);
      i += 1;
      continue;
    }

    if c == b' ' || c == b'\t' || c == b'\r' {
      i += 1;
      continue;
    }

    if input[i..].starts_with("//") {
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
      }
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &input[start..i];
      let value = text.parse::<i64>().map_err(|err| {
        CompileError::at(ErrorKind::Lex, input, start, format!("invalid number: {err}"))
      })?;
      tokens.push(Token::new(TokenKind::Num, text, start, Some(value)));
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      tokens.push(classify_word(&input[start..i], start));
      continue;
    }

    if c == b'\'' {
      let (value, len) = read_char_literal(input, i)?;
      tokens.push(Token::new(TokenKind::Char, &input[i..i + len], i, Some(value)));
      i += len;
      continue;
    }

    if let Some(op) = TWO_CHAR_PUNCTS
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(TokenKind::Punct, op, i, None));
      i += op.len();
      continue;
    }

    if matches!(
      c,
      b'+'
        | b'-'
        | b'*'
        | b'/'
        | b'&'
        | b'!'
        | b'<'
        | b'>'
        | b'='
        | b'('
        | b')'
        | b'['
        | b']'
        | b'{'
        | b'}'
        | b','
        | b';'
        | b'.'
    ) {
      tokens.push(Token::new(TokenKind::Punct, &input[i..i + 1], i, None));
      i += 1;
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::at(
      ErrorKind::Lex,
      input,
      i,
      format!("invalid token: '{invalid_char}'"),
    ));
  }

  terminate_line(&mut tokens, input.len());
  tokens.push(Token::new(TokenKind::Eof, "", input.len(), None));
  trace!("lexed {} tokens", tokens.len());
  Ok(tokens)
}

/// Synthesize a terminator if the last token can end a statement.
fn terminate_line(tokens: &mut Vec<Token>, loc: usize) {
  if tokens.last().is_some_and(Token::ends_statement) {
    tokens.push(Token::new(TokenKind::Punct, ";", loc, None));
  }
}

fn classify_word(word: &str, loc: usize) -> Token {
  if KEYWORDS.contains(&word) {
    Token::new(TokenKind::Keyword, word, loc, None)
  } else if TYPE_NAMES.contains(&word) {
    Token::new(TokenKind::TypeName, word, loc, None)
  } else if word == "true" || word == "false" {
    Token::new(TokenKind::Bool, word, loc, Some(i64::from(word == "true")))
  } else {
    Token::new(TokenKind::Ident, word, loc, None)
  }
}

/// Read `'c'` or `'\n'` starting at the opening quote; returns the byte
/// value and the lexeme length.
fn read_char_literal(input: &str, start: usize) -> CompileResult<(i64, usize)> {
  let bytes = input.as_bytes();
  let err = |loc: usize, msg: &str| CompileError::at(ErrorKind::Lex, input, loc, msg);

  let Some(&c) = bytes.get(start + 1) else {
    return Err(err(start, "unterminated char literal"));
  };
  let (value, body_len) = if c == b'\\' {
    let escaped = match bytes.get(start + 2) {
      Some(b'n') => b'\n',
      Some(b't') => b'\t',
      Some(b'0') => 0,
      Some(b'\\') => b'\\',
      Some(b'\'') => b'\'',
      Some(_) => return Err(err(start + 2, "unknown escape sequence")),
      None => return Err(err(start, "unterminated char literal")),
    };
    (escaped, 2)
  } else if c == b'\'' || c == b'\n' || !c.is_ascii() {
    return Err(err(start + 1, "invalid char literal"));
  } else {
    (c, 1)
  };

  if bytes.get(start + 1 + body_len) != Some(&b'\'') {
    return Err(err(start, "unterminated char literal"));
  }
  Ok((i64::from(value), body_len + 2))
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => t.text.clone(),
    },
    None => "EOF".to_string(),
  }
}
