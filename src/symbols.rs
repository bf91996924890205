//! Per-function variable registry used while parsing.
//!
//! Variables live in an arena owned by the function being parsed; the AST
//! refers to them through `VarId`. A fresh table is created for every
//! function, and it is turned into the function's variable list once the
//! body has been parsed.

use crate::ty::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone)]
pub struct Variable {
  pub name: String,
  /// Declared type, or `None` until the checker infers it.
  pub ty: Option<Type>,
  /// Frame-base relative offset, `None` until frame layout runs.
  pub offset: Option<i64>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
  vars: Vec<Variable>,
}

impl SymbolTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Always creates a new variable, even if the name is already taken.
  pub fn declare(&mut self, name: impl Into<String>, ty: Option<Type>) -> VarId {
    self.vars.push(Variable {
      name: name.into(),
      ty,
      offset: None,
    });
    VarId(self.vars.len() - 1)
  }

  /// Find the most recently declared variable called `name`.
  pub fn lookup(&self, name: &str) -> Option<VarId> {
    self.vars.iter().rposition(|v| v.name == name).map(VarId)
  }

  pub fn get(&self, id: VarId) -> &Variable {
    &self.vars[id.0]
  }

  pub fn into_vars(self) -> Vec<Variable> {
    self.vars
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lookup_prefers_latest_declaration() {
    let mut table = SymbolTable::new();
    let first = table.declare("x", Some(Type::Int));
    assert_eq!(table.lookup("x"), Some(first));
    let second = table.declare("x", None);
    assert_ne!(first, second);
    assert_eq!(table.lookup("x"), Some(second));
    assert!(table.get(second).ty.is_none());
  }

  #[test]
  fn missing_names_are_not_found() {
    let mut table = SymbolTable::new();
    table.declare("a", None);
    assert_eq!(table.lookup("b"), None);
  }

  #[test]
  fn declared_variables_have_no_offset_yet() {
    let mut table = SymbolTable::new();
    table.declare("a", Some(Type::Byte));
    let vars = table.into_vars();
    assert_eq!(vars.len(), 1);
    assert_eq!(vars[0].offset, None);
  }
}
