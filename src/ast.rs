//! Abstract syntax tree produced by the parser.
//!
//! Expressions carry a `NodeId` so later passes can attach facts to them
//! (types, resolved call targets) in side tables instead of mutating the
//! tree. Variables are referenced by `VarId` into the owning function's
//! variable list.

use std::collections::HashMap;

use crate::symbols::{VarId, Variable};
use crate::ty::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LitKind {
  Int,
  Byte,
  Bool,
}

/// Binary operators after desugaring; `>` and `>=` are expressed with
/// swapped operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Le,
}

impl BinaryOp {
  pub fn is_relational(self) -> bool {
    matches!(self, BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le)
  }

  #[cfg(test)]
  pub fn symbol(self) -> &'static str {
    match self {
      BinaryOp::Add => "+",
      BinaryOp::Sub => "-",
      BinaryOp::Mul => "*",
      BinaryOp::Div => "/",
      BinaryOp::Eq => "==",
      BinaryOp::Ne => "!=",
      BinaryOp::Lt => "<",
      BinaryOp::Le => "<=",
    }
  }
}

#[derive(Debug, Clone)]
pub struct Expr {
  pub id: NodeId,
  /// Byte offset of the token that started this expression.
  pub loc: usize,
  pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
  Lit { kind: LitKind, value: i64 },
  Var(VarId),
  Deref(Box<Expr>),
  Addr(Box<Expr>),
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  /// The callee is bound to a function after the whole program is parsed.
  Call { name: String, args: ExprList },
  Member { base: Box<Expr>, name: String },
  /// Positional aggregate literal such as `[3]int{1, 2, 3}`.
  Composite { ty: Type, elems: Vec<Expr> },
}

/// Ordered group of expressions: the sides of an assignment or the
/// arguments of a call.
#[derive(Debug, Clone, Default)]
pub struct ExprList(pub Vec<Expr>);

impl ExprList {
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Expr> {
    self.0.iter()
  }

  /// The call expression when the list is exactly one call, the only shape
  /// that may produce several values.
  pub fn single_call(&self) -> Option<&Expr> {
    match self.0.as_slice() {
      [e @ Expr {
        kind: ExprKind::Call { .. },
        ..
      }] => Some(e),
      _ => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Assign {
  pub lhs: ExprList,
  pub rhs: ExprList,
  pub loc: usize,
}

#[derive(Debug, Clone)]
pub enum Stmt {
  Expr(Expr),
  Assign(Assign),
  /// Stores the returned values into the result variables, if any.
  Return(Option<Assign>),
  Block(Vec<Stmt>),
  If {
    init: Option<Box<Stmt>>,
    cond: Expr,
    then: Box<Stmt>,
    els: Option<Box<Stmt>>,
  },
  For {
    init: Option<Box<Stmt>>,
    cond: Option<Expr>,
    post: Option<Box<Stmt>>,
    body: Box<Stmt>,
  },
}

#[derive(Debug)]
pub struct Function {
  pub name: String,
  pub loc: usize,
  pub vars: Vec<Variable>,
  pub params: Vec<VarId>,
  pub results: Vec<VarId>,
  pub locals: Vec<VarId>,
  /// Frame slots for values that are copied before being stored: aggregate
  /// call results, composite literals and parallel aggregate sources.
  pub temps: HashMap<NodeId, i64>,
  pub body: Stmt,
  pub stack_size: usize,
  pub params_region_size: usize,
  pub results_region_size: usize,
}

impl Function {
  pub fn var(&self, id: VarId) -> &Variable {
    &self.vars[id.0]
  }
}

#[derive(Debug)]
pub struct Program {
  pub functions: Vec<Function>,
  /// Call node to index of the called function.
  pub calls: HashMap<NodeId, usize>,
}

impl Program {
  pub fn function(&self, name: &str) -> Option<&Function> {
    self.functions.iter().find(|f| f.name == name)
  }

  pub fn callee(&self, call: NodeId) -> Option<&Function> {
    self.calls.get(&call).map(|&i| &self.functions[i])
  }
}

#[cfg(test)]
impl Expr {
  /// Render the tree as an s-expression, e.g. `(+ 2 (* 3 4))`.
  pub fn sexp(&self, vars: &[Variable]) -> String {
    match &self.kind {
      ExprKind::Lit { value, .. } => value.to_string(),
      ExprKind::Var(id) => vars[id.0].name.clone(),
      ExprKind::Deref(e) => format!("(deref {})", e.sexp(vars)),
      ExprKind::Addr(e) => format!("(addr {})", e.sexp(vars)),
      ExprKind::Binary { op, lhs, rhs } => {
        format!("({} {} {})", op.symbol(), lhs.sexp(vars), rhs.sexp(vars))
      }
      ExprKind::Call { name, args } => {
        let mut out = format!("({name}");
        for arg in args.iter() {
          out.push(' ');
          out.push_str(&arg.sexp(vars));
        }
        out.push(')');
        out
      }
      ExprKind::Member { base, name } => format!("(. {} {name})", base.sexp(vars)),
      ExprKind::Composite { ty, elems } => {
        let elems: Vec<_> = elems.iter().map(|e| e.sexp(vars)).collect();
        format!("({ty} {{{}}})", elems.join(" "))
      }
    }
  }
}
