//! Type checking: assigns a type to every expression of every function.
//!
//! Types are recorded in a `TypeTable` keyed by expression node, so a node
//! that already has an entry is never visited twice. Variables declared
//! without a type (`:=`, `var x = ...`) receive the type of the value first
//! assigned to them.

use std::collections::HashMap;

use log::{debug, trace};

use crate::ast::{Assign, Expr, ExprKind, Function, LitKind, NodeId, Program, Stmt};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::symbols::{VarId, Variable};
use crate::ty::{Member, Type};

/// Expression types and resolved struct members, keyed by node.
#[derive(Debug, Default)]
pub struct TypeTable {
  types: HashMap<NodeId, Type>,
  members: HashMap<NodeId, Member>,
}

impl TypeTable {
  pub fn get(&self, id: NodeId) -> Option<&Type> {
    self.types.get(&id)
  }

  pub fn of(&self, expr: &Expr) -> Option<&Type> {
    self.get(expr.id)
  }

  pub fn member(&self, id: NodeId) -> Option<&Member> {
    self.members.get(&id)
  }

  pub fn len(&self) -> usize {
    self.types.len()
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty()
  }

  /// Check that every expression reachable from `func` has a type. The
  /// only untyped node allowed is a call to a function without results
  /// used as a statement.
  pub fn verify(&self, func: &Function, source: &str) -> CompileResult<()> {
    self.verify_stmt(&func.body, source)
  }

  fn verify_stmt(&self, stmt: &Stmt, source: &str) -> CompileResult<()> {
    match stmt {
      Stmt::Expr(expr) => match &expr.kind {
        ExprKind::Call { args, .. } if self.of(expr).is_none() => args
          .iter()
          .try_for_each(|arg| self.verify_expr(arg, source)),
        _ => self.verify_expr(expr, source),
      },
      Stmt::Assign(assign) | Stmt::Return(Some(assign)) => assign
        .lhs
        .iter()
        .chain(assign.rhs.iter())
        .try_for_each(|e| self.verify_expr(e, source)),
      Stmt::Return(None) => Ok(()),
      Stmt::Block(stmts) => stmts.iter().try_for_each(|s| self.verify_stmt(s, source)),
      Stmt::If {
        init,
        cond,
        then,
        els,
      } => {
        if let Some(init) = init {
          self.verify_stmt(init, source)?;
        }
        self.verify_expr(cond, source)?;
        self.verify_stmt(then, source)?;
        if let Some(els) = els {
          self.verify_stmt(els, source)?;
        }
        Ok(())
      }
      Stmt::For {
        init,
        cond,
        post,
        body,
      } => {
        for s in [init, post].into_iter().flatten() {
          self.verify_stmt(s, source)?;
        }
        if let Some(cond) = cond {
          self.verify_expr(cond, source)?;
        }
        self.verify_stmt(body, source)
      }
    }
  }

  fn verify_expr(&self, expr: &Expr, source: &str) -> CompileResult<()> {
    if self.of(expr).is_none() {
      return Err(CompileError::at(
        ErrorKind::Semantic,
        source,
        expr.loc,
        "expression has no type",
      ));
    }
    match &expr.kind {
      ExprKind::Lit { .. } | ExprKind::Var(_) => Ok(()),
      ExprKind::Deref(e) | ExprKind::Addr(e) => self.verify_expr(e, source),
      ExprKind::Member { base, .. } => self.verify_expr(base, source),
      ExprKind::Binary { lhs, rhs, .. } => {
        self.verify_expr(lhs, source)?;
        self.verify_expr(rhs, source)
      }
      ExprKind::Call { args, .. } => args.iter().try_for_each(|a| self.verify_expr(a, source)),
      ExprKind::Composite { elems, .. } => elems.iter().try_for_each(|e| self.verify_expr(e, source)),
    }
  }
}

/// Parameter and result types of a function, as seen by its callers.
#[derive(Debug)]
struct Signature {
  name: String,
  params: Vec<Type>,
  results: Vec<Type>,
}

impl Signature {
  fn of(func: &Function, source: &str) -> CompileResult<Self> {
    let types = |ids: &[VarId]| {
      ids
        .iter()
        .map(|&id| {
          func.var(id).ty.clone().ok_or_else(|| {
            CompileError::at(
              ErrorKind::Semantic,
              source,
              func.loc,
              format!("{}: signature type missing", func.name),
            )
          })
        })
        .collect::<CompileResult<Vec<_>>>()
    };
    Ok(Self {
      name: func.name.clone(),
      params: types(&func.params)?,
      results: types(&func.results)?,
    })
  }
}

/// Type-check every function of the program.
pub fn check_program(program: &mut Program, source: &str) -> CompileResult<TypeTable> {
  let signatures = program
    .functions
    .iter()
    .map(|f| Signature::of(f, source))
    .collect::<CompileResult<Vec<_>>>()?;

  let Program { functions, calls } = program;
  let calls = &*calls;
  let mut table = TypeTable::default();
  for func in functions.iter_mut() {
    let mut checker = Checker {
      vars: &mut func.vars,
      signatures: &signatures,
      calls,
      table: &mut table,
      source,
    };
    checker.stmt(&func.body)?;
    trace!("checked {}", func.name);
  }
  debug!("typed {} expressions", table.len());
  Ok(table)
}

struct Checker<'a> {
  vars: &'a mut [Variable],
  signatures: &'a [Signature],
  calls: &'a HashMap<NodeId, usize>,
  table: &'a mut TypeTable,
  source: &'a str,
}

impl Checker<'_> {
  fn error(&self, loc: usize, message: impl Into<String>) -> CompileError {
    CompileError::at(ErrorKind::Semantic, self.source, loc, message)
  }

  fn stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
    match stmt {
      Stmt::Expr(expr) => {
        if matches!(expr.kind, ExprKind::Call { .. }) {
          self.call(expr, true)?;
        } else {
          self.expr(expr)?;
        }
        Ok(())
      }
      Stmt::Assign(assign) | Stmt::Return(Some(assign)) => self.assign(assign),
      Stmt::Return(None) => Ok(()),
      Stmt::Block(stmts) => stmts.iter().try_for_each(|s| self.stmt(s)),
      Stmt::If {
        init,
        cond,
        then,
        els,
      } => {
        if let Some(init) = init {
          self.stmt(init)?;
        }
        self.expr(cond)?;
        self.stmt(then)?;
        if let Some(els) = els {
          self.stmt(els)?;
        }
        Ok(())
      }
      Stmt::For {
        init,
        cond,
        post,
        body,
      } => {
        if let Some(init) = init {
          self.stmt(init)?;
        }
        if let Some(cond) = cond {
          self.expr(cond)?;
        }
        if let Some(post) = post {
          self.stmt(post)?;
        }
        self.stmt(body)
      }
    }
  }

  fn assign(&mut self, assign: &Assign) -> CompileResult<()> {
    if let Some(call) = assign.rhs.single_call()
      && let Some(index) = self.calls.get(&call.id).copied()
      && self.signatures[index].results.len() > 1
    {
      self.call(call, false)?;
      let signatures = self.signatures;
      let results = &signatures[index].results;
      if assign.lhs.len() != results.len() {
        return Err(self.arity_error(assign, results.len()));
      }
      for (target, ty) in assign.lhs.iter().zip(results.iter().cloned()) {
        self.target(target, ty)?;
      }
      return Ok(());
    }

    if assign.lhs.len() != assign.rhs.len() {
      return Err(self.arity_error(assign, assign.rhs.len()));
    }
    for (target, value) in assign.lhs.iter().zip(assign.rhs.iter()) {
      let ty = self.source_expr(value)?;
      self.target(target, ty)?;
    }
    Ok(())
  }

  fn arity_error(&self, assign: &Assign, values: usize) -> CompileError {
    self.error(
      assign.loc,
      format!(
        "assignment operands must be same length: lhs={}, rhs={values}",
        assign.lhs.len()
      ),
    )
  }

  /// An untyped variable takes the type of the value assigned to it.
  fn target(&mut self, target: &Expr, ty: Type) -> CompileResult<()> {
    if let ExprKind::Var(id) = target.kind
      && self.vars[id.0].ty.is_none()
    {
      trace!("{} inferred as {ty}", self.vars[id.0].name);
      self.vars[id.0].ty = Some(ty);
    }
    self.expr(target)?;
    Ok(())
  }

  /// Like `expr`, but also accepts composite literals.
  fn source_expr(&mut self, expr: &Expr) -> CompileResult<Type> {
    match &expr.kind {
      ExprKind::Composite { ty, elems } => {
        if self.table.get(expr.id).is_none() {
          self.composite(expr, ty, elems)?;
        }
        Ok(ty.clone())
      }
      _ => self.expr(expr),
    }
  }

  fn composite(&mut self, expr: &Expr, ty: &Type, elems: &[Expr]) -> CompileResult<()> {
    match ty {
      Type::Array { len, .. } if elems.len() > *len => {
        return Err(self.error(
          expr.loc,
          format!("too many elements for {ty}: {}", elems.len()),
        ));
      }
      Type::Array { .. } => {}
      Type::Struct(st) if elems.len() != st.members.len() => {
        return Err(self.error(
          expr.loc,
          format!(
            "{ty} needs {} elements, got {}",
            st.members.len(),
            elems.len()
          ),
        ));
      }
      Type::Struct(_) => {}
      _ => return Err(self.error(expr.loc, format!("invalid composite literal type {ty}"))),
    }
    for elem in elems {
      self.source_expr(elem)?;
    }
    self.table.types.insert(expr.id, ty.clone());
    Ok(())
  }

  fn expr(&mut self, expr: &Expr) -> CompileResult<Type> {
    if let Some(ty) = self.table.get(expr.id) {
      return Ok(ty.clone());
    }

    let ty = match &expr.kind {
      ExprKind::Lit { kind, .. } => match kind {
        LitKind::Int => Type::Int,
        LitKind::Byte => Type::Byte,
        LitKind::Bool => Type::Bool,
      },
      ExprKind::Var(id) => {
        let var = &self.vars[id.0];
        var
          .ty
          .clone()
          .ok_or_else(|| self.error(expr.loc, format!("type of {} is not known", var.name)))?
      }
      ExprKind::Binary { op, lhs, rhs } => {
        let lhs_ty = self.expr(lhs)?;
        self.expr(rhs)?;
        match lhs_ty {
          _ if op.is_relational() => Type::Bool,
          // an array operand decays to a pointer to its first element
          Type::Array { base, .. } => Type::Ptr(base),
          other => other,
        }
      }
      ExprKind::Deref(operand) => {
        let operand_ty = self.expr(operand)?;
        match operand_ty.base() {
          Some(base) => base.clone(),
          None => operand_ty,
        }
      }
      ExprKind::Addr(operand) => Type::pointer_to(self.expr(operand)?),
      ExprKind::Member { base, name } => {
        let base_ty = self.expr(base)?;
        let struct_ty = match &base_ty {
          Type::Ptr(pointee) => pointee.as_ref(),
          other => other,
        };
        if !matches!(struct_ty, Type::Struct(_)) {
          return Err(self.error(
            expr.loc,
            format!("member access on non-struct type {base_ty}"),
          ));
        }
        let Some(member) = struct_ty.member(name).cloned() else {
          return Err(self.error(expr.loc, format!("{struct_ty} has no member {name}")));
        };
        let ty = member.ty.clone();
        self.table.members.insert(expr.id, member);
        ty
      }
      ExprKind::Call { name, .. } => match self.call(expr, false)? {
        Some(ty) => ty,
        None => return Err(self.error(expr.loc, format!("{name}() used as value"))),
      },
      ExprKind::Composite { .. } => {
        return Err(self.error(
          expr.loc,
          "composite literal must be assigned directly",
        ));
      }
    };

    self.table.types.insert(expr.id, ty.clone());
    Ok(ty)
  }

  /// Check a call; its type is the callee's first result, if it has one.
  fn call(&mut self, expr: &Expr, allow_void: bool) -> CompileResult<Option<Type>> {
    let ExprKind::Call { name, args } = &expr.kind else {
      return Err(self.error(expr.loc, "call expected"));
    };
    let Some(index) = self.calls.get(&expr.id).copied() else {
      return Err(self.error(expr.loc, format!("unresolved call to {name}")));
    };

    let signatures = self.signatures;
    let signature = &signatures[index];
    if args.len() != signature.params.len() {
      return Err(self.error(
        expr.loc,
        format!(
          "{} expects {} arguments, got {}",
          signature.name,
          signature.params.len(),
          args.len()
        ),
      ));
    }
    for arg in args.iter() {
      self.expr(arg)?;
    }

    let Some(ty) = signature.results.first().cloned() else {
      if allow_void {
        return Ok(None);
      }
      return Err(self.error(expr.loc, format!("{name}() used as value")));
    };
    self.table.types.insert(expr.id, ty.clone());
    Ok(Some(ty))
  }
}
