//! Stack frame layout.
//!
//! Offsets are relative to the frame base (`rbp`). The caller reserves the
//! results region and then the parameters region, so above the saved frame
//! pointer and return address the callee finds its parameters followed by
//! its results:
//!
//! ```text
//!   rbp + 16 + P + ...  results (8-byte aligned slots)
//!   rbp + 16 ...        parameters (naturally aligned)
//!   rbp + 8             return address
//!   rbp                 saved rbp
//!   rbp - ...           locals
//! ```

use log::{debug, trace};

use crate::ast::{Assign, Expr, ExprKind, Function, NodeId, Program, Stmt};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::symbols::{VarId, Variable};
use crate::ty::{Type, align_to};
use crate::typeck::TypeTable;

/// Distance from the frame base to the first parameter.
pub const PARAMS_BASE: usize = 16;

/// Lay out every function of a checked program.
pub fn layout_program(program: &mut Program, types: &TypeTable, source: &str) -> CompileResult<()> {
  for func in &mut program.functions {
    types.verify(func, source)?;
    layout_function(func, types)?;
    debug!(
      "{}: params {} bytes, results {} bytes, stack {} bytes",
      func.name, func.params_region_size, func.results_region_size, func.stack_size
    );
  }
  Ok(())
}

/// Assign offsets to the parameters, results, locals and temporaries of
/// `func`. Slots that already have an offset keep it, so running this twice
/// gives the same frame.
pub fn layout_function(func: &mut Function, types: &TypeTable) -> CompileResult<()> {
  let params_end = place_upward(&mut func.vars, &func.params, PARAMS_BASE, Type::align)?;
  func.params_region_size = align_to(params_end - PARAMS_BASE, 8);

  let results_base = PARAMS_BASE + func.params_region_size;
  let results_end = place_upward(&mut func.vars, &func.results, results_base, |_| 8)?;
  func.results_region_size = align_to(results_end - results_base, 8);

  let mut depth = 0;
  for &id in &func.locals {
    let var = &mut func.vars[id.0];
    let ty = declared_type(var)?;
    match var.offset {
      Some(offset) => depth = depth.max(offset.unsigned_abs() as usize),
      None => {
        depth = align_to(depth + ty.size(), ty.align());
        var.offset = Some(-(depth as i64));
        trace!("{}: local {} at {}", func.name, var.name, -(depth as i64));
      }
    }
  }

  let mut temps = Temps {
    types,
    slots: Vec::new(),
  };
  temps.stmt(&func.body);
  for (id, ty) in temps.slots {
    match func.temps.get(&id) {
      Some(offset) => depth = depth.max(offset.unsigned_abs() as usize),
      None => {
        depth = align_to(depth + ty.size(), ty.align());
        func.temps.insert(id, -(depth as i64));
      }
    }
  }

  func.stack_size = align_to(depth, 16);
  Ok(())
}

/// Finds the values codegen copies into a frame slot before storing them:
/// aggregate call results used as values, composite literals, and the
/// aggregate sources of an assignment with several targets.
struct Temps<'t> {
  types: &'t TypeTable,
  slots: Vec<(NodeId, Type)>,
}

impl Temps<'_> {
  fn stmt(&mut self, stmt: &Stmt) {
    match stmt {
      Stmt::Expr(expr) => self.operands(expr),
      Stmt::Assign(assign) | Stmt::Return(Some(assign)) => self.assign(assign),
      Stmt::Return(None) => {}
      Stmt::Block(stmts) => stmts.iter().for_each(|s| self.stmt(s)),
      Stmt::If {
        init,
        cond,
        then,
        els,
      } => {
        init.iter().for_each(|s| self.stmt(s));
        self.value(cond);
        self.stmt(then);
        els.iter().for_each(|s| self.stmt(s));
      }
      Stmt::For {
        init,
        cond,
        post,
        body,
      } => {
        init.iter().for_each(|s| self.stmt(s));
        cond.iter().for_each(|e| self.value(e));
        post.iter().for_each(|s| self.stmt(s));
        self.stmt(body);
      }
    }
  }

  fn assign(&mut self, assign: &Assign) {
    assign.lhs.iter().for_each(|e| self.value(e));
    // results are copied straight out of the callee's results region
    if let Some(call) = assign.rhs.single_call() {
      self.operands(call);
      return;
    }
    let parallel = assign.lhs.len() > 1;
    for value in assign.rhs.iter() {
      match value.kind {
        ExprKind::Composite { .. } => {
          self.slot(value);
          self.operands(value);
        }
        ExprKind::Call { .. } => self.value(value),
        _ => {
          if parallel && self.types.of(value).is_some_and(Type::is_aggregate) {
            self.slot(value);
          }
          self.value(value);
        }
      }
    }
  }

  fn value(&mut self, expr: &Expr) {
    if matches!(expr.kind, ExprKind::Call { .. })
      && self.types.of(expr).is_some_and(Type::is_aggregate)
    {
      self.slot(expr);
    }
    self.operands(expr);
  }

  fn operands(&mut self, expr: &Expr) {
    match &expr.kind {
      ExprKind::Lit { .. } | ExprKind::Var(_) => {}
      ExprKind::Deref(e) | ExprKind::Addr(e) => self.value(e),
      ExprKind::Member { base, .. } => self.value(base),
      ExprKind::Binary { lhs, rhs, .. } => {
        self.value(lhs);
        self.value(rhs);
      }
      ExprKind::Call { args, .. } => args.iter().for_each(|a| self.value(a)),
      // nested literals are written in place inside their parent's slot
      ExprKind::Composite { elems, .. } => elems.iter().for_each(|e| match e.kind {
        ExprKind::Composite { .. } => self.operands(e),
        _ => self.value(e),
      }),
    }
  }

  fn slot(&mut self, expr: &Expr) {
    if let Some(ty) = self.types.of(expr)
      && !self.slots.iter().any(|(id, _)| *id == expr.id)
    {
      self.slots.push((expr.id, ty.clone()));
    }
  }
}

/// Place `ids` one after another from `start`, returning the end offset.
fn place_upward(
  vars: &mut [Variable],
  ids: &[VarId],
  start: usize,
  align_of: impl Fn(&Type) -> usize,
) -> CompileResult<usize> {
  let mut end = start;
  for &id in ids {
    let var = &mut vars[id.0];
    let ty = declared_type(var)?;
    let offset = match var.offset {
      Some(offset) => offset as usize,
      None => {
        let offset = align_to(end, align_of(&ty));
        var.offset = Some(offset as i64);
        offset
      }
    };
    end = end.max(offset + ty.size());
  }
  Ok(end)
}

fn declared_type(var: &Variable) -> CompileResult<Type> {
  var.ty.clone().ok_or_else(|| {
    CompileError::detached(
      ErrorKind::Semantic,
      format!("variable {} has no type", var.name),
    )
  })
}
