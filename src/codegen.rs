//! Code generation: lower the checked AST into Intel-syntax x86-64 assembly.
//!
//! The emitter uses a simple stack machine: every expression leaves a single
//! 8-byte value on the stack and statements pop intermediate results as we
//! chain them. Arrays and structs travel as their address and are copied
//! byte by byte when stored. Locals, parameters and results live in the
//! stack frame and are addressed relative to `rbp`; see `layout` for the
//! frame shape and the calling convention.

use std::fmt;

use log::debug;

use crate::ast::{Assign, BinaryOp, Expr, ExprKind, Function, Program, Stmt};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::layout::PARAMS_BASE;
use crate::ty::Type;
use crate::typeck::TypeTable;

/// Emit assembly for a whole program.
pub fn generate(program: &Program, types: &TypeTable, source: &str) -> CompileResult<String> {
  let mut generator = Generator {
    program,
    types,
    source,
    asm: String::new(),
    labels: 0,
  };
  generator.program()?;
  debug!(
    "emitted {} lines of assembly",
    generator.asm.lines().count()
  );
  Ok(generator.asm)
}

/// A memory operand `[base+offset]`.
#[derive(Debug, Clone, Copy)]
struct Addr<'r> {
  base: &'r str,
  offset: i64,
}

impl<'r> Addr<'r> {
  fn new(base: &'r str, offset: i64) -> Self {
    Self { base, offset }
  }

  fn plus(self, delta: i64) -> Self {
    Self {
      offset: self.offset + delta,
      ..self
    }
  }
}

impl fmt::Display for Addr<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.offset == 0 {
      write!(f, "[{}]", self.base)
    } else {
      write!(f, "[{}{:+}]", self.base, self.offset)
    }
  }
}

struct Generator<'a> {
  program: &'a Program,
  types: &'a TypeTable,
  source: &'a str,
  asm: String,
  /// Suffix for the next `if`/`for` labels; unique within one compilation.
  labels: usize,
}

impl<'a> Generator<'a> {
  fn emit(&mut self, line: &str) {
    self.asm.push_str("    ");
    self.asm.push_str(line);
    self.asm.push('\n');
  }

  fn label(&mut self, name: &str) {
    self.asm.push_str(name);
    self.asm.push_str(":\n");
  }

  fn next_label(&mut self) -> usize {
    self.labels += 1;
    self.labels
  }

  fn error(&self, loc: usize, message: impl Into<String>) -> CompileError {
    CompileError::at(ErrorKind::Codegen, self.source, loc, message)
  }

  fn type_of(&self, expr: &Expr) -> CompileResult<&'a Type> {
    self
      .types
      .of(expr)
      .ok_or_else(|| self.error(expr.loc, "expression has no type"))
  }

  fn callee(&self, call: &Expr) -> CompileResult<&'a Function> {
    self
      .program
      .callee(call.id)
      .ok_or_else(|| self.error(call.loc, "unresolved call"))
  }

  fn program(&mut self) -> CompileResult<()> {
    let main = self.program.function("main").ok_or_else(|| {
      CompileError::detached(ErrorKind::Semantic, "function main is not defined")
    })?;
    if !main.params.is_empty() {
      return Err(CompileError::at(
        ErrorKind::Semantic,
        self.source,
        main.loc,
        "main must not take parameters",
      ));
    }

    self.asm.push_str(".intel_syntax noprefix\n");
    self.asm.push_str(".text\n");
    self.entry(main)?;

    let program = self.program;
    for func in &program.functions {
      self.function(func)?;
    }
    Ok(())
  }

  /// Process entry: call `main` and exit with its first result.
  fn entry(&mut self, main: &'a Function) -> CompileResult<()> {
    self.emit(".globl _start");
    self.label("_start");
    if main.results_region_size > 0 {
      self.emit(&format!("sub rsp, {}", main.results_region_size));
    }
    self.emit("call main");
    match main.results.first() {
      Some(&id) => {
        let ty = main.var(id).ty.as_ref().ok_or_else(|| {
          CompileError::detached(ErrorKind::Codegen, "main result has no type")
        })?;
        if ty.is_aggregate() {
          return Err(CompileError::at(
            ErrorKind::Semantic,
            self.source,
            main.loc,
            "main must return a scalar",
          ));
        }
        self.load(ty, "rdi", Addr::new("rsp", 0));
      }
      None => self.emit("xor edi, edi"),
    }
    self.emit("mov eax, 60");
    self.emit("syscall");
    Ok(())
  }

  fn function(&mut self, func: &'a Function) -> CompileResult<()> {
    self.asm.push('\n');
    self.emit(&format!(".globl {}", func.name));
    self.label(&func.name);
    self.emit("push rbp");
    self.emit("mov rbp, rsp");
    if func.stack_size > 0 {
      self.emit(&format!("sub rsp, {}", func.stack_size));
    }

    self.stmt(&func.body, func)?;

    self.label(&format!(".L.return.{}", func.name));
    self.emit("mov rsp, rbp");
    self.emit("pop rbp");
    self.emit("ret");
    Ok(())
  }

  fn stmt(&mut self, stmt: &Stmt, func: &'a Function) -> CompileResult<()> {
    match stmt {
      Stmt::Expr(expr) => {
        if matches!(expr.kind, ExprKind::Call { .. }) {
          let left = self.call(expr, func)?;
          self.drop_bytes(left);
        } else {
          self.expr(expr, func)?;
          self.emit("add rsp, 8");
        }
      }
      Stmt::Assign(assign) => self.assign(assign, func)?,
      Stmt::Return(assign) => {
        if let Some(assign) = assign {
          self.assign(assign, func)?;
        }
        self.emit(&format!("jmp .L.return.{}", func.name));
      }
      Stmt::Block(stmts) => {
        for stmt in stmts {
          self.stmt(stmt, func)?;
        }
      }
      Stmt::If {
        init,
        cond,
        then,
        els,
      } => {
        let c = self.next_label();
        if let Some(init) = init {
          self.stmt(init, func)?;
        }
        self.expr(cond, func)?;
        self.emit("pop rax");
        self.emit("cmp rax, 0");
        self.emit(&format!("je .L.else.{c}"));
        self.stmt(then, func)?;
        self.emit(&format!("jmp .L.end.{c}"));
        self.label(&format!(".L.else.{c}"));
        if let Some(els) = els {
          self.stmt(els, func)?;
        }
        self.label(&format!(".L.end.{c}"));
      }
      Stmt::For {
        init,
        cond,
        post,
        body,
      } => {
        let c = self.next_label();
        if let Some(init) = init {
          self.stmt(init, func)?;
        }
        self.label(&format!(".L.begin.{c}"));
        if let Some(cond) = cond {
          self.expr(cond, func)?;
          self.emit("pop rax");
          self.emit("cmp rax, 0");
          self.emit(&format!("je .L.end.{c}"));
        }
        self.stmt(body, func)?;
        if let Some(post) = post {
          self.stmt(post, func)?;
        }
        self.emit(&format!("jmp .L.begin.{c}"));
        if cond.is_some() {
          self.label(&format!(".L.end.{c}"));
        }
      }
    }
    Ok(())
  }

  /// Evaluate every source before storing any target, so `a, b = b, a`
  /// swaps. Composite literals, and aggregate sources when there are
  /// several targets, are built in their own frame slot first.
  fn assign(&mut self, assign: &Assign, func: &'a Function) -> CompileResult<()> {
    if let Some(call) = assign.rhs.single_call() {
      let callee = self.callee(call)?;
      if callee.results.len() > 1 || self.types.of(call).is_some_and(Type::is_aggregate) {
        return self.assign_results(assign, call, callee, func);
      }
    }

    for value in assign.rhs.iter() {
      match value.kind {
        ExprKind::Composite { .. } => {
          let slot = self.temp(value, func)?;
          self.emit(&format!("lea rax, {}", Addr::new("rbp", slot)));
          self.emit("push rax");
          self.composite_into(value, func)?;
        }
        ExprKind::Call { .. } => self.expr(value, func)?,
        _ => {
          self.expr(value, func)?;
          if let Some(&slot) = func.temps.get(&value.id) {
            let ty = self.type_of(value)?;
            self.emit("pop rdi");
            self.store(ty, Addr::new("rbp", slot));
            self.emit(&format!("lea rax, {}", Addr::new("rbp", slot)));
            self.emit("push rax");
          }
        }
      }
    }
    for target in assign.lhs.iter().rev() {
      let ty = self.type_of(target)?;
      self.addr(target, func)?;
      self.emit("pop rax");
      self.emit("pop rdi");
      self.store(ty, Addr::new("rax", 0));
    }
    Ok(())
  }

  fn temp(&self, expr: &Expr, func: &Function) -> CompileResult<i64> {
    func
      .temps
      .get(&expr.id)
      .copied()
      .ok_or_else(|| self.error(expr.loc, "value has no frame slot"))
  }

  /// `a, b = f()`: copy each result out of the results region.
  fn assign_results(
    &mut self,
    assign: &Assign,
    call: &Expr,
    callee: &'a Function,
    func: &'a Function,
  ) -> CompileResult<()> {
    let left = self.call(call, func)?;
    let base = (PARAMS_BASE + callee.params_region_size) as i64;

    for (target, &result) in assign.lhs.iter().zip(&callee.results) {
      let Some(offset) = callee.var(result).offset else {
        return Err(self.error(call.loc, "callee frame is not laid out"));
      };
      let ty = self.type_of(target)?;
      self.addr(target, func)?;
      self.emit("pop rax");
      self.load(ty, "rdi", Addr::new("rsp", offset - base));
      self.store(ty, Addr::new("rax", 0));
    }
    self.drop_bytes(left);
    Ok(())
  }

  /// Write a composite literal into the address on top of the stack,
  /// leaving that address in place.
  fn composite_into(&mut self, expr: &Expr, func: &'a Function) -> CompileResult<()> {
    let ExprKind::Composite { ty, elems } = &expr.kind else {
      return Err(self.error(expr.loc, "composite literal expected"));
    };
    let slots: Vec<(i64, Type)> = match ty {
      Type::Array { base, len } => (0..*len)
        .map(|i| ((i * base.size()) as i64, base.as_ref().clone()))
        .collect(),
      Type::Struct(st) => st
        .members
        .iter()
        .map(|m| (m.offset as i64, m.ty.clone()))
        .collect(),
      _ => return Err(self.error(expr.loc, format!("invalid composite literal type {ty}"))),
    };

    for (i, (offset, elem_ty)) in slots.iter().enumerate() {
      match elems.get(i) {
        Some(elem) if matches!(elem.kind, ExprKind::Composite { .. }) => {
          self.emit("mov rax, qword ptr [rsp]");
          self.emit(&format!("add rax, {offset}"));
          self.emit("push rax");
          self.composite_into(elem, func)?;
          self.emit("add rsp, 8");
        }
        Some(elem) => {
          self.expr(elem, func)?;
          self.emit("pop rdi");
          self.emit("mov rax, qword ptr [rsp]");
          self.store(elem_ty, Addr::new("rax", *offset));
        }
        None => {
          self.emit("mov rax, qword ptr [rsp]");
          self.zero(Addr::new("rax", *offset), elem_ty.size());
        }
      }
    }
    Ok(())
  }

  /// Emit stack-based code for a single expression node.
  fn expr(&mut self, expr: &Expr, func: &'a Function) -> CompileResult<()> {
    match &expr.kind {
      ExprKind::Lit { value, .. } => {
        self.emit(&format!("mov rax, {value}"));
        self.emit("push rax");
      }
      ExprKind::Var(_) | ExprKind::Deref(_) | ExprKind::Member { .. } => {
        let ty = self.type_of(expr)?;
        self.addr(expr, func)?;
        self.emit("pop rax");
        self.load(ty, "rax", Addr::new("rax", 0));
        self.emit("push rax");
      }
      ExprKind::Addr(operand) => self.addr(operand, func)?,
      ExprKind::Binary { op, lhs, rhs } => {
        self.expr(lhs, func)?;
        self.expr(rhs, func)?;
        self.emit("pop rdi");
        self.emit("pop rax");
        self.binary(*op, self.type_of(lhs)?);
        self.emit("push rax");
      }
      ExprKind::Call { .. } => {
        let callee = self.callee(expr)?;
        let left = self.call(expr, func)?;
        match callee.results.first() {
          Some(&id) => {
            let ty = self.type_of(expr)?;
            let offset = callee.var(id).offset.unwrap_or_default();
            let base = (PARAMS_BASE + callee.params_region_size) as i64;
            let result = Addr::new("rsp", offset - base);
            if ty.is_aggregate() {
              // the results region is released below, keep a copy
              let slot = self.temp(expr, func)?;
              self.emit(&format!("lea rdi, {result}"));
              self.store(ty, Addr::new("rbp", slot));
              self.emit(&format!("lea rax, {}", Addr::new("rbp", slot)));
            } else {
              self.load(ty, "rax", result);
            }
          }
          None => self.emit("xor eax, eax"),
        }
        self.drop_bytes(left);
        self.emit("push rax");
      }
      ExprKind::Composite { .. } => {
        return Err(self.error(expr.loc, "composite literal must be assigned directly"));
      }
    }
    Ok(())
  }

  /// rax = rax op rdi
  fn binary(&mut self, op: BinaryOp, lhs_ty: &Type) {
    match op {
      BinaryOp::Add | BinaryOp::Sub => {
        if let Some(base) = lhs_ty.base()
          && base.size() != 1
        {
          self.emit(&format!("imul rdi, {}", base.size()));
        }
        let mnemonic = if op == BinaryOp::Add { "add" } else { "sub" };
        self.emit(&format!("{mnemonic} rax, rdi"));
      }
      BinaryOp::Mul => self.emit("imul rax, rdi"),
      BinaryOp::Div => {
        self.emit("cqo");
        self.emit("idiv rdi");
      }
      BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le => {
        let set = match op {
          BinaryOp::Eq => "sete",
          BinaryOp::Ne => "setne",
          BinaryOp::Lt => "setl",
          _ => "setle",
        };
        self.emit("cmp rax, rdi");
        self.emit(&format!("{set} al"));
        self.emit("movzx eax, al");
      }
    }
  }

  /// Push the address of an lvalue.
  fn addr(&mut self, expr: &Expr, func: &'a Function) -> CompileResult<()> {
    match &expr.kind {
      ExprKind::Var(id) => {
        let var = func.var(*id);
        let Some(offset) = var.offset else {
          return Err(self.error(expr.loc, format!("{} has no frame slot", var.name)));
        };
        self.emit(&format!("lea rax, {}", Addr::new("rbp", offset)));
        self.emit("push rax");
      }
      ExprKind::Deref(pointer) => self.expr(pointer, func)?,
      ExprKind::Member { base, .. } => {
        if self.type_of(base)?.is_pointer() {
          self.expr(base, func)?;
        } else {
          self.addr(base, func)?;
        }
        let member = self
          .types
          .member(expr.id)
          .ok_or_else(|| self.error(expr.loc, "unresolved member"))?;
        if member.offset > 0 {
          self.emit("pop rax");
          self.emit(&format!("add rax, {}", member.offset));
          self.emit("push rax");
        }
      }
      ExprKind::Call { .. } if self.types.of(expr).is_some_and(Type::is_aggregate) => {
        self.expr(expr, func)?
      }
      _ => return Err(self.error(expr.loc, "not a value")),
    }
    Ok(())
  }

  /// Lower a call. Leaves the callee's results region on top of the stack
  /// and returns its size.
  ///
  /// The caller reserves results and parameters in one go, evaluates the
  /// arguments in reverse order as temporaries, copies each into its
  /// parameter slot and drops the temporaries, so that at `call` the
  /// parameters start at `rsp` and the results follow them.
  fn call(&mut self, expr: &Expr, func: &'a Function) -> CompileResult<usize> {
    let ExprKind::Call { name, args } = &expr.kind else {
      return Err(self.error(expr.loc, "call expected"));
    };
    let callee = self.callee(expr)?;
    let reserved = callee.results_region_size + callee.params_region_size;
    if reserved > 0 {
      self.emit(&format!("sub rsp, {reserved}"));
    }

    for arg in args.iter().rev() {
      self.expr(arg, func)?;
    }
    let temporaries = (args.len() * 8) as i64;
    for (i, &param) in callee.params.iter().enumerate() {
      let var = callee.var(param);
      let (Some(ty), Some(offset)) = (&var.ty, var.offset) else {
        return Err(self.error(expr.loc, format!("parameter {} of {name} is not laid out", var.name)));
      };
      self.emit(&format!("mov rdi, qword ptr {}", Addr::new("rsp", 8 * i as i64)));
      self.store(ty, Addr::new("rsp", temporaries + offset - PARAMS_BASE as i64));
    }
    if temporaries > 0 {
      self.emit(&format!("add rsp, {temporaries}"));
    }

    self.emit(&format!("call {name}"));
    if callee.params_region_size > 0 {
      self.emit(&format!("add rsp, {}", callee.params_region_size));
    }
    Ok(callee.results_region_size)
  }

  /// Load a value of type `ty` from `src` into `reg` (a 64-bit register
  /// name). Aggregates load as their address.
  fn load(&mut self, ty: &Type, reg: &str, src: Addr) {
    if ty.is_aggregate() {
      self.emit(&format!("lea {reg}, {src}"));
    } else if ty.size() == 1 {
      self.emit(&format!("movzx {}, byte ptr {src}", low32(reg)));
    } else {
      self.emit(&format!("mov {reg}, qword ptr {src}"));
    }
  }

  /// Store `rdi` (or, for aggregates, the bytes `rdi` points to) at `dst`.
  fn store(&mut self, ty: &Type, dst: Addr) {
    if ty.is_aggregate() {
      for k in 0..ty.size() as i64 {
        self.emit(&format!("mov r8b, byte ptr {}", Addr::new("rdi", k)));
        self.emit(&format!("mov byte ptr {}, r8b", dst.plus(k)));
      }
    } else if ty.size() == 1 {
      self.emit(&format!("mov byte ptr {dst}, dil"));
    } else {
      self.emit(&format!("mov qword ptr {dst}, rdi"));
    }
  }

  fn zero(&mut self, dst: Addr, size: usize) {
    let size = size as i64;
    let mut k = 0;
    while k + 8 <= size {
      self.emit(&format!("mov qword ptr {}, 0", dst.plus(k)));
      k += 8;
    }
    while k < size {
      self.emit(&format!("mov byte ptr {}, 0", dst.plus(k)));
      k += 1;
    }
  }

  fn drop_bytes(&mut self, bytes: usize) {
    if bytes > 0 {
      self.emit(&format!("add rsp, {bytes}"));
    }
  }
}

fn low32(reg: &str) -> &str {
  match reg {
    "rax" => "eax",
    "rdi" => "edi",
    other => other,
  }
}
