//! Recursive-descent parser producing one `Function` per declaration.
//!
//! The parser mirrors the classic chibicc structure: a precedence-climbing
//! set of helpers for expressions and a statement layer on top. While
//! parsing a function it resolves identifiers against that function's
//! `SymbolTable`; calls are only recorded, and bound to their callee once
//! every function in the program has been seen, so forward references work.

use std::collections::HashMap;

use log::{debug, trace};

use crate::ast::{
  Assign, BinaryOp, Expr, ExprKind, ExprList, Function, LitKind, NodeId, Program, Stmt,
};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::symbols::{SymbolTable, VarId};
use crate::tokenizer::{Token, TokenKind, describe_token};
use crate::ty::{MAX_OBJECT_SIZE, Type};

/// Parse a whole program and bind every call to its callee.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Program> {
  let mut parser = Parser::new(tokens, source);
  let mut functions = Vec::new();

  loop {
    while parser.stream.equal(";") {}
    if parser.stream.is_eof() {
      break;
    }
    let func = parser.function()?;
    trace!(
      "parsed function {} ({} variables)",
      func.name,
      func.vars.len()
    );
    functions.push(func);
  }

  let calls = resolve_calls(&functions, &parser.pending_calls, source)?;
  debug!(
    "parsed {} functions, {} call sites",
    functions.len(),
    calls.len()
  );
  Ok(Program { functions, calls })
}

/// Second phase of call resolution: every recorded call site is bound to
/// the function declared with its name.
fn resolve_calls(
  functions: &[Function],
  pending: &[PendingCall],
  source: &str,
) -> CompileResult<HashMap<NodeId, usize>> {
  let mut by_name = HashMap::new();
  for (index, func) in functions.iter().enumerate() {
    if by_name.insert(func.name.as_str(), index).is_some() {
      return Err(CompileError::at(
        ErrorKind::Semantic,
        source,
        func.loc,
        format!("function {} redeclared", func.name),
      ));
    }
  }

  pending
    .iter()
    .map(|call| match by_name.get(call.name.as_str()) {
      Some(&index) => Ok((call.node, index)),
      None => Err(CompileError::at(
        ErrorKind::Semantic,
        source,
        call.loc,
        format!("undefined function: {}", call.name),
      )),
    })
    .collect()
}

#[derive(Debug)]
struct PendingCall {
  node: NodeId,
  name: String,
  loc: usize,
}

/// Scratch state for the function currently being parsed.
#[derive(Default)]
struct FnContext {
  symbols: SymbolTable,
  params: Vec<VarId>,
  results: Vec<VarId>,
  locals: Vec<VarId>,
}

impl FnContext {
  fn declare_local(&mut self, name: &str, ty: Option<Type>) -> VarId {
    let id = self.symbols.declare(name, ty);
    self.locals.push(id);
    id
  }
}

struct Parser<'a> {
  stream: TokenStream<'a>,
  next_id: usize,
  pending_calls: Vec<PendingCall>,
}

impl<'a> Parser<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      stream: TokenStream::new(tokens, source),
      next_id: 0,
      pending_calls: Vec::new(),
    }
  }

  fn error(&self, loc: usize, message: impl Into<String>) -> CompileError {
    CompileError::at(ErrorKind::Semantic, self.stream.source, loc, message)
  }

  fn node(&mut self, loc: usize, kind: ExprKind) -> Expr {
    let id = NodeId(self.next_id);
    self.next_id += 1;
    Expr { id, loc, kind }
  }

  fn lit(&mut self, loc: usize, kind: LitKind, value: i64) -> Expr {
    self.node(loc, ExprKind::Lit { kind, value })
  }

  fn var(&mut self, loc: usize, id: VarId) -> Expr {
    self.node(loc, ExprKind::Var(id))
  }

  fn binary(&mut self, loc: usize, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    self.node(
      loc,
      ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
    )
  }

  fn deref(&mut self, loc: usize, operand: Expr) -> Expr {
    self.node(loc, ExprKind::Deref(Box::new(operand)))
  }

  // function = "func"? ident "(" params ")" results? "{" block "}" ";"
  fn function(&mut self) -> CompileResult<Function> {
    self.stream.consume_keyword("func");
    let (name, loc) = self.stream.get_ident()?;
    let mut ctx = FnContext::default();

    self.stream.skip("(")?;
    ctx.params = self.field_list(&mut ctx.symbols, ")")?;
    self.stream.skip(")")?;

    ctx.results = self.results(&mut ctx.symbols)?;

    let body = self.block(&mut ctx)?;
    self.stream.skip(";")?;

    let FnContext {
      symbols,
      params,
      results,
      locals,
    } = ctx;
    Ok(Function {
      name,
      loc,
      vars: symbols.into_vars(),
      params,
      results,
      locals,
      temps: HashMap::new(),
      body,
      stack_size: 0,
      params_region_size: 0,
      results_region_size: 0,
    })
  }

  /// `name type, name, name type, ...` up to (not including) `close`.
  /// Consecutive names share the type that follows them.
  fn field_list(&mut self, symbols: &mut SymbolTable, close: &str) -> CompileResult<Vec<VarId>> {
    let mut ids = Vec::new();
    let mut pending: Vec<String> = Vec::new();

    while !self.stream.peek_is(close) {
      if !ids.is_empty() || !pending.is_empty() {
        self.stream.skip(",")?;
      }
      let (name, _) = self.stream.get_ident()?;
      pending.push(name);
      if self.stream.peek_is(",") {
        continue;
      }
      let ty = self.parse_type()?;
      for name in pending.drain(..) {
        ids.push(symbols.declare(name, Some(ty.clone())));
      }
    }

    if let Some(name) = pending.first() {
      let loc = self.stream.loc();
      return Err(self.error(loc, format!("missing type for {name}")));
    }
    Ok(ids)
  }

  // results = "(" (field_list | type ("," type)*) ")" | type
  fn results(&mut self, symbols: &mut SymbolTable) -> CompileResult<Vec<VarId>> {
    if self.stream.equal("(") {
      if self.stream.peek_kind() == Some(TokenKind::Ident) {
        let ids = self.field_list(symbols, ")")?;
        self.stream.skip(")")?;
        return Ok(ids);
      }
      let mut ids = Vec::new();
      while !self.stream.equal(")") {
        if !ids.is_empty() {
          self.stream.skip(",")?;
        }
        let ty = self.parse_type()?;
        ids.push(symbols.declare(format!("~r{}", ids.len()), Some(ty)));
      }
      return Ok(ids);
    }

    if self.stream.starts_type() {
      let ty = self.parse_type()?;
      return Ok(vec![symbols.declare("~r0", Some(ty))]);
    }
    Ok(Vec::new())
  }

  fn parse_type(&mut self) -> CompileResult<Type> {
    if let Some(token) = self.stream.peek()
      && token.kind == TokenKind::TypeName
    {
      let ty = Type::from_name(&token.text);
      let loc = token.loc;
      self.stream.advance();
      return ty.ok_or_else(|| self.error(loc, "unknown type name"));
    }

    if self.stream.equal("*") {
      return Ok(Type::pointer_to(self.parse_type()?));
    }

    if self.stream.equal("[") {
      let (len, loc) = self.stream.get_number()?;
      let len = usize::try_from(len).map_err(|_| self.error(loc, "invalid array length"))?;
      self.stream.skip("]")?;
      let base = self.parse_type()?;
      if len
        .checked_mul(base.size())
        .is_none_or(|size| size > MAX_OBJECT_SIZE)
      {
        return Err(self.error(loc, format!("array too large: [{len}]{base}")));
      }
      return Ok(Type::array_of(base, len));
    }

    if self.stream.peek_keyword("struct") {
      let loc = self.stream.loc();
      self.stream.advance();
      let ty = self.struct_type()?;
      if ty.size() > MAX_OBJECT_SIZE {
        return Err(self.error(loc, format!("struct too large: {} bytes", ty.size())));
      }
      return Ok(ty);
    }

    Err(self.stream.unexpected("a type"))
  }

  // struct-type = "struct" "{" (ident ("," ident)* type ";")* "}"
  fn struct_type(&mut self) -> CompileResult<Type> {
    self.stream.skip("{")?;
    let mut fields: Vec<(String, Type)> = Vec::new();

    loop {
      if self.stream.equal("}") {
        break;
      }
      if self.stream.equal(";") {
        continue;
      }
      let mut names = vec![self.stream.get_ident()?];
      while self.stream.equal(",") {
        names.push(self.stream.get_ident()?);
      }
      let ty = self.parse_type()?;
      for (name, loc) in names {
        if fields.iter().any(|(n, _)| *n == name) {
          return Err(self.error(loc, format!("duplicate field {name}")));
        }
        fields.push((name, ty.clone()));
      }
      if !self.stream.peek_is("}") {
        self.stream.skip(";")?;
      }
    }

    Ok(Type::struct_of(fields))
  }

  // block = "{" (stmt ";")* "}"
  fn block(&mut self, ctx: &mut FnContext) -> CompileResult<Stmt> {
    self.stream.skip("{")?;
    let mut stmts = Vec::new();

    loop {
      if self.stream.equal("}") {
        break;
      }
      if self.stream.equal(";") {
        continue;
      }
      stmts.push(self.stmt(ctx)?);
      if !self.stream.peek_is("}") {
        self.stream.skip(";")?;
      }
    }

    Ok(Stmt::Block(stmts))
  }

  fn stmt(&mut self, ctx: &mut FnContext) -> CompileResult<Stmt> {
    let loc = self.stream.loc();
    if self.stream.consume_keyword("return") {
      return self.return_stmt(ctx, loc);
    }
    if self.stream.consume_keyword("if") {
      return self.if_stmt(ctx);
    }
    if self.stream.consume_keyword("for") {
      return self.for_stmt(ctx);
    }
    if self.stream.consume_keyword("var") {
      return self.var_decl(ctx);
    }
    if self.stream.peek_is("{") {
      return self.block(ctx);
    }
    self.simple_stmt(ctx)
  }

  /// A return with values becomes an assignment to the result variables.
  fn return_stmt(&mut self, ctx: &mut FnContext, loc: usize) -> CompileResult<Stmt> {
    if self.stream.peek_is(";") || self.stream.peek_is("}") {
      if !ctx.results.is_empty() {
        return Err(self.error(loc, "not enough return values"));
      }
      return Ok(Stmt::Return(None));
    }

    if ctx.results.is_empty() {
      return Err(self.error(loc, "too many return values"));
    }
    let rhs = self.expr_list(ctx)?;
    let targets = ctx.results.clone();
    let lhs = targets.into_iter().map(|id| self.var(loc, id)).collect();
    Ok(Stmt::Return(Some(Assign {
      lhs: ExprList(lhs),
      rhs,
      loc,
    })))
  }

  // if-stmt = "if" (simple-stmt ";")? expr block ("else" (if-stmt | block))?
  fn if_stmt(&mut self, ctx: &mut FnContext) -> CompileResult<Stmt> {
    let (init, cond) = match self.simple_stmt(ctx)? {
      Stmt::Expr(cond) => (None, cond),
      init => {
        self.stream.skip(";")?;
        (Some(Box::new(init)), self.expr(ctx)?)
      }
    };
    let then = Box::new(self.block(ctx)?);

    let els = if self.stream.consume_keyword("else") {
      if self.stream.consume_keyword("if") {
        Some(Box::new(self.if_stmt(ctx)?))
      } else {
        Some(Box::new(self.block(ctx)?))
      }
    } else {
      None
    };

    Ok(Stmt::If {
      init,
      cond,
      then,
      els,
    })
  }

  // for-stmt = "for" block
  //          | "for" expr block
  //          | "for" simple-stmt? ";" expr? ";" simple-stmt? block
  fn for_stmt(&mut self, ctx: &mut FnContext) -> CompileResult<Stmt> {
    if self.stream.peek_is("{") {
      let body = Box::new(self.block(ctx)?);
      return Ok(Stmt::For {
        init: None,
        cond: None,
        post: None,
        body,
      });
    }

    let init = if self.stream.peek_is(";") {
      None
    } else {
      match self.simple_stmt(ctx)? {
        Stmt::Expr(cond) if self.stream.peek_is("{") => {
          let body = Box::new(self.block(ctx)?);
          return Ok(Stmt::For {
            init: None,
            cond: Some(cond),
            post: None,
            body,
          });
        }
        init => Some(Box::new(init)),
      }
    };

    self.stream.skip(";")?;
    let cond = if self.stream.peek_is(";") {
      None
    } else {
      Some(self.expr(ctx)?)
    };
    self.stream.skip(";")?;
    let post = if self.stream.peek_is("{") {
      None
    } else {
      Some(Box::new(self.simple_stmt(ctx)?))
    };
    let body = Box::new(self.block(ctx)?);

    Ok(Stmt::For {
      init,
      cond,
      post,
      body,
    })
  }

  // var-decl = "var" (var-spec | "(" (var-spec ";")* ")")
  fn var_decl(&mut self, ctx: &mut FnContext) -> CompileResult<Stmt> {
    if !self.stream.equal("(") {
      return self.var_spec(ctx);
    }

    let mut specs = Vec::new();
    loop {
      if self.stream.equal(")") {
        break;
      }
      if self.stream.equal(";") {
        continue;
      }
      specs.push(self.var_spec(ctx)?);
      if !self.stream.peek_is(")") {
        self.stream.skip(";")?;
      }
    }
    Ok(Stmt::Block(specs))
  }

  // var-spec = ident ("," ident)* type? ("=" expr-list)?
  fn var_spec(&mut self, ctx: &mut FnContext) -> CompileResult<Stmt> {
    let loc = self.stream.loc();
    let names = self.ident_list()?;
    let ty = if self.stream.starts_type() {
      Some(self.parse_type()?)
    } else {
      None
    };

    if self.stream.equal("=") {
      let rhs = self.expr_list(ctx)?;
      let lhs = names
        .iter()
        .map(|(name, loc)| {
          let id = ctx.declare_local(name, ty.clone());
          self.var(*loc, id)
        })
        .collect();
      return Ok(Stmt::Assign(Assign {
        lhs: ExprList(lhs),
        rhs,
        loc,
      }));
    }

    let Some(ty) = ty else {
      return Err(self.stream.unexpected("a type or \"=\""));
    };
    let mut stmts = Vec::new();
    for (name, loc) in names {
      let id = ctx.declare_local(&name, Some(ty.clone()));
      let target = self.var(loc, id);
      self.zero_fill(target, &ty, loc, &mut stmts);
    }
    Ok(Stmt::Block(stmts))
  }

  /// Emit assignments that set every scalar inside `target` to zero.
  fn zero_fill(&mut self, target: Expr, ty: &Type, loc: usize, out: &mut Vec<Stmt>) {
    match ty {
      Type::Struct(st) => {
        for member in &st.members {
          let base = self.fresh_copy(&target);
          let field = self.node(
            loc,
            ExprKind::Member {
              base: Box::new(base),
              name: member.name.clone(),
            },
          );
          self.zero_fill(field, &member.ty, loc, out);
        }
      }
      Type::Array { base, len } => {
        for i in 0..*len {
          let array = self.fresh_copy(&target);
          let index = self.lit(loc, LitKind::Int, i as i64);
          let addr = self.binary(loc, BinaryOp::Add, array, index);
          let elem = self.deref(loc, addr);
          self.zero_fill(elem, base, loc, out);
        }
      }
      Type::Int | Type::Ptr(_) | Type::Byte | Type::Bool => {
        let kind = match ty {
          Type::Byte => LitKind::Byte,
          Type::Bool => LitKind::Bool,
          _ => LitKind::Int,
        };
        let zero = self.lit(loc, kind, 0);
        out.push(Stmt::Assign(Assign {
          lhs: ExprList(vec![target]),
          rhs: ExprList(vec![zero]),
          loc,
        }));
      }
    }
  }

  /// Deep copy of an expression with new node ids.
  fn fresh_copy(&mut self, expr: &Expr) -> Expr {
    let kind = match &expr.kind {
      ExprKind::Lit { kind, value } => ExprKind::Lit {
        kind: *kind,
        value: *value,
      },
      ExprKind::Var(id) => ExprKind::Var(*id),
      ExprKind::Deref(e) => ExprKind::Deref(Box::new(self.fresh_copy(e))),
      ExprKind::Addr(e) => ExprKind::Addr(Box::new(self.fresh_copy(e))),
      ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
        op: *op,
        lhs: Box::new(self.fresh_copy(lhs)),
        rhs: Box::new(self.fresh_copy(rhs)),
      },
      ExprKind::Call { name, args } => {
        let args = args.iter().map(|a| self.fresh_copy(a)).collect();
        ExprKind::Call {
          name: name.clone(),
          args: ExprList(args),
        }
      }
      ExprKind::Member { base, name } => ExprKind::Member {
        base: Box::new(self.fresh_copy(base)),
        name: name.clone(),
      },
      ExprKind::Composite { ty, elems } => ExprKind::Composite {
        ty: ty.clone(),
        elems: elems.iter().map(|e| self.fresh_copy(e)).collect(),
      },
    };
    let copy = self.node(expr.loc, kind);
    if let ExprKind::Call { name, .. } = &copy.kind {
      self.pending_calls.push(PendingCall {
        node: copy.id,
        name: name.clone(),
        loc: copy.loc,
      });
    }
    copy
  }

  // simple-stmt = ident ("," ident)* ":=" expr-list
  //             | expr-list "=" expr-list
  //             | expr
  fn simple_stmt(&mut self, ctx: &mut FnContext) -> CompileResult<Stmt> {
    let loc = self.stream.loc();

    if self.stream.is_short_decl() {
      let names = self.ident_list()?;
      self.stream.skip(":=")?;
      // The right side sees the variables as they were before this statement.
      let rhs = self.expr_list(ctx)?;
      let lhs = names
        .iter()
        .map(|(name, loc)| {
          let id = ctx.declare_local(name, None);
          self.var(*loc, id)
        })
        .collect();
      return Ok(Stmt::Assign(Assign {
        lhs: ExprList(lhs),
        rhs,
        loc,
      }));
    }

    let lhs = self.expr_list(ctx)?;
    if self.stream.equal("=") {
      for target in lhs.iter() {
        if !matches!(
          target.kind,
          ExprKind::Var(_) | ExprKind::Deref(_) | ExprKind::Member { .. }
        ) {
          return Err(self.error(target.loc, "cannot assign to this expression"));
        }
      }
      let rhs = self.expr_list(ctx)?;
      return Ok(Stmt::Assign(Assign { lhs, rhs, loc }));
    }

    let ExprList(mut exprs) = lhs;
    if exprs.len() == 1
      && let Some(expr) = exprs.pop()
    {
      return Ok(Stmt::Expr(expr));
    }
    Err(self.stream.unexpected("\"=\""))
  }

  fn ident_list(&mut self) -> CompileResult<Vec<(String, usize)>> {
    let mut names = vec![self.stream.get_ident()?];
    while self.stream.equal(",") {
      names.push(self.stream.get_ident()?);
    }
    Ok(names)
  }

  fn expr_list(&mut self, ctx: &mut FnContext) -> CompileResult<ExprList> {
    let mut exprs = vec![self.expr(ctx)?];
    while self.stream.equal(",") {
      exprs.push(self.expr(ctx)?);
    }
    Ok(ExprList(exprs))
  }

  fn expr(&mut self, ctx: &mut FnContext) -> CompileResult<Expr> {
    self.relational(ctx)
  }

  // relational = add (("==" | "!=" | "<" | "<=" | ">" | ">=") add)*
  fn relational(&mut self, ctx: &mut FnContext) -> CompileResult<Expr> {
    let mut node = self.add(ctx)?;

    loop {
      let loc = self.stream.loc();
      if self.stream.equal("==") {
        let rhs = self.add(ctx)?;
        node = self.binary(loc, BinaryOp::Eq, node, rhs);
      } else if self.stream.equal("!=") {
        let rhs = self.add(ctx)?;
        node = self.binary(loc, BinaryOp::Ne, node, rhs);
      } else if self.stream.equal("<") {
        let rhs = self.add(ctx)?;
        node = self.binary(loc, BinaryOp::Lt, node, rhs);
      } else if self.stream.equal("<=") {
        let rhs = self.add(ctx)?;
        node = self.binary(loc, BinaryOp::Le, node, rhs);
      } else if self.stream.equal(">") {
        let rhs = self.add(ctx)?;
        node = self.binary(loc, BinaryOp::Lt, rhs, node);
      } else if self.stream.equal(">=") {
        let rhs = self.add(ctx)?;
        node = self.binary(loc, BinaryOp::Le, rhs, node);
      } else {
        return Ok(node);
      }
    }
  }

  // add = mul ("+" mul | "-" mul)*
  fn add(&mut self, ctx: &mut FnContext) -> CompileResult<Expr> {
    let mut node = self.mul(ctx)?;

    loop {
      let loc = self.stream.loc();
      let op = if self.stream.equal("+") {
        BinaryOp::Add
      } else if self.stream.equal("-") {
        BinaryOp::Sub
      } else {
        return Ok(node);
      };
      let rhs = self.mul(ctx)?;
      node = self.binary(loc, op, node, rhs);
    }
  }

  // mul = unary ("*" unary | "/" unary)*
  fn mul(&mut self, ctx: &mut FnContext) -> CompileResult<Expr> {
    let mut node = self.unary(ctx)?;

    loop {
      let loc = self.stream.loc();
      let op = if self.stream.equal("*") {
        BinaryOp::Mul
      } else if self.stream.equal("/") {
        BinaryOp::Div
      } else {
        return Ok(node);
      };
      let rhs = self.unary(ctx)?;
      node = self.binary(loc, op, node, rhs);
    }
  }

  // unary = ("+" | "-" | "!" | "*" | "&") unary | postfix
  fn unary(&mut self, ctx: &mut FnContext) -> CompileResult<Expr> {
    let loc = self.stream.loc();

    if self.stream.equal("+") {
      return self.unary(ctx);
    }
    if self.stream.equal("-") {
      let zero = self.lit(loc, LitKind::Int, 0);
      let operand = self.unary(ctx)?;
      return Ok(self.binary(loc, BinaryOp::Sub, zero, operand));
    }
    if self.stream.equal("!") {
      let zero = self.lit(loc, LitKind::Int, 0);
      let operand = self.unary(ctx)?;
      return Ok(self.binary(loc, BinaryOp::Eq, zero, operand));
    }
    if self.stream.equal("*") {
      let operand = self.unary(ctx)?;
      return Ok(self.deref(loc, operand));
    }
    if self.stream.equal("&") {
      let operand = self.unary(ctx)?;
      return Ok(self.node(loc, ExprKind::Addr(Box::new(operand))));
    }

    self.postfix(ctx)
  }

  // postfix = primary ("[" expr "]" | "." ident)*
  fn postfix(&mut self, ctx: &mut FnContext) -> CompileResult<Expr> {
    let mut node = self.primary(ctx)?;

    loop {
      let loc = self.stream.loc();
      if self.stream.equal("[") {
        // a[i] is *(a + i)
        let index = self.expr(ctx)?;
        self.stream.skip("]")?;
        let addr = self.binary(loc, BinaryOp::Add, node, index);
        node = self.deref(loc, addr);
        continue;
      }
      if self.stream.equal(".") {
        let (name, _) = self.stream.get_ident()?;
        node = self.node(
          loc,
          ExprKind::Member {
            base: Box::new(node),
            name,
          },
        );
        continue;
      }
      return Ok(node);
    }
  }

  // primary = "(" expr ")" | literal | ident ("(" expr-list? ")")? | type "{" elems "}"
  fn primary(&mut self, ctx: &mut FnContext) -> CompileResult<Expr> {
    let loc = self.stream.loc();

    if self.stream.equal("(") {
      let node = self.expr(ctx)?;
      self.stream.skip(")")?;
      return Ok(node);
    }

    if let Some(token) = self.stream.peek()
      && token.is_literal()
    {
      let kind = match token.kind {
        TokenKind::Char => LitKind::Byte,
        TokenKind::Bool => LitKind::Bool,
        _ => LitKind::Int,
      };
      let value = token.value.unwrap_or_default();
      self.stream.advance();
      return Ok(self.lit(loc, kind, value));
    }

    if self.stream.peek_kind() == Some(TokenKind::Ident) {
      let (name, loc) = self.stream.get_ident()?;
      if self.stream.equal("(") {
        return self.call(ctx, name, loc);
      }
      return match ctx.symbols.lookup(&name) {
        Some(id) => Ok(self.var(loc, id)),
        None => Err(self.error(loc, format!("undefined variable: {name}"))),
      };
    }

    if self.stream.peek_is("[") || self.stream.peek_keyword("struct") {
      return self.composite(ctx);
    }

    Err(self.stream.unexpected("an expression"))
  }

  fn call(&mut self, ctx: &mut FnContext, name: String, loc: usize) -> CompileResult<Expr> {
    let args = if self.stream.peek_is(")") {
      ExprList::default()
    } else {
      self.expr_list(ctx)?
    };
    self.stream.skip(")")?;

    let node = self.node(
      loc,
      ExprKind::Call {
        name: name.clone(),
        args,
      },
    );
    self.pending_calls.push(PendingCall {
      node: node.id,
      name,
      loc,
    });
    Ok(node)
  }

  // composite = type "{" (expr ("," expr)* ","?)? "}"
  fn composite(&mut self, ctx: &mut FnContext) -> CompileResult<Expr> {
    let loc = self.stream.loc();
    let ty = self.parse_type()?;
    self.stream.skip("{")?;

    let mut elems = Vec::new();
    loop {
      while self.stream.equal(";") {}
      if self.stream.equal("}") {
        break;
      }
      elems.push(self.expr(ctx)?);
      while self.stream.equal(";") {}
      if !self.stream.equal(",") {
        self.stream.skip("}")?;
        break;
      }
    }

    Ok(self.node(loc, ExprKind::Composite { ty, elems }))
  }
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_kind(&self) -> Option<TokenKind> {
    self.peek().map(|token| token.kind)
  }

  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  fn advance(&mut self) {
    self.pos += 1;
  }

  fn peek_is(&self, op: &str) -> bool {
    self
      .peek()
      .is_some_and(|token| token.is(TokenKind::Punct, op))
  }

  fn peek_keyword(&self, keyword: &str) -> bool {
    self
      .peek()
      .is_some_and(|token| token.is(TokenKind::Keyword, keyword))
  }

  /// Consume the current token if it matches the provided punctuator.
  fn equal(&mut self, op: &str) -> bool {
    if self.peek_is(op) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn consume_keyword(&mut self, keyword: &str) -> bool {
    if self.peek_keyword(keyword) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn starts_type(&self) -> bool {
    self.peek_kind() == Some(TokenKind::TypeName)
      || self.peek_is("*")
      || self.peek_is("[")
      || self.peek_keyword("struct")
  }

  /// Look ahead for `ident ("," ident)* ":="` without consuming anything.
  fn is_short_decl(&self) -> bool {
    let mut i = self.pos;
    loop {
      if self.tokens.get(i).map(|t| t.kind) != Some(TokenKind::Ident) {
        return false;
      }
      match self.tokens.get(i + 1) {
        Some(t) if t.is(TokenKind::Punct, ",") => i += 2,
        Some(t) => return t.is(TokenKind::Punct, ":="),
        None => return false,
      }
    }
  }

  fn unexpected(&self, expected: &str) -> CompileError {
    let got = describe_token(self.peek());
    CompileError::at(
      ErrorKind::Syntax,
      self.source,
      self.loc(),
      format!("expected {expected}, but got \"{got}\""),
    )
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      Err(self.unexpected(&format!("\"{s}\"")))
    }
  }

  /// Parse the current token as an integer literal returning its value and location.
  fn get_number(&mut self) -> CompileResult<(i64, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
      && let Some(value) = token.value
    {
      let loc = token.loc;
      self.pos += 1;
      return Ok((value, loc));
    }
    Err(self.unexpected("a number"))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Ident
    {
      let ident = (token.text.clone(), token.loc);
      self.pos += 1;
      return Ok(ident);
    }
    Err(self.unexpected("an identifier"))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek_kind(), Some(TokenKind::Eof) | None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;

  fn parse_src(src: &str) -> CompileResult<Program> {
    parse(tokenize(src)?, src)
  }

  /// S-expression of the value returned by the first statement of `main`.
  fn returned(src: &str) -> String {
    let program = parse_src(src).unwrap();
    let main = program.function("main").unwrap();
    let Stmt::Block(stmts) = &main.body else {
      panic!("body is not a block");
    };
    let Some(Stmt::Return(Some(assign))) = stmts.last() else {
      panic!("last statement is not a return");
    };
    assign.rhs.0[0].sexp(&main.vars)
  }

  #[test]
  fn multiplication_binds_tighter_than_addition() {
    assert_eq!(returned("func main() int { return 2 + 3 * 4 }"), "(+ 2 (* 3 4))");
    assert_eq!(returned("func main() int { return 2 * 3 + 4 }"), "(+ (* 2 3) 4)");
    assert_eq!(returned("func main() int { return (2 + 3) * 4 }"), "(* (+ 2 3) 4)");
  }

  #[test]
  fn greater_than_is_a_swapped_less_than() {
    let gt = returned("func main() bool { a := 1\n b := 2\n return a > b }");
    let lt = returned("func main() bool { a := 1\n b := 2\n return b < a }");
    assert_eq!(gt, lt);
    assert_eq!(gt, "(< b a)");
    let ge = returned("func main() bool { a := 1\n b := 2\n return a >= b }");
    let le = returned("func main() bool { a := 1\n b := 2\n return b <= a }");
    assert_eq!(ge, le);
  }

  #[test]
  fn unary_operators_desugar() {
    assert_eq!(returned("func main() int { x := 1\n return -x }"), "(- 0 x)");
    assert_eq!(returned("func main() bool { x := 1\n return !x }"), "(== 0 x)");
    assert_eq!(returned("func main() int { x := 1\n return +x }"), "x");
    assert_eq!(
      returned("func main() int { x := 1\n p := &x\n return *p }"),
      "(deref p)"
    );
  }

  #[test]
  fn indexing_is_pointer_arithmetic() {
    let indexed = returned("func main() int { var a [3]int\n i := 1\n return a[i] }");
    let explicit = returned("func main() int { var a [3]int\n i := 1\n return *(a + i) }");
    assert_eq!(indexed, "(deref (+ a i))");
    assert_eq!(indexed, explicit);
  }

  #[test]
  fn member_access_and_calls() {
    let src = "func main() int {\n var s struct { x int; y int }\n return f(s.y, 1)\n}\nfunc f(a, b int) int { return a }";
    assert_eq!(returned(src), "(f (. s y) 1)");
  }

  #[test]
  fn calls_resolve_forward_and_backward() {
    let src = "func main() int { return later() }\nfunc later() int { return earlier() }\nfunc earlier() int { return 1 }";
    let program = parse_src(src).unwrap();
    assert_eq!(program.calls.len(), 2);
    let mut targets: Vec<_> = program.calls.values().copied().collect();
    targets.sort();
    assert_eq!(targets, vec![1, 2]);
  }

  #[test]
  fn func_keyword_is_optional() {
    let program = parse_src("main() int { return 0 }").unwrap();
    assert_eq!(program.functions[0].name, "main");
  }

  #[test]
  fn undefined_function_is_rejected() {
    let err = parse_src("func main() int { return nope() }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Semantic);
    assert!(err.message().contains("undefined function: nope"));
  }

  #[test]
  fn duplicate_function_is_rejected() {
    let err = parse_src("func f() {}\nfunc f() {}").unwrap_err();
    assert!(err.message().contains("redeclared"));
  }

  #[test]
  fn undefined_variable_is_rejected() {
    let err = parse_src("func main() int { return y }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Semantic);
    assert!(err.message().contains("undefined variable: y"));
  }

  #[test]
  fn missing_token_reports_expected_lexeme() {
    let err = parse_src("func main( int { return 1 }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    let err = parse_src("func main() int { return (1 + 2 }").unwrap_err();
    assert_eq!(err.message(), "expected \")\", but got \"}\"");
  }

  #[test]
  fn signatures_declare_params_and_results() {
    let program = parse_src("func f(a, b int, c *byte) (int, bool) { return a, true }").unwrap();
    let f = &program.functions[0];
    assert_eq!(f.params.len(), 3);
    assert_eq!(f.results.len(), 2);
    assert_eq!(f.var(f.params[1]).ty, Some(Type::Int));
    assert_eq!(
      f.var(f.params[2]).ty,
      Some(Type::pointer_to(Type::Byte))
    );
    assert_eq!(f.var(f.results[1]).ty, Some(Type::Bool));
    assert!(f.locals.is_empty());
  }

  #[test]
  fn named_results_are_visible_in_the_body() {
    let program = parse_src("func f() (n int) { n = 3\n return n }").unwrap();
    assert_eq!(program.functions[0].results.len(), 1);
  }

  #[test]
  fn bare_return_needs_a_function_without_results() {
    assert!(parse_src("func f() { return }").is_ok());
    let err = parse_src("func f() int { return }").unwrap_err();
    assert!(err.message().contains("not enough return values"));
    let err = parse_src("func f() { return 1 }").unwrap_err();
    assert!(err.message().contains("too many return values"));
  }

  #[test]
  fn short_declaration_shadows_after_reading_the_right_side() {
    let program = parse_src("func main() int { x := 1\n x := x + 1\n return x }").unwrap();
    let main = &program.functions[0];
    assert_eq!(main.locals.len(), 2);
    let Stmt::Block(stmts) = &main.body else {
      panic!()
    };
    let Stmt::Assign(second) = &stmts[1] else {
      panic!()
    };
    let (ExprKind::Var(target), ExprKind::Binary { lhs, .. }) =
      (&second.lhs.0[0].kind, &second.rhs.0[0].kind)
    else {
      panic!()
    };
    let ExprKind::Var(read) = lhs.kind else {
      panic!()
    };
    assert_ne!(*target, read);
  }

  #[test]
  fn typed_var_is_zero_initialised_per_scalar() {
    let program = parse_src(
      "func main() {\n var s struct { a int; b [2]byte }\n var (\n x int\n y = 2\n )\n}",
    )
    .unwrap();
    let Stmt::Block(stmts) = &program.functions[0].body else {
      panic!()
    };
    let Stmt::Block(zeroes) = &stmts[0] else {
      panic!()
    };
    assert_eq!(zeroes.len(), 3);
    let Stmt::Block(specs) = &stmts[1] else {
      panic!()
    };
    assert_eq!(specs.len(), 2);
  }

  #[test]
  fn var_without_type_or_initializer_is_rejected() {
    let err = parse_src("func main() { var x }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
  }

  #[test]
  fn if_and_for_forms() {
    let src = "func main() int {
  x := 0
  if x == 0 { x = 1 } else if x == 1 { x = 2 } else { x = 3 }
  if y := 2; y < x { x = y }
  for { x = x + 1 }
  for x < 10 { x = x + 1 }
  for i := 0; i < 3; i = i + 1 { x = x + i }
  for ; ; { x = 0 }
  return x
}";
    let program = parse_src(src).unwrap();
    let Stmt::Block(stmts) = &program.functions[0].body else {
      panic!()
    };
    assert!(matches!(&stmts[1], Stmt::If { init: None, els: Some(_), .. }));
    assert!(matches!(&stmts[2], Stmt::If { init: Some(_), els: None, .. }));
    assert!(matches!(&stmts[3], Stmt::For { cond: None, init: None, .. }));
    assert!(matches!(&stmts[4], Stmt::For { cond: Some(_), init: None, post: None, .. }));
    assert!(matches!(&stmts[5], Stmt::For { cond: Some(_), init: Some(_), post: Some(_), .. }));
    assert!(matches!(&stmts[6], Stmt::For { cond: None, init: None, post: None, .. }));
  }

  #[test]
  fn assignment_targets_must_be_addressable() {
    let err = parse_src("func main() { x := 1\n x + 1 = 2 }").unwrap_err();
    assert!(err.message().contains("cannot assign"));
  }

  #[test]
  fn composite_literals_are_positional() {
    let src = "func main() int {\n a := [3]int{1, 2,\n 3,\n }\n return a[0]\n}";
    let program = parse_src(src).unwrap();
    let Stmt::Block(stmts) = &program.functions[0].body else {
      panic!()
    };
    let Stmt::Assign(assign) = &stmts[0] else {
      panic!()
    };
    let ExprKind::Composite { ty, elems } = &assign.rhs.0[0].kind else {
      panic!()
    };
    assert_eq!(*ty, Type::array_of(Type::Int, 3));
    assert_eq!(elems.len(), 3);
  }

  #[test]
  fn oversized_types_are_rejected() {
    let err = parse_src("func main() { a := [4611686018427387904]int{} }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Semantic);
    assert!(err.message().contains("array too large"));

    let err = parse_src("func main() { var a [100000]int }").unwrap_err();
    assert!(err.message().contains("array too large"));

    let err = parse_src("func main() { var s struct { a [60000]byte; b [60000]byte } }").unwrap_err();
    assert!(err.message().contains("struct too large"));

    assert!(parse_src("func main() { var a [8192]int }").is_ok());
  }
}
