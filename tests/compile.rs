use rgocc::ast::{BinaryOp, ExprKind, Stmt};
use rgocc::{ErrorKind, compile, generate_assembly};

#[test]
fn every_frame_is_sixteen_byte_aligned() {
  let src = "func f(a byte, b int) (int, byte) { c := a\n return b, c }
func g(p *int) { *p = 3 }
func main() int {
  var arr [3]byte
  var s struct { x int; y byte }
  n, c := f('q', 5)
  g(&n)
  s.y = c
  arr[1] = s.y
  return n
}";
  let compilation = compile(src).unwrap();
  for func in &compilation.program.functions {
    assert_eq!(func.stack_size % 16, 0, "{}", func.name);
    assert_eq!(func.params_region_size % 8, 0, "{}", func.name);
    assert_eq!(func.results_region_size % 8, 0, "{}", func.name);
  }
}

#[test]
fn precedence_shapes_the_tree() {
  let compilation = compile("func main() int { return 2 + 3 * 4 - 1 }").unwrap();
  let main = &compilation.program.functions[0];
  let Stmt::Block(stmts) = &main.body else {
    panic!("body is not a block");
  };
  let Stmt::Return(Some(assign)) = &stmts[0] else {
    panic!("first statement is not a return");
  };
  let value = assign.rhs.iter().next().unwrap();
  let ExprKind::Binary { op: BinaryOp::Sub, lhs, .. } = &value.kind else {
    panic!("top operator is not -");
  };
  let ExprKind::Binary { op: BinaryOp::Add, rhs, .. } = &lhs.kind else {
    panic!("left operand is not +");
  };
  assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn calls_may_precede_their_callee() {
  let asm = generate_assembly("func main() int { return later(2) }\nfunc later(x int) int { return x * 3 }")
    .unwrap();
  assert!(asm.contains("    call later\n"));
  assert!(asm.contains("\nlater:\n"));
}

#[test]
fn lexical_errors_produce_no_assembly() {
  let err = generate_assembly("func main() int { return 1 @ 2 }").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Lex);
  let rendered = err.to_string();
  assert!(rendered.starts_with("lex error at 1:"), "{rendered}");
  assert!(rendered.contains('^'));
}

#[test]
fn syntax_errors_name_the_expected_token() {
  let err = generate_assembly("func main() int { return (1 + 2 }").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Syntax);
  assert!(err.message().contains("expected \")\""), "{}", err.message());
}

#[test]
fn arity_mismatches_are_semantic_errors() {
  let err = generate_assembly("func pair() (int, int) { return 1, 2 }\nfunc main() int { a, b, c := pair()\n return a }")
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Semantic);
  assert!(err.message().contains("lhs=3, rhs=2"));

  let err = generate_assembly("func f(a int, b int) int { return a }\nfunc main() int { return f(1) }")
    .unwrap_err();
  assert!(err.message().contains("f expects 2 arguments, got 1"));
}

#[test]
fn undefined_names_are_reported_where_they_appear() {
  let err = generate_assembly("func main() int {\n  return missing + 1\n}").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Semantic);
  assert!(err.to_string().starts_with("semantic error at 2:10"), "{err}");

  let err = generate_assembly("func main() int { return nowhere() }").unwrap_err();
  assert!(err.message().contains("undefined function: nowhere"));
}

#[test]
fn a_program_needs_main() {
  let err = generate_assembly("func helper() int { return 1 }").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Semantic);
}

#[test]
fn identical_sources_give_identical_assembly() {
  let src = "func main() int { x := 0\n for x < 10 { if x == 5 { x = x + 2 } else { x = x + 1 } }\n return x }";
  assert_eq!(generate_assembly(src).unwrap(), generate_assembly(src).unwrap());
}
