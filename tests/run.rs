//! Assemble generated programs with the system C toolchain and check the
//! exit status. Skipped when no `cc` is available.

#![cfg(all(target_arch = "x86_64", target_os = "linux"))]

use std::fs;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use rgocc::generate_assembly;

static NEXT: AtomicUsize = AtomicUsize::new(0);

/// Exit status of the compiled program, or `None` if there is no linker.
fn run(src: &str) -> Option<i32> {
  let asm = generate_assembly(src).unwrap();
  let n = NEXT.fetch_add(1, Ordering::Relaxed);
  let exe = std::env::temp_dir().join(format!("rgocc-{}-{n}", std::process::id()));
  let asm_path = exe.with_extension("s");
  fs::write(&asm_path, &asm).unwrap();

  let built = match Command::new("cc")
    .args(["-nostdlib", "-static", "-o"])
    .arg(&exe)
    .arg(&asm_path)
    .status()
  {
    Ok(status) => status,
    Err(err) => {
      eprintln!("skipping: cannot run cc: {err}");
      let _ = fs::remove_file(&asm_path);
      return None;
    }
  };
  assert!(built.success(), "cc rejected the assembly:\n{asm}");

  let status = Command::new(&exe).status().unwrap();
  let _ = fs::remove_file(&asm_path);
  let _ = fs::remove_file(&exe);
  status.code()
}

fn assert_exit(src: &str, expected: i32) {
  if let Some(code) = run(src) {
    assert_eq!(code, expected, "{src}");
  }
}

#[test]
fn returns_its_argument() {
  assert_exit("func f(x int) int { return x }\nfunc main() int { return f(7) }", 7);
}

#[test]
fn arithmetic_precedence() {
  assert_exit("func main() int { return 2 + 3 * 4 }", 14);
  assert_exit("func main() int { return 2 * 3 + 4 }", 10);
  assert_exit("func main() int { return (9 - 3) / 2 - -1 }", 4);
}

#[test]
fn comparisons_and_branches() {
  let src = "func main() int {
  x := 5
  if x >= 5 { x = x + 10 } else { x = 0 }
  if y := x; y != 15 { return 1 }
  if !(x < 3) { return x }
  return 2
}";
  assert_exit(src, 15);
}

#[test]
fn loops() {
  let src = "func main() int {
  sum := 0
  for i := 1; i <= 10; i = i + 1 { sum = sum + i }
  n := 0
  for n < 5 { n = n + 1 }
  return sum + n
}";
  assert_exit(src, 60);
}

#[test]
fn recursion() {
  let src = "func fib(n int) int {
  if n < 2 { return n }
  return fib(n - 1) + fib(n - 2)
}
func main() int { return fib(10) }";
  assert_exit(src, 55);
}

#[test]
fn multiple_results_and_swaps() {
  let src = "func divmod(a int, b int) (q int, r int) {
  q = a / b
  r = a - q * b
  return q, r
}
func main() int {
  q, r := divmod(47, 5)
  q, r = r, q
  return q * 10 + r
}";
  assert_exit(src, 29);
}

#[test]
fn pointers_and_arrays() {
  let src = "func set(p *int, v int) { *p = v }
func main() int {
  x := 1
  set(&x, 40)
  arr := [4]int{1, 2}
  arr[3] = 5
  p := &arr[0]
  return x + *(p + 1) + arr[2] + arr[3] - 5
}";
  assert_exit(src, 42);
}

#[test]
fn structs_are_passed_by_value() {
  let src = "func sum(p struct { x int; y byte }) int {
  p.x = 0
  return p.y
}
func main() int {
  var s struct { x int; y byte }
  s.x = 30
  s.y = 12
  t := sum(s)
  ps := &s
  return ps.x + t
}";
  assert_exit(src, 42);
}

#[test]
fn bytes_and_characters() {
  let src = "func main() byte {
  var buf [3]byte
  buf[0] = 'a'
  buf[1] = 'A'
  return buf[0] - buf[1] + buf[2]
}";
  assert_exit(src, 32);
}

#[test]
fn structs_and_arrays_are_returned_by_value() {
  let src = "func mk(a int, b int) struct { x int; y byte } {
  var s struct { x int; y byte }
  s.x = a
  s.y = b
  return s
}
func pair() [2]int { return [2]int{3, 4} }
func sum(p struct { x int; y byte }) int { return p.x + p.y }
func main() int {
  t := mk(30, 2)
  arr := pair()
  return t.x + mk(5, 1).y + sum(mk(1, 1)) + arr[1]
}";
  assert_exit(src, 37);
}

#[test]
fn aggregate_swaps_read_every_source_first() {
  let src = "func main() int {
  var a struct { v int }
  var b struct { v int }
  a.v = 1
  b.v = 2
  a, b = b, a
  c := [2]int{5, 7}
  c = [2]int{c[1], c[0]}
  return a.v * 10 + b.v + c[0] * 30
}";
  assert_exit(src, 231);
}
