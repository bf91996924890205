//! Type descriptors shared by the parser, checker, layout and codegen.

use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Type {
  Int,
  Byte,
  Bool,
  Ptr(Box<Type>),
  Array { base: Box<Type>, len: usize },
  Struct(Rc<StructType>),
}

/// A struct declaration. Two declarations with the same shape are still
/// different types, so equality on structs is identity.
#[derive(Debug)]
pub struct StructType {
  pub members: Vec<Member>,
  pub size: usize,
  pub align: usize,
}

#[derive(Debug, Clone)]
pub struct Member {
  pub name: String,
  pub ty: Type,
  pub offset: usize,
}

impl PartialEq for Type {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Type::Int, Type::Int) | (Type::Byte, Type::Byte) | (Type::Bool, Type::Bool) => true,
      (Type::Ptr(a), Type::Ptr(b)) => a == b,
      (Type::Array { base: a, len: n }, Type::Array { base: b, len: m }) => n == m && a == b,
      (Type::Struct(a), Type::Struct(b)) => Rc::ptr_eq(a, b),
      _ => false,
    }
  }
}

impl Eq for Type {}

impl Type {
  pub fn pointer_to(base: Type) -> Self {
    Type::Ptr(Box::new(base))
  }

  pub fn array_of(base: Type, len: usize) -> Self {
    Type::Array {
      base: Box::new(base),
      len,
    }
  }

  /// Lay out members linearly in declaration order, without padding.
  pub fn struct_of(fields: Vec<(String, Type)>) -> Self {
    let mut offset = 0;
    let mut align = 1;
    let members = fields
      .into_iter()
      .map(|(name, ty)| {
        let member = Member { name, offset, ty };
        offset += member.ty.size();
        align = align.max(member.ty.align());
        member
      })
      .collect();
    Type::Struct(Rc::new(StructType {
      members,
      size: offset,
      align,
    }))
  }

  /// Map a built-in type name to its type.
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "int" => Some(Type::Int),
      "byte" => Some(Type::Byte),
      "bool" => Some(Type::Bool),
      _ => None,
    }
  }

  pub fn is_pointer(&self) -> bool {
    matches!(self, Type::Ptr(_))
  }

  /// Arrays and structs do not fit in a register; they travel by address.
  pub fn is_aggregate(&self) -> bool {
    matches!(self, Type::Array { .. } | Type::Struct(_))
  }

  /// The element type reached through pointer arithmetic, if any.
  pub fn base(&self) -> Option<&Type> {
    match self {
      Type::Ptr(base) | Type::Array { base, .. } => Some(base.as_ref()),
      _ => None,
    }
  }

  pub fn member(&self, name: &str) -> Option<&Member> {
    match self {
      Type::Struct(st) => st.members.iter().find(|m| m.name == name),
      _ => None,
    }
  }

  pub fn size(&self) -> usize {
    match self {
      Type::Int | Type::Ptr(_) => 8,
      Type::Byte | Type::Bool => 1,
      Type::Array { base, len } => base.size() * len,
      Type::Struct(st) => st.size,
    }
  }

  pub fn align(&self) -> usize {
    match self {
      Type::Int | Type::Ptr(_) => 8,
      Type::Byte | Type::Bool => 1,
      Type::Array { base, .. } => base.align(),
      Type::Struct(st) => st.align,
    }
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Type::Int => f.write_str("int"),
      Type::Byte => f.write_str("byte"),
      Type::Bool => f.write_str("bool"),
      Type::Ptr(base) => write!(f, "*{base}"),
      Type::Array { base, len } => write!(f, "[{len}]{base}"),
      Type::Struct(st) => {
        f.write_str("struct {")?;
        for (i, m) in st.members.iter().enumerate() {
          let sep = if i == 0 { " " } else { "; " };
          write!(f, "{sep}{} {}", m.name, m.ty)?;
        }
        f.write_str(" }")
      }
    }
  }
}

/// Largest array or struct a declaration may describe, in bytes.
pub const MAX_OBJECT_SIZE: usize = 1 << 16;

/// Round `n` up to the next multiple of `align`.
pub fn align_to(n: usize, align: usize) -> usize {
  n.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scalar_sizes_and_alignments() {
    assert_eq!((Type::Int.size(), Type::Int.align()), (8, 8));
    assert_eq!((Type::Byte.size(), Type::Byte.align()), (1, 1));
    assert_eq!((Type::Bool.size(), Type::Bool.align()), (1, 1));
    let p = Type::pointer_to(Type::Byte);
    assert_eq!((p.size(), p.align()), (8, 8));
  }

  #[test]
  fn arrays_multiply_their_element_size() {
    let a = Type::array_of(Type::Int, 4);
    assert_eq!((a.size(), a.align()), (32, 8));
    assert_eq!(a.base(), Some(&Type::Int));
  }

  #[test]
  fn struct_members_are_packed_in_order() {
    let s = Type::struct_of(vec![
      ("a".to_string(), Type::Byte),
      ("b".to_string(), Type::Int),
      ("c".to_string(), Type::Bool),
    ]);
    assert_eq!(s.size(), 10);
    assert_eq!(s.align(), 8);
    assert_eq!(s.member("b").map(|m| m.offset), Some(1));
    assert_eq!(s.member("c").map(|m| m.offset), Some(9));
    assert!(s.member("d").is_none());
  }

  #[test]
  fn identical_struct_shapes_are_distinct_types() {
    let make = || Type::struct_of(vec![("x".to_string(), Type::Int)]);
    let a = make();
    assert_eq!(a, a.clone());
    assert_ne!(a, make());
  }

  #[test]
  fn display_reads_like_source() {
    let t = Type::pointer_to(Type::array_of(Type::Byte, 3));
    assert_eq!(t.to_string(), "*[3]byte");
  }

  #[test]
  fn align_to_rounds_up() {
    assert_eq!(align_to(0, 16), 0);
    assert_eq!(align_to(1, 16), 16);
    assert_eq!(align_to(17, 8), 24);
    assert_eq!(align_to(24, 8), 24);
  }
}
