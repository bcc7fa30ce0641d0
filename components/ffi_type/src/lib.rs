//! Type descriptors for foreign function calls.
//!
//! A [`Type`] describes the size, alignment and shape of one C value. The
//! primitive descriptors use the sizes of the LP64 SPARC V9 ABI (in particular
//! `long double` is a 16 byte quad), and aggregates are built with
//! [`Type::structure`], which lays out the members the way a C compiler would.
//! The descriptors are read-only once built; call engines borrow them.

// rust lints we want
#![warn(
  bare_trait_objects,
  elided_lifetimes_in_paths,
  missing_copy_implementations,
  missing_debug_implementations,
  future_incompatible,
  rust_2018_idioms,
  trivial_numeric_casts,
  variant_size_differences,
  unreachable_pub,
  unused,
  missing_docs
)]
// all the clippy
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
// all the clippy::restriction lints we want
#![warn(
  clippy::get_unwrap,
  clippy::rest_pat_in_fully_bound_structs,
  clippy::string_add,
  clippy::unwrap_used
)]
// all the clippy lints we don't want
#![allow(
  clippy::missing_const_for_fn,
  clippy::missing_errors_doc,
  clippy::module_name_repetitions,
  clippy::use_self
)]

use std::fmt;

/// Round `n` up to a multiple of `a`, which must be a power of two.
#[inline]
#[must_use]
pub const fn align(n: usize, a: usize) -> usize { (n + a - 1) & !(a - 1) }

/// The shape of a [`Type`].
///
/// This is a closed set: a call engine can match on it exhaustively.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
  /// `void`, only meaningful as a return type.
  Void,
  /// `uint8_t`
  UInt8,
  /// `int8_t`
  SInt8,
  /// `uint16_t`
  UInt16,
  /// `int16_t`
  SInt16,
  /// `uint32_t`
  UInt32,
  /// `int32_t`
  SInt32,
  /// `uint64_t`
  UInt64,
  /// `int64_t`
  SInt64,
  /// `float`
  Float,
  /// `double`
  Double,
  /// `long double`, an IEEE quad on this target.
  LongDouble,
  /// Any data pointer.
  Pointer,
  /// A `struct`, with its members in declaration order.
  Struct(Box<[Type]>),
}

impl Kind {
  /// Is this one of the floating point kinds?
  #[must_use]
  pub fn is_float(&self) -> bool { matches!(self, Kind::Float | Kind::Double | Kind::LongDouble) }
}

/// A type descriptor: size and alignment in bytes, plus the [`Kind`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Type {
  size: usize,
  alignment: usize,
  kind: Kind,
}

/// An error building an aggregate [`Type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeError {
  /// A struct needs at least one member.
  EmptyStruct,
  /// `void` is not a valid member type.
  VoidMember,
}

impl fmt::Display for TypeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TypeError::EmptyStruct => write!(f, "struct type has no members"),
      TypeError::VoidMember => write!(f, "struct member has type void"),
    }
  }
}

impl std::error::Error for TypeError {}

macro_rules! prim {
  ($($(#[$attr:meta])* $name:ident = $kind:ident($size:expr, $align:expr);)*) => {
    impl Type {
      $(
        $(#[$attr])*
        pub const $name: Type = Type { size: $size, alignment: $align, kind: Kind::$kind };
      )*
    }
  }
}

prim! {
  /// `void`
  VOID = Void(1, 1);
  /// `uint8_t`
  UINT8 = UInt8(1, 1);
  /// `int8_t`
  SINT8 = SInt8(1, 1);
  /// `uint16_t`
  UINT16 = UInt16(2, 2);
  /// `int16_t`
  SINT16 = SInt16(2, 2);
  /// `uint32_t`
  UINT32 = UInt32(4, 4);
  /// `int32_t`
  SINT32 = SInt32(4, 4);
  /// `uint64_t`
  UINT64 = UInt64(8, 8);
  /// `int64_t`
  SINT64 = SInt64(8, 8);
  /// `float`
  FLOAT = Float(4, 4);
  /// `double`
  DOUBLE = Double(8, 8);
  /// `long double` (128 bit quad)
  LONGDOUBLE = LongDouble(16, 16);
  /// `void *`
  POINTER = Pointer(8, 8);
}

impl Type {
  /// Build a `struct` type from its members, computing size and alignment:
  /// each member is placed at the next multiple of its alignment, and the total
  /// is padded to the largest member alignment.
  pub fn structure(members: impl Into<Box<[Type]>>) -> Result<Type, TypeError> {
    let members = members.into();
    if members.is_empty() { return Err(TypeError::EmptyStruct) }
    let (mut size, mut alignment) = (0, 1);
    for m in &*members {
      if let Kind::Void = m.kind { return Err(TypeError::VoidMember) }
      size = align(size, m.alignment) + m.size;
      alignment = alignment.max(m.alignment);
    }
    Ok(Type { size: align(size, alignment), alignment, kind: Kind::Struct(members) })
  }

  /// Build a descriptor with externally computed size and alignment.
  /// Nothing is checked; consumers trust these numbers as given.
  #[must_use]
  pub fn from_raw_parts(size: usize, alignment: usize, kind: Kind) -> Type {
    Type { size, alignment, kind }
  }

  /// The size of the type in bytes.
  #[inline] #[must_use] pub fn size(&self) -> usize { self.size }

  /// The alignment of the type in bytes.
  #[inline] #[must_use] pub fn alignment(&self) -> usize { self.alignment }

  /// The shape of the type.
  #[inline] #[must_use] pub fn kind(&self) -> &Kind { &self.kind }

  /// Is this a `float`, `double` or `long double`?
  #[inline] #[must_use] pub fn is_float(&self) -> bool { self.kind.is_float() }

  /// Is this a `struct`?
  #[inline] #[must_use] pub fn is_struct(&self) -> bool { matches!(self.kind, Kind::Struct(_)) }

  /// The members of a `struct`, or the empty slice for anything else.
  #[must_use]
  pub fn members(&self) -> &[Type] {
    if let Kind::Struct(ms) = &self.kind { ms } else { &[] }
  }

  /// Does this type contain a floating point value, looking through nested structs?
  #[must_use]
  pub fn has_float_leaf(&self) -> bool {
    match &self.kind {
      Kind::Struct(ms) => ms.iter().any(Type::has_float_leaf),
      k => k.is_float(),
    }
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      Kind::Void => write!(f, "void"),
      Kind::UInt8 => write!(f, "u8"),
      Kind::SInt8 => write!(f, "i8"),
      Kind::UInt16 => write!(f, "u16"),
      Kind::SInt16 => write!(f, "i16"),
      Kind::UInt32 => write!(f, "u32"),
      Kind::SInt32 => write!(f, "i32"),
      Kind::UInt64 => write!(f, "u64"),
      Kind::SInt64 => write!(f, "i64"),
      Kind::Float => write!(f, "float"),
      Kind::Double => write!(f, "double"),
      Kind::LongDouble => write!(f, "longdouble"),
      Kind::Pointer => write!(f, "pointer"),
      Kind::Struct(ms) => {
        write!(f, "{{")?;
        for (i, m) in ms.iter().enumerate() {
          if i != 0 { write!(f, ",")? }
          write!(f, "{m}")?
        }
        write!(f, "}}")
      }
    }
  }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
  use super::*;

  #[test] fn align_rounds_up() {
    assert_eq!(align(0, 8), 0);
    assert_eq!(align(1, 8), 8);
    assert_eq!(align(17, 16), 32);
    assert_eq!(align(24, 8), 24);
  }

  #[test] fn display() {
    let inner = Type::structure([Type::FLOAT, Type::UINT8]).unwrap();
    let t = Type::structure([Type::SINT32, inner, Type::POINTER]).unwrap();
    assert_eq!(t.to_string(), "{i32,{float,u8},pointer}");
  }
}
