//! Classification of argument types.
//!
//! SPARC V9 is simple compared to most 64 bit conventions: every argument
//! occupies whole 8 byte words of the outgoing argument area, and the only
//! question is whether the value is copied there or passed by reference, and
//! which register file the callee finds it in.

use crate::{MAX_STRUCT_ARG, Type, WORD, align};

/// The register file a value is passed in, when it is passed in a register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegClass {
  /// The `%o`/`%i` registers (and the stack words that continue them).
  Int,
  /// The `%f` registers.
  Float,
}

/// The result of [`classify`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Class {
  /// Which register file the value goes in. Structs are [`RegClass::Int`]
  /// as a whole, even if some members travel in `%f` registers.
  pub reg: RegClass,
  /// A copy of the value is made by the caller and only its address is passed.
  pub by_ref: bool,
  /// For an inline struct: some member, at any depth, is floating point.
  pub float_leaves: bool,
  /// The size of the value itself.
  pub size: usize,
  /// The natural alignment of the value.
  pub align: usize,
}

impl Class {
  /// The number of bytes the argument takes up in the argument area
  /// (before rounding up to a whole word).
  #[must_use]
  pub fn stack_size(self) -> usize { if self.by_ref { WORD } else { self.size } }

  /// The alignment of the argument in the argument area.
  #[must_use]
  pub fn stack_align(self) -> usize { if self.by_ref { WORD } else { self.align } }

  /// The number of argument words used.
  #[must_use]
  pub fn words(self) -> usize { align(self.stack_size(), WORD) / WORD }

  /// Must this argument start on an even word (a 16 byte boundary)?
  #[must_use]
  pub fn even_slot(self) -> bool { !self.by_ref && self.align > WORD }

  /// Does this argument need the floating point registers loaded?
  #[must_use]
  pub fn uses_fp_regs(self) -> bool {
    self.reg == RegClass::Float || (!self.by_ref && self.float_leaves)
  }
}

/// Classify a type for passing as an argument.
#[must_use]
pub fn classify(ty: &Type) -> Class {
  let (size, align) = (ty.size(), ty.alignment());
  if ty.is_struct() {
    let by_ref = size > MAX_STRUCT_ARG;
    Class { reg: RegClass::Int, by_ref, float_leaves: ty.has_float_leaf(), size, align }
  } else {
    let reg = if ty.is_float() { RegClass::Float } else { RegClass::Int };
    Class { reg, by_ref: false, float_leaves: false, size, align }
  }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
  use super::*;

  #[test] fn primitives() {
    let c = classify(&Type::DOUBLE);
    assert_eq!((c.reg, c.by_ref, c.words()), (RegClass::Float, false, 1));
    let c = classify(&Type::SINT8);
    assert_eq!((c.reg, c.words()), (RegClass::Int, 1));
    let c = classify(&Type::LONGDOUBLE);
    assert_eq!((c.reg, c.words(), c.even_slot()), (RegClass::Float, 2, true));
    assert!(c.uses_fp_regs());
  }

  #[test] fn struct_threshold() {
    let s16 = Type::structure([Type::DOUBLE, Type::SINT64]).unwrap();
    let c = classify(&s16);
    assert!(!c.by_ref);
    assert!(c.float_leaves && c.uses_fp_regs());
    assert_eq!(c.words(), 2);

    let s17 = Type::structure([Type::DOUBLE, Type::SINT64, Type::UINT8]).unwrap();
    assert_eq!(s17.size(), 24);
    let c = classify(&s17);
    assert!(c.by_ref);
    assert!(!c.uses_fp_regs());
    assert_eq!((c.stack_size(), c.stack_align(), c.words()), (8, 8, 1));

    // sizes are trusted as given, so 17 really means 17
    let raw = Type::from_raw_parts(17, 1, s17.kind().clone());
    assert!(classify(&raw).by_ref);
  }

  #[test] fn small_int_struct() {
    let s = Type::structure([Type::UINT8, Type::UINT16]).unwrap();
    let c = classify(&s);
    assert_eq!((c.reg, c.by_ref, c.float_leaves, c.words()), (RegClass::Int, false, false, 1));
    assert!(!c.uses_fp_regs());
  }
}
