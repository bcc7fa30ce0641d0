//! Preparation of call interfaces.

use std::fmt;

use itertools::Itertools;

use crate::classify::{RegClass, classify};
use crate::{Abi, CifFlags, Error, FP_ARG_WORDS, FRAME_OVERHEAD, Flags, Kind, MAX_STRUCT_RET,
  MIN_ARG_WORDS, RegFile, RetKind, Type, WORD, align};

/// A call interface: everything about a function signature that the
/// trampolines need, computed once and reused for every call.
///
/// The type descriptors are borrowed, and must outlive the `Cif`.
#[derive(Clone, Debug)]
pub struct Cif<'a> {
  abi: Abi,
  rtype: &'a Type,
  arg_types: &'a [Type],
  bytes: usize,
  arg_words: usize,
  flags: CifFlags,
}

/// Where one argument of a [`Cif`] goes, as seen by a V9 callee.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Placement {
  /// The first argument word used, counting the hidden return pointer if present.
  pub slot: usize,
  /// The number of argument words used.
  pub words: usize,
  /// A padding word was skipped to get to an even slot.
  pub padded: bool,
  /// The word holds the address of a copy rather than the value.
  pub by_ref: bool,
  /// The register file the callee reads the value from. For structs this is
  /// [`RegFile::Gpr`] even if some members come in `%f` registers, see `mixed`.
  pub file: RegFile,
  /// A struct passed in registers with floating point members, which the
  /// callee receives in `%f` registers instead of the integer ones.
  pub mixed: bool,
}

/// Reject descriptors that cannot describe a value.
fn check_type(ty: &Type) -> Result<(), Error> {
  match ty.kind() {
    Kind::Void => Err(Error::BadTypedef("void is only allowed as a return type")),
    Kind::Struct(ms) => {
      if ms.is_empty() || ty.size() == 0 {
        return Err(Error::BadTypedef("struct type has no members"))
      }
      ms.iter().try_for_each(check_type)
    }
    _ => Ok(()),
  }
}

impl<'a> Cif<'a> {
  /// Prepare a call interface for a function with the given return and argument types.
  ///
  /// Fails with [`Error::BadAbi`] unless `abi` is [`Abi::V9`], and with
  /// [`Error::BadTypedef`] if an argument is `void` or a struct is empty.
  pub fn new(abi: Abi, rtype: &'a Type, arg_types: &'a [Type]) -> Result<Self, Error> {
    if abi != Abi::V9 { return Err(Error::BadAbi(abi)) }
    if rtype.is_struct() { check_type(rtype)? }
    arg_types.iter().try_for_each(check_type)?;

    let mut flags = CifFlags::new(match rtype.kind() {
      Kind::Void => RetKind::Void,
      Kind::Float => RetKind::Float,
      Kind::Double => RetKind::Double,
      Kind::LongDouble => RetKind::LongDouble,
      Kind::Struct(_) if rtype.size() > MAX_STRUCT_RET => RetKind::Void,
      Kind::Struct(_) => RetKind::Struct,
      Kind::SInt8 => RetKind::SInt8,
      Kind::UInt8 => RetKind::UInt8,
      Kind::SInt16 => RetKind::SInt16,
      Kind::UInt16 => RetKind::UInt16,
      Kind::SInt32 => RetKind::SInt32,
      Kind::UInt32 => RetKind::UInt32,
      Kind::SInt64 | Kind::UInt64 | Kind::Pointer => RetKind::Int64,
    });
    // The hidden return pointer takes the first argument word.
    let mut bytes = 0;
    if rtype.is_struct() && rtype.size() > MAX_STRUCT_RET {
      flags.flags |= Flags::RET_IN_MEM;
      bytes = WORD;
    }

    let mut arg_words = bytes / WORD;
    for ty in arg_types {
      let c = classify(ty);
      if c.uses_fp_regs() { flags.flags |= Flags::FP_ARGS }
      bytes = align(bytes, c.stack_align()) + align(c.stack_size(), WORD);
      if c.even_slot() { arg_words += arg_words % 2 }
      arg_words += c.words();
    }

    // The caller always reserves room for six argument words.
    let bytes = align(bytes.max(MIN_ARG_WORDS * WORD), 16) + FRAME_OVERHEAD;
    debug!("prepared {}: bytes = {bytes}, flags = {flags}", DisplaySig(rtype, arg_types));
    Ok(Cif { abi, rtype, arg_types, bytes, arg_words, flags })
  }

  /// The calling convention.
  #[inline] #[must_use] pub fn abi(&self) -> Abi { self.abi }

  /// The return type.
  #[inline] #[must_use] pub fn rtype(&self) -> &'a Type { self.rtype }

  /// The argument types.
  #[inline] #[must_use] pub fn arg_types(&self) -> &'a [Type] { self.arg_types }

  /// The number of arguments.
  #[inline] #[must_use] pub fn nargs(&self) -> usize { self.arg_types.len() }

  /// The size of the stack frame the call trampoline allocates: the argument
  /// area (at least six words), rounded to 16 bytes, plus [`FRAME_OVERHEAD`].
  #[inline] #[must_use] pub fn bytes(&self) -> usize { self.bytes }

  /// The flags for this signature. A particular call may use different
  /// flags, see [`Cif::prep_args`].
  #[inline] #[must_use] pub fn flags(&self) -> CifFlags { self.flags }

  /// Is the return value passed back through a hidden pointer argument?
  #[inline] #[must_use] pub fn ret_in_mem(&self) -> bool { self.flags.ret_in_mem() }

  /// Compute where each argument goes.
  #[must_use]
  pub fn placements(&self) -> Vec<Placement> {
    let mut slot = usize::from(self.ret_in_mem());
    self.arg_types.iter().map(|ty| {
      let c = classify(ty);
      let padded = c.even_slot() && slot % 2 == 1;
      if padded { slot += 1 }
      let file = if c.reg == RegClass::Float && slot < FP_ARG_WORDS { RegFile::Fpr } else { RegFile::Gpr };
      let mixed = !c.by_ref && c.float_leaves && slot < FP_ARG_WORDS;
      let p = Placement { slot, words: c.words(), padded, by_ref: c.by_ref, file, mixed };
      slot += c.words();
      p
    }).collect()
  }

  /// The number of argument words written by [`Cif::prep_args`], including
  /// the hidden return pointer and any padding. This can be less than six.
  #[inline] #[must_use] pub fn arg_words(&self) -> usize { self.arg_words }
}

struct DisplaySig<'a>(&'a Type, &'a [Type]);

impl fmt::Display for DisplaySig<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}) -> {}", self.1.iter().format(", "), self.0)
  }
}

impl fmt::Display for Cif<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", DisplaySig(self.rtype, self.arg_types))
  }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
  use super::*;

  #[test] fn minimum_frame() {
    let cif = Cif::new(Abi::V9, &Type::VOID, &[]).unwrap();
    assert_eq!(cif.bytes(), 48 + FRAME_OVERHEAD);
    assert_eq!(cif.flags(), CifFlags::new(RetKind::Void));
    assert_eq!(cif.arg_words(), 0);
  }

  #[test] fn many_args() {
    let args = vec![Type::SINT32; 7];
    let cif = Cif::new(Abi::V9, &Type::SINT32, &args).unwrap();
    // 56 bytes of arguments round up to 64
    assert_eq!(cif.bytes(), 64 + FRAME_OVERHEAD);
    assert_eq!(cif.flags().ret, RetKind::SInt32);
    assert!(!cif.flags().fp_args());
    assert_eq!(cif.arg_words(), 7);
  }

  #[test] fn return_kinds() {
    let r = |t: Type| Cif::new(Abi::V9, &t, &[]).unwrap().flags().ret;
    assert_eq!(r(Type::UINT8), RetKind::UInt8);
    assert_eq!(r(Type::SINT16), RetKind::SInt16);
    assert_eq!(r(Type::UINT32), RetKind::UInt32);
    assert_eq!(r(Type::UINT64), RetKind::Int64);
    assert_eq!(r(Type::POINTER), RetKind::Int64);
    assert_eq!(r(Type::FLOAT), RetKind::Float);
    assert_eq!(r(Type::LONGDOUBLE), RetKind::LongDouble);
  }

  #[test] fn struct_return_threshold() {
    let s32 = Type::structure([Type::DOUBLE; 4]).unwrap();
    let cif = Cif::new(Abi::V9, &s32, &[]).unwrap();
    assert_eq!(cif.flags(), CifFlags::new(RetKind::Struct));

    let s33 = Type::from_raw_parts(33, 1, s32.kind().clone());
    let cif = Cif::new(Abi::V9, &s33, &[]).unwrap();
    assert_eq!(cif.flags().ret, RetKind::Void);
    assert!(cif.ret_in_mem());
    assert_eq!(cif.arg_words(), 1);
  }

  #[test] fn hidden_pointer_in_frame_size() {
    // six longs and the return pointer are seven words, which need 64 bytes
    let big = Type::structure([Type::UINT64; 5]).unwrap();
    let args = vec![Type::SINT64; 6];
    let cif = Cif::new(Abi::V9, &big, &args).unwrap();
    assert_eq!(cif.arg_words(), 7);
    assert_eq!(cif.bytes(), 64 + FRAME_OVERHEAD);
    let cif = Cif::new(Abi::V9, &big, &args[..5]).unwrap();
    assert_eq!(cif.bytes(), 48 + FRAME_OVERHEAD);
  }

  #[test] fn arg_words_match_placements() {
    let q = Type::structure([Type::LONGDOUBLE]).unwrap();
    let args = [Type::SINT8, Type::LONGDOUBLE, Type::FLOAT, q, Type::structure([Type::UINT8; 24]).unwrap()];
    let cif = Cif::new(Abi::V9, &Type::VOID, &args).unwrap();
    let last = cif.placements().last().copied().unwrap();
    assert_eq!(cif.arg_words(), last.slot + last.words);
    assert_eq!(cif.arg_words(), 2 + 2 + 2 + 2 + 1);
  }

  #[test] fn fp_args_flag() {
    let ints = [Type::structure([Type::SINT32, Type::SINT32]).unwrap()];
    assert!(!Cif::new(Abi::V9, &Type::VOID, &ints).unwrap().flags().fp_args());
    let floats = [Type::structure([Type::SINT32, Type::FLOAT]).unwrap()];
    assert!(Cif::new(Abi::V9, &Type::VOID, &floats).unwrap().flags().fp_args());
    // a big struct goes by reference, so its doubles never reach %f registers
    let big = [Type::structure([Type::DOUBLE; 3]).unwrap()];
    assert!(!Cif::new(Abi::V9, &Type::VOID, &big).unwrap().flags().fp_args());
  }

  #[test] fn quad_alignment() {
    let args = [Type::SINT32, Type::LONGDOUBLE, Type::SINT32];
    let cif = Cif::new(Abi::V9, &Type::VOID, &args).unwrap();
    let ps = cif.placements();
    assert_eq!((ps[1].slot, ps[1].padded, ps[1].file), (2, true, RegFile::Fpr));
    assert_eq!(ps[2].slot, 4);
    // 8, pad to 16, +16 = 32, +8 = 40 => 48
    assert_eq!(cif.bytes(), 48 + FRAME_OVERHEAD);
  }

  #[test] fn rejects() {
    assert_eq!(Cif::new(Abi::V8, &Type::VOID, &[]).unwrap_err(), Error::BadAbi(Abi::V8));
    let void = [Type::VOID];
    assert!(matches!(Cif::new(Abi::V9, &Type::VOID, &void), Err(Error::BadTypedef(_))));
    let empty = [Type::from_raw_parts(0, 1, Kind::Struct(Box::new([])))];
    assert!(matches!(Cif::new(Abi::V9, &Type::VOID, &empty), Err(Error::BadTypedef(_))));
  }

  #[test] fn display() {
    let args = [Type::FLOAT, Type::structure([Type::SINT32, Type::SINT32]).unwrap()];
    let cif = Cif::new(Abi::V9, &Type::DOUBLE, &args).unwrap();
    assert_eq!(cif.to_string(), "(float, {i32,i32}) -> double");
  }
}
