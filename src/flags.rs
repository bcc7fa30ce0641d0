//! The flag word shared with the assembly trampolines.
//!
//! The low four bits select one of the [`RetKind`]s, which tells the
//! trampolines where the return value lives and how to extend it. The bits
//! above that are the [`Flags`].

use std::fmt;

/// How a return value comes back from a call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RetKind {
  /// Nothing to return, or the value was written through the hidden pointer.
  Void = 0,
  /// A small struct, spread over `%o0..%o3` and `%f0..%f7`.
  Struct = 1,
  /// `uint8_t` in `%o0`
  UInt8 = 2,
  /// `int8_t` in `%o0`
  SInt8 = 3,
  /// `uint16_t` in `%o0`
  UInt16 = 4,
  /// `int16_t` in `%o0`
  SInt16 = 5,
  /// `uint32_t` in `%o0`
  UInt32 = 6,
  /// `int32_t` in `%o0`
  SInt32 = 7,
  /// Any 64 bit integer or pointer in `%o0`.
  Int64 = 8,
  /// A 128 bit integer in `%o0:%o1`. Only the V8 convention produces this.
  Int128 = 9,
  /// `float` in `%f0`
  Float = 10,
  /// `double` in `%d0`
  Double = 11,
  /// `long double` in `%q0`
  LongDouble = 12,
}

impl RetKind {
  /// Mask selecting the return kind from the flag word.
  pub const MASK: u32 = 15;

  /// Decode a return kind from the low bits of a flag word.
  #[must_use]
  pub fn from_bits(bits: u32) -> Option<RetKind> {
    use RetKind::*;
    Some(match bits & Self::MASK {
      0 => Void,
      1 => Struct,
      2 => UInt8,
      3 => SInt8,
      4 => UInt16,
      5 => SInt16,
      6 => UInt32,
      7 => SInt32,
      8 => Int64,
      9 => Int128,
      10 => Float,
      11 => Double,
      12 => LongDouble,
      _ => return None,
    })
  }

  /// For the integer kinds narrower than a word, the width in bytes and
  /// whether the value is sign extended.
  #[must_use]
  pub fn sub_word(self) -> Option<(usize, bool)> {
    match self {
      RetKind::UInt8 => Some((1, false)),
      RetKind::SInt8 => Some((1, true)),
      RetKind::UInt16 => Some((2, false)),
      RetKind::SInt16 => Some((2, true)),
      RetKind::UInt32 => Some((4, false)),
      RetKind::SInt32 => Some((4, true)),
      _ => None,
    }
  }

  fn name(self) -> &'static str {
    match self {
      RetKind::Void => "VOID",
      RetKind::Struct => "STRUCT",
      RetKind::UInt8 => "UINT8",
      RetKind::SInt8 => "SINT8",
      RetKind::UInt16 => "UINT16",
      RetKind::SInt16 => "SINT16",
      RetKind::UInt32 => "UINT32",
      RetKind::SInt32 => "SINT32",
      RetKind::Int64 => "INT64",
      RetKind::Int128 => "INT128",
      RetKind::Float => "FLOAT",
      RetKind::Double => "DOUBLE",
      RetKind::LongDouble => "LDOUBLE",
    }
  }
}

bitflags! {
  /// The flag bits above the return kind.
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
  pub struct Flags: u32 {
    /// The return value is written to memory whose address is passed
    /// in the first argument word.
    const RET_IN_MEM = 32;
    /// Some argument needs the floating point argument registers loaded.
    const FP_ARGS = 64;
  }
}

/// The complete flag word of a call: return kind plus [`Flags`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CifFlags {
  /// Where the return value comes back.
  pub ret: RetKind,
  /// Additional flags.
  pub flags: Flags,
}

impl CifFlags {
  /// Flags for a call returning `ret`, with no additional flags.
  #[must_use]
  pub const fn new(ret: RetKind) -> Self { CifFlags { ret, flags: Flags::empty() } }

  /// Is the return value passed back through the hidden pointer?
  #[inline] #[must_use]
  pub fn ret_in_mem(self) -> bool { self.flags.contains(Flags::RET_IN_MEM) }

  /// Does any argument live in the floating point registers?
  #[inline] #[must_use]
  pub fn fp_args(self) -> bool { self.flags.contains(Flags::FP_ARGS) }

  /// Encode as the flag word the trampolines read.
  #[must_use]
  pub fn bits(self) -> u32 { self.ret as u32 | self.flags.bits() }

  /// Decode a flag word. Returns `None` for an unknown return kind or unknown flag bits.
  #[must_use]
  pub fn from_bits(bits: u32) -> Option<Self> {
    Some(CifFlags {
      ret: RetKind::from_bits(bits)?,
      flags: Flags::from_bits(bits & !RetKind::MASK)?,
    })
  }
}

impl fmt::Display for CifFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.ret.name())?;
    if self.ret_in_mem() { write!(f, " | RET_IN_MEM")? }
    if self.fp_args() { write!(f, " | FP_ARGS")? }
    Ok(())
  }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
  use super::*;

  #[test] fn wire_values() {
    let f = CifFlags { ret: RetKind::Void, flags: Flags::RET_IN_MEM };
    assert_eq!(f.bits(), 32);
    let f = CifFlags { ret: RetKind::Double, flags: Flags::FP_ARGS };
    assert_eq!(f.bits(), 11 | 64);
    assert_eq!(CifFlags::from_bits(11 | 64), Some(f));
    assert_eq!(f.to_string(), "DOUBLE | FP_ARGS");
  }

  #[test] fn bad_bits() {
    assert_eq!(CifFlags::from_bits(13), None);
    assert_eq!(CifFlags::from_bits(16), None);
    assert_eq!(RetKind::from_bits(12 | 32), Some(RetKind::LongDouble));
  }
}
