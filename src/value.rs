//! Typed values and their target representation.
//!
//! The marshalers only ever see bytes. [`Value`] is a convenience for code
//! that wants to produce or inspect those bytes as numbers.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::{Kind, Type, Word};

/// A value of one of the [`Kind`]s, other than `void`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
  /// `uint8_t`
  U8(u8),
  /// `int8_t`
  I8(i8),
  /// `uint16_t`
  U16(u16),
  /// `int16_t`
  I16(i16),
  /// `uint32_t`
  U32(u32),
  /// `int32_t`
  I32(i32),
  /// `uint64_t`
  U64(u64),
  /// `int64_t`
  I64(i64),
  /// `float`
  F32(f32),
  /// `double`
  F64(f64),
  /// `long double`, as raw quad bits (there is no host quad type to decode to).
  F128([u8; 16]),
  /// A pointer.
  Ptr(u64),
  /// The bytes of a struct.
  Struct(Vec<u8>),
}

impl Value {
  /// The bytes of the value in target byte order.
  #[must_use]
  pub fn to_bytes(&self) -> Vec<u8> {
    match *self {
      Value::U8(n) => vec![n],
      Value::I8(n) => n.to_be_bytes().to_vec(),
      Value::U16(n) => n.to_be_bytes().to_vec(),
      Value::I16(n) => n.to_be_bytes().to_vec(),
      Value::U32(n) => n.to_be_bytes().to_vec(),
      Value::I32(n) => n.to_be_bytes().to_vec(),
      Value::U64(n) | Value::Ptr(n) => n.to_be_bytes().to_vec(),
      Value::I64(n) => n.to_be_bytes().to_vec(),
      Value::F32(x) => x.to_bits().to_be_bytes().to_vec(),
      Value::F64(x) => x.to_bits().to_be_bytes().to_vec(),
      Value::F128(ref q) => q.to_vec(),
      Value::Struct(ref bs) => bs.clone(),
    }
  }

  /// Decode a value of type `ty` from target bytes. Returns `None` for
  /// `void`, or if `bytes` is shorter than the type.
  #[must_use]
  pub fn from_bytes(ty: &Type, bytes: &[u8]) -> Option<Value> {
    let b = bytes.get(..ty.size())?;
    Some(match ty.kind() {
      Kind::Void => return None,
      Kind::UInt8 => Value::U8(b[0]),
      Kind::SInt8 => Value::I8(b[0] as i8),
      Kind::UInt16 => Value::U16(BigEndian::read_u16(b)),
      Kind::SInt16 => Value::I16(BigEndian::read_i16(b)),
      Kind::UInt32 => Value::U32(BigEndian::read_u32(b)),
      Kind::SInt32 => Value::I32(BigEndian::read_i32(b)),
      Kind::UInt64 => Value::U64(BigEndian::read_u64(b)),
      Kind::SInt64 => Value::I64(BigEndian::read_i64(b)),
      Kind::Pointer => Value::Ptr(BigEndian::read_u64(b)),
      Kind::Float => Value::F32(BigEndian::read_f32(b)),
      Kind::Double => Value::F64(BigEndian::read_f64(b)),
      Kind::LongDouble => Value::F128(b.try_into().ok()?),
      Kind::Struct(_) => Value::Struct(b.to_vec()),
    })
  }

  /// The value as a full word, the way integer results narrower than a word
  /// are handed back: sign or zero extended. Returns `None` for values that
  /// are not integers or pointers.
  #[must_use]
  pub fn to_word(&self) -> Option<Word> {
    let n = match *self {
      Value::U8(n) => u64::from(n),
      Value::I8(n) => i64::from(n) as u64,
      Value::U16(n) => u64::from(n),
      Value::I16(n) => i64::from(n) as u64,
      Value::U32(n) => u64::from(n),
      Value::I32(n) => i64::from(n) as u64,
      Value::U64(n) | Value::Ptr(n) => n,
      Value::I64(n) => n as u64,
      Value::F32(_) | Value::F64(_) | Value::F128(_) | Value::Struct(_) => return None,
    };
    Some(n.to_be_bytes())
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::U8(n) => write!(f, "{n}u8"),
      Value::I8(n) => write!(f, "{n}i8"),
      Value::U16(n) => write!(f, "{n}u16"),
      Value::I16(n) => write!(f, "{n}i16"),
      Value::U32(n) => write!(f, "{n}u32"),
      Value::I32(n) => write!(f, "{n}i32"),
      Value::U64(n) => write!(f, "{n}u64"),
      Value::I64(n) => write!(f, "{n}i64"),
      Value::F32(x) => write!(f, "{x}f32"),
      Value::F64(x) => write!(f, "{x}f64"),
      Value::F128(q) => write!(f, "quad:{}", HexBytes(q)),
      Value::Ptr(p) => write!(f, "{p:#x}"),
      Value::Struct(bs) => write!(f, "{{{}}}", HexBytes(bs)),
    }
  }
}

struct HexBytes<'a>(&'a [u8]);

impl fmt::Display for HexBytes<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in self.0 { write!(f, "{b:02x}")? }
    Ok(())
  }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
  use super::*;

  #[test] fn target_order() {
    assert_eq!(Value::I32(-2).to_bytes(), [0xff, 0xff, 0xff, 0xfe]);
    assert_eq!(Value::F32(1.0).to_bytes(), [0x3f, 0x80, 0, 0]);
    assert_eq!(Value::from_bytes(&Type::SINT16, &[0x80, 0]), Some(Value::I16(-32768)));
    assert_eq!(Value::from_bytes(&Type::DOUBLE, &[0; 4]), None);
    assert_eq!(Value::from_bytes(&Type::VOID, &[0]), None);
  }

  #[test] fn widening() {
    assert_eq!(Value::I8(-1).to_word(), Some([0xff; 8]));
    assert_eq!(Value::U16(0xabcd).to_word(), Some([0, 0, 0, 0, 0, 0, 0xab, 0xcd]));
    assert_eq!(Value::F64(0.5).to_word(), None);
  }
}
