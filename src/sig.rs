//! A small text syntax for types, used by the `v9ffi` tool.
//!
//! ```text
//! type ::= void | i8 | u8 | i16 | u16 | i32 | u32 | i64 | u64
//!        | float | double | longdouble | pointer
//!        | '{' type (',' type)* '}'
//! ```
//!
//! Whitespace is allowed between tokens. `void` may not appear inside a struct.

use std::fmt;

use crate::Type;

/// An error in a type expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigError {
  /// The byte position of the error
  pub pos: usize,
  /// The error message
  pub msg: Box<str>,
}

impl fmt::Display for SigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "at {}: {}", self.pos, self.msg)
  }
}

impl std::error::Error for SigError {}

type Result<T> = std::result::Result<T, SigError>;

struct Parser<'a> {
  source: &'a [u8],
  idx: usize,
}

impl<'a> Parser<'a> {
  fn cur_opt(&self) -> Option<u8> { self.source.get(self.idx).copied() }

  fn err_str<T>(&self, msg: &str) -> Result<T> { Err(SigError { pos: self.idx, msg: msg.into() }) }

  fn ws(&mut self) {
    while let Some(b' ' | b'\t' | b'\n') = self.cur_opt() { self.idx += 1 }
  }

  /// Parse the character `c` and any trailing whitespace.
  fn chr(&mut self, c: u8) -> Option<usize> {
    if self.cur_opt()? != c { return None }
    self.idx += 1;
    (Some(self.idx), self.ws()).0
  }

  fn ident(&mut self) -> &'a [u8] {
    let start = self.idx;
    while self.cur_opt().is_some_and(|c| c.is_ascii_alphanumeric()) { self.idx += 1 }
    let src = self.source;
    &src[start..self.idx]
  }

  fn ty(&mut self) -> Result<Type> {
    let start = self.idx;
    if self.chr(b'{').is_some() {
      let mut members = vec![self.ty()?];
      while self.chr(b',').is_some() { members.push(self.ty()?) }
      if self.chr(b'}').is_none() { return self.err_str("expected ',' or '}'") }
      return Type::structure(members).map_err(|e| SigError { pos: start, msg: e.to_string().into() })
    }
    let t = match self.ident() {
      b"void" => Type::VOID,
      b"i8" => Type::SINT8,
      b"u8" => Type::UINT8,
      b"i16" => Type::SINT16,
      b"u16" => Type::UINT16,
      b"i32" => Type::SINT32,
      b"u32" => Type::UINT32,
      b"i64" => Type::SINT64,
      b"u64" => Type::UINT64,
      b"float" => Type::FLOAT,
      b"double" => Type::DOUBLE,
      b"longdouble" => Type::LONGDOUBLE,
      b"pointer" => Type::POINTER,
      b"" => return self.err_str("expected a type"),
      _ => {
        self.idx = start;
        return self.err_str("unknown type")
      }
    };
    self.ws();
    Ok(t)
  }
}

/// Parse a type expression.
pub fn parse_type(s: &str) -> Result<Type> {
  let mut p = Parser { source: s.as_bytes(), idx: 0 };
  p.ws();
  let t = p.ty()?;
  if p.idx != p.source.len() { return p.err_str("unexpected input after type") }
  Ok(t)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
  use super::*;
  use crate::Kind;

  #[test] fn primitives() {
    assert_eq!(*parse_type("longdouble").unwrap().kind(), Kind::LongDouble);
    assert_eq!(*parse_type(" u16 ").unwrap().kind(), Kind::UInt16);
    assert_eq!(parse_type("pointer").unwrap().size(), 8);
  }

  #[test] fn structs() {
    let t = parse_type("{i32, {float, u8}, pointer}").unwrap();
    assert_eq!((t.size(), t.alignment()), (24, 8));
    assert_eq!(t.to_string(), "{i32,{float,u8},pointer}");
    assert_eq!(parse_type(&t.to_string()).unwrap(), t);
  }

  #[test] fn errors() {
    assert_eq!(parse_type("i33").unwrap_err().pos, 0);
    assert_eq!(parse_type("{i32 i32}").unwrap_err().pos, 5);
    assert_eq!(parse_type("").unwrap_err().msg.as_ref(), "expected a type");
    assert_eq!(parse_type("{}").unwrap_err().pos, 1);
    assert_eq!(parse_type("{void}").unwrap_err().msg.as_ref(), "struct member has type void");
    assert_eq!(parse_type("i32 x").unwrap_err().pos, 4);
  }
}
