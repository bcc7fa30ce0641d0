//! Reverse calls: native code calling into a generic callback.
//!
//! A [`Closure`] owns a published [`Trampoline`]. When native code calls the
//! trampoline it jumps to the shared entry routine, which saves the incoming
//! argument registers and stack words into a [`Frame`] and calls
//! [`Closure::dispatch`]. That decodes the frame into one [`ArgRef`] per
//! argument, without copying, and runs the callback. The returned flags tell
//! the entry routine how to load the result into the return registers.

use std::fmt;

use smallvec::SmallVec;

use crate::frame::word_to_u64;
use crate::trampoline::{Published, Unpublished};
use crate::{Abi, ArgRef, Cif, CifFlags, CodeMemory, CodePtr, Error, FP_ARG_WORDS, FlushIcache,
  Frame, Kind, MAX_STRUCT_ARG, Trampoline, Type, Value, WORD, align};

/// Walk the members of the struct `ty` placed at byte offset `off`, calling
/// `f(offset, size)` on every floating point member, and return the offset
/// just past the last member. A nested struct is walked in place, and the
/// walk continues at its end, tail padding included.
pub fn float_fields(ty: &Type, mut off: usize, f: &mut impl FnMut(usize, usize)) -> usize {
  for t in ty.members() {
    off = align(off, t.alignment());
    match t.kind() {
      Kind::Struct(_) => { float_fields(t, off, f); }
      Kind::Float | Kind::Double | Kind::LongDouble => f(off, t.size()),
      _ => {}
    }
    off += t.size();
  }
  off
}

/// Reassemble a struct which was passed (or returned) split across the
/// register files. `dst` is the integer image, which holds the struct's
/// integer members at their offsets; every floating point member that starts
/// in the first 16 words is copied over from the same offset of `fp`.
/// Nothing outside the struct's own bytes, or past the end of `dst` or
/// `fp`, is touched. Returns the offset past the struct, as [`float_fields`].
pub fn layout_struct(ty: &Type, off: usize, dst: &mut [u8], fp: &[u8]) -> usize {
  let end = (off + ty.size()).min(dst.len()).min(fp.len());
  float_fields(ty, off, &mut |off, z| {
    if off < FP_ARG_WORDS * WORD && off + z <= end {
      dst[off..off + z].copy_from_slice(&fp[off..off + z])
    }
  })
}

/// The argument references decoded from a frame.
pub type ArgRefs = SmallVec<[ArgRef; 8]>;

/// Decode the argument layout of `cif` in a captured frame.
///
/// Returns the hidden return pointer, if the signature has one, and a
/// reference to each argument. Small structs are reassembled in `frame.gpr`
/// first (see [`layout_struct`]), so that their reference is contiguous.
///
/// # Panics
///
/// If `frame.gpr` is shorter than [`Cif::arg_words`].
pub fn unmarshal_args(cif: &Cif<'_>, frame: &mut Frame) -> (Option<u64>, ArgRefs) {
  assert!(frame.gpr.len() >= cif.arg_words(), "frame too small for {cif}");
  let mut argn = 0;
  let ret = if cif.ret_in_mem() {
    argn = 1;
    Some(word_to_u64(&frame.gpr[0]))
  } else {
    None
  };

  // Floating point values are in %f registers for the first 16 words only.
  let fp_or_gp = |argn, offset| if argn < FP_ARG_WORDS {
    ArgRef::fpr(argn, offset)
  } else {
    ArgRef::gpr(argn, offset)
  };

  let mut args = ArgRefs::with_capacity(cif.nargs());
  for ty in cif.arg_types() {
    let (r, words) = match ty.kind() {
      Kind::Struct(_) if ty.size() > MAX_STRUCT_ARG =>
        (ArgRef::Indirect(word_to_u64(&frame.gpr[argn])), 1),
      Kind::Struct(_) => {
        if argn % 2 == 1 && ty.alignment() > WORD { argn += 1 }
        if argn < FP_ARG_WORDS {
          let Frame { gpr, fpr } = &mut *frame;
          layout_struct(ty, WORD * argn, gpr.as_flattened_mut(), fpr.as_flattened());
        }
        (ArgRef::gpr(argn, 0), align(ty.size(), WORD) / WORD)
      }
      Kind::LongDouble => {
        argn += argn % 2;
        (fp_or_gp(argn, 0), 2)
      }
      Kind::Double => (fp_or_gp(argn, 0), 1),
      Kind::Float => (fp_or_gp(argn, 4), 1),
      Kind::UInt64 | Kind::SInt64 | Kind::Pointer => (ArgRef::gpr(argn, 0), 1),
      Kind::UInt32 | Kind::SInt32 => (ArgRef::gpr(argn, 4), 1),
      Kind::UInt16 | Kind::SInt16 => (ArgRef::gpr(argn, 6), 1),
      Kind::UInt8 | Kind::SInt8 => (ArgRef::gpr(argn, 7), 1),
      Kind::Void => unreachable!("void argument in a prepared Cif"),
    };
    args.push(r);
    argn += words;
  }
  (ret, args)
}

/// The arguments of one closure invocation.
#[derive(Debug)]
pub struct Args<'f> {
  cif: &'f Cif<'f>,
  frame: &'f Frame,
  refs: ArgRefs,
}

impl<'f> Args<'f> {
  /// The number of arguments.
  #[must_use] pub fn len(&self) -> usize { self.refs.len() }

  /// Are there no arguments?
  #[must_use] pub fn is_empty(&self) -> bool { self.refs.is_empty() }

  /// Where argument `i` was found.
  #[must_use] pub fn arg_ref(&self, i: usize) -> ArgRef { self.refs[i] }

  /// All argument references, in order.
  #[must_use] pub fn refs(&self) -> &[ArgRef] { &self.refs }

  /// The bytes of argument `i`, in target byte order.
  #[must_use]
  pub fn bytes(&self, i: usize) -> &'f [u8] {
    let len = self.cif.arg_types()[i].size();
    match self.refs[i] {
      r @ ArgRef::Reg { file, .. } => {
        let start = r.byte_offset().unwrap_or_default();
        &self.frame.file(file).as_flattened()[start..start + len]
      }
      // SAFETY: `Args` is only built by `Closure::dispatch`, whose caller
      // promises that by-reference arguments point at live values.
      ArgRef::Indirect(p) => unsafe { std::slice::from_raw_parts(p as *const u8, len) },
    }
  }

  /// Argument `i` as a [`Value`].
  #[must_use]
  pub fn value(&self, i: usize) -> Option<Value> {
    Value::from_bytes(&self.cif.arg_types()[i], self.bytes(i))
  }
}

/// Where a closure callback puts its result.
#[derive(Debug)]
pub struct RetDest<'r> {
  buf: &'r mut [u8],
  indirect: bool,
}

impl RetDest<'_> {
  /// The return buffer. For a hidden pointer return this is the caller's
  /// memory, exactly the size of the return type; otherwise it is scratch
  /// space of the entry routine.
  pub fn bytes_mut(&mut self) -> &mut [u8] { &mut *self.buf }

  /// Is this the caller's memory, reached through the hidden pointer?
  #[must_use] pub fn is_indirect(&self) -> bool { self.indirect }

  /// Store a result. Integers are stored widened to a full word, as the
  /// entry routine expects; anything else is stored as is.
  ///
  /// # Panics
  ///
  /// If the value does not fit in the buffer.
  pub fn set(&mut self, v: &Value) {
    match v.to_word() {
      Some(w) if !self.indirect => self.buf[..WORD].copy_from_slice(&w),
      _ => {
        let bs = v.to_bytes();
        self.buf[..bs.len()].copy_from_slice(&bs)
      }
    }
  }
}

/// The callback run by a closure: it receives the call interface, the
/// return destination, the arguments and the closure's user data.
pub type ClosureFn<U> = fn(&Cif<'_>, &mut RetDest<'_>, &Args<'_>, &U);

/// A closure: a piece of native code that, when called, decodes its
/// arguments according to a [`Cif`] and runs a [`ClosureFn`].
pub struct Closure<'a, U, M> {
  code: Published<M>,
  cif: &'a Cif<'a>,
  fun: ClosureFn<U>,
  user_data: U,
}

impl<U, M: CodeMemory> fmt::Debug for Closure<'_, U, M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Closure")
      .field("code", &format_args!("{:#x}", self.code.code_addr().0))
      .field("cif", &format_args!("{}", self.cif))
      .finish_non_exhaustive()
  }
}

impl<'a, U, M: CodeMemory> Closure<'a, U, M> {
  /// Install a trampoline to `entry` in `mem` and build a closure from it.
  ///
  /// `entry` is the address of the shared entry routine. The instruction
  /// cache is flushed with `flush` before this returns, so the closure can
  /// be called as soon as it exists.
  pub fn prep(mem: M, cif: &'a Cif<'a>, fun: ClosureFn<U>, user_data: U, entry: CodePtr,
    flush: &impl FlushIcache,
  ) -> Result<Self, Error> {
    if cif.abi() != Abi::V9 { return Err(Error::BadAbi(cif.abi())) }
    let code = Unpublished::write(mem, &Trampoline::new(entry)).publish(flush);
    debug!("closure for {cif} at {:#x}, entry {:#x}", code.code_addr().0, entry.0);
    Ok(Closure { code, cif, fun, user_data })
  }

  /// The address native code calls.
  #[must_use] pub fn code_ptr(&self) -> CodePtr { self.code.code_addr() }

  /// The installed code.
  #[must_use] pub fn code(&self) -> &Published<M> { &self.code }

  /// The call interface.
  #[must_use] pub fn cif(&self) -> &'a Cif<'a> { self.cif }

  /// The user data passed to every call of the callback.
  #[must_use] pub fn user_data(&self) -> &U { &self.user_data }

  /// Release the code memory. The closure must no longer be reachable from native code.
  pub fn into_code(self) -> M { self.code.into_inner() }

  /// Decode a captured frame, run the callback, and return the flags telling
  /// the entry routine where the result is.
  ///
  /// `rvalue` is scratch space for a result returned in registers; it needs
  /// to hold the return type, and at least a word. Results returned through
  /// the hidden pointer are written directly to the caller's memory.
  ///
  /// # Safety
  ///
  /// `frame` must describe a real call of this closure's signature: each
  /// pointer passed for a struct larger than 16 bytes must point to a live
  /// value of that struct, and if the return goes through a hidden pointer,
  /// it must point to writable memory the size of the return type.
  ///
  /// # Panics
  ///
  /// If `frame.gpr` has fewer than [`Cif::arg_words`] words.
  pub unsafe fn dispatch(&self, frame: &mut Frame, rvalue: &mut [u8]) -> CifFlags {
    let cif = self.cif;
    let (ret, refs) = unmarshal_args(cif, frame);
    let mut dest = match ret {
      // SAFETY: guaranteed by the caller
      Some(p) => RetDest {
        buf: unsafe { std::slice::from_raw_parts_mut(p as *mut u8, cif.rtype().size()) },
        indirect: true,
      },
      None => RetDest { buf: rvalue, indirect: false },
    };
    let args = Args { cif, frame, refs };
    (self.fun)(cif, &mut dest, &args, &self.user_data);
    // Tell the entry routine how to return the value.
    cif.flags()
  }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
  use super::*;
  use crate::frame::u64_to_word;
  use crate::{RegFile, Type};

  #[test] fn sub_word_offsets() {
    let args = [Type::SINT8, Type::UINT16, Type::SINT32, Type::POINTER, Type::FLOAT, Type::DOUBLE];
    let cif = Cif::new(Abi::V9, &Type::VOID, &args).unwrap();
    let mut frame = Frame::new(6);
    let (ret, refs) = unmarshal_args(&cif, &mut frame);
    assert_eq!(ret, None);
    assert_eq!(refs.as_slice(), &[ArgRef::gpr(0, 7), ArgRef::gpr(1, 6), ArgRef::gpr(2, 4),
      ArgRef::gpr(3, 0), ArgRef::fpr(4, 4), ArgRef::fpr(5, 0)]);
  }

  #[test] fn floats_past_sixteen_words() {
    let mut args = vec![Type::SINT64; 16];
    args.push(Type::DOUBLE);
    args.push(Type::FLOAT);
    let cif = Cif::new(Abi::V9, &Type::VOID, &args).unwrap();
    let mut frame = Frame::new(cif.arg_words());
    let (_, refs) = unmarshal_args(&cif, &mut frame);
    assert_eq!(refs[15], ArgRef::gpr(15, 0));
    assert_eq!(refs[16], ArgRef::gpr(16, 0));
    assert_eq!(refs[17], ArgRef::gpr(17, 4));
  }

  #[test] fn quad_even_slot() {
    let args = [Type::SINT32, Type::LONGDOUBLE, Type::SINT32];
    let cif = Cif::new(Abi::V9, &Type::VOID, &args).unwrap();
    let mut frame = Frame::new(6);
    let (_, refs) = unmarshal_args(&cif, &mut frame);
    assert_eq!(refs[1], ArgRef::fpr(2, 0));
    assert_eq!(refs[2], ArgRef::gpr(4, 4));
  }

  #[test] fn hidden_return_pointer() {
    let s = Type::structure([Type::DOUBLE; 5]).unwrap();
    let args = [Type::SINT32];
    let cif = Cif::new(Abi::V9, &s, &args).unwrap();
    let mut frame = Frame::new(6);
    frame.gpr[0] = u64_to_word(0xdead_0000);
    let (ret, refs) = unmarshal_args(&cif, &mut frame);
    assert_eq!(ret, Some(0xdead_0000));
    assert_eq!(refs[0], ArgRef::gpr(1, 4));
  }

  #[test] fn struct_reassembly() {
    // { float a; int b; double c; } at word 1: a and c come in %f registers
    let s = Type::structure([Type::FLOAT, Type::SINT32, Type::DOUBLE]).unwrap();
    let args = [Type::SINT64, s];
    let cif = Cif::new(Abi::V9, &Type::VOID, &args).unwrap();
    let mut frame = Frame::new(6);
    frame.fpr[1][..4].copy_from_slice(&1.5f32.to_be_bytes());
    frame.gpr[1][4..].copy_from_slice(&7i32.to_be_bytes());
    frame.fpr[2] = 2.5f64.to_be_bytes();
    frame.fpr[3] = [0xee; 8];
    let (_, refs) = unmarshal_args(&cif, &mut frame);
    assert_eq!(refs[1], ArgRef::Reg { file: RegFile::Gpr, slot: 1, offset: 0 });
    let bytes = frame.get(refs[1], 16).unwrap();
    assert_eq!(&bytes[..4], &1.5f32.to_be_bytes());
    assert_eq!(&bytes[4..8], &7i32.to_be_bytes());
    assert_eq!(&bytes[8..], &2.5f64.to_be_bytes());
    // words past the struct are untouched
    assert_eq!(frame.gpr[3], [0; 8]);
  }

  #[test] fn nested_float_fields() {
    let inner = Type::structure([Type::FLOAT]).unwrap();
    let s = Type::structure([Type::SINT32, inner, Type::DOUBLE]).unwrap();
    let mut seen = vec![];
    let end = float_fields(&s, 8, &mut |off, z| seen.push((off, z)));
    assert_eq!(seen, [(12, 4), (16, 8)]);
    assert_eq!(end, 24);

    // the outer float shares a word with the inner one
    let s = Type::structure([Type::structure([Type::FLOAT]).unwrap(), Type::FLOAT]).unwrap();
    seen.clear();
    assert_eq!(float_fields(&s, 0, &mut |off, z| seen.push((off, z))), 8);
    assert_eq!(seen, [(0, 4), (4, 4)]);
    // tail padding of the inner struct is skipped
    let inner = Type::structure([Type::DOUBLE, Type::FLOAT]).unwrap();
    let s = Type::structure([inner, Type::FLOAT]).unwrap();
    seen.clear();
    float_fields(&s, 0, &mut |off, z| seen.push((off, z)));
    assert_eq!(seen, [(0, 8), (8, 4), (16, 4)]);
  }

  fn float_pair() -> Type {
    Type::structure([Type::structure([Type::FLOAT]).unwrap(), Type::FLOAT]).unwrap()
  }

  #[test] fn nested_struct_before_int() {
    // a compiled caller passes { {float}, float } in %d0 and the long in %o1
    let args = [float_pair(), Type::SINT64];
    let cif = Cif::new(Abi::V9, &Type::VOID, &args).unwrap();
    let mut frame = Frame::new(cif.arg_words());
    frame.fpr[0][..4].copy_from_slice(&1.0f32.to_be_bytes());
    frame.fpr[0][4..].copy_from_slice(&2.0f32.to_be_bytes());
    frame.fpr[1] = [0xee; 8];
    frame.gpr[1] = u64_to_word(0x1122_3344_5566_7788);
    let (_, refs) = unmarshal_args(&cif, &mut frame);
    let bytes = frame.get(refs[0], 8).unwrap();
    assert_eq!(&bytes[..4], &1.0f32.to_be_bytes());
    assert_eq!(&bytes[4..], &2.0f32.to_be_bytes());
    assert_eq!(frame.gpr[1], u64_to_word(0x1122_3344_5566_7788));
  }

  #[test] fn nested_struct_in_last_word() {
    let mut args = vec![Type::SINT64; 5];
    args.push(float_pair());
    let cif = Cif::new(Abi::V9, &Type::VOID, &args).unwrap();
    assert_eq!(cif.arg_words(), 6);
    let mut frame = Frame::new(6);
    frame.fpr[5][..4].copy_from_slice(&0.5f32.to_be_bytes());
    frame.fpr[5][4..].copy_from_slice(&(-3.0f32).to_be_bytes());
    frame.fpr[6] = [0xee; 8];
    let (_, refs) = unmarshal_args(&cif, &mut frame);
    assert_eq!(refs[5], ArgRef::gpr(5, 0));
    let bytes = frame.get(refs[5], 8).unwrap();
    assert_eq!(&bytes[..4], &0.5f32.to_be_bytes());
    assert_eq!(&bytes[4..], &(-3.0f32).to_be_bytes());
  }

  #[test] fn layout_stays_in_bounds() {
    let mut dst = [0; 4];
    let fp = [0x11; 16];
    layout_struct(&float_pair(), 0, &mut dst, &fp);
    assert_eq!(dst, [0x11; 4]);
  }
}
