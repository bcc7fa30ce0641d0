//! A software model of the assembly trampolines.
//!
//! The real call and closure entry routines are a few dozen instructions of
//! SPARC assembly each. [`Machine`] does the same register shuffling on plain
//! data, so that a forward call can be followed all the way into a closure
//! and back on any host. Native functions are Rust closures over the callee's
//! view of the registers.
//!
//! The model behaves like a compiled caller, not like a lenient one: a
//! floating point value that the convention puts in a `%f` register is *only*
//! there, and the integer bytes it would otherwise occupy are filled with
//! [`POISON`].

use std::collections::HashMap;

use crate::closure::{float_fields, layout_struct};
use crate::trampoline::CodeMemory;
use crate::{CallTrampoline, Cif, CifFlags, Closure, CodePtr, FP_ARG_WORDS, FRAME_OVERHEAD, Frame,
  RegFile, RetKind, WORD, Word};

/// The address of the modeled closure entry routine. Closures run by a
/// [`Machine`] must have been prepared with this entry.
pub const CLOSURE_ENTRY: CodePtr = CodePtr(0xc105_e000);

/// The byte stored in register bytes that carry nothing.
pub const POISON: u8 = 0xa5;

/// The return registers: `%o0..%o3` and `%d0..%d6`, which together can hold
/// any value returned in registers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Regs {
  /// `%o0..%o3`
  pub o: [Word; 4],
  /// `%d0, %d2, %d4, %d6`, that is `%f0..%f7` in pairs.
  pub f: [Word; 4],
}

/// Widen the `size` bytes at the end of `w` to a full word.
fn extend(w: &Word, size: usize, signed: bool) -> Word {
  let mut out = if signed && w[WORD - size] & 0x80 != 0 { [0xff; WORD] } else { [0; WORD] };
  out[WORD - size..].copy_from_slice(&w[WORD - size..]);
  out
}

/// A native function: receives the callee's view of its arguments.
pub type NativeFn<'f> = Box<dyn FnMut(&mut Frame) -> Regs + 'f>;

/// An address space of callable functions.
#[derive(Default)]
pub struct Machine<'f> {
  funcs: HashMap<u64, NativeFn<'f>>,
  /// The argument area of the most recent call, as left by the callee.
  pub last_stack: Vec<Word>,
  /// The frame the most recent callee received.
  pub last_frame: Option<Frame>,
}

impl std::fmt::Debug for Machine<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Machine")
      .field("funcs", &self.funcs.keys().collect::<Vec<_>>())
      .field("last_stack", &self.last_stack.len())
      .finish_non_exhaustive()
  }
}

impl<'f> Machine<'f> {
  /// An empty machine.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Make `f` callable at `addr`.
  pub fn add_native(&mut self, addr: CodePtr, f: impl FnMut(&mut Frame) -> Regs + 'f) {
    self.funcs.insert(addr.0, Box::new(f));
  }

  /// Make a closure callable at its code address, through the modeled entry routine.
  ///
  /// # Panics
  ///
  /// If the closure's code is not a trampoline to [`CLOSURE_ENTRY`].
  pub fn add_closure<U, M: CodeMemory>(&mut self, c: &'f Closure<'f, U, M>) {
    let tramp = c.code().trampoline();
    assert_eq!(tramp.map(|t| t.entry()), Some(CLOSURE_ENTRY), "not a closure trampoline");
    self.add_native(c.code_ptr(), move |frame| closure_entry(c, frame));
  }
}

impl CallTrampoline for Machine<'_> {
  fn call_v9(&mut self, cif: &Cif<'_>, fn_addr: CodePtr, mut rvalue: Option<&mut [u8]>,
    avalue: &[&[u8]], bytes: isize
  ) {
    let mut stack = vec![[POISON; WORD]; bytes.unsigned_abs() / WORD];
    let flags = cif.prep_args(&mut stack, rvalue.as_deref_mut(), avalue);

    let nwords = (cif.bytes() - FRAME_OVERHEAD) / WORD;
    let mut frame = Frame { gpr: stack[..nwords].to_vec(), fpr: [[POISON; WORD]; FP_ARG_WORDS] };
    if flags.fp_args() {
      // The stack always has room for 16 words, arguments or not.
      frame.fpr.copy_from_slice(&stack[..FP_ARG_WORDS]);
      hide_float_args(cif, &mut frame);
    }

    let f = self.funcs.get_mut(&fn_addr.0).unwrap_or_else(|| panic!("no function at {:#x}", fn_addr.0));
    let regs = f(&mut frame);
    // The callee may have written a hidden pointer return into our stack.
    self.last_stack = stack;
    self.last_frame = Some(frame);
    if let Some(rvalue) = rvalue { store_result(cif, flags, &regs, rvalue) }
  }
}

/// Fill the integer bytes of floating point arguments with [`POISON`].
fn hide_float_args(cif: &Cif<'_>, frame: &mut Frame) {
  let gpr = frame.gpr.as_flattened_mut();
  for (p, ty) in cif.placements().into_iter().zip(cif.arg_types()) {
    if p.file == RegFile::Fpr {
      gpr[p.slot * WORD..(p.slot + p.words) * WORD].fill(POISON)
    } else if p.mixed {
      float_fields(ty, p.slot * WORD, &mut |off, z| if off < FP_ARG_WORDS * WORD {
        gpr[off..off + z].fill(POISON)
      });
    }
  }
}

/// The last part of the call routine: move the result from the return registers to `rvalue`.
fn store_result(cif: &Cif<'_>, flags: CifFlags, regs: &Regs, rvalue: &mut [u8]) {
  match flags.ret {
    RetKind::Void => {}
    RetKind::Struct => {
      let z = cif.rtype().size();
      let mut img = *regs.o.as_flattened().first_chunk::<32>().unwrap_or(&[0; 32]);
      layout_struct(cif.rtype(), 0, &mut img, regs.f.as_flattened());
      rvalue[..z].copy_from_slice(&img[..z])
    }
    RetKind::Float => rvalue[..4].copy_from_slice(&regs.f[0][..4]),
    RetKind::Double => rvalue[..WORD].copy_from_slice(&regs.f[0]),
    RetKind::LongDouble => rvalue[..16].copy_from_slice(regs.f[..2].as_flattened()),
    RetKind::Int64 => rvalue[..WORD].copy_from_slice(&regs.o[0]),
    RetKind::Int128 => rvalue[..16].copy_from_slice(regs.o[..2].as_flattened()),
    k @ (RetKind::UInt8 | RetKind::SInt8 | RetKind::UInt16 |
         RetKind::SInt16 | RetKind::UInt32 | RetKind::SInt32) => {
      let (size, signed) = k.sub_word().unwrap_or((WORD, false));
      rvalue[..WORD].copy_from_slice(&extend(&regs.o[0], size, signed))
    }
  }
}

/// The closure entry routine: what the trampoline of `c` jumps to.
///
/// Runs the closure on the callee's view of the registers and puts the
/// result where a compiled caller expects it.
pub fn closure_entry<U, M: CodeMemory>(c: &Closure<'_, U, M>, frame: &mut Frame) -> Regs {
  let mut scratch = [0; 32];
  // SAFETY: `Machine::call_v9` built the frame from a real argument area, in
  // which every by-reference argument points to a caller value.
  let flags = unsafe { c.dispatch(frame, &mut scratch) };
  let mut regs = Regs::default();
  match flags.ret {
    RetKind::Void => {}
    RetKind::Struct => {
      regs.o.as_flattened_mut().copy_from_slice(&scratch);
      regs.f.as_flattened_mut().copy_from_slice(&scratch);
    }
    RetKind::Float => regs.f[0][..4].copy_from_slice(&scratch[..4]),
    RetKind::Double => regs.f[0].copy_from_slice(&scratch[..WORD]),
    RetKind::LongDouble => regs.f[..2].as_flattened_mut().copy_from_slice(&scratch[..16]),
    RetKind::Int64 => regs.o[0].copy_from_slice(&scratch[..WORD]),
    RetKind::Int128 => regs.o[..2].as_flattened_mut().copy_from_slice(&scratch[..16]),
    k @ (RetKind::UInt8 | RetKind::SInt8 | RetKind::UInt16 |
         RetKind::SInt16 | RetKind::UInt32 | RetKind::SInt32) => {
      let (size, signed) = k.sub_word().unwrap_or((WORD, false));
      let mut w = [0; WORD];
      w.copy_from_slice(&scratch[..WORD]);
      regs.o[0] = extend(&w, size, signed);
    }
  }
  regs
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
  use super::*;

  #[test] fn extension() {
    assert_eq!(extend(&[0, 0, 0, 0, 0, 0, 0, 0x80], 1, true), [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x80]);
    assert_eq!(extend(&[9, 9, 9, 9, 9, 9, 0x80, 1], 2, false), [0, 0, 0, 0, 0, 0, 0x80, 1]);
    assert_eq!(extend(&[9, 9, 9, 9, 0x7f, 0, 0, 0], 4, true), [0, 0, 0, 0, 0x7f, 0, 0, 0]);
  }
}
