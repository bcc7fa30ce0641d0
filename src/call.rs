//! Forward calls: from generic arguments to a native call.

use byteorder::{BigEndian, ByteOrder};

use crate::frame::u64_to_word;
use crate::{Cif, CifFlags, Kind, MAX_STRUCT_ARG, RetKind, WORD, Word, align};

/// The address of a native function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodePtr(pub u64);

/// The low level call routine, normally written in assembly.
///
/// Given a byte count `bytes` (always negative: the amount of stack to
/// allocate), the implementation must allocate that much stack, call
/// [`Cif::prep_args`] on the start of it, load `%o0..%o5` from the first six
/// words (and `%d0..%d30` from the first sixteen if the returned flags have
/// [`Flags::FP_ARGS`](crate::Flags::FP_ARGS)), call `fn_addr`, and store the
/// return value to `rvalue` according to the returned flags, sign or zero
/// extending the sub-word integer kinds to a full word.
pub trait CallTrampoline {
  /// Perform the call.
  fn call_v9(&mut self, cif: &Cif<'_>, fn_addr: CodePtr, rvalue: Option<&mut [u8]>,
    avalue: &[&[u8]], bytes: isize);
}

impl Cif<'_> {
  /// Write the outgoing argument words for a call.
  ///
  /// `argp` is the argument area reserved by the trampoline. Each element of
  /// `avalue` holds one argument in target byte order. `rvalue` is where the
  /// caller wants the return value, if anywhere; for a hidden pointer return
  /// without `rvalue` the value goes to `argp + bytes()`, which [`call`]
  /// reserved for it.
  ///
  /// Returns the flags for this particular call: if the result is not
  /// wanted and would come back in registers, the return kind is `Void`.
  ///
  /// # Panics
  ///
  /// If `avalue` does not have one entry per argument, an entry is shorter
  /// than its type, or `argp` is shorter than [`Cif::arg_words`].
  pub fn prep_args(&self, argp: &mut [Word], rvalue: Option<&mut [u8]>, avalue: &[&[u8]]) -> CifFlags {
    assert_eq!(avalue.len(), self.nargs(), "wrong number of arguments");
    let mut flags = self.flags();
    let rvalue = match rvalue {
      Some(r) => Some(r.as_mut_ptr() as u64),
      // We reserved space for the return value past the frame.
      None if flags.ret_in_mem() => Some(argp.as_mut_ptr() as u64 + self.bytes() as u64),
      None => {
        flags.ret = RetKind::Void;
        None
      }
    };

    let mut w = 0;
    if flags.ret_in_mem() {
      argp[0] = u64_to_word(rvalue.unwrap_or_default());
      w = 1;
    }

    for (ty, &a) in self.arg_types().iter().zip(avalue) {
      match ty.kind() {
        Kind::SInt8 => argp[w] = (i64::from(a[0] as i8) as u64).to_be_bytes(),
        Kind::UInt8 => argp[w] = u64::from(a[0]).to_be_bytes(),
        Kind::SInt16 => argp[w] = (i64::from(BigEndian::read_i16(a)) as u64).to_be_bytes(),
        Kind::UInt16 => argp[w] = u64::from(BigEndian::read_u16(a)).to_be_bytes(),
        Kind::SInt32 => argp[w] = (i64::from(BigEndian::read_i32(a)) as u64).to_be_bytes(),
        // A float keeps its bit pattern, in the low half of the word.
        Kind::UInt32 | Kind::Float => argp[w] = u64::from(BigEndian::read_u32(a)).to_be_bytes(),
        Kind::SInt64 | Kind::UInt64 | Kind::Pointer | Kind::Double =>
          argp[w].copy_from_slice(&a[..WORD]),
        Kind::LongDouble | Kind::Struct(_) => {
          let z = ty.size();
          if z > MAX_STRUCT_ARG {
            argp[w] = u64_to_word(a.as_ptr() as u64);
          } else {
            if w % 2 == 1 && ty.alignment() > WORD { w += 1 }
            let n = align(z, WORD) / WORD;
            argp[w..w + n].as_flattened_mut()[..z].copy_from_slice(&a[..z]);
            w += n;
            continue
          }
        }
        Kind::Void => unreachable!("void argument in a prepared Cif"),
      }
      w += 1;
    }

    trace!("prep_args {self}: {w} words, flags = {flags}");
    flags
  }
}

/// Call the native function at `fn_addr` through `tramp`.
///
/// `rvalue` receives the return value if present; sub-word integer results
/// are widened to a full word, so it must be at least 8 bytes for those. A
/// struct returned through a hidden pointer still needs somewhere to go when
/// `rvalue` is absent, so extra stack is reserved for it.
pub fn call(tramp: &mut impl CallTrampoline, cif: &Cif<'_>, fn_addr: CodePtr,
  rvalue: Option<&mut [u8]>, avalue: &[&[u8]]
) {
  let mut bytes = cif.bytes();
  if rvalue.is_none() && cif.ret_in_mem() {
    bytes += align(cif.rtype().size(), 16);
  }
  debug!("call {:#x} {cif} with {bytes} bytes of stack", fn_addr.0);
  #[allow(clippy::cast_possible_wrap)]
  tramp.call_v9(cif, fn_addr, rvalue, avalue, -(bytes as isize));
}
