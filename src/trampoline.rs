//! The closure trampoline and the instructions it is made of.
//!
//! Every closure gets a copy of this 24 byte stub:
//!
//! ```text
//!   0:  rd    %pc, %g1
//!   4:  ldx   [%g1 + 16], %g5
//!   8:  jmp   %g5
//!  12:  nop
//!  16:  .xword entry
//! ```
//!
//! The stub loads the entry routine address stored after it and jumps there,
//! leaving its own address in `%g1`, from which the entry routine finds the
//! closure. The `nop` fills the delay slot of the jump.

use std::fmt;
use std::sync::atomic::{Ordering, fence};

use byteorder::{BigEndian, ByteOrder};

use crate::CodePtr;

/// The size of the trampoline in bytes.
pub const TRAMPOLINE_SIZE: usize = 24;

/// An integer register `%r0..%r31`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reg(u8);

impl Reg {
  /// `%g0`, which reads as zero.
  pub const G0: Reg = Reg(0);
  /// `%g1`
  pub const G1: Reg = Reg(1);
  /// `%g5`
  pub const G5: Reg = Reg(5);
  /// `%o7`, where `call` leaves the return address.
  pub const O7: Reg = Reg(15);

  /// Register number `n`, if `n < 32`.
  #[must_use]
  pub const fn new(n: u8) -> Option<Reg> { if n < 32 { Some(Reg(n)) } else { None } }

  /// The register number.
  #[inline] #[must_use]
  pub const fn index(self) -> u8 { self.0 }

  #[inline]
  const fn field(self) -> u32 { self.0 as u32 }
}

impl fmt::Display for Reg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "%{}{}", ["g", "o", "l", "i"][usize::from(self.0 >> 3)], self.0 & 7)
  }
}

/// The `op3` codes we use.
mod op3 {
  pub(super) const RDASR: u32 = 0x28;
  pub(super) const JMPL: u32 = 0x38;
  pub(super) const LDX: u32 = 0x0b;
}

/// The ancillary state register number of `%pc`.
const ASR_PC: u32 = 5;

/// The encoding of `nop`, which is `sethi 0, %g0`.
const NOP: u32 = 4 << 22;

/// A SPARC instruction, as far as the trampoline needs them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Insn {
  /// `rd %pc, rd`: read the address of this instruction.
  RdPc {
    /// The destination.
    rd: Reg,
  },
  /// `ldx [rs1 + simm13], rd`: load a doubleword.
  Ldx {
    /// The base address register.
    rs1: Reg,
    /// The signed 13 bit displacement.
    simm13: i16,
    /// The destination.
    rd: Reg,
  },
  /// `jmpl rs1 + rs2, rd`: jump, saving the address of this instruction in `rd`.
  Jmpl {
    /// The first address register.
    rs1: Reg,
    /// The second address register.
    rs2: Reg,
    /// The link register.
    rd: Reg,
  },
  /// `nop`
  Nop,
}

/// The common layout of format 3 instructions.
const fn fmt3(op: u32, rd: Reg, op3: u32, rs1: Reg) -> u32 {
  op << 30 | rd.field() << 25 | op3 << 19 | rs1.field() << 14
}

impl Insn {
  /// The 32 bit instruction word.
  #[must_use]
  pub const fn encode(self) -> u32 {
    match self {
      Insn::RdPc { rd } => fmt3(2, rd, op3::RDASR, Reg(ASR_PC as u8)),
      Insn::Ldx { rs1, simm13, rd } =>
        fmt3(3, rd, op3::LDX, rs1) | 1 << 13 | (simm13 as u32 & 0x1fff),
      Insn::Jmpl { rs1, rs2, rd } => fmt3(2, rd, op3::JMPL, rs1) | rs2.field(),
      Insn::Nop => NOP,
    }
  }

  /// Decode an instruction word. Returns `None` for anything that is not one
  /// of the [`Insn`] forms.
  #[must_use]
  pub fn decode(w: u32) -> Option<Insn> {
    let rd = Reg(((w >> 25) & 31) as u8);
    let op3 = (w >> 19) & 0x3f;
    let rs1 = Reg(((w >> 14) & 31) as u8);
    let imm = w & (1 << 13) != 0;
    let low = w & 0x1fff;
    match w >> 30 {
      0 if w == NOP => Some(Insn::Nop),
      2 if op3 == op3::RDASR && rs1.field() == ASR_PC && !imm && low == 0 => Some(Insn::RdPc { rd }),
      2 if op3 == op3::JMPL && !imm && low >> 5 == 0 =>
        Some(Insn::Jmpl { rs1, rs2: Reg((low & 31) as u8), rd }),
      3 if op3 == op3::LDX && imm => {
        #[allow(clippy::cast_possible_wrap)]
        let simm13 = ((low << 3) as i16) >> 3;
        Some(Insn::Ldx { rs1, simm13, rd })
      }
      _ => None,
    }
  }
}

impl fmt::Display for Insn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Insn::RdPc { rd } => write!(f, "rd %pc, {rd}"),
      Insn::Ldx { rs1, simm13, rd } if simm13 < 0 => write!(f, "ldx [{rs1} - {}], {rd}", -simm13),
      Insn::Ldx { rs1, simm13, rd } => write!(f, "ldx [{rs1} + {simm13}], {rd}"),
      Insn::Jmpl { rs1, rs2: Reg::G0, rd: Reg::G0 } => write!(f, "jmp {rs1}"),
      Insn::Jmpl { rs1, rs2, rd } => write!(f, "jmpl {rs1} + {rs2}, {rd}"),
      Insn::Nop => write!(f, "nop"),
    }
  }
}

/// The code stub of a closure, jumping to `entry`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Trampoline {
  entry: CodePtr,
}

impl Trampoline {
  /// Where the entry address is stored, relative to the start of the stub.
  pub const ENTRY_OFFSET: usize = 16;

  /// The instructions of every trampoline.
  pub const INSNS: [Insn; 4] = [
    Insn::RdPc { rd: Reg::G1 },
    Insn::Ldx { rs1: Reg::G1, simm13: Self::ENTRY_OFFSET as i16, rd: Reg::G5 },
    Insn::Jmpl { rs1: Reg::G5, rs2: Reg::G0, rd: Reg::G0 },
    Insn::Nop,
  ];

  /// A trampoline jumping to `entry`.
  #[must_use] pub const fn new(entry: CodePtr) -> Self { Trampoline { entry } }

  /// The address the trampoline jumps to.
  #[must_use] pub const fn entry(&self) -> CodePtr { self.entry }

  /// The instruction words.
  #[must_use]
  pub const fn words() -> [u32; 4] {
    let [a, b, c, d] = Self::INSNS;
    [a.encode(), b.encode(), c.encode(), d.encode()]
  }

  /// The bytes of the stub, in target byte order.
  #[must_use]
  pub fn encode(&self) -> [u8; TRAMPOLINE_SIZE] {
    let mut out = [0; TRAMPOLINE_SIZE];
    BigEndian::write_u32_into(&Self::words(), &mut out[..Self::ENTRY_OFFSET]);
    BigEndian::write_u64(&mut out[Self::ENTRY_OFFSET..], self.entry.0);
    out
  }

  /// Read back a stub written by [`Trampoline::encode`].
  #[must_use]
  pub fn decode(bytes: &[u8; TRAMPOLINE_SIZE]) -> Option<Self> {
    let mut words = [0; 4];
    BigEndian::read_u32_into(&bytes[..Self::ENTRY_OFFSET], &mut words);
    if words != Self::words() { return None }
    Some(Trampoline::new(CodePtr(BigEndian::read_u64(&bytes[Self::ENTRY_OFFSET..]))))
  }

  /// Print the stub as assembly, one instruction per line.
  pub fn disassemble(&self, w: &mut impl fmt::Write) -> fmt::Result {
    let bytes = self.encode();
    for (i, insn) in Self::INSNS.iter().enumerate() {
      writeln!(w, "{:3}:  {:08x}  {insn}", 4 * i, BigEndian::read_u32(&bytes[4 * i..]))?;
    }
    writeln!(w, "{:3}:  {:016x}  .xword {:#x}", Self::ENTRY_OFFSET, self.entry.0, self.entry.0)
  }
}

/// Memory that holds the code of one closure.
///
/// The code is written through [`CodeMemory::bytes_mut`] and executed at
/// [`CodeMemory::code_addr`]. These may be two mappings of the same memory;
/// the crate never frees the memory, it is handed back by
/// [`Closure::into_code`](crate::Closure::into_code).
pub trait CodeMemory {
  /// The address at which the code runs.
  fn code_addr(&self) -> CodePtr;
  /// The writable view of the code.
  fn bytes(&self) -> &[u8; TRAMPOLINE_SIZE];
  /// The writable view of the code, mutably.
  fn bytes_mut(&mut self) -> &mut [u8; TRAMPOLINE_SIZE];
}

impl<M: CodeMemory + ?Sized> CodeMemory for &mut M {
  fn code_addr(&self) -> CodePtr { (**self).code_addr() }
  fn bytes(&self) -> &[u8; TRAMPOLINE_SIZE] { (**self).bytes() }
  fn bytes_mut(&mut self) -> &mut [u8; TRAMPOLINE_SIZE] { (**self).bytes_mut() }
}

#[repr(C, align(8))]
#[derive(Debug)]
struct CodeBuf([u8; TRAMPOLINE_SIZE]);

/// Code memory on the heap. This is ordinary data memory, so it can only be
/// run on hosts without W^X, or by a model such as [`sim`](crate::sim).
#[derive(Debug)]
pub struct HeapCode(Box<CodeBuf>);

impl HeapCode {
  /// Fresh zeroed memory.
  #[must_use] pub fn new() -> Self { HeapCode(Box::new(CodeBuf([0; TRAMPOLINE_SIZE]))) }
}

impl Default for HeapCode {
  fn default() -> Self { Self::new() }
}

impl CodeMemory for HeapCode {
  fn code_addr(&self) -> CodePtr { CodePtr(self.0.0.as_ptr() as u64) }
  fn bytes(&self) -> &[u8; TRAMPOLINE_SIZE] { &self.0.0 }
  fn bytes_mut(&mut self) -> &mut [u8; TRAMPOLINE_SIZE] { &mut self.0.0 }
}

/// Makes freshly written code visible to instruction fetch.
pub trait FlushIcache {
  /// Flush the instruction cache for `len` bytes of code at `start`.
  fn flush(&self, start: *const u8, len: usize);
}

/// Flushes with the compiler runtime's `__clear_cache`. On other
/// architectures than SPARC V9 this is only a memory fence.
#[derive(Copy, Clone, Debug, Default)]
pub struct ClearCache;

#[cfg(target_arch = "sparc64")]
unsafe extern "C" {
  fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
}

impl FlushIcache for ClearCache {
  fn flush(&self, start: *const u8, len: usize) {
    fence(Ordering::SeqCst);
    #[cfg(target_arch = "sparc64")]
    // SAFETY: `__clear_cache` only issues `flush` for the given range
    unsafe { __clear_cache(start.cast_mut().cast(), start.wrapping_add(len).cast_mut().cast()) }
    #[cfg(not(target_arch = "sparc64"))]
    let _ = (start, len);
  }
}

/// Code memory holding a trampoline that has not been flushed yet.
#[derive(Debug)]
#[must_use = "the trampoline cannot be run before it is published"]
pub struct Unpublished<M> {
  mem: M,
}

impl<M: CodeMemory> Unpublished<M> {
  /// Write `tramp` into `mem`.
  pub fn write(mut mem: M, tramp: &Trampoline) -> Self {
    *mem.bytes_mut() = tramp.encode();
    Unpublished { mem }
  }

  /// Flush the instruction cache, making the trampoline runnable.
  pub fn publish(self, flush: &impl FlushIcache) -> Published<M> {
    let addr = self.mem.code_addr();
    flush.flush(addr.0 as *const u8, TRAMPOLINE_SIZE);
    trace!("published trampoline at {:#x}", addr.0);
    Published { mem: self.mem }
  }
}

/// Code memory holding a runnable trampoline.
#[derive(Debug)]
pub struct Published<M> {
  mem: M,
}

impl<M: CodeMemory> Published<M> {
  /// The address to call.
  #[must_use] pub fn code_addr(&self) -> CodePtr { self.mem.code_addr() }

  /// Decode the installed trampoline.
  #[must_use] pub fn trampoline(&self) -> Option<Trampoline> { Trampoline::decode(self.mem.bytes()) }

  /// Give the memory back.
  pub fn into_inner(self) -> M { self.mem }
}
