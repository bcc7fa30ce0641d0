//! Machine words and captured register state.
//!
//! Values are kept in target byte order. SPARC is big-endian, so a value
//! narrower than a word sits at the *end* of its 8 byte slot: a 32 bit int at
//! offset 4, a 16 bit int at offset 6, a byte at offset 7. These offsets are
//! facts about SPARC, not about the host running this code.

use byteorder::{BigEndian, ByteOrder};

use crate::{FP_ARG_WORDS, WORD};

/// One 8 byte machine word, in target byte order.
pub type Word = [u8; WORD];

/// Read a word as an unsigned integer.
#[inline] #[must_use]
pub fn word_to_u64(w: &Word) -> u64 { BigEndian::read_u64(w) }

/// Build a word from an unsigned integer.
#[inline] #[must_use]
pub fn u64_to_word(n: u64) -> Word { n.to_be_bytes() }

/// One of the two register files of a [`Frame`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegFile {
  /// The integer registers `%i0..%i5`, followed by the stack words.
  Gpr,
  /// The floating point argument registers `%d0..%d30`.
  Fpr,
}

/// A reference to an argument inside a captured [`Frame`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgRef {
  /// The value is stored in the frame itself.
  Reg {
    /// The register file.
    file: RegFile,
    /// The word index in that file.
    slot: usize,
    /// The byte offset of the value inside the word.
    offset: u8,
  },
  /// The frame held the address of the value, which lives in the caller's memory.
  Indirect(u64),
}

impl ArgRef {
  /// A reference into the integer file.
  #[must_use]
  pub const fn gpr(slot: usize, offset: u8) -> Self { ArgRef::Reg { file: RegFile::Gpr, slot, offset } }

  /// A reference into the floating point file.
  #[must_use]
  pub const fn fpr(slot: usize, offset: u8) -> Self { ArgRef::Reg { file: RegFile::Fpr, slot, offset } }

  /// The byte offset of this reference from the start of its register file.
  #[must_use]
  pub fn byte_offset(self) -> Option<usize> {
    match self {
      ArgRef::Reg { slot, offset, .. } => Some(slot * WORD + usize::from(offset)),
      ArgRef::Indirect(_) => None,
    }
  }
}

/// The register and stack state captured on entry to a closure.
///
/// `gpr` holds the six incoming integer argument registers followed by the
/// incoming stack arguments, so word `n` is argument word `n` wherever the
/// caller put it. `fpr` holds the sixteen double registers that carry
/// floating point arguments in the first sixteen argument words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
  /// The integer argument words.
  pub gpr: Vec<Word>,
  /// The floating point argument registers.
  pub fpr: [Word; FP_ARG_WORDS],
}

impl Frame {
  /// A zeroed frame with `words` integer argument words (at least six).
  #[must_use]
  pub fn new(words: usize) -> Self {
    Frame { gpr: vec![[0; WORD]; words.max(crate::MIN_ARG_WORDS)], fpr: [[0; WORD]; FP_ARG_WORDS] }
  }

  /// The words of one register file.
  #[must_use]
  pub fn file(&self, file: RegFile) -> &[Word] {
    match file {
      RegFile::Gpr => &self.gpr,
      RegFile::Fpr => &self.fpr,
    }
  }

  /// The words of one register file, mutably.
  pub fn file_mut(&mut self, file: RegFile) -> &mut [Word] {
    match file {
      RegFile::Gpr => &mut self.gpr,
      RegFile::Fpr => &mut self.fpr,
    }
  }

  /// The `len` bytes referenced by a [`ArgRef::Reg`], or `None` for an
  /// indirect reference or one that runs off the end of the file.
  #[must_use]
  pub fn get(&self, r: ArgRef, len: usize) -> Option<&[u8]> {
    let ArgRef::Reg { file, .. } = r else { return None };
    let start = r.byte_offset()?;
    self.file(file).as_flattened().get(start..start + len)
  }
}
