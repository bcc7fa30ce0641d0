//! SPARC V9 backend for a foreign function call engine.
//!
//! Given the signature of a native function as a list of [`Type`]s, this crate
//! computes the layout the SPARC V9 (64 bit) calling convention assigns to the
//! arguments and the return value, and converts between that layout and a
//! generic representation in which every argument is a byte slice holding the
//! value in target byte order.
//!
//! * A [`Cif`] is prepared once per signature ([`Cif::new`]).
//! * Forward calls go through [`call::call`], which asks a [`CallTrampoline`]
//!   to reserve stack, fill it with [`Cif::prep_args`] and make the call.
//! * Reverse calls go through a [`Closure`]: a small code stub that jumps to a
//!   shared entry routine, which captures the registers in a [`Frame`] and runs
//!   [`Closure::dispatch`] to decode them and invoke the user callback.
//!
//! The assembly halves of both directions live outside this crate; [`sim`]
//! models them in software so the layout contract can be exercised on any host.

// rust lints we want
#![warn(
  bare_trait_objects,
  elided_lifetimes_in_paths,
  missing_copy_implementations,
  missing_debug_implementations,
  future_incompatible,
  rust_2018_idioms,
  trivial_numeric_casts,
  variant_size_differences,
  unreachable_pub,
  unused,
  missing_docs
)]
#![deny(unsafe_op_in_unsafe_fn)]
// all the clippy
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
// all the clippy::restriction lints we want
#![warn(
  clippy::else_if_without_else,
  clippy::get_unwrap,
  clippy::rc_buffer,
  clippy::rest_pat_in_fully_bound_structs,
  clippy::string_add,
  clippy::undocumented_unsafe_blocks,
  clippy::unwrap_used
)]
// all the clippy lints we don't want
#![allow(
  clippy::cast_possible_truncation,
  clippy::cognitive_complexity,
  clippy::comparison_chain,
  clippy::enum_glob_use,
  clippy::inline_always,
  clippy::missing_const_for_fn,
  clippy::missing_errors_doc,
  clippy::module_name_repetitions,
  clippy::multiple_crate_versions,
  clippy::option_if_let_else,
  clippy::redundant_pub_crate,
  clippy::semicolon_if_nothing_returned,
  clippy::too_many_lines,
  clippy::use_self
)]

#[macro_use] extern crate bitflags;
#[macro_use] extern crate log;

mod flags;
pub mod classify;
mod cif;
pub mod frame;
pub mod call;
pub mod closure;
pub mod trampoline;
pub mod value;
pub mod sig;
pub mod sim;

use std::fmt;
use std::str::FromStr;

pub use ffi_type::{Kind, Type, TypeError, align};
pub use flags::{CifFlags, Flags, RetKind};
pub use cif::{Cif, Placement};
pub use frame::{ArgRef, Frame, RegFile, Word};
pub use call::{CallTrampoline, CodePtr};
pub use closure::{Args, Closure, ClosureFn, RetDest};
pub use trampoline::{ClearCache, CodeMemory, FlushIcache, Trampoline};
pub use value::Value;

/// Size of a machine word (and of one argument slot) in bytes.
pub const WORD: usize = 8;

/// Number of argument words the caller always reserves in its frame,
/// whether or not the callee has that many arguments.
pub const MIN_ARG_WORDS: usize = 6;

/// The first 16 argument words may be passed in the floating point registers
/// `%d0..%d30`; past this point everything is on the stack.
pub const FP_ARG_WORDS: usize = 16;

/// Fixed overhead added to every frame: the 16 word register window save area
/// plus 8 words for the frame that fills in the outgoing arguments.
pub const FRAME_OVERHEAD: usize = 8 * 16 + 8 * 8;

/// Aggregates larger than this are passed by reference.
pub const MAX_STRUCT_ARG: usize = 16;

/// Aggregates larger than this are returned through a hidden pointer.
pub const MAX_STRUCT_RET: usize = 32;

/// A SPARC calling convention.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Abi {
  /// The 32 bit convention. Recognized, but not implemented here.
  V8,
  /// The 64 bit convention.
  V9,
}

impl Abi {
  /// The convention of this backend.
  pub const DEFAULT: Abi = Abi::V9;
}

impl Default for Abi {
  fn default() -> Self { Self::DEFAULT }
}

impl fmt::Display for Abi {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Abi::V8 => write!(f, "v8"),
      Abi::V9 => write!(f, "v9"),
    }
  }
}

impl FromStr for Abi {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, String> {
    match s {
      "v8" | "V8" => Ok(Abi::V8),
      "v9" | "V9" => Ok(Abi::V9),
      _ => Err(format!("unknown calling convention '{s}' (expected v8 or v9)")),
    }
  }
}

/// Errors reported while setting up a call interface or a closure.
/// Once setup succeeds, marshaling in either direction cannot fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
  /// The requested calling convention is not the one this backend implements.
  BadAbi(Abi),
  /// A type descriptor cannot appear where it was used.
  BadTypedef(&'static str),
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::BadAbi(abi) => write!(f, "calling convention {abi} is not supported (only v9 is)"),
      Error::BadTypedef(msg) => write!(f, "bad type descriptor: {msg}"),
    }
  }
}

impl std::error::Error for Error {}
