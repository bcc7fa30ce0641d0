use std::io::{self, Write};

use clap::{Parser, Subcommand};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use v9ffi::sig::parse_type;
use v9ffi::{Abi, Cif, CodePtr, RegFile, Trampoline, Type};

#[derive(Parser)]
#[command(name = "v9ffi", version, author, about = "SPARC V9 call layout tool")]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  debug: bool,
  #[command(subcommand)]
  cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
  /// Show the argument layout of a function signature
  Layout {
    /// The calling convention
    #[arg(long, default_value_t = Abi::DEFAULT)]
    abi: Abi,
    /// The return type
    ret: String,
    /// The argument types
    args: Vec<String>,
  },
  /// Show the closure trampoline for an entry address
  Tramp {
    /// The address of the closure entry routine, in hex
    #[arg(long, value_parser = parse_hex, default_value = "0")]
    entry: u64,
  },
}

fn parse_hex(s: &str) -> Result<u64, String> {
  let s = s.strip_prefix("0x").unwrap_or(s);
  u64::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn invalid(e: impl std::error::Error + Send + Sync + 'static) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidInput, e)
}

fn layout(abi: Abi, ret: &str, args: &[String]) -> io::Result<()> {
  let rtype = parse_type(ret).map_err(invalid)?;
  let arg_types = args.iter().map(|a| parse_type(a)).collect::<Result<Vec<Type>, _>>().map_err(invalid)?;
  let cif = Cif::new(abi, &rtype, &arg_types).map_err(invalid)?;
  let mut out = io::stdout().lock();
  writeln!(out, "{cif}")?;
  writeln!(out, "bytes: {}", cif.bytes())?;
  writeln!(out, "flags: {} ({:#x})", cif.flags(), cif.flags().bits())?;
  if cif.ret_in_mem() { writeln!(out, "  slot 0: return pointer")? }
  for ((i, p), ty) in cif.placements().into_iter().enumerate().zip(&arg_types) {
    let file = match p.file { RegFile::Gpr => "gpr", RegFile::Fpr => "fpr" };
    write!(out, "  arg {i}: {ty} at slot {}", p.slot)?;
    if p.words > 1 { write!(out, "..{}", p.slot + p.words - 1)? }
    write!(out, " ({file}")?;
    if p.by_ref { write!(out, ", by reference")? }
    if p.padded { write!(out, ", padded")? }
    if p.mixed { write!(out, ", floats in fpr")? }
    writeln!(out, ")")?;
  }
  Ok(())
}

fn tramp(entry: u64) -> io::Result<()> {
  let mut s = String::new();
  Trampoline::new(CodePtr(entry)).disassemble(&mut s).map_err(io::Error::other)?;
  io::stdout().write_all(s.as_bytes())
}

fn main() -> io::Result<()> {
  let cli = Cli::parse();
  let level = if cli.debug { LevelFilter::Debug } else { LevelFilter::Warn };
  let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto);
  match cli.cmd {
    Cmd::Layout { abi, ret, args } => layout(abi, &ret, &args),
    Cmd::Tramp { entry } => tramp(entry),
  }
}
