use v9ffi::sig::parse_type;
use v9ffi::trampoline::{HeapCode, Unpublished};
use v9ffi::{Abi, Cif, CifFlags, ClearCache, Closure, CodePtr, Error, FRAME_OVERHEAD, Flags,
  Placement, RegFile, RetKind, Trampoline, Type};

fn sig(ret: &str, args: &[&str]) -> (Type, Vec<Type>) {
  (parse_type(ret).unwrap(), args.iter().map(|a| parse_type(a).unwrap()).collect())
}

#[test]
fn float_double_pair() {
  let (r, a) = sig("double", &["float", "double", "{i32,i32}"]);
  let cif = Cif::new(Abi::V9, &r, &a).unwrap();
  assert_eq!(cif.bytes(), 48 + FRAME_OVERHEAD);
  assert_eq!(cif.flags().bits(), 11 | 64);
  let ps = cif.placements();
  assert_eq!(ps[0], Placement { slot: 0, words: 1, padded: false, by_ref: false, file: RegFile::Fpr, mixed: false });
  assert_eq!(ps[1].file, RegFile::Fpr);
  assert_eq!((ps[2].slot, ps[2].file, ps[2].mixed), (2, RegFile::Gpr, false));
}

#[test]
fn large_return() {
  let (r, a) = sig("{double,double,double,double,double}", &[]);
  let cif = Cif::new(Abi::V9, &r, &a).unwrap();
  assert_eq!(cif.flags(), CifFlags { ret: RetKind::Void, flags: Flags::RET_IN_MEM });
  assert_eq!(cif.flags().bits(), 32);
  assert_eq!(cif.bytes(), 48 + FRAME_OVERHEAD);
}

#[test]
fn struct_argument_boundary() {
  let (_, a16) = sig("void", &["{u64,u64}"]);
  let (_, a17) = sig("void", &["{u64,u64,u8}"]);
  let p16 = Cif::new(Abi::V9, &Type::VOID, &a16).unwrap().placements();
  let p17 = Cif::new(Abi::V9, &Type::VOID, &a17).unwrap().placements();
  assert_eq!((p16[0].by_ref, p16[0].words), (false, 2));
  assert_eq!((p17[0].by_ref, p17[0].words), (true, 1));
}

#[test]
fn struct_return_boundary() {
  let (r32, _) = sig("{u64,u64,u64,u64}", &[]);
  let (r33, _) = sig("{u64,u64,u64,u64,u8}", &[]);
  assert_eq!(r33.size(), 40);
  assert_eq!(Cif::new(Abi::V9, &r32, &[]).unwrap().flags().ret, RetKind::Struct);
  assert!(Cif::new(Abi::V9, &r33, &[]).unwrap().ret_in_mem());
}

#[test]
fn hidden_pointer_shifts_arguments() {
  let (r, a) = sig("{u64,u64,u64,u64,u64}", &["i32", "longdouble"]);
  let cif = Cif::new(Abi::V9, &r, &a).unwrap();
  let ps = cif.placements();
  // word 0 is the return pointer, so the quad after the int is already even
  assert_eq!((ps[0].slot, ps[1].slot, ps[1].padded), (1, 2, false));
  assert_eq!(cif.arg_words(), 4);
}

#[test]
fn quad_after_odd_slots() {
  let (_, a) = sig("void", &["i32", "i32", "i32", "longdouble"]);
  let cif = Cif::new(Abi::V9, &Type::VOID, &a).unwrap();
  let ps = cif.placements();
  assert_eq!((ps[3].slot, ps[3].padded), (4, true));
  assert_eq!(cif.bytes(), 48 + FRAME_OVERHEAD);
}

#[test]
fn setup_errors() {
  let e = Cif::new(Abi::V8, &Type::SINT32, &[]).unwrap_err();
  assert_eq!(e, Error::BadAbi(Abi::V8));
  assert_eq!(e.to_string(), "calling convention v8 is not supported (only v9 is)");
  assert!(matches!(Cif::new(Abi::V9, &Type::VOID, &[Type::VOID]), Err(Error::BadTypedef(_))));
  assert_eq!("v8".parse::<Abi>(), Ok(Abi::V8));
  assert!("v7".parse::<Abi>().is_err());
}

fn nothing(_: &Cif<'_>, _: &mut v9ffi::RetDest<'_>, _: &v9ffi::Args<'_>, _: &()) {}

#[test]
fn closure_code() {
  let cif = Cif::new(Abi::V9, &Type::VOID, &[]).unwrap();
  let entry = CodePtr(0x0000_0001_0000_2000);
  let clo = Closure::prep(HeapCode::new(), &cif, nothing, (), entry, &ClearCache).unwrap();
  assert_eq!(clo.code().trampoline(), Some(Trampoline::new(entry)));
  let mem = clo.into_code();
  // the memory can be reused for another trampoline
  let code = Unpublished::write(mem, &Trampoline::new(CodePtr(0x3000))).publish(&ClearCache);
  assert_eq!(code.trampoline().map(|t| t.entry()), Some(CodePtr(0x3000)));
}

#[test]
fn frame_size_property() {
  let tys = ["i8", "u16", "i32", "u64", "float", "double", "longdouble", "pointer",
    "{u8}", "{u8,u8,u8}", "{double,i32}", "{u64,u64,u8}", "{longdouble}", "{float,{float,float}}"];
  for ret in ["void", "i32", "{u64,u64,u64,u64,u64}"] {
    for n in 0..20 {
      let args: Vec<_> = (0..n).map(|i| tys[(i * 7 + n) % tys.len()]).collect();
      let (r, a) = sig(ret, &args);
      let cif = Cif::new(Abi::V9, &r, &a).unwrap();
      assert_eq!(cif.bytes() % 16, 0);
      assert!(cif.bytes() >= 48 + FRAME_OVERHEAD);
      assert!(cif.bytes() - FRAME_OVERHEAD >= 8 * cif.arg_words());
    }
  }
}
