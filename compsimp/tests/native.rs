//! Run synthesized transforms on the host CPU.

#![cfg(all(target_arch = "x86_64", target_os = "linux"))]

use rand::rngs::StdRng;
use rand::SeedableRng;

use compsimp::*;

/// GPR state passed to a wrapped body: 16 registers followed by RFLAGS.
type State = [u64; 17];
type BodyFn = extern "sysv64" fn(*mut u64);

const RDI_SLOT: i32 = 7 * 8;
const FLAGS_SLOT: i32 = 16 * 8;

/// Assemble a function which loads GPRs from a [State], runs `body`, and
/// writes the resulting GPRs and RFLAGS back. RSP is never loaded.
fn wrap(body: &[CsOp]) -> (ExecutableBuffer, AssemblyOffset) {
    let mut f = X64Assembler::new().unwrap();
    let start = f.offset();

    dynasm!(f
        ; push rbx ; push rbp ; push r12 ; push r13 ; push r14 ; push r15
        ; push rdi
    );
    for gpr in Gpr::ALL {
        if gpr == Gpr::Rsp || gpr == Gpr::Rdi {
            continue;
        }
        let off = gpr.as_usize() as i32 * 8;
        dynasm!(f ; mov Rq(gpr.as_u8()), QWORD [rdi + off]);
    }
    dynasm!(f ; mov rdi, QWORD [rdi + RDI_SLOT]);

    for op in body.iter() {
        op.emit(&mut f).unwrap();
    }

    f.emit_pushfq();
    dynasm!(f
        ; push rdi
        ; mov rdi, QWORD [rsp + 16]
    );
    for gpr in Gpr::ALL {
        if gpr == Gpr::Rsp || gpr == Gpr::Rdi {
            continue;
        }
        let off = gpr.as_usize() as i32 * 8;
        dynasm!(f ; mov QWORD [rdi + off], Rq(gpr.as_u8()));
    }
    dynasm!(f
        ; pop rax
        ; mov QWORD [rdi + RDI_SLOT], rax
        ; pop rax
        ; mov QWORD [rdi + FLAGS_SLOT], rax
        ; pop rdi
        ; pop r15 ; pop r14 ; pop r13 ; pop r12 ; pop rbp ; pop rbx
    );
    f.emit_ret();

    let buf = f.finalize().unwrap_or_else(|_| panic!("finalize failed"));
    (buf, start)
}

fn call(code: &(ExecutableBuffer, AssemblyOffset), init: &State) -> State {
    let mut state = *init;
    let func: BodyFn = unsafe { std::mem::transmute(code.0.ptr(code.1)) };
    func(state.as_mut_ptr());
    state
}

fn ops(names: &[&str]) -> Vec<Operand> {
    names.iter().map(|s| s.parse().unwrap()).collect()
}

fn sample_catalog() -> CaseCatalog {
    CaseCatalog::from_path(
        concat!(env!("CARGO_MANIFEST_DIR"), "/data/cmov_transform_cases.csv")
    ).unwrap()
}

const INSTANCES: &[(&str, &[&str])] = &[
    ("ADD64rr", &["rax", "rbx"]),
    ("SUB64rr", &["rdx", "rsi"]),
    ("OR64rr", &["r8", "r9"]),
    ("IMUL64rr", &["rsi", "rdi"]),
    ("IMUL32rr", &["eax", "ecx"]),
    ("SHL64rCL", &["rdx"]),
    ("MUL64r", &["rbx"]),
];

#[test]
fn native_matches_original() {
    let cat = sample_catalog();
    let cfg = SynthConfig::default();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for (mnemonic, names) in INSTANCES {
        let operands = ops(names);
        let cases = cat.load(mnemonic, &operands).unwrap();
        let t = synthesize_with(&cfg, mnemonic, &operands, &cases).unwrap();
        let original = wrap(&[t.target()]);
        let transformed = wrap(t.ops());

        for i in 0..256 {
            let mut m = Machine::random(&mut rng);
            if let Some(case) = cases.get(i % (cases.len() + 1)) {
                m.write(case.cs_operand.gpr, case.cs_value as u64);
            }
            let mut init = [0u64; 17];
            init[..16].copy_from_slice(&m.gpr);

            let expected = call(&original, &init);
            let found = call(&transformed, &init);
            m.run(t.ops()).unwrap();

            for gpr in Gpr::ALL {
                if gpr == Gpr::Rsp || cfg.is_reserved(gpr) {
                    continue;
                }
                let idx = gpr.as_usize();
                assert_eq!(found[idx], expected[idx],
                    "{} {:?}: {} differs from the original, input {:x?}",
                    mnemonic, names, gpr, init);
                assert_eq!(found[idx], m.read(gpr),
                    "{} {:?}: {} differs from the interpreter, input {:x?}",
                    mnemonic, names, gpr, init);
            }
        }
    }
}

#[test]
fn native_flags_preserved() {
    let cat = sample_catalog();
    let cfg = SynthConfig::new().preserve_flags(Some(Gpr::Rbp));
    let mut rng = StdRng::seed_from_u64(0xf1a9);
    let mask = Flags { cf: true, zf: true, sf: true, of: true }.to_bits();

    for (mnemonic, names) in [("ADD64rr", ["rax", "rbx"]), ("SUB64rr", ["rcx", "rdx"])] {
        let operands = ops(&names);
        let cases = cat.load(mnemonic, &operands).unwrap();
        let t = synthesize_with(&cfg, mnemonic, &operands, &cases).unwrap();
        let original = wrap(&[t.target()]);
        let transformed = wrap(t.ops());

        for _ in 0..256 {
            let mut init = [0u64; 17];
            init[..16].copy_from_slice(&Machine::random(&mut rng).gpr);
            let expected = call(&original, &init);
            let found = call(&transformed, &init);
            assert_eq!(found[16] & mask, expected[16] & mask,
                "{}: flags differ, input {:x?}", mnemonic, init);
        }
    }
}

#[test]
fn assembled_delta_matches_plan() {
    let cat = sample_catalog();
    for cfg in [SynthConfig::default(),
                SynthConfig::new().preserve_flags(Some(Gpr::Rbp))]
    {
        for (mnemonic, names) in INSTANCES {
            let operands = ops(names);
            let cases = cat.load(mnemonic, &operands).unwrap();
            let plan = TransformPlan::new(&cfg, mnemonic, &operands, &cases)
                .unwrap();
            let t = plan.emit();

            let mut f = X64VecAssembler::new(0);
            t.target().emit(&mut f).unwrap();
            let original = InsnHistogram::from_code(&f.finalize().unwrap());
            let transformed = InsnHistogram::from_code(&t.assemble().unwrap());

            assert_eq!(transformed.total(), t.len() as i64);
            assert_eq!(transformed.diff(&original), plan.expected_delta(),
                "{} {:?}", mnemonic, names);
        }
    }
}
