//! A register-level interpreter for synthesized transforms.
//!
//! [Machine] models the 16 integer GPRs, the arithmetic flags we care about
//! (CF, ZF, SF, OF), and a stack which is kept apart from RSP. This is enough
//! to run a [Transform] next to the original instruction and compare the
//! architectural state they leave behind.

use rand::Rng;

use crate::asm::{ Gpr, Reg, RegWidth };
use crate::case::{ CompSimpCase, Operand };
use crate::error::{ CsError, CsResult };
use crate::op::CsOp;
use crate::synth::{ SynthConfig, Transform };
use crate::target::TargetInsn;

/// The subset of RFLAGS modeled by [Machine].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub cf: bool,
    pub zf: bool,
    pub sf: bool,
    pub of: bool,
}
impl Flags {
    const CF: u64 = 1 << 0;
    const RESERVED: u64 = 1 << 1;
    const ZF: u64 = 1 << 6;
    const SF: u64 = 1 << 7;
    const OF: u64 = 1 << 11;

    /// Pack into the RFLAGS layout (as pushed by PUSHFQ).
    pub fn to_bits(&self) -> u64 {
        let mut res = Self::RESERVED;
        if self.cf { res |= Self::CF; }
        if self.zf { res |= Self::ZF; }
        if self.sf { res |= Self::SF; }
        if self.of { res |= Self::OF; }
        res
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            cf: bits & Self::CF != 0,
            zf: bits & Self::ZF != 0,
            sf: bits & Self::SF != 0,
            of: bits & Self::OF != 0,
        }
    }

    /// Flags for `a + b` at the given width.
    pub fn add(a: u64, b: u64, bits: u32) -> (u64, Self) {
        let (mask, sign) = width_mask(bits);
        let wide = (a & mask) as u128 + (b & mask) as u128;
        let r = (wide as u64) & mask;
        let flags = Self {
            cf: wide > mask as u128,
            zf: r == 0,
            sf: r & sign != 0,
            of: (a ^ r) & (b ^ r) & sign != 0,
        };
        (r, flags)
    }

    /// Flags for `a - b` at the given width.
    pub fn sub(a: u64, b: u64, bits: u32) -> (u64, Self) {
        let (mask, sign) = width_mask(bits);
        let (a, b) = (a & mask, b & mask);
        let r = a.wrapping_sub(b) & mask;
        let flags = Self {
            cf: a < b,
            zf: r == 0,
            sf: r & sign != 0,
            of: (a ^ b) & (a ^ r) & sign != 0,
        };
        (r, flags)
    }

    /// Flags for a result with CF and OF given explicitly.
    pub fn result(r: u64, bits: u32, cf: bool, of: bool) -> Self {
        let (mask, sign) = width_mask(bits);
        Self { cf, zf: r & mask == 0, sf: r & sign != 0, of }
    }
}

/// Returns (mask, sign bit) for a width in bits.
pub fn width_mask(bits: u32) -> (u64, u64) {
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    (mask, 1u64 << (bits - 1))
}

/// Architectural state of the interpreter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Machine {
    pub gpr: [u64; 16],
    pub flags: Flags,
    pub stack: Vec<u64>,
}

impl Machine {
    pub fn new(gpr: [u64; 16]) -> Self {
        Self { gpr, flags: Flags::default(), stack: Vec::new() }
    }

    /// A machine with random register and flag state.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut gpr = [0u64; 16];
        rng.fill(&mut gpr[..]);
        let flags = Flags {
            cf: rng.gen(), zf: rng.gen(), sf: rng.gen(), of: rng.gen(),
        };
        Self { gpr, flags, stack: Vec::new() }
    }

    pub fn read(&self, gpr: Gpr) -> u64 { self.gpr[gpr.as_usize()] }
    pub fn write(&mut self, gpr: Gpr, val: u64) { self.gpr[gpr.as_usize()] = val; }

    /// Read a register at its access width.
    pub fn read_reg(&self, reg: Reg) -> u64 {
        let (shift, mask) = reg.field();
        (self.read(reg.gpr) >> shift) & mask
    }

    /// Write a register at its access width. 32-bit writes zero the upper
    /// half of the parent register; narrower writes merge.
    pub fn write_reg(&mut self, reg: Reg, val: u64) {
        let (shift, mask) = reg.field();
        match reg.width {
            RegWidth::Qword | RegWidth::Dword => self.write(reg.gpr, val & mask),
            _ => {
                let old = self.read(reg.gpr) & !(mask << shift);
                self.write(reg.gpr, old | ((val & mask) << shift));
            },
        }
    }

    pub fn read_operand(&self, op: Operand) -> u64 {
        match op {
            Operand::Reg(r) => self.read_reg(r),
            Operand::Imm(v) => v as u64,
        }
    }

    fn pop(&mut self) -> CsResult<u64> {
        self.stack.pop()
            .ok_or_else(|| CsError::Machine("pop with an empty stack".to_string()))
    }

    /// Execute a single operation.
    pub fn step(&mut self, op: &CsOp) -> CsResult<()> {
        match op {
            CsOp::MovRR { dst, src } => self.write(*dst, self.read(*src)),
            CsOp::MovImm32 { dst, imm } => self.write(*dst, *imm as u32 as u64),
            CsOp::MovImm64 { dst, imm } => self.write(*dst, *imm as u64),
            CsOp::Cmp64 { lhs, rhs } => {
                self.flags = Flags::sub(self.read(*lhs), self.read(*rhs), 64).1;
            },
            CsOp::CmpImm8 { lhs, imm } => {
                let imm = *imm as i32 as u32 as u64;
                self.flags = Flags::sub(self.read(*lhs), imm, 32).1;
            },
            CsOp::SetZ { dst } => self.write_reg(Reg::b(*dst), self.flags.zf as u64),
            CsOp::CmovZ { dst, src } => {
                if self.flags.zf {
                    self.write(*dst, self.read(*src));
                }
            },
            CsOp::Push(src) => {
                let val = self.read(*src);
                self.stack.push(val);
            },
            CsOp::Pop(dst) => {
                let val = self.pop()?;
                self.write(*dst, val);
            },
            CsOp::PushFlags => self.stack.push(self.flags.to_bits()),
            CsOp::PopFlags => {
                let val = self.pop()?;
                self.flags = Flags::from_bits(val);
            },
            CsOp::Target { mnemonic, operands } => {
                let insn = TargetInsn::from_mnemonic(mnemonic).ok_or_else(|| {
                    CsError::UnsupportedTarget {
                        mnemonic: mnemonic.clone(),
                        operands: format!("{:?}", operands),
                    }
                })?;
                insn.evaluate(self, operands)?;
            },
        }
        Ok(())
    }

    pub fn run(&mut self, ops: &[CsOp]) -> CsResult<()> {
        for op in ops.iter() {
            self.step(op)?;
        }
        Ok(())
    }
}

/// An architectural difference between a transform and its original
/// instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Divergence {
    Register { gpr: Gpr, expected: u64, found: u64 },
    Flags { expected: Flags, found: Flags },
    Stack { depth: usize },
}

/// Run the original instruction and `transform` from the same initial state,
/// and report every difference in registers not reserved by `cfg`.
///
/// Flags are only compared when `check_flags` is set.
pub fn compare(cfg: &SynthConfig, transform: &Transform, init: &Machine,
    check_flags: bool) -> CsResult<Vec<Divergence>>
{
    let mut expected = init.clone();
    expected.step(&transform.target())?;

    let mut found = init.clone();
    found.run(transform.ops())?;

    let mut res = Vec::new();
    for gpr in Gpr::ALL {
        if cfg.is_reserved(gpr) {
            continue;
        }
        let (e, f) = (expected.read(gpr), found.read(gpr));
        if e != f {
            res.push(Divergence::Register { gpr, expected: e, found: f });
        }
    }
    if check_flags && expected.flags != found.flags {
        res.push(Divergence::Flags {
            expected: expected.flags, found: found.flags
        });
    }
    if found.stack.len() != init.stack.len() {
        res.push(Divergence::Stack { depth: found.stack.len() });
    }
    Ok(res)
}

/// Compare `transform` against its original instruction on `iters` random
/// states. Iterations cycle through the cases, forcing each case's operand
/// to its dangerous value, followed by one unmodified (safe-path) state.
///
/// Flags are only compared on safe-path states: on the dangerous path they
/// come from the substituted safe value.
pub fn differential<R: Rng + ?Sized>(
    cfg: &SynthConfig,
    cases: &[CompSimpCase],
    transform: &Transform,
    rng: &mut R,
    iters: usize,
    check_flags: bool,
) -> CsResult<Vec<(Machine, Divergence)>>
{
    let mut res = Vec::new();
    for i in 0..iters {
        let mut init = Machine::random(rng);
        let k = i % (cases.len() + 1);
        let safe_path = k == cases.len();
        if let Some(case) = cases.get(k) {
            init.write(case.cs_operand.gpr, case.cs_value as u64);
        }
        for d in compare(cfg, transform, &init, check_flags && safe_path)? {
            res.push((init.clone(), d));
        }
    }
    Ok(res)
}
