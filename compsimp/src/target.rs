//! Original instructions which can be assembled and interpreted.
//!
//! The synthesizer itself never needs to understand the instruction it
//! wraps. Assembling or interpreting a [Transform](crate::synth::Transform)
//! does, so a small set of catalog mnemonics is mapped onto a [TargetInsn]
//! here.

use dynasmrt::dynasm;

use crate::asm::{ Emitter, Gpr, Reg, RegWidth };
use crate::case::Operand;
use crate::error::{ CsError, CsResult };
use crate::vm::{ Flags, Machine, width_mask };

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TargetOp { Add, Sub, And, Or, Xor, Imul, Shl, Shr, Mul }

/// Operand form of a target instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TargetForm {
    /// `op r, r`
    RegReg,
    /// `op r, cl`
    RegCl,
    /// `op r` (implicitly reads RAX and writes RDX:RAX)
    Implicit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TargetInsn {
    pub op: TargetOp,
    pub width: RegWidth,
    pub form: TargetForm,
}

static TARGETS: [(&str, TargetInsn); 17] = {
    use TargetOp::*;
    use TargetForm::*;
    use RegWidth::{ Qword, Dword };
    [
        ("ADD64rr",  TargetInsn::new(Add,  Qword, RegReg)),
        ("ADD32rr",  TargetInsn::new(Add,  Dword, RegReg)),
        ("SUB64rr",  TargetInsn::new(Sub,  Qword, RegReg)),
        ("SUB32rr",  TargetInsn::new(Sub,  Dword, RegReg)),
        ("AND64rr",  TargetInsn::new(And,  Qword, RegReg)),
        ("AND32rr",  TargetInsn::new(And,  Dword, RegReg)),
        ("OR64rr",   TargetInsn::new(Or,   Qword, RegReg)),
        ("OR32rr",   TargetInsn::new(Or,   Dword, RegReg)),
        ("XOR64rr",  TargetInsn::new(Xor,  Qword, RegReg)),
        ("XOR32rr",  TargetInsn::new(Xor,  Dword, RegReg)),
        ("IMUL64rr", TargetInsn::new(Imul, Qword, RegReg)),
        ("IMUL32rr", TargetInsn::new(Imul, Dword, RegReg)),
        ("SHL64rCL", TargetInsn::new(Shl,  Qword, RegCl)),
        ("SHL32rCL", TargetInsn::new(Shl,  Dword, RegCl)),
        ("SHR64rCL", TargetInsn::new(Shr,  Qword, RegCl)),
        ("SHR32rCL", TargetInsn::new(Shr,  Dword, RegCl)),
        ("MUL64r",   TargetInsn::new(Mul,  Qword, Implicit)),
    ]
};

impl TargetInsn {
    pub const fn new(op: TargetOp, width: RegWidth, form: TargetForm) -> Self {
        Self { op, width, form }
    }

    /// Look up a catalog mnemonic (case-sensitive, as written in the catalog).
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        TARGETS.iter().find(|(name, _)| *name == mnemonic).map(|(_, insn)| *insn)
    }

    /// Every supported catalog mnemonic.
    pub fn mnemonics() -> impl Iterator<Item = &'static str> {
        TARGETS.iter().map(|(name, _)| *name)
    }

    /// Number of explicit operands.
    pub fn arity(&self) -> usize {
        match self.form {
            TargetForm::RegReg => 2,
            TargetForm::RegCl | TargetForm::Implicit => 1,
        }
    }

    pub fn machine_mnemonic(&self) -> &'static str {
        match self.op {
            TargetOp::Add => "add",
            TargetOp::Sub => "sub",
            TargetOp::And => "and",
            TargetOp::Or => "or",
            TargetOp::Xor => "xor",
            TargetOp::Imul => "imul",
            TargetOp::Shl => "shl",
            TargetOp::Shr => "shr",
            TargetOp::Mul => "mul",
        }
    }

    /// Check operands against this form: every operand must be a register
    /// of the instruction's width.
    fn registers(&self, operands: &[Operand]) -> CsResult<Vec<Reg>> {
        let unsupported = || CsError::UnsupportedTarget {
            mnemonic: format!("{:?}", self),
            operands: operands.iter()
                .map(|op| op.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        };
        if operands.len() != self.arity() {
            return Err(unsupported());
        }
        operands.iter().map(|op| match op {
            Operand::Reg(r) if r.width == self.width => Ok(*r),
            _ => Err(unsupported()),
        }).collect()
    }

    /// Encode this instruction with the given operands.
    pub fn emit<E: Emitter>(&self, f: &mut E, operands: &[Operand]) -> CsResult<()> {
        use TargetOp::*;
        let regs = self.registers(operands)?;
        let d = regs[0].gpr.as_u8();
        let s = regs[regs.len() - 1].gpr.as_u8();
        match (self.op, self.width) {
            (Add, RegWidth::Qword) => dynasm!(f ; add Rq(d), Rq(s)),
            (Add, _) => dynasm!(f ; add Rd(d), Rd(s)),
            (Sub, RegWidth::Qword) => dynasm!(f ; sub Rq(d), Rq(s)),
            (Sub, _) => dynasm!(f ; sub Rd(d), Rd(s)),
            (And, RegWidth::Qword) => dynasm!(f ; and Rq(d), Rq(s)),
            (And, _) => dynasm!(f ; and Rd(d), Rd(s)),
            (Or, RegWidth::Qword) => dynasm!(f ; or Rq(d), Rq(s)),
            (Or, _) => dynasm!(f ; or Rd(d), Rd(s)),
            (Xor, RegWidth::Qword) => dynasm!(f ; xor Rq(d), Rq(s)),
            (Xor, _) => dynasm!(f ; xor Rd(d), Rd(s)),
            (Imul, RegWidth::Qword) => dynasm!(f ; imul Rq(d), Rq(s)),
            (Imul, _) => dynasm!(f ; imul Rd(d), Rd(s)),
            (Shl, RegWidth::Qword) => dynasm!(f ; shl Rq(d), cl),
            (Shl, _) => dynasm!(f ; shl Rd(d), cl),
            (Shr, RegWidth::Qword) => dynasm!(f ; shr Rq(d), cl),
            (Shr, _) => dynasm!(f ; shr Rd(d), cl),
            (Mul, _) => dynasm!(f ; mul Rq(d)),
        }
        Ok(())
    }

    /// Apply this instruction to a [Machine].
    pub fn evaluate(&self, m: &mut Machine, operands: &[Operand]) -> CsResult<()> {
        use TargetOp::*;
        let regs = self.registers(operands)?;
        let bits = self.width.bits();
        let (mask, sign) = width_mask(bits);
        let dst = regs[0];
        let a = m.read_reg(dst);
        let b = m.read_reg(regs[regs.len() - 1]);
        let logic = |r: u64| (r, Flags::result(r, bits, false, false));

        let (r, flags) = match self.op {
            Add => Flags::add(a, b, bits),
            Sub => Flags::sub(a, b, bits),
            And => logic(a & b),
            Or => logic(a | b),
            Xor => logic(a ^ b),
            Imul => {
                let sext = |v: u64| -> i128 {
                    if v & sign != 0 { v as i128 - (1i128 << bits) } else { v as i128 }
                };
                let full = sext(a) * sext(b);
                let r = (full as u64) & mask;
                let of = sext(r) != full;
                (r, Flags::result(r, bits, of, of))
            },
            Shl | Shr => {
                let count = (m.read(Gpr::Rcx) & (bits as u64 - 1)) as u32;
                if count == 0 {
                    // flags are unaffected, but a 32-bit write still zero-extends
                    m.write_reg(dst, a);
                    return Ok(());
                }
                let (r, cf, of) = if self.op == Shl {
                    let r = (a << count) & mask;
                    let cf = (a >> (bits - count)) & 1 != 0;
                    (r, cf, (r & sign != 0) ^ cf)
                } else {
                    let cf = (a >> (count - 1)) & 1 != 0;
                    (a >> count, cf, a & sign != 0)
                };
                (r, Flags::result(r, bits, cf, of))
            },
            Mul => {
                let full = m.read(Gpr::Rax) as u128 * a as u128;
                let (lo, hi) = (full as u64, (full >> 64) as u64);
                m.write(Gpr::Rdx, hi);
                m.write(Gpr::Rax, lo);
                m.flags = Flags::result(lo, bits, hi != 0, hi != 0);
                return Ok(());
            },
        };
        m.write_reg(dst, r);
        m.flags = flags;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::asm::{ X64VecAssembler, disas };

    fn ops(names: &[&str]) -> Vec<Operand> {
        names.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn lookup() {
        let insn = TargetInsn::from_mnemonic("SHL32rCL").unwrap();
        assert_eq!(insn.op, TargetOp::Shl);
        assert_eq!(insn.width, RegWidth::Dword);
        assert_eq!(insn.arity(), 1);
        assert!(TargetInsn::from_mnemonic("add64rr").is_none());
        assert_eq!(TargetInsn::mnemonics().count(), 17);
    }

    #[test]
    fn encode_targets() {
        let cases = [
            ("ADD64rr", vec!["rax", "rbx"], "add rax,rbx"),
            ("IMUL32rr", vec!["ecx", "edx"], "imul ecx,edx"),
            ("SHR64rCL", vec!["rsi"], "shr rsi,cl"),
            ("MUL64r", vec!["r9"], "mul r9"),
        ];
        for (mnemonic, operands, text) in cases.iter() {
            let mut f = X64VecAssembler::new(0);
            let insn = TargetInsn::from_mnemonic(mnemonic).unwrap();
            insn.emit(&mut f, &ops(operands)).unwrap();
            let bytes = f.finalize().unwrap();
            let lines = disas(&bytes, 0);
            assert_eq!(lines.len(), 1);
            assert!(lines[0].ends_with(text), "{}", lines[0]);
        }
    }

    #[test]
    fn reject_operands() {
        let insn = TargetInsn::from_mnemonic("ADD64rr").unwrap();
        let mut f = X64VecAssembler::new(0);
        assert!(insn.emit(&mut f, &ops(&["rax", "$1"])).is_err());
        assert!(insn.emit(&mut f, &ops(&["rax", "ebx"])).is_err());
        assert!(insn.emit(&mut f, &ops(&["rax"])).is_err());
    }

    #[test]
    fn evaluate_arith() {
        let mut m = Machine::new([0; 16]);
        m.write(Gpr::Rax, u64::MAX);
        m.write(Gpr::Rbx, 2);
        let insn = TargetInsn::from_mnemonic("ADD32rr").unwrap();
        insn.evaluate(&mut m, &ops(&["eax", "ebx"])).unwrap();
        assert_eq!(m.read(Gpr::Rax), 1);
        assert!(m.flags.cf && !m.flags.zf);

        m.write(Gpr::Rax, (-3i64) as u64);
        m.write(Gpr::Rbx, 4);
        let insn = TargetInsn::from_mnemonic("IMUL64rr").unwrap();
        insn.evaluate(&mut m, &ops(&["rax", "rbx"])).unwrap();
        assert_eq!(m.read(Gpr::Rax) as i64, -12);
        assert!(!m.flags.of);

        m.write(Gpr::Rax, 1 << 63);
        m.write(Gpr::Rcx, 4);
        let insn = TargetInsn::from_mnemonic("MUL64r").unwrap();
        insn.evaluate(&mut m, &ops(&["rcx"])).unwrap();
        assert_eq!(m.read(Gpr::Rax), 0);
        assert_eq!(m.read(Gpr::Rdx), 2);
        assert!(m.flags.cf && m.flags.of);
    }

    #[test]
    fn evaluate_shifts() {
        let mut m = Machine::new([0; 16]);
        m.write(Gpr::Rdx, 0x8000_0001);
        m.write(Gpr::Rcx, 1);
        let insn = TargetInsn::from_mnemonic("SHL32rCL").unwrap();
        insn.evaluate(&mut m, &ops(&["edx"])).unwrap();
        assert_eq!(m.read(Gpr::Rdx), 2);
        assert!(m.flags.cf);

        // zero count leaves the flags alone
        let before = m.flags;
        m.write(Gpr::Rcx, 64);
        let insn = TargetInsn::from_mnemonic("SHR64rCL").unwrap();
        insn.evaluate(&mut m, &ops(&["rdx"])).unwrap();
        assert_eq!(m.read(Gpr::Rdx), 2);
        assert_eq!(m.flags, before);
    }
}
