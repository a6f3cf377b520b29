//! Operations emitted by the synthesizer.
//!
//! Each [CsOp] has a textual encoding (one operation per line), which can be
//! parsed back with [FromStr], and a machine encoding via [Emitter].

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;

use crate::asm::{ Emitter, Gpr, Reg, RegWidth };
use crate::case::{ Operand, parse_imm };
use crate::error::{ CsError, CsResult };
use crate::target::TargetInsn;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CsOp {
    /// `mov r/m64, r64`
    MovRR { dst: Gpr, src: Gpr },
    /// `mov r/m32, imm32`
    MovImm32 { dst: Gpr, imm: i32 },
    /// `mov r64, imm64`
    MovImm64 { dst: Gpr, imm: i64 },
    /// `cmp r/m64, r64`
    Cmp64 { lhs: Gpr, rhs: Gpr },
    /// `cmp r/m32, imm8`
    CmpImm8 { lhs: Gpr, imm: i8 },
    /// `setz r/m8`
    SetZ { dst: Gpr },
    /// `cmovz r64, r/m64`
    CmovZ { dst: Gpr, src: Gpr },
    /// `push r/m64`
    Push(Gpr),
    /// `pop r/m64`
    Pop(Gpr),
    /// `pushfq`
    PushFlags,
    /// `popfq`
    PopFlags,
    /// The original instruction
    Target { mnemonic: String, operands: Vec<Operand> },
}

/// The kind of an operation, ignoring its operands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    MovRR,
    MovImm32,
    MovImm64,
    Cmp64,
    CmpImm8,
    SetZ,
    CmovZ,
    Push,
    Pop,
    PushFlags,
    PopFlags,
    Target,
}
impl OpKind {
    /// Machine mnemonic for this kind (as printed by a disassembler).
    /// Returns [None] for [OpKind::Target].
    pub fn machine_mnemonic(&self) -> Option<&'static str> {
        match self {
            Self::MovRR | Self::MovImm32 | Self::MovImm64 => Some("mov"),
            Self::Cmp64 | Self::CmpImm8 => Some("cmp"),
            Self::SetZ => Some("sete"),
            Self::CmovZ => Some("cmove"),
            Self::Push => Some("push"),
            Self::Pop => Some("pop"),
            Self::PushFlags => Some("pushfq"),
            Self::PopFlags => Some("popfq"),
            Self::Target => None,
        }
    }
}

impl CsOp {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::MovRR { .. } => OpKind::MovRR,
            Self::MovImm32 { .. } => OpKind::MovImm32,
            Self::MovImm64 { .. } => OpKind::MovImm64,
            Self::Cmp64 { .. } => OpKind::Cmp64,
            Self::CmpImm8 { .. } => OpKind::CmpImm8,
            Self::SetZ { .. } => OpKind::SetZ,
            Self::CmovZ { .. } => OpKind::CmovZ,
            Self::Push(_) => OpKind::Push,
            Self::Pop(_) => OpKind::Pop,
            Self::PushFlags => OpKind::PushFlags,
            Self::PopFlags => OpKind::PopFlags,
            Self::Target { .. } => OpKind::Target,
        }
    }

    /// Machine mnemonic for this operation. The original instruction uses
    /// its encoding's mnemonic when known, and its catalog name otherwise.
    pub fn machine_mnemonic(&self) -> String {
        match self {
            Self::Target { mnemonic, .. } => match TargetInsn::from_mnemonic(mnemonic) {
                Some(insn) => insn.machine_mnemonic().to_string(),
                None => mnemonic.clone(),
            },
            op => op.kind().machine_mnemonic().unwrap_or_default().to_string(),
        }
    }

    /// Encode this operation.
    pub fn emit<E: Emitter>(&self, f: &mut E) -> CsResult<()> {
        match self {
            Self::MovRR { dst, src } => f.emit_mov_r64_r64(dst.as_u8(), src.as_u8()),
            Self::MovImm32 { dst, imm } => f.emit_mov_r32_i32(dst.as_u8(), *imm),
            Self::MovImm64 { dst, imm } => f.emit_mov_r64_i64(dst.as_u8(), *imm),
            Self::Cmp64 { lhs, rhs } => f.emit_cmp_r64_r64(lhs.as_u8(), rhs.as_u8()),
            Self::CmpImm8 { lhs, imm } => f.emit_cmp_r32_i8(lhs.as_u8(), *imm),
            Self::SetZ { dst } => {
                if !dst.has_plain_low_byte() {
                    return Err(CsError::Assemble(format!(
                        "setz: no unambiguous low byte for {}", dst
                    )));
                }
                f.emit_setz_r8(dst.as_u8())
            },
            Self::CmovZ { dst, src } => f.emit_cmovz_r64_r64(dst.as_u8(), src.as_u8()),
            Self::Push(src) => f.emit_push_r64(src.as_u8()),
            Self::Pop(dst) => f.emit_pop_r64(dst.as_u8()),
            Self::PushFlags => f.emit_pushfq(),
            Self::PopFlags => f.emit_popfq(),
            Self::Target { mnemonic, operands } => {
                let insn = TargetInsn::from_mnemonic(mnemonic).ok_or_else(|| {
                    CsError::UnsupportedTarget {
                        mnemonic: mnemonic.clone(),
                        operands: operands.iter().join(", "),
                    }
                })?;
                insn.emit(f, operands)?;
            },
        }
        Ok(())
    }
}

impl fmt::Display for CsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MovRR { dst, src } => write!(f, "mov-r/m64-r64 {} {}", dst, src),
            Self::MovImm32 { dst, imm } => {
                write!(f, "mov-r/m32-imm32 {} ${}", Reg::d(*dst), imm)
            },
            Self::MovImm64 { dst, imm } => write!(f, "mov-r64-imm64 {} ${}", dst, imm),
            Self::Cmp64 { lhs, rhs } => write!(f, "cmp-r/m64-r64 {} {}", lhs, rhs),
            Self::CmpImm8 { lhs, imm } => {
                write!(f, "cmp-r/m32-imm8 {} ${}", Reg::d(*lhs), imm)
            },
            Self::SetZ { dst } => write!(f, "setz {}", Reg::b(*dst)),
            Self::CmovZ { dst, src } => write!(f, "cmovz-r64-r64 {} {}", dst, src),
            Self::Push(src) => write!(f, "push-r/m64 {}", src),
            Self::Pop(dst) => write!(f, "pop-r/m64 {}", dst),
            Self::PushFlags => write!(f, "pushfq"),
            Self::PopFlags => write!(f, "popfq"),
            Self::Target { mnemonic, operands } => {
                if operands.is_empty() {
                    write!(f, "{}", mnemonic)
                } else {
                    write!(f, "{} {}", mnemonic, operands.iter().join(" "))
                }
            },
        }
    }
}

/// Parse a register operand, requiring the given width.
fn parse_gpr(s: Option<&str>, width: RegWidth, line: &str) -> CsResult<Gpr> {
    let bad = || CsError::Assemble(format!("bad operand in '{}'", line));
    let reg: Reg = s.ok_or_else(bad)?.parse().map_err(|_| bad())?;
    if reg.width != width {
        return Err(bad());
    }
    Ok(reg.gpr)
}

fn parse_int<T: TryFrom<i64>>(s: Option<&str>, line: &str) -> CsResult<T> {
    let bad = || CsError::Assemble(format!("bad immediate in '{}'", line));
    let v = s.and_then(parse_imm).ok_or_else(bad)?;
    T::try_from(v).map_err(|_| bad())
}

impl FromStr for CsOp {
    type Err = CsError;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        use RegWidth::*;
        let mut tok = line.split_whitespace();
        let name = tok.next()
            .ok_or_else(|| CsError::Assemble("empty operation".to_string()))?;
        let args: Vec<&str> = tok.collect();
        let (a, b) = (args.first().copied(), args.get(1).copied());
        let (op, arity) = match name {
            "mov-r/m64-r64" => (Self::MovRR {
                dst: parse_gpr(a, Qword, line)?, src: parse_gpr(b, Qword, line)?,
            }, 2),
            "mov-r/m32-imm32" => (Self::MovImm32 {
                dst: parse_gpr(a, Dword, line)?, imm: parse_int(b, line)?,
            }, 2),
            "mov-r64-imm64" => (Self::MovImm64 {
                dst: parse_gpr(a, Qword, line)?, imm: parse_int(b, line)?,
            }, 2),
            "cmp-r/m64-r64" => (Self::Cmp64 {
                lhs: parse_gpr(a, Qword, line)?, rhs: parse_gpr(b, Qword, line)?,
            }, 2),
            "cmp-r/m32-imm8" => (Self::CmpImm8 {
                lhs: parse_gpr(a, Dword, line)?, imm: parse_int(b, line)?,
            }, 2),
            "setz" => (Self::SetZ { dst: parse_gpr(a, Byte, line)? }, 1),
            "cmovz-r64-r64" => (Self::CmovZ {
                dst: parse_gpr(a, Qword, line)?, src: parse_gpr(b, Qword, line)?,
            }, 2),
            "push-r/m64" => (Self::Push(parse_gpr(a, Qword, line)?), 1),
            "pop-r/m64" => (Self::Pop(parse_gpr(a, Qword, line)?), 1),
            "pushfq" => (Self::PushFlags, 0),
            "popfq" => (Self::PopFlags, 0),
            _ => {
                let operands = args.iter()
                    .map(|s| s.parse::<Operand>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| CsError::Assemble(format!("'{}': {}", line, e)))?;
                return Ok(Self::Target { mnemonic: name.to_string(), operands });
            },
        };
        if args.len() != arity {
            return Err(CsError::Assemble(format!(
                "'{}' takes {} operand(s), found {}", name, arity, args.len()
            )));
        }
        Ok(op)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn text_encoding() {
        let ops = [
            (CsOp::MovRR { dst: Gpr::R12, src: Gpr::Rax }, "mov-r/m64-r64 r12 rax"),
            (CsOp::MovImm32 { dst: Gpr::R10, imm: 0 }, "mov-r/m32-imm32 r10d $0"),
            (CsOp::MovImm64 { dst: Gpr::R11, imm: -1 }, "mov-r64-imm64 r11 $-1"),
            (CsOp::SetZ { dst: Gpr::R10 }, "setz r10b"),
            (CsOp::CmpImm8 { lhs: Gpr::R10, imm: 1 }, "cmp-r/m32-imm8 r10d $1"),
            (CsOp::Push(Gpr::R13), "push-r/m64 r13"),
            (CsOp::Target {
                mnemonic: "ADD32rr".to_string(),
                operands: vec!["eax".parse().unwrap(), "ecx".parse().unwrap()],
            }, "ADD32rr eax ecx"),
        ];
        for (op, text) in ops.iter() {
            assert_eq!(op.to_string(), *text);
            assert_eq!(text.parse::<CsOp>().unwrap(), *op);
        }
    }

    #[test]
    fn text_rejects_bad_widths() {
        assert!("setz r10".parse::<CsOp>().is_err());
        assert!("mov-r/m64-r64 eax rbx".parse::<CsOp>().is_err());
        assert!("cmp-r/m32-imm8 r10d $300".parse::<CsOp>().is_err());
        assert!("push-r/m64 rax rbx".parse::<CsOp>().is_err());
    }

    #[test]
    fn text_rejects_extra_operands() {
        for line in ["pushfq rax", "popfq r12", "pop-r/m64 r12 r13",
                     "setz r10b r11b", "cmovz-r64-r64 rax r11 r12"]
        {
            assert!(line.parse::<CsOp>().is_err(), "{}", line);
        }
        assert_eq!("pushfq".parse::<CsOp>().unwrap(), CsOp::PushFlags);
        assert_eq!("pop-r/m64 r12".parse::<CsOp>().unwrap(), CsOp::Pop(Gpr::R12));
    }

    #[test]
    fn machine_mnemonics() {
        let op = CsOp::Target {
            mnemonic: "IMUL64rr".to_string(),
            operands: vec![],
        };
        assert_eq!(op.machine_mnemonic(), "imul");
        let op = CsOp::Target { mnemonic: "FOO".to_string(), operands: vec![] };
        assert_eq!(op.machine_mnemonic(), "FOO");
        assert_eq!(CsOp::CmovZ { dst: Gpr::Rax, src: Gpr::R11 }.machine_mnemonic(),
            "cmove");
    }
}
