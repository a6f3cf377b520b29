//! Data model for computation simplification cases.

use std::fmt;
use std::str::FromStr;

use crate::asm::{ Gpr, Reg };
use crate::error::ReferenceError;

/// A concrete operand of an instruction instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
}
impl Operand {
    /// The 64-bit register backing this operand (if any).
    pub fn gpr(&self) -> Option<Gpr> {
        match self {
            Self::Reg(r) => Some(r.gpr),
            Self::Imm(_) => None,
        }
    }
}

/// Parse an integer literal, optionally prefixed with '$'.
///
/// Values in `i64::MAX + 1 ..= u64::MAX` are reinterpreted as two's
/// complement, so that 64-bit patterns can be written either way.
pub fn parse_imm(s: &str) -> Option<i64> {
    let s = s.trim();
    let s = s.strip_prefix('$').unwrap_or(s);
    s.parse::<i64>().ok().or_else(|| s.parse::<u64>().ok().map(|v| v as i64))
}

impl FromStr for Operand {
    type Err = ReferenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(imm) = parse_imm(s) {
            return Ok(Self::Imm(imm));
        }
        Ok(Self::Reg(s.parse()?))
    }
}
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(r) => write!(f, "{}", r),
            Self::Imm(v) => write!(f, "${}", v),
        }
    }
}
impl From<Reg> for Operand {
    fn from(r: Reg) -> Self { Self::Reg(r) }
}
impl From<Gpr> for Operand {
    fn from(g: Gpr) -> Self { Self::Reg(Reg::q(g)) }
}

/// Index into the scratch register pool.
///
/// Sources are saved contiguously: operand `n` lives in slot `n`, and
/// other source `n` lives in slot `operand_count + n`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScratchSlot(pub usize);

/// The architecturally-correct value of a destination when a case is active.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Solution {
    /// A literal value
    Imm(i64),
    /// A saved copy of an operand or other source
    Saved(ScratchSlot),
    /// The current value of some register
    Reg(Reg),
}

/// One dangerous-value scenario for one instruction instance, with every
/// reference already resolved against the instance's operands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompSimpCase {
    /// Instruction mnemonic this case was loaded for
    pub mnemonic: String,

    /// Catalog row (line number) this case came from
    pub row: usize,

    /// Expected number of operands
    pub operand_count: usize,

    /// Registers read by the instruction which are not operands
    pub other_sources: Vec<Reg>,

    /// Locations written by the instruction
    pub destinations: Vec<Reg>,

    /// The operand compared against `cs_value`
    pub cs_operand: Reg,

    /// The value which triggers the fast path
    pub cs_value: i64,

    /// The value substituted for `cs_operand` when triggered
    pub cs_safe_value: i64,

    /// One solution per destination
    pub solutions: Vec<Solution>,
}

impl CompSimpCase {
    /// Every value read by the instruction at this level, in scratch order.
    pub fn sources(&self, operands: &[Operand]) -> Vec<Operand> {
        operands.iter().copied()
            .chain(self.other_sources.iter().map(|r| Operand::Reg(*r)))
            .collect()
    }

    pub fn source_count(&self) -> usize {
        self.operand_count + self.other_sources.len()
    }

    /// Returns true if `gpr` backs one of the destinations.
    pub fn writes(&self, gpr: Gpr) -> bool {
        self.destinations.iter().any(|d| d.gpr == gpr)
    }
}
