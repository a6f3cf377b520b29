//! Symbolic references from the case catalog.
//!
//! Catalog cells are parsed into a [RefToken] exactly once (when the catalog
//! is built). A token is resolved against the operands of a specific
//! instruction instance when cases are loaded for it.

use std::fmt;

use crate::asm::Reg;
use crate::case::{ Operand, ScratchSlot, Solution, parse_imm };
use crate::error::ReferenceError;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RefToken {
    /// Positional operand index (`0`, `1`, ...)
    Index(usize),
    /// Literal immediate (`const:N` or `$N`)
    Const(i64),
    /// Saved copy of operand `N` (`op:N`)
    Op(usize),
    /// Saved copy of other source `N` (`src:N`)
    Src(usize),
    /// Literal register name
    Reg(Reg),
}

impl RefToken {
    /// Parse a token naming a location: an operand index, a register, or
    /// an immediate (used for `dests` and `cs_operand`).
    pub fn parse_location(s: &str) -> Result<Self, ReferenceError> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse().map(Self::Index)
                .map_err(|_| ReferenceError::MalformedToken(s.to_string()));
        }
        if s.starts_with('$') {
            return parse_imm(s).map(Self::Const)
                .ok_or_else(|| ReferenceError::MalformedToken(s.to_string()));
        }
        Ok(Self::Reg(s.parse()?))
    }

    /// Parse a token from `cs_solutions`.
    pub fn parse_solution(s: &str) -> Result<Self, ReferenceError> {
        let s = s.trim();
        let malformed = || ReferenceError::MalformedToken(s.to_string());
        if let Some(v) = s.strip_prefix("const:") {
            return parse_imm(v).map(Self::Const).ok_or_else(malformed);
        }
        if let Some(n) = s.strip_prefix("op:") {
            return n.trim().parse().map(Self::Op).map_err(|_| malformed());
        }
        if let Some(n) = s.strip_prefix("src:") {
            return n.trim().parse().map(Self::Src).map_err(|_| malformed());
        }
        Ok(Self::Reg(s.parse()?))
    }

    /// Resolve a location token against the operands of an instruction.
    pub fn resolve(&self, operands: &[Operand])
        -> Result<Operand, ReferenceError>
    {
        match self {
            Self::Index(idx) => operands.get(*idx).copied()
                .ok_or(ReferenceError::OperandIndex {
                    index: *idx, count: operands.len()
                }),
            Self::Reg(r) => Ok(Operand::Reg(*r)),
            Self::Const(v) => Ok(Operand::Imm(*v)),
            Self::Op(_) | Self::Src(_) => {
                Err(ReferenceError::MalformedToken(self.to_string()))
            },
        }
    }

    /// Resolve a location token which must name a register.
    pub fn resolve_reg(&self, operands: &[Operand])
        -> Result<Reg, ReferenceError>
    {
        match self.resolve(operands)? {
            Operand::Reg(r) => Ok(r),
            imm => Err(ReferenceError::NotARegister(imm.to_string())),
        }
    }

    /// Resolve a solution token, given the number of operands and the number
    /// of other sources declared by the case.
    pub fn resolve_solution(&self, operand_count: usize, source_count: usize)
        -> Result<Solution, ReferenceError>
    {
        match self {
            Self::Const(v) => Ok(Solution::Imm(*v)),
            Self::Op(idx) => {
                if *idx >= operand_count {
                    return Err(ReferenceError::OperandIndex {
                        index: *idx, count: operand_count
                    });
                }
                Ok(Solution::Saved(ScratchSlot(*idx)))
            },
            Self::Src(idx) => {
                if *idx >= source_count {
                    return Err(ReferenceError::SourceIndex {
                        index: *idx, count: source_count
                    });
                }
                Ok(Solution::Saved(ScratchSlot(operand_count + *idx)))
            },
            Self::Reg(r) => Ok(Solution::Reg(*r)),
            Self::Index(_) => {
                Err(ReferenceError::MalformedToken(self.to_string()))
            },
        }
    }
}

impl fmt::Display for RefToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(n) => write!(f, "{}", n),
            Self::Const(v) => write!(f, "const:{}", v),
            Self::Op(n) => write!(f, "op:{}", n),
            Self::Src(n) => write!(f, "src:{}", n),
            Self::Reg(r) => write!(f, "{}", r),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::asm::Gpr;

    fn ops() -> Vec<Operand> {
        vec![Operand::from(Gpr::Rax), Operand::from(Gpr::Rbx)]
    }

    #[test]
    fn locations() {
        let t = RefToken::parse_location("1").unwrap();
        assert_eq!(t, RefToken::Index(1));
        assert_eq!(t.resolve_reg(&ops()).unwrap(), Reg::q(Gpr::Rbx));

        let t = RefToken::parse_location("rdx").unwrap();
        assert_eq!(t.resolve_reg(&ops()).unwrap(), Reg::q(Gpr::Rdx));

        let t = RefToken::parse_location("2").unwrap();
        assert_eq!(t.resolve(&ops()),
            Err(ReferenceError::OperandIndex { index: 2, count: 2 }));

        let t = RefToken::parse_location("$3").unwrap();
        assert!(matches!(t.resolve_reg(&ops()),
            Err(ReferenceError::NotARegister(_))));

        assert!(RefToken::parse_location("bogus").is_err());
    }

    #[test]
    fn solutions() {
        let t = RefToken::parse_solution("const:-5").unwrap();
        assert_eq!(t.resolve_solution(2, 1).unwrap(), Solution::Imm(-5));

        let t = RefToken::parse_solution("op:1").unwrap();
        assert_eq!(t.resolve_solution(2, 1).unwrap(),
            Solution::Saved(ScratchSlot(1)));

        // saved sources are stored after saved operands
        let t = RefToken::parse_solution("src:0").unwrap();
        assert_eq!(t.resolve_solution(2, 1).unwrap(),
            Solution::Saved(ScratchSlot(2)));

        let t = RefToken::parse_solution("src:1").unwrap();
        assert_eq!(t.resolve_solution(2, 1),
            Err(ReferenceError::SourceIndex { index: 1, count: 1 }));

        let t = RefToken::parse_solution("op:2").unwrap();
        assert!(t.resolve_solution(2, 0).is_err());

        let t = RefToken::parse_solution("rdx").unwrap();
        assert_eq!(t.resolve_solution(2, 0).unwrap(),
            Solution::Reg(Reg::q(Gpr::Rdx)));

        assert!(RefToken::parse_solution("op:x").is_err());
    }
}
