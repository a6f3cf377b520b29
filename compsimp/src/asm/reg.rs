//! Register names and access widths.

use std::fmt;
use std::str::FromStr;

use crate::asm::Gpr;
use crate::error::ReferenceError;

/// The width of a register access.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegWidth { Qword, Dword, Word, Byte, HighByte }

impl RegWidth {
    pub fn bits(&self) -> u32 {
        match self {
            Self::Qword => 64,
            Self::Dword => 32,
            Self::Word => 16,
            Self::Byte | Self::HighByte => 8,
        }
    }
}

/// A register as named by an instruction operand: some [Gpr] accessed at
/// some width (ie. `eax` is [Gpr::Rax] at [RegWidth::Dword]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reg {
    pub gpr: Gpr,
    pub width: RegWidth,
}

const NAMES: [[&str; 4]; 16] = [
    ["rax", "eax",  "ax",   "al"  ],
    ["rcx", "ecx",  "cx",   "cl"  ],
    ["rdx", "edx",  "dx",   "dl"  ],
    ["rbx", "ebx",  "bx",   "bl"  ],
    ["rsp", "esp",  "sp",   "spl" ],
    ["rbp", "ebp",  "bp",   "bpl" ],
    ["rsi", "esi",  "si",   "sil" ],
    ["rdi", "edi",  "di",   "dil" ],
    ["r8",  "r8d",  "r8w",  "r8b" ],
    ["r9",  "r9d",  "r9w",  "r9b" ],
    ["r10", "r10d", "r10w", "r10b"],
    ["r11", "r11d", "r11w", "r11b"],
    ["r12", "r12d", "r12w", "r12b"],
    ["r13", "r13d", "r13w", "r13b"],
    ["r14", "r14d", "r14w", "r14b"],
    ["r15", "r15d", "r15w", "r15b"],
];
const HIGH_NAMES: [&str; 4] = ["ah", "ch", "dh", "bh"];

impl Reg {
    pub const fn new(gpr: Gpr, width: RegWidth) -> Self {
        Self { gpr, width }
    }

    /// The full 64-bit register.
    pub const fn q(gpr: Gpr) -> Self { Self::new(gpr, RegWidth::Qword) }
    pub const fn d(gpr: Gpr) -> Self { Self::new(gpr, RegWidth::Dword) }
    pub const fn b(gpr: Gpr) -> Self { Self::new(gpr, RegWidth::Byte) }

    pub fn name(&self) -> &'static str {
        let idx = self.gpr.as_usize();
        match self.width {
            RegWidth::Qword => NAMES[idx][0],
            RegWidth::Dword => NAMES[idx][1],
            RegWidth::Word => NAMES[idx][2],
            RegWidth::Byte => NAMES[idx][3],
            // only rax..rbx have a high byte
            RegWidth::HighByte => HIGH_NAMES[idx & 0b11],
        }
    }

    /// Shift and mask used to extract this register from its 64-bit parent.
    pub fn field(&self) -> (u32, u64) {
        match self.width {
            RegWidth::Qword => (0, u64::MAX),
            RegWidth::Dword => (0, 0xffff_ffff),
            RegWidth::Word => (0, 0xffff),
            RegWidth::Byte => (0, 0xff),
            RegWidth::HighByte => (8, 0xff),
        }
    }
}

impl FromStr for Reg {
    type Err = ReferenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if let Some(idx) = HIGH_NAMES.iter().position(|n| *n == name) {
            return Ok(Self::new(Gpr::from(idx as u8), RegWidth::HighByte));
        }
        for (idx, names) in NAMES.iter().enumerate() {
            if let Some(w) = names.iter().position(|n| *n == name) {
                let width = match w {
                    0 => RegWidth::Qword,
                    1 => RegWidth::Dword,
                    2 => RegWidth::Word,
                    _ => RegWidth::Byte,
                };
                return Ok(Self::new(Gpr::from(idx as u8), width));
            }
        }
        Err(ReferenceError::UnknownRegister(s.trim().to_string()))
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Gpr> for Reg {
    fn from(gpr: Gpr) -> Self { Self::q(gpr) }
}

/// Only accepts the 64-bit register names.
impl FromStr for Gpr {
    type Err = ReferenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Reg>()? {
            Reg { gpr, width: RegWidth::Qword } => Ok(gpr),
            _ => Err(ReferenceError::UnknownRegister(s.trim().to_string())),
        }
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Reg::q(*self).name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("rax".parse::<Reg>().unwrap(), Reg::q(Gpr::Rax));
        assert_eq!("R10D".parse::<Reg>().unwrap(), Reg::d(Gpr::R10));
        assert_eq!("ah".parse::<Reg>().unwrap(),
            Reg::new(Gpr::Rax, RegWidth::HighByte));
        assert_eq!("r15b".parse::<Reg>().unwrap(), Reg::b(Gpr::R15));
        assert!("xmm0".parse::<Reg>().is_err());
        assert!("eax".parse::<Gpr>().is_err());
        assert_eq!("r9".parse::<Gpr>().unwrap(), Gpr::R9);
    }

    #[test]
    fn names_roundtrip() {
        for gpr in Gpr::ALL {
            for width in [RegWidth::Qword, RegWidth::Dword, RegWidth::Word, RegWidth::Byte] {
                let reg = Reg::new(gpr, width);
                assert_eq!(reg.name().parse::<Reg>().unwrap(), reg);
            }
        }
    }
}
