//! Synthesizer configuration.

use itertools::Itertools;

use crate::asm::Gpr;
use crate::case::ScratchSlot;
use crate::error::{ CsError, CsResult };

/// The registers used to save sources at each level of a transform.
///
/// Slots are handed out by index (see [ScratchSlot]). Every level of a
/// transform reuses the same slots: the outer level's contents are kept on
/// the stack while an inner level runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScratchPool(Vec<Gpr>);

impl ScratchPool {
    pub fn new(regs: impl Into<Vec<Gpr>>) -> Self {
        Self(regs.into())
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn get(&self, slot: ScratchSlot) -> Option<Gpr> {
        self.0.get(slot.0).copied()
    }

    pub fn regs(&self) -> &[Gpr] {
        &self.0
    }

    pub fn contains(&self, gpr: Gpr) -> bool {
        self.0.contains(&gpr)
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new([Gpr::R12, Gpr::R13, Gpr::R14, Gpr::R15])
    }
}

/// Configuration passed to [TransformPlan::new](crate::synth::TransformPlan::new).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthConfig {
    /// Registers used to save the sources of each case
    pub scratch: ScratchPool,

    /// Holds the result of the trigger comparison at each level
    pub flag_reg: Gpr,

    /// Throwaway register for immediate loads
    pub temp_reg: Gpr,

    /// Optionally restore the flags produced by the original instruction
    /// (through this register) after the corrections.
    pub preserve_flags: Option<Gpr>,
}

impl SynthConfig {
    pub fn new() -> Self {
        Self {
            scratch: ScratchPool::default(),
            flag_reg: Gpr::R10,
            temp_reg: Gpr::R11,
            preserve_flags: None,
        }
    }
}

impl Default for SynthConfig {
    fn default() -> Self { Self::new() }
}

impl SynthConfig {
    pub fn scratch(mut self, regs: impl Into<Vec<Gpr>>) -> Self {
        self.scratch = ScratchPool::new(regs);
        self
    }

    pub fn flag_reg(mut self, x: Gpr) -> Self {
        self.flag_reg = x;
        self
    }

    pub fn temp_reg(mut self, x: Gpr) -> Self {
        self.temp_reg = x;
        self
    }

    pub fn preserve_flags(mut self, x: Option<Gpr>) -> Self {
        self.preserve_flags = x;
        self
    }
}

impl SynthConfig {
    /// Every register owned by the synthesizer.
    pub fn reserved(&self) -> Vec<Gpr> {
        let mut res = self.scratch.regs().to_vec();
        res.push(self.flag_reg);
        res.push(self.temp_reg);
        res.extend(self.preserve_flags);
        res
    }

    pub fn is_reserved(&self, gpr: Gpr) -> bool {
        self.scratch.contains(gpr)
            || gpr == self.flag_reg
            || gpr == self.temp_reg
            || self.preserve_flags == Some(gpr)
    }

    pub fn validate(&self) -> CsResult<()> {
        let reserved = self.reserved();
        if let Some(dup) = reserved.iter().duplicates().next() {
            return Err(CsError::InvalidConfig(format!(
                "{} is reserved more than once", dup
            )));
        }
        if reserved.contains(&Gpr::Rsp) {
            return Err(CsError::InvalidConfig(
                "rsp cannot be reserved".to_string()
            ));
        }
        if !self.flag_reg.has_plain_low_byte() {
            return Err(CsError::InvalidConfig(format!(
                "flag register {} has no plain low byte", self.flag_reg
            )));
        }
        Ok(())
    }
}
