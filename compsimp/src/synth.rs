//! Synthesis of branch-free cmov transforms.
//!
//! For each case, the transform saves the instruction's sources to scratch
//! registers, compares the case's operand against the dangerous value, and
//! (with a conditional move) replaces the operand with a safe value before
//! the instruction runs. Afterwards, destinations are conditionally moved to
//! the architecturally-correct result and the saved sources are restored.
//! No operation in the output branches on data.

pub mod config;
pub mod plan;

pub use config::*;
pub use plan::*;

use std::fmt;

use log::debug;

use crate::asm::{ Emitter, X64VecAssembler };
use crate::case::{ CompSimpCase, Operand };
use crate::catalog::CaseCatalog;
use crate::error::{ CsError, CsResult };
use crate::histogram::InsnHistogram;
use crate::op::{ CsOp, OpKind };

/// An emitted transform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transform {
    mnemonic: String,
    operands: Vec<Operand>,
    ops: Vec<CsOp>,
}

impl Transform {
    pub(crate) fn new(mnemonic: String, operands: Vec<Operand>, ops: Vec<CsOp>)
        -> Self
    {
        Self { mnemonic, operands, ops }
    }

    pub fn mnemonic(&self) -> &str { &self.mnemonic }
    pub fn operands(&self) -> &[Operand] { &self.operands }
    pub fn ops(&self) -> &[CsOp] { &self.ops }
    pub fn len(&self) -> usize { self.ops.len() }
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }

    /// The original instruction, as it appears in the transform.
    pub fn target(&self) -> CsOp {
        CsOp::Target {
            mnemonic: self.mnemonic.clone(),
            operands: self.operands.clone(),
        }
    }

    fn count(&self, kinds: &[OpKind]) -> usize {
        self.ops.iter().filter(|op| kinds.contains(&op.kind())).count()
    }

    /// Number of stack pushes (including PUSHFQ).
    pub fn push_count(&self) -> usize {
        self.count(&[OpKind::Push, OpKind::PushFlags])
    }

    /// Number of stack pops (including POPFQ).
    pub fn pop_count(&self) -> usize {
        self.count(&[OpKind::Pop, OpKind::PopFlags])
    }

    /// Histogram of machine mnemonics, including the original instruction.
    pub fn histogram(&self) -> InsnHistogram {
        let mut res = InsnHistogram::new();
        for op in self.ops.iter() {
            res.add(&op.machine_mnemonic(), 1);
        }
        res
    }

    pub fn emit<E: Emitter>(&self, f: &mut E) -> CsResult<()> {
        for op in self.ops.iter() {
            op.emit(f)?;
        }
        Ok(())
    }

    /// Assemble into x86-64 machine code.
    pub fn assemble(&self) -> CsResult<Vec<u8>> {
        let mut f = X64VecAssembler::new(0);
        self.emit(&mut f)?;
        f.finalize().map_err(|e| CsError::Assemble(format!("{:?}", e)))
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in self.ops.iter() {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}

/// Synthesize a transform with the default [SynthConfig].
pub fn synthesize(mnemonic: &str, operands: &[Operand], cases: &[CompSimpCase])
    -> CsResult<Transform>
{
    synthesize_with(&SynthConfig::default(), mnemonic, operands, cases)
}

pub fn synthesize_with(cfg: &SynthConfig, mnemonic: &str, operands: &[Operand],
    cases: &[CompSimpCase]) -> CsResult<Transform>
{
    Ok(TransformPlan::new(cfg, mnemonic, operands, cases)?.emit())
}

/// Entry point for callers: looks up the cases for an instruction and
/// synthesizes a transform for them.
///
/// The catalog is read-only after construction, so a [Synthesizer] can be
/// shared between threads.
#[derive(Clone, Debug)]
pub struct Synthesizer {
    catalog: CaseCatalog,
    cfg: SynthConfig,
}

impl Synthesizer {
    pub fn new(catalog: CaseCatalog, cfg: SynthConfig) -> CsResult<Self> {
        cfg.validate()?;
        Ok(Self { catalog, cfg })
    }

    pub fn catalog(&self) -> &CaseCatalog { &self.catalog }
    pub fn config(&self) -> &SynthConfig { &self.cfg }

    /// Plan a transform without emitting it.
    /// Returns [None] when no case is cataloged for `mnemonic`.
    pub fn plan(&self, mnemonic: &str, operands: &[Operand])
        -> CsResult<Option<TransformPlan>>
    {
        let cases = self.catalog.load(mnemonic, operands)?;
        if cases.is_empty() {
            debug!("{}: no cases, leaving instruction unmodified", mnemonic);
            return Ok(None);
        }
        TransformPlan::new(&self.cfg, mnemonic, operands, &cases).map(Some)
    }

    /// Synthesize a transform.
    /// Returns [None] when no case is cataloged for `mnemonic`.
    pub fn transform(&self, mnemonic: &str, operands: &[Operand])
        -> CsResult<Option<Transform>>
    {
        Ok(self.plan(mnemonic, operands)?.map(|plan| plan.emit()))
    }
}
