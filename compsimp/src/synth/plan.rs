//! Planning and emission of a transform.
//!
//! Cases are composed as a fold over the ordered case list. Level `i`
//! contributes a prologue (save, detect, neutralize, and spill when another
//! level follows) and an epilogue (reload, correct, restore). The transform
//! is every prologue in order, the original instruction, then every epilogue
//! in reverse order:
//!
//! ```text
//! prologue[0]
//!   prologue[1]
//!     ...
//!       <original instruction>
//!     ...
//!   epilogue[1]
//! epilogue[0]
//! ```
//!
//! Every level is resolved to concrete registers when the plan is built, so
//! the shape of the output (and the number of each kind of operation) is
//! known before anything is emitted.

use std::collections::BTreeMap;
use std::iter;

use log::{ debug, trace };

use crate::asm::Gpr;
use crate::case::{ CompSimpCase, Operand, Solution };
use crate::error::{ CsError, CsResult, ReferenceError };
use crate::histogram::InsnHistogram;
use crate::op::{ CsOp, OpKind };
use crate::synth::{ SynthConfig, Transform };

/// The value moved into a destination when a case is active.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Fix {
    Imm(i64),
    Reg(Gpr),
}

/// One case, resolved against the scratch pool.
#[derive(Clone, Debug)]
struct Level {
    row: usize,
    /// (scratch register, source saved into it)
    saves: Vec<(Gpr, Operand)>,
    cs_operand: Gpr,
    cs_value: i64,
    cs_safe_value: i64,
    /// (destination, corrected value)
    corrections: Vec<(Gpr, Fix)>,
    /// (source register, scratch register it is restored from)
    restores: Vec<(Gpr, Gpr)>,
    /// Set for the last case, which runs the original instruction
    innermost: bool,
}

impl Level {
    fn imm_saves(&self) -> usize {
        self.saves.iter().filter(|(_, src)| src.gpr().is_none()).count()
    }

    fn imm_fixes(&self) -> usize {
        self.corrections.iter().filter(|(_, fix)| matches!(fix, Fix::Imm(_))).count()
    }
}

/// A validated transform for one instruction instance.
#[derive(Clone, Debug)]
pub struct TransformPlan {
    mnemonic: String,
    operands: Vec<Operand>,
    flag_reg: Gpr,
    temp_reg: Gpr,
    preserve_flags: Option<Gpr>,
    levels: Vec<Level>,
}

impl TransformPlan {
    /// Resolve `cases` against `cfg` for the instruction `mnemonic operands`.
    ///
    /// All static errors are raised here; [TransformPlan::emit] cannot fail.
    pub fn new(cfg: &SynthConfig, mnemonic: &str, operands: &[Operand],
        cases: &[CompSimpCase]) -> CsResult<Self>
    {
        cfg.validate()?;
        if cases.is_empty() {
            return Err(CsError::EmptyCaseList { mnemonic: mnemonic.to_string() });
        }

        let mut levels = Vec::with_capacity(cases.len());
        for (idx, case) in cases.iter().enumerate() {
            let level = Self::resolve_level(cfg, mnemonic, operands, case,
                idx + 1 == cases.len())?;
            trace!("{}: level {} (row {}) saves {} source(s), corrects {} dest(s)",
                mnemonic, idx, level.row, level.saves.len(), level.corrections.len());
            levels.push(level);
        }

        let res = Self {
            mnemonic: mnemonic.to_string(),
            operands: operands.to_vec(),
            flag_reg: cfg.flag_reg,
            temp_reg: cfg.temp_reg,
            preserve_flags: cfg.preserve_flags,
            levels,
        };
        debug!("{}: planned {} level(s), {} op(s), {} scratch register(s)",
            mnemonic, res.levels(), res.op_count(), res.max_scratch());
        Ok(res)
    }

    fn resolve_level(cfg: &SynthConfig, mnemonic: &str, operands: &[Operand],
        case: &CompSimpCase, innermost: bool) -> CsResult<Level>
    {
        let row = case.row;
        if case.operand_count != operands.len() {
            return Err(CsError::ArityMismatch {
                mnemonic: mnemonic.to_string(),
                row,
                expected: case.operand_count,
                found: operands.len(),
            });
        }
        if case.solutions.len() != case.destinations.len() {
            return Err(CsError::MalformedRow {
                mnemonic: mnemonic.to_string(),
                row,
                column: "cs_solutions",
                reason: format!("{} solution(s) for {} destination(s)",
                    case.solutions.len(), case.destinations.len()),
            });
        }

        let required = case.source_count();
        if required > cfg.scratch.len() {
            return Err(CsError::ScratchExhausted {
                mnemonic: mnemonic.to_string(),
                row,
                required,
                available: cfg.scratch.len(),
            });
        }

        // Nothing the case touches may alias a register we own
        let touched = operands.iter().filter_map(Operand::gpr)
            .chain(case.other_sources.iter().map(|r| r.gpr))
            .chain(case.destinations.iter().map(|r| r.gpr))
            .chain(iter::once(case.cs_operand.gpr))
            .chain(case.solutions.iter().filter_map(|s| match s {
                Solution::Reg(r) => Some(r.gpr),
                _ => None,
            }));
        for gpr in touched {
            if gpr == Gpr::Rsp || cfg.is_reserved(gpr) {
                return Err(CsError::RegisterConflict {
                    mnemonic: mnemonic.to_string(), row, gpr
                });
            }
        }

        let sources = case.sources(operands);
        let saves: Vec<(Gpr, Operand)> = cfg.scratch.regs().iter().copied()
            .zip(sources)
            .collect();

        let mut corrections = Vec::with_capacity(case.destinations.len());
        for (dst, sol) in case.destinations.iter().zip(case.solutions.iter()) {
            let fix = match sol {
                Solution::Imm(v) => Fix::Imm(*v),
                Solution::Reg(r) => Fix::Reg(r.gpr),
                Solution::Saved(slot) => match saves.get(slot.0) {
                    Some((scratch, _)) => Fix::Reg(*scratch),
                    None => return Err(CsError::Reference {
                        mnemonic: mnemonic.to_string(),
                        row,
                        source: ReferenceError::SourceIndex {
                            index: slot.0, count: saves.len()
                        },
                    }),
                },
            };
            corrections.push((dst.gpr, fix));
        }

        let restores = saves.iter()
            .filter_map(|(scratch, src)| src.gpr().map(|g| (g, *scratch)))
            .filter(|(src, _)| !case.writes(*src))
            .collect();

        Ok(Level {
            row,
            saves,
            cs_operand: case.cs_operand.gpr,
            cs_value: case.cs_value,
            cs_safe_value: case.cs_safe_value,
            corrections,
            restores,
            innermost,
        })
    }
}

impl TransformPlan {
    pub fn mnemonic(&self) -> &str { &self.mnemonic }
    pub fn operands(&self) -> &[Operand] { &self.operands }

    /// Number of composed cases.
    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    /// Number of nested spill/reload levels.
    pub fn nesting_depth(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    /// Largest number of scratch registers live at one level.
    pub fn max_scratch(&self) -> usize {
        self.levels.iter().map(|l| l.saves.len()).max().unwrap_or(0)
    }

    /// Number of operations of each kind in the emitted sequence.
    pub fn counts(&self) -> BTreeMap<OpKind, usize> {
        let mut res = BTreeMap::new();
        let mut add = |kind: OpKind, n: usize| {
            if n != 0 {
                *res.entry(kind).or_insert(0) += n;
            }
        };
        for level in self.levels.iter() {
            let imm_saves = level.imm_saves();
            add(OpKind::MovRR, level.saves.len() - imm_saves + level.restores.len());
            add(OpKind::MovImm64, imm_saves + 2 + level.imm_fixes());
            add(OpKind::MovImm32, 1);
            add(OpKind::Cmp64, 1);
            add(OpKind::SetZ, 1);
            add(OpKind::CmovZ, 1 + level.corrections.len());
            add(OpKind::CmpImm8, 1);
            if !level.innermost {
                add(OpKind::Push, 1 + level.saves.len());
                add(OpKind::Pop, 1 + level.saves.len());
            }
        }
        add(OpKind::Target, 1);
        if self.preserve_flags.is_some() {
            add(OpKind::PushFlags, 1);
            add(OpKind::Pop, 1);
            add(OpKind::Push, 1);
            add(OpKind::PopFlags, 1);
        }
        res
    }

    /// Total number of operations in the emitted sequence.
    pub fn op_count(&self) -> usize {
        self.counts().values().sum()
    }

    /// Instructions added by the transform, relative to the original
    /// instruction alone.
    pub fn expected_delta(&self) -> InsnHistogram {
        self.counts().into_iter()
            .filter_map(|(kind, n)| kind.machine_mnemonic().map(|m| (m, n as i64)))
            .collect()
    }
}

impl TransformPlan {
    fn emit_prologue(&self, level: &Level, ops: &mut Vec<CsOp>) {
        for (scratch, src) in level.saves.iter() {
            ops.push(match src {
                Operand::Reg(r) => CsOp::MovRR { dst: *scratch, src: r.gpr },
                Operand::Imm(v) => CsOp::MovImm64 { dst: *scratch, imm: *v },
            });
        }

        // flag = (cs_operand == cs_value)
        ops.push(CsOp::MovImm32 { dst: self.flag_reg, imm: 0 });
        ops.push(CsOp::MovImm64 { dst: self.temp_reg, imm: level.cs_value });
        ops.push(CsOp::Cmp64 { lhs: level.cs_operand, rhs: self.temp_reg });
        ops.push(CsOp::SetZ { dst: self.flag_reg });

        // ZF still holds the comparison
        ops.push(CsOp::MovImm64 { dst: self.temp_reg, imm: level.cs_safe_value });
        ops.push(CsOp::CmovZ { dst: level.cs_operand, src: self.temp_reg });

        if !level.innermost {
            ops.push(CsOp::Push(self.flag_reg));
            for (scratch, _) in level.saves.iter() {
                ops.push(CsOp::Push(*scratch));
            }
        }
    }

    fn emit_epilogue(&self, level: &Level, ops: &mut Vec<CsOp>) {
        if !level.innermost {
            for (scratch, _) in level.saves.iter().rev() {
                ops.push(CsOp::Pop(*scratch));
            }
            ops.push(CsOp::Pop(self.flag_reg));
        }

        ops.push(CsOp::CmpImm8 { lhs: self.flag_reg, imm: 1 });
        for (dst, fix) in level.corrections.iter() {
            match fix {
                Fix::Imm(v) => {
                    ops.push(CsOp::MovImm64 { dst: self.temp_reg, imm: *v });
                    ops.push(CsOp::CmovZ { dst: *dst, src: self.temp_reg });
                },
                Fix::Reg(src) => ops.push(CsOp::CmovZ { dst: *dst, src: *src }),
            }
        }

        for (src, scratch) in level.restores.iter() {
            ops.push(CsOp::MovRR { dst: *src, src: *scratch });
        }
    }

    /// Emit the transform.
    pub fn emit(&self) -> Transform {
        let mut ops = Vec::with_capacity(self.op_count());
        for level in self.levels.iter() {
            self.emit_prologue(level, &mut ops);
        }

        ops.push(CsOp::Target {
            mnemonic: self.mnemonic.clone(),
            operands: self.operands.clone(),
        });
        if let Some(reg) = self.preserve_flags {
            ops.push(CsOp::PushFlags);
            ops.push(CsOp::Pop(reg));
        }

        for level in self.levels.iter().rev() {
            self.emit_epilogue(level, &mut ops);
        }
        if let Some(reg) = self.preserve_flags {
            ops.push(CsOp::Push(reg));
            ops.push(CsOp::PopFlags);
        }

        Transform::new(self.mnemonic.clone(), self.operands.clone(), ops)
    }
}
