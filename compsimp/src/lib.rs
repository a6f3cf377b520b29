
pub mod asm;
pub mod case;
pub mod catalog;
pub mod error;
pub mod histogram;
pub mod op;
pub mod reference;
pub mod synth;
pub mod target;
pub mod vm;

pub use rand::Rng;
pub use rand::prelude::*;

pub use dynasmrt::{
    dynasm,
    DynasmApi,
    DynasmLabelApi,
    Assembler,
    AssemblyOffset,
    ExecutableBuffer,
    VecAssembler,
    x64::X64Relocation,
};

pub use crate::asm::*;
pub use crate::case::*;
pub use crate::catalog::CaseCatalog;
pub use crate::error::*;
pub use crate::histogram::InsnHistogram;
pub use crate::op::{ CsOp, OpKind };
pub use crate::reference::RefToken;
pub use crate::synth::*;
pub use crate::target::{ TargetInsn, TargetOp, TargetForm };
pub use crate::vm::{ Machine, Flags, Divergence };
