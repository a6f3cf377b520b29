//! Error types for catalog loading and transform synthesis.
//!
//! Every error here is static: the catalog and the synthesizer configuration
//! are fixed inputs, so nothing is ever retried.

use std::path::PathBuf;
use thiserror::Error;

use crate::asm::Gpr;

/// Failure to resolve a symbolic catalog token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("operand index {index} out of bounds for {count} operand(s)")]
    OperandIndex { index: usize, count: usize },

    #[error("source index {index} out of bounds for {count} other source(s)")]
    SourceIndex { index: usize, count: usize },

    #[error("unknown register '{0}'")]
    UnknownRegister(String),

    #[error("'{0}' is not a register")]
    NotARegister(String),

    #[error("malformed token '{0}'")]
    MalformedToken(String),
}

/// Errors surfaced while loading cases or synthesizing a transform.
#[derive(Debug, Error)]
pub enum CsError {
    #[error("{mnemonic} (row {row}): catalog declares {expected} operand(s), \
             but the instruction has {found}")]
    ArityMismatch {
        mnemonic: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("{mnemonic} (row {row}): {source}")]
    Reference {
        mnemonic: String,
        row: usize,
        #[source]
        source: ReferenceError,
    },

    #[error("{mnemonic} (row {row}): malformed '{column}': {reason}")]
    MalformedRow {
        mnemonic: String,
        row: usize,
        column: &'static str,
        reason: String,
    },

    #[error("{mnemonic} (rows {first} and {second}): two cases trigger on \
             '{operand}' == {value}")]
    DuplicateCase {
        mnemonic: String,
        first: usize,
        second: usize,
        operand: String,
        value: i64,
    },

    #[error("{mnemonic}: cannot synthesize a transform without cases")]
    EmptyCaseList { mnemonic: String },

    #[error("{mnemonic} (row {row}): {required} live source(s) need scratch \
             registers, but only {available} are available")]
    ScratchExhausted {
        mnemonic: String,
        row: usize,
        required: usize,
        available: usize,
    },

    #[error("{mnemonic} (row {row}): {gpr} is reserved by the synthesizer")]
    RegisterConflict {
        mnemonic: String,
        row: usize,
        gpr: Gpr,
    },

    #[error("invalid synthesizer configuration: {0}")]
    InvalidConfig(String),

    #[error("no encoding for target instruction {mnemonic} with operands [{operands}]")]
    UnsupportedTarget { mnemonic: String, operands: String },

    #[error("failed to assemble transform: {0}")]
    Assemble(String),

    #[error("machine fault: {0}")]
    Machine(String),

    #[error("failed to read case catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Result type alias for catalog and synthesis operations
pub type CsResult<T> = Result<T, CsError>;
