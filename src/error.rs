// Papyrus VM Error Handling Module
// Errors that abort a single call. Nothing here crosses `start_function`:
// the interpreter boundary only ever hands back a Value.

use crate::bytecode::OpCode;
use thiserror::Error;

/// Failure reported by a property storage backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Recoverable lookup fault, the caller logs it and falls back to None
    #[error("variable lookup failed: {0}")]
    Lookup(String),

    /// Storage is in a state the interpreter cannot reason about
    #[error("variable storage is corrupted: {0}")]
    Internal(String),
}

/// Main error type for the interpreter
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VmError {
    #[error("array index {index} is out of range (length {len})")]
    IndexOutOfRange { index: i32, len: usize },

    #[error("stack overflow in script {script} (depth {depth})")]
    StackOverflow { script: String, depth: usize },

    #[error("opcode quota of {quota} exceeded in script {script}")]
    QuotaExceeded { script: String, quota: usize },

    #[error("malformed {op:?} instruction: {reason}")]
    MalformedInstruction { op: OpCode, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl VmError {
    pub fn malformed(op: OpCode, reason: impl Into<String>) -> Self {
        VmError::MalformedInstruction {
            op,
            reason: reason.into(),
        }
    }

    /// Errors that only skip the offending opcode instead of aborting the call
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VmError::MalformedInstruction { .. })
    }
}

/// Result type for interpreter operations
pub type VmResult<T> = Result<T, VmError>;
