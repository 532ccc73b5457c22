//! Error types shared by the compiler and the virtual machine.

use strum::Display;
use thiserror::Error;

/// Category of a runtime error, matching the error objects of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    #[strum(serialize = "GenericError")]
    Generic,
    #[strum(serialize = "OutOfMemoryError")]
    OutOfMemory,
    #[strum(serialize = "DivisionByZeroError")]
    DivisionByZero,
    #[strum(serialize = "TypeMismatchError")]
    TypeMismatch,
    #[strum(serialize = "NotImplementedError")]
    NotImplemented,
}

/// Error raised while executing bytecode.
///
/// `StackUnderflow` and `InvalidOpcode` indicate malformed bytecode and map
/// to their own process exit codes; `Runtime` covers everything a correct
/// program can still trigger (bad operand types, division by zero, I/O).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("invalid opcode byte: {0}")]
    InvalidOpcode(u8),
    #[error("{kind}: {message}")]
    Runtime { kind: ErrorKind, message: String },
}

impl RunError {
    pub fn runtime(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Runtime {
            kind,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::Generic, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::TypeMismatch, message)
    }

    /// The runtime error category, if this is a `Runtime` error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Runtime { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::StackUnderflow => ExitCode::StackUnderflow,
            Self::InvalidOpcode(_) => ExitCode::InvalidOpcode,
            Self::Runtime { .. } => ExitCode::Error,
        }
    }
}

/// Result alias used throughout the VM.
pub type RunResult<T> = Result<T, RunError>;

/// Outcome of a whole run, surfaced to the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Ok = 0,
    Error = 1,
    StackUnderflow = 2,
    InvalidOpcode = 3,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

/// Error raised while lowering the AST to bytecode.
///
/// The analyser rejects ill-formed programs before lowering, so most of these
/// are capacity limits rather than user mistakes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("too many constants in one code object")]
    TooManyConstants,
    #[error("too many names in one scope")]
    TooManyNames,
    #[error("call with {0} arguments exceeds the limit of 255")]
    TooManyArguments(usize),
    #[error("jump distance exceeds 16-bit range")]
    JumpTooFar,
    #[error("'yeter' outside of a loop")]
    BreakOutsideLoop,
    #[error("'devam' outside of a loop")]
    ContinueOutsideLoop,
}
