use thiserror::Error;

/// Why execution stopped.
///
/// Every kind is fatal: the engine halts on the first one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("stack underflow: needed {needed} value(s), {available} available")]
    StackUnderflow { needed: usize, available: usize },

    #[error("scope underflow: cannot pop the root scope")]
    ScopeUnderflow,

    #[error("frame underflow: no saved frame to restore")]
    FrameUnderflow,

    #[error("frame mismatch: expected a {expected} frame")]
    FrameMismatch { expected: &'static str },

    #[error("unbound name '{0}'")]
    UnboundName(String),

    #[error("unresolved label {0}")]
    UnresolvedLabel(i64),

    #[error("cannot bind '{0}' in the built-in scope")]
    FrozenScope(String),

    #[error("value of type {0} is not callable")]
    NotCallable(&'static str),

    #[error("invalid list count: {0}")]
    InvalidCount(String),

    #[error("address {0:04} is not the start of an instruction")]
    InvalidTarget(usize),

    #[error("builtin '{name}' failed: {message}")]
    Builtin { name: String, message: String },

    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(usize),

    #[error("stack size limit exceeded ({0})")]
    StackLimitExceeded(usize),

    #[error("call depth limit exceeded ({0}) - possible infinite recursion")]
    CallDepthExceeded(usize),

    #[error("saved frame limit exceeded ({0})")]
    FrameLimitExceeded(usize),
}

impl ErrorKind {
    /// Failure raised from inside a host built-in.
    pub fn builtin(name: &str, message: impl Into<String>) -> Self {
        ErrorKind::Builtin {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// A fatal execution error, tagged with the program counter of the
/// instruction that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub pc: usize,
    pub kind: ErrorKind,
    /// Return addresses of the active routine calls, innermost last.
    pub call_stack: Vec<usize>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error at {:04}: {}", self.pc, self.kind)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, ret) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: returns to {:04}", i, ret)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl RuntimeError {
    pub fn new(pc: usize, kind: ErrorKind) -> Self {
        RuntimeError {
            pc,
            kind,
            call_stack: Vec::new(),
        }
    }

    pub fn with_call_stack(mut self, call_stack: Vec<usize>) -> Self {
        self.call_stack = call_stack;
        self
    }
}
