use thiserror::Error;

/// Failures detected while loading an instruction stream, before any
/// instruction runs. Loading is all-or-nothing.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The stream cannot be decoded into whole instructions.
    #[error("malformed stream at {address:04}: {reason}")]
    MalformedStream { address: usize, reason: String },

    /// The same label id is defined twice.
    #[error("duplicate label {label}: defined at {first:04} and again at {second:04}")]
    DuplicateLabel {
        label: i64,
        first: usize,
        second: usize,
    },

    /// An instruction refers to a label id that is never defined.
    #[error("unresolved label {label} referenced at {address:04}")]
    UnresolvedLabel { label: i64, address: usize },

    /// The binary encoding could not be decoded.
    #[error("cannot decode bytecode: {0}")]
    Decode(#[from] postcard::Error),
}

impl LoadError {
    pub fn malformed(address: usize, reason: impl Into<String>) -> Self {
        LoadError::MalformedStream {
            address,
            reason: reason.into(),
        }
    }

    /// Stream address the error points at, if any.
    pub fn address(&self) -> Option<usize> {
        match self {
            LoadError::MalformedStream { address, .. } => Some(*address),
            LoadError::DuplicateLabel { second, .. } => Some(*second),
            LoadError::UnresolvedLabel { address, .. } => Some(*address),
            LoadError::Decode(_) => None,
        }
    }
}
