use thiserror::Error;

#[derive(Error, Debug)]
pub enum TermDictError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data corruption (segment={segment}, field={field}, fp={fp}): {reason}")]
    Corruption {
        segment: String,
        field: String,
        fp: u64,
        reason: String,
    },

    #[error("Invariant violation (segment={segment}, field={field}): {detail}")]
    InvariantViolation {
        segment: String,
        field: String,
        detail: String,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Terms index error: {0}")]
    Index(#[from] fst::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Postings error: {0}")]
    Postings(String),
}

impl TermDictError {
    /// True for the failures that mean the field's dictionary must not be used further.
    pub fn is_fatal_for_field(&self) -> bool {
        matches!(
            self,
            TermDictError::Corruption { .. }
                | TermDictError::InvariantViolation { .. }
                | TermDictError::IllegalState(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TermDictError>;
