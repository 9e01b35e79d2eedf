use std::path::PathBuf;

use thiserror::Error;

use crate::field::FieldType;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot parse '{input}' as {field}: {reason}")]
    Parse {
        field: String,
        input: String,
        reason: String,
    },

    #[error("no field matches '{0}'")]
    NoSuchField(String),

    #[error("field name '{name}' is ambiguous; it matches {candidates}")]
    AmbiguousName { name: String, candidates: String },

    #[error("incorrect get/set called for field {0}")]
    TypeMismatch(FieldType),

    #[error("field {0} cannot be used in this position (key vs counter)")]
    FieldRole(FieldType),

    #[error("set of {0} fields do not match")]
    FieldListMismatch(&'static str),

    #[error("do not have any {0} fields; at least one is required")]
    EmptyFieldList(&'static str),

    #[error("field {0} is not present")]
    MissingField(FieldType),

    #[error("value {value} does not fit in the {width}-octet field {field}")]
    ValueTooLarge {
        field: FieldType,
        value: u64,
        width: u8,
    },

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("prefix {prefix} is not valid; expected 1..={max}")]
    InvalidPrefix { prefix: u8, max: u8 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IPset holds IPv4 addresses only; cannot hold {0}")]
    Ipv6NotAllowed(String),

    #[error("line {line} is longer than {max} characters")]
    LineTooLong { line: usize, max: usize },

    #[error("malformed input: {0}")]
    Format(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Stream(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub(crate) fn parse(field: impl ToString, input: &str, reason: impl ToString) -> Self {
        EngineError::Parse {
            field: field.to_string(),
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Attach a path to a bare stream error.
    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            EngineError::Stream(source) => EngineError::Io {
                path: path.into(),
                source,
            },
            other => other,
        }
    }
}
