use thiserror::Error as ThisError;

/// The taxonomy from the spec's error handling design: `Parse` and
/// `NotSupported` are surfaced to callers, `DataMisaligned` is fatal and
/// aborts the active session, `Io` is retried once by the caller if
/// transient, and `ConflictingWrite` fails a session open immediately.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported: {0}")]
    NotSupported(String),

    #[error("data misaligned: {0}")]
    DataMisaligned(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("conflicting write: another writer holds the collection lock")]
    ConflictingWrite,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
