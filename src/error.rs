use std::io;
use std::sync::PoisonError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Key, document id or collection absent.
    NotFound,
    /// A caller-supplied destination cannot hold the result.
    BufferTooSmall,
    AlreadyExists(String),
    InvalidArgument(String),
    /// Backing medium failure.
    IoError(io::Error),
    Unsupported(String),
    Corruption(String),
    Decode(&'static str, io::Error),
    MutexPoisoned,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::MutexPoisoned
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidArgument(format!("invalid configuration: {}", err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Corruption(format!("bad metadata encoding: {}", err))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "Not found"),
            Error::BufferTooSmall => write!(f, "Buffer too small"),
            Error::AlreadyExists(what) => write!(f, "Already exists: {}", what),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Unsupported(what) => write!(f, "Unsupported operation: {}", what),
            Error::Corruption(msg) => write!(f, "Corruption: {}", msg),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::MutexPoisoned => write!(f, "Mutex was poisoned"),
        }
    }
}

impl std::error::Error for Error {}
