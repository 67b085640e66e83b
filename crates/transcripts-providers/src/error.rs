use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a provider contributed zero sessions to a refresh.
///
/// Per the error-handling taxonomy: the core never propagates a
/// provider's failure to its caller, but the failure is still
/// observable for telemetry.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Store(rusqlite::Error),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::Store(err) => write!(f, "store error: {err}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Store(err) => Some(err),
            Error::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err)
    }
}
