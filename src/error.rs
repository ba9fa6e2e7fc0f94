use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// The entropy source is missing, inaccessible or unsupported.
    DeviceUnavailable(String),
    /// The entropy source failed mid-read (I/O error, EOF, timeout, stuck).
    DeviceReadFailure(String),
    /// A range request with `lower > upper`.
    InvalidRange { lower: i32, upper: i32 },
    /// An asynchronous request was dropped before it could run.
    Abandoned,
    InvalidArgs(String),
    Io(io::Error),
}

impl Error {
    /// True for errors a higher layer may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::DeviceReadFailure(_) | Error::Abandoned)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceUnavailable(msg) => write!(f, "entropy device unavailable: {}", msg),
            Error::DeviceReadFailure(msg) => write!(f, "entropy device read failed: {}", msg),
            Error::InvalidRange { lower, upper } => write!(
                f,
                "invalid range: lower bound {} is greater than upper bound {}",
                lower, upper
            ),
            Error::Abandoned => write!(f, "request abandoned before completion"),
            Error::InvalidArgs(msg) => write!(f, "invalid arguments: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
