//! Defines all KeyServer errors.

use std::path::PathBuf;
use std::{error, fmt, io};

use openssl::error::ErrorStack;


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    /// An I/O error without further context.
    IoError(io::Error),

    /// A key or certificate file could not be read or written.
    FileError(PathBuf, io::Error),

    /// An error reported by OpenSSL.
    OpenSslError(ErrorStack),

    /// A distinguished name could not be parsed or applied.
    InvalidName(String),

    /// A PEM file did not contain what we expected.
    PemError(String),

    /// The issuance backend refused or failed to issue.
    IssuanceError(String),

    /// An issuance task panicked.
    WorkerPanic(String),

    /// A response did not have the expected shape.
    InvalidPayload(String),
}

impl Error {
    pub fn file(path: impl Into<PathBuf>, err: io::Error) -> Self {
        Error::FileError(path.into(), err)
    }

    pub fn invalid_name(msg: impl fmt::Display) -> Self {
        Error::InvalidName(msg.to_string())
    }

    pub fn pem(msg: impl fmt::Display) -> Self {
        Error::PemError(msg.to_string())
    }

    pub fn issuance(msg: impl fmt::Display) -> Self {
        Error::IssuanceError(msg.to_string())
    }

    pub fn invalid_payload(msg: impl fmt::Display) -> Self {
        Error::InvalidPayload(msg.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(e) => e.fmt(f),
            Error::FileError(path, e) => {
                write!(f, "Cannot access '{}': {}", path.display(), e)
            }
            Error::OpenSslError(e) => write!(f, "OpenSsl Error: {}", e),
            Error::InvalidName(e) => write!(f, "Invalid name: {}", e),
            Error::PemError(e) => write!(f, "PEM error: {}", e),
            Error::IssuanceError(e) => write!(f, "Issuance failed: {}", e),
            Error::WorkerPanic(e) => write!(f, "Issuance task panicked: {}", e),
            Error::InvalidPayload(e) => write!(f, "Invalid payload: {}", e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::FileError(_, e) => Some(e),
            Error::OpenSslError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<ErrorStack> for Error {
    fn from(e: ErrorStack) -> Self {
        Error::OpenSslError(e)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_error_names_path() {
        let err = Error::file(
            "/nonexistent/ca.key",
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/nonexistent/ca.key"), "{}", msg);
        assert!(error::Error::source(&err).is_some());
    }
}
