// Crate-wide error taxonomy.
//
// Every chain operation returns the first error it meets. Nothing is
// retried; `errno()` gives the value a filesystem surface reports.

use std::io;

use crate::vcdiff::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Seek, read, write or stat failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed or unsupported delta stream.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Conflicting or out-of-range options.
    #[error("configuration error: {0}")]
    Config(String),
    /// An operation that would break the one-level chain shape.
    #[error("consistency error: {0}")]
    Consistency(String),
    /// The chain directory could not be read or written.
    #[error("directory error: {0}")]
    Directory(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Positive errno for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Io(e) => e.raw_os_error().unwrap_or(libc_codes::EIO),
            Self::Codec(_) | Self::Directory(_) => libc_codes::EIO,
            Self::Config(_) => libc_codes::EINVAL,
            Self::Consistency(_) => libc_codes::EPERM,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Directory(e.to_string())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(e: tempfile::PersistError) -> Self {
        Self::Io(e.error)
    }
}

#[cfg(unix)]
mod libc_codes {
    pub const EIO: i32 = libc::EIO;
    pub const EINVAL: i32 = libc::EINVAL;
    pub const EPERM: i32 = libc::EPERM;
}

#[cfg(not(unix))]
mod libc_codes {
    pub const EIO: i32 = 5;
    pub const EINVAL: i32 = 22;
    pub const EPERM: i32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        let io = Error::from(io::Error::from_raw_os_error(2));
        assert_eq!(io.errno(), 2);
        let other = Error::from(io::Error::other("boom"));
        assert_eq!(other.errno(), libc_codes::EIO);
        assert_eq!(Error::Codec(CodecError::Truncated).errno(), libc_codes::EIO);
        assert_eq!(Error::Config("x".into()).errno(), libc_codes::EINVAL);
        assert_eq!(Error::Consistency("x".into()).errno(), libc_codes::EPERM);
    }

    #[test]
    fn messages_carry_context() {
        let e = Error::Consistency("a.txt already has a parent".into());
        assert_eq!(e.to_string(), "consistency error: a.txt already has a parent");
        let e = Error::from(CodecError::Truncated);
        assert_eq!(e.to_string(), "codec error: delta stream truncated");
    }
}
