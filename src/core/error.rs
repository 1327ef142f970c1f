//! Error type shared by every layer of the tunnel.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// Extension of the standard library's `Result` type,
/// used to wrap its error in an [`Error`].
pub trait ResultWrappedExt {
    type T;

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
    fn wrapped(self, kind: ErrorKind) -> Result<Self::T>;
}

/// Extension of the standard library's `Result` type, for errors that
/// don't implement `Send`, or whose underlying cause we don't care to keep.
pub trait ResultSimpleExt {
    type T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T>;
    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
}

impl<T, E> ResultWrappedExt for result::Result<T, E>
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    type T = T;

    fn wrapped(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, e))
    }

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, format!("{}: {}", msg, e.into())))
    }
}

impl<T, E> ResultSimpleExt for result::Result<T, E> {
    type T = T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|_| Error::simple(kind))
    }

    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|_| Error::wrapped(kind, msg.to_owned()))
    }
}

/// Wrapper result type used throughout the crate.
pub type Result<T> = result::Result<T, Error>;

/// The error type used throughout this crate.
pub struct Error {
    inner: ErrorInner,
}

enum ErrorInner {
    Simple(ErrorKind),
    Wrapped(ErrorKind, Box<dyn error::Error + Send + Sync>),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(f, "Error::Simple({:?})", k),
            ErrorInner::Wrapped(k, e) => write!(f, "Error::Wrapped({:?}, {})", k, e),
        }
    }
}

impl Error {
    /// Returns an error not wrapping another error implementation,
    /// with kind `ErrorKind`.
    pub fn simple(kind: ErrorKind) -> Self {
        Error {
            inner: ErrorInner::Simple(kind),
        }
    }

    /// Wraps an arbitrary error in an `Error`, with kind `ErrorKind`.
    pub fn wrapped<E>(kind: ErrorKind, e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            inner: ErrorInner::Wrapped(kind, e.into()),
        }
    }

    /// Returns a copy of the `ErrorKind` of this `Error`.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Simple(k) => *k,
            ErrorInner::Wrapped(k, _) => *k,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(f, "{:?}", k),
            ErrorInner::Wrapped(k, e) => write!(f, "{:?}: {}", k, e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::wrapped(ErrorKind::Io, e)
    }
}

impl error::Error for Error {}

/// Discriminates the broad category of an [`Error`].
///
/// Matches the failure model of spec §7: a `Protocol` error always
/// terminates the tunnel, a `Fuzz` error only drops the offending frame,
/// a `Socks` error is surfaced to the user agent, and a `Network` error
/// is local to the channel that triggered it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed frame, bad magic, unknown mtype, handshake out of order
    /// or out of the acceptable timestamp window, empty/unknown fuzz chain.
    Protocol,
    /// A fuzz transform could not invert the bytes handed to it.
    Fuzz,
    /// Malformed or unsupported SOCKS5 request.
    Socks,
    /// Target connect refused, timed out, or the underlying socket failed.
    Network,
    /// Underlying I/O failure not otherwise categorized.
    Io,
    /// Configuration could not be loaded or parsed.
    Config,
}
