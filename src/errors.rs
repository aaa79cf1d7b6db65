use crate::Version;
use std::{error, fmt, io};

/// Internal per-connection error classification.
///
/// Kinds with a wire representation answer the client with a canned
/// close-response; the rest (timeouts, I/O failures, shutdown) close the
/// socket silently.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    Malformed(MalformedKind),
    BodyTooLarge,
    ClientTimeout,
    Shutdown,
    ServiceUnavailable,
    Io(IoError),
}

/// Reason a preamble was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    RequestLine,
    Method,
    Target,
    Version,
    Header,
    ContentLength,
    TransferEncoding,
    PreambleTooLarge,
}

macro_rules! canned_response {
    ($version:expr, $status:expr) => {
        match $version {
            Version::Http11 => concat!(
                "HTTP/1.1 ",
                $status,
                "\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
            )
            .as_bytes(),
            Version::Http10 => concat!(
                "HTTP/1.0 ",
                $status,
                "\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
            )
            .as_bytes(),
        }
    };
}

impl ErrorKind {
    /// Canned close-response for errors that still get an HTTP answer.
    ///
    /// Returns `None` for kinds that must close the socket without writing
    /// anything (client timeout, I/O failure, shutdown).
    pub(crate) const fn wire_response(&self, version: Version) -> Option<&'static [u8]> {
        match self {
            Self::Malformed(MalformedKind::PreambleTooLarge) => {
                Some(canned_response!(version, "431 Request Header Fields Too Large"))
            }
            Self::Malformed(_) => Some(canned_response!(version, "400 Bad Request")),
            Self::BodyTooLarge => Some(canned_response!(version, "413 Payload Too Large")),
            Self::ServiceUnavailable => {
                Some(canned_response!(version, "503 Service Unavailable"))
            }
            Self::ClientTimeout | Self::Shutdown | Self::Io(_) => None,
        }
    }
}

/// Canned `500` for handler failures when nothing has been flushed yet.
pub(crate) const fn handler_error_response(version: Version) -> &'static [u8] {
    canned_response!(version, "500 Internal Server Error")
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            ErrorKind::ClientTimeout
        } else {
            ErrorKind::Io(IoError(err))
        }
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        IoError(err)
    }
}

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
