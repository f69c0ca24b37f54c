//! Error taxonomy for the translation core.
//!
//! Two layers: [`WireError`] carries the detail of what went wrong on the
//! control or data channel, and [`FtpfsError`] is the classification the
//! VFS boundary sees. The mapping to errno is deliberately coarse: every
//! command-executor failure folds into `Permission`, and anything
//! unclassified becomes `EIO`, matching the contract the filesystem layer
//! relies on.

use std::io;
use thiserror::Error;

/// Failures at the FTP wire level (control codec, data channels, TLS).
#[derive(Debug, Error)]
pub enum WireError {
    /// Establishing the control connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The server closed the control connection.
    #[error("server closed the control connection")]
    Disconnected,

    /// A reply that could not be parsed as an RFC 959 response.
    #[error("malformed reply: {0}")]
    Protocol(String),

    /// A well-formed reply with an unexpected code.
    #[error("server replied {code}: {text}")]
    Reply { code: u16, text: String },

    /// TLS negotiation or I/O failed.
    #[error("TLS: {0}")]
    Tls(String),

    /// Opening or using a data channel failed.
    #[error("data channel: {0}")]
    Data(String),

    /// A socket operation timed out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WireError {
    /// Whether the control connection is unusable after this error.
    ///
    /// A reply with a bad code leaves the session intact; everything else
    /// means the next operation must reconnect.
    pub fn poisons_connection(&self) -> bool {
        !matches!(self, WireError::Reply { .. })
    }
}

/// Errors surfaced by the core, classified for the VFS boundary.
#[derive(Debug, Error)]
pub enum FtpfsError {
    /// The path was not present in its parent listing.
    #[error("no such file or directory: {0}")]
    NoSuchFile(String),

    /// An open or open-probe failed, or an `O_EXCL` target exists.
    #[error("access denied: {0}")]
    Access(String),

    /// A server command failed. All command-executor failures are
    /// compressed into this kind.
    #[error("operation rejected by server")]
    Permission,

    /// The operation cannot be expressed over FTP.
    #[error("operation not supported")]
    NotSupported,

    /// A read failed after a restart, a write or upload failed, a write
    /// was non-sequential, or the flushed size did not match.
    #[error("remote I/O error: {0}")]
    Io(String),

    /// Buffer allocation failed while accepting write data.
    #[error("out of memory")]
    OutOfMemory,

    /// Wire-level failure that did not occur inside the command executor.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, FtpfsError>;

/// Conversion to a libc errno value, as a positive constant.
pub trait ToErrno {
    fn to_errno(&self) -> i32;
}

impl ToErrno for FtpfsError {
    fn to_errno(&self) -> i32 {
        match self {
            FtpfsError::NoSuchFile(_) => libc::ENOENT,
            FtpfsError::Access(_) => libc::EACCES,
            FtpfsError::Permission => libc::EPERM,
            FtpfsError::NotSupported => libc::ENOTSUP,
            FtpfsError::Io(_) => libc::EIO,
            FtpfsError::OutOfMemory => libc::ENOMEM,
            FtpfsError::Wire(_) => libc::EIO,
        }
    }
}

impl FtpfsError {
    /// Shorthand for an `Io` error from anything displayable.
    pub fn io(msg: impl std::fmt::Display) -> Self {
        FtpfsError::Io(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_is_stable() {
        assert_eq!(FtpfsError::NoSuchFile("/x".into()).to_errno(), libc::ENOENT);
        assert_eq!(FtpfsError::Access("probe".into()).to_errno(), libc::EACCES);
        assert_eq!(FtpfsError::Permission.to_errno(), libc::EPERM);
        assert_eq!(FtpfsError::NotSupported.to_errno(), libc::ENOTSUP);
        assert_eq!(FtpfsError::Io("short write".into()).to_errno(), libc::EIO);
        assert_eq!(FtpfsError::OutOfMemory.to_errno(), libc::ENOMEM);
    }

    #[test]
    fn wire_errors_fold_into_eio() {
        let e = FtpfsError::from(WireError::Disconnected);
        assert_eq!(e.to_errno(), libc::EIO);

        let e = FtpfsError::from(WireError::Reply {
            code: 550,
            text: "No such file".into(),
        });
        assert_eq!(e.to_errno(), libc::EIO);
    }

    #[test]
    fn reply_errors_do_not_poison_the_session() {
        let e = WireError::Reply {
            code: 550,
            text: "denied".into(),
        };
        assert!(!e.poisons_connection());
        assert!(WireError::Disconnected.poisons_connection());
        assert!(WireError::Timeout("RETR".into()).poisons_connection());
    }
}
