//! Translation core between POSIX file I/O and the FTP protocol.
//!
//! A mounted FTP server has to answer random-access reads and streaming
//! writes with a protocol that offers neither. This crate is that
//! translation layer:
//!
//! - a per-handle **read window** serving arbitrary offsets from a single
//!   restartable download with a server-side resume cursor,
//! - a per-handle **write pipeline** turning append-only writes into one
//!   long-lived `STOR`/`APPE` upload on a dedicated thread,
//! - the **open-mode state machine** deciding which engine a handle may
//!   drive,
//! - a mutex-guarded **shared connection** carrying every metadata command
//!   and every read on the mount.
//!
//! The FUSE surface lives in `ftpfs-fuse`; this crate knows nothing about
//! inodes or kernel replies.

pub mod buffer;
pub mod charset;
pub mod commands;
pub mod config;
pub mod error;
pub mod ftp;
pub mod handle;
pub mod listing;
pub mod path;
pub mod read;
pub mod shared;
pub mod volume;
pub mod write;

pub use buffer::TransferBuffer;
pub use config::{FtpConfig, FileMethod, IpVersion, ProxyAuth, ProxyConfig, ProxyKind, TlsConfig, TlsMode};
pub use error::{FtpfsError, Result, ToErrno, WireError};
pub use handle::HandleState;
pub use listing::{EntryKind, RemoteStat};
pub use path::HostUrl;
pub use read::MAX_WINDOW_LEN;
pub use shared::{HandleId, SharedConn};
pub use volume::{FtpVolume, VolumeStatfs};
