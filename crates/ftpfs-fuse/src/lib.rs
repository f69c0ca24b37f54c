//! FUSE surface for FTP-backed mounts.
//!
//! [`FtpFs`] implements `fuser::Filesystem` over an
//! [`FtpVolume`](ftpfs_core::FtpVolume): inode/path mapping, TTL'd
//! metadata caches, and errno mapping live here; all protocol work lives
//! in `ftpfs-core`.

pub mod attr;
pub mod filesystem;
pub mod inode;

pub use attr::{AttrCache, DirCache, DEFAULT_ATTR_TTL};
pub use filesystem::{FsOptions, FtpFs};
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};

pub use fuser::MountOption;

/// Mount `fs` at `mountpoint` and serve until unmounted.
pub fn mount(
    fs: FtpFs,
    mountpoint: &std::path::Path,
    options: &[MountOption],
) -> std::io::Result<()> {
    fuser::mount2(fs, mountpoint, options)
}
