//! The `fuser::Filesystem` implementation routing kernel requests onto the
//! translation core.
//!
//! Every operation resolves its inode to a mount-relative path, calls the
//! corresponding [`FtpVolume`] operation, and maps failures to errno.
//! Attribute and directory caches absorb the cost of listing-based stats;
//! anything that mutates the remote invalidates them.

use crate::attr::{AttrCache, DirCache, DEFAULT_ATTR_TTL};
use crate::inode::{InodeTable, ROOT_INODE};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use ftpfs_core::{EntryKind, FtpVolume, RemoteStat, ToErrno};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, trace, warn};

/// Presentation options for the mounted filesystem.
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// Owner reported for every entry (FTP has no usable uid mapping).
    pub uid: u32,
    pub gid: u32,
    /// TTL for kernel-side and daemon-side attribute caching.
    pub attr_ttl: Duration,
}

impl Default for FsOptions {
    fn default() -> Self {
        FsOptions {
            uid: 0,
            gid: 0,
            attr_ttl: DEFAULT_ATTR_TTL,
        }
    }
}

/// FUSE filesystem over one [`FtpVolume`].
pub struct FtpFs {
    volume: Arc<FtpVolume>,
    inodes: InodeTable,
    attr_cache: AttrCache,
    dir_cache: DirCache,
    opts: FsOptions,
}

impl FtpFs {
    pub fn new(volume: Arc<FtpVolume>, opts: FsOptions) -> Self {
        FtpFs {
            attr_cache: AttrCache::new(opts.attr_ttl),
            dir_cache: DirCache::new(opts.attr_ttl),
            inodes: InodeTable::new(),
            volume,
            opts,
        }
    }

    fn ttl(&self) -> Duration {
        self.opts.attr_ttl
    }

    /// Resolve an inode to its path, or `None` if the kernel handed us a
    /// stale number.
    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.get(ino).map(|e| e.path.clone())
    }

    fn make_attr(&self, ino: u64, st: &RemoteStat) -> FileAttr {
        let kind = match st.kind {
            EntryKind::Directory => FileType::Directory,
            EntryKind::Symlink => FileType::Symlink,
            EntryKind::File => FileType::RegularFile,
        };
        let mtime = st
            .mtime
            .map(SystemTime::from)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        FileAttr {
            ino,
            size: st.size,
            blocks: st.size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm: st.perm,
            nlink: st.nlink,
            uid: self.opts.uid,
            gid: self.opts.gid,
            rdev: 0,
            blksize: self.volume.statfs().bsize,
            flags: 0,
        }
    }

    fn root_attr(&self) -> FileAttr {
        self.make_attr(
            ROOT_INODE,
            &RemoteStat {
                kind: EntryKind::Directory,
                perm: 0o755,
                size: 0,
                mtime: None,
                nlink: 2,
                link_target: None,
            },
        )
    }

    fn synthesized_file_attr(&self, ino: u64, mode: u32) -> FileAttr {
        let now = SystemTime::now();
        let mut attr = self.make_attr(
            ino,
            &RemoteStat {
                kind: EntryKind::File,
                perm: (mode & 0o7777) as u16,
                size: 0,
                mtime: None,
                nlink: 1,
                link_target: None,
            },
        );
        attr.atime = now;
        attr.mtime = now;
        attr.ctime = now;
        attr.crtime = now;
        attr
    }

    /// Stat a child, preferring the parent's cached listing.
    fn stat_child(&self, parent: u64, path: &str, name: &str) -> ftpfs_core::Result<RemoteStat> {
        if let Some(st) = self.dir_cache.lookup(parent, name) {
            return Ok(st);
        }
        self.volume.getattr(path)
    }

    fn invalidate_around(&self, parent: u64, path: &str) {
        self.dir_cache.invalidate(parent);
        if let Some(ino) = self.inodes.get_inode(path) {
            self.attr_cache.invalidate(ino);
        }
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Log and convert a core error for a kernel reply.
fn errno_for(op: &str, e: &ftpfs_core::FtpfsError) -> i32 {
    let errno = e.to_errno();
    debug!(op, errno, error = %e, "operation failed");
    errno
}

impl Filesystem for FtpFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        trace!(parent, path = %path, "lookup");

        match self.stat_child(parent, &path, name) {
            Ok(st) => {
                let ino = self.inodes.get_or_insert(&path, st.kind);
                let attr = self.make_attr(ino, &st);
                self.attr_cache.insert(ino, attr);
                reply.entry(&self.ttl(), &attr, 0);
            }
            Err(e) => reply.error(errno_for("lookup", &e)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        if ino == ROOT_INODE {
            reply.attr(&self.ttl(), &self.root_attr());
            return;
        }
        if let Some(attr) = self.attr_cache.get(ino) {
            reply.attr(&self.ttl(), &attr);
            return;
        }
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.volume.getattr(&path) {
            Ok(st) => {
                let attr = self.make_attr(ino, &st);
                self.attr_cache.insert(ino, attr);
                reply.attr(&self.ttl(), &attr);
            }
            Err(e) => reply.error(errno_for("getattr", &e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        trace!(ino, path = %path, "readlink");
        match self.volume.readlink(&path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(errno_for("readlink", &e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        debug!(path = %path, mode, "mknod");

        if let Err(e) = self.volume.mknod(&path, mode) {
            reply.error(errno_for("mknod", &e));
            return;
        }
        self.dir_cache.invalidate(parent);
        let ino = self.inodes.get_or_insert(&path, EntryKind::File);
        let attr = self.synthesized_file_attr(ino, mode);
        self.attr_cache.insert(ino, attr);
        reply.entry(&self.ttl(), &attr, 0);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        debug!(path = %path, mode, "mkdir");

        if let Err(e) = self.volume.mkdir(&path, mode) {
            reply.error(errno_for("mkdir", &e));
            return;
        }
        self.dir_cache.invalidate(parent);
        let ino = self.inodes.get_or_insert(&path, EntryKind::Directory);
        let now = SystemTime::now();
        let mut attr = self.make_attr(
            ino,
            &RemoteStat {
                kind: EntryKind::Directory,
                perm: (mode & 0o7777) as u16,
                size: 0,
                mtime: None,
                nlink: 2,
                link_target: None,
            },
        );
        attr.atime = now;
        attr.mtime = now;
        attr.ctime = now;
        self.attr_cache.insert(ino, attr);
        reply.entry(&self.ttl(), &attr, 0);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        debug!(path = %path, "unlink");

        match self.volume.unlink(&path) {
            Ok(()) => {
                self.invalidate_around(parent, &path);
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno_for("unlink", &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        debug!(path = %path, "rmdir");

        match self.volume.rmdir(&path) {
            Ok(()) => {
                self.invalidate_around(parent, &path);
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno_for("rmdir", &e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let (Some(parent_path), Some(newparent_path)) =
            (self.path_of(parent), self.path_of(newparent))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let from = child_path(&parent_path, name);
        let to = child_path(&newparent_path, newname);
        debug!(from = %from, to = %to, "rename");

        match self.volume.rename(&from, &to) {
            Ok(()) => {
                self.dir_cache.invalidate(parent);
                self.dir_cache.invalidate(newparent);
                if let Some(ino) = self.inodes.get_inode(&from) {
                    self.inodes.update_path(ino, &to);
                    self.attr_cache.invalidate(ino);
                }
                reply.ok();
            }
            Err(e) => reply.error(errno_for("rename", &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        trace!(ino, path = %path, ?mode, ?uid, ?gid, ?size, ?fh, "setattr");

        if let Some(mode) = mode {
            if let Err(e) = self.volume.chmod(&path, mode) {
                reply.error(errno_for("chmod", &e));
                return;
            }
        }

        if uid.is_some() || gid.is_some() {
            if let Err(e) = self
                .volume
                .chown(&path, uid.unwrap_or(0), gid.unwrap_or(0))
            {
                reply.error(errno_for("chown", &e));
                return;
            }
        }

        if let Some(size) = size {
            let result = match fh {
                Some(fh) => self.volume.ftruncate(fh, size),
                None => self.volume.truncate(&path, size),
            };
            if let Err(e) = result {
                reply.error(errno_for("truncate", &e));
                return;
            }
        }

        // atime/mtime changes cannot be expressed portably over FTP and
        // succeed silently.
        let _ = self.volume.utimens();

        self.attr_cache.invalidate(ino);
        if ino == ROOT_INODE {
            reply.attr(&self.ttl(), &self.root_attr());
            return;
        }
        match self.volume.getattr(&path) {
            Ok(st) => {
                let attr = self.make_attr(ino, &st);
                self.attr_cache.insert(ino, attr);
                reply.attr(&self.ttl(), &attr);
            }
            Err(e) => reply.error(errno_for("setattr", &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(entry) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if entry.kind == EntryKind::Directory {
            reply.error(libc::EISDIR);
            return;
        }
        let path = entry.path.clone();
        drop(entry);
        debug!(ino, path = %path, flags, "open");

        match self.volume.open(&path, flags, 0) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno_for("open", &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        debug!(path = %path, mode, flags, "create");

        match self.volume.open(&path, flags | libc::O_CREAT, mode) {
            Ok(fh) => {
                self.dir_cache.invalidate(parent);
                let ino = self.inodes.get_or_insert(&path, EntryKind::File);
                let attr = self.synthesized_file_attr(ino, mode);
                self.attr_cache.insert(ino, attr);
                reply.created(&self.ttl(), &attr, 0, fh, 0);
            }
            Err(e) => reply.error(errno_for("create", &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(ino, fh, offset, size, "read");
        let offset = u64::try_from(offset).unwrap_or(0);
        let mut buf = vec![0u8; size as usize];
        match self.volume.read(fh, offset, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(errno_for("read", &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(ino, fh, offset, size = data.len(), "write");
        let offset = u64::try_from(offset).unwrap_or(0);
        match self.volume.write(fh, offset, data) {
            Ok(n) => {
                self.attr_cache.invalidate(ino);
                reply.written(n as u32);
            }
            Err(e) => reply.error(errno_for("write", &e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(ino, fh, "flush");
        match self.volume.flush(fh) {
            Ok(()) => {
                self.attr_cache.invalidate(ino);
                reply.ok();
            }
            Err(e) => {
                error!(fh, error = %e, "flush failed");
                reply.error(errno_for("flush", &e));
            }
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace!(ino, fh, "fsync");
        match self.volume.flush(fh) {
            Ok(()) => {
                self.attr_cache.invalidate(ino);
                reply.ok();
            }
            Err(e) => reply.error(errno_for("fsync", &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(ino, fh, "release");
        if let Err(e) = self.volume.release(fh) {
            warn!(fh, error = %e, "release failed");
        }
        self.attr_cache.invalidate(ino);
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(entry) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if entry.kind != EntryKind::Directory {
            reply.error(libc::ENOTDIR);
            return;
        }
        let path = entry.path.clone();
        drop(entry);
        trace!(ino, path = %path, offset, "readdir");

        let listing = match self.dir_cache.get(ino) {
            Some(cached) => cached,
            None => match self.volume.getdir(&path) {
                Ok(listing) => {
                    self.dir_cache.insert(ino, listing.clone());
                    listing
                }
                Err(e) => {
                    reply.error(errno_for("readdir", &e));
                    return;
                }
            },
        };

        let parent_ino = if path == "/" {
            ROOT_INODE
        } else {
            self.inodes
                .get_inode(ftpfs_core::path::parent(&path))
                .unwrap_or(ROOT_INODE)
        };

        let mut index = 0i64;
        let mut emit = |ino: u64, kind: FileType, name: &str, reply: &mut ReplyDirectory| {
            index += 1;
            if index <= offset {
                return false;
            }
            reply.add(ino, index, kind, name)
        };

        if !emit(ino, FileType::Directory, ".", &mut reply)
            && !emit(parent_ino, FileType::Directory, "..", &mut reply)
        {
            for (name, st) in &listing {
                let child = child_path(&path, name);
                let child_ino = self.inodes.get_or_insert_no_lookup(&child, st.kind);
                let kind = match st.kind {
                    EntryKind::Directory => FileType::Directory,
                    EntryKind::Symlink => FileType::Symlink,
                    EntryKind::File => FileType::RegularFile,
                };
                if emit(child_ino, kind, name, &mut reply) {
                    break;
                }
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let st = self.volume.statfs();
        reply.statfs(
            st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen, st.frsize,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths_join_cleanly() {
        assert_eq!(child_path("/", "a.txt"), "/a.txt");
        assert_eq!(child_path("/sub", "a.txt"), "/sub/a.txt");
    }
}
