//! The mounted volume: handles plus the operations the VFS surface routes
//! onto them.
//!
//! Metadata operations go through the command executor on the shared
//! connection; reads go through the per-handle window; writes through the
//! per-handle upload pipeline. The open-mode state machine lives in
//! [`open`](FtpVolume::open) and the per-handle operations below.

use crate::commands;
use crate::config::FtpConfig;
use crate::error::{FtpfsError, Result};
use crate::handle::{classify_open, Handle, HandleState, OpenPlan};
use crate::listing::RemoteStat;
use crate::read;
use crate::shared::{HandleId, SharedConn};
use crate::write::{self, latch, latched};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Synthetic filesystem statistics; FTP reports none, so the advertised
/// numbers just need to keep userspace free-space heuristics happy.
#[derive(Debug, Clone, Copy)]
pub struct VolumeStatfs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub frsize: u32,
    pub namelen: u32,
}

/// One mounted FTP volume.
pub struct FtpVolume {
    cfg: Arc<FtpConfig>,
    conn: SharedConn,
    handles: DashMap<HandleId, Arc<Mutex<Handle>>>,
    next_fh: AtomicU64,
}

impl FtpVolume {
    /// Connect the shared session. Failing here fails the mount.
    pub fn connect(cfg: FtpConfig) -> Result<Self> {
        let cfg = Arc::new(cfg);
        let conn = SharedConn::connect(Arc::clone(&cfg))?;
        Ok(FtpVolume {
            cfg,
            conn,
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &Arc<FtpConfig> {
        &self.cfg
    }

    // ─── Metadata operations ────────────────────────────────────────────

    pub fn getattr(&self, path: &str) -> Result<RemoteStat> {
        commands::getattr(&self.conn, &self.cfg, path)
    }

    pub fn getdir(&self, path: &str) -> Result<Vec<(String, RemoteStat)>> {
        commands::getdir(&self.conn, &self.cfg, path)
    }

    pub fn readlink(&self, path: &str) -> Result<String> {
        commands::readlink(&self.conn, &self.cfg, path)
    }

    /// Create a regular file. Other node types cannot be expressed.
    pub fn mknod(&self, path: &str, mode: u32) -> Result<()> {
        if mode & libc::S_IFMT != 0 && mode & libc::S_IFMT != libc::S_IFREG {
            return Err(FtpfsError::Permission);
        }
        commands::create_empty_file(&self.conn, &self.cfg, path)?;
        let _ = commands::chmod(&self.conn, &self.cfg, path, mode);
        Ok(())
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        commands::mkdir(&self.conn, &self.cfg, path, mode)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        commands::rmdir(&self.conn, &self.cfg, path)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        commands::unlink(&self.conn, &self.cfg, path)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        commands::rename(&self.conn, &self.cfg, from, to)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        commands::chmod(&self.conn, &self.cfg, path, mode)
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        commands::chown(&self.conn, &self.cfg, path, uid, gid)
    }

    /// Path-level truncate: to zero recreates the file; any other length
    /// is accepted only as a no-op matching the current remote size (the
    /// truncate-to-own-length pattern office suites rely on).
    pub fn truncate(&self, path: &str, offset: u64) -> Result<()> {
        if offset == 0 {
            return commands::create_empty_file(&self.conn, &self.cfg, path);
        }
        match self.getattr(path) {
            Ok(st) if st.size == offset => Ok(()),
            _ => Err(FtpfsError::Permission),
        }
    }

    /// Setting timestamps is not portable over FTP; succeed silently.
    pub fn utimens(&self) -> Result<()> {
        Ok(())
    }

    pub fn statfs(&self) -> VolumeStatfs {
        VolumeStatfs {
            blocks: 999_999_999 * 2,
            bfree: 999_999_999 * 2,
            bavail: 999_999_999 * 2,
            files: 999_999_999,
            ffree: 999_999_999,
            bsize: self.cfg.blksize,
            frsize: 512,
            namelen: 255,
        }
    }

    // ─── Handle lifecycle ───────────────────────────────────────────────

    /// Open `path` per the open-flag state machine. Returns the handle id.
    pub fn open(&self, path: &str, flags: i32, mode: u32) -> Result<HandleId> {
        let plan = classify_open(flags, self.cfg.rw_workaround)?;
        let id = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let mut handle = Handle::new(id, path, mode);
        debug!(path, flags, id, ?plan, "open");

        match plan {
            OpenPlan::Read { create } => {
                if create {
                    self.mknod(path, (mode & 0o7777) | libc::S_IFREG as u32)?;
                } else {
                    // Warm the window with a one-byte probe; a file that
                    // cannot start downloading cannot be opened.
                    handle.can_shrink = true;
                    read::read_chunk(
                        &self.conn,
                        &self.cfg,
                        id,
                        path,
                        &mut handle.window,
                        handle.can_shrink,
                        &mut handle.last_offset,
                        0,
                        1,
                        None,
                        false,
                    )
                    .map_err(|e| FtpfsError::Access(format!("{path}: {e}")))?;
                }
                handle.state = HandleState::Reading;
            }
            OpenPlan::Write {
                excl,
                start_now,
                create,
            } => {
                if excl && !matches!(self.getattr(path), Err(FtpfsError::NoSuchFile(_))) {
                    return Err(FtpfsError::Access(format!("{path}: exists")));
                }

                if start_now {
                    handle.write_may_start = true;
                    let pipe =
                        write::start_upload(&self.cfg, path, false, Arc::clone(&handle.fail))?;
                    handle.upload = Some(pipe);
                    handle.state = HandleState::Writing;
                    if create {
                        // Only meaningful for a created file; ignored if
                        // the server refuses.
                        let _ = self.chmod(path, mode);
                    }
                } else {
                    // The upload may only begin after an ftruncate(0).
                    handle.write_may_start = false;
                    handle.state = HandleState::WritePending;
                }
            }
        }

        self.handles.insert(id, Arc::new(Mutex::new(handle)));
        Ok(id)
    }

    /// Read `out.len()` bytes at `offset` through the handle's window.
    pub fn read(&self, fh: HandleId, offset: u64, out: &mut [u8]) -> Result<usize> {
        let handle = self.handle(fh)?;
        let mut h = lock_handle(&handle);

        if !h.may_read() {
            warn!(fh, "read on a handle that has been written to");
            return Err(FtpfsError::io("handle already written to"));
        }

        let Handle {
            id,
            open_path,
            window,
            last_offset,
            can_shrink,
            ..
        } = &mut *h;
        read::read_chunk(
            &self.conn,
            &self.cfg,
            *id,
            open_path,
            window,
            *can_shrink,
            last_offset,
            offset,
            out.len(),
            Some(out),
            true,
        )
    }

    /// Accept `data` at `offset` into the handle's upload stream.
    pub fn write(&self, fh: HandleId, offset: u64, data: &[u8]) -> Result<usize> {
        let handle = self.handle(fh)?;
        let mut h = lock_handle(&handle);
        debug!(
            fh,
            offset,
            size = data.len(),
            pos = h.pos,
            live = h.upload.is_some(),
            "write"
        );

        // A failure latched by a previous write or the upload thread.
        if let Some(cause) = latched(&h.fail) {
            return Err(FtpfsError::io(cause));
        }

        if h.upload.is_none() && h.pos == 0 && offset == 0 {
            // Fresh stream. Without a preceding create/truncate the remote
            // must already be empty, otherwise this would silently
            // overwrite from the middle of nowhere.
            if !h.write_may_start {
                match self.getattr(&h.open_path) {
                    Ok(st) if st.size == 0 => {}
                    _ => {
                        return Err(FtpfsError::io(
                            "write without a preceding truncate to zero",
                        ))
                    }
                }
            }
            let pipe = write::start_upload(&self.cfg, &h.open_path, false, Arc::clone(&h.fail))?;
            h.upload = Some(pipe);
            h.state = HandleState::Writing;
        } else if h.upload.is_none() && h.pos > 0 && offset == h.pos {
            // Resume after a premature flush: append to what was uploaded.
            let pipe = write::start_upload(&self.cfg, &h.open_path, true, Arc::clone(&h.fail))?;
            h.upload = Some(pipe);
            h.state = HandleState::Writing;
        }

        if h.upload.is_none() {
            return Err(FtpfsError::io("non-sequential write"));
        }

        if offset != h.pos {
            warn!(fh, offset, pos = h.pos, "non-sequential write, ending upload");
            // Latched so the eventual flush reports the failure too.
            latch(
                &h.fail,
                format!("non-sequential write at {offset}, stream position {}", h.pos),
            );
            let pipe = h.upload.take().expect("upload checked above");
            pipe.finish();
            return Err(FtpfsError::io("non-sequential write"));
        }

        let pipe = h.upload.as_ref().expect("upload checked above");
        let n = pipe.send_chunk(data)?;
        h.pos += n as u64;
        Ok(n)
    }

    /// Truncation through an open handle, per the write-pending protocol.
    pub fn ftruncate(&self, fh: HandleId, offset: u64) -> Result<()> {
        let handle = self.handle(fh)?;
        let mut h = lock_handle(&handle);

        if offset == 0 {
            if h.pos == 0 {
                h.write_may_start = true;
                let path = h.open_path.clone();
                return commands::create_empty_file(&self.conn, &self.cfg, &path);
            }
            return Err(FtpfsError::Permission);
        }

        let path = h.open_path.clone();
        drop(h);
        match self.getattr(&path) {
            Ok(st) if st.size == offset => Ok(()),
            _ => Err(FtpfsError::Permission),
        }
    }

    /// Drain the upload (if any) and verify the remote took every byte.
    pub fn flush(&self, fh: HandleId) -> Result<()> {
        let handle = self.handle(fh)?;
        let mut h = lock_handle(&handle);
        debug!(fh, pos = h.pos, live = h.upload.is_some(), "flush");

        if let Some(pipe) = h.upload.take() {
            pipe.finish();
            if let Some(cause) = latched(&h.fail) {
                return Err(FtpfsError::io(cause));
            }

            // The upload used APPE on resume, so a silent short store
            // would otherwise go unnoticed.
            let path = h.open_path.clone();
            let expected = h.pos;
            drop(h);
            let st = self.getattr(&path)?;
            if st.size != expected {
                let h = lock_handle(&handle);
                latch(
                    &h.fail,
                    format!("size mismatch after flush: remote {} expected {expected}", st.size),
                );
                return Err(FtpfsError::io(format!(
                    "flushed {path} has {} bytes, expected {expected}",
                    st.size
                )));
            }
            return Ok(());
        }

        // No live upload: report a failure latched by an earlier write
        // before declaring the handle clean.
        if let Some(cause) = latched(&h.fail) {
            return Err(FtpfsError::io(cause));
        }
        if h.dirty {
            return Err(FtpfsError::io("dirty handle with no upload stream"));
        }
        Ok(())
    }

    /// Flush, detach from the shared connection, forget the handle.
    pub fn release(&self, fh: HandleId) -> Result<()> {
        debug!(fh, "release");
        // The VFS cannot act on release errors; flushing is best-effort
        // here and authoritative in flush().
        if let Err(e) = self.flush(fh) {
            warn!(fh, error = %e, "flush during release failed");
        }
        self.conn.detach_owner(fh);
        self.handles.remove(&fh);
        Ok(())
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn handle(&self, fh: HandleId) -> Result<Arc<Mutex<Handle>>> {
        self.handles
            .get(&fh)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| FtpfsError::io(format!("stale file handle {fh}")))
    }
}

fn lock_handle(handle: &Arc<Mutex<Handle>>) -> MutexGuard<'_, Handle> {
    handle.lock().expect("handle mutex poisoned")
}
