//! Open handles and the open-mode state machine.
//!
//! A handle drives at most one of the two engines: the read window or the
//! write pipeline. Which one is decided by the open flags and by what has
//! already happened on the handle: once a byte has been accepted for
//! upload, the handle never reads again.

use crate::buffer::TransferBuffer;
use crate::error::{FtpfsError, Result};
use crate::shared::HandleId;
use crate::write::{new_fail_slot, FailSlot, UploadPipe};

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Opened, no engine chosen yet.
    Fresh,
    /// Read window in use.
    Reading,
    /// Opened for writing, waiting for a truncate-to-zero before the
    /// upload may begin.
    WritePending,
    /// Upload begun (a thread may or may not be live right now).
    Writing,
}

/// What an open with the given flags must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenPlan {
    Read {
        /// `O_CREAT`: create the (empty) file first, skip the warm-up probe.
        create: bool,
    },
    Write {
        /// `O_EXCL`: the target must not exist.
        excl: bool,
        /// `O_CREAT` or `O_TRUNC`: the upload starts at open time.
        start_now: bool,
        /// `O_CREAT`: apply the requested mode once created.
        create: bool,
    },
}

/// Validate open flags against what FTP can express.
pub(crate) fn classify_open(flags: i32, rw_workaround: bool) -> Result<OpenPlan> {
    let accmode = flags & libc::O_ACCMODE;

    if accmode == libc::O_RDONLY {
        return Ok(OpenPlan::Read {
            create: flags & libc::O_CREAT != 0,
        });
    }

    if accmode == libc::O_WRONLY || accmode == libc::O_RDWR {
        if accmode == libc::O_RDWR && !rw_workaround {
            return Err(FtpfsError::NotSupported);
        }
        if flags & libc::O_APPEND != 0 {
            return Err(FtpfsError::NotSupported);
        }
        return Ok(OpenPlan::Write {
            excl: flags & libc::O_EXCL != 0,
            start_now: flags & (libc::O_CREAT | libc::O_TRUNC) != 0,
            create: flags & libc::O_CREAT != 0,
        });
    }

    Err(FtpfsError::io("unsupported access mode"))
}

/// One open file.
pub struct Handle {
    pub(crate) id: HandleId,
    pub(crate) open_path: String,
    #[allow(dead_code)]
    pub(crate) mode: u32,
    pub(crate) state: HandleState,

    // Read engine.
    pub(crate) window: TransferBuffer,
    pub(crate) last_offset: u64,
    pub(crate) can_shrink: bool,

    // Write engine.
    pub(crate) upload: Option<UploadPipe>,
    pub(crate) fail: FailSlot,
    pub(crate) pos: u64,
    pub(crate) write_may_start: bool,
    pub(crate) dirty: bool,
}

impl Handle {
    pub(crate) fn new(id: HandleId, open_path: &str, mode: u32) -> Self {
        Handle {
            id,
            open_path: open_path.to_string(),
            mode,
            state: HandleState::Fresh,
            window: TransferBuffer::new(),
            last_offset: 0,
            can_shrink: false,
            upload: None,
            fail: new_fail_slot(),
            pos: 0,
            write_may_start: false,
            dirty: false,
        }
    }

    /// Reads are refused once the handle has written.
    pub(crate) fn may_read(&self) -> bool {
        self.pos == 0 && self.upload.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdonly_is_a_read_plan() {
        assert_eq!(
            classify_open(libc::O_RDONLY, false).unwrap(),
            OpenPlan::Read { create: false }
        );
        assert_eq!(
            classify_open(libc::O_RDONLY | libc::O_CREAT, false).unwrap(),
            OpenPlan::Read { create: true }
        );
    }

    #[test]
    fn wronly_variants() {
        assert_eq!(
            classify_open(libc::O_WRONLY, false).unwrap(),
            OpenPlan::Write {
                excl: false,
                start_now: false,
                create: false
            }
        );
        assert_eq!(
            classify_open(libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, false).unwrap(),
            OpenPlan::Write {
                excl: false,
                start_now: true,
                create: true
            }
        );
        assert_eq!(
            classify_open(libc::O_WRONLY | libc::O_TRUNC, false).unwrap(),
            OpenPlan::Write {
                excl: false,
                start_now: true,
                create: false
            }
        );
        assert_eq!(
            classify_open(libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL, false).unwrap(),
            OpenPlan::Write {
                excl: true,
                start_now: true,
                create: true
            }
        );
    }

    #[test]
    fn append_is_not_supported() {
        let err = classify_open(libc::O_WRONLY | libc::O_APPEND, false).unwrap_err();
        assert!(matches!(err, FtpfsError::NotSupported));
    }

    #[test]
    fn rdwr_requires_the_shim() {
        assert!(matches!(
            classify_open(libc::O_RDWR, false),
            Err(FtpfsError::NotSupported)
        ));
        assert!(matches!(
            classify_open(libc::O_RDWR, true),
            Ok(OpenPlan::Write { .. })
        ));
    }

    #[test]
    fn fresh_handle_may_read() {
        let h = Handle::new(1, "/f", 0o644);
        assert!(h.may_read());
        assert_eq!(h.state, HandleState::Fresh);
        assert_eq!(h.pos, 0);
        assert!(!h.write_may_start);
    }
}
