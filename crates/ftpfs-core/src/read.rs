//! The read window: a sliding buffer over one restartable download.
//!
//! FTP has no random-access read beyond "resume from offset", so the mount
//! keeps at most one download in flight and restarts it only on
//! discontinuity. A sequential reader costs one `RETR` per open; a seeking
//! reader costs one per seek. The window is bounded by sliding it forward
//! once a read-only handle has consumed more than [`MAX_WINDOW_LEN`].

use crate::buffer::TransferBuffer;
use crate::config::{FtpConfig, DATA_STEP_TIMEOUT};
use crate::error::{FtpfsError, Result};
use crate::shared::{ActiveDownload, HandleId, SharedConn};
use std::io::Read;
use tracing::{debug, trace};

/// Window size above which a shrinkable window slides forward (300 KiB).
pub const MAX_WINDOW_LEN: usize = 300 * 1024;

/// Whether `[offset, offset+size)` can be served from `[begin, end)`.
/// `offset == end` with `size == 0` counts as in-window.
pub(crate) fn in_window(begin: u64, end: u64, offset: u64, size: u64) -> bool {
    offset >= begin && offset <= end && offset + size <= end
}

/// Whether the attached download can simply be driven further, or must be
/// restarted from `offset`.
pub(crate) fn needs_restart(
    owner_matches: bool,
    transfer_running: bool,
    begin: u64,
    end: u64,
    offset: u64,
) -> bool {
    !owner_matches || offset < begin || offset > end || !transfer_running
}

/// Serve `size` bytes at `offset` for handle `fh`, driving or restarting
/// the shared download as needed.
///
/// `out == None` with `size == 1` is the open-time probe: it warms the
/// window without copying. Returns the number of bytes copied (0 at or
/// past end of file); the window cursor is advanced when `update_cursor`
/// is set.
#[allow(clippy::too_many_arguments)]
pub(crate) fn read_chunk(
    conn: &SharedConn,
    cfg: &FtpConfig,
    fh: HandleId,
    path: &str,
    window: &mut TransferBuffer,
    can_shrink: bool,
    last_offset: &mut u64,
    offset: u64,
    size: usize,
    out: Option<&mut [u8]>,
    update_cursor: bool,
) -> Result<usize> {
    let mut st = conn.lock();
    trace!(
        fh,
        path,
        offset,
        size,
        window_begin = window.begin_offset(),
        window_len = window.len(),
        "read_chunk"
    );

    if !in_window(window.begin_offset(), window.end_offset(), offset, size as u64) {
        let owner_matches = st.current_fh == Some(fh);
        let running = st.active.as_ref().is_some_and(|a| a.owner == fh);

        if needs_restart(
            owner_matches,
            running,
            window.begin_offset(),
            window.end_offset(),
            offset,
        ) {
            debug!(fh, offset, "restarting download");
            window.clear();
            window.set_begin_offset(offset);
            st.current_fh = Some(fh);
            st.cancel_active();

            let dir = cfg.url.remote_dir(path);
            let name = crate::path::file_name(path).to_string();
            let client = st.ensure_client()?;
            let stream = match client.start_download(&dir, &name, offset) {
                Ok(s) => s,
                Err(e) => {
                    if e.poisons_connection() {
                        st.poison();
                    }
                    return Err(FtpfsError::io(format!("download restart failed: {e}")));
                }
            };
            stream
                .set_read_timeout(Some(DATA_STEP_TIMEOUT))
                .map_err(|e| FtpfsError::io(format!("set data timeout: {e}")))?;
            st.active = Some(ActiveDownload { stream, owner: fh });
        }

        // Drain the transfer until the window covers the request or the
        // download completes. Each step blocks at most DATA_STEP_TIMEOUT.
        let mut chunk = [0u8; 64 * 1024];
        while !in_window(window.begin_offset(), window.end_offset(), offset, size as u64)
            && st.active.is_some()
        {
            let active = st.active.as_mut().expect("active checked in loop condition");
            match active.stream.read(&mut chunk) {
                Ok(0) => {
                    // End of transfer: consume the completion reply. A bad
                    // completion status fails the read.
                    let done = st.active.take().expect("active present at EOF");
                    let client = st.ensure_client()?;
                    if let Err(e) = client.finish_download(done.stream) {
                        if e.poisons_connection() {
                            st.poison();
                        }
                        return Err(FtpfsError::io(format!("download completion: {e}")));
                    }
                }
                Ok(n) => {
                    if !window.add_mem(&chunk[..n]) {
                        st.cancel_active();
                        return Err(FtpfsError::io("window allocation failed"));
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // No progress this step; keep driving the transfer.
                    continue;
                }
                Err(e) => {
                    st.cancel_active();
                    return Err(FtpfsError::io(format!("data stream: {e}")));
                }
            }
        }
    }

    let avail = window.end_offset().saturating_sub(offset);
    let copied = (size as u64).min(avail) as usize;
    if let Some(out) = out {
        let start = (offset - window.begin_offset()) as usize;
        out[..copied].copy_from_slice(&window.as_slice()[start..start + copied]);
    }

    if update_cursor {
        *last_offset = offset + copied as u64;
    }

    if can_shrink && window.len() > MAX_WINDOW_LEN {
        let consumed = (offset - window.begin_offset()) as usize + copied;
        debug!(from = window.len(), dropping = consumed, "shrinking window");
        window.consume(consumed);
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_window_boundaries() {
        // Window [100, 200).
        assert!(in_window(100, 200, 100, 50));
        assert!(in_window(100, 200, 150, 50));
        assert!(in_window(100, 200, 200, 0));
        assert!(!in_window(100, 200, 150, 51));
        assert!(!in_window(100, 200, 99, 1));
        assert!(!in_window(100, 200, 201, 0));
    }

    #[test]
    fn restart_on_foreign_owner() {
        assert!(needs_restart(false, true, 0, 100, 50));
    }

    #[test]
    fn restart_on_backward_or_disjoint_offset() {
        assert!(needs_restart(true, true, 100, 200, 99));
        assert!(needs_restart(true, true, 100, 200, 201));
        // Contiguous future offset keeps the transfer.
        assert!(!needs_restart(true, true, 100, 200, 200));
    }

    #[test]
    fn restart_when_no_transfer_running() {
        assert!(needs_restart(true, false, 100, 200, 150));
        assert!(!needs_restart(true, true, 100, 200, 150));
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The in-window predicate is exactly interval containment.
        #[test]
        fn in_window_matches_containment(
            begin in 0u64..10_000,
            len in 0u64..10_000,
            offset in 0u64..30_000,
            size in 0u64..10_000,
        ) {
            let end = begin + len;
            let expected = offset >= begin && offset + size <= end;
            prop_assert_eq!(in_window(begin, end, offset, size), expected);
        }
    }
}
