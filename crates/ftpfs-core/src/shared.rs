//! The shared mount connection.
//!
//! One control connection serves every metadata operation and every read on
//! the mount, guarded by a single mutex. At most one download may be
//! attached to it at a time; whoever needs the connection next cancels the
//! attachment first. The write pipeline never touches this connection.

use crate::config::FtpConfig;
use crate::error::{FtpfsError, Result, WireError};
use crate::ftp::{conn::Stream, FtpClient};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Identifies an open handle; used to track which one owns the attached
/// download.
pub type HandleId = u64;

/// A download currently attached to the shared connection.
pub(crate) struct ActiveDownload {
    pub stream: Stream,
    pub owner: HandleId,
}

pub(crate) struct ConnState {
    cfg: Arc<FtpConfig>,
    /// `None` after a connection-level failure; the next operation
    /// reconnects.
    client: Option<FtpClient>,
    pub active: Option<ActiveDownload>,
    /// The handle whose read window the attached download feeds.
    pub current_fh: Option<HandleId>,
}

impl ConnState {
    /// The session, reconnecting if the previous one was poisoned.
    pub fn ensure_client(&mut self) -> Result<&mut FtpClient> {
        if self.client.is_none() {
            debug!("reconnecting shared control connection");
            self.client = Some(FtpClient::connect(Arc::clone(&self.cfg))?);
        }
        Ok(self.client.as_mut().expect("client just ensured"))
    }

    /// Abort the attached download, if any. The owning handle's window
    /// stays as-is; its next read will restart.
    pub fn cancel_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        debug!(owner = active.owner, "cancelling attached download");
        if let Some(client) = self.client.as_mut() {
            client.abort_download(active.stream);
        }
    }

    /// Drop the session after a connection-level failure.
    pub fn poison(&mut self) {
        self.active = None;
        self.client = None;
    }
}

/// The mutex-guarded shared connection.
pub struct SharedConn {
    inner: Mutex<ConnState>,
}

impl SharedConn {
    /// Establish the initial session. Failing here is fatal to the mount.
    pub fn connect(cfg: Arc<FtpConfig>) -> Result<Self> {
        let client = FtpClient::connect(Arc::clone(&cfg))?;
        Ok(SharedConn {
            inner: Mutex::new(ConnState {
                cfg,
                client: Some(client),
                active: None,
                current_fh: None,
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.inner.lock().expect("shared connection mutex poisoned")
    }

    /// Run a synchronous operation on the shared session.
    ///
    /// Takes the lock, cancels any attached download, and retries exactly
    /// once after reconnecting when the failure indicates a dead control
    /// channel (a server reply with a bad code is not retried).
    pub(crate) fn with_client<T>(
        &self,
        op: impl Fn(&mut FtpClient) -> std::result::Result<T, WireError>,
    ) -> Result<T> {
        let mut st = self.lock();
        st.cancel_active();

        match op(st.ensure_client()?) {
            Ok(v) => Ok(v),
            Err(e) if e.poisons_connection() => {
                warn!(error = %e, "shared connection failed, retrying once");
                st.poison();
                op(st.ensure_client()?).map_err(FtpfsError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forget the attachment owned by `fh` (called on release).
    pub fn detach_owner(&self, fh: HandleId) {
        let mut st = self.lock();
        if st.current_fh == Some(fh) {
            st.current_fh = None;
        }
        if st.active.as_ref().is_some_and(|a| a.owner == fh) {
            st.cancel_active();
        }
    }
}
