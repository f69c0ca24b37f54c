//! The FTP session: login, verbs, and streaming transfers.
//!
//! One [`FtpClient`] per connection. The shared mount connection owns one
//! for metadata and reads; every upload owns another for the lifetime of
//! its `STOR`/`APPE`.

use crate::config::{FileMethod, FtpConfig};
use crate::error::WireError;
use crate::ftp::conn::{Connection, Stream};
use crate::ftp::protocol::Reply;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// How long to wait for each straggler reply while aborting a transfer.
const ABORT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// An authenticated FTP session.
pub struct FtpClient {
    conn: Connection,
    cfg: Arc<FtpConfig>,
    /// Server-side working directory, when known. Invalidated whenever a
    /// `CWD` fails so the next operation re-issues it.
    cwd: Option<String>,
}

impl FtpClient {
    /// Connect and log in. Sets binary mode and, when configured, UTF-8.
    pub fn connect(cfg: Arc<FtpConfig>) -> Result<Self, WireError> {
        let mut conn = Connection::establish(&cfg)?;

        let reply = conn.round_trip(&format!("USER {}", cfg.user))?;
        match reply.class() {
            2 => {}
            3 => {
                let reply = conn.round_trip(&format!("PASS {}", cfg.password))?;
                if reply.class() != 2 {
                    return Err(reply.into_error());
                }
            }
            _ => return Err(reply.into_error()),
        }

        let reply = conn.round_trip("TYPE I")?;
        if reply.class() != 2 {
            return Err(reply.into_error());
        }

        if cfg.try_utf8 {
            // Sent on every (re)connect so the server is back in UTF-8 mode
            // after a dropped session; refusal is tolerated.
            let reply = conn.round_trip("OPTS UTF8 ON")?;
            if reply.class() != 2 {
                debug!(code = reply.code, "server refused OPTS UTF8 ON");
            }
        }

        debug!(host = %cfg.url.host, user = %cfg.user, "ftp session established");
        Ok(FtpClient {
            conn,
            cfg,
            cwd: None,
        })
    }

    /// Send a verb and require a 2xx completion reply.
    pub fn expect_ok(&mut self, cmd: &str) -> Result<Reply, WireError> {
        let reply = self.conn.round_trip(cmd)?;
        if reply.class() != 2 {
            return Err(reply.into_error());
        }
        Ok(reply)
    }

    /// Send one command of a verb sequence. Arguments may already be
    /// encoded in the remote codepage. Completion (2xx) and intermediate
    /// (3xx, e.g. after `RNFR`) replies are accepted.
    pub fn quote(&mut self, cmd: &[u8]) -> Result<Reply, WireError> {
        self.conn.send_bytes(cmd)?;
        let reply = self.conn.reply()?;
        if reply.class() == 2 || reply.class() == 3 {
            Ok(reply)
        } else {
            Err(reply.into_error())
        }
    }

    /// Change the server working directory, honoring the configured
    /// directory-change strategy. No-op when already there.
    pub fn cwd(&mut self, dir: &str) -> Result<(), WireError> {
        if self.cwd.as_deref() == Some(dir) {
            return Ok(());
        }
        self.cwd = None;

        match self.cfg.file_method {
            FileMethod::SingleCwd => {
                let target = if dir.is_empty() { "/" } else { dir };
                self.expect_ok(&format!("CWD {target}"))?;
            }
            FileMethod::MultiCwd => {
                self.expect_ok("CWD /")?;
                for seg in dir.split('/').filter(|s| !s.is_empty()) {
                    self.expect_ok(&format!("CWD {seg}"))?;
                }
            }
        }
        self.cwd = Some(dir.to_string());
        Ok(())
    }

    /// Fetch a directory listing body using the configured listing verb.
    pub fn list(&mut self, dir: &str) -> Result<Vec<u8>, WireError> {
        self.cwd(dir)?;
        let pending = self.conn.open_data(&self.cfg)?;

        let verb = self.cfg.custom_list.clone();
        let reply = self.conn.round_trip(&verb)?;
        if reply.class() != 1 {
            return Err(reply.into_error());
        }

        let mut stream = self.conn.complete_data(pending, &self.cfg)?;
        let mut body = Vec::new();
        stream
            .read_to_end(&mut body)
            .map_err(|e| WireError::Data(format!("listing read: {e}")))?;
        drop(stream);

        let reply = self.conn.reply()?;
        if reply.class() != 2 {
            return Err(reply.into_error());
        }
        trace!(dir, bytes = body.len(), "listing fetched");
        Ok(body)
    }

    /// Start a download of `dir`/`name`, optionally resumed from `offset`.
    ///
    /// Returns the open data stream once the server has acknowledged the
    /// transfer; the caller reads it incrementally and must hand it back to
    /// [`finish_download`](Self::finish_download) (at end of stream) or
    /// [`abort_download`](Self::abort_download).
    pub fn start_download(
        &mut self,
        dir: &str,
        name: &str,
        offset: u64,
    ) -> Result<Stream, WireError> {
        self.cwd(dir)?;
        let pending = self.conn.open_data(&self.cfg)?;

        if offset > 0 {
            let reply = self.conn.round_trip(&format!("REST {offset}"))?;
            if reply.class() != 3 {
                return Err(reply.into_error());
            }
        }

        let reply = self.conn.round_trip(&format!("RETR {name}"))?;
        if reply.class() != 1 {
            return Err(reply.into_error());
        }

        let stream = self.conn.complete_data(pending, &self.cfg)?;
        debug!(dir, name, offset, "download started");
        Ok(stream)
    }

    /// Close a fully-drained download and consume the completion reply.
    pub fn finish_download(&mut self, stream: Stream) -> Result<(), WireError> {
        drop(stream);
        let reply = self.conn.reply()?;
        if reply.class() != 2 {
            return Err(reply.into_error());
        }
        Ok(())
    }

    /// Tear down a download that is still in flight.
    ///
    /// Closes the data socket, sends `ABOR`, and drains whatever
    /// combination of `426`/`226`/`225` the server produces. Tolerant by
    /// design: the next command on this session decides whether the
    /// control channel survived.
    pub fn abort_download(&mut self, stream: Stream) {
        drop(stream);
        if self.conn.send("ABOR").is_err() {
            return;
        }
        // Transfer-status reply, then the ABOR reply; either may be absent.
        for _ in 0..2 {
            if self.conn.try_reply(ABORT_DRAIN_TIMEOUT).is_none() {
                break;
            }
        }
    }

    /// Start an upload to `dir`/`name` (`STOR`, or `APPE` when resuming).
    ///
    /// Returns the open data sink; the caller writes it and hands it back
    /// to [`finish_upload`](Self::finish_upload).
    pub fn start_upload(
        &mut self,
        dir: &str,
        name: &str,
        append: bool,
    ) -> Result<Stream, WireError> {
        self.cwd(dir)?;
        let pending = self.conn.open_data(&self.cfg)?;

        let verb = if append { "APPE" } else { "STOR" };
        let reply = self.conn.round_trip(&format!("{verb} {name}"))?;
        if reply.class() != 1 {
            return Err(reply.into_error());
        }

        let stream = self.conn.complete_data(pending, &self.cfg)?;
        debug!(dir, name, append, "upload started");
        Ok(stream)
    }

    /// Close the upload sink and consume the completion reply.
    pub fn finish_upload(&mut self, stream: Stream) -> Result<(), WireError> {
        drop(stream);
        let reply = self.conn.reply()?;
        if reply.class() != 2 {
            return Err(reply.into_error());
        }
        Ok(())
    }
}
