//! The write pipeline: one upload thread per writing handle.
//!
//! The VFS thread produces append-only chunks; a dedicated thread consumes
//! them into a long-lived `STOR`/`APPE` upload on the handle's own
//! connection. The two meet at a rendezvous channel carrying chunk
//! ownership, with a bounded acknowledgment channel closing the loop:
//! at any moment the producer is either blocked handing over a chunk
//! (consumer idle) or blocked awaiting the acknowledgment (chunk being
//! transmitted). Exactly one chunk is ever in flight.
//!
//! Failures are latched in a shared slot before the thread signals either
//! channel, so the producer can always discover the cause and never hangs.

use crate::config::{FtpConfig, UPLOAD_STALL_TIMEOUT};
use crate::error::{FtpfsError, Result};
use crate::ftp::{conn::Stream, FtpClient};
use crate::path;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, trace};

/// What travels from the VFS thread to the upload thread.
enum Chunk {
    Data(Vec<u8>),
    Eof,
}

/// Latched failure cause, shared between the producer, the upload thread,
/// and the flush path. Survives the thread that set it.
pub(crate) type FailSlot = Arc<Mutex<Option<String>>>;

pub(crate) fn new_fail_slot() -> FailSlot {
    Arc::new(Mutex::new(None))
}

pub(crate) fn latched(slot: &FailSlot) -> Option<String> {
    slot.lock().expect("fail slot mutex").clone()
}

pub(crate) fn latch(slot: &FailSlot, cause: impl std::fmt::Display) {
    let mut guard = slot.lock().expect("fail slot mutex");
    if guard.is_none() {
        *guard = Some(cause.to_string());
    }
}

/// Where upload bytes go. The production sink is an FTP data connection;
/// tests substitute their own.
pub(crate) trait UploadSink: Send {
    fn write_chunk(&mut self, data: &[u8]) -> std::result::Result<(), String>;
    /// Close the sink and confirm the transfer completed.
    fn finish(self: Box<Self>) -> std::result::Result<(), String>;
}

/// `STOR`/`APPE` on a connection owned by the handle.
struct FtpUploadSink {
    client: FtpClient,
    stream: Option<Stream>,
}

impl FtpUploadSink {
    fn open(cfg: &Arc<FtpConfig>, open_path: &str, append: bool) -> std::result::Result<Self, String> {
        let mut client = FtpClient::connect(Arc::clone(cfg)).map_err(|e| e.to_string())?;
        let dir = cfg.url.remote_dir(open_path);
        let name = path::file_name(open_path);
        let stream = client
            .start_upload(&dir, name, append)
            .map_err(|e| e.to_string())?;
        // Stall guard: a write that sits for this long fails the upload.
        stream
            .set_write_timeout(Some(UPLOAD_STALL_TIMEOUT))
            .map_err(|e| e.to_string())?;
        Ok(FtpUploadSink {
            client,
            stream: Some(stream),
        })
    }
}

impl UploadSink for FtpUploadSink {
    fn write_chunk(&mut self, data: &[u8]) -> std::result::Result<(), String> {
        self.stream
            .as_mut()
            .expect("stream present until finish")
            .write_all(data)
            .map_err(|e| format!("upload write: {e}"))
    }

    fn finish(mut self: Box<Self>) -> std::result::Result<(), String> {
        let stream = self.stream.take().expect("stream present until finish");
        self.client
            .finish_upload(stream)
            .map_err(|e| format!("upload completion: {e}"))
    }
}

/// The producer side of a live upload.
pub(crate) struct UploadPipe {
    chunk_tx: Sender<Chunk>,
    written_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
    fail: FailSlot,
}

/// Spawn the upload thread for `open_path` and wait until it has
/// configured its connection (or failed trying; the failure then sits in
/// `fail` for the first write to discover, as the state machine expects).
pub(crate) fn start_upload(
    cfg: &Arc<FtpConfig>,
    open_path: &str,
    append: bool,
    fail: FailSlot,
) -> Result<UploadPipe> {
    let cfg = Arc::clone(cfg);
    let open_path = open_path.to_string();
    let opener = move || {
        FtpUploadSink::open(&cfg, &open_path, append)
            .map(|s| Box::new(s) as Box<dyn UploadSink>)
    };
    start_upload_with(opener, fail)
}

/// Generic over the sink opener so the rendezvous protocol can be tested
/// without a server.
pub(crate) fn start_upload_with<F>(opener: F, fail: FailSlot) -> Result<UploadPipe>
where
    F: FnOnce() -> std::result::Result<Box<dyn UploadSink>, String> + Send + 'static,
{
    let (chunk_tx, chunk_rx) = bounded::<Chunk>(0);
    let (written_tx, written_rx) = bounded::<()>(1);
    let (ready_tx, ready_rx) = bounded::<()>(1);

    let thread_fail = Arc::clone(&fail);
    let thread = std::thread::Builder::new()
        .name("ftpfs-upload".into())
        .spawn(move || upload_thread(opener, chunk_rx, written_tx, ready_tx, thread_fail))
        .map_err(|e| FtpfsError::io(format!("spawn upload thread: {e}")))?;

    // The thread signals ready exactly once, whether or not setup worked.
    if ready_rx.recv().is_err() {
        return Err(FtpfsError::io("upload thread died before ready"));
    }

    Ok(UploadPipe {
        chunk_tx,
        written_rx,
        thread: Some(thread),
        fail,
    })
}

fn upload_thread<F>(
    opener: F,
    chunk_rx: Receiver<Chunk>,
    written_tx: Sender<()>,
    ready_tx: Sender<()>,
    fail: FailSlot,
) where
    F: FnOnce() -> std::result::Result<Box<dyn UploadSink>, String>,
{
    let mut sink = match opener() {
        Ok(s) => {
            let _ = ready_tx.send(());
            s
        }
        Err(cause) => {
            error!(%cause, "upload setup failed");
            latch(&fail, cause);
            let _ = ready_tx.send(());
            let _ = written_tx.try_send(());
            return;
        }
    };
    debug!("upload thread ready");

    loop {
        match chunk_rx.recv() {
            Ok(Chunk::Data(data)) => {
                trace!(len = data.len(), "upload chunk");
                if let Err(cause) = sink.write_chunk(&data) {
                    error!(%cause, "upload write failed");
                    latch(&fail, cause);
                    let _ = written_tx.send(());
                    return;
                }
                let _ = written_tx.send(());
            }
            Ok(Chunk::Eof) | Err(_) => break,
        }
    }

    if let Err(cause) = sink.finish() {
        error!(%cause, "upload finish failed");
        latch(&fail, cause);
    }
    debug!("upload thread leaving");
    let _ = written_tx.try_send(());
}

impl UploadPipe {
    /// Hand one chunk to the upload thread and wait until it has been
    /// fully transmitted. Returns the chunk length on success.
    pub fn send_chunk(&self, data: &[u8]) -> Result<usize> {
        let mut chunk = Vec::new();
        if chunk.try_reserve_exact(data.len()).is_err() {
            return Err(FtpfsError::OutOfMemory);
        }
        chunk.extend_from_slice(data);

        if self.chunk_tx.send(Chunk::Data(chunk)).is_err() {
            return Err(self.failure());
        }
        if self.written_rx.recv().is_err() {
            return Err(self.failure());
        }
        if latched(&self.fail).is_some() {
            return Err(self.failure());
        }
        Ok(data.len())
    }

    /// Signal end-of-stream and join the thread. The latched failure, if
    /// any, is the caller's to inspect via the fail slot.
    pub fn finish(mut self) {
        let _ = self.chunk_tx.send(Chunk::Eof);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn failure(&self) -> FtpfsError {
        match latched(&self.fail) {
            Some(cause) => FtpfsError::io(cause),
            None => FtpfsError::io("upload thread gone"),
        }
    }
}

impl Drop for UploadPipe {
    fn drop(&mut self) {
        // Normal teardown goes through finish(); this is the
        // handle-dropped-without-flush path.
        let _ = self.chunk_tx.send(Chunk::Eof);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
