//! The command executor: serialized metadata round-trips.
//!
//! Every metadata operation is a verb sequence executed on the shared
//! connection from the directory of the affected path. All failures are
//! compressed into the `Permission` error kind: the VFS contract promises
//! no finer classification for command failures, and callers must never
//! see success for a failed server command.

use crate::charset;
use crate::config::FtpConfig;
use crate::error::{FtpfsError, Result};
use crate::listing::{self, RemoteStat};
use crate::path;
use crate::shared::SharedConn;
use tracing::debug;

/// Execute `verbs` in order from the directory containing `path` (the
/// mount root when `path` is `None`).
pub fn run_verbs(
    conn: &SharedConn,
    cfg: &FtpConfig,
    path: Option<&str>,
    verbs: &[Vec<u8>],
) -> Result<()> {
    let dir = match path {
        Some(p) => cfg.url.remote_dir(p),
        None => cfg.url.remote_path("/"),
    };
    conn.with_client(|client| {
        client.cwd(&dir)?;
        for verb in verbs {
            client.quote(verb)?;
        }
        Ok(())
    })
    .map_err(|e| {
        debug!(error = %e, "verb sequence failed");
        FtpfsError::Permission
    })
}

/// `SITE CHMOD` with the permission subset of `mode`.
pub fn chmod(conn: &SharedConn, cfg: &FtpConfig, p: &str, mode: u32) -> Result<()> {
    let cmd = format!("SITE CHMOD {:03o} {}", mode & 0o7777, path::file_name(p));
    run_verbs(conn, cfg, Some(p), &[cmd.into_bytes()])
}

/// `SITE CHUID` + `SITE CHGID`.
pub fn chown(conn: &SharedConn, cfg: &FtpConfig, p: &str, uid: u32, gid: u32) -> Result<()> {
    let name = path::file_name(p);
    let verbs = vec![
        format!("SITE CHUID {uid} {name}").into_bytes(),
        format!("SITE CHGID {gid} {name}").into_bytes(),
    ];
    run_verbs(conn, cfg, Some(p), &verbs)
}

/// `MKD`, then a best-effort `SITE CHMOD` for the requested mode.
pub fn mkdir(conn: &SharedConn, cfg: &FtpConfig, p: &str, mode: u32) -> Result<()> {
    let cmd = format!("MKD {}", path::file_name(p));
    run_verbs(conn, cfg, Some(p), &[cmd.into_bytes()])?;
    // Directories may exist with an unapplied mode (VFAT-style); do not
    // fail the mkdir over it.
    let _ = chmod(conn, cfg, p, mode);
    Ok(())
}

pub fn rmdir(conn: &SharedConn, cfg: &FtpConfig, p: &str) -> Result<()> {
    let cmd = format!("RMD {}", path::file_name(p));
    run_verbs(conn, cfg, Some(p), &[cmd.into_bytes()])
}

pub fn unlink(conn: &SharedConn, cfg: &FtpConfig, p: &str) -> Result<()> {
    let cmd = format!("DELE {}", path::file_name(p));
    run_verbs(conn, cfg, Some(p), &[cmd.into_bytes()])
}

/// `RNFR`/`RNTO` with server-root-relative arguments, converted to the
/// remote codepage when one is configured.
pub fn rename(conn: &SharedConn, cfg: &FtpConfig, from: &str, to: &str) -> Result<()> {
    let rnfr = format!("RNFR {}", cfg.url.server_relative(from));
    let rnto = format!("RNTO {}", cfg.url.server_relative(to));

    let (rnfr, rnto) = match &cfg.codepage {
        Some(codepage) => (
            charset::convert(&rnfr, &cfg.iocharset, codepage)?,
            charset::convert(&rnto, &cfg.iocharset, codepage)?,
        ),
        None => (rnfr.into_bytes(), rnto.into_bytes()),
    };

    run_verbs(conn, cfg, None, &[rnfr, rnto])
}

/// Upload zero bytes to `path`, creating or truncating it.
pub fn create_empty_file(conn: &SharedConn, cfg: &FtpConfig, p: &str) -> Result<()> {
    let dir = cfg.url.remote_dir(p);
    let name = path::file_name(p).to_string();
    conn.with_client(|client| {
        let sink = client.start_upload(&dir, &name, false)?;
        client.finish_upload(sink)
    })
    .map_err(|_| FtpfsError::Permission)
}

/// Fetch the parent listing and find `path` in it, the only way to stat
/// over FTP.
pub fn getattr(conn: &SharedConn, cfg: &FtpConfig, p: &str) -> Result<RemoteStat> {
    let dir = cfg.url.remote_dir(p);
    let body = conn.with_client(|client| client.list(&dir))?;
    let text = String::from_utf8_lossy(&body);
    listing::find_entry(&text, path::file_name(p))
        .ok_or_else(|| FtpfsError::NoSuchFile(p.to_string()))
}

/// Fetch and parse the listing of directory `path` itself.
pub fn getdir(conn: &SharedConn, cfg: &FtpConfig, p: &str) -> Result<Vec<(String, RemoteStat)>> {
    let dir = cfg.url.remote_path(p);
    let body = conn.with_client(|client| client.list(&dir))?;
    let text = String::from_utf8_lossy(&body);
    Ok(listing::parse_listing(&text))
}

/// Resolve the symlink target recorded in the parent listing.
pub fn readlink(conn: &SharedConn, cfg: &FtpConfig, p: &str) -> Result<String> {
    let dir = cfg.url.remote_dir(p);
    let body = conn.with_client(|client| client.list(&dir))?;
    let text = String::from_utf8_lossy(&body);
    listing::readlink_target(&text, path::file_name(p))
        .ok_or_else(|| FtpfsError::NoSuchFile(p.to_string()))
}
