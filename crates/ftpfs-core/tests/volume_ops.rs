//! End-to-end behavior of the translation core against a scripted server.

mod common;

use common::{patterned, FakeFtpServer};
use ftpfs_core::{FtpConfig, FtpVolume, FtpfsError, HostUrl, ToErrno};

fn volume(server: &FakeFtpServer) -> FtpVolume {
    let cfg = FtpConfig::new(HostUrl::parse(&server.url()).unwrap());
    FtpVolume::connect(cfg).expect("connect to fake server")
}

const O_RDONLY: i32 = libc::O_RDONLY;
const O_WRONLY: i32 = libc::O_WRONLY;
const O_CREAT: i32 = libc::O_CREAT;
const O_TRUNC: i32 = libc::O_TRUNC;
const O_EXCL: i32 = libc::O_EXCL;

#[test]
fn sequential_read_uses_a_single_transfer() {
    let server = FakeFtpServer::start();
    let content = patterned(1024 * 1024);
    server.put_file("/big.bin", content.clone());
    let vol = volume(&server);

    let fh = vol.open("/big.bin", O_RDONLY, 0).unwrap();

    let mut collected = Vec::new();
    let mut offset = 0u64;
    let mut chunk = vec![0u8; 64 * 1024];
    while collected.len() < content.len() {
        let n = vol.read(fh, offset, &mut chunk).unwrap();
        assert_eq!(n, 64 * 1024, "full chunks up to the exact end");
        collected.extend_from_slice(&chunk[..n]);
        offset += n as u64;
    }
    assert_eq!(collected, content);
    assert_eq!(server.count_commands("RETR"), 1, "one download serves all reads");
    assert_eq!(server.count_commands("REST"), 0, "no resume on a cold start");

    // The window slid forward while reading (it is bounded at 300 KiB), so
    // a jump back to the start cannot be served from memory anymore.
    let n = vol.read(fh, 0, &mut chunk).unwrap();
    assert_eq!(&chunk[..n], &content[..n]);
    assert_eq!(server.count_commands("RETR"), 2, "backward jump restarts");
    vol.release(fh).unwrap();
}

#[test]
fn backward_seek_restarts_with_resume_offsets() {
    let server = FakeFtpServer::start();
    let content = patterned(1024 * 1024);
    server.put_file("/big.bin", content.clone());
    let vol = volume(&server);

    let fh = vol.open("/big.bin", O_RDONLY, 0).unwrap();

    let mut buf = vec![0u8; 4096];
    let n = vol.read(fh, 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], &content[..n]);

    let n = vol.read(fh, 900_000, &mut buf).unwrap();
    assert_eq!(n, 4096);
    assert_eq!(&buf[..n], &content[900_000..904_096]);

    let n = vol.read(fh, 1000, &mut buf).unwrap();
    assert_eq!(n, 4096);
    assert_eq!(&buf[..n], &content[1000..5096]);

    vol.release(fh).unwrap();

    let cmds = server.commands();
    assert_eq!(server.count_commands("RETR"), 3, "probe plus two restarts");
    assert!(cmds.iter().any(|c| c == "REST 900000"));
    assert!(cmds.iter().any(|c| c == "REST 1000"));
}

#[test]
fn read_at_and_past_eof_returns_zero() {
    let server = FakeFtpServer::start();
    server.put_file("/small.bin", patterned(1000));
    let vol = volume(&server);

    let fh = vol.open("/small.bin", O_RDONLY, 0).unwrap();
    let mut buf = vec![0u8; 4096];
    assert_eq!(vol.read(fh, 1000, &mut buf).unwrap(), 0);
    assert_eq!(vol.read(fh, 5000, &mut buf).unwrap(), 0);
    vol.release(fh).unwrap();
}

#[test]
fn fresh_write_streams_one_stor() {
    let server = FakeFtpServer::start();
    let vol = volume(&server);
    let content = patterned(100 * 1024);

    let fh = vol
        .open("/new.bin", O_WRONLY | O_CREAT | O_TRUNC, 0o644)
        .unwrap();
    for (i, chunk) in content.chunks(32 * 1024).enumerate() {
        let n = vol.write(fh, (i * 32 * 1024) as u64, chunk).unwrap();
        assert_eq!(n, chunk.len(), "each write accepts its whole chunk");
    }
    vol.flush(fh).unwrap();
    vol.release(fh).unwrap();

    assert_eq!(server.file("/new.bin").unwrap(), content);
    assert_eq!(server.count_commands("STOR"), 1);
    assert_eq!(server.count_commands("APPE"), 0);
    assert!(
        server.commands().iter().any(|c| c == "SITE CHMOD 644 new.bin"),
        "created file gets the requested mode"
    );
}

#[test]
fn premature_flush_resumes_with_appe() {
    let server = FakeFtpServer::start();
    let vol = volume(&server);
    let content = patterned(100 * 1024);

    let fh = vol
        .open("/resumed.bin", O_WRONLY | O_CREAT | O_TRUNC, 0o644)
        .unwrap();
    assert_eq!(vol.write(fh, 0, &content[..51_200]).unwrap(), 51_200);
    vol.flush(fh).unwrap();

    // Same handle, next sequential offset: the upload restarts in append
    // mode.
    assert_eq!(vol.write(fh, 51_200, &content[51_200..]).unwrap(), 51_200);
    vol.flush(fh).unwrap();
    vol.release(fh).unwrap();

    assert_eq!(server.file("/resumed.bin").unwrap(), content);
    assert_eq!(server.count_commands("STOR"), 1);
    assert_eq!(server.count_commands("APPE"), 1);
}

#[test]
fn non_sequential_write_fails_and_flush_reports_it() {
    let server = FakeFtpServer::start();
    let vol = volume(&server);

    let fh = vol
        .open("/skewed.bin", O_WRONLY | O_CREAT | O_TRUNC, 0o644)
        .unwrap();
    assert_eq!(vol.write(fh, 0, &patterned(10 * 1024)).unwrap(), 10 * 1024);

    let err = vol.write(fh, 5000, &patterned(10 * 1024)).unwrap_err();
    assert_eq!(err.to_errno(), libc::EIO);

    let err = vol.flush(fh).unwrap_err();
    assert_eq!(err.to_errno(), libc::EIO);
    vol.release(fh).unwrap();

    // The bytes accepted before the failure were streamed; nothing after.
    assert_eq!(server.file("/skewed.bin").unwrap().len(), 10 * 1024);
}

#[test]
fn o_excl_on_existing_file_is_refused() {
    let server = FakeFtpServer::start();
    server.put_file("/x", b"present".to_vec());
    let vol = volume(&server);

    let err = vol
        .open("/x", O_WRONLY | O_CREAT | O_EXCL, 0o644)
        .unwrap_err();
    assert_eq!(err.to_errno(), libc::EACCES);

    // A fresh name is fine.
    let fh = vol.open("/y", O_WRONLY | O_CREAT | O_EXCL, 0o644).unwrap();
    assert_eq!(vol.open_handles(), 1);
    vol.release(fh).unwrap();
    assert_eq!(vol.open_handles(), 0);
}

#[test]
fn append_and_bare_rdwr_are_unsupported() {
    let server = FakeFtpServer::start();
    server.put_file("/f", b"data".to_vec());
    let vol = volume(&server);

    let err = vol.open("/f", O_WRONLY | libc::O_APPEND, 0).unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOTSUP);

    let err = vol.open("/f", libc::O_RDWR, 0).unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOTSUP);
}

#[test]
fn read_write_round_trip() {
    let server = FakeFtpServer::start();
    let vol = volume(&server);
    let content = patterned(12_345);

    let fh = vol.open("/rt.bin", O_WRONLY | O_CREAT | O_TRUNC, 0o644).unwrap();
    assert_eq!(vol.write(fh, 0, &content).unwrap(), content.len());
    vol.flush(fh).unwrap();
    vol.release(fh).unwrap();

    let fh = vol.open("/rt.bin", O_RDONLY, 0).unwrap();
    let mut back = vec![0u8; content.len()];
    assert_eq!(vol.read(fh, 0, &mut back).unwrap(), content.len());
    vol.release(fh).unwrap();

    assert_eq!(back, content);
}

#[test]
fn reads_are_rejected_once_a_handle_has_written() {
    let server = FakeFtpServer::start();
    let vol = volume(&server);

    let fh = vol.open("/w.bin", O_WRONLY | O_CREAT | O_TRUNC, 0o644).unwrap();
    vol.write(fh, 0, b"written").unwrap();

    let mut buf = [0u8; 4];
    let err = vol.read(fh, 0, &mut buf).unwrap_err();
    assert_eq!(err.to_errno(), libc::EIO);
    vol.flush(fh).unwrap();
    vol.release(fh).unwrap();
}

#[test]
fn write_pending_handle_requires_truncate_to_zero() {
    let server = FakeFtpServer::start();
    server.put_file("/doc.txt", b"original content".to_vec());
    let vol = volume(&server);

    // No O_CREAT/O_TRUNC: the upload may not start yet.
    let fh = vol.open("/doc.txt", O_WRONLY, 0).unwrap();

    let err = vol.write(fh, 0, b"too early").unwrap_err();
    assert_eq!(err.to_errno(), libc::EIO);

    vol.ftruncate(fh, 0).unwrap();
    assert_eq!(vol.write(fh, 0, b"fresh").unwrap(), 5);
    vol.flush(fh).unwrap();
    vol.release(fh).unwrap();

    assert_eq!(server.file("/doc.txt").unwrap(), b"fresh");
}

#[test]
fn ftruncate_matrix() {
    let server = FakeFtpServer::start();
    server.put_file("/t.bin", patterned(2048));
    let vol = volume(&server);

    let fh = vol.open("/t.bin", O_WRONLY, 0).unwrap();

    // Truncating to the current remote length is the office-suite no-op.
    vol.ftruncate(fh, 2048).unwrap();

    // Any other non-zero length cannot be expressed.
    let err = vol.ftruncate(fh, 100).unwrap_err();
    assert_eq!(err.to_errno(), libc::EPERM);

    vol.release(fh).unwrap();
}

#[test]
fn truncate_by_path() {
    let server = FakeFtpServer::start();
    server.put_file("/p.bin", patterned(512));
    let vol = volume(&server);

    vol.truncate("/p.bin", 512).unwrap();
    assert_eq!(
        vol.truncate("/p.bin", 9).unwrap_err().to_errno(),
        libc::EPERM
    );

    vol.truncate("/p.bin", 0).unwrap();
    assert_eq!(server.file("/p.bin").unwrap(), b"");
}

#[test]
fn getattr_is_idempotent_and_missing_paths_are_enoent() {
    let server = FakeFtpServer::start();
    server.put_file("/a.txt", b"hello".to_vec());
    let vol = volume(&server);

    let first = vol.getattr("/a.txt").unwrap();
    let second = vol.getattr("/a.txt").unwrap();
    assert_eq!(first.size, second.size);
    assert_eq!(first.kind, second.kind);
    assert_eq!(first.perm, second.perm);
    assert_eq!(first.size, 5);

    let err = vol.getattr("/missing.txt").unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOENT);
    assert!(matches!(err, FtpfsError::NoSuchFile(_)));
}

#[test]
fn directory_listing_and_metadata_verbs() {
    let server = FakeFtpServer::start();
    server.put_file("/one.txt", b"1".to_vec());
    server.put_file("/two.txt", b"22".to_vec());
    server.add_dir("/sub");
    let vol = volume(&server);

    let entries = vol.getdir("/").unwrap();
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"one.txt"));
    assert!(names.contains(&"two.txt"));
    assert!(names.contains(&"sub"));

    vol.mkdir("/made", 0o755).unwrap();
    assert!(server.state.dirs.lock().unwrap().contains("/made"));

    vol.chmod("/one.txt", 0o600).unwrap();
    assert!(server.commands().iter().any(|c| c == "SITE CHMOD 600 one.txt"));

    vol.chown("/one.txt", 1000, 1000).unwrap();
    assert!(server.commands().iter().any(|c| c == "SITE CHUID 1000 one.txt"));
    assert!(server.commands().iter().any(|c| c == "SITE CHGID 1000 one.txt"));

    vol.rename("/two.txt", "/renamed.txt").unwrap();
    assert!(server.file("/two.txt").is_none());
    assert_eq!(server.file("/renamed.txt").unwrap(), b"22");

    vol.unlink("/one.txt").unwrap();
    assert!(server.file("/one.txt").is_none());

    vol.rmdir("/made").unwrap();
    assert!(!server.state.dirs.lock().unwrap().contains("/made"));

    // Failures compress to EPERM.
    let err = vol.unlink("/one.txt").unwrap_err();
    assert_eq!(err.to_errno(), libc::EPERM);
}

#[test]
fn restart_continuity_matches_fresh_open() {
    let server = FakeFtpServer::start();
    let content = patterned(200_000);
    server.put_file("/c.bin", content.clone());
    let vol = volume(&server);

    // Seeking handle.
    let fh = vol.open("/c.bin", O_RDONLY, 0).unwrap();
    let mut buf = vec![0u8; 8192];
    vol.read(fh, 0, &mut buf).unwrap();
    let n = vol.read(fh, 150_000, &mut buf).unwrap();
    let seeking = buf[..n].to_vec();
    vol.release(fh).unwrap();

    // Fresh handle straight to the same offset.
    let fh = vol.open("/c.bin", O_RDONLY, 0).unwrap();
    let n2 = vol.read(fh, 150_000, &mut buf).unwrap();
    vol.release(fh).unwrap();

    assert_eq!(n, n2);
    assert_eq!(seeking, buf[..n2].to_vec());
    assert_eq!(seeking, content[150_000..150_000 + n].to_vec());
}

#[test]
fn statfs_is_synthetic_but_sane() {
    let server = FakeFtpServer::start();
    let vol = volume(&server);

    let st = vol.statfs();
    assert_eq!(st.namelen, 255);
    assert_eq!(st.bsize, 4096);
    assert!(st.blocks > 1_000_000_000);
    assert_eq!(st.blocks, st.bfree);
}

#[test]
fn mknod_rejects_non_regular_files() {
    let server = FakeFtpServer::start();
    let vol = volume(&server);

    let err = vol.mknod("/dev0", libc::S_IFCHR | 0o644).unwrap_err();
    assert_eq!(err.to_errno(), libc::EPERM);
    assert!(server.file("/dev0").is_none());

    vol.mknod("/plain", libc::S_IFREG | 0o644).unwrap();
    assert_eq!(server.file("/plain").unwrap(), b"");
}
