mod options;

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ftpfs_core::{FtpConfig, FtpVolume, HostUrl};
use ftpfs_fuse::{FsOptions, FtpFs, MountOption};
use tracing_subscriber::EnvFilter;

/// Mount an FTP server as a local filesystem.
#[derive(Parser)]
#[command(name = "ftpfs")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Anonymous mount
    ftpfs ftp://ftp.example.org/pub/ /mnt/ftp

    # Credentials via option, TLS on control and data
    ftpfs ftp://ftp.example.org/ /mnt/ftp -o user=bob:secret,ssl

    # Password from a secret manager
    echo \"$SECRET\" | ftpfs --password-stdin ftp://bob@host/ /mnt/ftp

    # Read-only, shared with other users
    ftpfs ftp://host/pub/ /mnt/ftp -o ro,allow_other
")]
struct Cli {
    /// FTP URL of the remote host (ftp:// or ftps://), with an optional
    /// initial directory
    url: String,

    /// Directory to mount on
    mountpoint: PathBuf,

    /// Mount options, mount(8) style (repeatable)
    #[arg(short = 'o', value_name = "OPT[,OPT...]")]
    options: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Read the password from stdin (single line)
    #[arg(long)]
    password_stdin: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ftpfs: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let url = HostUrl::parse(&cli.url).context("bad FTP URL")?;
    let mut cfg = FtpConfig::new(url);
    cfg.verbose = cli.verbose >= 2;

    let mut fs_opts = FsOptions {
        // Present remote entries as the mounting user by default.
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        ..FsOptions::default()
    };

    let mut fuse_options = vec![
        MountOption::FSName(format!("ftpfs#{}", cfg.url.host)),
        MountOption::Subtype("ftpfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    for block in &cli.options {
        fuse_options.extend(options::apply(&mut cfg, &mut fs_opts, block)?);
    }

    resolve_password(&mut cfg, cli.password_stdin)?;

    if !cli.mountpoint.is_dir() {
        anyhow::bail!("mountpoint {} is not a directory", cli.mountpoint.display());
    }

    tracing::info!(
        host = %cfg.url.host,
        port = cfg.url.port,
        user = %cfg.user,
        "connecting"
    );
    let volume = FtpVolume::connect(cfg).context("cannot reach the FTP server")?;

    let fs = FtpFs::new(std::sync::Arc::new(volume), fs_opts);
    tracing::info!(mountpoint = %cli.mountpoint.display(), "mounted");
    ftpfs_fuse::mount(fs, &cli.mountpoint, &fuse_options).context("mount failed")?;
    Ok(())
}

/// Password precedence: `-o user=u:p` / URL userinfo (already applied),
/// then `FTPFS_PASSWORD`, then `--password-stdin`.
fn resolve_password(cfg: &mut FtpConfig, from_stdin: bool) -> Result<()> {
    if from_stdin {
        if io::stdin().is_terminal() {
            anyhow::bail!(
                "--password-stdin requires the password to be piped in.\n\
                 Example: echo \"$SECRET\" | ftpfs --password-stdin ftp://user@host/ /mnt"
            );
        }
        let mut line = String::new();
        io::stdin()
            .read_to_string(&mut line)
            .context("reading password from stdin")?;
        let password = line.trim_end_matches(['\r', '\n']);
        if password.is_empty() {
            anyhow::bail!("password from stdin is empty");
        }
        cfg.password = password.to_string();
        return Ok(());
    }

    if cfg.password.is_empty() {
        if let Ok(env) = std::env::var("FTPFS_PASSWORD") {
            cfg.password = env;
        }
    }
    Ok(())
}

/// Tracing to stderr, `RUST_LOG` wins over the verbosity flag.
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
