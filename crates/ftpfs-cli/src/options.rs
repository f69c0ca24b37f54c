//! The `-o` mount-option grammar.
//!
//! Options arrive as comma-separated `key` / `key=value` strings, mount(8)
//! style. Keys this daemon understands mutate the [`FtpConfig`] or the
//! presentation options; everything else is passed through to FUSE
//! untouched, so standard options like `allow_other` keep working.

use anyhow::{bail, Context, Result};
use ftpfs_core::{FileMethod, FtpConfig, IpVersion, ProxyAuth, ProxyConfig, ProxyKind, TlsMode};
use ftpfs_fuse::{FsOptions, MountOption};
use std::time::Duration;

/// Apply one comma-separated option string. Returns the FUSE passthrough
/// options it produced.
pub fn apply(
    cfg: &mut FtpConfig,
    fs_opts: &mut FsOptions,
    options: &str,
) -> Result<Vec<MountOption>> {
    let mut fuse = Vec::new();

    for opt in options.split(',').filter(|s| !s.is_empty()) {
        let (key, value) = match opt.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (opt, None),
        };

        match key {
            // Credentials.
            "user" => {
                let v = required(key, value)?;
                match v.split_once(':') {
                    Some((u, p)) => {
                        cfg.user = u.to_string();
                        cfg.password = p.to_string();
                    }
                    None => cfg.user = v.to_string(),
                }
            }

            // Proxy.
            "proxy" => {
                let v = required(key, value)?;
                proxy_mut(cfg).url = v.to_string();
            }
            "proxytype" => {
                let v = required(key, value)?;
                proxy_mut(cfg).kind = match v {
                    "http" => ProxyKind::Http,
                    "socks4" => ProxyKind::Socks4,
                    "socks4a" => ProxyKind::Socks4a,
                    "socks5" => ProxyKind::Socks5,
                    "socks5h" => ProxyKind::Socks5Hostname,
                    other => bail!("unknown proxy type: {other}"),
                };
            }
            "proxytunnel" => proxy_mut(cfg).tunnel = true,
            "proxy_anyauth" => proxy_mut(cfg).auth = ProxyAuth::Any,
            "proxy_ntlm" => proxy_mut(cfg).auth = ProxyAuth::Ntlm,
            "proxy_digest" => proxy_mut(cfg).auth = ProxyAuth::Digest,
            "proxy_basic" => proxy_mut(cfg).auth = ProxyAuth::Basic,
            "proxy_user" => proxy_mut(cfg).user = Some(required(key, value)?.to_string()),

            // TLS.
            "ssl" => cfg.tls.mode = TlsMode::All,
            "ssl_control" => cfg.tls.mode = TlsMode::Control,
            "ssl_try" => cfg.tls.mode = TlsMode::Try,
            "no_ssl" => cfg.tls.mode = TlsMode::None,
            "no_verify_peer" => cfg.tls.verify_peer = false,
            "no_verify_hostname" => cfg.tls.verify_host = false,
            "cert" => cfg.tls.cert = Some(required(key, value)?.to_string()),
            "pass" | "key_password" => {
                cfg.tls.key_password = Some(required(key, value)?.to_string())
            }
            "cacert" => cfg.tls.cacert = Some(required(key, value)?.to_string()),
            "capath" => cfg.tls.capath = Some(required(key, value)?.to_string()),
            "ciphers" => cfg.tls.ciphers = Some(required(key, value)?.to_string()),
            "engine" => cfg.tls.engine = Some(required(key, value)?.to_string()),
            "ssl_version" => cfg.tls.ssl_version = Some(required(key, value)?.to_string()),

            // FTP behavior.
            "disable_epsv" => cfg.disable_epsv = true,
            "disable_eprt" => cfg.disable_eprt = true,
            "skip_pasv_ip" => cfg.skip_pasv_ip = true,
            "ftp_port" => cfg.ftp_port = Some(value.unwrap_or("-").to_string()),
            "ftp_method" => {
                cfg.file_method = match required(key, value)? {
                    "multicwd" => FileMethod::MultiCwd,
                    "singlecwd" => FileMethod::SingleCwd,
                    other => bail!("unknown ftp_method: {other}"),
                };
            }
            "tcp_nodelay" => cfg.tcp_nodelay = true,
            "connect_timeout" => {
                let secs: u64 = required(key, value)?
                    .parse()
                    .with_context(|| format!("connect_timeout: not a number: {opt}"))?;
                cfg.connect_timeout = Duration::from_secs(secs);
            }
            "interface" => cfg.interface = Some(required(key, value)?.to_string()),
            "krb4" | "krb" => cfg.krb_level = Some(required(key, value)?.to_string()),
            "custom_list" => cfg.custom_list = required(key, value)?.to_string(),
            "utf8" => cfg.try_utf8 = true,
            "ipv4" => cfg.ip_version = IpVersion::V4,
            "ipv6" => cfg.ip_version = IpVersion::V6,
            "codepage" => cfg.codepage = Some(required(key, value)?.to_string()),
            "iocharset" => cfg.iocharset = required(key, value)?.to_string(),
            "safe_nobody" => cfg.safe_nobody = true,
            "blksize" => {
                cfg.blksize = required(key, value)?
                    .parse()
                    .with_context(|| format!("blksize: not a number: {opt}"))?;
            }
            "rw_workaround" => cfg.rw_workaround = true,

            // Presentation.
            "uid" => {
                fs_opts.uid = required(key, value)?
                    .parse()
                    .with_context(|| format!("uid: not a number: {opt}"))?;
            }
            "gid" => {
                fs_opts.gid = required(key, value)?
                    .parse()
                    .with_context(|| format!("gid: not a number: {opt}"))?;
            }
            "attr_timeout" => {
                let secs: u64 = required(key, value)?
                    .parse()
                    .with_context(|| format!("attr_timeout: not a number: {opt}"))?;
                fs_opts.attr_ttl = Duration::from_secs(secs);
            }

            // Common FUSE options, typed where fuser has a variant.
            "ro" => fuse.push(MountOption::RO),
            "rw" => fuse.push(MountOption::RW),
            "allow_other" => fuse.push(MountOption::AllowOther),
            "allow_root" => fuse.push(MountOption::AllowRoot),
            "auto_unmount" => fuse.push(MountOption::AutoUnmount),
            "default_permissions" => fuse.push(MountOption::DefaultPermissions),
            "fsname" => fuse.push(MountOption::FSName(required(key, value)?.to_string())),

            // Anything else is FUSE's business.
            _ => fuse.push(MountOption::CUSTOM(opt.to_string())),
        }
    }

    Ok(fuse)
}

fn required<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str> {
    value.with_context(|| format!("option {key} requires a value"))
}

fn proxy_mut(cfg: &mut FtpConfig) -> &mut ProxyConfig {
    cfg.proxy.get_or_insert_with(|| ProxyConfig {
        url: String::new(),
        kind: ProxyKind::Http,
        tunnel: false,
        auth: ProxyAuth::Any,
        user: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftpfs_core::HostUrl;

    fn fresh() -> (FtpConfig, FsOptions) {
        (
            FtpConfig::new(HostUrl::parse("ftp://h/").unwrap()),
            FsOptions::default(),
        )
    }

    #[test]
    fn credentials_and_behavior_flags() {
        let (mut cfg, mut fs) = fresh();
        let fuse = apply(
            &mut cfg,
            &mut fs,
            "user=alice:wonder,disable_epsv,tcp_nodelay,utf8,connect_timeout=5",
        )
        .unwrap();
        assert!(fuse.is_empty());
        assert_eq!(cfg.user, "alice");
        assert_eq!(cfg.password, "wonder");
        assert!(cfg.disable_epsv);
        assert!(cfg.tcp_nodelay);
        assert!(cfg.try_utf8);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn tls_options() {
        let (mut cfg, mut fs) = fresh();
        apply(
            &mut cfg,
            &mut fs,
            "ssl,no_verify_peer,cacert=/etc/ca.pem,ciphers=DEFAULT",
        )
        .unwrap();
        assert_eq!(cfg.tls.mode, TlsMode::All);
        assert!(!cfg.tls.verify_peer);
        assert_eq!(cfg.tls.cacert.as_deref(), Some("/etc/ca.pem"));
        assert_eq!(cfg.tls.ciphers.as_deref(), Some("DEFAULT"));
    }

    #[test]
    fn proxy_accumulates() {
        let (mut cfg, mut fs) = fresh();
        apply(
            &mut cfg,
            &mut fs,
            "proxy=proxy.example:3128,proxytype=http,proxytunnel,proxy_ntlm",
        )
        .unwrap();
        let proxy = cfg.proxy.unwrap();
        assert_eq!(proxy.url, "proxy.example:3128");
        assert_eq!(proxy.kind, ProxyKind::Http);
        assert!(proxy.tunnel);
        assert_eq!(proxy.auth, ProxyAuth::Ntlm);
    }

    #[test]
    fn ftp_method_and_custom_list() {
        let (mut cfg, mut fs) = fresh();
        apply(&mut cfg, &mut fs, "ftp_method=singlecwd,custom_list=LIST -la").unwrap();
        assert_eq!(cfg.file_method, FileMethod::SingleCwd);
        assert_eq!(cfg.custom_list, "LIST -la");

        let err = apply(&mut cfg, &mut fs, "ftp_method=bogus").unwrap_err();
        assert!(err.to_string().contains("ftp_method"));
    }

    #[test]
    fn presentation_and_fuse_passthrough() {
        let (mut cfg, mut fs) = fresh();
        let fuse = apply(
            &mut cfg,
            &mut fs,
            "uid=1000,gid=1000,ro,allow_other,fsname=myftp,weird_flag",
        )
        .unwrap();
        assert_eq!(fs.uid, 1000);
        assert_eq!(fs.gid, 1000);
        assert!(matches!(fuse[0], MountOption::RO));
        assert!(matches!(fuse[1], MountOption::AllowOther));
        assert!(matches!(fuse[2], MountOption::FSName(ref n) if n == "myftp"));
        assert!(matches!(fuse[3], MountOption::CUSTOM(ref c) if c == "weird_flag"));
    }

    #[test]
    fn missing_values_are_rejected() {
        let (mut cfg, mut fs) = fresh();
        assert!(apply(&mut cfg, &mut fs, "user").is_err());
        assert!(apply(&mut cfg, &mut fs, "connect_timeout=abc").is_err());
    }

    #[test]
    fn rw_workaround_and_codepage() {
        let (mut cfg, mut fs) = fresh();
        apply(&mut cfg, &mut fs, "rw_workaround,codepage=cp1251,iocharset=utf-8").unwrap();
        assert!(cfg.rw_workaround);
        assert_eq!(cfg.codepage.as_deref(), Some("cp1251"));
        assert_eq!(cfg.iocharset, "utf-8");
    }
}
