//! Mount configuration.
//!
//! One [`FtpConfig`] per mount, built by the CLI from the mount URL and the
//! `-o` option set, then shared read-only by every connection the mount
//! opens (the shared command/read connection and each upload connection).

use crate::path::HostUrl;
use std::time::Duration;

/// Default timeout for establishing TCP connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout for one incremental step of an attached download.
pub const DATA_STEP_TIMEOUT: Duration = Duration::from_secs(1);

/// Stall guard for uploads: a write that makes no progress for this long
/// fails the upload (the original's 1 B / 60 s low-speed cutoff).
pub const UPLOAD_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// TLS usage on the control and data channels (explicit FTPS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Plain FTP.
    #[default]
    None,
    /// Attempt `AUTH TLS`, continue in plaintext if refused.
    Try,
    /// Require TLS on the control channel only (`PROT C`).
    Control,
    /// Require TLS on control and data channels (`PROT P`).
    All,
}

/// Proxy protocol selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks4,
    Socks4a,
    Socks5,
    Socks5Hostname,
}

/// Proxy authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyAuth {
    #[default]
    Any,
    Ntlm,
    Digest,
    Basic,
}

/// Proxy settings; only consulted when `url` is set.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// `host:port` of the proxy.
    pub url: String,
    pub kind: ProxyKind,
    /// Tunnel the FTP control connection through HTTP CONNECT.
    pub tunnel: bool,
    pub auth: ProxyAuth,
    pub user: Option<String>,
}

/// TLS certificate and verification options.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub mode: TlsMode,
    /// Client certificate file (PKCS#12).
    pub cert: Option<String>,
    pub key_password: Option<String>,
    /// CA bundle file overriding the system roots.
    pub cacert: Option<String>,
    pub capath: Option<String>,
    pub ciphers: Option<String>,
    pub verify_peer: bool,
    pub verify_host: bool,
    pub engine: Option<String>,
    pub ssl_version: Option<String>,
}

/// Which directory-change strategy command sequences use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMethod {
    /// One `CWD` per path component.
    #[default]
    MultiCwd,
    /// A single `CWD` with the full directory path.
    SingleCwd,
}

/// Address family preference for the control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    #[default]
    Any,
    V4,
    V6,
}

/// Complete per-mount configuration.
#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub url: HostUrl,
    /// Login name; resolved by the CLI from `user=`, the URL userinfo, or
    /// defaults to `anonymous`.
    pub user: String,
    pub password: String,

    pub proxy: Option<ProxyConfig>,
    pub tls: TlsConfig,

    /// Never use `EPSV`; fall back to `PASV` directly.
    pub disable_epsv: bool,
    /// Never use `EPRT` in active mode; fall back to `PORT`.
    pub disable_eprt: bool,
    /// Connect the data channel to the control peer's address, ignoring
    /// the address in the `227` reply (NAT workaround).
    pub skip_pasv_ip: bool,
    /// Active-mode bind address; passive mode when unset.
    pub ftp_port: Option<String>,
    pub file_method: FileMethod,

    pub tcp_nodelay: bool,
    pub connect_timeout: Duration,
    /// Local interface / source address, accepted for option
    /// compatibility.
    pub interface: Option<String>,
    /// Kerberos security level, accepted for option compatibility.
    pub krb_level: Option<String>,

    /// Verb used for directory listings.
    pub custom_list: String,
    /// Send `OPTS UTF8 ON` after connecting (and after any reconnect).
    pub try_utf8: bool,
    pub ip_version: IpVersion,

    /// Remote filename codepage; `RNFR`/`RNTO` arguments are converted
    /// into it when set.
    pub codepage: Option<String>,
    pub iocharset: String,

    /// Log each control-channel exchange at debug level.
    pub verbose: bool,
    /// Suppress the phantom data channel on bare command sequences.
    /// The verb executor never opens one, so this is always honored;
    /// the flag is kept so existing option strings parse.
    pub safe_nobody: bool,
    /// Block size advertised through `statfs`.
    pub blksize: u32,

    /// Allow `O_RDWR` opens (writes-only once writing begins).
    pub rw_workaround: bool,
}

impl FtpConfig {
    /// Configuration for a mount of `url` with library defaults.
    pub fn new(url: HostUrl) -> Self {
        let user = url.user.clone().unwrap_or_else(|| "anonymous".to_string());
        let password = url.password.clone().unwrap_or_default();
        Self {
            url,
            user,
            password,
            proxy: None,
            tls: TlsConfig {
                verify_peer: true,
                verify_host: true,
                ..TlsConfig::default()
            },
            disable_epsv: false,
            disable_eprt: false,
            skip_pasv_ip: false,
            ftp_port: None,
            file_method: FileMethod::default(),
            tcp_nodelay: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            interface: None,
            krb_level: None,
            custom_list: "LIST -a".to_string(),
            try_utf8: false,
            ip_version: IpVersion::default(),
            codepage: None,
            iocharset: "utf-8".to_string(),
            verbose: false,
            safe_nobody: false,
            blksize: 4096,
            rw_workaround: false,
        }
    }

    /// Sets the listing verb.
    #[must_use]
    pub fn custom_list(mut self, verb: impl Into<String>) -> Self {
        self.custom_list = verb.into();
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables the `O_RDWR` compatibility shim.
    #[must_use]
    pub fn rw_workaround(mut self, enabled: bool) -> Self {
        self.rw_workaround = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FtpConfig {
        FtpConfig::new(HostUrl::parse("ftp://h/pub").unwrap())
    }

    #[test]
    fn defaults() {
        let c = cfg();
        assert_eq!(c.user, "anonymous");
        assert_eq!(c.custom_list, "LIST -a");
        assert_eq!(c.connect_timeout, Duration::from_secs(30));
        assert_eq!(c.blksize, 4096);
        assert_eq!(c.tls.mode, TlsMode::None);
        assert!(c.tls.verify_peer);
        assert!(!c.rw_workaround);
        assert_eq!(c.iocharset, "utf-8");
    }

    #[test]
    fn url_credentials_become_login_defaults() {
        let c = FtpConfig::new(HostUrl::parse("ftp://eve:pw@h/").unwrap());
        assert_eq!(c.user, "eve");
        assert_eq!(c.password, "pw");
    }

    #[test]
    fn builder_methods() {
        let c = cfg()
            .custom_list("STAT -l")
            .connect_timeout(Duration::from_secs(5))
            .rw_workaround(true);
        assert_eq!(c.custom_list, "STAT -l");
        assert_eq!(c.connect_timeout, Duration::from_secs(5));
        assert!(c.rw_workaround);
    }
}
