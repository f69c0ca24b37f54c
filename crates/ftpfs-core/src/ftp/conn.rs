//! Control-connection establishment and data channels.
//!
//! The control connection is a buffered TCP (optionally TLS-wrapped)
//! stream speaking the RFC 959 codec. Data channels are opened per
//! transfer: passive (`EPSV`, falling back to `PASV`) by default, active
//! (`EPRT`/`PORT`) when an `ftp_port` bind address is configured, with the
//! data stream TLS-wrapped when the protection level requires it.

use crate::config::{FtpConfig, IpVersion, ProxyKind, TlsMode};
use crate::error::WireError;
use crate::ftp::protocol::{read_reply, send_command, send_command_bytes, Reply};
use native_tls::{Certificate, Identity, Protocol, TlsConnector, TlsStream};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// A plain or TLS-wrapped socket.
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// The underlying TCP socket, for timeouts and addresses.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(s) => s,
            Stream::Tls(s) => s.get_ref(),
        }
    }

    pub fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        self.tcp().set_read_timeout(dur)
    }

    pub fn set_write_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        self.tcp().set_write_timeout(dur)
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// A data channel that is not yet ready for bytes.
///
/// Passive channels are connected as soon as the server names a port;
/// active channels hold a listener until the server calls back, which only
/// happens after the transfer command is sent.
pub enum PendingData {
    Connected(TcpStream),
    Listener(TcpListener),
}

/// An established control connection.
pub struct Connection {
    reader: BufReader<Stream>,
    tls: Option<TlsConnector>,
    /// Wrap data channels in TLS (`PROT P` negotiated or implicit FTPS).
    data_tls: bool,
    peer_ip: IpAddr,
    host: String,
    verbose: bool,
}

impl Connection {
    /// Connect, read the banner, and negotiate TLS per the configuration.
    /// Login is the caller's business.
    pub fn establish(cfg: &FtpConfig) -> Result<Self, WireError> {
        let tcp = open_tcp(cfg)?;
        let peer_ip = tcp.peer_addr().map(|a| a.ip()).map_err(WireError::Io)?;
        if cfg.tcp_nodelay {
            tcp.set_nodelay(true).ok();
        }

        let tls = if cfg.url.implicit_tls || cfg.tls.mode != TlsMode::None {
            Some(build_connector(cfg)?)
        } else {
            None
        };

        let stream = if cfg.url.implicit_tls {
            let connector = tls.as_ref().expect("connector built for implicit TLS");
            let wrapped = connector
                .connect(&cfg.url.host, tcp)
                .map_err(|e| WireError::Tls(format!("implicit handshake: {e}")))?;
            Stream::Tls(Box::new(wrapped))
        } else {
            Stream::Plain(tcp)
        };

        let mut conn = Connection {
            reader: BufReader::new(stream),
            tls,
            data_tls: cfg.url.implicit_tls,
            peer_ip,
            host: cfg.url.host.clone(),
            verbose: cfg.verbose,
        };

        let banner = conn.reply()?;
        if banner.class() != 2 {
            return Err(banner.into_error());
        }

        if !cfg.url.implicit_tls {
            conn.upgrade_tls(cfg)?;
        }
        Ok(conn)
    }

    /// Explicit FTPS: `AUTH TLS`, wrap, then `PBSZ 0` and `PROT`.
    fn upgrade_tls(&mut self, cfg: &FtpConfig) -> Result<(), WireError> {
        if cfg.tls.mode == TlsMode::None {
            return Ok(());
        }

        let reply = self.round_trip("AUTH TLS")?;
        if reply.class() != 2 {
            if cfg.tls.mode == TlsMode::Try {
                debug!(code = reply.code, "server refused AUTH TLS, continuing in plaintext");
                return Ok(());
            }
            return Err(reply.into_error());
        }

        let plain = match self.reader.get_mut() {
            Stream::Plain(s) => s.try_clone().map_err(WireError::Io)?,
            Stream::Tls(_) => return Err(WireError::Tls("double TLS upgrade".into())),
        };
        let connector = self.tls.as_ref().expect("connector built for explicit TLS");
        let wrapped = connector
            .connect(&self.host, plain)
            .map_err(|e| WireError::Tls(format!("explicit handshake: {e}")))?;
        self.reader = BufReader::new(Stream::Tls(Box::new(wrapped)));

        let reply = self.round_trip("PBSZ 0")?;
        if reply.class() != 2 {
            return Err(reply.into_error());
        }
        let prot = match cfg.tls.mode {
            TlsMode::All | TlsMode::Try => "PROT P",
            TlsMode::Control => "PROT C",
            TlsMode::None => unreachable!(),
        };
        let reply = self.round_trip(prot)?;
        if reply.class() == 2 {
            self.data_tls = prot == "PROT P";
        } else if cfg.tls.mode == TlsMode::All {
            return Err(reply.into_error());
        }
        Ok(())
    }

    pub fn send(&mut self, cmd: &str) -> Result<(), WireError> {
        if self.verbose {
            debug!(">> {}", redact(cmd));
        } else {
            trace!(">> {}", redact(cmd));
        }
        send_command(self.reader.get_mut(), cmd)
    }

    pub fn send_bytes(&mut self, cmd: &[u8]) -> Result<(), WireError> {
        trace!(">> {} raw bytes", cmd.len());
        send_command_bytes(self.reader.get_mut(), cmd)
    }

    pub fn reply(&mut self) -> Result<Reply, WireError> {
        let reply = read_reply(&mut self.reader)?;
        if self.verbose {
            debug!("<< {} {}", reply.code, reply.text());
        } else {
            trace!("<< {} {}", reply.code, reply.text());
        }
        Ok(reply)
    }

    pub fn round_trip(&mut self, cmd: &str) -> Result<Reply, WireError> {
        self.send(cmd)?;
        self.reply()
    }

    /// Set the read timeout on the control socket.
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        self.reader.get_ref().set_read_timeout(dur)
    }

    /// Read a reply if one arrives within `dur`. Used to drain stray
    /// replies after an abort.
    pub fn try_reply(&mut self, dur: Duration) -> Option<Reply> {
        self.set_read_timeout(Some(dur)).ok()?;
        let r = read_reply(&mut self.reader).ok();
        self.set_read_timeout(None).ok();
        r
    }

    /// Open a data channel for the next transfer command.
    pub fn open_data(&mut self, cfg: &FtpConfig) -> Result<PendingData, WireError> {
        if cfg.ftp_port.is_some() {
            self.open_active(cfg)
        } else {
            self.open_passive(cfg).map(PendingData::Connected)
        }
    }

    fn open_passive(&mut self, cfg: &FtpConfig) -> Result<TcpStream, WireError> {
        let addr = if !cfg.disable_epsv {
            match self.round_trip("EPSV") {
                Ok(reply) if reply.class() == 2 => {
                    let port = parse_epsv(&reply.text())?;
                    Some(SocketAddr::new(self.peer_ip, port))
                }
                // EPSV refused: fall through to PASV.
                Ok(_) | Err(WireError::Reply { .. }) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let addr = match addr {
            Some(a) => a,
            None => {
                let reply = self.round_trip("PASV")?;
                if reply.class() != 2 {
                    return Err(reply.into_error());
                }
                let (ip, port) = parse_pasv(&reply.text())?;
                let ip = if cfg.skip_pasv_ip { self.peer_ip } else { ip };
                SocketAddr::new(ip, port)
            }
        };

        let tcp = TcpStream::connect_timeout(&addr, cfg.connect_timeout)
            .map_err(|e| WireError::Data(format!("passive connect to {addr}: {e}")))?;
        Ok(tcp)
    }

    fn open_active(&mut self, cfg: &FtpConfig) -> Result<PendingData, WireError> {
        let bind_ip = cfg
            .ftp_port
            .as_deref()
            .filter(|v| *v != "-")
            .and_then(|v| v.parse::<IpAddr>().ok())
            .unwrap_or_else(|| {
                self.reader
                    .get_ref()
                    .tcp()
                    .local_addr()
                    .map(|a| a.ip())
                    .unwrap_or(IpAddr::from([0, 0, 0, 0]))
            });

        let listener = TcpListener::bind((bind_ip, 0))
            .map_err(|e| WireError::Data(format!("active bind: {e}")))?;
        let local = listener.local_addr().map_err(WireError::Io)?;

        if !cfg.disable_eprt {
            let af = if local.ip().is_ipv4() { 1 } else { 2 };
            let cmd = format!("EPRT |{af}|{}|{}|", local.ip(), local.port());
            let reply = self.round_trip(&cmd)?;
            if reply.class() == 2 {
                return Ok(PendingData::Listener(listener));
            }
        }

        let IpAddr::V4(v4) = local.ip() else {
            return Err(WireError::Data("PORT requires IPv4".into()));
        };
        let o = v4.octets();
        let cmd = format!(
            "PORT {},{},{},{},{},{}",
            o[0],
            o[1],
            o[2],
            o[3],
            local.port() / 256,
            local.port() % 256
        );
        let reply = self.round_trip(&cmd)?;
        if reply.class() != 2 {
            return Err(reply.into_error());
        }
        Ok(PendingData::Listener(listener))
    }

    /// Finish establishing a data channel once the transfer command has
    /// been acknowledged: accept the callback for active mode, then wrap
    /// in TLS when the protection level calls for it.
    pub fn complete_data(
        &self,
        pending: PendingData,
        cfg: &FtpConfig,
    ) -> Result<Stream, WireError> {
        let tcp = match pending {
            PendingData::Connected(s) => s,
            PendingData::Listener(l) => {
                l.set_nonblocking(false).ok();
                let (s, _) = accept_timeout(&l, cfg.connect_timeout)?;
                s
            }
        };
        tcp.set_nodelay(true).ok();

        if self.data_tls {
            let connector = self
                .tls
                .as_ref()
                .ok_or_else(|| WireError::Tls("data TLS without connector".into()))?;
            let wrapped = connector
                .connect(&self.host, tcp)
                .map_err(|e| WireError::Tls(format!("data handshake: {e}")))?;
            Ok(Stream::Tls(Box::new(wrapped)))
        } else {
            Ok(Stream::Plain(tcp))
        }
    }
}

/// TCP connect honoring address-family preference, proxy tunneling and
/// the connect timeout.
fn open_tcp(cfg: &FtpConfig) -> Result<TcpStream, WireError> {
    if let Some(proxy) = &cfg.proxy {
        return open_via_proxy(cfg, proxy);
    }

    let addrs: Vec<SocketAddr> = (cfg.url.host.as_str(), cfg.url.port)
        .to_socket_addrs()
        .map_err(|e| WireError::Connect(format!("resolve {}: {e}", cfg.url.host)))?
        .filter(|a| match cfg.ip_version {
            IpVersion::Any => true,
            IpVersion::V4 => a.is_ipv4(),
            IpVersion::V6 => a.is_ipv6(),
        })
        .collect();
    if addrs.is_empty() {
        return Err(WireError::Connect(format!(
            "no addresses for {} match the requested IP version",
            cfg.url.host
        )));
    }

    let mut last = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, cfg.connect_timeout) {
            Ok(s) => return Ok(s),
            Err(e) => last = Some(e),
        }
    }
    Err(WireError::Connect(format!(
        "connect to {}: {}",
        cfg.url.host,
        last.expect("at least one address attempted")
    )))
}

fn open_via_proxy(
    cfg: &FtpConfig,
    proxy: &crate::config::ProxyConfig,
) -> Result<TcpStream, WireError> {
    match proxy.kind {
        ProxyKind::Http => {}
        _ => {
            return Err(WireError::Connect(
                "only HTTP CONNECT proxies are supported".into(),
            ))
        }
    }

    let addr = proxy
        .url
        .to_socket_addrs()
        .map_err(|e| WireError::Connect(format!("resolve proxy {}: {e}", proxy.url)))?
        .next()
        .ok_or_else(|| WireError::Connect(format!("no address for proxy {}", proxy.url)))?;

    let mut tcp = TcpStream::connect_timeout(&addr, cfg.connect_timeout)
        .map_err(|e| WireError::Connect(format!("proxy connect: {e}")))?;

    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
        host = cfg.url.host,
        port = cfg.url.port
    );
    tcp.write_all(request.as_bytes()).map_err(WireError::Io)?;

    let mut reader = BufReader::new(tcp);
    let mut status = String::new();
    reader.read_line(&mut status).map_err(WireError::Io)?;
    if !status.contains(" 200 ") {
        return Err(WireError::Connect(format!(
            "proxy refused tunnel: {}",
            status.trim_end()
        )));
    }
    // Skip remaining response headers.
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).map_err(WireError::Io)?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
    }
    Ok(reader.into_inner())
}

fn build_connector(cfg: &FtpConfig) -> Result<TlsConnector, WireError> {
    let mut builder = TlsConnector::builder();
    if !cfg.tls.verify_peer {
        builder.danger_accept_invalid_certs(true);
    }
    if !cfg.tls.verify_host {
        builder.danger_accept_invalid_hostnames(true);
    }
    if let Some(path) = &cfg.tls.cacert {
        let pem = std::fs::read(path)
            .map_err(|e| WireError::Tls(format!("read CA file {path}: {e}")))?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| WireError::Tls(format!("parse CA file {path}: {e}")))?;
        builder.add_root_certificate(cert);
    }
    if let Some(path) = &cfg.tls.cert {
        let bytes = std::fs::read(path)
            .map_err(|e| WireError::Tls(format!("read client cert {path}: {e}")))?;
        let identity =
            Identity::from_pkcs12(&bytes, cfg.tls.key_password.as_deref().unwrap_or(""))
                .map_err(|e| WireError::Tls(format!("parse client cert {path}: {e}")))?;
        builder.identity(identity);
    }
    if let Some(version) = &cfg.tls.ssl_version {
        let min = match version.to_ascii_lowercase().as_str() {
            "sslv3" => Protocol::Sslv3,
            "tlsv1" | "tlsv1.0" => Protocol::Tlsv10,
            "tlsv1.1" => Protocol::Tlsv11,
            "tlsv1.2" => Protocol::Tlsv12,
            other => return Err(WireError::Tls(format!("unknown ssl_version: {other}"))),
        };
        builder.min_protocol_version(Some(min));
    }
    builder
        .build()
        .map_err(|e| WireError::Tls(format!("build connector: {e}")))
}

fn accept_timeout(
    listener: &TcpListener,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), WireError> {
    listener.set_nonblocking(true).map_err(WireError::Io)?;
    let deadline = std::time::Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok(pair) => {
                pair.0.set_nonblocking(false).map_err(WireError::Io)?;
                return Ok(pair);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if std::time::Instant::now() >= deadline {
                    return Err(WireError::Data("active-mode accept timed out".into()));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(WireError::Io(e)),
        }
    }
}

/// `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
fn parse_pasv(text: &str) -> Result<(IpAddr, u16), WireError> {
    let start = text
        .find('(')
        .ok_or_else(|| WireError::Protocol(format!("cannot parse PASV reply: {text}")))?;
    let end = text[start..]
        .find(')')
        .map(|i| start + i)
        .ok_or_else(|| WireError::Protocol(format!("cannot parse PASV reply: {text}")))?;
    let nums: Vec<u8> = text[start + 1..end]
        .split(',')
        .map(|s| s.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| WireError::Protocol(format!("PASV number out of range: {text}")))?;
    if nums.len() != 6 {
        return Err(WireError::Protocol(format!("PASV wants 6 numbers: {text}")));
    }
    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok((ip, port))
}

/// `229 Entering Extended Passive Mode (|||port|)`
fn parse_epsv(text: &str) -> Result<u16, WireError> {
    let start = text
        .find("(|||")
        .ok_or_else(|| WireError::Protocol(format!("cannot parse EPSV reply: {text}")))?;
    let rest = &text[start + 4..];
    let end = rest
        .find('|')
        .ok_or_else(|| WireError::Protocol(format!("cannot parse EPSV reply: {text}")))?;
    rest[..end]
        .parse::<u16>()
        .map_err(|_| WireError::Protocol(format!("EPSV port out of range: {text}")))
}

/// Keep passwords out of the logs.
fn redact(cmd: &str) -> &str {
    if cmd.len() >= 4 && cmd[..4].eq_ignore_ascii_case("PASS") {
        "PASS ****"
    } else {
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasv_reply_parses() {
        let (ip, port) = parse_pasv("227 Entering Passive Mode (192,168,1,9,19,136)").unwrap();
        assert_eq!(ip, IpAddr::from([192, 168, 1, 9]));
        assert_eq!(port, 19 * 256 + 136);
    }

    #[test]
    fn pasv_rejects_garbage() {
        assert!(parse_pasv("227 whatever").is_err());
        assert!(parse_pasv("227 (1,2,3)").is_err());
        assert!(parse_pasv("227 (1,2,3,4,5,999)").is_err());
    }

    #[test]
    fn epsv_reply_parses() {
        assert_eq!(parse_epsv("229 Entering Extended Passive Mode (|||4021|)").unwrap(), 4021);
        assert!(parse_epsv("229 nope").is_err());
    }

    #[test]
    fn pass_commands_are_redacted() {
        assert_eq!(redact("PASS hunter2"), "PASS ****");
        assert_eq!(redact("pass hunter2"), "PASS ****");
        assert_eq!(redact("RETR x"), "RETR x");
    }
}
