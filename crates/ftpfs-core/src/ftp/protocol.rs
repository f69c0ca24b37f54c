//! RFC 959 control-channel codec.
//!
//! Commands go out CRLF-terminated; replies come back as a 3-digit code
//! with an optional multi-line continuation:
//!
//! ```text
//! 220-Welcome
//! 220-Second line
//! 220 Done
//! ```
//!
//! The functions are generic over the stream so they can be exercised
//! against in-memory buffers.

use crate::error::WireError;
use std::io::{BufRead, Write};

/// A complete server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// All reply lines joined, for error messages.
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// First digit of the code: 1 preliminary, 2 completion, 3 intermediate,
    /// 4 transient failure, 5 permanent failure.
    pub fn class(&self) -> u16 {
        self.code / 100
    }

    /// Convert into an error for an unexpected reply.
    pub fn into_error(self) -> WireError {
        WireError::Reply {
            code: self.code,
            text: self.text(),
        }
    }
}

/// Send one command line. The command must not contain CR or LF.
pub fn send_command(w: &mut impl Write, cmd: &str) -> Result<(), WireError> {
    send_command_bytes(w, cmd.as_bytes())
}

/// Send a command whose argument bytes may be in a legacy codepage.
pub fn send_command_bytes(w: &mut impl Write, cmd: &[u8]) -> Result<(), WireError> {
    debug_assert!(!cmd.contains(&b'\r') && !cmd.contains(&b'\n'));
    w.write_all(cmd)?;
    w.write_all(b"\r\n")?;
    w.flush()?;
    Ok(())
}

/// Read one complete (possibly multi-line) reply.
pub fn read_reply(r: &mut impl BufRead) -> Result<Reply, WireError> {
    let first = read_line(r)?;
    if first.len() < 3 {
        return Err(WireError::Protocol(format!("reply too short: {first:?}")));
    }
    let code = parse_code(&first)?;
    let mut lines = vec![first];

    let is_multi = lines[0].len() >= 4 && lines[0].as_bytes()[3] == b'-';
    if is_multi {
        let terminator = format!("{code} ");
        loop {
            let next = read_line(r)?;
            let done = next.starts_with(&terminator);
            lines.push(next);
            if done {
                break;
            }
        }
    }

    Ok(Reply { code, lines })
}

fn read_line(r: &mut impl BufRead) -> Result<String, WireError> {
    let mut buf = String::new();
    let n = r
        .read_line(&mut buf)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                WireError::Timeout("control reply".into())
            }
            _ => WireError::Io(e),
        })?;
    if n == 0 {
        return Err(WireError::Disconnected);
    }
    Ok(buf.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_code(line: &str) -> Result<u16, WireError> {
    line.get(..3)
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|c| (100..600).contains(c))
        .ok_or_else(|| WireError::Protocol(format!("invalid reply code in {line:?}")))
}
