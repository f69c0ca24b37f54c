//! Charset conversion for path arguments.
//!
//! Servers that predate the UTF-8 extension expect filenames in a legacy
//! codepage. When one is configured, `RNFR`/`RNTO` arguments are converted
//! from the local I/O charset (UTF-8 unless overridden) to the remote
//! codepage before they are sent.

use crate::error::{FtpfsError, Result};
use encoding_rs::Encoding;

/// Look up an encoding by label, e.g. `cp1251`, `iso-8859-1`, `utf-8`.
pub fn lookup(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| FtpfsError::io(format!("unknown charset: {label}")))
}

/// Convert `s` from the I/O charset to the remote codepage.
///
/// The result is raw bytes in the target encoding; unmappable characters
/// fail the conversion rather than being silently replaced, since a mangled
/// rename argument would address the wrong remote file.
pub fn convert(s: &str, iocharset: &str, codepage: &str) -> Result<Vec<u8>> {
    let from = lookup(iocharset)?;
    let to = lookup(codepage)?;

    // Decode from the I/O charset when it is not UTF-8. Paths arrive from
    // the VFS as Rust strings, so a non-UTF-8 iocharset only changes how
    // we interpret them for re-encoding; in practice iocharset is UTF-8.
    let unicode: String = if from == encoding_rs::UTF_8 {
        s.to_string()
    } else {
        let (decoded, _, malformed) = from.decode(s.as_bytes());
        if malformed {
            return Err(FtpfsError::io(format!(
                "path not valid in charset {iocharset}: {s}"
            )));
        }
        decoded.into_owned()
    };

    let (encoded, _, unmappable) = to.encode(&unicode);
    if unmappable {
        return Err(FtpfsError::io(format!(
            "path not representable in codepage {codepage}: {s}"
        )));
    }
    Ok(encoded.into_owned())
}
