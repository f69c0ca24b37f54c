//! `LIST` response parsing.
//!
//! Turns a directory listing body into stat-shaped metadata. Three formats
//! are recognized, tried in order per line:
//!
//! 1. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; name`
//! 2. **Unix `ls -l`**: `-rw-r--r-- 1 owner group 1234 Jan  1 12:00 name`
//! 3. **Windows/IIS**: `01-01-26  12:00AM       1234 name`
//!
//! Lines matching none of the formats are skipped; `.` and `..` are
//! filtered from enumerations.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Entry type as reported by the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Stat-shaped metadata for one remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    pub kind: EntryKind,
    /// Permission bits only (no file-type bits).
    pub perm: u16,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub nlink: u32,
    pub link_target: Option<String>,
}

impl RemoteStat {
    fn file(size: u64) -> Self {
        RemoteStat {
            kind: EntryKind::File,
            perm: 0o644,
            size,
            mtime: None,
            nlink: 1,
            link_target: None,
        }
    }
}

static UNIX_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^([dlcbps-][rwxsStT-]{9})\S*\s+  # permission string
        (\d+)\s+                          # link count
        \S+\s+                            # owner
        \S+\s+                            # group
        (\d+)\s+                          # size
        (\w{3}\s+\d{1,2}\s+[\d:]+)\s+    # date
        (.+)$                             # name (possibly with -> target)
        ",
    )
    .expect("unix listing pattern")
});

static WINDOWS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+
        (\d{1,2}:\d{2}(?:AM|PM)?)\s+
        (<DIR>|\d+)\s+
        (.+)$
        ",
    )
    .expect("windows listing pattern")
});

/// Parse a full listing body into `(name, stat)` pairs, skipping `.`/`..`.
pub fn parse_listing(body: &str) -> Vec<(String, RemoteStat)> {
    body.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .filter_map(parse_line)
        .filter(|(name, _)| name != "." && name != "..")
        .collect()
}

/// Look up a single name in a listing body.
pub fn find_entry(body: &str, name: &str) -> Option<RemoteStat> {
    body.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .filter_map(parse_line)
        .find(|(n, _)| n == name)
        .map(|(_, st)| st)
}

/// Look up the symlink target recorded for `name`, if it is a symlink.
pub fn readlink_target(body: &str, name: &str) -> Option<String> {
    find_entry(body, name).and_then(|st| st.link_target)
}

fn parse_line(line: &str) -> Option<(String, RemoteStat)> {
    if line.contains(';') && line.contains('=') {
        if let Some(e) = parse_mlsd(line) {
            return Some(e);
        }
    }
    if let Some(e) = parse_unix(line) {
        return Some(e);
    }
    parse_windows(line)
}

fn parse_unix(line: &str) -> Option<(String, RemoteStat)> {
    let caps = UNIX_LINE.captures(line)?;
    let perms = caps.get(1)?.as_str();
    let nlink = caps.get(2)?.as_str().parse().unwrap_or(1);
    let size = caps.get(3)?.as_str().parse().unwrap_or(0);
    let date = caps.get(4)?.as_str();
    let name_raw = caps.get(5)?.as_str();

    let kind = match perms.as_bytes()[0] {
        b'd' => EntryKind::Directory,
        b'l' => EntryKind::Symlink,
        _ => EntryKind::File,
    };

    let (name, link_target) = if kind == EntryKind::Symlink {
        match name_raw.find(" -> ") {
            Some(i) => (name_raw[..i].to_string(), Some(name_raw[i + 4..].to_string())),
            None => (name_raw.to_string(), None),
        }
    } else {
        (name_raw.to_string(), None)
    };

    Some((
        name,
        RemoteStat {
            kind,
            perm: mode_from_perms(&perms[1..10]),
            size,
            mtime: parse_unix_date(date),
            nlink,
            link_target,
        },
    ))
}

/// `rwxr-xr-x` → `0o755`; setuid/setgid/sticky markers set the high bits.
fn mode_from_perms(perms: &str) -> u16 {
    let mut mode = 0u16;
    for (i, c) in perms.bytes().take(9).enumerate() {
        let bit = 0o400 >> i;
        match c {
            b'r' | b'w' | b'x' => mode |= bit,
            b's' | b't' => {
                mode |= bit & 0o111;
                // Special bit for this triad: setuid, setgid, sticky.
                mode |= 0o4000 >> (i / 3);
            }
            b'S' | b'T' => mode |= 0o4000 >> (i / 3),
            _ => {}
        }
    }
    mode
}

/// `Jan  1 12:00` (current year implied) or `Jan  1  2025`.
fn parse_unix_date(s: &str) -> Option<DateTime<Utc>> {
    let fields: Vec<&str> = s.split_whitespace().collect();
    if fields.len() != 3 {
        return None;
    }
    let normalized = fields.join(" ");

    if fields[2].contains(':') {
        let year = Utc::now().year();
        if let Ok(dt) =
            NaiveDateTime::parse_from_str(&format!("{year} {normalized}"), "%Y %b %d %H:%M")
        {
            return Some(Utc.from_utc_datetime(&dt));
        }
        return None;
    }

    NaiveDate::parse_from_str(&normalized, "%b %d %Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn parse_windows(line: &str) -> Option<(String, RemoteStat)> {
    let caps = WINDOWS_LINE.captures(line)?;
    let date = caps.get(1)?.as_str();
    let time = caps.get(2)?.as_str();
    let size_or_dir = caps.get(3)?.as_str();
    let name = caps.get(4)?.as_str().to_string();

    let st = if size_or_dir == "<DIR>" {
        RemoteStat {
            kind: EntryKind::Directory,
            perm: 0o755,
            size: 0,
            mtime: parse_windows_date(date, time),
            nlink: 2,
            link_target: None,
        }
    } else {
        RemoteStat {
            mtime: parse_windows_date(date, time),
            ..RemoteStat::file(size_or_dir.parse().unwrap_or(0))
        }
    };
    Some((name, st))
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{date} {time}");
    for fmt in ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %I:%M%p", "%m-%d-%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&combined, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    None
}

fn parse_mlsd(line: &str) -> Option<(String, RemoteStat)> {
    let (facts_str, name) = if let Some(pos) = line.find("; ") {
        (&line[..pos + 1], &line[pos + 2..])
    } else {
        return None;
    };
    if name.is_empty() {
        return None;
    }

    let mut kind = None;
    let mut size = 0u64;
    let mut mtime = None;
    let mut perm = None;

    for segment in facts_str.split(';') {
        let Some((k, v)) = segment.trim().split_once('=') else {
            continue;
        };
        match k.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match v.to_ascii_lowercase().as_str() {
                    "dir" | "cdir" | "pdir" => Some(EntryKind::Directory),
                    "file" => Some(EntryKind::File),
                    t if t.contains("symlink") || t.contains("slink") => Some(EntryKind::Symlink),
                    _ => None,
                }
            }
            "size" => size = v.parse().unwrap_or(0),
            "modify" => mtime = parse_mlsd_time(v),
            "unix.mode" => perm = u16::from_str_radix(v.trim_start_matches('0'), 8).ok(),
            _ => {}
        }
    }

    let kind = kind?;
    Some((
        name.to_string(),
        RemoteStat {
            kind,
            perm: perm.unwrap_or(match kind {
                EntryKind::Directory => 0o755,
                _ => 0o644,
            }),
            size,
            mtime,
            nlink: if kind == EntryKind::Directory { 2 } else { 1 },
            link_target: None,
        },
    ))
}

/// `YYYYMMDDHHmmSS[.fraction]`
fn parse_mlsd_time(s: &str) -> Option<DateTime<Utc>> {
    let base = if s.len() >= 14 { &s[..14] } else { s };
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIX_BODY: &str = "\
total 3
drwxr-xr-x   2 ftp  ftp      4096 Mar  1 09:30 subdir
-rw-r--r--   1 ftp  ftp      1234 Jan  1 12:00 readme.txt
-rwxr-x---   1 ftp  ftp    999999 Jan  1  2025 tool
lrwxrwxrwx   1 ftp  ftp        11 Jan  5 08:00 link -> /var/target
";

    #[test]
    fn unix_file_fields() {
        let st = find_entry(UNIX_BODY, "readme.txt").unwrap();
        assert_eq!(st.kind, EntryKind::File);
        assert_eq!(st.size, 1234);
        assert_eq!(st.perm, 0o644);
        assert_eq!(st.nlink, 1);
        assert!(st.mtime.is_some());
    }

    #[test]
    fn unix_directory_and_mode() {
        let st = find_entry(UNIX_BODY, "subdir").unwrap();
        assert_eq!(st.kind, EntryKind::Directory);
        assert_eq!(st.perm, 0o755);

        let st = find_entry(UNIX_BODY, "tool").unwrap();
        assert_eq!(st.perm, 0o750);
    }

    #[test]
    fn unix_symlink_target() {
        assert_eq!(
            readlink_target(UNIX_BODY, "link").as_deref(),
            Some("/var/target")
        );
        assert!(readlink_target(UNIX_BODY, "readme.txt").is_none());
    }

    #[test]
    fn missing_name_is_none() {
        assert!(find_entry(UNIX_BODY, "absent").is_none());
    }

    #[test]
    fn enumeration_skips_dot_entries() {
        let body = "\
drwxr-xr-x 2 f f 4096 Jan  1 10:00 .
drwxr-xr-x 9 f f 4096 Jan  1 10:00 ..
-rw-r--r-- 1 f f   10 Jan  1 10:00 real.txt
";
        let entries = parse_listing(body);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "real.txt");
    }

    #[test]
    fn filenames_with_spaces_survive() {
        let body = "-rw-r--r-- 1 f f 10 Jan  1 10:00 with space.txt";
        let entries = parse_listing(body);
        assert_eq!(entries[0].0, "with space.txt");
    }

    #[test]
    fn windows_formats() {
        let body = "\
01-01-26  12:00AM      <DIR> My Documents
03-15-26  02:30PM       1234 notes.txt
";
        let entries = parse_listing(body);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "My Documents");
        assert_eq!(entries[0].1.kind, EntryKind::Directory);
        assert_eq!(entries[1].1.size, 1234);
    }

    #[test]
    fn mlsd_facts() {
        let body = "type=file;size=1024;modify=20260101120000;unix.mode=0600; example.bin";
        let st = find_entry(body, "example.bin").unwrap();
        assert_eq!(st.kind, EntryKind::File);
        assert_eq!(st.size, 1024);
        assert_eq!(st.perm, 0o600);
        assert!(st.mtime.is_some());
    }

    #[test]
    fn setuid_and_sticky_bits() {
        assert_eq!(mode_from_perms("rwsr-xr-x"), 0o4755);
        assert_eq!(mode_from_perms("rwxr-sr-x"), 0o2755);
        assert_eq!(mode_from_perms("rwxrwxrwt"), 0o1777);
        assert_eq!(mode_from_perms("rwSr--r--"), 0o4644);
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let body = "total 12\nsome banner line\n-rw-r--r-- 1 f f 5 Jan  1 10:00 ok";
        let entries = parse_listing(body);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "ok");
    }
}
