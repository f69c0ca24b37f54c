//! Metadata caches in front of getattr/getdir.
//!
//! Every stat over FTP costs a full directory listing, so attributes and
//! listings are cached with a TTL tuned for network latency. Mutating
//! operations invalidate the affected entries.

use dashmap::DashMap;
use fuser::FileAttr;
use ftpfs_core::RemoteStat;
use std::time::{Duration, Instant};

/// Default time-to-live for cached attributes and listings.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(60);

/// TTL-stamped value.
struct Cached<T> {
    value: T,
    stored: Instant,
}

/// Per-inode attribute cache.
pub struct AttrCache {
    entries: DashMap<u64, Cached<FileAttr>>,
    ttl: Duration,
}

impl AttrCache {
    pub fn new(ttl: Duration) -> Self {
        AttrCache {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, ino: u64) -> Option<FileAttr> {
        let entry = self.entries.get(&ino)?;
        if entry.stored.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&ino);
            return None;
        }
        Some(entry.value)
    }

    pub fn insert(&self, ino: u64, attr: FileAttr) {
        self.entries.insert(
            ino,
            Cached {
                value: attr,
                stored: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, ino: u64) {
        self.entries.remove(&ino);
    }
}

/// Per-directory listing cache, keyed by the directory's inode.
pub struct DirCache {
    entries: DashMap<u64, Cached<Vec<(String, RemoteStat)>>>,
    ttl: Duration,
}

impl DirCache {
    pub fn new(ttl: Duration) -> Self {
        DirCache {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, ino: u64) -> Option<Vec<(String, RemoteStat)>> {
        let entry = self.entries.get(&ino)?;
        if entry.stored.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&ino);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Look a single name up in the cached listing, if the listing is warm.
    pub fn lookup(&self, ino: u64, name: &str) -> Option<RemoteStat> {
        let listing = self.get(ino)?;
        listing
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, st)| st.clone())
    }

    pub fn insert(&self, ino: u64, listing: Vec<(String, RemoteStat)>) {
        self.entries.insert(
            ino,
            Cached {
                value: listing,
                stored: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, ino: u64) {
        self.entries.remove(&ino);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftpfs_core::EntryKind;
    use fuser::FileType;
    use std::time::SystemTime;

    fn attr(ino: u64) -> FileAttr {
        FileAttr {
            ino,
            size: 42,
            blocks: 1,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
            crtime: SystemTime::UNIX_EPOCH,
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    fn stat() -> RemoteStat {
        RemoteStat {
            kind: EntryKind::File,
            perm: 0o644,
            size: 7,
            mtime: None,
            nlink: 1,
            link_target: None,
        }
    }

    #[test]
    fn attr_cache_round_trip_and_invalidate() {
        let cache = AttrCache::new(Duration::from_secs(60));
        assert!(cache.get(2).is_none());
        cache.insert(2, attr(2));
        assert_eq!(cache.get(2).unwrap().size, 42);
        cache.invalidate(2);
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn attr_cache_expires() {
        let cache = AttrCache::new(Duration::ZERO);
        cache.insert(2, attr(2));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn dir_cache_lookup_by_name() {
        let cache = DirCache::new(Duration::from_secs(60));
        cache.insert(1, vec![("a.txt".to_string(), stat())]);
        assert_eq!(cache.lookup(1, "a.txt").unwrap().size, 7);
        assert!(cache.lookup(1, "b.txt").is_none());
        assert!(cache.lookup(9, "a.txt").is_none());
    }
}
