//! Inode ↔ remote-path mapping.
//!
//! The kernel speaks inodes; the translation core speaks mount-relative
//! paths. This table is the bridge, with the `nlookup` reference counting
//! the FUSE protocol requires: entries are only evicted when the kernel
//! says it has forgotten them.

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use ftpfs_core::EntryKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Mount-relative path, `/`-rooted.
    pub path: String,
    pub kind: EntryKind,
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: String, kind: EntryKind, nlookup: u64) -> Self {
        InodeEntry {
            path,
            kind,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    fn inc_nlookup(&self) {
        self.nlookup.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by `count`, saturating at zero; returns the new value.
    fn dec_nlookup(&self, count: u64) -> u64 {
        let mut current = self.nlookup.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(count);
            match self.nlookup.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Bidirectional inode table with the root pre-allocated.
pub struct InodeTable {
    by_ino: DashMap<u64, InodeEntry>,
    by_path: DashMap<String, u64>,
    next: AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = InodeTable {
            by_ino: DashMap::new(),
            by_path: DashMap::new(),
            next: AtomicU64::new(ROOT_INODE + 1),
        };
        table.by_ino.insert(
            ROOT_INODE,
            InodeEntry::new("/".to_string(), EntryKind::Directory, 1),
        );
        table.by_path.insert("/".to_string(), ROOT_INODE);
        table
    }

    pub fn get(&self, ino: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.by_ino.get(&ino)
    }

    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.by_path.get(path).map(|r| *r)
    }

    /// Inode for `path`, allocating if needed; bumps `nlookup` (for lookup,
    /// create, mkdir).
    pub fn get_or_insert(&self, path: &str, kind: EntryKind) -> u64 {
        if let Some(ino) = self.get_inode(path) {
            if let Some(entry) = self.by_ino.get(&ino) {
                entry.inc_nlookup();
            }
            return ino;
        }
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        self.by_ino
            .insert(ino, InodeEntry::new(path.to_string(), kind, 1));
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Like [`get_or_insert`](Self::get_or_insert) but without the
    /// `nlookup` bump: readdir entries do not hold kernel references.
    pub fn get_or_insert_no_lookup(&self, path: &str, kind: EntryKind) -> u64 {
        if let Some(ino) = self.get_inode(path) {
            return ino;
        }
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        self.by_ino
            .insert(ino, InodeEntry::new(path.to_string(), kind, 0));
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Kernel dropped `count` references; evict at zero. Root never goes.
    pub fn forget(&self, ino: u64, count: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let path = match self.by_ino.get(&ino) {
            Some(entry) => {
                if entry.dec_nlookup(count) > 0 {
                    return;
                }
                entry.path.clone()
            }
            None => return,
        };
        self.by_ino.remove(&ino);
        // Only drop the path mapping if it still points at us; a new file
        // with the same name may have claimed it.
        self.by_path.remove_if(&path, |_, mapped| *mapped == ino);
    }

    /// Remove the path mapping after a delete. The inode entry stays until
    /// the kernel forgets it.
    pub fn invalidate_path(&self, path: &str) {
        self.by_path.remove(path);
    }

    /// Repoint an inode after a rename.
    pub fn update_path(&self, ino: u64, new_path: &str) {
        if let Some(mut entry) = self.by_ino.get_mut(&ino) {
            let old = std::mem::replace(&mut entry.path, new_path.to_string());
            drop(entry);
            self.by_path.remove_if(&old, |_, mapped| *mapped == ino);
            self.by_path.insert(new_path.to_string(), ino);
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preallocated() {
        let t = InodeTable::new();
        assert_eq!(t.get_inode("/"), Some(ROOT_INODE));
        assert_eq!(t.get(ROOT_INODE).unwrap().path, "/");
    }

    #[test]
    fn get_or_insert_is_stable() {
        let t = InodeTable::new();
        let a = t.get_or_insert("/a.txt", EntryKind::File);
        let b = t.get_or_insert("/a.txt", EntryKind::File);
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INODE);
    }

    #[test]
    fn forget_evicts_at_zero() {
        let t = InodeTable::new();
        let ino = t.get_or_insert("/f", EntryKind::File);
        t.get_or_insert("/f", EntryKind::File); // nlookup = 2
        t.forget(ino, 1);
        assert!(t.get(ino).is_some());
        t.forget(ino, 1);
        assert!(t.get(ino).is_none());
        assert_eq!(t.get_inode("/f"), None);
    }

    #[test]
    fn forget_never_evicts_root() {
        let t = InodeTable::new();
        t.forget(ROOT_INODE, 100);
        assert!(t.get(ROOT_INODE).is_some());
    }

    #[test]
    fn rename_updates_both_mappings() {
        let t = InodeTable::new();
        let ino = t.get_or_insert("/old", EntryKind::File);
        t.update_path(ino, "/new");
        assert_eq!(t.get_inode("/new"), Some(ino));
        assert_eq!(t.get_inode("/old"), None);
        assert_eq!(t.get(ino).unwrap().path, "/new");
    }

    #[test]
    fn invalidate_path_keeps_the_entry_for_the_kernel() {
        let t = InodeTable::new();
        let ino = t.get_or_insert("/gone", EntryKind::File);
        t.invalidate_path("/gone");
        assert_eq!(t.get_inode("/gone"), None);
        assert!(t.get(ino).is_some());
    }
}
