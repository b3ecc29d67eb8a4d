//! Directory-tree reconstruction from parent pointers gathered during the scan.

use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::mft::ROOT_RECORD_NUMBER;

/// Prefix for directories whose chain never reaches the root.
pub const ORPHAN_PREFIX: &str = "$ORPHANFILE";
pub const SEPARATOR: char = '\\';

/// A directory record seen during the scan, not yet placed in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDirectory {
    pub record_number: u64,
    pub name: String,
    pub parent_record: u64,
}

/// Collects directory records while the MFT is read front to back.
#[derive(Debug, Default)]
pub struct DirectoryCollector {
    pending: BTreeMap<u64, UnresolvedDirectory>,
}

impl DirectoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, dir: UnresolvedDirectory) {
        self.pending.insert(dir.record_number, dir);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolve every collected directory into a full path.
    ///
    /// `volume` is the drive letter; the root resolves to `"<letter>:"`.
    pub fn resolve(self, volume: &str) -> DirectoryTree {
        let root = volume_root(volume);
        let mut paths: HashMap<u64, String> = HashMap::with_capacity(self.pending.len() + 1);
        paths.insert(ROOT_RECORD_NUMBER, root);

        // Never walk further than there are entries: anything longer is a loop.
        let max_depth = self.pending.len() + 1;
        let mut cyclic: Vec<(u64, String)> = Vec::new();

        for &record in self.pending.keys() {
            if paths.contains_key(&record) {
                continue;
            }
            match self.resolve_one(record, &mut paths, max_depth) {
                Some(path) => {
                    paths.insert(record, path);
                }
                None => {
                    warn!(
                        "Directory {} has a cyclic parent chain, marking it orphaned",
                        record
                    );
                    cyclic.push((record, orphan(&self.pending[&record].name)));
                }
            }
        }
        // kept apart until the end so no other entry builds on a broken chain
        paths.extend(cyclic);

        debug!("Resolved {} directories", paths.len());
        DirectoryTree { paths }
    }

    /// Walk up from `record` and cache every directory on the way down.
    /// Returns `None` when the chain loops.
    fn resolve_one(
        &self,
        record: u64,
        paths: &mut HashMap<u64, String>,
        max_depth: usize,
    ) -> Option<String> {
        let mut chain: Vec<&UnresolvedDirectory> = Vec::new();
        let mut seen = HashSet::new();
        let mut current = record;

        let mut path = loop {
            if let Some(known) = paths.get(&current) {
                break known.clone();
            }
            let Some(dir) = self.pending.get(&current) else {
                // the topmost directory points at a parent we never saw
                let top = chain.pop()?;
                let path = orphan(&top.name);
                paths.insert(top.record_number, path.clone());
                break path;
            };
            if !seen.insert(current) || chain.len() >= max_depth {
                return None;
            }
            chain.push(dir);
            current = dir.parent_record;
        };

        for dir in chain.into_iter().rev() {
            path = join(&path, &dir.name);
            paths.insert(dir.record_number, path.clone());
        }
        Some(path)
    }
}

/// `"C"` or `"C:"` to `"C:"`.
pub fn volume_root(volume: &str) -> String {
    format!("{}:", volume.trim_end_matches(':'))
}

fn orphan(name: &str) -> String {
    format!("{}{}{}", ORPHAN_PREFIX, SEPARATOR, name)
}

pub fn join(parent: &str, name: &str) -> String {
    format!("{}{}{}", parent, SEPARATOR, name)
}

/// Record number to absolute directory path. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct DirectoryTree {
    paths: HashMap<u64, String>,
}

impl DirectoryTree {
    pub fn get(&self, record: u64) -> Option<&str> {
        self.paths.get(&record).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.paths.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl FromIterator<(u64, String)> for DirectoryTree {
    fn from_iter<I: IntoIterator<Item = (u64, String)>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}
