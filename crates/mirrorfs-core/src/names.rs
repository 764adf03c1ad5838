//! File name interning.
//!
//! Records store a small [`NameId`] instead of the name itself, which keeps
//! them fixed-size and makes name equality an integer compare. The table is
//! append-only: an id, once handed out, names the same string forever.

use crate::record::NameId;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Thread-safe, append-only string interner.
///
/// Id 0 always holds the empty name. Roots intern their normalized path
/// like any other name.
#[derive(Debug)]
pub struct NameTable {
    ids: DashMap<Arc<str>, NameId>,
    names: RwLock<Vec<Arc<str>>>,
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NameTable {
    /// Creates a table holding only the empty name.
    pub fn new() -> Self {
        let empty: Arc<str> = Arc::from("");
        let ids = DashMap::new();
        ids.insert(Arc::clone(&empty), NameId(0));
        Self {
            ids,
            names: RwLock::new(vec![empty]),
        }
    }

    /// Rebuilds a table from a persisted name list (index = id).
    pub fn from_names(names: Vec<String>) -> Self {
        let table = Self::new();
        {
            let mut list = table.names.write();
            list.clear();
            table.ids.clear();
            for (idx, name) in names.into_iter().enumerate() {
                let name: Arc<str> = Arc::from(name);
                table.ids.entry(Arc::clone(&name)).or_insert(NameId(idx as u32));
                list.push(name);
            }
            if list.is_empty() {
                let empty: Arc<str> = Arc::from("");
                table.ids.insert(Arc::clone(&empty), NameId(0));
                list.push(empty);
            }
        }
        table
    }

    /// Returns the id for `name`, assigning a new one on first sight.
    pub fn intern(&self, name: &str) -> NameId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }

        // Push under the vector lock so concurrent interns of the same
        // name agree on a single id.
        let mut names = self.names.write();
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = NameId(names.len() as u32);
        let name: Arc<str> = Arc::from(name);
        names.push(Arc::clone(&name));
        self.ids.insert(name, id);
        id
    }

    /// Returns the name for `id`.
    pub fn name(&self, id: NameId) -> Option<Arc<str>> {
        self.names.read().get(id.0 as usize).cloned()
    }

    /// Looks up an id without interning.
    pub fn lookup(&self, name: &str) -> Option<NameId> {
        self.ids.get(name).map(|r| *r)
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    /// True if only the empty name is present.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Persistable copy of the name list.
    pub fn to_names(&self) -> Vec<String> {
        self.names.read().iter().map(|n| n.to_string()).collect()
    }
}
