//! Manifest reconciliation.
//!
//! Given the manifest of a source tree and the manifest of a destination
//! tree, [`diff`] decides which paths must be transferred and which must be
//! deleted for the destination to mirror the source. Pure, no I/O.

use std::cmp::Reverse;

use canopy_types::Manifest;

/// What it takes to make a destination match a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Paths to transfer, largest source file first.
    pub to_add: Vec<String>,
    /// Paths present only at the destination.
    pub to_remove: Vec<String>,
}

impl SyncPlan {
    /// True if the two trees already match.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Reconcile `src` against `dest`.
///
/// `to_remove` holds every path of `dest` missing from `src`. `to_add` holds
/// every path of `src` missing from `dest`, plus common paths whose records
/// differ in size, hash or link target. `to_add` is ordered by descending
/// source size, equal sizes in path order, so the largest transfers (and
/// their failures) come first.
pub fn diff(src: &Manifest, dest: &Manifest) -> SyncPlan {
    let to_remove = dest
        .paths()
        .filter(|path| !src.contains(path))
        .map(str::to_owned)
        .collect();

    let mut sized: Vec<(i64, &str)> = src
        .records()
        .filter(|record| match dest.get(&record.path) {
            Some(existing) => !record.same_content(existing),
            None => true,
        })
        .map(|record| (record.size, record.path.as_str()))
        .collect();
    // Stable sort: source iteration is already in path order.
    sized.sort_by_key(|(size, _)| Reverse(*size));

    SyncPlan {
        to_add: sized.into_iter().map(|(_, path)| path.to_owned()).collect(),
        to_remove,
    }
}
