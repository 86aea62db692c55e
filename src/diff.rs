use serde::{Deserialize, Serialize};

use crate::snapshot::ContainerSnapshot;

/// Qualified-name level difference between two snapshots.
///
/// Every list is sorted, so the report itself is deterministic. A removed or
/// changed type breaks consumers compiled against the old snapshot; additions
/// are compatible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn is_breaking(&self) -> bool {
        !self.removed.is_empty() || !self.changed.is_empty()
    }
}

pub fn diff_snapshots(old: &ContainerSnapshot, new: &ContainerSnapshot) -> SnapshotDiff {
    let old = old.fingerprints();
    let new = new.fingerprints();

    let mut diff = SnapshotDiff::default();
    for (name, old_hash) in &old {
        match new.get(name) {
            None => diff.removed.push((*name).to_string()),
            Some(new_hash) if new_hash != old_hash => diff.changed.push((*name).to_string()),
            Some(_) => {}
        }
    }
    for name in new.keys() {
        if !old.contains_key(name) {
            diff.added.push((*name).to_string());
        }
    }
    // BTreeMap iteration already yields sorted names; keep the invariant
    // explicit against future map swaps.
    debug_assert!(diff.added.is_sorted());
    debug_assert!(diff.removed.is_sorted());
    debug_assert!(diff.changed.is_sorted());
    diff
}
