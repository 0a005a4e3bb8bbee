//! Destination disk space
//!
//! The sync loop refuses to dispatch new per-source tasks when the
//! destination filesystem is close to full. Resolution walks the mounted
//! disk list for the longest mount-point prefix of the destination path.

use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Free bytes on the filesystem holding `path`, or `None` when the path
/// cannot be matched to a mounted disk.
pub fn free_space(path: &Path) -> Option<u64> {
    let resolved: PathBuf = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());

    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| resolved.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

/// Disk-space precondition for dispatching a task. Passes when at least
/// `min_free + safety_margin` bytes are free, and also when the disk
/// cannot be resolved (an unresolvable destination fails loudly at copy
/// time instead).
pub fn has_room(dest: &Path, min_free: u64, safety_margin: u64) -> bool {
    match free_space(dest) {
        Some(free) => free >= min_free.saturating_add(safety_margin),
        None => true,
    }
}
