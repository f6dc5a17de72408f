//! Disk housekeeping for the raw-image archive.
//!
//! Once a day, at local noon, the housekeeper checks the free space under
//! the raw-image root and deletes the oldest nightly directories (those
//! carrying the configured prefix) until the free-space floor is honoured
//! again.

use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Free capacity in whole GB on the filesystem holding `path`.
pub fn free_gb(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    let canonical = path.canonicalize().ok()?;
    disks
        .iter()
        .filter(|d| canonical.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space() >> 30)
}

/// Nightly directories under `root` beginning with `prefix`, oldest first.
/// The date-stamped naming makes lexicographic order chronological.
pub fn prefixed_dirs_oldest_first(root: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .into_iter()
        .flatten()
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

/// Delete oldest prefixed directories until `min_free_gb` is available.
/// Returns the number of directories removed.
pub fn reclaim(root: &Path, prefix: &str, min_free_gb: u64) -> usize {
    let Some(free) = free_gb(root) else {
        log::warn!("housekeeper: cannot stat free space under {}", root.display());
        return 0;
    };
    if free > min_free_gb {
        return 0;
    }
    log::warn!(
        "free disk capacity [{}] GB is under the {} GB floor, erasing oldest data",
        free,
        min_free_gb
    );

    let mut removed = 0;
    for dir in prefixed_dirs_oldest_first(root, prefix) {
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                removed += 1;
                log::info!("housekeeper: erased {}", dir.display());
            }
            Err(e) => log::error!("housekeeper: {}: {}", dir.display(), e),
        }
        if free_gb(root).map(|g| g > min_free_gb).unwrap_or(true) {
            break;
        }
    }
    if let Some(free) = free_gb(root) {
        log::info!("disk erasing complete, free capacity is {} GB", free);
    }
    removed
}
