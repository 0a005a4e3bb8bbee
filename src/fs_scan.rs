//! Source subtree enumeration
//!
//! Depth-first scan of one (node, share) project directory. System
//! directories are skipped by basename, unreadable subtrees contribute
//! nothing, and cancellation is polled on every entry so a scan over a
//! dead CIFS mount unwinds as soon as the walker yields.

use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Directory basenames never worth copying, matched case-insensitively.
const EXCLUDED_DIRS: &[&str] = &[
    "System Volume Information",
    "RECYCLER",
    "RECYCLED",
    "$RECYCLE.BIN",
    ".git",
    ".svn",
    "node_modules",
];

pub fn is_excluded_dir(name: &str) -> bool {
    EXCLUDED_DIRS.iter().any(|ex| name.eq_ignore_ascii_case(ex))
}

/// Enumerate regular files under `root`.
///
/// An unreadable `root` is an error; an unreadable subdirectory is silently
/// skipped. When `token` fires mid-walk the files gathered so far are
/// returned.
pub fn scan_files(root: &Path, token: &CancellationToken) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() > 0
                && e.file_type().is_dir()
                && e.file_name().to_str().is_some_and(is_excluded_dir))
        });

    for entry in walker {
        if token.is_cancelled() {
            break;
        }
        match entry {
            Ok(e) if e.file_type().is_file() => files.push(e.into_path()),
            Ok(_) => {}
            // The root itself must be readable; anything deeper just
            // drops out of the listing.
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(_) => {}
        }
    }

    Ok(files)
}
