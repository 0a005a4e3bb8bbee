//! Incremental file copy
//!
//! The needs-copy predicate decides staleness from size and mtime alone;
//! the copier streams whole files in bounded chunks so a Stop can abort
//! between chunks, and preserves the source mtime so the predicate stays
//! false across service restarts.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// CIFS and local filesystems round mtimes differently; anything within
/// this window counts as equal.
const MTIME_TOLERANCE: Duration = Duration::from_secs(2);

/// Streaming chunk size. Also the cancellation granularity of one copy.
const COPY_CHUNK: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("copy cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Destination path for `source` mirrored from `source_root` into `dest_root`.
pub fn dest_path(source: &Path, source_root: &Path, dest_root: &Path) -> Option<PathBuf> {
    source
        .strip_prefix(source_root)
        .ok()
        .map(|rel| dest_root.join(rel))
}

/// Whether `source` is stale at the destination.
///
/// True when the destination is missing or unreadable, when sizes differ,
/// or when the destination mtime is more than the tolerance behind the
/// source. Stat failures on either side answer true; the copy itself will
/// then surface (and count) the real error.
pub fn needs_copy(source: &Path, source_root: &Path, dest_root: &Path) -> bool {
    let Some(dest) = dest_path(source, source_root, dest_root) else {
        return true;
    };

    let Ok(dest_meta) = std::fs::metadata(&dest) else {
        return true;
    };
    let Ok(source_meta) = std::fs::metadata(source) else {
        return true;
    };

    if dest_meta.len() != source_meta.len() {
        return true;
    }

    match (dest_meta.modified(), source_meta.modified()) {
        (Ok(dest_mtime), Ok(source_mtime)) => source_mtime
            .checked_sub(MTIME_TOLERANCE)
            .is_some_and(|cutoff| dest_mtime < cutoff),
        _ => true,
    }
}

/// Copy one file whole from `source` into the mirrored location under
/// `dest_root`, creating intermediate directories and carrying the source
/// mtime over. Returns the bytes written.
///
/// Cancellation is observed between chunks; a cancelled copy leaves a
/// partial destination file for the next pass to retry via the size
/// mismatch rule.
pub async fn copy_file(
    source: &Path,
    source_root: &Path,
    dest_root: &Path,
    token: &CancellationToken,
) -> Result<u64, CopyError> {
    let dest = dest_path(source, source_root, dest_root)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source outside source root"))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut reader = tokio::fs::File::open(source).await?;
    let source_meta = reader.metadata().await?;
    let mut writer = tokio::fs::File::create(&dest).await?;

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut written = 0u64;
    loop {
        if token.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    writer.flush().await?;
    drop(writer);

    if let Ok(mtime) = source_meta.modified() {
        let _ = filetime::set_file_mtime(&dest, filetime::FileTime::from_system_time(mtime));
    }

    Ok(written)
}
