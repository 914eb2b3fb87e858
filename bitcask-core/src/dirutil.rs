//! Directory utilities: enumerate segment files by numeric id and resolve segment paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_SEGMENT_SIZE;
use crate::error::{BitcaskError, BitcaskResult};

/// Suffix every segment file carries.
pub const SEGMENT_SUFFIX: &str = "dat";

/// Builds the path for segment `fid` within `dir`: `<dir>/<fid>.dat`.
pub fn segment_path(dir: &Path, fid: u64) -> PathBuf {
    dir.join(format!("{fid}.{SEGMENT_SUFFIX}"))
}

/// Non-recursive listing of every `<fid>.dat` file directly inside `dir`. Entries whose
/// stem does not parse as a non-negative integer, or that are not regular files, are
/// skipped. The returned list is unsorted; callers sort as needed.
pub fn list_segment_fids(dir: &Path) -> BitcaskResult<Vec<u64>> {
    let mut fids = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| BitcaskError::io_at(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BitcaskError::io_at(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_SUFFIX) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(fid) = stem.parse::<u64>() {
            fids.push(fid);
        }
    }
    Ok(fids)
}

/// True if a directory entry exists at `dir`; false if it's simply absent. Other stat
/// errors (e.g. permission denied) are surfaced rather than folded into `false`.
pub fn directory_exists(dir: &Path) -> BitcaskResult<bool> {
    match fs::metadata(dir) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BitcaskError::io_at(dir, e)),
    }
}

/// Resolves the configured segment size: non-positive values fall back to
/// [`DEFAULT_SEGMENT_SIZE`].
pub fn resolve_segment_size(configured: i64) -> u64 {
    if configured <= 0 {
        DEFAULT_SEGMENT_SIZE as u64
    } else {
        configured as u64
    }
}
