//! Database facade: coordinates `Set`/`Get`/`Delete`/`Merge` under one reader-writer lock
//! and orchestrates crash recovery on open.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::codec::Entry;
use crate::config::Options;
use crate::dirutil::{directory_exists, list_segment_fids};
use crate::error::{BitcaskError, BitcaskResult};
use crate::keydir::{Index, KeyDirectory};
use crate::segment::{self, SegmentStore};

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct Inner {
    keydir: KeyDirectory,
    segments: SegmentStore,
}

/// An embedded, persistent key-value store following the log-structured Bitcask model.
///
/// All writes are appended to an active segment file; an in-memory key directory maps
/// every live key to its most recent on-disk record; `merge` reclaims space by rewriting
/// only live records from older segments.
pub struct Database {
    inner: RwLock<Inner>,
}

impl Database {
    /// Opens a database at `options.dir`. If the directory already exists, runs recovery
    /// to rebuild the key directory from disk; otherwise creates a fresh store with an
    /// active segment at fid 0.
    pub fn open(options: Options) -> BitcaskResult<Self> {
        options.validate()?;
        let segment_size = options.resolved_segment_size();

        if directory_exists(&options.dir)? {
            info!(dir = %options.dir.display(), "recovering existing database");
            Self::recover(options.dir, segment_size, options.sync_on_write)
        } else {
            info!(dir = %options.dir.display(), "creating new database");
            let segments = SegmentStore::create(options.dir, segment_size, options.sync_on_write)?;
            Ok(Database {
                inner: RwLock::new(Inner {
                    keydir: KeyDirectory::new(),
                    segments,
                }),
            })
        }
    }

    /// Scans every segment in ascending fid order, rebuilding the key directory, then
    /// designates the highest-fid file as the active segment.
    fn recover(dir: PathBuf, segment_size: u64, sync_on_write: bool) -> BitcaskResult<Self> {
        let mut fids = list_segment_fids(&dir)?;
        fids.sort_unstable();

        let mut keydir = KeyDirectory::new();
        let mut handles = HashMap::new();
        let mut last_fid = 0u64;
        let mut last_off = 0u64;

        for &fid in &fids {
            let file = SegmentStore::open_for_scan(&dir, fid)?;
            let mut off = 0u64;
            loop {
                match segment::scan_entry(&file, fid, off) {
                    Ok(entry) => {
                        let len = entry.size();
                        keydir.update(
                            entry.key.clone(),
                            Index {
                                fid,
                                off,
                                timestamp: entry.header.timestamp,
                                key_size: entry.header.key_size,
                                value_size: entry.header.value_size,
                            },
                        );
                        off += len as u64;
                    }
                    Err(BitcaskError::Tombstone { len, .. }) => {
                        // Advance past the tombstone and drop the key from the directory.
                        keydir.remove(&peek_tombstone_key(&file, fid, off, len)?);
                        off += len as u64;
                    }
                    Err(BitcaskError::ShortRead { actual: 0, .. }) => break,
                    Err(e) => {
                        error!(fid, off, error = %e, "recovery aborted: unrecoverable entry");
                        return Err(e);
                    }
                }
            }
            handles.insert(fid, file);
            last_fid = fid;
            last_off = off;
        }

        let segments =
            SegmentStore::from_recovered(dir, segment_size, sync_on_write, handles, last_fid, last_off)?;

        info!(
            active_fid = last_fid,
            active_off = last_off,
            keys = keydir.len(),
            "recovery complete"
        );

        Ok(Database {
            inner: RwLock::new(Inner { keydir, segments }),
        })
    }

    /// Writes `value` for `key`, replacing any prior value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> BitcaskResult<()> {
        let mut inner = self.inner.write();
        let timestamp = now_ts();
        let entry = Entry::new_live(key.to_vec(), value.to_vec(), timestamp);
        let encoded = entry.encode();

        let mut index = inner.segments.append(&encoded)?;
        index.timestamp = timestamp;
        index.key_size = key.len() as u32;
        index.value_size = value.len() as u32;
        inner.keydir.update(key.to_vec(), index);
        Ok(())
    }

    /// Reads the current value of `key`. Fails with `KeyNotFound` if absent.
    pub fn get(&self, key: &[u8]) -> BitcaskResult<Vec<u8>> {
        let inner = self.inner.read();
        let index = inner.keydir.find(key).ok_or(BitcaskError::KeyNotFound)?;
        let mut buf = vec![0u8; index.entry_len()];
        let entry = inner.segments.read_full_entry(index.fid, index.off, &mut buf)?;
        Ok(entry.value)
    }

    /// Appends a tombstone for `key` and removes it from the key directory. Deleting an
    /// absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> BitcaskResult<()> {
        let mut inner = self.inner.write();
        let entry = Entry::new_tombstone(key.to_vec(), now_ts());
        let encoded = entry.encode();
        inner.segments.append(&encoded)?;
        inner.keydir.remove(key);
        Ok(())
    }

    /// Rewrites every live record from every non-active segment into the active segment,
    /// then deletes the now-empty source segments. Fails with `NothingToMerge` if fewer
    /// than two segments exist.
    pub fn merge(&self) -> BitcaskResult<()> {
        let mut inner = self.inner.write();

        let mut fids = list_segment_fids(inner.segments.dir())?;
        if fids.len() < 2 {
            return Err(BitcaskError::NothingToMerge);
        }
        fids.sort_unstable();
        let active_fid = *fids.last().expect("checked len >= 2 above");
        let source_fids = &fids[..fids.len() - 1];

        for &fid in source_fids {
            let mut off = 0u64;
            loop {
                match inner.segments.read_entry(fid, off) {
                    Ok(entry) => {
                        let len = entry.size();
                        let authoritative = inner
                            .keydir
                            .find(&entry.key)
                            .map(|idx| idx.fid == fid && idx.off == off)
                            .unwrap_or(false);

                        if authoritative {
                            let rewritten = Entry::new_live(
                                entry.key.clone(),
                                entry.value.clone(),
                                entry.header.timestamp,
                            );
                            let encoded = rewritten.encode();
                            let mut new_index = inner.segments.append(&encoded)?;
                            new_index.timestamp = entry.header.timestamp;
                            new_index.key_size = entry.header.key_size;
                            new_index.value_size = entry.header.value_size;
                            inner.keydir.update(entry.key, new_index);
                        }
                        off += len as u64;
                    }
                    Err(BitcaskError::Tombstone { len, .. }) => {
                        off += len as u64;
                    }
                    Err(BitcaskError::ShortRead { actual: 0, .. }) => break,
                    Err(e) => {
                        error!(fid, off, error = %e, "merge aborted: unrecoverable entry");
                        return Err(e);
                    }
                }
            }
            inner.segments.delete_segment(fid)?;
        }

        info!(active_fid, merged = source_fids.len(), "merge complete");
        Ok(())
    }

    /// Closes all cached file handles. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        inner.segments.close();
        warn!("database closed");
    }
}

/// Recovery's tombstone branch needs the key to remove it from the directory, but the
/// `Tombstone` error intentionally doesn't carry it (keeping the error small); re-decode
/// just the key bytes directly.
fn peek_tombstone_key(
    file: &std::fs::File,
    fid: u64,
    off: u64,
    len: usize,
) -> BitcaskResult<Vec<u8>> {
    use crate::codec::{decode_header, decode_payload, HEADER_SIZE};
    let mut header_buf = [0u8; HEADER_SIZE];
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_at(&mut header_buf, off)?;
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        file.seek_read(&mut header_buf, off)?;
    }
    let header = decode_header(&header_buf);
    let mut payload_buf = vec![0u8; len - HEADER_SIZE];
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_at(&mut payload_buf, off + HEADER_SIZE as u64)?;
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        file.seek_read(&mut payload_buf, off + HEADER_SIZE as u64)?;
    }
    let (key, _value) = decode_payload(&header, &payload_buf);
    Ok(key)
}
