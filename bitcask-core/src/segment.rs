//! Segment store: owns segment files, appends to the active segment, reads entries at
//! `(fid, off)`, and rotates when the active segment crosses its size threshold.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::codec::{decode_header, decode_payload, verify_crc, Entry, HEADER_SIZE};
use crate::dirutil::segment_path;
use crate::error::{BitcaskError, BitcaskResult};
use crate::keydir::Index;

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Opens (optionally creating) the segment file for `fid` inside `dir`.
fn open_segment_file(dir: &Path, fid: u64, create: bool) -> BitcaskResult<File> {
    let path = segment_path(dir, fid);
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .open(&path)
        .map_err(|e| BitcaskError::io_at(path, e))
}

/// Reads and decodes one entry at `(fid, off)` directly from an open file handle, without
/// needing a fully assembled `SegmentStore`. Used both by `SegmentStore::read_entry` (via
/// its handle cache) and by recovery, which scans segments before the store (and hence its
/// notion of which fid is active) exists.
pub(crate) fn scan_entry(file: &File, fid: u64, off: u64) -> BitcaskResult<Entry> {
    let mut header_buf = [0u8; HEADER_SIZE];
    let n = pread(file, &mut header_buf, off).map_err(BitcaskError::from)?;
    if n < HEADER_SIZE {
        return Err(BitcaskError::ShortRead {
            fid,
            off,
            expected: HEADER_SIZE,
            actual: n,
        });
    }
    let header = decode_header(&header_buf);

    if header.is_tombstone() {
        return Err(BitcaskError::Tombstone {
            fid,
            off,
            len: header.entry_len(),
        });
    }

    let mut payload_buf = vec![0u8; header.payload_len()];
    let n = pread(file, &mut payload_buf, off + HEADER_SIZE as u64).map_err(BitcaskError::from)?;
    if n < payload_buf.len() {
        return Err(BitcaskError::ShortRead {
            fid,
            off: off + HEADER_SIZE as u64,
            expected: payload_buf.len(),
            actual: n,
        });
    }
    let (key, value) = decode_payload(&header, &payload_buf);
    verify_crc(&header, &key, &value).map_err(|actual| BitcaskError::CorruptEntry {
        fid,
        off,
        expected: header.crc,
        actual,
    })?;
    Ok(Entry { header, key, value })
}

/// The current write target: the highest-fid segment.
struct ActiveSegment {
    fid: u64,
    file: Arc<File>,
    off: u64,
}

/// Owns the directory, the rotation threshold, the per-fid file-handle cache, and the
/// active segment. Reads and writes are positional (`pread`/`pwrite`-style), so concurrent
/// readers sharing a cached handle never race a shared seek cursor.
pub struct SegmentStore {
    dir: PathBuf,
    segment_size: u64,
    sync_on_write: bool,
    handles: Mutex<HashMap<u64, Arc<File>>>,
    active: ActiveSegment,
}

impl SegmentStore {
    /// Creates a brand new store: directory is created if absent, with a fresh active
    /// segment at `fid = 0`.
    pub fn create(dir: PathBuf, segment_size: u64, sync_on_write: bool) -> BitcaskResult<Self> {
        fs::create_dir_all(&dir).map_err(|e| BitcaskError::io_at(&dir, e))?;
        let file = Arc::new(open_segment_file(&dir, 0, true)?);
        let mut handles = HashMap::new();
        handles.insert(0, Arc::clone(&file));
        Ok(SegmentStore {
            dir,
            segment_size,
            sync_on_write,
            handles: Mutex::new(handles),
            active: ActiveSegment {
                fid: 0,
                file,
                off: 0,
            },
        })
    }

    /// Assembles a store from a recovery scan: `handles` already contains every fid's open
    /// file, `active_fid`/`active_off` name the segment that continues accepting appends.
    pub(crate) fn from_recovered(
        dir: PathBuf,
        segment_size: u64,
        sync_on_write: bool,
        mut handles: HashMap<u64, Arc<File>>,
        active_fid: u64,
        active_off: u64,
    ) -> BitcaskResult<Self> {
        let active_file = match handles.remove(&active_fid) {
            Some(f) => f,
            None => Arc::new(open_segment_file(&dir, active_fid, true)?),
        };
        handles.insert(active_fid, Arc::clone(&active_file));
        Ok(SegmentStore {
            dir,
            segment_size,
            sync_on_write,
            handles: Mutex::new(handles),
            active: ActiveSegment {
                fid: active_fid,
                file: active_file,
                off: active_off,
            },
        })
    }

    /// Opens (and caches) the file for `fid`, used by the recovery scan to populate the
    /// handle cache it eventually hands to [`SegmentStore::from_recovered`].
    pub(crate) fn open_for_scan(dir: &Path, fid: u64) -> BitcaskResult<Arc<File>> {
        Ok(Arc::new(open_segment_file(dir, fid, true)?))
    }

    fn handle_for(&self, fid: u64) -> BitcaskResult<Arc<File>> {
        let mut handles = self.handles.lock();
        if let Some(f) = handles.get(&fid) {
            return Ok(Arc::clone(f));
        }
        let file = Arc::new(open_segment_file(&self.dir, fid, true)?);
        handles.insert(fid, Arc::clone(&file));
        Ok(file)
    }

    /// Positional read into a caller-supplied buffer. Opens and caches the fid's handle on
    /// first access.
    pub fn read_at(&self, fid: u64, off: u64, buf: &mut [u8]) -> BitcaskResult<()> {
        let file = self.handle_for(fid)?;
        let n = pread(&file, buf, off).map_err(|e| BitcaskError::io_at(segment_path(&self.dir, fid), e))?;
        if n < buf.len() {
            return Err(BitcaskError::ShortRead {
                fid,
                off,
                expected: buf.len(),
                actual: n,
            });
        }
        Ok(())
    }

    /// Appends `bytes` to the active segment in a single positional write. Returns an
    /// `Index` whose `fid`/`off` point at the *start* of the just-written record (timestamp
    /// and sizes are left zeroed; the caller (`Database::set`/`delete`) fills them in).
    /// Rotates if the post-write offset reaches the threshold.
    pub fn append(&mut self, bytes: &[u8]) -> BitcaskResult<Index> {
        let fid = self.active.fid;
        let off = self.active.off;

        let n = pwrite(&self.active.file, bytes, off)
            .map_err(|e| BitcaskError::io_at(segment_path(&self.dir, fid), e))?;
        if n < bytes.len() {
            return Err(BitcaskError::ShortWrite {
                fid,
                expected: bytes.len(),
                actual: n,
            });
        }
        if self.sync_on_write {
            self.active
                .file
                .sync_data()
                .map_err(|e| BitcaskError::io_at(segment_path(&self.dir, fid), e))?;
        }
        self.active.off += bytes.len() as u64;
        trace!(fid, off, len = bytes.len(), "appended entry");

        if self.active.off >= self.segment_size {
            self.rotate()?;
        }

        Ok(Index {
            fid,
            off,
            timestamp: 0,
            key_size: 0,
            value_size: 0,
        })
    }

    /// Reads one entry at `(fid, off)`. Returns `Tombstone` (carrying the entry's on-disk
    /// length) if the entry is a delete marker, without erroring.
    pub fn read_entry(&self, fid: u64, off: u64) -> BitcaskResult<Entry> {
        let file = self.handle_for(fid)?;
        scan_entry(&file, fid, off)
    }

    /// Single positional read of a preallocated buffer sized `29 + keySize + valueSize`
    /// (the caller knows the sizes from the key directory).
    pub fn read_full_entry(&self, fid: u64, off: u64, buf: &mut [u8]) -> BitcaskResult<Entry> {
        self.read_at(fid, off, buf)?;
        let header = decode_header(&buf[0..HEADER_SIZE]);
        let (key, value) = decode_payload(&header, &buf[HEADER_SIZE..]);
        verify_crc(&header, &key, &value).map_err(|actual| BitcaskError::CorruptEntry {
            fid,
            off,
            expected: header.crc,
            actual,
        })?;
        Ok(Entry { header, key, value })
    }

    /// Creates segment `active.fid + 1`, opens it create+read-write, caches its handle, and
    /// makes it the new active segment. The new path is derived directly from the new fid
    /// (not from a stale reference to the about-to-be-replaced active segment).
    pub fn rotate(&mut self) -> BitcaskResult<()> {
        let new_fid = self.active.fid + 1;
        let file = Arc::new(open_segment_file(&self.dir, new_fid, true)?);
        self.handles.lock().insert(new_fid, Arc::clone(&file));
        self.active = ActiveSegment {
            fid: new_fid,
            file,
            off: 0,
        };
        info!(fid = new_fid, "rotated active segment");
        Ok(())
    }

    /// Evicts `fid`'s cached handle and deletes its file, used by merge once every live
    /// record in that segment has been copied forward.
    pub fn delete_segment(&mut self, fid: u64) -> BitcaskResult<()> {
        self.handles.lock().remove(&fid);
        let path = segment_path(&self.dir, fid);
        fs::remove_file(&path).map_err(|e| BitcaskError::io_at(path, e))?;
        debug!(fid, "deleted merged segment");
        Ok(())
    }

    /// Closes all cached file handles. Idempotent.
    pub fn close(&mut self) {
        self.handles.lock().clear();
    }

    pub fn active_fid(&self) -> u64 {
        self.active.fid
    }

    pub fn active_off(&self) -> u64 {
        self.active.off
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Entry as CodecEntry;

    fn store(segment_size: u64) -> (tempfile::TempDir, SegmentStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(tmp.path().to_path_buf(), segment_size, false).unwrap();
        (tmp, store)
    }

    #[test]
    fn append_returns_pre_advance_offset_and_advances_active() {
        let (_tmp, mut store) = store(1024);
        let entry = CodecEntry::new_live(b"k1".to_vec(), b"v1".to_vec(), 1);
        let buf = entry.encode();

        let idx = store.append(&buf).unwrap();
        assert_eq!(idx.fid, 0);
        assert_eq!(idx.off, 0);
        assert_eq!(store.active_off(), buf.len() as u64);

        let entry2 = CodecEntry::new_live(b"k2".to_vec(), b"v2".to_vec(), 2);
        let buf2 = entry2.encode();
        let idx2 = store.append(&buf2).unwrap();
        assert_eq!(idx2.off, buf.len() as u64);
    }

    #[test]
    fn append_rotates_when_threshold_is_reached() {
        let (_tmp, mut store) = store(8);
        let entry = CodecEntry::new_live(b"k".to_vec(), b"v".to_vec(), 1);
        let buf = entry.encode();
        assert!(buf.len() as u64 >= 8);

        store.append(&buf).unwrap();
        assert_eq!(store.active_fid(), 1);
        assert_eq!(store.active_off(), 0);
    }

    #[test]
    fn read_entry_roundtrips_a_live_record() {
        let (_tmp, mut store) = store(1024);
        let entry = CodecEntry::new_live(b"key".to_vec(), b"value".to_vec(), 9);
        let buf = entry.encode();
        let idx = store.append(&buf).unwrap();

        let read_back = store.read_entry(idx.fid, idx.off).unwrap();
        assert_eq!(read_back.key, b"key");
        assert_eq!(read_back.value, b"value");
    }

    #[test]
    fn read_entry_reports_tombstone_with_its_length() {
        let (_tmp, mut store) = store(1024);
        let entry = CodecEntry::new_tombstone(b"key".to_vec(), 9);
        let buf = entry.encode();
        let idx = store.append(&buf).unwrap();

        match store.read_entry(idx.fid, idx.off) {
            Err(BitcaskError::Tombstone { len, .. }) => assert_eq!(len, buf.len()),
            other => panic!("expected Tombstone, got {other:?}"),
        }
    }

    #[test]
    fn read_full_entry_matches_read_entry() {
        let (_tmp, mut store) = store(1024);
        let entry = CodecEntry::new_live(b"k".to_vec(), b"value-bytes".to_vec(), 4);
        let buf = entry.encode();
        let idx = store.append(&buf).unwrap();

        let mut full_buf = vec![0u8; buf.len()];
        let read_back = store
            .read_full_entry(idx.fid, idx.off, &mut full_buf)
            .unwrap();
        assert_eq!(read_back.value, b"value-bytes");
    }

    #[test]
    fn rotate_creates_the_next_fid_not_the_stale_active_path() {
        let (tmp, mut store) = store(1024);
        store.rotate().unwrap();
        assert_eq!(store.active_fid(), 1);
        assert!(tmp.path().join("1.dat").exists());
        // The old segment file must still exist untouched; rotate must not have reopened it.
        assert!(tmp.path().join("0.dat").exists());
    }

    #[test]
    fn delete_segment_removes_file_and_cache_entry() {
        let (tmp, mut store) = store(1024);
        store.rotate().unwrap();
        store.delete_segment(0).unwrap();
        assert!(!tmp.path().join("0.dat").exists());
    }

    #[test]
    fn corrupted_entry_is_reported_with_expected_and_actual_crc() {
        let (tmp, mut store) = store(1024);
        let entry = CodecEntry::new_live(b"k".to_vec(), b"v".to_vec(), 1);
        let buf = entry.encode();
        let idx = store.append(&buf).unwrap();
        store.close();
        drop(store);

        // Flip a byte in the value on disk, bypassing the store's own write path.
        let path = segment_path(tmp.path(), idx.fid);
        let mut raw = fs::read(&path).unwrap();
        *raw.last_mut().unwrap() ^= 0xFF;
        fs::write(&path, raw).unwrap();

        let mut handles = HashMap::new();
        handles.insert(0, SegmentStore::open_for_scan(tmp.path(), 0).unwrap());
        let reopened = SegmentStore::from_recovered(
            tmp.path().to_path_buf(),
            1024,
            false,
            handles,
            0,
            buf.len() as u64,
        )
        .unwrap();
        match reopened.read_entry(idx.fid, idx.off) {
            Err(BitcaskError::CorruptEntry { .. }) => {}
            other => panic!("expected CorruptEntry, got {other:?}"),
        }
    }
}
