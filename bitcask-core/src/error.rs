use std::path::PathBuf;
use thiserror::Error;

/// The result type returned by every fallible operation in this crate.
pub type BitcaskResult<T> = Result<T, BitcaskError>;

/// Enum representing possible errors within the bitcask-core library.
#[derive(Error, Debug)]
pub enum BitcaskError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("key not found")]
    KeyNotFound,

    #[error("nothing to merge: fewer than two segments present")]
    NothingToMerge,

    #[error("corrupt entry at fid {fid}, offset {off}: crc mismatch (expected {expected:#010x}, got {actual:#010x})")]
    CorruptEntry {
        fid: u64,
        off: u64,
        expected: u32,
        actual: u32,
    },

    #[error("short read at fid {fid}, offset {off}: expected {expected} bytes, got {actual}")]
    ShortRead {
        fid: u64,
        off: u64,
        expected: usize,
        actual: usize,
    },

    #[error("short write to fid {fid}: expected {expected} bytes, wrote {actual}")]
    ShortWrite {
        fid: u64,
        expected: usize,
        actual: usize,
    },

    /// Internal signal raised by the segment reader when it encounters a tombstone.
    /// Carries the entry's on-disk length so a scanning caller (recovery, merge) can
    /// advance past it without re-reading. Recovery and merge both catch this
    /// themselves; it should never reach a caller of `Database::get`.
    #[error("entry at fid {fid}, offset {off} is a tombstone")]
    Tombstone { fid: u64, off: u64, len: usize },

    #[error("I/O error accessing path {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<std::io::Error> for BitcaskError {
    fn from(err: std::io::Error) -> Self {
        BitcaskError::Io {
            path: PathBuf::from("<unknown_io_source>"),
            source: err,
        }
    }
}

impl BitcaskError {
    /// Attaches a path to a plain `std::io::Error`, producing a more useful `Io` variant
    /// than the blanket `From` conversion can on its own.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BitcaskError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display_configuration() {
        let err = BitcaskError::Configuration("segment_size must be positive".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: segment_size must be positive"
        );
    }

    #[test]
    fn test_error_display_key_not_found() {
        assert_eq!(format!("{}", BitcaskError::KeyNotFound), "key not found");
    }

    #[test]
    fn test_error_display_nothing_to_merge() {
        assert_eq!(
            format!("{}", BitcaskError::NothingToMerge),
            "nothing to merge: fewer than two segments present"
        );
    }

    #[test]
    fn test_error_display_corrupt_entry() {
        let err = BitcaskError::CorruptEntry {
            fid: 3,
            off: 128,
            expected: 0xDEAD_BEEF,
            actual: 0x1234_5678,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("fid 3"));
        assert!(msg.contains("offset 128"));
        assert!(msg.contains("0xdeadbeef"));
        assert!(msg.contains("0x12345678"));
    }

    #[test]
    fn test_error_display_short_read() {
        let err = BitcaskError::ShortRead {
            fid: 1,
            off: 0,
            expected: 29,
            actual: 10,
        };
        assert_eq!(
            format!("{}", err),
            "short read at fid 1, offset 0: expected 29 bytes, got 10"
        );
    }

    #[test]
    fn test_error_display_short_write() {
        let err = BitcaskError::ShortWrite {
            fid: 2,
            expected: 40,
            actual: 20,
        };
        assert_eq!(
            format!("{}", err),
            "short write to fid 2: expected 40 bytes, wrote 20"
        );
    }

    #[test]
    fn test_error_display_tombstone() {
        let err = BitcaskError::Tombstone {
            fid: 0,
            off: 64,
            len: 33,
        };
        assert_eq!(
            format!("{}", err),
            "entry at fid 0, offset 64 is a tombstone"
        );
    }

    #[test]
    fn test_error_display_io() {
        let path = PathBuf::from("/tmp/0.dat");
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = BitcaskError::io_at(path, io_err);
        let msg = format!("{}", err);
        assert!(msg.contains("/tmp/0.dat"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: BitcaskError = io_err.into();
        match err {
            BitcaskError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            _ => panic!("expected Io variant"),
        }
    }
}
