use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dirutil::resolve_segment_size;
use crate::error::{BitcaskError, BitcaskResult};

/// Default segment rotation threshold, used whenever `segment_size <= 0`.
pub const DEFAULT_SEGMENT_SIZE: i64 = 256 * 1024 * 1024;

/// Configuration parameters for opening a [`crate::db::Database`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Directory the segment files live in.
    pub dir: PathBuf,
    /// Rotation threshold in bytes. `<= 0` resolves to [`DEFAULT_SEGMENT_SIZE`].
    pub segment_size: i64,
    /// When `true`, every `append` calls `fsync` on the active segment's handle.
    /// Default `false`: writes rely on kernel buffering rather than forcing a sync per append.
    pub sync_on_write: bool,
}

impl Options {
    /// Creates options for the given directory, using the default segment size and
    /// no forced fsync.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Options {
            dir: dir.as_ref().to_path_buf(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_on_write: false,
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> BitcaskResult<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(BitcaskError::Configuration(
                "dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The segment rotation threshold after resolving the `<= 0` default rule.
    pub fn resolved_segment_size(&self) -> u64 {
        resolve_segment_size(self.segment_size)
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dir: PathBuf::from("."),
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_on_write: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_default_segment_size() {
        let opts = Options::new("/tmp/db");
        assert_eq!(opts.resolved_segment_size(), DEFAULT_SEGMENT_SIZE as u64);
        assert!(!opts.sync_on_write);
    }

    #[test]
    fn resolved_segment_size_honors_explicit_positive_value() {
        let mut opts = Options::new("/tmp/db");
        opts.segment_size = 64;
        assert_eq!(opts.resolved_segment_size(), 64);
    }

    #[test]
    fn resolved_segment_size_falls_back_on_non_positive_value() {
        let mut opts = Options::new("/tmp/db");
        opts.segment_size = 0;
        assert_eq!(opts.resolved_segment_size(), DEFAULT_SEGMENT_SIZE as u64);
        opts.segment_size = -1;
        assert_eq!(opts.resolved_segment_size(), DEFAULT_SEGMENT_SIZE as u64);
    }

    #[test]
    fn validate_rejects_empty_dir() {
        let opts = Options::new("");
        assert!(opts.validate().is_err());
    }

    #[test]
    fn options_roundtrip_through_json() {
        let opts = Options::new("/tmp/db");
        let json = serde_json::to_string(&opts).unwrap();
        let back: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
    }
}
