//! Gap-free listing and grouping of `_delta_log/` entries into the commits (and, when present,
//! the checkpoint) a [`crate::snapshot::Snapshot`] replays to build its state.
//!
//! Grounded on `delta-kernel-rs`'s `log_segment` module: list once, assert no version gap, then
//! hand the sorted commit files to the replay step.

use std::sync::Arc;

use url::Url;

use crate::engine::StorageHandler;
use crate::path::{ensure_log_root, LogPathFileType, ParsedLogPath};
use crate::{DeltaResult, Error, Version};

/// The commit (and optional checkpoint) files that make up a contiguous view of the log, from
/// the checkpoint's version (if any) through `end_version`.
#[derive(Debug, Clone)]
pub struct LogSegment {
    pub log_root: Url,
    pub checkpoint_version: Option<Version>,
    pub commit_files: Vec<ParsedLogPath>,
    pub end_version: Version,
}

impl LogSegment {
    /// List `_delta_log/` under `table_root` and build the segment ending at `end_version`
    /// (inclusive), or the latest version found if `end_version` is `None`. Errors with
    /// [`Error::LogGap`] if the commit sequence after the checkpoint is not contiguous.
    pub fn list_for_version(
        storage: &Arc<dyn StorageHandler>,
        table_root: &Url,
        end_version: Option<Version>,
    ) -> DeltaResult<Self> {
        let log_root = ensure_log_root(table_root)?;
        let entries = storage.list_from(&log_root)?;
        let mut parsed: Vec<ParsedLogPath> = entries
            .iter()
            .filter_map(|f| f.location.path_segments()?.last().map(str::to_string))
            .filter_map(|name| ParsedLogPath::try_from_name(&log_root, &name).ok())
            .filter(|p| !matches!(p.file_type, LogPathFileType::Unknown))
            .collect();
        parsed.sort();

        let checkpoint_version = parsed
            .iter()
            .filter(|p| p.is_checkpoint())
            .map(|p| p.version)
            .filter(|v| end_version.is_none_or(|end| *v <= end))
            .max();

        let mut commit_files: Vec<ParsedLogPath> = parsed
            .into_iter()
            .filter(|p| p.is_commit())
            .filter(|p| checkpoint_version.is_none_or(|cp| p.version > cp))
            .filter(|p| end_version.is_none_or(|end| p.version <= end))
            .collect();
        commit_files.sort();

        let mut expected = checkpoint_version.map(|v| v + 1).unwrap_or(0);
        for commit in &commit_files {
            if commit.version != expected {
                return Err(Error::LogGap {
                    expected,
                    found: commit.version,
                });
            }
            expected += 1;
        }

        let resolved_end = end_version
            .or_else(|| commit_files.last().map(|c| c.version))
            .or(checkpoint_version)
            .unwrap_or(-1);

        Ok(Self {
            log_root,
            checkpoint_version,
            commit_files,
            end_version: resolved_end,
        })
    }
}

// `Option::is_none_or` stabilized in 1.82; this crate targets 1.80, so provide it locally.
trait IsNoneOr<T> {
    fn is_none_or(self, f: impl FnOnce(T) -> bool) -> bool;
}

impl<T> IsNoneOr<T> for Option<T> {
    fn is_none_or(self, f: impl FnOnce(T) -> bool) -> bool {
        match self {
            None => true,
            Some(v) => f(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, InMemoryEngine};
    use crate::path::commit_file_path;

    fn write_commit(storage: &Arc<dyn StorageHandler>, log_root: &Url, version: Version) {
        let path = commit_file_path(log_root, version).unwrap();
        storage
            .write_file_atomically(&path, b"{}\n".to_vec(), false)
            .unwrap();
    }

    #[test]
    fn detects_contiguous_commits() {
        let engine = InMemoryEngine::new();
        let storage = engine.storage_handler();
        let table_root: Url = "memory:///table/".parse().unwrap();
        let log_root = ensure_log_root(&table_root).unwrap();
        for v in 0..3 {
            write_commit(&storage, &log_root, v);
        }
        let segment = LogSegment::list_for_version(&storage, &table_root, None).unwrap();
        assert_eq!(segment.commit_files.len(), 3);
        assert_eq!(segment.end_version, 2);
    }

    #[test]
    fn detects_gap() {
        let engine = InMemoryEngine::new();
        let storage = engine.storage_handler();
        let table_root: Url = "memory:///table2/".parse().unwrap();
        let log_root = ensure_log_root(&table_root).unwrap();
        write_commit(&storage, &log_root, 0);
        write_commit(&storage, &log_root, 2);
        let err = LogSegment::list_for_version(&storage, &table_root, None).unwrap_err();
        assert!(matches!(err, Error::LogGap { expected: 1, found: 2 }));
    }
}
