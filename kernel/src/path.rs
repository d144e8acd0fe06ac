//! Parsing and formatting of `_delta_log/` file names.
//!
//! Grounded on `delta-kernel-rs`'s `log_segment` path handling (exercised by
//! `log_segment/tests.rs` and `log_segment/crc_tests.rs`): commit files are 20-digit
//! zero-padded versions with a `.json` suffix, checkpoints add a `.checkpoint[.N.M].parquet`
//! suffix, and checksum side files use `.crc`.

use std::cmp::Ordering;

use url::Url;

use crate::{DeltaResult, Error, Version};

const VERSION_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPathFileType {
    Commit,
    SinglePartCheckpoint,
    MultiPartCheckpoint { part_num: u32, num_parts: u32 },
    Crc,
    CompactedCommit { hi: Version },
    Unknown,
}

/// A single file discovered under `_delta_log/`, decomposed into its version and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogPath {
    pub location: Url,
    pub filename: String,
    pub version: Version,
    pub file_type: LogPathFileType,
}

impl ParsedLogPath {
    pub fn is_commit(&self) -> bool {
        matches!(self.file_type, LogPathFileType::Commit)
    }

    pub fn is_checkpoint(&self) -> bool {
        matches!(
            self.file_type,
            LogPathFileType::SinglePartCheckpoint | LogPathFileType::MultiPartCheckpoint { .. }
        )
    }

    pub fn is_crc(&self) -> bool {
        matches!(self.file_type, LogPathFileType::Crc)
    }

    /// Parse a single log entry's file name (not the whole URL path) into a [`ParsedLogPath`].
    /// Names that don't match a known pattern parse as `LogPathFileType::Unknown` rather than
    /// erroring, so a listing can skip them without failing the whole segment build.
    pub fn try_from_name(log_root: &Url, filename: &str) -> DeltaResult<Self> {
        let location = log_root.join(filename)?;
        let stem_and_ext = filename.rsplit_once('.');
        let Some((version_part, rest)) = filename.split_once('.') else {
            return Ok(Self::unknown(location, filename));
        };
        let Ok(version) = version_part.parse::<Version>() else {
            return Ok(Self::unknown(location, filename));
        };
        let file_type = if rest == "json" {
            LogPathFileType::Commit
        } else if rest == "crc" {
            LogPathFileType::Crc
        } else if rest == "checkpoint.parquet" {
            LogPathFileType::SinglePartCheckpoint
        } else if let Some(parts) = parse_multipart_checkpoint(rest) {
            parts
        } else if let Some(hi) = parse_compacted_commit(rest) {
            LogPathFileType::CompactedCommit { hi }
        } else {
            let _ = stem_and_ext;
            LogPathFileType::Unknown
        };
        Ok(Self {
            location,
            filename: filename.to_string(),
            version,
            file_type,
        })
    }

    fn unknown(location: Url, filename: &str) -> Self {
        Self {
            location,
            filename: filename.to_string(),
            version: -1,
            file_type: LogPathFileType::Unknown,
        }
    }
}

fn parse_multipart_checkpoint(rest: &str) -> Option<LogPathFileType> {
    // "checkpoint.0000000001.0000000010.parquet"
    let rest = rest.strip_prefix("checkpoint.")?;
    let rest = rest.strip_suffix(".parquet")?;
    let (part_num, num_parts) = rest.split_once('.')?;
    Some(LogPathFileType::MultiPartCheckpoint {
        part_num: part_num.parse().ok()?,
        num_parts: num_parts.parse().ok()?,
    })
}

fn parse_compacted_commit(rest: &str) -> Option<Version> {
    // "0000000010.json.compact" style suffix is represented with version == lo, so `rest` here
    // is the remainder after the low version: "<hi>.compact".
    let hi = rest.strip_suffix(".compact")?;
    hi.parse().ok()
}

pub fn commit_file_name(version: Version) -> String {
    format!("{:0width$}.json", version, width = VERSION_WIDTH)
}

pub fn checkpoint_file_name(version: Version) -> String {
    format!("{:0width$}.checkpoint.parquet", version, width = VERSION_WIDTH)
}

pub fn crc_file_name(version: Version) -> String {
    format!("{:0width$}.crc", version, width = VERSION_WIDTH)
}

pub fn commit_file_path(log_root: &Url, version: Version) -> DeltaResult<Url> {
    Ok(log_root.join(&commit_file_name(version))?)
}

pub fn crc_file_path(log_root: &Url, version: Version) -> DeltaResult<Url> {
    Ok(log_root.join(&crc_file_name(version))?)
}

/// Orders log entries the way a segment builder wants to consume them: by version first, commits
/// before checkpoints at the same version (a checkpoint at version N logically supersedes the
/// commit, but we still want the commit visible to a listing that hasn't reached the checkpoint
/// threshold).
impl Ord for ParsedLogPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.filename.cmp(&other.filename))
    }
}

impl PartialOrd for ParsedLogPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn ensure_log_root(table_root: &Url) -> DeltaResult<Url> {
    let mut root = table_root.clone();
    if !root.path().ends_with('/') {
        root.set_path(&format!("{}/", root.path()));
    }
    root.join("_delta_log/")
        .map_err(Error::from)
}
