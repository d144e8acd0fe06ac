//! Reader/writer table features and the protocol-level checks built from them.
//!
//! Grounded directly on `delta-kernel-rs`'s `table_features/mod.rs`: an open (`Unknown(String)`)
//! `strum`-backed enum per side, round-tripping through the same camelCase wire strings the log
//! uses.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay, EnumCount, EnumString};

use crate::{DeltaResult, Error};

#[derive(
    Serialize, Deserialize, Debug, Clone, Eq, PartialEq, EnumString, StrumDisplay, AsRefStr, EnumCount, Hash,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum ReaderFeature {
    ColumnMapping,
    DeletionVectors,
    #[strum(serialize = "timestampNtz")]
    #[serde(rename = "timestampNtz")]
    TimestampWithoutTimezone,
    TypeWidening,
    #[strum(serialize = "typeWidening-preview")]
    #[serde(rename = "typeWidening-preview")]
    TypeWideningPreview,
    V2Checkpoint,
    VacuumProtocolCheck,
    VariantType,
    #[serde(untagged)]
    #[strum(default)]
    Unknown(String),
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Eq, PartialEq, EnumString, StrumDisplay, AsRefStr, EnumCount, Hash,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum WriterFeature {
    AppendOnly,
    Invariants,
    CheckConstraints,
    ChangeDataFeed,
    GeneratedColumns,
    ColumnMapping,
    IdentityColumns,
    InCommitTimestamp,
    DeletionVectors,
    RowTracking,
    #[strum(serialize = "timestampNtz")]
    #[serde(rename = "timestampNtz")]
    TimestampWithoutTimezone,
    TypeWidening,
    #[strum(serialize = "typeWidening-preview")]
    #[serde(rename = "typeWidening-preview")]
    TypeWideningPreview,
    DomainMetadata,
    V2Checkpoint,
    IcebergCompatV1,
    IcebergCompatV2,
    IcebergCompatV3,
    VacuumProtocolCheck,
    #[strum(serialize = "clustering")]
    #[serde(rename = "clustering")]
    ClusteredTable,
    VariantType,
    #[serde(untagged)]
    #[strum(default)]
    Unknown(String),
}

#[cfg(test)]
impl ReaderFeature {
    pub(crate) fn unknown(s: impl ToString) -> Self {
        ReaderFeature::Unknown(s.to_string())
    }
}

#[cfg(test)]
impl WriterFeature {
    pub(crate) fn unknown(s: impl ToString) -> Self {
        WriterFeature::Unknown(s.to_string())
    }
}

pub static SUPPORTED_READER_FEATURES: LazyLock<Vec<ReaderFeature>> = LazyLock::new(|| {
    vec![
        ReaderFeature::ColumnMapping,
        ReaderFeature::DeletionVectors,
        ReaderFeature::TimestampWithoutTimezone,
        ReaderFeature::TypeWidening,
        ReaderFeature::TypeWideningPreview,
        ReaderFeature::VacuumProtocolCheck,
        ReaderFeature::V2Checkpoint,
        ReaderFeature::VariantType,
    ]
});

pub static SUPPORTED_WRITER_FEATURES: LazyLock<Vec<WriterFeature>> = LazyLock::new(|| {
    vec![
        WriterFeature::AppendOnly,
        WriterFeature::DeletionVectors,
        WriterFeature::Invariants,
        WriterFeature::TimestampWithoutTimezone,
        WriterFeature::DomainMetadata,
        WriterFeature::RowTracking,
        WriterFeature::InCommitTimestamp,
        WriterFeature::ColumnMapping,
        WriterFeature::IcebergCompatV2,
        WriterFeature::IcebergCompatV3,
        WriterFeature::ClusteredTable,
        WriterFeature::VariantType,
    ]
});

/// Fail if any feature in `requested` is not present in `supported`.
pub fn ensure_supported_features<T: Clone + PartialEq>(
    requested: &[T],
    supported: &[T],
) -> Result<(), Vec<T>> {
    let unsupported: Vec<T> = requested
        .iter()
        .filter(|f| !supported.contains(f))
        .cloned()
        .collect();
    if unsupported.is_empty() {
        Ok(())
    } else {
        Err(unsupported)
    }
}

/// How logical column names are mapped to physical parquet column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnMappingMode {
    #[default]
    None,
    Name,
    Id,
}

impl ColumnMappingMode {
    pub fn parse(mode: Option<&str>) -> DeltaResult<Self> {
        Ok(match mode {
            None | Some("none") => ColumnMappingMode::None,
            Some("name") => ColumnMappingMode::Name,
            Some("id") => ColumnMappingMode::Id,
            Some(other) => {
                return Err(Error::generic(format!(
                    "unknown delta.columnMapping.mode: {other}"
                )))
            }
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnMappingMode::None => "none",
            ColumnMappingMode::Name => "name",
            ColumnMappingMode::Id => "id",
        }
    }
}
