//! The action codec: typed representations of every row that can appear in a Delta commit file,
//! plus the mutually-exclusive single-row-union record used to serialize them.
//!
//! Grounded on `delta-kernel-rs`'s `actions` module (the `Metadata`/`Protocol` shapes exercised by
//! `table_configuration.rs`'s tests) and on the historical `delta-kernel-rs` `transaction.rs`
//! (`CommitInfo`, `kernelVersion` stamping).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use crate::table_features::{ensure_supported_features, ReaderFeature, WriterFeature};
use crate::schema::StructType;
use crate::table_features::{SUPPORTED_READER_FEATURES, SUPPORTED_WRITER_FEATURES};
use crate::{DeltaResult, Error, Version};

/// The crate version stamped into every `commitInfo.kernelVersion`.
pub const KERNEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix reserved for system (kernel-internal) domain metadata names. User code may not add or
/// remove a domain whose name starts with this prefix through the public domain-metadata API.
pub const SYSTEM_DOMAIN_PREFIX: &str = "delta.";

/// The single system domain this crate knows how to manage directly: the row-tracking watermark.
pub const ROW_TRACKING_DOMAIN: &str = "delta.rowTracking";

/// The clustering-columns domain, reset on every REPLACE.
pub const CLUSTERING_DOMAIN: &str = "delta.clustering";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub provider: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: "parquet".to_string(),
            options: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub format: Format,
    pub schema_string: String,
    #[serde(default)]
    pub partition_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            description: None,
            format: Format::default(),
            schema_string: StructType::new([]).to_schema_string(),
            partition_columns: Vec::new(),
            created_time: None,
            configuration: HashMap::new(),
        }
    }
}

impl Metadata {
    /// Build and validate a new `Metadata` action: every partition column must exist in the
    /// schema. An empty schema is only tolerated by callers that pass `allow_empty_schema`
    /// (spec §3: "Metadata schema is non-empty unless the 'allow empty schema table' flag is on").
    pub fn try_new(
        name: Option<String>,
        description: Option<String>,
        schema: StructType,
        partition_columns: Vec<String>,
        created_time: i64,
        configuration: HashMap<String, String>,
    ) -> DeltaResult<Self> {
        for col in &partition_columns {
            if !schema.contains(col) {
                return Err(Error::generic(format!(
                    "partition column '{col}' is not present in the schema"
                )));
            }
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            format: Format::default(),
            schema_string: schema.to_schema_string(),
            partition_columns,
            created_time: Some(created_time),
            configuration,
        })
    }

    pub fn parse_schema(&self) -> DeltaResult<StructType> {
        StructType::parse(&self.schema_string)
    }

    pub fn is_empty_schema(&self) -> DeltaResult<bool> {
        Ok(self.parse_schema()?.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_features: Option<Vec<ReaderFeature>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_features: Option<Vec<WriterFeature>>,
}

impl Protocol {
    pub fn try_new<RF, WF, R, W>(
        min_reader_version: i32,
        min_writer_version: i32,
        reader_features: Option<RF>,
        writer_features: Option<WF>,
    ) -> DeltaResult<Self>
    where
        RF: IntoIterator<Item = R>,
        WF: IntoIterator<Item = W>,
        R: Into<ReaderFeature>,
        W: Into<WriterFeature>,
    {
        Ok(Self {
            min_reader_version,
            min_writer_version,
            reader_features: reader_features.map(|f| f.into_iter().map(Into::into).collect()),
            writer_features: writer_features.map(|f| f.into_iter().map(Into::into).collect()),
        })
    }

    pub fn reader_features(&self) -> Option<&[ReaderFeature]> {
        self.reader_features.as_deref()
    }

    pub fn writer_features(&self) -> Option<&[WriterFeature]> {
        self.writer_features.as_deref()
    }

    pub fn has_reader_feature(&self, feature: &ReaderFeature) -> bool {
        self.reader_features
            .as_ref()
            .is_some_and(|fs| fs.contains(feature))
    }

    pub fn has_writer_feature(&self, feature: &WriterFeature) -> bool {
        self.writer_features
            .as_ref()
            .is_some_and(|fs| fs.contains(feature))
    }

    pub fn ensure_read_supported(&self) -> DeltaResult<()> {
        if let Some(features) = &self.reader_features {
            ensure_supported_features(features, &SUPPORTED_READER_FEATURES)
                .map_err(Error::UnsupportedReaderFeatures)?;
        }
        Ok(())
    }

    pub fn ensure_write_supported(&self) -> DeltaResult<()> {
        if let Some(features) = &self.writer_features {
            ensure_supported_features(features, &SUPPORTED_WRITER_FEATURES)
                .map_err(Error::UnsupportedWriterFeatures)?;
        }
        Ok(())
    }

    /// Returns a protocol that is the union of `self` and `other`'s reader/writer feature sets,
    /// bumping min versions up to whichever side requires more (used when an Iceberg-compat
    /// enforcer requires a feature that isn't present yet).
    pub fn with_features(
        &self,
        added_reader: impl IntoIterator<Item = ReaderFeature>,
        added_writer: impl IntoIterator<Item = WriterFeature>,
    ) -> Self {
        let mut reader_features = self.reader_features.clone().unwrap_or_default();
        for f in added_reader {
            if !reader_features.contains(&f) {
                reader_features.push(f);
            }
        }
        let mut writer_features = self.writer_features.clone().unwrap_or_default();
        for f in added_writer {
            if !writer_features.contains(&f) {
                writer_features.push(f);
            }
        }
        Self {
            min_reader_version: self.min_reader_version.max(3),
            min_writer_version: self.min_writer_version.max(7),
            reader_features: Some(reader_features),
            writer_features: Some(writer_features),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Add {
    pub path: String,
    #[serde(default)]
    pub partition_values: HashMap<String, Option<String>>,
    pub size: i64,
    pub modification_time: i64,
    pub data_change: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_row_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_row_commit_version: Option<i64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl Add {
    /// Parses `stats.numRecords` out of the (opaque, engine-produced) stats JSON blob, if present.
    /// Used by the Iceberg-compat `MissingNumRecordsStats` check.
    pub fn num_records(&self) -> Option<i64> {
        let stats: Value = serde_json::from_str(self.stats.as_deref()?).ok()?;
        stats.get("numRecords")?.as_i64()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Remove {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,
    pub data_change: bool,
    #[serde(default)]
    pub extended_file_metadata: bool,
    #[serde(default)]
    pub partition_values: HashMap<String, Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

/// An application-level idempotency marker, commonly named `SetTransaction` in the protocol spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Txn {
    pub app_id: String,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

impl Txn {
    pub fn new(app_id: impl Into<String>, version: i64, last_updated: Option<i64>) -> Self {
        Self {
            app_id: app_id.into(),
            version,
            last_updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_commit_timestamp: Option<i64>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub operation_parameters: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_info: Option<String>,
    pub kernel_version: String,
    /// Pinned to `false` everywhere this crate writes it; see spec §9 Open Questions: real
    /// blind-append detection isn't implemented, and the conflict resolver's policy is written
    /// explicitly rather than trusting this flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_blind_append: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub operation_metrics: HashMap<String, String>,
}

impl CommitInfo {
    pub fn new(timestamp: i64, operation: Option<String>, engine_info: Option<String>) -> Self {
        Self {
            in_commit_timestamp: None,
            timestamp,
            operation,
            operation_parameters: HashMap::new(),
            engine_info,
            kernel_version: format!("v{KERNEL_VERSION}"),
            is_blind_append: Some(false),
            txn_id: None,
            operation_metrics: HashMap::new(),
        }
    }
}

/// A single named slot of opaque configuration in the log. `removed = true` is a tombstone: the
/// domain is active iff the latest non-shadowed record with this name has `removed = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainMetadata {
    pub domain: String,
    pub configuration: String,
    #[serde(default)]
    pub removed: bool,
}

impl DomainMetadata {
    pub fn is_system_domain(name: &str) -> bool {
        name.starts_with(SYSTEM_DOMAIN_PREFIX)
    }
}

/// The cached checksum record for a version: table size, file count, row-id watermark, and the
/// set of active domains, so readers can skip replaying the whole log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CrcInfo {
    pub table_size_bytes: i64,
    pub num_files: i64,
    pub num_metadata: i64,
    pub num_protocol: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub file_size_histogram: HashMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_id_high_water_mark: Option<i64>,
    #[serde(default)]
    pub domain_metadata: Vec<DomainMetadata>,
}

/// The tagged-union action: exactly one kind per log row.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CommitInfo(CommitInfo),
    Metadata(Metadata),
    Protocol(Protocol),
    Add(Add),
    Remove(Remove),
    Txn(Txn),
    DomainMetadata(DomainMetadata),
}

/// The wire format: a single JSON object per commit-file line, with at most one field populated.
/// This is the "single-row-union record" spec §9 calls for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActionRecord {
    #[serde(rename = "commitInfo", skip_serializing_if = "Option::is_none")]
    pub commit_info: Option<CommitInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add: Option<Add>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<Remove>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn: Option<Txn>,
    #[serde(rename = "domainMetadata", skip_serializing_if = "Option::is_none")]
    pub domain_metadata: Option<DomainMetadata>,
}

impl From<Action> for ActionRecord {
    fn from(action: Action) -> Self {
        let mut record = ActionRecord::default();
        match action {
            Action::CommitInfo(a) => record.commit_info = Some(a),
            Action::Metadata(a) => record.metadata = Some(a),
            Action::Protocol(a) => record.protocol = Some(a),
            Action::Add(a) => record.add = Some(a),
            Action::Remove(a) => record.remove = Some(a),
            Action::Txn(a) => record.txn = Some(a),
            Action::DomainMetadata(a) => record.domain_metadata = Some(a),
        }
        record
    }
}

impl TryFrom<ActionRecord> for Action {
    type Error = Error;

    fn try_from(record: ActionRecord) -> DeltaResult<Self> {
        let mut present = 0;
        present += record.commit_info.is_some() as usize;
        present += record.metadata.is_some() as usize;
        present += record.protocol.is_some() as usize;
        present += record.add.is_some() as usize;
        present += record.remove.is_some() as usize;
        present += record.txn.is_some() as usize;
        present += record.domain_metadata.is_some() as usize;
        if present != 1 {
            return Err(Error::MalformedActionRecord(present));
        }
        Ok(if let Some(a) = record.commit_info {
            Action::CommitInfo(a)
        } else if let Some(a) = record.metadata {
            Action::Metadata(a)
        } else if let Some(a) = record.protocol {
            Action::Protocol(a)
        } else if let Some(a) = record.add {
            Action::Add(a)
        } else if let Some(a) = record.remove {
            Action::Remove(a)
        } else if let Some(a) = record.txn {
            Action::Txn(a)
        } else {
            Action::DomainMetadata(record.domain_metadata.unwrap())
        })
    }
}

impl Action {
    pub fn to_json_line(&self) -> DeltaResult<String> {
        let record: ActionRecord = self.clone().into();
        Ok(serde_json::to_string(&record)?)
    }

    pub fn from_json_line(line: &str) -> DeltaResult<Self> {
        let record: ActionRecord = serde_json::from_str(line)?;
        record.try_into()
    }
}

/// A commit version identifies the new row-id watermark captured by a `domainMetadata` entry for
/// [`ROW_TRACKING_DOMAIN`]. Its `configuration` field is a JSON object: `{"rowIdHighWaterMark": N}`.
pub fn row_tracking_domain_metadata(high_water_mark: i64) -> DeltaResult<DomainMetadata> {
    if high_water_mark < 0 {
        return Err(Error::NegativeRowIdWatermark(high_water_mark));
    }
    let configuration = serde_json::json!({ "rowIdHighWaterMark": high_water_mark }).to_string();
    Ok(DomainMetadata {
        domain: ROW_TRACKING_DOMAIN.to_string(),
        configuration,
        removed: false,
    })
}

pub fn parse_row_tracking_watermark(domain_metadata: &DomainMetadata) -> DeltaResult<i64> {
    let value: Value = serde_json::from_str(&domain_metadata.configuration)?;
    value
        .get("rowIdHighWaterMark")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::generic("row-tracking domain metadata missing rowIdHighWaterMark"))
}

/// Placeholder type so `CrcInfo`/`Snapshot` can name a version without importing `Version`
/// everywhere this module is used.
pub type VersionedCrcInfo = (Version, CrcInfo);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_record_roundtrip_add() {
        let add = Add {
            path: "part-0000.parquet".into(),
            size: 100,
            modification_time: 1000,
            data_change: true,
            ..Default::default()
        };
        let action = Action::Add(add.clone());
        let line = action.to_json_line().unwrap();
        assert!(line.contains("\"add\""));
        assert!(!line.contains("\"remove\""));
        let parsed = Action::from_json_line(&line).unwrap();
        assert_eq!(parsed, Action::Add(add));
    }

    #[test]
    fn malformed_record_rejected() {
        let record = ActionRecord::default();
        let err = Action::try_from(record).unwrap_err();
        assert!(matches!(err, Error::MalformedActionRecord(0)));

        let mut record = ActionRecord::default();
        record.protocol = Some(Protocol::try_new(1, 2, None::<Vec<String>>, None::<Vec<String>>).unwrap());
        record.txn = Some(Txn::new("app", 1, None));
        let err = Action::try_from(record).unwrap_err();
        assert!(matches!(err, Error::MalformedActionRecord(2)));
    }

    #[test]
    fn metadata_rejects_unknown_partition_column() {
        let schema = StructType::new([crate::schema::StructField::not_null(
            "a",
            crate::schema::DataType::INTEGER,
        )]);
        let err = Metadata::try_new(None, None, schema, vec!["b".into()], 0, HashMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::Generic(_)));
    }

    #[test]
    fn row_tracking_domain_roundtrip() {
        let dm = row_tracking_domain_metadata(42).unwrap();
        assert_eq!(parse_row_tracking_watermark(&dm).unwrap(), 42);
        assert!(row_tracking_domain_metadata(-1).is_err());
    }

    #[test]
    fn protocol_feature_checks() {
        let p = Protocol::try_new(
            3,
            7,
            Some(vec![ReaderFeature::ColumnMapping]),
            Some(vec![WriterFeature::unknown("madeUpFeature")]),
        )
        .unwrap();
        assert!(p.ensure_read_supported().is_ok());
        assert!(p.ensure_write_supported().is_err());
    }
}
