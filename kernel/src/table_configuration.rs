//! Derives the effective, validated configuration of a table from its latest `Protocol` and
//! `Metadata` actions: which features are enabled, what the checkpoint interval is, whether
//! in-commit timestamps are active, and so on.
//!
//! Grounded directly on `table_configuration.rs` in the pack: the same `TableConfiguration`
//! shape, the same `is_*_supported` / `is_*_enabled` split (a feature can be present in the
//! protocol without the corresponding table property turning its behavior on), and the same
//! `in_commit_timestamp_enablement` contract.

use std::collections::HashMap;

use url::Url;

use crate::actions::{Metadata, Protocol};
use crate::schema::StructType;
use crate::table_features::{ColumnMappingMode, ReaderFeature, WriterFeature};
use crate::{DeltaResult, Error, Version};

const APPEND_ONLY_KEY: &str = "delta.appendOnly";
pub(crate) const COLUMN_MAPPING_MODE_KEY: &str = "delta.columnMapping.mode";
const CHECKPOINT_INTERVAL_KEY: &str = "delta.checkpointInterval";
const ICT_ENABLED_KEY: &str = "delta.enableInCommitTimestamps";
pub const ICT_ENABLEMENT_VERSION_KEY: &str = "delta.inCommitTimestampEnablementVersion";
pub const ICT_ENABLEMENT_TIMESTAMP_KEY: &str = "delta.inCommitTimestampEnablementTimestamp";
const ROW_TRACKING_KEY: &str = "delta.enableRowTracking";
pub(crate) const DELETION_VECTORS_KEY: &str = "delta.enableDeletionVectors";
pub(crate) const ICEBERG_COMPAT_V2_KEY: &str = "delta.enableIcebergCompatV2";
pub(crate) const ICEBERG_COMPAT_V3_KEY: &str = "delta.enableIcebergCompatV3";
const UNIVERSAL_FORMAT_KEY: &str = "delta.universalFormat.enabledFormats";
const DEFAULT_CHECKPOINT_INTERVAL: i64 = 10;

/// Typed access to reserved `delta.*` table properties. Anything not recognized here stays
/// available through [`TableConfiguration::raw_configuration`] untouched.
#[derive(Debug, Clone, Default)]
pub struct TableProperties {
    configuration: HashMap<String, String>,
}

impl TableProperties {
    pub fn new(configuration: HashMap<String, String>) -> Self {
        Self { configuration }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).map(String::as_str)
    }

    fn get_bool(&self, key: &str) -> DeltaResult<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(v) => v
                .parse::<bool>()
                .map_err(|_| Error::generic(format!("property '{key}' is not a valid bool: {v}"))),
        }
    }

    pub fn append_only(&self) -> DeltaResult<bool> {
        self.get_bool(APPEND_ONLY_KEY)
    }

    pub fn enable_row_tracking(&self) -> DeltaResult<bool> {
        self.get_bool(ROW_TRACKING_KEY)
    }

    pub fn enable_deletion_vectors(&self) -> DeltaResult<bool> {
        self.get_bool(DELETION_VECTORS_KEY)
    }

    pub fn enable_in_commit_timestamps(&self) -> DeltaResult<bool> {
        self.get_bool(ICT_ENABLED_KEY)
    }

    pub fn enable_iceberg_compat_v2(&self) -> DeltaResult<bool> {
        self.get_bool(ICEBERG_COMPAT_V2_KEY)
    }

    pub fn enable_iceberg_compat_v3(&self) -> DeltaResult<bool> {
        self.get_bool(ICEBERG_COMPAT_V3_KEY)
    }

    pub fn column_mapping_mode(&self) -> DeltaResult<ColumnMappingMode> {
        ColumnMappingMode::parse(self.get(COLUMN_MAPPING_MODE_KEY))
    }

    pub fn checkpoint_interval(&self) -> DeltaResult<i64> {
        match self.get(CHECKPOINT_INTERVAL_KEY) {
            None => Ok(DEFAULT_CHECKPOINT_INTERVAL),
            Some(v) => v.parse().map_err(|_| {
                Error::generic(format!("property '{CHECKPOINT_INTERVAL_KEY}' is not an integer: {v}"))
            }),
        }
    }

    pub fn in_commit_timestamp_enablement(&self) -> DeltaResult<Option<(Version, i64)>> {
        let version = self.get(ICT_ENABLEMENT_VERSION_KEY);
        let timestamp = self.get(ICT_ENABLEMENT_TIMESTAMP_KEY);
        match (version, timestamp) {
            (Some(v), Some(t)) => Ok(Some((
                v.parse()
                    .map_err(|_| Error::generic("invalid inCommitTimestampEnablementVersion"))?,
                t.parse()
                    .map_err(|_| Error::generic("invalid inCommitTimestampEnablementTimestamp"))?,
            ))),
            (None, None) => Ok(None),
            _ => Err(Error::generic(
                "inCommitTimestampEnablementVersion and ...Timestamp must be set together",
            )),
        }
    }

    /// The comma-separated `delta.universalFormat.enabledFormats` list, e.g. `["iceberg"]` or
    /// `["hudi"]`; empty when no surface format conversion is configured.
    pub fn universal_format_enabled_formats(&self) -> Vec<String> {
        match self.get(UNIVERSAL_FORMAT_KEY) {
            None => Vec::new(),
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn raw(&self) -> &HashMap<String, String> {
        &self.configuration
    }
}

/// The fully resolved, validated state of a table at a version: its schema, its feature set, and
/// every derived property a transaction or the conflict resolver needs to consult.
#[derive(Debug, Clone)]
pub struct TableConfiguration {
    metadata: Metadata,
    protocol: Protocol,
    schema: StructType,
    table_properties: TableProperties,
    column_mapping_mode: ColumnMappingMode,
    table_root: Url,
    version: Version,
}

impl TableConfiguration {
    pub fn try_new(
        metadata: Metadata,
        protocol: Protocol,
        table_root: Url,
        version: Version,
    ) -> DeltaResult<Self> {
        protocol.ensure_read_supported()?;
        protocol.ensure_write_supported()?;
        let schema = metadata.parse_schema()?;
        let table_properties = TableProperties::new(metadata.configuration.clone());
        let column_mapping_mode = table_properties.column_mapping_mode()?;
        Ok(Self {
            metadata,
            protocol,
            schema,
            table_properties,
            column_mapping_mode,
            table_root,
            version,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn schema(&self) -> &StructType {
        &self.schema
    }

    pub fn table_properties(&self) -> &TableProperties {
        &self.table_properties
    }

    pub fn table_root(&self) -> &Url {
        &self.table_root
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn column_mapping_mode(&self) -> ColumnMappingMode {
        self.column_mapping_mode
    }

    /// Ensures writing to this table is possible given its protocol and features; separate from
    /// `ensure_write_supported` on `Protocol` because it also folds in property-level checks
    /// (e.g. append-only cannot be toggled off once a data-changing remove is staged).
    pub fn ensure_write_supported(&self) -> DeltaResult<()> {
        self.protocol.ensure_write_supported()
    }

    pub fn is_append_only_supported(&self) -> bool {
        self.protocol.min_writer_version >= 2
    }

    pub fn is_append_only_enabled(&self) -> DeltaResult<bool> {
        Ok(self.is_append_only_supported() && self.table_properties.append_only()?)
    }

    pub fn is_deletion_vector_supported(&self) -> bool {
        self.protocol.has_writer_feature(&WriterFeature::DeletionVectors)
            || self.protocol.has_reader_feature(&ReaderFeature::DeletionVectors)
    }

    pub fn is_deletion_vector_enabled(&self) -> DeltaResult<bool> {
        Ok(self.is_deletion_vector_supported() && self.table_properties.enable_deletion_vectors()?)
    }

    pub fn is_cdf_read_supported(&self) -> bool {
        self.protocol.has_writer_feature(&WriterFeature::ChangeDataFeed)
            || self.protocol.min_writer_version >= 4
    }

    pub fn is_invariants_supported(&self) -> bool {
        self.protocol.min_writer_version >= 2
            || self.protocol.has_writer_feature(&WriterFeature::Invariants)
    }

    pub fn is_v2_checkpoint_write_supported(&self) -> bool {
        self.protocol.has_writer_feature(&WriterFeature::V2Checkpoint)
    }

    pub fn is_row_tracking_supported(&self) -> bool {
        self.protocol.has_writer_feature(&WriterFeature::RowTracking)
    }

    pub fn is_row_tracking_enabled(&self) -> DeltaResult<bool> {
        Ok(self.is_row_tracking_supported() && self.table_properties.enable_row_tracking()?)
    }

    pub fn is_in_commit_timestamps_supported(&self) -> bool {
        self.protocol.has_writer_feature(&WriterFeature::InCommitTimestamp)
    }

    pub fn is_in_commit_timestamps_enabled(&self) -> DeltaResult<bool> {
        Ok(self.is_in_commit_timestamps_supported()
            && self.table_properties.enable_in_commit_timestamps()?)
    }

    pub fn in_commit_timestamp_enablement(&self) -> DeltaResult<Option<(Version, i64)>> {
        self.table_properties.in_commit_timestamp_enablement()
    }

    pub fn checkpoint_interval(&self) -> DeltaResult<i64> {
        self.table_properties.checkpoint_interval()
    }

    pub fn active_iceberg_compat_version(&self) -> DeltaResult<Option<crate::iceberg_compat::IcebergCompatVersion>> {
        use crate::iceberg_compat::IcebergCompatVersion;
        let v2 = self.table_properties.enable_iceberg_compat_v2()?;
        let v3 = self.table_properties.enable_iceberg_compat_v3()?;
        match (v2, v3) {
            (true, true) => Err(Error::MultipleIcebergCompatVersionsEnabled),
            (true, false) => Ok(Some(IcebergCompatVersion::V2)),
            (false, true) => Ok(Some(IcebergCompatVersion::V3)),
            (false, false) => Ok(None),
        }
    }

    pub fn universal_format_enabled_formats(&self) -> Vec<String> {
        self.table_properties.universal_format_enabled_formats()
    }
}

/// The two `delta.*` configuration keys that record when in-commit timestamps were first turned
/// on, as required by spec §4.2: "the transaction must also commit a metadata update recording
/// the ICT-enablement version if this is the first ICT-enabled version."
pub fn ict_enablement_properties(version: Version, timestamp: i64) -> HashMap<String, String> {
    HashMap::from([
        (ICT_ENABLEMENT_VERSION_KEY.to_string(), version.to_string()),
        (ICT_ENABLEMENT_TIMESTAMP_KEY.to_string(), timestamp.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, StructField};

    fn config(configuration: HashMap<String, String>, protocol: Protocol) -> TableConfiguration {
        let schema = StructType::new([StructField::not_null("id", DataType::LONG)]);
        let metadata = Metadata {
            configuration,
            schema_string: schema.to_schema_string(),
            ..Default::default()
        };
        TableConfiguration::try_new(metadata, protocol, "memory:///t/".parse().unwrap(), 0).unwrap()
    }

    #[test]
    fn append_only_requires_both_protocol_and_property() {
        let protocol = Protocol::try_new(1, 1, None::<Vec<String>>, None::<Vec<String>>).unwrap();
        let cfg = config(
            HashMap::from([(APPEND_ONLY_KEY.to_string(), "true".to_string())]),
            protocol,
        );
        assert!(!cfg.is_append_only_enabled().unwrap());

        let protocol = Protocol::try_new(1, 2, None::<Vec<String>>, None::<Vec<String>>).unwrap();
        let cfg = config(
            HashMap::from([(APPEND_ONLY_KEY.to_string(), "true".to_string())]),
            protocol,
        );
        assert!(cfg.is_append_only_enabled().unwrap());
    }

    #[test]
    fn in_commit_timestamp_enablement_requires_both_keys() {
        let protocol = Protocol::try_new(
            3,
            7,
            None::<Vec<String>>,
            Some(vec![WriterFeature::InCommitTimestamp]),
        )
        .unwrap();
        let cfg = config(
            HashMap::from([(ICT_ENABLEMENT_VERSION_KEY.to_string(), "5".to_string())]),
            protocol,
        );
        assert!(cfg.in_commit_timestamp_enablement().is_err());
    }

    #[test]
    fn iceberg_compat_versions_are_mutually_exclusive() {
        let protocol = Protocol::try_new(
            3,
            7,
            None::<Vec<String>>,
            Some(vec![WriterFeature::IcebergCompatV2, WriterFeature::IcebergCompatV3]),
        )
        .unwrap();
        let cfg = config(
            HashMap::from([
                (ICEBERG_COMPAT_V2_KEY.to_string(), "true".to_string()),
                (ICEBERG_COMPAT_V3_KEY.to_string(), "true".to_string()),
            ]),
            protocol,
        );
        assert!(matches!(
            cfg.active_iceberg_compat_version(),
            Err(Error::MultipleIcebergCompatVersionsEnabled)
        ));
    }
}
