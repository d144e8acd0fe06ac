//! A `Snapshot` is the replayed, immutable view of a table at a single version: its protocol,
//! metadata, active files, active domain metadata, and the latest committed version per
//! application id (for idempotent-write checks).
//!
//! Grounded on `delta-kernel-rs`'s `snapshot` module shape (a builder that replays a
//! [`crate::log_segment::LogSegment`]), simplified to the single-threaded, non-Arrow replay this
//! crate needs: no predicate pushdown, no scan file generation.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::actions::{Action, Add, CrcInfo, Metadata, Protocol};
use crate::domain_metadata::merge_domain_metadata;
use crate::engine::StorageHandler;
use crate::log_segment::LogSegment;
use crate::table_configuration::TableConfiguration;
use crate::{DeltaResult, Error, Version};

#[derive(Debug, Clone)]
pub struct Snapshot {
    table_configuration: TableConfiguration,
    active_files: HashMap<String, Add>,
    active_domain_metadata: HashMap<String, String>,
    application_transactions: HashMap<String, Version>,
    crc_info: Option<CrcInfo>,
    latest_commit_timestamp: i64,
}

impl Snapshot {
    /// Replay the log from scratch (no checkpoint short-circuit; checkpoints are only consulted
    /// to trim how far back `list_for_version` needs to walk) up to `version`, or the latest
    /// version if `None`.
    pub fn try_new(
        storage: &Arc<dyn StorageHandler>,
        table_root: Url,
        version: Option<Version>,
    ) -> DeltaResult<Self> {
        let segment = LogSegment::list_for_version(storage, &table_root, version)?;
        if segment.commit_files.is_empty() && segment.checkpoint_version.is_none() {
            return Err(Error::generic(format!(
                "no commits found at or before the requested version under {table_root}"
            )));
        }

        let mut protocol: Option<Protocol> = None;
        let mut metadata: Option<Metadata> = None;
        let mut active_files: HashMap<String, Add> = HashMap::new();
        let mut active_domain_metadata: HashMap<String, String> = HashMap::new();
        let mut application_transactions: HashMap<String, Version> = HashMap::new();
        let mut latest_commit_timestamp: i64 = 0;

        for commit in &segment.commit_files {
            let bytes = storage.read_file(&commit.location)?;
            let text = String::from_utf8_lossy(&bytes);
            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match Action::from_json_line(line)? {
                    Action::Protocol(p) => protocol = Some(p),
                    Action::Metadata(m) => metadata = Some(m),
                    Action::Add(add) => {
                        active_files.insert(add.path.clone(), add);
                    }
                    Action::Remove(remove) => {
                        active_files.remove(&remove.path);
                    }
                    Action::Txn(txn) => {
                        application_transactions.insert(txn.app_id, txn.version);
                    }
                    Action::DomainMetadata(dm) => {
                        merge_domain_metadata(&mut active_domain_metadata, [dm]);
                    }
                    // Commit files are walked in version order, so the last one seen carries
                    // the read snapshot's latest timestamp (logical ICT if present, else wall
                    // clock) — the floor the next commit's ICT must exceed (spec §4.2).
                    Action::CommitInfo(info) => {
                        latest_commit_timestamp = info.in_commit_timestamp.unwrap_or(info.timestamp);
                    }
                }
            }
        }

        let protocol = protocol.ok_or_else(|| Error::generic("log segment has no Protocol action"))?;
        let metadata = metadata.ok_or_else(|| Error::generic("log segment has no Metadata action"))?;
        let table_configuration =
            TableConfiguration::try_new(metadata, protocol, table_root, segment.end_version)?;

        Ok(Self {
            table_configuration,
            active_files,
            active_domain_metadata,
            application_transactions,
            crc_info: None,
            latest_commit_timestamp,
        })
    }

    pub fn version(&self) -> Version {
        self.table_configuration.version()
    }

    pub fn table_configuration(&self) -> &TableConfiguration {
        &self.table_configuration
    }

    pub fn protocol(&self) -> &Protocol {
        self.table_configuration.protocol()
    }

    pub fn metadata(&self) -> &Metadata {
        self.table_configuration.metadata()
    }

    pub fn active_files(&self) -> impl Iterator<Item = &Add> {
        self.active_files.values()
    }

    pub fn active_domain_metadata(&self) -> &HashMap<String, String> {
        &self.active_domain_metadata
    }

    pub fn latest_transaction_version(&self, app_id: &str) -> Option<Version> {
        self.application_transactions.get(app_id).copied()
    }

    pub fn application_transactions(&self) -> &HashMap<String, Version> {
        &self.application_transactions
    }

    pub fn cached_crc_info(&self) -> Option<&CrcInfo> {
        self.crc_info.as_ref()
    }

    pub fn with_crc_info(mut self, crc_info: CrcInfo) -> Self {
        self.crc_info = Some(crc_info);
        self
    }

    /// The latest commit's timestamp (logical ICT if the table has them enabled, else wall
    /// clock). The floor a transaction's first-attempt ICT must exceed (spec §4.2).
    pub fn latest_commit_timestamp(&self) -> i64 {
        self.latest_commit_timestamp
    }

    pub fn row_id_high_water_mark(&self) -> DeltaResult<Option<i64>> {
        match self.active_domain_metadata.get(crate::actions::ROW_TRACKING_DOMAIN) {
            None => Ok(None),
            Some(configuration) => {
                let dm = crate::actions::DomainMetadata {
                    domain: crate::actions::ROW_TRACKING_DOMAIN.to_string(),
                    configuration: configuration.clone(),
                    removed: false,
                };
                crate::actions::parse_row_tracking_watermark(&dm).map(Some)
            }
        }
    }
}
