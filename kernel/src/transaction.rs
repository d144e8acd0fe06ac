//! The transaction commit loop (spec §4.2): canonical action ordering, in-commit-timestamp
//! computation, an atomic create-if-not-exists write attempt, and — if that attempt loses the
//! race — a bounded retry loop driven by [`crate::conflict_checker::ConflictChecker`].
//!
//! Grounded on the historical `delta-kernel-rs` `transaction.rs` (the `with_operation`/
//! `with_commit_info`/`add_files` builder ergonomics, `kernelVersion` stamping via
//! `generate_commit_info`) and on `delta-rs`'s transaction module for the retry/conflict-handling
//! shape (`CommitResult::Conflict` as an explicit, inspectable variant rather than only an error).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;

use crate::actions::{
    Action, Add, CommitInfo, DomainMetadata, Metadata, Protocol, Remove, Txn, CLUSTERING_DOMAIN,
    ROW_TRACKING_DOMAIN,
};
use crate::conflict_checker::ConflictChecker;
use crate::domain_metadata::DomainMetadataState;
use crate::engine::Engine;
use crate::iceberg_compat;
use crate::path::{commit_file_path, ensure_log_root};
use crate::post_commit::run_post_commit_hooks;
use crate::row_tracking;
use crate::snapshot::Snapshot;
use crate::table_configuration::TableConfiguration;
use crate::{DeltaResult, Error, PostCommitReport, Version};

/// Caller-tunable knobs for the commit loop. Threaded explicitly rather than read from a
/// process-wide singleton, per the anti-singleton design note this crate carries forward.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    pub max_retries: u32,
    pub engine_info: Option<String>,
    /// Versions between log-compaction hook firings; `0` disables the hook.
    pub log_compaction_interval: i64,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_retries: 10,
            engine_info: None,
            log_compaction_interval: 0,
        }
    }
}

#[derive(Debug)]
pub enum CommitResult {
    Committed {
        version: Version,
        post_commit: PostCommitReport,
    },
    /// The transaction could not be rebased automatically; the caller gets it back (with its
    /// read state already advanced past the winning commits it lost to) to retry manually, abort,
    /// or merge by hand.
    Conflict(Transaction, Version),
}

/// A single, single-attempt-at-a-time unit of work against one table. Not `Clone`: once it has
/// been handed to `commit`, it is consumed (a transaction that already wrote a commit file must
/// not be reused).
#[derive(Debug)]
pub struct Transaction {
    table_root: Url,
    read_version: Version,
    protocol: Protocol,
    metadata: Metadata,
    changes_protocol_or_metadata: bool,
    is_replace: bool,
    operation: String,
    options: TransactionOptions,
    adds: Vec<Add>,
    removes: Vec<Remove>,
    set_transactions: Vec<Txn>,
    domain_metadata: DomainMetadataState,
    active_domain_metadata: HashMap<String, String>,
    known_app_transactions: HashMap<String, Version>,
    row_id_high_water_mark: Option<i64>,
    /// The read snapshot's latest commit timestamp (logical ICT if enabled, else wall clock).
    /// The first attempt's ICT must exceed this (spec §4.2: `max(wallClock,
    /// readSnapshotTimestamp + 1)`), same as a rebase floors every later attempt at the winning
    /// commit's timestamp.
    read_snapshot_timestamp: i64,
    /// A floor on the next attempt's in-commit timestamp, set after a rebase to
    /// `rebase.latest_commit_timestamp + 1` so ICT values stay strictly increasing across a
    /// retried attempt (spec §4.2's `max(attemptIct, rebase.latestCommitTimestamp + 1)` rule).
    ict_floor: Option<i64>,
    committed: bool,
}

impl Transaction {
    /// Build a transaction against an already-existing table, for ordinary (non-schema-changing)
    /// commits: appends, removes, domain metadata, idempotency markers.
    pub fn try_new(snapshot: &Snapshot) -> DeltaResult<Self> {
        Ok(Self {
            table_root: snapshot.table_configuration().table_root().clone(),
            read_version: snapshot.version(),
            protocol: snapshot.protocol().clone(),
            metadata: snapshot.metadata().clone(),
            changes_protocol_or_metadata: false,
            is_replace: false,
            operation: "WRITE".to_string(),
            options: TransactionOptions::default(),
            adds: Vec::new(),
            removes: Vec::new(),
            set_transactions: Vec::new(),
            domain_metadata: DomainMetadataState::new(),
            active_domain_metadata: snapshot.active_domain_metadata().clone(),
            known_app_transactions: snapshot.application_transactions().clone(),
            row_id_high_water_mark: snapshot.row_id_high_water_mark().ok().flatten(),
            read_snapshot_timestamp: snapshot.latest_commit_timestamp(),
            ict_floor: None,
            committed: false,
        })
    }

    pub(crate) fn new_for_create(
        table_root: Url,
        protocol: Protocol,
        metadata: Metadata,
        clustering_columns: Vec<String>,
        operation: String,
    ) -> Self {
        let mut domain_metadata = DomainMetadataState::new();
        if !clustering_columns.is_empty() {
            let configuration = serde_json::json!({ "clusteringColumns": clustering_columns }).to_string();
            domain_metadata.add_system(CLUSTERING_DOMAIN, configuration);
        }
        Self {
            table_root,
            read_version: crate::UNINITIALIZED_VERSION,
            protocol,
            metadata,
            changes_protocol_or_metadata: true,
            is_replace: false,
            operation,
            options: TransactionOptions::default(),
            adds: Vec::new(),
            removes: Vec::new(),
            set_transactions: Vec::new(),
            domain_metadata,
            active_domain_metadata: HashMap::new(),
            known_app_transactions: HashMap::new(),
            row_id_high_water_mark: None,
            read_snapshot_timestamp: 0,
            ict_floor: None,
            committed: false,
        }
    }

    /// `existing_active_domain_metadata` is the domain map of the table being replaced: every
    /// domain in it is tombstoned (REPLACE starts from a clean slate), except the clustering
    /// domain, which is dropped and reseeded from `clustering_columns` instead of tombstoned.
    pub(crate) fn new_for_replace(
        table_root: Url,
        read_version: Version,
        read_snapshot_timestamp: i64,
        protocol: Protocol,
        metadata: Metadata,
        tombstones: Vec<Remove>,
        existing_active_domain_metadata: HashMap<String, String>,
        clustering_columns: Vec<String>,
        operation: String,
    ) -> Self {
        let mut domain_metadata = DomainMetadataState::new();
        for domain in existing_active_domain_metadata.keys() {
            if domain == CLUSTERING_DOMAIN {
                continue;
            }
            domain_metadata.remove_system(domain.clone());
        }
        if !clustering_columns.is_empty() {
            let configuration = serde_json::json!({ "clusteringColumns": clustering_columns }).to_string();
            domain_metadata.add_system(CLUSTERING_DOMAIN, configuration);
        } else if existing_active_domain_metadata.contains_key(CLUSTERING_DOMAIN) {
            domain_metadata.remove_system(CLUSTERING_DOMAIN);
        }
        Self {
            table_root,
            read_version,
            protocol,
            metadata,
            changes_protocol_or_metadata: true,
            is_replace: true,
            operation,
            options: TransactionOptions::default(),
            adds: Vec::new(),
            removes: tombstones,
            set_transactions: Vec::new(),
            domain_metadata,
            active_domain_metadata: existing_active_domain_metadata,
            known_app_transactions: HashMap::new(),
            row_id_high_water_mark: None,
            read_snapshot_timestamp,
            ict_floor: None,
            committed: false,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Stage an idempotency marker. Rejects a `(app_id, version)` pair the read snapshot already
    /// has a committed version at or past, so a retried write request fails fast instead of
    /// silently re-executing the application's operation.
    pub fn with_transaction_id(mut self, app_id: impl Into<String>, version: Version) -> DeltaResult<Self> {
        let app_id = app_id.into();
        if let Some(committed_version) = self.known_app_transactions.get(&app_id) {
            if *committed_version >= version {
                return Err(Error::ConcurrentTransaction {
                    app_id,
                    committed_version: *committed_version,
                    attempted_version: version,
                });
            }
        }
        self.set_transactions.push(Txn::new(app_id, version, None));
        Ok(self)
    }

    pub fn add_files(mut self, adds: impl IntoIterator<Item = Add>) -> Self {
        self.adds.extend(adds);
        self
    }

    pub fn remove_files(mut self, removes: impl IntoIterator<Item = Remove>) -> Self {
        self.removes.extend(removes);
        self
    }

    pub fn with_domain_metadata(mut self, domain: impl Into<String>, configuration: impl Into<String>) -> DeltaResult<Self> {
        self.domain_metadata.add(domain, configuration)?;
        Ok(self)
    }

    pub fn without_domain_metadata(mut self, domain: impl Into<String>) -> DeltaResult<Self> {
        self.domain_metadata.remove(domain)?;
        Ok(self)
    }

    /// Overrides the row-tracking high-water mark directly, bypassing the usual
    /// read-then-bump flow. Pins the retry budget to zero: a caller setting the watermark by
    /// hand is asserting it already knows the latest value, so a collision means it raced
    /// another writer and must re-read before trying again rather than being silently rebased
    /// (spec §4.3).
    pub fn with_row_tracking_watermark(mut self, watermark: i64) -> DeltaResult<Self> {
        if watermark < 0 {
            return Err(Error::NegativeRowIdWatermark(watermark));
        }
        self.row_id_high_water_mark = Some(watermark);
        self.options.max_retries = 0;
        Ok(self)
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn touched_domains(&self, pending_domain_actions: &[DomainMetadata]) -> Vec<String> {
        pending_domain_actions.iter().map(|d| d.domain.clone()).collect()
    }

    fn app_ids(&self) -> HashMap<String, Version> {
        self.set_transactions
            .iter()
            .map(|t| (t.app_id.clone(), t.version))
            .collect()
    }

    fn validate_iceberg_compat(&self, adds: &[Add]) -> DeltaResult<()> {
        let table_configuration = TableConfiguration::try_new(
            self.metadata.clone(),
            self.protocol.clone(),
            self.table_root.clone(),
            self.read_version,
        )?;
        if let Some(version) = table_configuration.active_iceberg_compat_version()? {
            iceberg_compat::check_schema_types(version, &self.metadata)?;
            iceberg_compat::check_no_deletion_vectors(version, adds)?;
        }
        Ok(())
    }

    fn build_actions(&mut self, attempt_version: Version, ict: Option<i64>) -> DeltaResult<Vec<Action>> {
        let mut actions = Vec::new();

        let mut commit_info = CommitInfo::new(
            Self::now_millis(),
            Some(self.operation.clone()),
            self.options.engine_info.clone(),
        );
        commit_info.in_commit_timestamp = ict;
        actions.push(Action::CommitInfo(commit_info));

        // Canonical order (spec §4.2/§8): commitInfo, [metadata], [protocol], [txn],
        // domainMetadata*, (remove|add)*.
        if self.changes_protocol_or_metadata {
            actions.push(Action::Metadata(self.metadata.clone()));
            actions.push(Action::Protocol(self.protocol.clone()));
        }

        let domain_actions = self.domain_metadata.resolve(&self.active_domain_metadata)?;
        self.validate_iceberg_compat(&self.adds)?;

        // Staged adds/removes are cloned, not taken: a failed write attempt must leave them
        // intact so the next attempt (after a rebase) can re-stage them against a fresh watermark.
        let mut adds = self.adds.clone();
        let table_configuration = TableConfiguration::try_new(
            self.metadata.clone(),
            self.protocol.clone(),
            self.table_root.clone(),
            self.read_version,
        )?;
        if table_configuration.is_append_only_enabled().unwrap_or(false)
            && self.removes.iter().any(|r| r.data_change)
        {
            return Err(Error::CannotModifyAppendOnlyTable);
        }
        let mut watermark_action = None;
        if table_configuration.is_row_tracking_enabled().unwrap_or(false) {
            // `self.row_id_high_water_mark` must NOT be updated here: this is a speculative
            // attempt that may lose the race. Only a winning commit's watermark bump (recorded
            // via the conflict resolver's rebase, below) or a successful write may advance it —
            // otherwise a failed attempt's bump would be double-counted on retry (spec §4.3:
            // retry starts at `max(currentWatermark, winnerWatermark) + 1`, where
            // `currentWatermark` is the watermark as of the read snapshot, not a prior failed
            // attempt).
            let current = self.row_id_high_water_mark.unwrap_or(0);
            let (assigned, new_watermark) = row_tracking::assign_row_ids(adds, current, attempt_version)?;
            adds = assigned;
            if new_watermark != current {
                watermark_action = Some(row_tracking::watermark_domain_metadata(new_watermark)?);
            }
        }

        for txn in &self.set_transactions {
            actions.push(Action::Txn(txn.clone()));
        }
        for dm in domain_actions {
            actions.push(Action::DomainMetadata(dm));
        }
        if let Some(watermark) = watermark_action {
            actions.push(Action::DomainMetadata(watermark));
        }
        for remove in self.removes.clone() {
            actions.push(Action::Remove(remove));
        }
        for add in adds {
            actions.push(Action::Add(add));
        }

        Ok(actions)
    }

    /// Attempt to commit, retrying through the conflict resolver up to
    /// `self.options.max_retries` times. Consumes `self`: on success or on giving up with an
    /// unrebaseable conflict, ownership moves into the returned [`CommitResult`].
    pub fn commit(mut self, engine: &dyn Engine) -> DeltaResult<CommitResult> {
        if self.committed {
            return Err(Error::TransactionAlreadyAttempted);
        }
        let storage = engine.storage_handler();
        let log_root = ensure_log_root(&self.table_root)?;

        let mut attempts = 0;
        loop {
            let attempt_version = self.read_version + 1;
            let table_configuration = TableConfiguration::try_new(
                self.metadata.clone(),
                self.protocol.clone(),
                self.table_root.clone(),
                self.read_version,
            )?;
            let ict = table_configuration
                .is_in_commit_timestamps_enabled()
                .unwrap_or(false)
                .then(|| match self.ict_floor {
                    Some(floor) => Self::now_millis().max(floor),
                    // First attempt: floor at the read snapshot's own latest timestamp so two
                    // versions committed within the same wall-clock millisecond still produce a
                    // strictly increasing ICT (spec §4.2: `max(wallClock, readSnapshotTimestamp +
                    // 1)`).
                    None => Self::now_millis().max(self.read_snapshot_timestamp + 1),
                });
            // First ICT-enabled commit: record when it happened so readers can tell whether a
            // given version's timestamp is wall-clock or logical (spec §4.2).
            if let Some(ict) = ict {
                if table_configuration.in_commit_timestamp_enablement()?.is_none() {
                    self.metadata
                        .configuration
                        .extend(crate::table_configuration::ict_enablement_properties(
                            attempt_version,
                            ict,
                        ));
                    self.changes_protocol_or_metadata = true;
                }
            }
            let domain_names = self.domain_metadata.resolve(&self.active_domain_metadata)?;
            let mut touched = self.touched_domains(&domain_names);
            // A transaction that stages adds under row tracking implicitly writes the
            // row-tracking domain every attempt (see `build_actions`), even though it was never
            // staged through `with_domain_metadata`. It must be in `touched` so a winning
            // watermark bump is recognized as a rebasable conflict instead of silently missed,
            // which would otherwise let this attempt re-assign already-claimed row ids.
            if !self.adds.is_empty()
                && table_configuration.is_row_tracking_enabled().unwrap_or(false)
                && !touched.contains(&ROW_TRACKING_DOMAIN.to_string())
            {
                touched.push(ROW_TRACKING_DOMAIN.to_string());
            }
            let app_ids = self.app_ids();

            let actions = self.build_actions(attempt_version, ict)?;
            let body = actions
                .iter()
                .map(Action::to_json_line)
                .collect::<DeltaResult<Vec<_>>>()?
                .join("\n");
            let commit_path = commit_file_path(&log_root, attempt_version)?;

            if attempt_version == 0 {
                storage.mkdirs(&log_root)?;
            }

            match storage.write_file_atomically(&commit_path, body.into_bytes(), false) {
                Ok(()) => {
                    self.committed = true;
                    tracing::info!(version = attempt_version, operation = %self.operation, "committed");
                    let snapshot = Snapshot::try_new(&storage, self.table_root.clone(), Some(attempt_version))?;
                    let checkpoint_interval = snapshot.table_configuration().checkpoint_interval()?;
                    let post_commit = run_post_commit_hooks(
                        &storage,
                        &log_root,
                        &snapshot,
                        checkpoint_interval,
                        self.options.log_compaction_interval,
                    )?;
                    return Ok(CommitResult::Committed {
                        version: attempt_version,
                        post_commit,
                    });
                }
                Err(Error::FileAlreadyExists) => {
                    if attempts >= self.options.max_retries {
                        return Ok(CommitResult::Conflict(self, attempt_version));
                    }
                    attempts += 1;
                    let checker = ConflictChecker::new(&storage, &self.table_root);
                    match checker.check(self.read_version, &touched, &app_ids) {
                        Ok(rebase) => {
                            tracing::warn!(
                                attempt = attempts,
                                new_read_version = rebase.new_read_version,
                                "rebasing transaction after concurrent commit"
                            );
                            self.read_version = rebase.new_read_version;
                            if let Some(watermark) = rebase.row_id_high_water_mark {
                                self.row_id_high_water_mark =
                                    Some(self.row_id_high_water_mark.unwrap_or(0).max(watermark));
                            }
                            if let Some(ts) = rebase.latest_commit_timestamp {
                                self.ict_floor = Some(self.ict_floor.unwrap_or(0).max(ts + 1));
                            }
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_replace::{CreateOrReplaceTableBuilder, TableCreationMode};
    use crate::engine::InMemoryEngine;
    use crate::schema::{DataType, StructField, StructType};

    #[test]
    fn create_then_append_commits_two_versions() {
        let engine = InMemoryEngine::new();
        let table_root: Url = "memory:///txn_table/".parse().unwrap();
        let schema = StructType::new([StructField::not_null("id", DataType::LONG)]);
        let txn = CreateOrReplaceTableBuilder::new(table_root.clone(), TableCreationMode::Create)
            .with_schema(schema)
            .build(&engine.storage_handler())
            .unwrap()
            .unwrap();
        let result = txn.commit(&engine).unwrap();
        let CommitResult::Committed { version, .. } = result else {
            panic!("expected commit");
        };
        assert_eq!(version, 0);

        let snapshot = Snapshot::try_new(&engine.storage_handler(), table_root, None).unwrap();
        let txn = Transaction::try_new(&snapshot)
            .unwrap()
            .with_operation("WRITE")
            .add_files([Add {
                path: "part-1.parquet".into(),
                size: 10,
                modification_time: 1,
                data_change: true,
                stats: Some("{\"numRecords\":1}".into()),
                ..Default::default()
            }]);
        let result = txn.commit(&engine).unwrap();
        let CommitResult::Committed { version, .. } = result else {
            panic!("expected commit");
        };
        assert_eq!(version, 1);
    }

    #[test]
    fn duplicate_transaction_id_is_rejected() {
        let engine = InMemoryEngine::new();
        let table_root: Url = "memory:///txn_table2/".parse().unwrap();
        let schema = StructType::new([StructField::not_null("id", DataType::LONG)]);
        let txn = CreateOrReplaceTableBuilder::new(table_root.clone(), TableCreationMode::Create)
            .with_schema(schema)
            .build(&engine.storage_handler())
            .unwrap()
            .unwrap();
        txn.commit(&engine).unwrap();

        let snapshot = Snapshot::try_new(&engine.storage_handler(), table_root.clone(), None).unwrap();
        Transaction::try_new(&snapshot)
            .unwrap()
            .with_transaction_id("writer-a", 1)
            .unwrap()
            .commit(&engine)
            .unwrap();

        let snapshot = Snapshot::try_new(&engine.storage_handler(), table_root, None).unwrap();
        let result = Transaction::try_new(&snapshot)
            .unwrap()
            .with_transaction_id("writer-a", 1);
        assert!(result.is_err());
    }

    #[test]
    fn first_ict_enabled_commit_records_enablement_version() {
        use crate::table_configuration::{ICT_ENABLEMENT_TIMESTAMP_KEY, ICT_ENABLEMENT_VERSION_KEY};
        use crate::table_features::WriterFeature;
        use std::collections::HashMap as Map;

        let engine = InMemoryEngine::new();
        let table_root: Url = "memory:///ict_table/".parse().unwrap();
        let schema = StructType::new([StructField::not_null("id", DataType::LONG)]);
        let txn = CreateOrReplaceTableBuilder::new(table_root.clone(), TableCreationMode::Create)
            .with_schema(schema)
            .with_writer_feature(WriterFeature::InCommitTimestamp)
            .with_configuration(Map::from([(
                "delta.enableInCommitTimestamps".to_string(),
                "true".to_string(),
            )]))
            .build(&engine.storage_handler())
            .unwrap()
            .unwrap();
        let CommitResult::Committed { version, .. } = txn.commit(&engine).unwrap() else {
            panic!("expected commit");
        };
        assert_eq!(version, 0);

        let snapshot = Snapshot::try_new(&engine.storage_handler(), table_root, None).unwrap();
        let (enablement_version, _) = snapshot
            .table_configuration()
            .in_commit_timestamp_enablement()
            .unwrap()
            .expect("enablement keys should be recorded on the first ICT-enabled commit");
        assert_eq!(enablement_version, 0);
        assert!(snapshot
            .metadata()
            .configuration
            .contains_key(ICT_ENABLEMENT_VERSION_KEY));
        assert!(snapshot
            .metadata()
            .configuration
            .contains_key(ICT_ENABLEMENT_TIMESTAMP_KEY));
    }
}
