//! Shared fixture builders for the kernel crate's integration tests: a quick way to stand up an
//! in-memory table at a known state without going through the full create/transaction API in
//! every test.
//!
//! Grounded on `delta-kernel-rs`'s own `test-utils` workspace member, which exists for the exact
//! same reason: keep hand-written JSON fixture construction out of individual test files.

use std::sync::Arc;

use delta_txn_kernel::{Add, CommitInfo, DomainMetadata, Format, Metadata, Protocol};
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use url::Url;
use uuid::Uuid;

/// A table root under the `memory://` scheme, unique per call so parallel tests never collide.
pub fn unique_table_root() -> Url {
    let id = Uuid::new_v4();
    format!("memory:///test-tables/{id}/").parse().unwrap()
}

pub fn simple_schema() -> String {
    serde_json::json!({
        "type": "struct",
        "fields": [
            {"name": "id", "type": "long", "nullable": false, "metadata": {}},
            {"name": "value", "type": "string", "nullable": true, "metadata": {}},
        ]
    })
    .to_string()
}

pub fn simple_metadata() -> Metadata {
    Metadata {
        id: Uuid::new_v4().to_string(),
        name: None,
        description: None,
        format: Format::default(),
        schema_string: simple_schema(),
        partition_columns: Vec::new(),
        created_time: Some(0),
        configuration: Default::default(),
    }
}

pub fn simple_protocol() -> Protocol {
    Protocol {
        min_reader_version: 1,
        min_writer_version: 2,
        reader_features: None,
        writer_features: None,
    }
}

pub fn add_file(path: &str, num_records: i64) -> Add {
    Add {
        path: path.to_string(),
        partition_values: Default::default(),
        size: 128,
        modification_time: 0,
        data_change: true,
        stats: Some(format!("{{\"numRecords\":{num_records}}}")),
        base_row_id: None,
        default_row_commit_version: None,
        tags: Default::default(),
    }
}

pub fn domain_metadata(domain: &str, configuration: &str) -> DomainMetadata {
    DomainMetadata {
        domain: domain.to_string(),
        configuration: configuration.to_string(),
        removed: false,
    }
}

/// Writes a raw `_delta_log/<version>.json` file containing `actions` (already-serialized lines)
/// directly via an in-memory `object_store`, bypassing the transaction API entirely — useful for
/// building up log state to exercise the conflict resolver and log-segment listing in isolation.
pub fn write_raw_commit(
    store: &Arc<dyn ObjectStore>,
    table_root: &Url,
    version: i64,
    lines: &[String],
) {
    let path = StorePath::from_url_path(
        table_root
            .join(&format!("_delta_log/{version:020}.json"))
            .unwrap()
            .path(),
    )
    .unwrap();
    let body = lines.join("\n");
    futures::executor::block_on(store.put(&path, body.into_bytes().into())).unwrap();
}

pub fn commit_info_line() -> String {
    serde_json::to_string(&serde_json::json!({ "commitInfo": CommitInfo::new(0, None, None) }))
        .unwrap()
}
