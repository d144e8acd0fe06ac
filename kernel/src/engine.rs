//! The external interfaces a host engine implements: storage access in particular. Grounded on
//! `delta-kernel-rs`'s `client/sync` module — an `Engine` trait handing out `Arc<dyn Handler>`
//! trait objects — but the handler here talks to `object_store` directly instead of routing
//! through Arrow/Parquet readers, since this crate never reads table data.
//!
//! `object_store`'s trait is `async`; this crate's concurrency model (spec §5) is synchronous, so
//! every call is driven to completion with `futures::executor::block_on` rather than pulling in
//! an async runtime.

use std::sync::Arc;

use futures::executor::block_on;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutMode, PutOptions};
use url::Url;

use crate::{DeltaResult, Error};

#[derive(Debug, Clone)]
pub struct FileMeta {
    pub location: Url,
    pub size: u64,
    pub last_modified: i64,
}

/// Storage operations the transaction core needs: listing a log directory, reading a JSON commit
/// file whole, and writing one atomically (the optimistic-concurrency primitive the whole commit
/// protocol rests on).
pub trait StorageHandler: Send + Sync {
    /// List every object at or after `start_from` (lexicographic order), non-recursively.
    fn list_from(&self, start_from: &Url) -> DeltaResult<Vec<FileMeta>>;

    fn read_file(&self, path: &Url) -> DeltaResult<Vec<u8>>;

    /// Write `data` to `path`. If `overwrite` is `false`, the write must fail with
    /// [`Error::FileAlreadyExists`] if the path is already occupied — this is the
    /// create-if-not-exists guarantee the commit loop's optimistic concurrency depends on.
    fn write_file_atomically(&self, path: &Url, data: Vec<u8>, overwrite: bool) -> DeltaResult<()>;

    fn mkdirs(&self, path: &Url) -> DeltaResult<()>;
}

/// What a host engine hands the transaction core. Kept to a single method (unlike
/// `delta-kernel-rs`'s full `Engine`, which also hands out expression/json/parquet handlers)
/// because this crate has no data-file or expression-evaluation concerns of its own.
pub trait Engine: Send + Sync {
    fn storage_handler(&self) -> Arc<dyn StorageHandler>;
}

/// A [`StorageHandler`] backed by any `object_store::ObjectStore`. Both the in-memory and
/// local-filesystem engines below are thin constructors around this.
pub struct ObjectStoreHandler {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreHandler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn to_store_path(url: &Url) -> DeltaResult<StorePath> {
        StorePath::from_url_path(url.path())
            .map_err(|e| Error::generic(format!("invalid storage path {url}: {e}")))
    }
}

impl StorageHandler for ObjectStoreHandler {
    fn list_from(&self, start_from: &Url) -> DeltaResult<Vec<FileMeta>> {
        let prefix = Self::to_store_path(start_from)?;
        let parent = StorePath::from_iter(prefix.parts().take(prefix.parts().count().saturating_sub(1)));
        block_on(async {
            use futures::TryStreamExt;
            let mut entries: Vec<FileMeta> = self
                .store
                .list(Some(&parent))
                .map_ok(|meta| FileMeta {
                    location: start_from.join(meta.location.filename().unwrap_or_default())
                        .unwrap_or_else(|_| start_from.clone()),
                    size: meta.size as u64,
                    last_modified: meta.last_modified.timestamp_millis(),
                })
                .try_collect()
                .await
                .map_err(Error::from)?;
            entries.retain(|f| f.location.path() >= start_from.path());
            entries.sort_by(|a, b| a.location.path().cmp(b.location.path()));
            Ok(entries)
        })
    }

    fn read_file(&self, path: &Url) -> DeltaResult<Vec<u8>> {
        let store_path = Self::to_store_path(path)?;
        block_on(async {
            let result = self.store.get(&store_path).await.map_err(Error::from)?;
            let bytes = result.bytes().await.map_err(Error::from)?;
            Ok(bytes.to_vec())
        })
    }

    fn write_file_atomically(&self, path: &Url, data: Vec<u8>, overwrite: bool) -> DeltaResult<()> {
        let store_path = Self::to_store_path(path)?;
        let mode = if overwrite {
            PutMode::Overwrite
        } else {
            PutMode::Create
        };
        block_on(async {
            self.store
                .put_opts(&store_path, data.into(), PutOptions::from(mode))
                .await
                .map_err(|e| match e {
                    object_store::Error::AlreadyExists { .. } => Error::FileAlreadyExists,
                    other => Error::from(other),
                })?;
            Ok(())
        })
    }

    fn mkdirs(&self, _path: &Url) -> DeltaResult<()> {
        // object_store has no explicit directory concept; writes create any needed prefix.
        Ok(())
    }
}

/// An in-process, ephemeral engine for tests: no filesystem, no network, safe to construct
/// thousands of times in a test suite.
pub struct InMemoryEngine {
    handler: Arc<dyn StorageHandler>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            handler: Arc::new(ObjectStoreHandler::new(Arc::new(
                object_store::memory::InMemory::new(),
            ))),
        }
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for InMemoryEngine {
    fn storage_handler(&self) -> Arc<dyn StorageHandler> {
        self.handler.clone()
    }
}

/// A local-filesystem-backed engine, for integration tests and CLI tooling that wants a real
/// directory on disk.
pub struct LocalFsEngine {
    handler: Arc<dyn StorageHandler>,
}

impl LocalFsEngine {
    pub fn try_new(root: &std::path::Path) -> DeltaResult<Self> {
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)
            .map_err(Error::from)?;
        Ok(Self {
            handler: Arc::new(ObjectStoreHandler::new(Arc::new(store))),
        })
    }
}

impl Engine for LocalFsEngine {
    fn storage_handler(&self) -> Arc<dyn StorageHandler> {
        self.handler.clone()
    }
}
