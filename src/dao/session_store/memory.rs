//! In-process session store used by tests and the single-machine demo mode.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::dao::{
    models::{CreateOutcome, DocumentSnapshot, MergePatch},
    session_store::{SessionStore, SnapshotStream},
    storage::{StorageError, StorageResult},
};

/// Documents live in watch channels so every subscriber sees the latest value
/// first and then each subsequent change.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    documents: Arc<DashMap<String, watch::Sender<Option<Value>>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn create_if_absent_now(&self, key: String, document: Value) -> CreateOutcome {
        // The shard lock held by the entry makes check-and-set atomic.
        match self.documents.entry(key) {
            Entry::Occupied(entry) => {
                let sender = entry.get();
                if sender.borrow().is_some() {
                    CreateOutcome::AlreadyExists
                } else {
                    sender.send_replace(Some(document));
                    CreateOutcome::Created
                }
            }
            Entry::Vacant(entry) => {
                let (sender, _receiver) = watch::channel(Some(document));
                entry.insert(sender);
                CreateOutcome::Created
            }
        }
    }

    fn merge_now(&self, key: &str, patch: &MergePatch) -> StorageResult<()> {
        patch.validate()?;
        let sender = self
            .documents
            .get(key)
            .ok_or_else(|| StorageError::missing(key))?;

        let mut outcome = Ok(());
        sender.send_if_modified(|current| match current {
            Some(document) => match patch.apply_to(document) {
                Ok(()) => true,
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            },
            None => {
                outcome = Err(StorageError::missing(key));
                false
            }
        });
        outcome
    }

    fn subscribe_now(&self, key: String) -> SnapshotStream {
        let receiver = self
            .documents
            .entry(key)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();

        WatchStream::new(receiver)
            .map(|current| {
                Ok(match current {
                    Some(document) => DocumentSnapshot::Present(document),
                    None => DocumentSnapshot::Missing,
                })
            })
            .boxed()
    }
}

impl SessionStore for MemorySessionStore {
    fn create_if_absent(
        &self,
        key: &str,
        document: Value,
    ) -> BoxFuture<'static, StorageResult<CreateOutcome>> {
        let outcome = self.create_if_absent_now(key.to_owned(), document);
        async move { Ok(outcome) }.boxed()
    }

    fn merge(&self, key: &str, patch: MergePatch) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.merge_now(key, &patch);
        async move { result }.boxed()
    }

    fn subscribe(&self, key: &str) -> BoxFuture<'static, StorageResult<SnapshotStream>> {
        let stream = self.subscribe_now(key.to_owned());
        async move { Ok(stream) }.boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        async { Ok(()) }.boxed()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        async { Ok(()) }.boxed()
    }
}
