#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::{future::BoxFuture, stream::BoxStream};
use serde_json::Value;

use crate::dao::{
    models::{CreateOutcome, DocumentSnapshot, MergePatch},
    storage::StorageResult,
};

/// Stream of snapshots for one document. Dropping it unsubscribes.
pub type SnapshotStream = BoxStream<'static, StorageResult<DocumentSnapshot>>;

/// Abstraction over the replicated store holding session documents.
///
/// Implementations must make [`SessionStore::create_if_absent`] atomic: for
/// concurrent callers on a fresh key exactly one observes
/// [`CreateOutcome::Created`]. Every other write is a field-level merge.
/// Subscriptions deliver the current document first and then every change,
/// including the subscriber's own writes.
pub trait SessionStore: Send + Sync {
    /// Store `document` under `key` unless a document already exists there.
    /// An existing document is left untouched.
    fn create_if_absent(
        &self,
        key: &str,
        document: Value,
    ) -> BoxFuture<'static, StorageResult<CreateOutcome>>;

    /// Set every field of `patch` on the document under `key`, leaving other
    /// fields as they are. Fails with [`StorageError::Missing`] when absent.
    ///
    /// [`StorageError::Missing`]: crate::dao::storage::StorageError::Missing
    fn merge(&self, key: &str, patch: MergePatch) -> BoxFuture<'static, StorageResult<()>>;

    /// Follow the document under `key`, starting with its current state.
    fn subscribe(&self, key: &str) -> BoxFuture<'static, StorageResult<SnapshotStream>>;

    /// Check that the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
