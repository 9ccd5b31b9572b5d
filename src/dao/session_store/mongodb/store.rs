use std::{pin::pin, sync::Arc};

use async_stream::try_stream;
use futures::{FutureExt, Stream, StreamExt, TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database,
    bson::{Bson, Document, doc},
    change_stream::event::OperationType,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::FullDocumentType,
};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
};
use crate::dao::{
    models::{CreateOutcome, DocumentSnapshot, MergePatch},
    session_store::{SessionStore, SnapshotStream},
    storage::StorageResult,
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Session store backed by a MongoDB collection.
///
/// Creation is an `insert_one` keyed on `_id`, which the server rejects with a
/// duplicate-key error for every caller but the first. Merges are single
/// `$set` updates. Subscriptions follow a change stream, so the deployment
/// must run as a replica set.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    /// Replaced wholesale on reconnect; the database handle owns its client.
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let database = establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            database: RwLock::new(database),
            config,
        });

        Ok(Self { inner })
    }

    async fn collection(&self) -> Collection<Document> {
        self.inner
            .database
            .read()
            .await
            .collection::<Document>(SESSION_COLLECTION_NAME)
    }

    async fn create_session(&self, key: &str, document: Value) -> MongoResult<CreateOutcome> {
        let mut document = json_to_document(key, document)?;
        document.insert("_id", key);

        let collection = self.collection().await;
        match collection.insert_one(document).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(err) if is_duplicate_key(&err) => Ok(CreateOutcome::AlreadyExists),
            Err(source) => Err(MongoDaoError::CreateSession {
                key: key.to_owned(),
                source,
            }),
        }
    }

    async fn merge_session(&self, key: &str, patch: &MergePatch) -> MongoResult<()> {
        let mut assignments = Document::new();
        for (path, value) in patch.fields() {
            let value: Bson =
                serde_json::from_value(value.clone()).map_err(|source| MongoDaoError::Convert {
                    key: key.to_owned(),
                    source,
                })?;
            assignments.insert(path.dotted(), value);
        }

        let collection = self.collection().await;
        if assignments.is_empty() {
            // `$set` refuses an empty document; only existence matters then.
            let existing = collection
                .find_one(doc! { "_id": key })
                .await
                .map_err(|source| MongoDaoError::LoadSession {
                    key: key.to_owned(),
                    source,
                })?;
            return match existing {
                Some(_) => Ok(()),
                None => Err(MongoDaoError::MissingDocument {
                    key: key.to_owned(),
                }),
            };
        }

        let result = collection
            .update_one(doc! { "_id": key }, doc! { "$set": assignments })
            .await
            .map_err(|source| MongoDaoError::MergeSession {
                key: key.to_owned(),
                source,
            })?;

        if result.matched_count == 0 {
            return Err(MongoDaoError::MissingDocument {
                key: key.to_owned(),
            });
        }
        Ok(())
    }

    /// Open the change stream first, then read the current document, so no
    /// write can slip between the initial read and the first change event.
    fn snapshots(self, key: String) -> impl Stream<Item = StorageResult<DocumentSnapshot>> {
        try_stream! {
            let collection = self.collection().await;
            let changes = collection
                .watch()
                .pipeline([doc! { "$match": { "documentKey._id": key.as_str() } }])
                .full_document(FullDocumentType::UpdateLookup)
                .await
                .map_err(|source| MongoDaoError::WatchSession { key: key.clone(), source })?;

            let initial = collection
                .find_one(doc! { "_id": key.as_str() })
                .await
                .map_err(|source| MongoDaoError::LoadSession { key: key.clone(), source })?;
            yield match initial {
                Some(document) => document_to_snapshot(&key, document)?,
                None => DocumentSnapshot::Missing,
            };

            let mut changes = pin!(changes);
            while let Some(event) = changes
                .as_mut()
                .try_next()
                .await
                .map_err(|source| MongoDaoError::WatchSession { key: key.clone(), source })?
            {
                match event.operation_type {
                    OperationType::Insert | OperationType::Update | OperationType::Replace => {
                        if let Some(document) = event.full_document {
                            yield document_to_snapshot(&key, document)?;
                        }
                    }
                    OperationType::Delete => {
                        yield DocumentSnapshot::Missing;
                    }
                    _ => {}
                }
            }
        }
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn json_to_document(key: &str, value: Value) -> MongoResult<Document> {
    serde_json::from_value(value).map_err(|source| MongoDaoError::Convert {
        key: key.to_owned(),
        source,
    })
}

fn document_to_snapshot(key: &str, mut document: Document) -> MongoResult<DocumentSnapshot> {
    document.remove("_id");
    serde_json::to_value(&document)
        .map(DocumentSnapshot::Present)
        .map_err(|source| MongoDaoError::Convert {
            key: key.to_owned(),
            source,
        })
}

impl SessionStore for MongoSessionStore {
    fn create_if_absent(
        &self,
        key: &str,
        document: Value,
    ) -> BoxFuture<'static, StorageResult<CreateOutcome>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            store
                .create_session(&key, document)
                .await
                .map_err(Into::into)
        })
    }

    fn merge(&self, key: &str, patch: MergePatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            patch.validate()?;
            store
                .merge_session(&key, &patch)
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe(&self, key: &str) -> BoxFuture<'static, StorageResult<SnapshotStream>> {
        let stream = self.clone().snapshots(key.to_owned()).boxed();
        async move { Ok(stream) }.boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
