use std::sync::Arc;

use async_stream::try_stream;
use futures::{FutureExt, Stream, StreamExt, future::BoxFuture};
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::dao::{
    models::{CreateOutcome, DocumentSnapshot, MergePatch},
    session_store::{SessionStore, SnapshotStream},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{ChangesResponse, CouchSessionDocument, DatabaseInfo, DocIdsFilter, seq_param},
};

const MAX_MERGE_ATTEMPTS: u32 = 8;
const CHANGES: &str = "_changes";

/// Outcome of a conditional PUT.
enum PutOutcome {
    Stored,
    Conflict,
}

/// Session store backed by a CouchDB database.
///
/// Creation relies on CouchDB rejecting a revision-less PUT on an existing id
/// with `409 Conflict`. Merges are optimistic read-modify-write cycles keyed
/// on `_rev`, retried on conflict, so concurrent merges never lose fields.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    longpoll_ms: u64,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::Connect {
                database: config.database.clone(),
                source,
            })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            longpoll_ms: config.longpoll_timeout.as_millis() as u64,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        let builder = self.client.request(method, url);
        self.authenticate(builder)
    }

    fn authenticate(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authenticate(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::Connect {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authenticate(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::Connect {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means a concurrent client created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::RequestStatus {
                        path: url,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::RequestStatus {
                path: url,
                status: other,
            }),
        }
    }

    async fn update_seq(&self) -> CouchResult<Value> {
        let url = self.database_url();
        let response = self
            .authenticate(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: url,
                status: response.status(),
            });
        }

        let info = response
            .json::<DatabaseInfo>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse { path: url, source })?;
        Ok(info.update_seq)
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<PutOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => Ok(PutOutcome::Stored),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    async fn create_document(&self, key: &str, document: Value) -> CouchResult<CreateOutcome> {
        let Value::Object(body) = document else {
            return Err(CouchDaoError::InvalidMerge {
                key: key.to_owned(),
                message: "session document must be a JSON object".into(),
            });
        };

        let document = CouchSessionDocument::new(key, body);
        match self.put_document(key, &document).await? {
            PutOutcome::Stored => Ok(CreateOutcome::Created),
            PutOutcome::Conflict => Ok(CreateOutcome::AlreadyExists),
        }
    }

    async fn merge_document(&self, key: &str, patch: &MergePatch) -> CouchResult<()> {
        for attempt in 1..=MAX_MERGE_ATTEMPTS {
            let Some(mut document) = self.get_document::<CouchSessionDocument>(key).await? else {
                return Err(CouchDaoError::MissingDocument {
                    key: key.to_owned(),
                });
            };

            let mut body = Value::Object(std::mem::take(&mut document.body));
            patch
                .apply_to(&mut body)
                .map_err(|err| CouchDaoError::InvalidMerge {
                    key: key.to_owned(),
                    message: err.to_string(),
                })?;
            if let Value::Object(map) = body {
                document.body = map;
            }

            match self.put_document(key, &document).await? {
                PutOutcome::Stored => return Ok(()),
                PutOutcome::Conflict => {
                    debug!(key, attempt, "revision conflict while merging; retrying");
                }
            }
        }

        Err(CouchDaoError::MergeContention {
            key: key.to_owned(),
            attempts: MAX_MERGE_ATTEMPTS,
        })
    }

    async fn changes_since(&self, key: &str, since: &Value) -> CouchResult<ChangesResponse> {
        let query = [
            ("feed", "longpoll".to_string()),
            ("filter", "_doc_ids".to_string()),
            ("include_docs", "true".to_string()),
            ("since", seq_param(since)),
            ("timeout", self.longpoll_ms.to_string()),
        ];

        let response = self
            .request(Method::POST, CHANGES)
            .query(&query)
            .json(&DocIdsFilter { doc_ids: [key] })
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }

    /// Emit the current document, then follow the `_changes` feed forever.
    ///
    /// The sequence is read before the document so no change between the two
    /// requests can be missed; at worst one snapshot is delivered twice.
    fn snapshots(self, key: String) -> impl Stream<Item = StorageResult<DocumentSnapshot>> {
        try_stream! {
            let mut since = self.update_seq().await?;
            let initial = self.get_document::<CouchSessionDocument>(&key).await?;
            yield initial
                .map(CouchSessionDocument::into_snapshot)
                .unwrap_or(DocumentSnapshot::Missing);

            loop {
                let changes = self.changes_since(&key, &since).await?;
                for row in changes.results {
                    if row.id != key {
                        continue;
                    }
                    if row.deleted {
                        yield DocumentSnapshot::Missing;
                        continue;
                    }
                    if let Some(doc) = row.doc {
                        let document: CouchSessionDocument = serde_json::from_value(doc)
                            .map_err(|source| CouchDaoError::DeserializeValue {
                                path: key.clone(),
                                source,
                            })?;
                        yield document.into_snapshot();
                    }
                }
                since = changes.last_seq;
            }
        }
    }
}

impl SessionStore for CouchSessionStore {
    fn create_if_absent(
        &self,
        key: &str,
        document: Value,
    ) -> BoxFuture<'static, StorageResult<CreateOutcome>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            store
                .create_document(&key, document)
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
                .merge_document(&key, &patch)
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
        Box::pin(async move {
            store.update_seq().await?;
            Ok(())
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
