mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::CouchDaoError;
pub use store::CouchSessionStore;

use crate::dao::storage::StorageError;

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::MissingDocument { key } => StorageError::Missing { key },
            CouchDaoError::MergeContention { key, attempts } => {
                StorageError::Contention { key, attempts }
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
