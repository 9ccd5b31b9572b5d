use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Result alias for MongoDB storage operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures that can occur while interacting with MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// Required environment variable is missing.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The connection URI could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The client could not be built or never answered the initial ping.
    #[error("failed to connect to MongoDB database `{database}`")]
    Connect {
        database: String,
        #[source]
        source: MongoError,
    },
    /// A health-check ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// Inserting a new session failed for a reason other than a duplicate key.
    #[error("failed to create session `{key}`")]
    CreateSession {
        key: String,
        #[source]
        source: MongoError,
    },
    /// The `$set` update was rejected.
    #[error("failed to merge into session `{key}`")]
    MergeSession {
        key: String,
        #[source]
        source: MongoError,
    },
    /// Reading the current document failed.
    #[error("failed to load session `{key}`")]
    LoadSession {
        key: String,
        #[source]
        source: MongoError,
    },
    /// Opening or polling the change stream failed.
    #[error("failed to watch session `{key}`")]
    WatchSession {
        key: String,
        #[source]
        source: MongoError,
    },
    /// A merge targeted a document that is not stored.
    #[error("session `{key}` does not exist")]
    MissingDocument { key: String },
    /// A value could not be converted between JSON and BSON.
    #[error("failed to convert session `{key}` between JSON and BSON")]
    Convert {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
