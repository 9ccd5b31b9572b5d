/// Backend-neutral document vocabulary (snapshots, merge patches).
pub mod models;
/// Session document store adapters.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
