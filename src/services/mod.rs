/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Persistent participant identity.
pub mod identity_service;
/// Question generators used to open rounds.
pub mod question_source;
/// Live connection to one shared session document.
pub mod session_client;
/// Session intents exposed to the presentation layer.
pub mod session_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
