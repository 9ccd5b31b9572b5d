use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the vote session service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::session_stream,
        crate::routes::session::create_session,
        crate::routes::session::join_session,
        crate::routes::session::leave_session,
        crate::routes::session::current_session,
        crate::routes::session::start_round,
        crate::routes::session::advance_round,
        crate::routes::session::submit_vote,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::JoinSessionRequest,
            crate::dto::session::VoteRequest,
            crate::dto::session::SessionViewDto,
            crate::dto::session::ActionResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::SessionErrorEvent,
            crate::dto::sse::SessionLeftEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "session", description = "Session intents of this device"),
    )
)]
/// OpenAPI description of the HTTP surface.
pub struct ApiDoc;
