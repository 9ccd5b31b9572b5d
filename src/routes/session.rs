use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::session::{
        ActionResponse, CreateSessionRequest, JoinSessionRequest, SessionViewDto, VoteRequest,
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes carrying the participant intents of the active session.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/session", get(current_session).post(create_session))
        .route("/session/join", post(join_session))
        .route("/session/leave", post(leave_session))
        .route("/session/round/start", post(start_round))
        .route("/session/round/advance", post(advance_round))
        .route("/session/vote", post(submit_vote))
}

/// Host a new session under a freshly generated code.
#[utoipa::path(
    post,
    path = "/session",
    tag = "session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionViewDto),
        (status = 503, description = "No storage backend available")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionViewDto>, AppError> {
    let view = session_service::create_session(&state, &payload.name).await?;
    Ok(Json(view.into()))
}

/// Join the session with the given code, creating it if nobody has.
#[utoipa::path(
    post,
    path = "/session/join",
    tag = "session",
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Session joined", body = SessionViewDto),
        (status = 400, description = "Invalid code or name"),
        (status = 503, description = "Storage unavailable or session not reached in time")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<Json<SessionViewDto>, AppError> {
    let view = session_service::join_session(&state, &payload.code, &payload.name).await?;
    Ok(Json(view.into()))
}

/// Stop following the active session.
#[utoipa::path(
    post,
    path = "/session/leave",
    tag = "session",
    responses(
        (status = 200, description = "Session left", body = ActionResponse),
        (status = 404, description = "Not part of any session")
    )
)]
pub async fn leave_session(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    let code = session_service::leave_session(&state).await?;
    Ok(Json(ActionResponse::new(format!("left session {code}"))))
}

/// Latest view of the active session.
#[utoipa::path(
    get,
    path = "/session",
    tag = "session",
    responses(
        (status = 200, description = "Current session", body = SessionViewDto),
        (status = 404, description = "Not part of any session")
    )
)]
pub async fn current_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionViewDto>, AppError> {
    let view = session_service::current_view(&state).await?;
    Ok(Json(view.into()))
}

/// Open the first round. Host only.
#[utoipa::path(
    post,
    path = "/session/round/start",
    tag = "session",
    responses(
        (status = 200, description = "Round opened", body = ActionResponse),
        (status = 403, description = "Only the host may start rounds"),
        (status = 409, description = "Session is not in the lobby"),
        (status = 502, description = "Question source failed")
    )
)]
pub async fn start_round(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    session_service::start_round(&state).await?;
    Ok(Json(ActionResponse::new("round started")))
}

/// Open the next round. Host only.
#[utoipa::path(
    post,
    path = "/session/round/advance",
    tag = "session",
    responses(
        (status = 200, description = "Round opened", body = ActionResponse),
        (status = 403, description = "Only the host may advance rounds"),
        (status = 409, description = "Results are not shown yet"),
        (status = 502, description = "Question source failed")
    )
)]
pub async fn advance_round(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    session_service::advance_round(&state).await?;
    Ok(Json(ActionResponse::new("next round started")))
}

/// Vote for one option of the current round.
#[utoipa::path(
    post,
    path = "/session/vote",
    tag = "session",
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote recorded", body = ActionResponse),
        (status = 409, description = "No round is open for voting")
    )
)]
pub async fn submit_vote(
    State(state): State<SharedState>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    session_service::submit_vote(&state, payload.option.into()).await?;
    Ok(Json(ActionResponse::new("vote recorded")))
}
