use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

const SWAGGER_UI_PATH: &str = "/docs";
const OPENAPI_JSON_PATH: &str = "/api-doc/openapi.json";

/// Serve the Swagger UI backed by the generated OpenAPI document.
pub fn router(state: SharedState) -> Router<SharedState> {
    let ui: Router<SharedState> = SwaggerUi::new(SWAGGER_UI_PATH)
        .url(OPENAPI_JSON_PATH, ApiDoc::openapi())
        .into();

    ui.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_session_intent() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/sse/session",
            "/session",
            "/session/join",
            "/session/leave",
            "/session/round/start",
            "/session/round/advance",
            "/session/vote",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
