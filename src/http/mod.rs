pub mod export;
pub mod response;
pub mod state;
pub mod summaries;

use axum::{routing::get, Router};

pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route(
            "/api/v1/groups/{group_id}/summaries",
            get(summaries::list_summaries),
        )
        .route(
            "/api/v1/groups/{group_id}/summaries/export",
            get(export::export_summaries),
        )
        .route(
            "/api/v1/summaries/{id}",
            get(summaries::get_summary).delete(summaries::delete_summary),
        )
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_returns_200() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.migrate().await.unwrap();
        let app = build_router(AppState { store });
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_summary_returns_404() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.migrate().await.unwrap();
        let app = build_router(AppState { store });
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/summaries/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
