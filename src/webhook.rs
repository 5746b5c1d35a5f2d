use crate::rewriter::ImageRewriter;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use std::sync::Arc;
use tracing::warn;

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn mutate_pod(
    State(rewriter): State<Arc<ImageRewriter>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!("Received invalid admission review: {}", e);
            return Json(AdmissionResponse::invalid(e).into_review());
        }
    };

    Json(rewriter.handle(&request).into_review())
}

pub fn create_app(rewriter: Arc<ImageRewriter>) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/mutate-core-v1-pod", post(mutate_pod))
        .with_state(rewriter)
}
