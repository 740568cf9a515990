//! `HarborCluster` conversion between v1alpha3 and v1beta1.

use super::{CONVERT_PATH, WebhookError, WebhookState};
use axum::Json;
use axum::extract::State;
use crds::conversion::{ConversionReview, review};
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn convert(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<ConversionReview>,
) -> Result<Json<ConversionReview>, WebhookError> {
    let request = body
        .request
        .ok_or_else(|| WebhookError::InvalidReview("conversion review has no request".to_string()))?;

    let response = review(&request);
    let converted = response.result.status == "Success";
    if converted {
        debug!(
            uid = %request.uid,
            "Converted {} objects to {}",
            response.converted_objects.len(),
            request.desired_api_version
        );
    } else {
        warn!(
            uid = %request.uid,
            "Conversion to {} failed: {}",
            request.desired_api_version,
            response.result.message.as_deref().unwrap_or_default()
        );
    }
    state.metrics.observe_webhook(CONVERT_PATH, converted);

    Ok(Json(ConversionReview {
        api_version: body.api_version,
        kind: body.kind,
        request: None,
        response: Some(response),
    }))
}
