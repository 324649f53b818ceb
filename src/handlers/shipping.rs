use super::AppJson;
use crate::{
    services::shipping::{
        webhook::{verify_signature, WebhookOutcome, SIGNATURE_HEADER, TIMESTAMP_HEADER},
        CancelView, CreateGuideInput, QuoteView, ShipmentView, TrackingInfo, TrackingRefresh,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

/// Body of every webhook answer. The status code is always 200 so the
/// carrier does not retry; `processed` says whether the event was taken.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub success: bool,
    pub processed: bool,
    /// advanced, refined, duplicate, stale, after_terminal, malformed,
    /// unauthorized, unknown_reference or failed
    #[schema(example = "advanced")]
    pub outcome: String,
}

impl From<&WebhookOutcome> for WebhookAck {
    fn from(outcome: &WebhookOutcome) -> Self {
        Self {
            success: true,
            processed: outcome.processed(),
            outcome: outcome.label().to_string(),
        }
    }
}

/// Shipping routes, mounted under `/api/shipping`
pub fn shipping_routes() -> Router<AppState> {
    Router::new()
        .route("/quote/:order_id", get(get_quote))
        .route("/create/:order_id", post(create_guide))
        .route("/update-tracking/:order_id", post(update_tracking))
        .route("/tracking/:order_id", get(get_tracking))
        .route("/cancel/:order_id", post(cancel_shipping))
        .route("/webhook", post(carrier_webhook))
}

#[utoipa::path(
    get,
    path = "/api/shipping/quote/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Carrier rates; book one by its idRate", body = ApiResponse<QuoteView>),
        (status = 400, description = "No address or carrier refused", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already has a shipment", body = crate::errors::ErrorResponse),
        (status = 503, description = "Carrier unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn get_quote(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<QuoteView> {
    let quote = state.services.shipping.get_quote(order_id).await?;
    Ok(Json(ApiResponse::success(quote)))
}

#[utoipa::path(
    post,
    path = "/api/shipping/create/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = CreateGuideInput,
    responses(
        (status = 200, description = "Guide booked", body = ApiResponse<ShipmentView>),
        (status = 400, description = "Unknown, used or expired idRate", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Guide already exists or is being created", body = crate::errors::ErrorResponse),
        (status = 503, description = "Carrier unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn create_guide(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    AppJson(input): AppJson<CreateGuideInput>,
) -> ApiResult<ShipmentView> {
    let shipment = state.services.shipping.create_guide(order_id, input).await?;
    Ok(Json(ApiResponse::success(shipment)))
}

#[utoipa::path(
    post,
    path = "/api/shipping/update-tracking/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Tracking refreshed from the carrier", body = ApiResponse<TrackingRefresh>),
        (status = 404, description = "Order or shipment not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Carrier answered with an unknown status", body = crate::errors::ErrorResponse),
        (status = 503, description = "Carrier unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn update_tracking(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<TrackingRefresh> {
    let refresh = state.services.shipping.update_tracking(order_id).await?;
    Ok(Json(ApiResponse::success(refresh)))
}

#[utoipa::path(
    get,
    path = "/api/shipping/tracking/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Last known state and history", body = ApiResponse<TrackingInfo>),
        (status = 404, description = "Order or shipment not found", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn get_tracking(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<TrackingInfo> {
    let tracking = state.services.shipping.get_tracking(order_id).await?;
    Ok(Json(ApiResponse::success(tracking)))
}

#[utoipa::path(
    post,
    path = "/api/shipping/cancel/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Shipment cancelled", body = ApiResponse<CancelView>),
        (status = 400, description = "Carrier refused the cancellation", body = crate::errors::ErrorResponse),
        (status = 404, description = "Nothing to cancel", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already delivered or cancelled", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn cancel_shipping(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<CancelView> {
    let cancelled = state.services.shipping.cancel(order_id).await?;
    Ok(Json(ApiResponse::success(cancelled)))
}

/// Carrier push notifications. Always answers 200.
#[utoipa::path(
    post,
    path = "/api/shipping/webhook",
    request_body = crate::services::shipping::WebhookPayload,
    responses(
        (status = 200, description = "Notification received", body = WebhookAck)
    ),
    tag = "shipping"
)]
pub async fn carrier_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Json<WebhookAck> {
    // oversized or unreadable bodies are still acknowledged
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "unreadable carrier webhook body");
            metrics::counter!("storefront_webhooks_total", 1, "outcome" => "malformed");
            let outcome = WebhookOutcome::Malformed(rejection.body_text());
            return Json(WebhookAck::from(&outcome));
        }
    };
    if let Some(secret) = state.config.carrier.webhook_secret.as_deref() {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        if let Err(err) = verify_signature(
            secret,
            header(TIMESTAMP_HEADER),
            header(SIGNATURE_HEADER),
            &body,
            state.config.carrier.webhook_tolerance_secs,
            Utc::now(),
        ) {
            warn!(error = %err, "rejecting carrier webhook");
            metrics::counter!("storefront_webhooks_total", 1, "outcome" => "unauthorized");
            let outcome = WebhookOutcome::Unauthorized(err.to_string());
            return Json(WebhookAck::from(&outcome));
        }
    }

    let outcome = state.services.shipping.process_webhook(&body).await;
    Json(WebhookAck::from(&outcome))
}
