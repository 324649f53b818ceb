use super::AppJson;
use crate::{
    errors::ServiceError,
    models::{coupon, DiscountType},
    services::{
        coupons::{BulkCouponChanges, CouponValidation, CreateCouponInput, UpdateCouponInput},
        discounts::format_money,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Deserialize, Default, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CouponListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "id": "7d2f5a8e-1c3b-4e6f-9a0b-2c4d6e8f0a1b",
    "code": "VERANO10",
    "name": "Verano 10%",
    "discount_type": "percentage",
    "discount_value": "10",
    "min_purchase_amount": "50.00",
    "usage_limit": 100,
    "usage_count": 12,
    "remaining_uses": 88,
    "active": true,
    "featured": false,
    "expires_at": "2025-08-31T23:59:59Z",
    "created_at": "2025-06-01T10:00:00Z",
    "updated_at": "2025-06-01T10:00:00Z"
}))]
pub struct CouponSummary {
    pub id: Uuid,
    /// Upper-cased coupon code
    pub code: String,
    pub name: String,
    pub discount_type: DiscountType,
    /// Fixed amount, or percent (0-100] for percentage coupons
    #[schema(value_type = String)]
    pub discount_value: Decimal,
    #[schema(value_type = Option<String>)]
    pub min_purchase_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    /// Redemptions left; null when unlimited
    pub remaining_uses: Option<i32>,
    pub active: bool,
    pub featured: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<coupon::Model> for CouponSummary {
    fn from(model: coupon::Model) -> Self {
        Self {
            remaining_uses: model.remaining_uses(),
            id: model.id,
            code: model.code,
            name: model.name,
            discount_type: model.discount_type,
            discount_value: model.discount_value,
            min_purchase_amount: model.min_purchase_amount,
            usage_limit: model.usage_limit,
            usage_count: model.usage_count,
            active: model.active,
            featured: model.featured,
            expires_at: model.expires_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({"code": "VERANO10", "subtotal": "90.00", "shippingCost": "10.00"}))]
pub struct ValidateCouponRequest {
    pub code: String,
    /// Cart amount the coupon is checked against
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    /// Shipping line included in `subtotal`; never discounted
    #[serde(default, alias = "shipping_cost")]
    #[schema(value_type = Option<String>)]
    pub shipping_cost: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponValidationResponse {
    pub coupon: CouponSummary,
    /// Discount rendered with two decimals, e.g. "9.00"
    #[schema(example = "9.00")]
    pub discount_amount: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFeaturedRequest {
    pub current_featured: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToggleActiveRequest {
    pub current_active: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateRequest {
    pub ids: Vec<Uuid>,
    pub active: Option<bool>,
    pub featured: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkResult {
    pub affected: u64,
}

/// Coupon routes, mounted under `/api/coupons`
pub fn coupon_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_coupons).post(create_coupon))
        .route("/active", get(list_active_coupons))
        .route("/validate", post(validate_coupon))
        .route("/bulk-delete", post(bulk_delete_coupons))
        .route("/bulk-update", post(bulk_update_coupons))
        .route(
            "/:id",
            get(get_coupon).put(update_coupon).delete(delete_coupon),
        )
        .route("/:id/toggle-featured", patch(toggle_featured))
        .route("/:id/toggle-active", patch(toggle_active))
}

#[utoipa::path(
    get,
    path = "/api/coupons/active",
    responses(
        (status = 200, description = "Active coupons listed", body = ApiResponse<Vec<CouponSummary>>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn list_active_coupons(State(state): State<AppState>) -> ApiResult<Vec<CouponSummary>> {
    let coupons = state.services.coupons.list_active().await?;
    Ok(Json(ApiResponse::success(
        coupons.into_iter().map(CouponSummary::from).collect(),
    )))
}

#[utoipa::path(
    post,
    path = "/api/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon applies", body = ApiResponse<CouponValidationResponse>),
        (status = 400, description = "Coupon unknown, inactive, expired, exhausted or below minimum", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    AppJson(request): AppJson<ValidateCouponRequest>,
) -> ApiResult<CouponValidationResponse> {
    let validation = state
        .services
        .coupons
        .validate(
            &request.code,
            request.subtotal,
            request.shipping_cost.unwrap_or(Decimal::ZERO),
        )
        .await?;

    match validation {
        CouponValidation::Valid {
            coupon,
            discount_amount,
        } => Ok(Json(ApiResponse::success(CouponValidationResponse {
            coupon: CouponSummary::from(coupon),
            discount_amount: format_money(discount_amount),
        }))),
        CouponValidation::Invalid(rejection) => Err(rejection.into()),
    }
}

#[utoipa::path(
    get,
    path = "/api/coupons",
    params(CouponListQuery),
    responses(
        (status = 200, description = "Coupons listed", body = ApiResponse<PaginatedResponse<CouponSummary>>)
    ),
    tag = "coupons"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<CouponListQuery>,
) -> ApiResult<PaginatedResponse<CouponSummary>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(20)
        .clamp(1, state.config.api_max_page_size.max(1));

    let (coupons, total) = state.services.coupons.list(page, limit).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        coupons.into_iter().map(CouponSummary::from).collect(),
        total,
        page,
        limit,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Coupon found", body = ApiResponse<CouponSummary>),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CouponSummary> {
    let coupon = state.services.coupons.get(id).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

#[utoipa::path(
    post,
    path = "/api/coupons",
    request_body = CreateCouponInput,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponSummary>),
        (status = 400, description = "Invalid coupon", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already in use", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    AppJson(input): AppJson<CreateCouponInput>,
) -> Result<(StatusCode, Json<ApiResponse<CouponSummary>>), ServiceError> {
    let coupon = state.services.coupons.create(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(coupon.into())),
    ))
}

#[utoipa::path(
    put,
    path = "/api/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    request_body = UpdateCouponInput,
    responses(
        (status = 200, description = "Coupon updated", body = ApiResponse<CouponSummary>),
        (status = 400, description = "Invalid changes", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(input): AppJson<UpdateCouponInput>,
) -> ApiResult<CouponSummary> {
    let coupon = state.services.coupons.update(id, input).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

#[utoipa::path(
    delete,
    path = "/api/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Coupon deleted"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    state.services.coupons.soft_delete(id).await?;
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

#[utoipa::path(
    patch,
    path = "/api/coupons/{id}/toggle-featured",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    request_body = ToggleFeaturedRequest,
    responses(
        (status = 200, description = "Featured flag flipped", body = ApiResponse<CouponSummary>),
        (status = 400, description = "currentFeatured missing or not a boolean", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn toggle_featured(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(request): AppJson<ToggleFeaturedRequest>,
) -> ApiResult<CouponSummary> {
    let coupon = state
        .services
        .coupons
        .toggle_featured(id, request.current_featured)
        .await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

#[utoipa::path(
    patch,
    path = "/api/coupons/{id}/toggle-active",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    request_body = ToggleActiveRequest,
    responses(
        (status = 200, description = "Active flag flipped", body = ApiResponse<CouponSummary>),
        (status = 400, description = "currentActive missing or not a boolean", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn toggle_active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(request): AppJson<ToggleActiveRequest>,
) -> ApiResult<CouponSummary> {
    let coupon = state
        .services
        .coupons
        .toggle_active(id, request.current_active)
        .await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

#[utoipa::path(
    post,
    path = "/api/coupons/bulk-delete",
    request_body = BulkDeleteRequest,
    responses(
        (status = 200, description = "Coupons soft-deleted", body = ApiResponse<BulkResult>),
        (status = 400, description = "No ids given", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn bulk_delete_coupons(
    State(state): State<AppState>,
    AppJson(request): AppJson<BulkDeleteRequest>,
) -> ApiResult<BulkResult> {
    let affected = state.services.coupons.bulk_soft_delete(request.ids).await?;
    Ok(Json(ApiResponse::success(BulkResult { affected })))
}

#[utoipa::path(
    post,
    path = "/api/coupons/bulk-update",
    request_body = BulkUpdateRequest,
    responses(
        (status = 200, description = "Coupons updated", body = ApiResponse<BulkResult>),
        (status = 400, description = "No ids or no changes given", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn bulk_update_coupons(
    State(state): State<AppState>,
    AppJson(request): AppJson<BulkUpdateRequest>,
) -> ApiResult<BulkResult> {
    let changes = BulkCouponChanges {
        active: request.active,
        featured: request.featured,
        expires_at: request.expires_at,
    };
    let affected = state
        .services
        .coupons
        .bulk_update(request.ids, changes)
        .await?;
    Ok(Json(ApiResponse::success(BulkResult { affected })))
}
