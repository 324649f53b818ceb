use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront API

Coupon pricing, checkout and carrier shipments for the storefront.

## Features

- **Coupons**: administration, validation against a cart and single-use-safe redemption
- **Checkout**: orders priced with an optional coupon
- **Shipping**: carrier quotes, guide booking, tracking and cancellation
- **Carrier webhooks**: idempotent status notifications, always answered with 200

## Error Handling

Failing requests use one envelope:

```json
{
  "success": false,
  "error": "Bad Request",
  "message": "cupón expirado",
  "request_id": "req-abc123",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

`GET /api/coupons` accepts `page` (default 1) and `limit` (default 20).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "coupons", description = "Coupon administration and validation"),
        (name = "orders", description = "Checkout"),
        (name = "shipping", description = "Carrier shipment lifecycle")
    ),
    paths(
        // Coupons
        crate::handlers::coupons::list_active_coupons,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::delete_coupon,
        crate::handlers::coupons::toggle_featured,
        crate::handlers::coupons::toggle_active,
        crate::handlers::coupons::bulk_delete_coupons,
        crate::handlers::coupons::bulk_update_coupons,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,

        // Shipping
        crate::handlers::shipping::get_quote,
        crate::handlers::shipping::create_guide,
        crate::handlers::shipping::update_tracking,
        crate::handlers::shipping::get_tracking,
        crate::handlers::shipping::cancel_shipping,
        crate::handlers::shipping::carrier_webhook,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,
            crate::errors::ErrorResponse,
            crate::models::DiscountType,
            crate::models::OrderStatus,
            crate::models::ShippingStatus,
            crate::models::EventSource,
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let json = serde_json::to_string(&ApiDoc::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        for path in [
            "/api/coupons/validate",
            "/api/coupons/{id}/toggle-featured",
            "/api/orders",
            "/api/shipping/create/{order_id}",
            "/api/shipping/webhook",
        ] {
            assert!(json.contains(path), "missing {path}");
        }
    }
}
