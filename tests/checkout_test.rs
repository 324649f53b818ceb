mod common;

use axum::http::{Method, StatusCode};
use common::{json_body, CouponSeed, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use std::str::FromStr;
use storefront_api::models::{coupon, DiscountType, OrderStatus, ShippingStatus};

fn decimal_at(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("money is rendered as a string")).unwrap()
}

#[tokio::test]
async fn checkout_prices_coupon_without_touching_shipping() {
    let app = TestApp::new().await;
    let seeded = app.seed_coupon(CouponSeed::default()).await;

    let order = app.place_order(Some("save10")).await;
    // items 100.00 + shipping 10.00, 10% off the items only
    assert_eq!(order.subtotal, dec!(100.00));
    assert_eq!(order.shipping_cost, dec!(10.00));
    assert_eq!(order.discount_amount, dec!(10.00));
    assert_eq!(order.total_amount, dec!(100.00));
    assert_eq!(order.coupon_code.as_deref(), Some("SAVE10"));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.shipping_status, ShippingStatus::None);
    assert_eq!(order.items.len(), 2);

    let stored = coupon::Entity::find_by_id(seeded.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 1);
}

#[tokio::test]
async fn checkout_without_coupon_charges_full_price() {
    let app = TestApp::new().await;
    let order = app.place_order(None).await;
    assert_eq!(order.discount_amount, dec!(0));
    assert_eq!(order.total_amount, dec!(110.00));
    assert!(order.coupon_id.is_none());
}

#[tokio::test]
async fn refused_coupon_blocks_the_order() {
    let app = TestApp::new().await;
    app.seed_coupon(CouponSeed {
        code: "GRANDE",
        discount_type: DiscountType::Fixed,
        discount_value: dec!(20),
        min_purchase_amount: Some(dec!(500)),
        ..Default::default()
    })
    .await;

    let body = json!({
        "items": [{"productName": "Taza", "quantity": 1, "unitPrice": "30.00"}],
        "shippingCost": "10.00",
        "recipient": {
            "name": "Ana", "street": "Calle 1", "city": "Monterrey",
            "postalCode": "64000", "country": "MX"
        },
        "couponCode": "GRANDE"
    });
    let response = app.request(Method::POST, "/api/orders", Some(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let message = json_body(response).await["message"].as_str().unwrap().to_string();
    assert!(message.starts_with("monto mínimo no alcanzado"), "{message}");

    let orders = storefront_api::models::order::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn order_routes_round_trip() {
    let app = TestApp::new().await;
    let body = json!({
        "items": [{"productName": "Taza", "sku": "TAZA-01", "quantity": 3, "unitPrice": "30.00"}],
        "shippingCost": "0",
        "recipient": {
            "name": "Ana", "street": "Calle 1", "city": "Monterrey",
            "postalCode": "64000", "country": "MX"
        }
    });
    let created = app.request(Method::POST, "/api/orders", Some(body)).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    let id = created["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(decimal_at(&created["data"]["total_amount"]), dec!(90));

    let fetched = app.request(Method::GET, &format!("/api/orders/{id}"), None).await;
    assert_eq!(fetched.status(), StatusCode::OK);
    let fetched = json_body(fetched).await;
    assert_eq!(decimal_at(&fetched["data"]["items"][0]["line_total"]), dec!(90));

    let missing = app
        .request(
            Method::GET,
            &format!("/api/orders/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let body = json!({
        "items": [],
        "recipient": {
            "name": "Ana", "street": "Calle 1", "city": "Monterrey",
            "postalCode": "64000", "country": "MX"
        }
    });
    let response = app.request(Method::POST, "/api/orders", Some(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn amounts_beyond_decimal_range_are_rejected() {
    let app = TestApp::new().await;
    let recipient = json!({
        "name": "Ana", "street": "Calle 1", "city": "Monterrey",
        "postalCode": "64000", "country": "MX"
    });

    let line_overflow = json!({
        "items": [{"productName": "Taza", "quantity": 2, "unitPrice": "70000000000000000000000000000"}],
        "recipient": recipient.clone(),
    });
    let with_shipping_overflow = json!({
        "items": [{"productName": "Taza", "quantity": 1, "unitPrice": "50000000000000000000000000000"}],
        "shippingCost": "50000000000000000000000000000",
        "recipient": recipient.clone(),
    });
    let weight_overflow = json!({
        "items": [{
            "productName": "Taza", "quantity": 3, "unitPrice": "30.00",
            "weightKg": "70000000000000000000000000000"
        }],
        "recipient": recipient.clone(),
    });

    for body in [line_overflow, with_shipping_overflow, weight_overflow] {
        let response = app.request(Method::POST, "/api/orders", Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["message"],
            json!("order amount is too large")
        );
    }

    let orders = storefront_api::models::order::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert!(orders.is_empty());
}
