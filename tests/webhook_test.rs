mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{json_body, TestApp};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::{json, Value};
use storefront_api::{
    models::{order, shipment_event, OrderStatus, ShippingStatus},
    services::shipping::webhook::{sign_payload, SIGNATURE_HEADER, TIMESTAMP_HEADER},
};

const WEBHOOK: &str = "/api/shipping/webhook";

async fn post_webhook(app: &TestApp, payload: &Value) -> Value {
    let response = app
        .request(Method::POST, WEBHOOK, Some(payload.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

async fn history_len(app: &TestApp, shipment_id: uuid::Uuid) -> u64 {
    shipment_event::Entity::find()
        .filter(shipment_event::Column::ShipmentId.eq(shipment_id))
        .count(&*app.state.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn replayed_notification_is_recorded_once() {
    let app = TestApp::new().await;
    let (order, shipment) = app.order_with_guide().await;
    let payload = json!({
        "trackingNumber": shipment.tracking_number,
        "status": "In Transit",
        "eventDate": "2030-05-02T08:30:00Z",
        "location": "Saltillo, COAH"
    });

    let first = post_webhook(&app, &payload).await;
    assert_eq!(first, json!({"success": true, "processed": true, "outcome": "advanced"}));
    let after_first = history_len(&app, shipment.id).await;

    let second = post_webhook(&app, &payload).await;
    assert_eq!(second["processed"], json!(true));
    assert_eq!(second["outcome"], json!("duplicate"));
    assert_eq!(history_len(&app, shipment.id).await, after_first);

    let tracking = app.state.services.shipping.get_tracking(order.id).await.unwrap();
    assert_eq!(tracking.shipping_status, ShippingStatus::InTransit);
    assert_eq!(tracking.shipment.carrier_status.as_deref(), Some("In Transit"));
}

#[tokio::test]
async fn nothing_moves_a_delivered_shipment_back() {
    let app = TestApp::new().await;
    let (order, shipment) = app.order_with_guide().await;

    let delivered = post_webhook(
        &app,
        &json!({
            "trackingNumber": shipment.tracking_number,
            "status": "delivered",
            "eventDate": "2030-05-04T12:00:00Z"
        }),
    )
    .await;
    assert_eq!(delivered["outcome"], json!("advanced"));

    for late in ["quoted", "in_transit", "cancelled"] {
        let ack = post_webhook(
            &app,
            &json!({"trackingNumber": shipment.tracking_number, "status": late}),
        )
        .await;
        assert_eq!(ack["outcome"], json!("after_terminal"), "status {late}");
    }

    let stored = order::Entity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.shipping_status, ShippingStatus::Delivered);
    assert_eq!(stored.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn out_of_order_updates_do_not_regress() {
    let app = TestApp::new().await;
    let (_, shipment) = app.order_with_guide().await;

    let ack = post_webhook(
        &app,
        &json!({
            "tracking_number": shipment.tracking_number,
            "status": "out_for_delivery",
            "event_date": "2030-05-03T09:00:00Z"
        }),
    )
    .await;
    assert_eq!(ack["outcome"], json!("advanced"));

    let late = post_webhook(
        &app,
        &json!({
            "trackingNumber": shipment.tracking_number,
            "status": "label created",
            "eventDate": "2030-05-01T09:00:00Z"
        }),
    )
    .await;
    assert_eq!(late["processed"], json!(true));
    assert_eq!(late["outcome"], json!("stale"));

    let refined = post_webhook(
        &app,
        &json!({
            "trackingNumber": shipment.tracking_number,
            "status": "Delayed",
            "eventDate": "2030-05-03T15:00:00Z"
        }),
    )
    .await;
    assert_eq!(refined["outcome"], json!("refined"));

    let tracking = app
        .state
        .services
        .shipping
        .get_tracking(shipment.order_id)
        .await
        .unwrap();
    assert_eq!(tracking.shipment.status, ShippingStatus::InTransit);
    assert_eq!(tracking.shipment.carrier_status.as_deref(), Some("Delayed"));
}

#[tokio::test]
async fn reference_finds_the_order_shipment() {
    let app = TestApp::new().await;
    let (order, _) = app.order_with_guide().await;

    let ack = post_webhook(
        &app,
        &json!({"reference": order.id.to_string(), "status": "picked up"}),
    )
    .await;
    assert_eq!(ack["outcome"], json!("advanced"));

    let stored = order::Entity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.shipping_status, ShippingStatus::InTransit);
    assert_eq!(stored.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn bad_deliveries_are_acknowledged_but_not_processed() {
    let app = TestApp::new().await;
    let (_, shipment) = app.order_with_guide().await;

    let malformed = app
        .request_raw(Method::POST, WEBHOOK, "{not json", &[])
        .await;
    assert_eq!(malformed.status(), StatusCode::OK);
    let malformed = json_body(malformed).await;
    assert_eq!(malformed["processed"], json!(false));
    assert_eq!(malformed["outcome"], json!("malformed"));

    let unknown_status = post_webhook(
        &app,
        &json!({"trackingNumber": shipment.tracking_number, "status": "teleported"}),
    )
    .await;
    assert_eq!(unknown_status["outcome"], json!("malformed"));

    let no_target = post_webhook(&app, &json!({"status": "delivered"})).await;
    assert_eq!(no_target["outcome"], json!("malformed"));

    let unknown_guide = post_webhook(
        &app,
        &json!({"trackingNumber": "TRK-NOT-OURS", "status": "delivered"}),
    )
    .await;
    assert_eq!(unknown_guide["processed"], json!(false));
    assert_eq!(unknown_guide["outcome"], json!("unknown_reference"));

    let unknown_order = post_webhook(
        &app,
        &json!({"reference": uuid::Uuid::new_v4().to_string(), "status": "delivered"}),
    )
    .await;
    assert_eq!(unknown_order["outcome"], json!("unknown_reference"));

    let tracking = app
        .state
        .services
        .shipping
        .get_tracking(shipment.order_id)
        .await
        .unwrap();
    assert_eq!(tracking.shipment.status, ShippingStatus::GuideCreated);
}

#[tokio::test]
async fn signed_webhooks_are_required_when_a_secret_is_set() {
    let secret = "whsec_integration";
    let app = TestApp::with_config(|cfg| {
        cfg.carrier.webhook_secret = Some(secret.to_string());
    })
    .await;
    let (_, shipment) = app.order_with_guide().await;
    let body = serde_json::to_vec(&json!({
        "trackingNumber": shipment.tracking_number,
        "status": "in transit",
        "eventDate": "2030-05-02T08:30:00Z"
    }))
    .unwrap();

    let unsigned = app
        .request_raw(Method::POST, WEBHOOK, body.clone(), &[])
        .await;
    assert_eq!(unsigned.status(), StatusCode::OK);
    let unsigned = json_body(unsigned).await;
    assert_eq!(unsigned["processed"], json!(false));
    assert_eq!(unsigned["outcome"], json!("unauthorized"));

    let timestamp = Utc::now().timestamp().to_string();
    let forged = app
        .request_raw(
            Method::POST,
            WEBHOOK,
            body.clone(),
            &[(TIMESTAMP_HEADER, timestamp.as_str()), (SIGNATURE_HEADER, "00ff")],
        )
        .await;
    assert_eq!(json_body(forged).await["outcome"], json!("unauthorized"));
    assert_eq!(history_len(&app, shipment.id).await, 1);

    let signature = sign_payload(secret, &timestamp, &body).unwrap();
    let signed = app
        .request_raw(
            Method::POST,
            WEBHOOK,
            body,
            &[(TIMESTAMP_HEADER, timestamp.as_str()), (SIGNATURE_HEADER, signature.as_str())],
        )
        .await;
    let signed = json_body(signed).await;
    assert_eq!(signed["processed"], json!(true));
    assert_eq!(signed["outcome"], json!("advanced"));
    assert_eq!(history_len(&app, shipment.id).await, 2);
}

#[tokio::test]
async fn unknown_tracking_number_falls_back_to_the_reference() {
    let app = TestApp::new().await;
    let (order, shipment) = app.order_with_guide().await;

    let ack = post_webhook(
        &app,
        &json!({
            "trackingNumber": "TRK-REISSUED-BY-CARRIER",
            "reference": order.id.to_string(),
            "status": "in transit",
            "eventDate": "2030-05-02T08:30:00Z"
        }),
    )
    .await;
    assert_eq!(ack, json!({"success": true, "processed": true, "outcome": "advanced"}));
    assert_eq!(history_len(&app, shipment.id).await, 2);

    let tracking = app.state.services.shipping.get_tracking(order.id).await.unwrap();
    assert_eq!(tracking.shipment.status, ShippingStatus::InTransit);
}

#[tokio::test]
async fn oversized_body_is_acknowledged_as_malformed() {
    let app = TestApp::new().await;
    let (_, shipment) = app.order_with_guide().await;

    let body = vec![b' '; 3 * 1024 * 1024];
    let response = app.request_raw(Method::POST, WEBHOOK, body, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = json_body(response).await;
    assert_eq!(ack, json!({"success": true, "processed": false, "outcome": "malformed"}));
    assert_eq!(history_len(&app, shipment.id).await, 1);
}
