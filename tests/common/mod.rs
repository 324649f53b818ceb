#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    app_router,
    carrier::{
        CarrierClient, CarrierError, Guide, GuideRequest, RateOption, RateRequest,
        TrackingSnapshot,
    },
    config::AppConfig,
    db::{self, DbConfig},
    events::{self, EventSender},
    handlers::AppServices,
    models::{coupon, DiscountType},
    services::{
        orders::{CheckoutInput, CheckoutItemInput, OrderView, RecipientInput},
        shipping::{CreateGuideInput, ShipmentView},
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const STANDARD_RATE: &str = "rate-std";
pub const EXPRESS_RATE: &str = "rate-exp";

/// Scripted carrier: fixed rates, sequential tracking numbers, and
/// switchable failures. Counts every call so tests can assert on bookings.
#[derive(Default)]
pub struct FakeCarrier {
    quotes: AtomicUsize,
    bookings: AtomicUsize,
    tracks: AtomicUsize,
    cancels: AtomicUsize,
    booking_delay: Mutex<Option<Duration>>,
    quote_failure: Mutex<Option<CarrierError>>,
    booking_failure: Mutex<Option<CarrierError>>,
    cancel_failure: Mutex<Option<CarrierError>>,
    track_snapshot: Mutex<Option<TrackingSnapshot>>,
}

impl FakeCarrier {
    pub fn bookings(&self) -> usize {
        self.bookings.load(Ordering::SeqCst)
    }

    pub fn quotes(&self) -> usize {
        self.quotes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    pub fn fail_quotes_with(&self, error: Option<CarrierError>) {
        *self.quote_failure.lock().unwrap() = error;
    }

    pub fn fail_bookings_with(&self, error: Option<CarrierError>) {
        *self.booking_failure.lock().unwrap() = error;
    }

    pub fn fail_cancels_with(&self, error: Option<CarrierError>) {
        *self.cancel_failure.lock().unwrap() = error;
    }

    pub fn delay_bookings(&self, delay: Duration) {
        *self.booking_delay.lock().unwrap() = Some(delay);
    }

    pub fn report_status(&self, carrier_status: &str, occurred_at: Option<DateTime<Utc>>) {
        *self.track_snapshot.lock().unwrap() = Some(TrackingSnapshot {
            carrier_status: carrier_status.to_string(),
            occurred_at,
            description: Some(format!("carrier says {carrier_status}")),
            location: Some("Monterrey, NL".to_string()),
        });
    }
}

#[async_trait]
impl CarrierClient for FakeCarrier {
    async fn quote(&self, request: &RateRequest) -> Result<Vec<RateOption>, CarrierError> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        let failure = self.quote_failure.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(vec![
            RateOption {
                id_rate: STANDARD_RATE.to_string(),
                carrier: "estafeta".to_string(),
                service: "standard".to_string(),
                price: dec!(120.00),
                currency: request.currency.clone(),
                delivery_days: Some(4),
            },
            RateOption {
                id_rate: EXPRESS_RATE.to_string(),
                carrier: "dhl".to_string(),
                service: "express".to_string(),
                price: dec!(240.00),
                currency: request.currency.clone(),
                delivery_days: Some(1),
            },
        ])
    }

    async fn create_guide(&self, request: &GuideRequest) -> Result<Guide, CarrierError> {
        let delay = *self.booking_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.booking_failure.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }

        let n = self.bookings.fetch_add(1, Ordering::SeqCst) + 1;
        let tracking_number = format!("TRK{:06}-{}", n, &request.reference[..8]);
        Ok(Guide {
            tracking_url: Some(format!("https://track.example.com/{tracking_number}")),
            label_url: Some(format!("https://labels.example.com/{tracking_number}.pdf")),
            guide_id: Some(format!("guide-{n}")),
            carrier_status: Some("created".to_string()),
            tracking_number,
        })
    }

    async fn track(
        &self,
        _carrier: &str,
        _tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        self.tracks.fetch_add(1, Ordering::SeqCst);
        self.track_snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CarrierError::Transient("no scripted tracking status".to_string()))
    }

    async fn cancel(&self, _carrier: &str, _tracking_number: &str) -> Result<(), CarrierError> {
        let failure = self.cancel_failure.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Coupon row inserted straight into the database, so tests can seed
/// states the admin API refuses (expired, exhausted, deleted)
pub struct CouponSeed {
    pub code: &'static str,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_purchase_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Default for CouponSeed {
    fn default() -> Self {
        Self {
            code: "SAVE10",
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            min_purchase_amount: None,
            usage_limit: None,
            usage_count: 0,
            active: true,
            expires_at: Utc::now() + chrono::Duration::days(30),
            deleted_at: None,
        }
    }
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub carrier: Arc<FakeCarrier>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        configure(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let carrier = Arc::new(FakeCarrier::default());
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            carrier.clone() as Arc<dyn CarrierClient>,
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: app_router(state.clone()),
            state,
            carrier,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a raw body with extra headers, for signed webhooks and malformed payloads.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: impl Into<Body>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder.body(body.into()).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_coupon(&self, seed: CouponSeed) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(seed.code.to_uppercase()),
            name: Set(format!("Coupon {}", seed.code)),
            discount_type: Set(seed.discount_type),
            discount_value: Set(seed.discount_value),
            min_purchase_amount: Set(seed.min_purchase_amount),
            usage_limit: Set(seed.usage_limit),
            usage_count: Set(seed.usage_count),
            active: Set(seed.active),
            featured: Set(false),
            expires_at: Set(seed.expires_at),
            deleted_at: Set(seed.deleted_at),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }

    pub async fn place_order(&self, coupon_code: Option<&str>) -> OrderView {
        self.state
            .services
            .orders
            .create_order(checkout_input(coupon_code))
            .await
            .expect("place order")
    }

    /// Places an order, quotes it and books the standard rate
    pub async fn order_with_guide(&self) -> (OrderView, ShipmentView) {
        let order = self.place_order(None).await;
        let shipping = self.state.services.shipping.clone();
        shipping.get_quote(order.id).await.expect("quote order");
        let shipment = shipping
            .create_guide(order.id, guide_input(STANDARD_RATE))
            .await
            .expect("create guide");
        (order, shipment)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn checkout_input(coupon_code: Option<&str>) -> CheckoutInput {
    CheckoutInput {
        user_id: Some(Uuid::new_v4()),
        items: vec![
            CheckoutItemInput {
                product_name: "Café de olla 500g".to_string(),
                sku: Some("CAFE-500".to_string()),
                quantity: 2,
                unit_price: dec!(35.00),
                weight_kg: Some(dec!(0.5)),
            },
            CheckoutItemInput {
                product_name: "Taza de barro".to_string(),
                sku: Some("TAZA-01".to_string()),
                quantity: 1,
                unit_price: dec!(30.00),
                weight_kg: Some(dec!(0.4)),
            },
        ],
        shipping_cost: dec!(10.00),
        recipient: RecipientInput {
            name: "Ana López".to_string(),
            phone: Some("+52 81 5555 0101".to_string()),
            email: Some("ana@example.com".to_string()),
            street: "Av. Constitución 100".to_string(),
            city: "Monterrey".to_string(),
            state: Some("NL".to_string()),
            postal_code: "64000".to_string(),
            country: "mx".to_string(),
        },
        coupon_code: coupon_code.map(str::to_string),
    }
}

pub fn guide_input(id_rate: &str) -> CreateGuideInput {
    CreateGuideInput {
        id_rate: id_rate.to_string(),
        request_pickup: false,
        insurance: false,
    }
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
