pub mod coupons;
pub mod orders;
pub mod shipping;

use crate::{
    carrier::CarrierClient,
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{
        coupons::CouponService,
        orders::OrderService,
        shipping::{ShippingService, ShippingSettings},
    },
};
use axum::{
    extract::{FromRequest, Request},
    Json,
};
use sea_orm::DatabaseConnection;
use serde::de::DeserializeOwned;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
    pub shipping: Arc<ShippingService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        carrier: Arc<dyn CarrierClient>,
        config: &AppConfig,
    ) -> Self {
        let coupons = Arc::new(CouponService::new(db.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            config.default_currency.clone(),
        ));
        let shipping = Arc::new(ShippingService::new(
            db,
            carrier,
            event_sender,
            ShippingSettings::from_config(config),
        ));

        Self {
            coupons,
            orders,
            shipping,
        }
    }
}

/// `Json` extractor whose rejections use the standard error envelope
/// (400 with `success:false`) instead of axum's plain-text body.
pub struct AppJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ServiceError::ValidationError(rejection.body_text())),
        }
    }
}
