//! Shipping carrier integration.
//!
//! Services only see the [`CarrierClient`] trait. [`HttpCarrierClient`] talks to
//! the carrier's REST API and [`GuardedCarrier`] wraps any client with the
//! carrier circuit breaker. Every call is bounded by a timeout, and a timeout
//! is reported as [`CarrierError::Transient`].

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::config::OriginAddress;
use crate::errors::ServiceError;

pub use http::HttpCarrierClient;

/// Carrier failures, split by whether retrying later can help
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CarrierError {
    /// Network failure, timeout, 5xx or an open circuit
    #[error("carrier unavailable: {0}")]
    Transient(String),
    /// The carrier understood the request and refused it (bad address, parcel, rate)
    #[error("{0}")]
    Rejected(String),
}

impl CarrierError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CarrierError::Transient(_))
    }
}

impl From<CarrierError> for ServiceError {
    fn from(err: CarrierError) -> Self {
        match err {
            CarrierError::Transient(msg) => ServiceError::ServiceUnavailable(msg),
            CarrierError::Rejected(msg) => ServiceError::CarrierRejected(msg),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub phone: String,
    pub email: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl From<&OriginAddress> for Address {
    fn from(origin: &OriginAddress) -> Self {
        Self {
            name: origin.name.clone(),
            company: origin.company.clone(),
            phone: origin.phone.clone(),
            email: origin.email.clone(),
            street: origin.street.clone(),
            city: origin.city.clone(),
            state: origin.state.clone(),
            postal_code: origin.postal_code.clone(),
            country: origin.country.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Parcel {
    pub weight_kg: Decimal,
    pub length_cm: Decimal,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
    /// Goods value, used for insurance
    pub declared_value: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateRequest {
    pub reference: String,
    pub origin: Address,
    pub destination: Address,
    pub parcel: Parcel,
    pub currency: String,
}

/// One priced shipping option
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateOption {
    pub id_rate: String,
    pub carrier: String,
    pub service: String,
    pub price: Decimal,
    pub currency: String,
    pub delivery_days: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuideRequest {
    pub reference: String,
    pub id_rate: String,
    pub carrier: String,
    pub service: String,
    pub origin: Address,
    pub destination: Address,
    pub parcel: Parcel,
    pub request_pickup: bool,
    pub insurance: bool,
}

/// Carrier booking confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct Guide {
    pub tracking_number: String,
    pub guide_id: Option<String>,
    pub tracking_url: Option<String>,
    pub label_url: Option<String>,
    pub carrier_status: Option<String>,
}

/// Latest status the carrier reports for a guide
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSnapshot {
    pub carrier_status: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[async_trait]
pub trait CarrierClient: Send + Sync {
    async fn quote(&self, request: &RateRequest) -> Result<Vec<RateOption>, CarrierError>;

    async fn create_guide(&self, request: &GuideRequest) -> Result<Guide, CarrierError>;

    async fn track(
        &self,
        carrier: &str,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError>;

    async fn cancel(&self, carrier: &str, tracking_number: &str) -> Result<(), CarrierError>;
}

/// Routes every call through the carrier circuit breaker. Only transient
/// errors count against the circuit; rejections are the caller's problem.
pub struct GuardedCarrier {
    inner: Arc<dyn CarrierClient>,
    breaker: CircuitBreaker,
}

impl GuardedCarrier {
    pub fn new(inner: Arc<dyn CarrierClient>, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    async fn guarded<R, F, Fut>(&self, f: F) -> Result<R, CarrierError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R, CarrierError>>,
    {
        self.breaker
            .call_with(f, CarrierError::is_transient)
            .await
            .map_err(|e| match e {
                CircuitBreakerError::CircuitOpen => {
                    CarrierError::Transient("carrier circuit open".to_string())
                }
                CircuitBreakerError::Inner(err) => err,
            })
    }
}

#[async_trait]
impl CarrierClient for GuardedCarrier {
    async fn quote(&self, request: &RateRequest) -> Result<Vec<RateOption>, CarrierError> {
        self.guarded(|| self.inner.quote(request)).await
    }

    async fn create_guide(&self, request: &GuideRequest) -> Result<Guide, CarrierError> {
        self.guarded(|| self.inner.create_guide(request)).await
    }

    async fn track(
        &self,
        carrier: &str,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        self.guarded(|| self.inner.track(carrier, tracking_number))
            .await
    }

    async fn cancel(&self, carrier: &str, tracking_number: &str) -> Result<(), CarrierError> {
        self.guarded(|| self.inner.cancel(carrier, tracking_number))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyCarrier {
        calls: AtomicUsize,
        error: CarrierError,
    }

    #[async_trait]
    impl CarrierClient for FlakyCarrier {
        async fn quote(&self, _request: &RateRequest) -> Result<Vec<RateOption>, CarrierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }

        async fn create_guide(&self, _request: &GuideRequest) -> Result<Guide, CarrierError> {
            unreachable!()
        }

        async fn track(&self, _: &str, _: &str) -> Result<TrackingSnapshot, CarrierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }

        async fn cancel(&self, _: &str, _: &str) -> Result<(), CarrierError> {
            unreachable!()
        }
    }

    fn guarded(error: CarrierError) -> (Arc<FlakyCarrier>, GuardedCarrier) {
        let inner = Arc::new(FlakyCarrier {
            calls: AtomicUsize::new(0),
            error,
        });
        let breaker = CircuitBreaker::new(
            "carrier",
            CircuitBreakerConfig {
                failure_threshold: 2,
                timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
        );
        (inner.clone(), GuardedCarrier::new(inner, breaker))
    }

    #[tokio::test]
    async fn transient_failures_open_the_circuit() {
        let (inner, carrier) = guarded(CarrierError::Transient("503".into()));
        for _ in 0..2 {
            let _ = carrier.track("dhl", "TRK1").await;
        }
        assert_eq!(carrier.breaker.state(), CircuitState::Open);

        let err = carrier.track("dhl", "TRK1").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejections_pass_through_without_tripping() {
        let (inner, carrier) = guarded(CarrierError::Rejected("bad postal code".into()));
        for _ in 0..3 {
            let err = carrier.track("dhl", "TRK1").await.unwrap_err();
            assert_eq!(err, CarrierError::Rejected("bad postal code".into()));
        }
        assert_eq!(carrier.breaker.state(), CircuitState::Closed);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn carrier_errors_map_to_service_errors() {
        assert!(matches!(
            ServiceError::from(CarrierError::Transient("timeout".into())),
            ServiceError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            ServiceError::from(CarrierError::Rejected("nope".into())),
            ServiceError::CarrierRejected(_)
        ));
    }
}
