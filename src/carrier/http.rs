use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{
    Address, CarrierClient, CarrierError, Guide, GuideRequest, Parcel, RateOption, RateRequest,
    TrackingSnapshot,
};
use crate::config::CarrierConfig;

/// REST client for the carrier API (`/ship/rate`, `/ship/generate`,
/// `/ship/generaltrack`, `/ship/cancel`).
#[derive(Clone)]
pub struct HttpCarrierClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCarrierClient {
    pub fn new(config: &CarrierConfig) -> Result<Self, CarrierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(5)))
            .build()
            .map_err(|e| CarrierError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, CarrierError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "calling carrier");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(classify_transport_error)?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            warn!(%url, status = status.as_u16(), "carrier returned retryable status");
            return Err(CarrierError::Transient(format!(
                "carrier responded with {}",
                status
            )));
        }

        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                CarrierError::Transient(format!("unreadable carrier response: {}", e))
            } else {
                CarrierError::Rejected(format!("carrier responded with {}", status))
            }
        })?;

        if !status.is_success() || envelope.meta.as_deref() == Some("error") {
            return Err(CarrierError::Rejected(envelope.error_message(status)));
        }

        envelope.data.ok_or_else(|| {
            CarrierError::Transient("carrier response did not include data".to_string())
        })
    }
}

fn classify_transport_error(err: reqwest::Error) -> CarrierError {
    if err.is_timeout() {
        CarrierError::Transient("carrier request timed out".to_string())
    } else if err.is_connect() {
        CarrierError::Transient("could not reach carrier".to_string())
    } else {
        CarrierError::Transient(format!("carrier transport error: {}", err))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    meta: Option<String>,
    data: Option<T>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    description: Option<String>,
}

impl<T> Envelope<T> {
    fn error_message(&self, status: StatusCode) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.description.clone().or_else(|| e.message.clone()))
            .unwrap_or_else(|| format!("carrier rejected the request ({})", status))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePackage<'a> {
    content: &'a str,
    amount: u32,
    #[serde(rename = "type")]
    package_type: &'a str,
    weight: Decimal,
    weight_unit: &'a str,
    length_unit: &'a str,
    declared_value: Decimal,
    dimensions: WireDimensions,
}

#[derive(Debug, Serialize)]
struct WireDimensions {
    length: Decimal,
    width: Decimal,
    height: Decimal,
}

fn wire_package(parcel: &Parcel) -> WirePackage<'static> {
    WirePackage {
        content: "merchandise",
        amount: 1,
        package_type: "box",
        weight: parcel.weight_kg,
        weight_unit: "KG",
        length_unit: "CM",
        declared_value: parcel.declared_value,
        dimensions: WireDimensions {
            length: parcel.length_cm,
            width: parcel.width_cm,
            height: parcel.height_cm,
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRate {
    id_rate: String,
    carrier: String,
    service: String,
    total_price: Decimal,
    currency: Option<String>,
    delivery_days: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGuide {
    tracking_number: String,
    shipment_id: Option<Value>,
    track_url: Option<String>,
    label: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTracking {
    status: String,
    #[serde(default)]
    event_history: Vec<WireTrackingEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTrackingEvent {
    date: Option<DateTime<Utc>>,
    description: Option<String>,
    location: Option<String>,
}

fn address_json(address: &Address) -> Value {
    json!({
        "name": address.name,
        "company": address.company,
        "phone": address.phone,
        "email": address.email,
        "street": address.street,
        "city": address.city,
        "state": address.state,
        "postalCode": address.postal_code,
        "country": address.country,
    })
}

#[async_trait]
impl CarrierClient for HttpCarrierClient {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn quote(&self, request: &RateRequest) -> Result<Vec<RateOption>, CarrierError> {
        let body = json!({
            "origin": address_json(&request.origin),
            "destination": address_json(&request.destination),
            "packages": [wire_package(&request.parcel)],
            "settings": { "currency": request.currency },
        });

        let rates: Vec<WireRate> = self.post("/ship/rate", body).await?;
        Ok(rates
            .into_iter()
            .map(|rate| RateOption {
                id_rate: rate.id_rate,
                carrier: rate.carrier,
                service: rate.service,
                price: rate.total_price,
                currency: rate.currency.unwrap_or_else(|| request.currency.clone()),
                delivery_days: rate.delivery_days,
            })
            .collect())
    }

    #[instrument(skip(self, request), fields(reference = %request.reference, id_rate = %request.id_rate))]
    async fn create_guide(&self, request: &GuideRequest) -> Result<Guide, CarrierError> {
        let body = json!({
            "origin": address_json(&request.origin),
            "destination": address_json(&request.destination),
            "packages": [wire_package(&request.parcel)],
            "shipment": {
                "carrier": request.carrier,
                "service": request.service,
                "idRate": request.id_rate,
                "reference": request.reference,
            },
            "settings": {
                "requestPickup": request.request_pickup,
                "insurance": request.insurance,
            },
        });

        let guides: Vec<WireGuide> = self.post("/ship/generate", body).await?;
        let guide = guides
            .into_iter()
            .next()
            .ok_or_else(|| CarrierError::Transient("carrier returned no guide".to_string()))?;

        Ok(Guide {
            tracking_number: guide.tracking_number,
            guide_id: guide.shipment_id.map(|id| match id {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            tracking_url: guide.track_url,
            label_url: guide.label,
            carrier_status: guide.status,
        })
    }

    #[instrument(skip(self))]
    async fn track(
        &self,
        carrier: &str,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let body = json!({ "carrier": carrier, "trackingNumbers": [tracking_number] });
        let tracked: Vec<WireTracking> = self.post("/ship/generaltrack", body).await?;
        let tracking = tracked.into_iter().next().ok_or_else(|| {
            CarrierError::Rejected(format!("carrier has no tracking for {}", tracking_number))
        })?;

        let latest = tracking.event_history.into_iter().last();
        Ok(TrackingSnapshot {
            carrier_status: tracking.status,
            occurred_at: latest.as_ref().and_then(|e| e.date),
            description: latest.as_ref().and_then(|e| e.description.clone()),
            location: latest.and_then(|e| e.location),
        })
    }

    #[instrument(skip(self))]
    async fn cancel(&self, carrier: &str, tracking_number: &str) -> Result<(), CarrierError> {
        let body = json!({ "carrier": carrier, "trackingNumber": tracking_number });
        let _: Value = self.post("/ship/cancel", body).await?;
        Ok(())
    }
}
