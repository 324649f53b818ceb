//! Carrier webhook payloads, outcomes and signature checks.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use utoipa::ToSchema;

use super::lifecycle::TrackingDecision;
use crate::models::ShippingStatus;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Status notification pushed by the carrier
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Guide tracking number; preferred way to find the shipment
    #[serde(default, alias = "tracking_number")]
    pub tracking_number: Option<String>,
    /// Our order id, sent back by the carrier as the shipment reference
    #[serde(default)]
    pub reference: Option<String>,
    pub status: String,
    #[serde(default, alias = "event_date", alias = "date")]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
}

impl WebhookPayload {
    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

/// What happened to one webhook delivery. Never turned into an HTTP error.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Reached the lifecycle decision; replays and stale updates land here too
    Applied {
        decision: TrackingDecision,
        status: ShippingStatus,
    },
    Malformed(String),
    Unauthorized(String),
    UnknownReference,
    Failed(String),
}

impl WebhookOutcome {
    /// Whether the event was handled; replays and stale updates count as handled
    pub fn processed(&self) -> bool {
        matches!(self, WebhookOutcome::Applied { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied { decision, .. } => decision.label(),
            WebhookOutcome::Malformed(_) => "malformed",
            WebhookOutcome::Unauthorized(_) => "unauthorized",
            WebhookOutcome::UnknownReference => "unknown_reference",
            WebhookOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("missing signature headers")]
    Missing,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("invalid signature")]
    Invalid,
}

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`
pub fn sign_payload(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = mac_for(secret, timestamp, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn mac_for(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Invalid)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Checks the `x-timestamp` / `x-signature` pair against the raw body
pub fn verify_signature(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    tolerance_secs: u64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let (timestamp, signature) = match (timestamp, signature) {
        (Some(ts), Some(sig)) => (ts.trim(), sig.trim()),
        _ => return Err(SignatureError::Missing),
    };

    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Invalid)?;
    if (now.timestamp() - ts).unsigned_abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let expected = hex::decode(signature).map_err(|_| SignatureError::Invalid)?;
    mac_for(secret, timestamp, body)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Invalid)
}
