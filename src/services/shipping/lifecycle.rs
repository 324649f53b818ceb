//! Shipment state ordering and the tracking-update decision.
//!
//! Tracking updates arrive from webhooks (at-least-once, unordered) and from
//! polling. Both paths ask [`decide`] what to do with an update before
//! touching the database, so replay and reordering behaviour lives in one
//! pure function.

use chrono::{DateTime, Utc};

use crate::models::ShippingStatus;

/// What to do with an incoming tracking update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingDecision {
    /// Move the shipment forward to this state
    Advance(ShippingStatus),
    /// Same state as stored; record the event, keep the state
    Refine,
    /// This exact event was already recorded
    Duplicate,
    /// Reports an earlier state than the one stored; ignore
    Stale,
    /// The shipment already reached a terminal state; ignore
    AfterTerminal,
}

impl TrackingDecision {
    pub fn label(&self) -> &'static str {
        match self {
            TrackingDecision::Advance(_) => "advanced",
            TrackingDecision::Refine => "refined",
            TrackingDecision::Duplicate => "duplicate",
            TrackingDecision::Stale => "stale",
            TrackingDecision::AfterTerminal => "after_terminal",
        }
    }
}

impl ShippingStatus {
    /// Position in the forward order none < quoted < guide_created < in_transit < delivered.
    /// `booking` ranks with `quoted`; `cancelled` sits outside the order.
    pub fn rank(&self) -> Option<u8> {
        match self {
            ShippingStatus::None => Some(0),
            ShippingStatus::Quoted | ShippingStatus::Booking => Some(1),
            ShippingStatus::GuideCreated => Some(2),
            ShippingStatus::InTransit => Some(3),
            ShippingStatus::Delivered => Some(4),
            ShippingStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShippingStatus::Delivered | ShippingStatus::Cancelled)
    }
}

/// Decides how an update reporting `incoming` applies to a shipment in `current`.
///
/// A carrier cancellation is accepted from any non-terminal state; every
/// other update is ordered by rank so older news never overwrites newer.
pub fn decide(
    current: ShippingStatus,
    incoming: ShippingStatus,
    already_recorded: bool,
) -> TrackingDecision {
    if already_recorded {
        return TrackingDecision::Duplicate;
    }
    if current.is_terminal() {
        return TrackingDecision::AfterTerminal;
    }
    if incoming == ShippingStatus::Cancelled {
        return TrackingDecision::Advance(ShippingStatus::Cancelled);
    }

    match (current.rank(), incoming.rank()) {
        (Some(have), Some(got)) if got < have => TrackingDecision::Stale,
        (Some(have), Some(got)) if got == have => TrackingDecision::Refine,
        (Some(_), Some(_)) => TrackingDecision::Advance(incoming),
        // both non-terminal, cancelled handled above
        _ => TrackingDecision::Stale,
    }
}

/// Maps the carrier's free-text status onto a lifecycle state.
/// Returns `None` for vocabulary we do not understand.
pub fn map_carrier_status(raw: &str) -> Option<ShippingStatus> {
    let normalized = raw
        .trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let state = match normalized.as_str() {
        "quoted" => ShippingStatus::Quoted,
        "created" | "label created" | "guide created" | "pending pickup" | "pending"
        | "information received" => ShippingStatus::GuideCreated,
        "picked up" | "shipped" | "in transit" | "out for delivery" | "exception" | "delayed"
        | "incident" | "returned to hub" => ShippingStatus::InTransit,
        "delivered" => ShippingStatus::Delivered,
        "canceled" | "cancelled" => ShippingStatus::Cancelled,
        _ => return None,
    };
    Some(state)
}

/// Identity of a tracking event for replay detection.
///
/// Two deliveries of the same carrier event (same state, same carrier wording,
/// same timestamp) produce the same key. Updates without a carrier timestamp
/// share one key per state and wording, so repeated polls do not pile up
/// history.
pub fn dedupe_key(
    state: ShippingStatus,
    carrier_status: &str,
    occurred_at: Option<DateTime<Utc>>,
) -> String {
    let stamp = occurred_at
        .map(|at| at.timestamp_millis().to_string())
        .unwrap_or_else(|| "undated".to_string());
    format!(
        "{}|{}|{}",
        state.as_str(),
        carrier_status.trim().to_lowercase(),
        stamp
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ShippingStatus::*;
    use std::option::Option::None;

    #[test]
    fn forward_updates_advance() {
        assert_eq!(decide(GuideCreated, InTransit, false), TrackingDecision::Advance(InTransit));
        assert_eq!(decide(GuideCreated, Delivered, false), TrackingDecision::Advance(Delivered));
        assert_eq!(decide(InTransit, Delivered, false), TrackingDecision::Advance(Delivered));
    }

    #[test]
    fn older_updates_are_stale() {
        assert_eq!(decide(InTransit, GuideCreated, false), TrackingDecision::Stale);
        assert_eq!(decide(InTransit, Quoted, false), TrackingDecision::Stale);
    }

    #[test]
    fn terminal_states_absorb_everything() {
        assert_eq!(decide(Delivered, Quoted, false), TrackingDecision::AfterTerminal);
        assert_eq!(decide(Delivered, Cancelled, false), TrackingDecision::AfterTerminal);
        assert_eq!(decide(Cancelled, InTransit, false), TrackingDecision::AfterTerminal);
    }

    #[test]
    fn replays_are_duplicates_regardless_of_state() {
        assert_eq!(decide(Delivered, Delivered, true), TrackingDecision::Duplicate);
        assert_eq!(decide(GuideCreated, InTransit, true), TrackingDecision::Duplicate);
    }

    #[test]
    fn same_state_refines() {
        assert_eq!(decide(InTransit, InTransit, false), TrackingDecision::Refine);
    }

    #[test]
    fn cancellation_from_any_live_state() {
        for current in [Quoted, GuideCreated, InTransit] {
            assert_eq!(decide(current, Cancelled, false), TrackingDecision::Advance(Cancelled));
        }
    }

    #[test]
    fn carrier_vocabulary_is_mapped() {
        assert_eq!(map_carrier_status("Picked Up"), Some(InTransit));
        assert_eq!(map_carrier_status("OUT_FOR_DELIVERY"), Some(InTransit));
        assert_eq!(map_carrier_status(" delivered "), Some(Delivered));
        assert_eq!(map_carrier_status("Canceled"), Some(Cancelled));
        assert_eq!(map_carrier_status("label-created"), Some(GuideCreated));
        assert_eq!(map_carrier_status("teleported"), None);
    }

    #[test]
    fn dedupe_key_is_stable_for_replays() {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap();
        assert_eq!(
            dedupe_key(InTransit, "In Transit", Some(at)),
            dedupe_key(InTransit, " in transit", Some(at))
        );
        assert_ne!(
            dedupe_key(InTransit, "In Transit", Some(at)),
            dedupe_key(InTransit, "In Transit", None)
        );
    }
}
