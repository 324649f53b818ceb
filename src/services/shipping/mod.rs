//! Shipment lifecycle: quote → guide → tracking → delivered | cancelled.
//!
//! Carrier calls are never made inside a database transaction. Guide creation
//! first claims the order (`quoted → booking`) with a conditional update, calls
//! the carrier, then commits the result in one short transaction.

pub mod lifecycle;
pub mod webhook;

use crate::{
    carrier::{Address, CarrierClient, CarrierError, GuideRequest, Parcel, RateRequest},
    config::{AppConfig, OriginAddress, ParcelDefaults},
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        order::{self, OrderStatus},
        order_item, shipment, shipment_event, shipping_quote, EventSource, ShippingStatus,
    },
};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub use lifecycle::{decide, dedupe_key, map_carrier_status, TrackingDecision};
pub use webhook::{WebhookOutcome, WebhookPayload};

/// Shipping settings taken from configuration
#[derive(Debug, Clone)]
pub struct ShippingSettings {
    pub origin: OriginAddress,
    pub parcel: ParcelDefaults,
    pub quote_ttl: Duration,
    pub currency: String,
}

impl ShippingSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            origin: config.carrier.origin.clone(),
            parcel: config.carrier.parcel.clone(),
            quote_ttl: Duration::seconds(config.carrier.quote_ttl_secs as i64),
            currency: config.default_currency.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateGuideInput {
    #[validate(length(min = 1, max = 255, message = "idRate is required"))]
    pub id_rate: String,
    #[serde(default)]
    pub request_pickup: bool,
    #[serde(default)]
    pub insurance: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuoteOptionView {
    pub id_rate: String,
    pub carrier: String,
    pub service: String,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub currency: String,
    pub delivery_days: Option<i32>,
    pub expires_at: DateTime<Utc>,
}

impl From<shipping_quote::Model> for QuoteOptionView {
    fn from(quote: shipping_quote::Model) -> Self {
        Self {
            id_rate: quote.id_rate,
            carrier: quote.carrier,
            service: quote.service,
            price: quote.price,
            currency: quote.currency,
            delivery_days: quote.delivery_days,
            expires_at: quote.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuoteView {
    pub order_id: Uuid,
    pub rates: Vec<QuoteOptionView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub carrier: String,
    pub service: String,
    pub tracking_number: String,
    pub guide_id: Option<String>,
    pub tracking_url: Option<String>,
    pub label_url: Option<String>,
    pub status: ShippingStatus,
    pub carrier_status: Option<String>,
    pub insured: bool,
    pub pickup_requested: bool,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<shipment::Model> for ShipmentView {
    fn from(model: shipment::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            carrier: model.carrier,
            service: model.service,
            tracking_number: model.tracking_number,
            guide_id: model.guide_id,
            tracking_url: model.tracking_url,
            label_url: model.label_url,
            status: model.status,
            carrier_status: model.carrier_status,
            insured: model.insured,
            pickup_requested: model.pickup_requested,
            last_event_at: model.last_event_at,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEventView {
    pub status: ShippingStatus,
    pub carrier_status: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub source: EventSource,
    pub occurred_at: DateTime<Utc>,
}

impl From<shipment_event::Model> for TrackingEventView {
    fn from(event: shipment_event::Model) -> Self {
        Self {
            status: event.status,
            carrier_status: event.carrier_status,
            description: event.description,
            location: event.location,
            source: event.source,
            occurred_at: event.occurred_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    pub order_id: Uuid,
    pub shipping_status: ShippingStatus,
    pub shipment: ShipmentView,
    pub history: Vec<TrackingEventView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRefresh {
    /// How the carrier's answer was applied (advanced, refined, duplicate, ...)
    pub outcome: String,
    pub tracking: TrackingInfo,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelView {
    pub order_id: Uuid,
    pub shipping_status: ShippingStatus,
    pub shipment: Option<ShipmentView>,
}

/// A status report for one shipment, from any source
#[derive(Debug, Clone)]
pub struct TrackingUpdate {
    pub state: ShippingStatus,
    pub carrier_status: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub source: EventSource,
}

#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    pub decision: TrackingDecision,
    pub shipment: shipment::Model,
}

/// Order status implied by shipment progress
fn mirrored_order_status(current: OrderStatus, shipment_state: ShippingStatus) -> OrderStatus {
    match (shipment_state, current) {
        (
            ShippingStatus::InTransit,
            OrderStatus::Pending | OrderStatus::Processing | OrderStatus::Paid,
        ) => OrderStatus::Shipped,
        (ShippingStatus::Delivered, OrderStatus::Cancelled | OrderStatus::Refunded) => current,
        (ShippingStatus::Delivered, _) => OrderStatus::Delivered,
        _ => current,
    }
}

fn decimal_from_f64(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ONE)
}

#[derive(Clone)]
pub struct ShippingService {
    db: Arc<DatabaseConnection>,
    carrier: Arc<dyn CarrierClient>,
    event_sender: Arc<EventSender>,
    settings: ShippingSettings,
}

impl ShippingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carrier: Arc<dyn CarrierClient>,
        event_sender: Arc<EventSender>,
        settings: ShippingSettings,
    ) -> Self {
        Self {
            db,
            carrier,
            event_sender,
            settings,
        }
    }

    async fn load_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn current_shipment(&self, order: &order::Model) -> Result<shipment::Model, ServiceError> {
        let missing =
            || ServiceError::NotFound(format!("No shipment exists for order {}", order.id));
        let shipment_id = order.shipment_id.ok_or_else(missing)?;
        shipment::Entity::find_by_id(shipment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(missing)
    }

    fn destination_for(order: &order::Model) -> Address {
        Address {
            name: order.recipient_name.clone().unwrap_or_default(),
            company: None,
            phone: order.phone.clone().unwrap_or_default(),
            email: order.email.clone().unwrap_or_default(),
            street: order.street.clone().unwrap_or_default(),
            city: order.city.clone().unwrap_or_default(),
            state: order.state.clone().unwrap_or_default(),
            postal_code: order.postal_code.clone().unwrap_or_default(),
            country: order.country.clone().unwrap_or_default(),
        }
    }

    /// One box with configured dimensions; weight is the summed item weight,
    /// never below the configured minimum
    fn parcel_for(&self, order: &order::Model, items: &[order_item::Model]) -> Parcel {
        let defaults = &self.settings.parcel;
        let item_weight: Decimal = items
            .iter()
            .map(|item| item.weight_kg.unwrap_or(Decimal::ZERO) * Decimal::from(item.quantity))
            .sum();
        let weight_kg = item_weight
            .max(decimal_from_f64(defaults.min_weight_kg))
            .round_dp(2);

        Parcel {
            weight_kg,
            length_cm: decimal_from_f64(defaults.length_cm),
            width_cm: decimal_from_f64(defaults.width_cm),
            height_cm: decimal_from_f64(defaults.height_cm),
            declared_value: order.subtotal,
        }
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    /// Asks the carrier for rates and stores them as bookable quotes.
    #[instrument(skip(self))]
    pub async fn get_quote(&self, order_id: Uuid) -> Result<QuoteView, ServiceError> {
        let order = self.load_order(order_id).await?;
        if !order.has_shipping_address() {
            return Err(ServiceError::ValidationError(format!(
                "Order {} has no shipping address",
                order_id
            )));
        }
        match order.shipping_status {
            ShippingStatus::None | ShippingStatus::Quoted | ShippingStatus::Cancelled => {}
            ShippingStatus::Booking => {
                return Err(ServiceError::Conflict(
                    "a shipping guide is already being created for this order".to_string(),
                ))
            }
            _ => {
                return Err(ServiceError::Conflict(
                    "order already has an active shipment".to_string(),
                ))
            }
        }

        let items = self.load_items(order_id).await?;
        let request = RateRequest {
            reference: order_id.to_string(),
            origin: Address::from(&self.settings.origin),
            destination: Self::destination_for(&order),
            parcel: self.parcel_for(&order, &items),
            currency: self.settings.currency.clone(),
        };

        // any carrier failure here is a 400; transient ones are told apart by message
        let rates = self.carrier.quote(&request).await.map_err(|e| {
            warn!(%order_id, error = %e, transient = e.is_transient(), "carrier quote failed");
            match e {
                CarrierError::Transient(_) => ServiceError::QuoteFailed(e.to_string()),
                CarrierError::Rejected(msg) => ServiceError::CarrierRejected(msg),
            }
        })?;
        if rates.is_empty() {
            return Err(ServiceError::CarrierRejected(
                "no shipping rates available for this destination".to_string(),
            ));
        }

        let now = Utc::now();
        let expires_at = now + self.settings.quote_ttl;
        let txn = self.db.begin().await?;

        let mut stored = Vec::with_capacity(rates.len());
        for rate in rates {
            let quote = shipping_quote::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                id_rate: Set(rate.id_rate),
                carrier: Set(rate.carrier),
                service: Set(rate.service),
                price: Set(rate.price),
                currency: Set(rate.currency),
                delivery_days: Set(rate.delivery_days),
                expires_at: Set(expires_at),
                used_at: Set(None),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            stored.push(QuoteOptionView::from(quote));
        }

        let moved = order::Entity::update_many()
            .col_expr(order::Column::ShippingStatus, Expr::value(ShippingStatus::Quoted))
            // a cancelled shipment no longer belongs to the order once it is quoted again
            .col_expr(order::Column::ShipmentId, Expr::value(Option::<Uuid>::None))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::ShippingStatus.is_in([
                ShippingStatus::None,
                ShippingStatus::Quoted,
                ShippingStatus::Cancelled,
            ]))
            .exec(&txn)
            .await?;
        if moved.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "order shipping state changed while quoting; retry".to_string(),
            ));
        }
        txn.commit().await?;

        info!(%order_id, rates = stored.len(), "shipping quote stored");
        Ok(QuoteView {
            order_id,
            rates: stored,
        })
    }

    /// Books a guide from a stored quote.
    ///
    /// Only one caller can move the order from `quoted` to `booking`, so two
    /// concurrent requests never both reach the carrier. A carrier failure
    /// releases the claim; a failure to store a booked guide keeps the order
    /// in `booking` for manual reconciliation instead of inviting a second
    /// booking.
    #[instrument(skip(self, input), fields(id_rate = %input.id_rate))]
    pub async fn create_guide(
        &self,
        order_id: Uuid,
        input: CreateGuideInput,
    ) -> Result<ShipmentView, ServiceError> {
        input.validate()?;
        let id_rate = input.id_rate.trim().to_string();
        if id_rate.is_empty() {
            return Err(ServiceError::ValidationError("idRate is required".to_string()));
        }

        let order = self.load_order(order_id).await?;
        match order.shipping_status {
            ShippingStatus::Quoted => {}
            ShippingStatus::Booking => {
                return Err(ServiceError::Conflict(
                    "a shipping guide is already being created for this order".to_string(),
                ))
            }
            ShippingStatus::GuideCreated | ShippingStatus::InTransit | ShippingStatus::Delivered => {
                return Err(ServiceError::Conflict(
                    "order already has a shipping guide".to_string(),
                ))
            }
            ShippingStatus::None | ShippingStatus::Cancelled => {
                return Err(ServiceError::ValidationError(
                    "order has no valid shipping quote; request a quote first".to_string(),
                ))
            }
        }

        let now = Utc::now();
        let quote = shipping_quote::Entity::find()
            .filter(shipping_quote::Column::OrderId.eq(order_id))
            .filter(shipping_quote::Column::IdRate.eq(id_rate.clone()))
            .order_by_desc(shipping_quote::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "idRate {} is not a quote for this order",
                    id_rate
                ))
            })?;
        if quote.used_at.is_some() {
            return Err(ServiceError::ValidationError(
                "this quote was already used to book a guide".to_string(),
            ));
        }
        if !quote.is_bookable(now) {
            return Err(ServiceError::ValidationError(
                "quote expired; request a new shipping quote".to_string(),
            ));
        }

        let items = self.load_items(order_id).await?;
        let request = GuideRequest {
            reference: order_id.to_string(),
            id_rate: quote.id_rate.clone(),
            carrier: quote.carrier.clone(),
            service: quote.service.clone(),
            origin: Address::from(&self.settings.origin),
            destination: Self::destination_for(&order),
            parcel: self.parcel_for(&order, &items),
            request_pickup: input.request_pickup,
            insurance: input.insurance,
        };

        let claimed = order::Entity::update_many()
            .col_expr(order::Column::ShippingStatus, Expr::value(ShippingStatus::Booking))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::ShippingStatus.eq(ShippingStatus::Quoted))
            .exec(&*self.db)
            .await?;
        if claimed.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "a shipping guide is already being created for this order".to_string(),
            ));
        }

        let guide = match self.carrier.create_guide(&request).await {
            Ok(guide) => guide,
            Err(err) => {
                warn!(%order_id, error = %err, "carrier booking failed; releasing claim");
                self.release_claim(order_id).await;
                return Err(err.into());
            }
        };

        let tracking_number = guide.tracking_number.clone();
        let created_at = Utc::now();
        let carrier_status = guide
            .carrier_status
            .clone()
            .unwrap_or_else(|| "created".to_string());

        let txn = self.db.begin().await?;
        let persisted = async {
            let shipment = shipment::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                id_rate: Set(quote.id_rate.clone()),
                carrier: Set(quote.carrier.clone()),
                service: Set(quote.service.clone()),
                tracking_number: Set(guide.tracking_number),
                guide_id: Set(guide.guide_id),
                tracking_url: Set(guide.tracking_url),
                label_url: Set(guide.label_url),
                status: Set(ShippingStatus::GuideCreated),
                carrier_status: Set(Some(carrier_status.clone())),
                insured: Set(input.insurance),
                pickup_requested: Set(input.request_pickup),
                last_event_at: Set(Some(created_at)),
                created_at: Set(created_at),
                updated_at: Set(created_at),
            }
            .insert(&txn)
            .await?;

            shipment_event::ActiveModel {
                id: Set(Uuid::new_v4()),
                shipment_id: Set(shipment.id),
                status: Set(ShippingStatus::GuideCreated),
                carrier_status: Set(Some(carrier_status.clone())),
                description: Set(Some("guide created".to_string())),
                location: Set(None),
                source: Set(EventSource::Guide),
                occurred_at: Set(created_at),
                dedupe_key: Set(dedupe_key(
                    ShippingStatus::GuideCreated,
                    &carrier_status,
                    Some(created_at),
                )),
                created_at: Set(created_at),
            }
            .insert(&txn)
            .await?;

            shipping_quote::Entity::update_many()
                .col_expr(shipping_quote::Column::UsedAt, Expr::value(created_at))
                .filter(shipping_quote::Column::Id.eq(quote.id))
                .exec(&txn)
                .await?;

            let finished = order::Entity::update_many()
                .col_expr(
                    order::Column::ShippingStatus,
                    Expr::value(ShippingStatus::GuideCreated),
                )
                .col_expr(order::Column::ShipmentId, Expr::value(shipment.id))
                .col_expr(order::Column::UpdatedAt, Expr::value(created_at))
                .filter(order::Column::Id.eq(order_id))
                .filter(order::Column::ShippingStatus.eq(ShippingStatus::Booking))
                .exec(&txn)
                .await?;
            if finished.rows_affected == 0 {
                return Err(ServiceError::InternalError(format!(
                    "booking claim for order {} was lost",
                    order_id
                )));
            }
            Ok::<_, ServiceError>(shipment)
        }
        .await;

        let shipment = match persisted {
            Ok(shipment) => {
                txn.commit().await.map_err(|e| {
                    error!(%order_id, %tracking_number, error = %e, "guide booked with carrier but commit failed; order left in booking");
                    ServiceError::from(e)
                })?;
                shipment
            }
            Err(e) => {
                error!(%order_id, %tracking_number, error = %e, "guide booked with carrier but not stored; order left in booking");
                return Err(e);
            }
        };

        info!(%order_id, shipment_id = %shipment.id, %tracking_number, "shipping guide created");
        self.event_sender
            .send_or_log(Event::ShipmentGuideCreated {
                order_id,
                shipment_id: shipment.id,
                tracking_number,
            })
            .await;

        Ok(ShipmentView::from(shipment))
    }

    async fn release_claim(&self, order_id: Uuid) {
        let released = order::Entity::update_many()
            .col_expr(order::Column::ShippingStatus, Expr::value(ShippingStatus::Quoted))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::ShippingStatus.eq(ShippingStatus::Booking))
            .exec(&*self.db)
            .await;
        if let Err(e) = released {
            error!(%order_id, error = %e, "failed to release booking claim");
        }
    }

    /// Last known state, tracking link and history for an order's shipment
    #[instrument(skip(self))]
    pub async fn get_tracking(&self, order_id: Uuid) -> Result<TrackingInfo, ServiceError> {
        let order = self.load_order(order_id).await?;
        let shipment = self.current_shipment(&order).await?;
        self.tracking_info(&order, shipment).await
    }

    async fn tracking_info(
        &self,
        order: &order::Model,
        shipment: shipment::Model,
    ) -> Result<TrackingInfo, ServiceError> {
        let history = shipment_event::Entity::find()
            .filter(shipment_event::Column::ShipmentId.eq(shipment.id))
            .order_by_asc(shipment_event::Column::OccurredAt)
            .order_by_asc(shipment_event::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(TrackingInfo {
            order_id: order.id,
            shipping_status: order.shipping_status,
            shipment: ShipmentView::from(shipment),
            history: history.into_iter().map(TrackingEventView::from).collect(),
        })
    }

    /// Pulls the current status from the carrier, for when webhooks were missed
    #[instrument(skip(self))]
    pub async fn update_tracking(&self, order_id: Uuid) -> Result<TrackingRefresh, ServiceError> {
        let order = self.load_order(order_id).await?;
        let shipment = self.current_shipment(&order).await?;

        if shipment.status.is_terminal() {
            let tracking = self.tracking_info(&order, shipment).await?;
            return Ok(TrackingRefresh {
                outcome: TrackingDecision::AfterTerminal.label().to_string(),
                tracking,
            });
        }

        let snapshot = self
            .carrier
            .track(&shipment.carrier, &shipment.tracking_number)
            .await?;
        let state = map_carrier_status(&snapshot.carrier_status).ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "carrier reported unrecognised status '{}'",
                snapshot.carrier_status
            ))
        })?;

        let applied = self
            .apply_tracking_update(
                shipment.id,
                TrackingUpdate {
                    state,
                    carrier_status: snapshot.carrier_status,
                    occurred_at: snapshot.occurred_at,
                    description: snapshot.description,
                    location: snapshot.location,
                    source: EventSource::Poll,
                },
            )
            .await?;

        let order = self.load_order(order_id).await?;
        let tracking = self.tracking_info(&order, applied.shipment).await?;
        Ok(TrackingRefresh {
            outcome: applied.decision.label().to_string(),
            tracking,
        })
    }

    /// Cancels the order's shipment. Quotes are dropped locally; booked
    /// guides are cancelled with the carrier first.
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<CancelView, ServiceError> {
        let order = self.load_order(order_id).await?;
        match order.shipping_status {
            ShippingStatus::None => Err(ServiceError::NotFound(format!(
                "No shipment exists for order {}",
                order_id
            ))),
            ShippingStatus::Booking => Err(ServiceError::Conflict(
                "a shipping guide is being created for this order; retry shortly".to_string(),
            )),
            ShippingStatus::Delivered => Err(ServiceError::Conflict(
                "shipment already delivered".to_string(),
            )),
            ShippingStatus::Cancelled => Err(ServiceError::Conflict(
                "shipment already cancelled".to_string(),
            )),
            ShippingStatus::Quoted => self.cancel_quoted(order_id).await,
            ShippingStatus::GuideCreated | ShippingStatus::InTransit => {
                let shipment = self.current_shipment(&order).await?;
                self.cancel_booked(order_id, shipment).await
            }
        }
    }

    async fn cancel_quoted(&self, order_id: Uuid) -> Result<CancelView, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;
        let moved = order::Entity::update_many()
            .col_expr(
                order::Column::ShippingStatus,
                Expr::value(ShippingStatus::Cancelled),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::ShippingStatus.eq(ShippingStatus::Quoted))
            .exec(&txn)
            .await?;
        if moved.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "order shipping state changed; retry".to_string(),
            ));
        }
        Self::expire_open_quotes(&txn, order_id, now).await?;
        txn.commit().await?;

        info!(%order_id, "quoted shipment cancelled");
        self.event_sender
            .send_or_log(Event::ShipmentCancelled {
                order_id,
                shipment_id: None,
            })
            .await;

        Ok(CancelView {
            order_id,
            shipping_status: ShippingStatus::Cancelled,
            shipment: None,
        })
    }

    async fn expire_open_quotes(
        txn: &DatabaseTransaction,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        shipping_quote::Entity::update_many()
            .col_expr(shipping_quote::Column::ExpiresAt, Expr::value(now))
            .filter(shipping_quote::Column::OrderId.eq(order_id))
            .filter(shipping_quote::Column::UsedAt.is_null())
            .filter(shipping_quote::Column::ExpiresAt.gt(now))
            .exec(txn)
            .await?;
        Ok(())
    }

    async fn cancel_booked(
        &self,
        order_id: Uuid,
        shipment: shipment::Model,
    ) -> Result<CancelView, ServiceError> {
        self.carrier
            .cancel(&shipment.carrier, &shipment.tracking_number)
            .await
            .map_err(|e| {
                warn!(%order_id, tracking_number = %shipment.tracking_number, error = %e, "carrier cancellation failed");
                ServiceError::from(e)
            })?;

        let applied = self
            .apply_tracking_update(
                shipment.id,
                TrackingUpdate {
                    state: ShippingStatus::Cancelled,
                    carrier_status: "cancelled".to_string(),
                    occurred_at: Some(Utc::now()),
                    description: Some("cancelled by merchant".to_string()),
                    location: None,
                    source: EventSource::Cancel,
                },
            )
            .await?;

        match applied.shipment.status {
            ShippingStatus::Cancelled => Ok(CancelView {
                order_id,
                shipping_status: ShippingStatus::Cancelled,
                shipment: Some(ShipmentView::from(applied.shipment)),
            }),
            // delivered notification won the race against our cancel
            other => Err(ServiceError::Conflict(format!(
                "shipment is {} and can no longer be cancelled",
                other
            ))),
        }
    }

    /// Applies one tracking update idempotently.
    ///
    /// The replay check, the state ordering and the conditional write
    /// (`WHERE status = <state we decided on>`) together make concurrent and
    /// repeated deliveries converge on the same final state and history.
    #[instrument(skip(self, update), fields(state = %update.state, source = ?update.source))]
    pub async fn apply_tracking_update(
        &self,
        shipment_id: Uuid,
        update: TrackingUpdate,
    ) -> Result<AppliedUpdate, ServiceError> {
        let shipment = shipment::Entity::find_by_id(shipment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Shipment {} not found", shipment_id)))?;

        let key = dedupe_key(update.state, &update.carrier_status, update.occurred_at);
        let already_recorded = shipment_event::Entity::find()
            .filter(shipment_event::Column::ShipmentId.eq(shipment_id))
            .filter(shipment_event::Column::DedupeKey.eq(key.clone()))
            .one(&*self.db)
            .await?
            .is_some();

        let decision = decide(shipment.status, update.state, already_recorded);
        match decision {
            TrackingDecision::Duplicate => {
                info!(%shipment_id, "tracking update already recorded");
            }
            TrackingDecision::Stale | TrackingDecision::AfterTerminal => {
                info!(
                    %shipment_id,
                    current = %shipment.status,
                    incoming = %update.state,
                    decision = decision.label(),
                    "ignoring tracking update"
                );
            }
            TrackingDecision::Refine | TrackingDecision::Advance(_) => {}
        }
        if !matches!(
            decision,
            TrackingDecision::Refine | TrackingDecision::Advance(_)
        ) {
            counter!("storefront_tracking_updates_total", 1, "outcome" => decision.label());
            return Ok(AppliedUpdate { decision, shipment });
        }

        let now = Utc::now();
        let occurred_at = update.occurred_at.unwrap_or(now);
        let txn = self.db.begin().await?;
        let written = self
            .write_tracking_update(&txn, &shipment, decision, &update, &key, occurred_at, now)
            .await;

        match written {
            Ok(()) => txn.commit().await?,
            Err(ServiceError::Duplicate(_)) => {
                // a concurrent delivery of the same event committed first
                drop(txn);
                counter!("storefront_tracking_updates_total", 1, "outcome" => "duplicate");
                let shipment = self.reload_shipment(shipment_id).await?;
                return Ok(AppliedUpdate {
                    decision: TrackingDecision::Duplicate,
                    shipment,
                });
            }
            Err(e) => return Err(e),
        }
        counter!("storefront_tracking_updates_total", 1, "outcome" => decision.label());

        if let TrackingDecision::Advance(new_state) = decision {
            info!(%shipment_id, from = %shipment.status, to = %new_state, "shipment advanced");
            let event = if new_state == ShippingStatus::Cancelled {
                Event::ShipmentCancelled {
                    order_id: shipment.order_id,
                    shipment_id: Some(shipment_id),
                }
            } else {
                Event::ShipmentStatusChanged {
                    order_id: shipment.order_id,
                    shipment_id,
                    old_status: shipment.status,
                    new_status: new_state,
                    occurred_at,
                }
            };
            self.event_sender.send_or_log(event).await;
        }

        let shipment = self.reload_shipment(shipment_id).await?;
        Ok(AppliedUpdate { decision, shipment })
    }

    async fn reload_shipment(&self, shipment_id: Uuid) -> Result<shipment::Model, ServiceError> {
        shipment::Entity::find_by_id(shipment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Shipment {} not found", shipment_id)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_tracking_update(
        &self,
        txn: &DatabaseTransaction,
        shipment: &shipment::Model,
        decision: TrackingDecision,
        update: &TrackingUpdate,
        key: &str,
        occurred_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        shipment_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            shipment_id: Set(shipment.id),
            status: Set(update.state),
            carrier_status: Set(Some(update.carrier_status.clone())),
            description: Set(update.description.clone()),
            location: Set(update.location.clone()),
            source: Set(update.source),
            occurred_at: Set(occurred_at),
            dedupe_key: Set(key.to_string()),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;

        let is_newer = shipment
            .last_event_at
            .map(|last| occurred_at >= last)
            .unwrap_or(true);

        match decision {
            TrackingDecision::Advance(new_state) => {
                let moved = shipment::Entity::update_many()
                    .col_expr(shipment::Column::Status, Expr::value(new_state))
                    .col_expr(
                        shipment::Column::CarrierStatus,
                        Expr::value(update.carrier_status.clone()),
                    )
                    .col_expr(
                        shipment::Column::LastEventAt,
                        Expr::value(if is_newer {
                            Some(occurred_at)
                        } else {
                            shipment.last_event_at
                        }),
                    )
                    .col_expr(shipment::Column::UpdatedAt, Expr::value(now))
                    .filter(shipment::Column::Id.eq(shipment.id))
                    .filter(shipment::Column::Status.eq(shipment.status))
                    .exec(txn)
                    .await?;
                if moved.rows_affected == 0 {
                    return Err(ServiceError::ConcurrentModification(shipment.id));
                }
                self.mirror_on_order(txn, shipment, new_state, now).await?;
            }
            TrackingDecision::Refine if is_newer => {
                let refined = shipment::Entity::update_many()
                    .col_expr(
                        shipment::Column::CarrierStatus,
                        Expr::value(update.carrier_status.clone()),
                    )
                    .col_expr(shipment::Column::LastEventAt, Expr::value(occurred_at))
                    .col_expr(shipment::Column::UpdatedAt, Expr::value(now))
                    .filter(shipment::Column::Id.eq(shipment.id))
                    .filter(shipment::Column::Status.eq(shipment.status))
                    .exec(txn)
                    .await?;
                if refined.rows_affected == 0 {
                    return Err(ServiceError::ConcurrentModification(shipment.id));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Keeps the order in step with its current shipment
    async fn mirror_on_order(
        &self,
        txn: &DatabaseTransaction,
        shipment: &shipment::Model,
        new_state: ShippingStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let order = match order::Entity::find_by_id(shipment.order_id).one(txn).await? {
            Some(order) if order.shipment_id == Some(shipment.id) => order,
            _ => return Ok(()),
        };

        order::Entity::update_many()
            .col_expr(order::Column::ShippingStatus, Expr::value(new_state))
            .col_expr(
                order::Column::Status,
                Expr::value(mirrored_order_status(order.status, new_state)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::ShipmentId.eq(shipment.id))
            .exec(txn)
            .await?;
        Ok(())
    }

    /// Handles one carrier push notification. Never fails: every problem is
    /// reported through the returned outcome.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub async fn process_webhook(&self, body: &[u8]) -> WebhookOutcome {
        let outcome = self.process_webhook_inner(body).await;
        counter!("storefront_webhooks_total", 1, "outcome" => outcome.label());
        match &outcome {
            WebhookOutcome::Applied { decision, status } => {
                info!(decision = decision.label(), %status, "carrier webhook handled")
            }
            WebhookOutcome::Failed(reason) => error!(%reason, "carrier webhook failed"),
            other => warn!(outcome = other.label(), "carrier webhook not processed"),
        }
        outcome
    }

    async fn process_webhook_inner(&self, body: &[u8]) -> WebhookOutcome {
        let payload: WebhookPayload = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => return WebhookOutcome::Malformed(format!("invalid payload: {}", e)),
        };
        if payload.tracking_number().is_none() && payload.reference().is_none() {
            return WebhookOutcome::Malformed(
                "payload carries neither trackingNumber nor reference".to_string(),
            );
        }
        let state = match map_carrier_status(&payload.status) {
            Some(state) => state,
            None => {
                return WebhookOutcome::Malformed(format!(
                    "unknown carrier status '{}'",
                    payload.status
                ))
            }
        };

        let shipment = match self.find_webhook_target(&payload).await {
            Ok(Some(shipment)) => shipment,
            Ok(None) => return WebhookOutcome::UnknownReference,
            Err(e) => return WebhookOutcome::Failed(e.to_string()),
        };

        let update = TrackingUpdate {
            state,
            carrier_status: payload.status.trim().to_string(),
            occurred_at: payload.event_date,
            description: payload.description,
            location: payload.location,
            source: EventSource::Webhook,
        };
        match self.apply_tracking_update(shipment.id, update).await {
            Ok(applied) => WebhookOutcome::Applied {
                decision: applied.decision,
                status: applied.shipment.status,
            },
            Err(e) => WebhookOutcome::Failed(e.to_string()),
        }
    }

    async fn find_webhook_target(
        &self,
        payload: &WebhookPayload,
    ) -> Result<Option<shipment::Model>, ServiceError> {
        if let Some(tracking_number) = payload.tracking_number() {
            let by_tracking = shipment::Entity::find()
                .filter(shipment::Column::TrackingNumber.eq(tracking_number))
                .one(&*self.db)
                .await?;
            if by_tracking.is_some() {
                return Ok(by_tracking);
            }
        }

        let order_id = match payload.reference().and_then(|r| Uuid::parse_str(r).ok()) {
            Some(id) => id,
            None => return Ok(None),
        };
        let order = match order::Entity::find_by_id(order_id).one(&*self.db).await? {
            Some(order) => order,
            None => return Ok(None),
        };
        match order.shipment_id {
            Some(shipment_id) => Ok(shipment::Entity::find_by_id(shipment_id)
                .one(&*self.db)
                .await?),
            None => Ok(None),
        }
    }
}
