use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        order::{self, OrderStatus},
        order_item, ShippingStatus,
    },
    services::{
        coupons::{redeem_coupon, CouponService},
        discounts::{evaluate_coupon, round_money, CouponRejection},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItemInput {
    #[validate(length(min = 1, max = 255))]
    pub product_name: String,
    pub sku: Option<String>,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
    #[schema(value_type = String, example = "49.90")]
    pub unit_price: Decimal,
    /// Per-unit weight in kilograms
    #[schema(value_type = Option<String>)]
    pub weight_kg: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecipientInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub street: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(equal = 2))]
    pub country: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInput {
    pub user_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub items: Vec<CheckoutItemInput>,
    #[serde(default)]
    #[schema(value_type = String, example = "10.00")]
    pub shipping_cost: Decimal,
    #[validate]
    pub recipient: RecipientInput,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_name: String,
    pub sku: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemView {
    fn from(item: order_item::Model) -> Self {
        Self {
            line_total: round_money(item.line_total()),
            id: item.id,
            product_name: item.product_name,
            sku: item.sku,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    #[schema(value_type = String)]
    pub discount_amount: Decimal,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub currency: String,
    pub coupon_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    pub shipping_status: ShippingStatus,
    pub shipment_id: Option<Uuid>,
    pub items: Vec<OrderItemView>,
    pub created_at: chrono::DateTime<Utc>,
}

impl OrderView {
    fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            currency: order.currency,
            coupon_id: order.coupon_id,
            coupon_code: order.coupon_code,
            shipping_status: order.shipping_status,
            shipment_id: order.shipment_id,
            items: items.into_iter().map(OrderItemView::from).collect(),
            created_at: order.created_at,
        }
    }
}

/// Checkout: prices the cart, redeems the coupon and stores the order
fn amount_too_large() -> ServiceError {
    ServiceError::ValidationError("order amount is too large".to_string())
}

/// Items subtotal and parcel weight, `None` when either does not fit a `Decimal`
fn cart_totals(items: &[CheckoutItemInput]) -> Option<(Decimal, Decimal)> {
    items
        .iter()
        .try_fold((Decimal::ZERO, Decimal::ZERO), |(amount, weight), item| {
            let quantity = Decimal::from(item.quantity);
            let line = item.unit_price.checked_mul(quantity)?;
            let line_weight = item.weight_kg.unwrap_or(Decimal::ZERO).checked_mul(quantity)?;
            Some((amount.checked_add(line)?, weight.checked_add(line_weight)?))
        })
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            currency: currency.into(),
        }
    }

    /// Places an order. The coupon is priced against items + shipping with
    /// the shipping line excluded from the discount, then redeemed in the
    /// same transaction that inserts the order, so a refused redemption
    /// leaves no order behind.
    #[instrument(skip(self, input), fields(items = input.items.len()))]
    pub async fn create_order(&self, input: CheckoutInput) -> Result<OrderView, ServiceError> {
        input.validate()?;
        for item in &input.items {
            item.validate()?;
        }
        if input.shipping_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "shipping cost cannot be negative".to_string(),
            ));
        }
        if let Some(item) = input.items.iter().find(|i| i.unit_price < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(format!(
                "unit price for {} cannot be negative",
                item.product_name
            )));
        }

        if let Some(item) = input
            .items
            .iter()
            .find(|i| i.weight_kg.map(|w| w < Decimal::ZERO).unwrap_or(false))
        {
            return Err(ServiceError::ValidationError(format!(
                "weight for {} cannot be negative",
                item.product_name
            )));
        }

        let (items_subtotal, _) = cart_totals(&input.items).ok_or_else(amount_too_large)?;
        let items_subtotal = round_money(items_subtotal);
        let shipping_cost = round_money(input.shipping_cost);
        let cart_amount = items_subtotal
            .checked_add(shipping_cost)
            .ok_or_else(amount_too_large)?;
        let now = Utc::now();

        let coupon = match input
            .coupon_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
        {
            Some(code) => {
                let coupon = CouponService::find_by_code(&*self.db, code)
                    .await?
                    .ok_or(CouponRejection::NotFound)?;
                let discount = evaluate_coupon(&coupon, cart_amount, shipping_cost, now)?;
                Some((coupon, discount))
            }
            None => None,
        };
        let discount_amount = coupon
            .as_ref()
            .map(|(_, discount)| *discount)
            .unwrap_or(Decimal::ZERO);
        let total_amount = (cart_amount - discount_amount).max(Decimal::ZERO);

        let order_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        if let Some((coupon, _)) = &coupon {
            redeem_coupon(&txn, coupon.id, now).await?;
        }

        let recipient = input.recipient;
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(input.user_id),
            status: Set(OrderStatus::Pending),
            subtotal: Set(items_subtotal),
            shipping_cost: Set(shipping_cost),
            discount_amount: Set(discount_amount),
            total_amount: Set(total_amount),
            currency: Set(self.currency.clone()),
            coupon_id: Set(coupon.as_ref().map(|(c, _)| c.id)),
            coupon_code: Set(coupon.as_ref().map(|(c, _)| c.code.clone())),
            recipient_name: Set(Some(recipient.name)),
            phone: Set(recipient.phone),
            email: Set(recipient.email),
            street: Set(Some(recipient.street)),
            city: Set(Some(recipient.city)),
            state: Set(recipient.state),
            postal_code: Set(Some(recipient.postal_code)),
            country: Set(Some(recipient.country.to_uppercase())),
            shipping_status: Set(ShippingStatus::None),
            shipment_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(input.items.len());
        for item in input.items {
            let created = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_name: Set(item.product_name),
                sku: Set(item.sku),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                weight_kg: Set(item.weight_kg),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(created);
        }

        txn.commit().await?;

        info!(%order_id, %total_amount, %discount_amount, "order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                total_amount,
            })
            .await;
        if let Some((coupon, discount_amount)) = &coupon {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    coupon_id: coupon.id,
                    order_id,
                    discount_amount: *discount_amount,
                })
                .await;
        }

        Ok(OrderView::from_parts(order, items))
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(OrderView::from_parts(order, items))
    }
}
