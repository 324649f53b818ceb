use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Shipment lifecycle state. Orders carry the full set; shipment rows only
/// ever hold `guide_created` and later states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    #[sea_orm(string_value = "none")]
    None,
    #[sea_orm(string_value = "quoted")]
    Quoted,
    /// Claim held while the carrier booking call is in flight
    #[sea_orm(string_value = "booking")]
    Booking,
    #[sea_orm(string_value = "guide_created")]
    GuideCreated,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl ShippingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingStatus::None => "none",
            ShippingStatus::Quoted => "quoted",
            ShippingStatus::Booking => "booking",
            ShippingStatus::GuideCreated => "guide_created",
            ShippingStatus::InTransit => "in_transit",
            ShippingStatus::Delivered => "delivered",
            ShippingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ShippingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub id_rate: String,
    pub carrier: String,
    pub service: String,
    #[sea_orm(unique)]
    pub tracking_number: String,
    pub guide_id: Option<String>,
    pub tracking_url: Option<String>,
    pub label_url: Option<String>,
    pub status: ShippingStatus,
    /// Raw status text last reported by the carrier
    pub carrier_status: Option<String>,
    pub insured: bool,
    pub pickup_requested: bool,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
    #[sea_orm(has_many = "super::shipment_event::Entity")]
    Events,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::shipment_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
