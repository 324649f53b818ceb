use crate::{
    errors::ServiceError,
    models::coupon::{self, normalize_code, DiscountType, Entity as Coupon},
    services::discounts::{check_coupon, evaluate_coupon, CouponRejection},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr,
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Outcome of checking a code against a cart. Both "unknown code" and
/// "known but unusable" are `Invalid`; only the reason differs.
#[derive(Debug, Clone, PartialEq)]
pub enum CouponValidation {
    Valid {
        coupon: coupon::Model,
        discount_amount: Decimal,
    },
    Invalid(CouponRejection),
}

impl CouponValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, CouponValidation::Valid { .. })
    }
}

impl From<CouponRejection> for ServiceError {
    fn from(rejection: CouponRejection) -> Self {
        ServiceError::ValidationError(rejection.to_string())
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCouponInput {
    #[validate(length(min = 3, max = 50), custom = "validate_code_charset")]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub discount_type: DiscountType,
    #[schema(value_type = String, example = "10.00")]
    pub discount_value: Decimal,
    #[schema(value_type = Option<String>)]
    pub min_purchase_amount: Option<Decimal>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub featured: bool,
    pub expires_at: DateTime<Utc>,
}

/// Partial update. For nullable columns, an explicit `null` clears the value
/// and an absent key leaves it untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateCouponInput {
    #[validate(length(min = 3, max = 50), custom = "validate_code_charset")]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub discount_type: Option<DiscountType>,
    #[schema(value_type = Option<String>)]
    pub discount_value: Option<Decimal>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub min_purchase_amount: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i32>)]
    pub usage_limit: Option<Option<i32>>,
    pub active: Option<bool>,
    pub featured: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fields applied to every coupon of a bulk edit
#[derive(Debug, Clone, Default)]
pub struct BulkCouponChanges {
    pub active: Option<bool>,
    pub featured: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BulkCouponChanges {
    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.featured.is_none() && self.expires_at.is_none()
    }
}

fn default_true() -> bool {
    true
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_code_charset(code: &str) -> Result<(), ValidationError> {
    if code
        .trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("code_charset");
        err.message = Some("code may only contain letters, digits, '-' and '_'".into());
        Err(err)
    }
}

/// Invariants shared by create and update, checked on the final values
fn check_terms(
    discount_type: DiscountType,
    discount_value: Decimal,
    min_purchase_amount: Option<Decimal>,
    usage_limit: Option<i32>,
    usage_count: i32,
) -> Result<(), ServiceError> {
    if discount_value <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "discount_value must be greater than 0".to_string(),
        ));
    }
    if discount_type == DiscountType::Percentage && discount_value > Decimal::ONE_HUNDRED {
        return Err(ServiceError::ValidationError(
            "percentage discount_value cannot exceed 100".to_string(),
        ));
    }
    if matches!(min_purchase_amount, Some(min) if min < Decimal::ZERO) {
        return Err(ServiceError::ValidationError(
            "min_purchase_amount cannot be negative".to_string(),
        ));
    }
    if let Some(limit) = usage_limit {
        if limit < 1 {
            return Err(ServiceError::ValidationError(
                "usage_limit must be at least 1".to_string(),
            ));
        }
        if limit < usage_count {
            return Err(ServiceError::ValidationError(format!(
                "usage_limit cannot be lower than the {} redemptions already made",
                usage_count
            )));
        }
    }
    Ok(())
}

/// Atomically consumes one use of a coupon on `conn` (pool or transaction).
///
/// The usability checks and the increment are a single conditional UPDATE,
/// so concurrent redemptions can never push `usage_count` past
/// `usage_limit`. When no row is updated the current row is re-read to
/// report why.
pub async fn redeem_coupon<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let result = Coupon::update_many()
        .col_expr(
            coupon::Column::UsageCount,
            Expr::col(coupon::Column::UsageCount).add(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
        .filter(coupon::Column::Id.eq(coupon_id))
        .filter(coupon::Column::DeletedAt.is_null())
        .filter(coupon::Column::Active.eq(true))
        .filter(coupon::Column::ExpiresAt.gt(now))
        .filter(
            Condition::any()
                .add(coupon::Column::UsageLimit.is_null())
                .add(Expr::col(coupon::Column::UsageCount).lt(Expr::col(coupon::Column::UsageLimit))),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 1 {
        counter!("storefront_coupon_redemptions_total", 1, "outcome" => "redeemed");
        return Ok(());
    }

    let current = Coupon::find_by_id(coupon_id).one(conn).await?;
    let rejection = match current {
        None => CouponRejection::NotFound,
        Some(coupon) => match check_coupon(&coupon, None, now) {
            Err(reason) => reason,
            // lost a race against the last remaining use
            Ok(()) => CouponRejection::Exhausted,
        },
    };
    counter!("storefront_coupon_redemptions_total", 1, "outcome" => rejection.code());
    Err(rejection.into())
}

/// Coupon administration and validation
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up a non-deleted coupon by code, case-insensitively
    pub async fn find_by_code<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(Coupon::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .filter(coupon::Column::DeletedAt.is_null())
            .one(conn)
            .await?)
    }

    /// Checks `code` against a cart and prices it. Pure read: usage is
    /// consumed only when an order is placed.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
        shipping_cost: Decimal,
    ) -> Result<CouponValidation, ServiceError> {
        if code.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "coupon code is required".to_string(),
            ));
        }
        if subtotal < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "subtotal cannot be negative".to_string(),
            ));
        }
        if shipping_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "shipping cost cannot be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let validation = match Self::find_by_code(&*self.db, code).await? {
            None => CouponValidation::Invalid(CouponRejection::NotFound),
            Some(coupon) => match evaluate_coupon(&coupon, subtotal, shipping_cost, now) {
                Ok(discount_amount) => CouponValidation::Valid {
                    coupon,
                    discount_amount,
                },
                Err(rejection) => CouponValidation::Invalid(rejection),
            },
        };

        let outcome = match &validation {
            CouponValidation::Valid { .. } => "valid",
            CouponValidation::Invalid(rejection) => rejection.code(),
        };
        counter!("storefront_coupon_validations_total", 1, "outcome" => outcome);

        Ok(validation)
    }

    /// Active, non-deleted, unexpired coupons; featured first
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        let now = Utc::now();
        Ok(Coupon::find()
            .filter(coupon::Column::Active.eq(true))
            .filter(coupon::Column::DeletedAt.is_null())
            .filter(coupon::Column::ExpiresAt.gt(now))
            .order_by_desc(coupon::Column::Featured)
            .order_by_asc(coupon::Column::ExpiresAt)
            .all(&*self.db)
            .await?)
    }

    /// Pages through every non-deleted coupon, newest first
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<coupon::Model>, u64), ServiceError> {
        let paginator = Coupon::find()
            .filter(coupon::Column::DeletedAt.is_null())
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));

        let total = paginator.num_items().await?;
        let coupons = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((coupons, total))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        Coupon::find_by_id(id)
            .filter(coupon::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreateCouponInput) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        check_terms(
            input.discount_type,
            input.discount_value,
            input.min_purchase_amount,
            input.usage_limit,
            0,
        )?;

        let now = Utc::now();
        if input.expires_at <= now {
            return Err(ServiceError::ValidationError(
                "expires_at must be in the future".to_string(),
            ));
        }

        let code = normalize_code(&input.code);
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            name: Set(input.name.trim().to_string()),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            min_purchase_amount: Set(input.min_purchase_amount),
            usage_limit: Set(input.usage_limit),
            usage_count: Set(0),
            active: Set(input.active),
            featured: Set(input.featured),
            expires_at: Set(input.expires_at),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await.map_err(|e| {
            match ServiceError::from(e) {
                ServiceError::Duplicate(_) => {
                    ServiceError::Duplicate(format!("coupon code {} already exists", code))
                }
                other => other,
            }
        })?;

        info!(coupon_id = %created.id, code = %created.code, "coupon created");
        Ok(created)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        let existing = self.get(id).await?;

        let discount_type = input.discount_type.unwrap_or(existing.discount_type);
        let discount_value = input.discount_value.unwrap_or(existing.discount_value);
        let min_purchase_amount = input
            .min_purchase_amount
            .unwrap_or(existing.min_purchase_amount);
        let usage_limit = input.usage_limit.unwrap_or(existing.usage_limit);
        check_terms(
            discount_type,
            discount_value,
            min_purchase_amount,
            usage_limit,
            existing.usage_count,
        )?;

        let mut model: coupon::ActiveModel = existing.into();
        let mut new_code = None;
        if let Some(code) = &input.code {
            let code = normalize_code(code);
            new_code = Some(code.clone());
            model.code = Set(code);
        }
        if let Some(name) = &input.name {
            model.name = Set(name.trim().to_string());
        }
        model.discount_type = Set(discount_type);
        model.discount_value = Set(discount_value);
        model.min_purchase_amount = Set(min_purchase_amount);
        model.usage_limit = Set(usage_limit);
        if let Some(active) = input.active {
            model.active = Set(active);
        }
        if let Some(featured) = input.featured {
            model.featured = Set(featured);
        }
        if let Some(expires_at) = input.expires_at {
            model.expires_at = Set(expires_at);
        }
        model.updated_at = Set(Utc::now());

        model.update(&*self.db).await.map_err(|e| match ServiceError::from(e) {
            ServiceError::Duplicate(_) => ServiceError::Duplicate(format!(
                "coupon code {} already exists",
                new_code.unwrap_or_default()
            )),
            other => other,
        })
    }

    /// Soft delete: the row stays, `deleted_at` hides it everywhere
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let now = Utc::now();
        let result = Coupon::update_many()
            .col_expr(coupon::Column::DeletedAt, Expr::value(now))
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.eq(id))
            .filter(coupon::Column::DeletedAt.is_null())
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }
        info!(coupon_id = %id, "coupon soft-deleted");
        Ok(())
    }

    /// Flips `featured`, given the value the caller currently sees
    #[instrument(skip(self))]
    pub async fn toggle_featured(
        &self,
        id: Uuid,
        current_featured: bool,
    ) -> Result<coupon::Model, ServiceError> {
        let existing = self.get(id).await?;
        let mut model: coupon::ActiveModel = existing.into();
        model.featured = Set(!current_featured);
        model.updated_at = Set(Utc::now());
        Ok(model.update(&*self.db).await?)
    }

    /// Flips `active`, given the value the caller currently sees
    #[instrument(skip(self))]
    pub async fn toggle_active(
        &self,
        id: Uuid,
        current_active: bool,
    ) -> Result<coupon::Model, ServiceError> {
        let existing = self.get(id).await?;
        let mut model: coupon::ActiveModel = existing.into();
        model.active = Set(!current_active);
        model.updated_at = Set(Utc::now());
        Ok(model.update(&*self.db).await?)
    }

    /// Soft-deletes every listed coupon in one transaction; returns how many changed
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn bulk_soft_delete(&self, ids: Vec<Uuid>) -> Result<u64, ServiceError> {
        if ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "ids must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let result = Coupon::update_many()
            .col_expr(coupon::Column::DeletedAt, Expr::value(now))
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.is_in(ids))
            .filter(coupon::Column::DeletedAt.is_null())
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(affected = result.rows_affected, "coupons bulk soft-deleted");
        Ok(result.rows_affected)
    }

    /// Applies the same changes to every listed, non-deleted coupon in one transaction
    #[instrument(skip(self, ids, changes), fields(count = ids.len()))]
    pub async fn bulk_update(
        &self,
        ids: Vec<Uuid>,
        changes: BulkCouponChanges,
    ) -> Result<u64, ServiceError> {
        if ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "ids must not be empty".to_string(),
            ));
        }
        if changes.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one of active, featured or expiresAt is required".to_string(),
            ));
        }

        let now = Utc::now();
        let mut update = Coupon::update_many()
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.is_in(ids))
            .filter(coupon::Column::DeletedAt.is_null());
        if let Some(active) = changes.active {
            update = update.col_expr(coupon::Column::Active, Expr::value(active));
        }
        if let Some(featured) = changes.featured {
            update = update.col_expr(coupon::Column::Featured, Expr::value(featured));
        }
        if let Some(expires_at) = changes.expires_at {
            update = update.col_expr(coupon::Column::ExpiresAt, Expr::value(expires_at));
        }

        let txn = self.db.begin().await?;
        let result = update.exec(&txn).await?;
        txn.commit().await?;

        info!(affected = result.rows_affected, "coupons bulk updated");
        Ok(result.rows_affected)
    }

    /// Consumes one use of a coupon outside of checkout
    #[instrument(skip(self))]
    pub async fn redeem(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        redeem_coupon(&*self.db, coupon_id, Utc::now())
            .await
            .map_err(|e| {
                warn!(%coupon_id, error = %e, "coupon redemption refused");
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn percentage_over_hundred_is_rejected() {
        let err = check_terms(DiscountType::Percentage, dec!(101), None, None, 0).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
        assert!(check_terms(DiscountType::Fixed, dec!(101), None, None, 0).is_ok());
    }

    #[test]
    fn usage_limit_cannot_drop_below_usage() {
        assert!(check_terms(DiscountType::Fixed, dec!(5), None, Some(3), 4).is_err());
        assert!(check_terms(DiscountType::Fixed, dec!(5), None, Some(4), 4).is_ok());
    }

    #[test]
    fn zero_value_is_rejected() {
        assert!(check_terms(DiscountType::Fixed, Decimal::ZERO, None, None, 0).is_err());
    }

    #[test]
    fn code_charset_is_enforced() {
        assert!(validate_code_charset("SUMMER_24-A").is_ok());
        assert!(validate_code_charset("SUMMER 24").is_err());
    }

    #[test]
    fn explicit_null_clears_nullable_fields() {
        let input: UpdateCouponInput =
            serde_json::from_str(r#"{"usage_limit": null, "name": "Nuevo"}"#).unwrap();
        assert_eq!(input.usage_limit, Some(None));
        assert_eq!(input.min_purchase_amount, None);
    }
}
