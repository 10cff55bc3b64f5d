use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a checkout session.
///
/// `Completed` and `Expired` are terminal; `Failed` and `Cancelled` are
/// terminal for the session (retrying requires a fresh initiation), while
/// payment retries cycle between `AwaitingPayment` and `ProcessingPayment`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutStatus {
    #[sea_orm(string_value = "initiated")]
    Initiated,
    #[sea_orm(string_value = "validating")]
    Validating,
    #[sea_orm(string_value = "awaiting_payment")]
    AwaitingPayment,
    #[sea_orm(string_value = "processing_payment")]
    ProcessingPayment,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl CheckoutStatus {
    /// No further transitions are allowed out of these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutStatus::Completed
                | CheckoutStatus::Failed
                | CheckoutStatus::Cancelled
                | CheckoutStatus::Expired
        )
    }
}

/// Price snapshot for one cart line, captured at initiation.
///
/// Decoupled from the live catalog: later product or variant edits never
/// change what a session charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedPriceItem {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub final_price: Decimal,
    pub name: String,
    pub variant_name: Option<String>,
    pub image_url: Option<String>,
}

impl LockedPriceItem {
    pub fn line_total(&self) -> Decimal {
        self.final_price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub customer_id: Uuid,

    #[sea_orm(unique)]
    pub idempotency_key: String,

    /// Cart lines as they looked at initiation time
    #[sea_orm(column_type = "Json")]
    pub cart_snapshot: Json,

    /// Serialized `Vec<LockedPriceItem>`; immutable after creation
    #[sea_orm(column_type = "Json")]
    pub locked_prices: Json,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,

    pub status: CheckoutStatus,

    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Deserializes the locked price list.
    pub fn locked_items(&self) -> Result<Vec<LockedPriceItem>, serde_json::Error> {
        serde_json::from_value(self.locked_prices.clone())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status != CheckoutStatus::Completed && self.expires_at < now
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
