use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ORDER_STATUS_CONFIRMED: &str = "confirmed";

/// Order created by the atomic checkout completion transaction.
///
/// The idempotency key is inherited from the session (unless the client
/// overrides it on completion), which is what makes completion replayable.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub customer_id: Uuid,
    pub session_id: Uuid,

    #[sea_orm(unique)]
    pub idempotency_key: String,

    /// Locked-price line items, serialized `Vec<LockedPriceItem>`
    #[sea_orm(column_type = "Json")]
    pub line_items: Json,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,

    pub status: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
