use crate::{
    entities::{product_variant, ProductVariant},
    errors::{ServiceError, StockShortfall},
};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

/// One line's stock requirement.
#[derive(Debug, Clone)]
pub struct StockRequest {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub quantity: i32,
}

/// Checks requested quantities against live variant stock.
///
/// Lines without a variant carry no tracked inventory and always pass.
/// Returns one shortfall entry per line that cannot be satisfied; an empty
/// result means every line is available.
pub async fn find_shortfalls<C: ConnectionTrait>(
    conn: &C,
    requests: &[StockRequest],
) -> Result<Vec<StockShortfall>, ServiceError> {
    let variant_ids: Vec<Uuid> = requests.iter().filter_map(|r| r.variant_id).collect();
    if variant_ids.is_empty() {
        return Ok(Vec::new());
    }

    let variants = ProductVariant::find()
        .filter(product_variant::Column::Id.is_in(variant_ids))
        .all(conn)
        .await?;

    let mut shortfalls = Vec::new();
    for request in requests {
        let Some(variant_id) = request.variant_id else {
            continue;
        };
        let available = variants
            .iter()
            .find(|v| v.id == variant_id)
            .map(|v| v.stock)
            .unwrap_or(0);

        if available < request.quantity {
            shortfalls.push(StockShortfall {
                item_id: request.item_id,
                product_id: request.product_id,
                variant_id: Some(variant_id),
                product_name: request.product_name.clone(),
                requested: request.quantity,
                available,
            });
        }
    }

    Ok(shortfalls)
}
