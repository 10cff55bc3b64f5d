use crate::entities::{product, product_variant};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Two prices within this distance are considered unchanged when comparing a
/// live catalog price against a previously locked one.
pub const PRICE_TOLERANCE: Decimal = dec!(0.01);

/// Resolved pricing for a single cart line.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePrice {
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub final_price: Decimal,
}

/// Resolves the effective price of a product/variant pair.
///
/// The variant price overrides the product base price, and the variant
/// discount overrides the product discount (defaulting to zero). The final
/// price is `unit × (1 − discount/100)` with no extra rounding.
pub fn effective_price(
    product: &product::Model,
    variant: Option<&product_variant::Model>,
) -> EffectivePrice {
    let unit_price = variant
        .and_then(|v| v.price)
        .unwrap_or(product.base_price);
    let discount_percent = variant
        .and_then(|v| v.discount_percent)
        .or(product.discount_percent)
        .unwrap_or(Decimal::ZERO);

    EffectivePrice {
        unit_price,
        discount_percent,
        final_price: apply_discount(unit_price, discount_percent),
    }
}

pub fn apply_discount(unit_price: Decimal, discount_percent: Decimal) -> Decimal {
    unit_price * (Decimal::ONE_HUNDRED - discount_percent) / Decimal::ONE_HUNDRED
}

/// Classifies two prices as "changed" vs "same" under [`PRICE_TOLERANCE`].
pub fn prices_differ(locked: Decimal, live: Decimal) -> bool {
    (locked - live).abs() > PRICE_TOLERANCE
}
