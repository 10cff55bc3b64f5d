/// Persisted entities for the checkout workflow plus the catalog/cart read
/// model it consumes.
pub mod cart_item;
pub mod checkout_session;
pub mod order;
pub mod payment;
pub mod product;
pub mod product_variant;

// Re-export entities
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use checkout_session::{
    CheckoutStatus, Entity as CheckoutSession, LockedPriceItem, Model as CheckoutSessionModel,
};
pub use order::{Entity as Order, Model as OrderModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
