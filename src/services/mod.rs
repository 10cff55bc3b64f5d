/// Business services for the checkout workflow.
pub mod checkout;
pub mod gateway;
pub mod pricing;
pub mod stock;

pub use checkout::CheckoutService;
pub use gateway::{MockPaymentGateway, PaymentGateway, PaymentMethod};
