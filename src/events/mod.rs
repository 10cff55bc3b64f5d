use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Audit events emitted by the checkout workflow.
///
/// The audit sink is write-only: nothing in here feeds back into
/// orchestration decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutInitiated {
        session_id: Uuid,
        customer_id: Uuid,
        total_amount: Decimal,
        line_count: usize,
    },
    CheckoutValidated {
        session_id: Uuid,
        price_changes: usize,
    },
    CheckoutValidationFailed {
        session_id: Uuid,
        shortfall_count: usize,
    },
    PaymentProcessing {
        session_id: Uuid,
        payment_id: Uuid,
        method: String,
        amount: Decimal,
    },
    PaymentSucceeded {
        payment_id: Uuid,
        gateway_reference: String,
    },
    PaymentFailed {
        payment_id: Uuid,
        error_code: String,
        attempt: i32,
    },
    OrderCreated {
        order_id: Uuid,
        session_id: Uuid,
        total_amount: Decimal,
    },
    CheckoutCompleted {
        session_id: Uuid,
        order_id: Uuid,
    },
    CheckoutCancelled {
        session_id: Uuid,
    },
    CheckoutExpired {
        session_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget send. Audit delivery must never fail a checkout
    /// operation, so channel errors are logged and swallowed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(err) = self.send(event).await {
            warn!(error = %err, "audit event dropped");
        }
    }
}

/// Consumes audit events and writes structured trace records.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting audit event loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CheckoutInitiated {
                session_id,
                customer_id,
                total_amount,
                line_count,
            } => {
                info!(
                    %session_id,
                    %customer_id,
                    %total_amount,
                    line_count,
                    "checkout initiated"
                );
            }
            Event::CheckoutValidated {
                session_id,
                price_changes,
            } => {
                info!(%session_id, price_changes, "checkout validated");
            }
            Event::CheckoutValidationFailed {
                session_id,
                shortfall_count,
            } => {
                warn!(%session_id, shortfall_count, "checkout stock validation failed");
            }
            Event::PaymentProcessing {
                session_id,
                payment_id,
                method,
                amount,
            } => {
                info!(%session_id, %payment_id, %method, %amount, "payment processing");
            }
            Event::PaymentSucceeded {
                payment_id,
                gateway_reference,
            } => {
                info!(%payment_id, %gateway_reference, "payment succeeded");
            }
            Event::PaymentFailed {
                payment_id,
                error_code,
                attempt,
            } => {
                warn!(%payment_id, %error_code, attempt, "payment failed");
            }
            Event::OrderCreated {
                order_id,
                session_id,
                total_amount,
            } => {
                info!(%order_id, %session_id, %total_amount, "order created");
            }
            Event::CheckoutCompleted {
                session_id,
                order_id,
            } => {
                info!(%session_id, %order_id, "checkout completed");
            }
            Event::CheckoutCancelled { session_id } => {
                info!(%session_id, "checkout cancelled");
            }
            Event::CheckoutExpired { session_id } => {
                info!(%session_id, "checkout session expired");
            }
        }
    }

    warn!("Audit event loop has ended");
}
