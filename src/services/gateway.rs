use crate::{config::CheckoutConfig, errors::ServiceError};
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Payment methods the storefront can accept.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    Wallet,
    CashOnDelivery,
}

/// Charge request handed to the gateway.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub idempotency_key: String,
    pub customer_id: Uuid,
}

/// Terminal result of a charge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeOutcome {
    pub success: bool,
    pub gateway_reference: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ChargeOutcome {
    pub fn succeeded(gateway_reference: String) -> Self {
        Self {
            success: true,
            gateway_reference: Some(gateway_reference),
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            gateway_reference: None,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
        }
    }
}

/// External payment processor abstraction.
///
/// Callers bound `charge` with their own `tokio::time::timeout`; an
/// implementation is free to take as long as it likes, but anything past the
/// caller's bound is treated as a failed attempt.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn available_methods(&self) -> Vec<PaymentMethod>;

    /// Membership test against the supported method set.
    fn validate_method(&self, raw: &str) -> Option<PaymentMethod> {
        let method = PaymentMethod::from_str(raw).ok()?;
        self.available_methods()
            .contains(&method)
            .then_some(method)
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, ServiceError>;
}

/// Mock gateway used in development and tests.
///
/// Keeps a ledger of outcomes keyed by idempotency key so a retried charge
/// replays the recorded result instead of charging twice. Failure and
/// latency injection let tests exercise the decline and timeout paths.
pub struct MockPaymentGateway {
    methods: Vec<PaymentMethod>,
    charges: DashMap<String, ChargeOutcome>,
    attempts: AtomicUsize,
    injected_failure: RwLock<Option<(String, String)>>,
    injected_latency: RwLock<Option<Duration>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::with_methods(vec![
            PaymentMethod::Card,
            PaymentMethod::Wallet,
            PaymentMethod::CashOnDelivery,
        ])
    }

    pub fn with_methods(methods: Vec<PaymentMethod>) -> Self {
        Self {
            methods,
            charges: DashMap::new(),
            attempts: AtomicUsize::new(0),
            injected_failure: RwLock::new(None),
            injected_latency: RwLock::new(None),
        }
    }

    /// Builds the gateway from the configured method strings; unknown names
    /// are skipped with a warning.
    pub fn from_config(config: &CheckoutConfig) -> Self {
        let mut methods = Vec::new();
        for raw in &config.payment_methods {
            match PaymentMethod::from_str(raw) {
                Ok(method) => methods.push(method),
                Err(_) => warn!(method = %raw, "ignoring unknown payment method in config"),
            }
        }
        if methods.is_empty() {
            warn!("no valid payment methods configured; falling back to defaults");
            return Self::new();
        }
        Self::with_methods(methods)
    }

    /// Number of charge attempts that actually reached the processor
    /// (idempotent replays excluded).
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Makes subsequent charges fail with the given code/message until
    /// cleared with `clear_failure`.
    pub fn inject_failure(&self, error_code: impl Into<String>, message: impl Into<String>) {
        if let Ok(mut slot) = self.injected_failure.write() {
            *slot = Some((error_code.into(), message.into()));
        }
    }

    pub fn clear_failure(&self) {
        if let Ok(mut slot) = self.injected_failure.write() {
            *slot = None;
        }
    }

    /// Delays subsequent charges; combined with a short caller timeout this
    /// exercises the gateway-timeout path.
    pub fn inject_latency(&self, delay: Duration) {
        if let Ok(mut slot) = self.injected_latency.write() {
            *slot = Some(delay);
        }
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn available_methods(&self) -> Vec<PaymentMethod> {
        self.methods.clone()
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        if let Some(existing) = self.charges.get(&request.idempotency_key) {
            info!(
                idempotency_key = %request.idempotency_key,
                "replaying recorded charge outcome"
            );
            return Ok(existing.clone());
        }

        let delay = self.injected_latency.read().ok().and_then(|slot| *slot);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failure = self
            .injected_failure
            .read()
            .ok()
            .and_then(|slot| slot.clone());
        let outcome = match failure {
            Some((code, message)) => ChargeOutcome::failed(code, message),
            None => ChargeOutcome::succeeded(format!("mock_{:016x}", rand::random::<u64>())),
        };

        self.charges
            .insert(request.idempotency_key.clone(), outcome.clone());
        Ok(outcome)
    }
}
