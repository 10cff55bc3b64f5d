use crate::{
    config::AppConfig,
    entities::{
        cart_item, checkout_session, order, payment, product_variant, CartItem, CheckoutSession,
        CheckoutStatus, LockedPriceItem, Order, Payment, PaymentStatus, Product, ProductVariant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        gateway::{ChargeOutcome, ChargeRequest, PaymentGateway},
        pricing, stock,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Checkout orchestrator.
///
/// Drives the session state machine (initiate → validate → pay → complete,
/// with cancel/expire side exits), locking prices at initiation and keeping
/// every downstream step on the locked values. Payments and completion are
/// idempotent via client-supplied keys; the completion transaction is the
/// only writer of variant stock.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

#[derive(Debug, Clone)]
pub struct InitiateCheckoutInput {
    pub customer_id: Uuid,
    pub selected_item_ids: Vec<Uuid>,
    pub idempotency_key: String,
}

#[derive(Debug)]
pub struct InitiateOutcome {
    pub session: checkout_session::Model,
    pub is_existing: bool,
}

/// Informational notice that a catalog price drifted from the locked one.
/// Never changes what the session charges.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub locked_final_price: Decimal,
    pub live_final_price: Decimal,
}

#[derive(Debug)]
pub struct ValidationOutcome {
    pub session: checkout_session::Model,
    pub price_changes: Vec<PriceChange>,
}

#[derive(Debug, Clone)]
pub struct ProcessPaymentInput {
    pub payment_method: String,
    pub idempotency_key: String,
}

#[derive(Debug)]
pub struct PaymentOutcome {
    pub payment: payment::Model,
    pub is_existing: bool,
}

#[derive(Debug, Clone)]
pub struct CompleteCheckoutInput {
    pub payment_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug)]
pub struct CompletionOutcome {
    pub order: order::Model,
    pub is_existing: bool,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            config,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    /// Starts a checkout session: snapshots the selected cart lines, locks
    /// their prices, and persists the session in `Initiated` status.
    ///
    /// Replaying the same idempotency key returns the stored session without
    /// touching the cart or catalog again, even under concurrent duplicates.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn initiate(
        &self,
        input: InitiateCheckoutInput,
    ) -> Result<InitiateOutcome, ServiceError> {
        if input.idempotency_key.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "idempotency key is required".to_string(),
            ));
        }
        if input.selected_item_ids.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "at least one cart item must be selected".to_string(),
            ));
        }

        if let Some(existing) = self
            .find_by_idempotency_key(&input.idempotency_key)
            .await?
        {
            return Ok(InitiateOutcome {
                session: existing,
                is_existing: true,
            });
        }

        let items = CartItem::find()
            .filter(cart_item::Column::CustomerId.eq(input.customer_id))
            .filter(cart_item::Column::Id.is_in(input.selected_item_ids.clone()))
            .all(&*self.db)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let (locked, requests) = self.lock_prices(&items).await?;

        let shortfalls = stock::find_shortfalls(&*self.db, &requests).await?;
        if !shortfalls.is_empty() {
            // No session is created for an unsatisfiable cart
            return Err(ServiceError::InsufficientStock(shortfalls));
        }

        let total_amount: Decimal = locked.iter().map(LockedPriceItem::line_total).sum();
        let now = Utc::now();
        let session_id = Uuid::new_v4();

        let session = checkout_session::ActiveModel {
            id: Set(session_id),
            customer_id: Set(input.customer_id),
            idempotency_key: Set(input.idempotency_key.clone()),
            cart_snapshot: Set(serde_json::to_value(&items)?),
            locked_prices: Set(serde_json::to_value(&locked)?),
            total_amount: Set(total_amount),
            status: Set(CheckoutStatus::Initiated),
            expires_at: Set(now + self.config.session_ttl()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let session = match session.insert(&*self.db).await {
            Ok(model) => model,
            Err(err) if is_unique_violation(&err) => {
                // Lost a concurrent insert race for this idempotency key;
                // the winner's row is the session.
                let winner = self
                    .find_by_idempotency_key(&input.idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(
                            "idempotency conflict without a stored session".to_string(),
                        )
                    })?;
                return Ok(InitiateOutcome {
                    session: winner,
                    is_existing: true,
                });
            }
            Err(err) => return Err(err.into()),
        };

        self.event_sender
            .send_or_log(Event::CheckoutInitiated {
                session_id,
                customer_id: input.customer_id,
                total_amount,
                line_count: locked.len(),
            })
            .await;

        info!(%session_id, %total_amount, "checkout session initiated");
        Ok(InitiateOutcome {
            session,
            is_existing: false,
        })
    }

    /// Reads a session, applying the lazy expiry transition first.
    #[instrument(skip(self))]
    pub async fn get_session(
        &self,
        session_id: Uuid,
    ) -> Result<checkout_session::Model, ServiceError> {
        let session = self.find_session(session_id).await?;
        self.ensure_not_expired(session).await
    }

    /// Re-checks live stock against the locked lines and reports (but never
    /// acts on) catalog price drift.
    ///
    /// A stock shortfall is fatal for the session: it transitions to
    /// `Failed` and a new checkout must be initiated.
    #[instrument(skip(self))]
    pub async fn validate(&self, session_id: Uuid) -> Result<ValidationOutcome, ServiceError> {
        let session = self.find_session(session_id).await?;
        let session = self.ensure_not_expired(session).await?;

        match session.status {
            CheckoutStatus::Completed => {
                return Err(ServiceError::SessionCompleted(session_id));
            }
            CheckoutStatus::Cancelled | CheckoutStatus::Failed => {
                return Err(ServiceError::InvalidRequest(format!(
                    "checkout session is {}; start a new checkout",
                    session.status
                )));
            }
            _ => {}
        }

        let session = self.transition(session, CheckoutStatus::Validating).await?;
        let locked = session.locked_items()?;

        let requests: Vec<stock::StockRequest> = locked
            .iter()
            .map(|line| stock::StockRequest {
                item_id: line.item_id,
                product_id: line.product_id,
                variant_id: line.variant_id,
                product_name: line.name.clone(),
                quantity: line.quantity,
            })
            .collect();

        let shortfalls = stock::find_shortfalls(&*self.db, &requests).await?;
        if !shortfalls.is_empty() {
            self.transition(session, CheckoutStatus::Failed).await?;
            self.event_sender
                .send_or_log(Event::CheckoutValidationFailed {
                    session_id,
                    shortfall_count: shortfalls.len(),
                })
                .await;
            return Err(ServiceError::StockValidationFailed(shortfalls));
        }

        let price_changes = self.collect_price_changes(&locked).await?;

        let session = self
            .transition(session, CheckoutStatus::AwaitingPayment)
            .await?;
        self.event_sender
            .send_or_log(Event::CheckoutValidated {
                session_id,
                price_changes: price_changes.len(),
            })
            .await;

        Ok(ValidationOutcome {
            session,
            price_changes,
        })
    }

    /// Charges the locked total through the gateway.
    ///
    /// Replaying a payment idempotency key returns the stored record without
    /// a second gateway call. A declined or timed-out charge marks the
    /// payment `Failed` and reverts the session to `AwaitingPayment` so the
    /// client can retry under a fresh key.
    #[instrument(skip(self, input), fields(method = %input.payment_method))]
    pub async fn process_payment(
        &self,
        session_id: Uuid,
        input: ProcessPaymentInput,
    ) -> Result<PaymentOutcome, ServiceError> {
        if input.payment_method.trim().is_empty() || input.idempotency_key.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "payment method and idempotency key are required".to_string(),
            ));
        }
        let method = self
            .gateway
            .validate_method(&input.payment_method)
            .ok_or_else(|| ServiceError::InvalidPaymentMethod(input.payment_method.clone()))?;

        let session = self.find_session(session_id).await?;
        if session.status == CheckoutStatus::Completed {
            return Err(ServiceError::AlreadyCompleted(session_id));
        }
        let session = self.ensure_not_expired(session).await?;

        if let Some(existing) = Payment::find()
            .filter(payment::Column::IdempotencyKey.eq(input.idempotency_key.clone()))
            .one(&*self.db)
            .await?
        {
            if existing.session_id != session_id {
                return Err(ServiceError::InvalidRequest(
                    "idempotency key was already used by another checkout".to_string(),
                ));
            }
            return Ok(PaymentOutcome {
                payment: existing,
                is_existing: true,
            });
        }

        if session.status != CheckoutStatus::AwaitingPayment {
            return Err(ServiceError::InvalidRequest(format!(
                "checkout session is {}; payment requires a validated session awaiting payment",
                session.status
            )));
        }

        let attempt = Payment::find()
            .filter(payment::Column::SessionId.eq(session_id))
            .count(&*self.db)
            .await? as i32
            + 1;

        let session = self
            .transition(session, CheckoutStatus::ProcessingPayment)
            .await?;

        let now = Utc::now();
        let payment_id = Uuid::new_v4();
        let pending = payment::ActiveModel {
            id: Set(payment_id),
            session_id: Set(session_id),
            idempotency_key: Set(input.idempotency_key.clone()),
            amount: Set(session.total_amount),
            method: Set(method.to_string()),
            status: Set(PaymentStatus::Processing),
            gateway_reference: Set(None),
            error_message: Set(None),
            attempt: Set(attempt),
            order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let pending = match pending.insert(&*self.db).await {
            Ok(model) => model,
            Err(err) if is_unique_violation(&err) => {
                // Concurrent duplicate request: hand back the winner's record
                let winner = Payment::find()
                    .filter(payment::Column::IdempotencyKey.eq(input.idempotency_key.clone()))
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(
                            "payment idempotency conflict without a stored record".to_string(),
                        )
                    })?;
                return Ok(PaymentOutcome {
                    payment: winner,
                    is_existing: true,
                });
            }
            Err(err) => return Err(err.into()),
        };

        self.event_sender
            .send_or_log(Event::PaymentProcessing {
                session_id,
                payment_id,
                method: method.to_string(),
                amount: session.total_amount,
            })
            .await;

        let charge = ChargeRequest {
            amount: session.total_amount,
            method,
            idempotency_key: input.idempotency_key.clone(),
            customer_id: session.customer_id,
        };
        let outcome = match tokio::time::timeout(
            self.config.gateway_timeout(),
            self.gateway.charge(charge),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(error = %err, %payment_id, "payment gateway call failed");
                ChargeOutcome::failed("GATEWAY_ERROR", err.to_string())
            }
            Err(_) => ChargeOutcome::failed(
                "GATEWAY_TIMEOUT",
                format!(
                    "payment gateway did not respond within {}ms",
                    self.config.checkout.gateway_timeout_ms
                ),
            ),
        };

        if outcome.success {
            let gateway_reference = outcome.gateway_reference.unwrap_or_default();
            let mut active: payment::ActiveModel = pending.into();
            active.status = Set(PaymentStatus::Succeeded);
            active.gateway_reference = Set(Some(gateway_reference.clone()));
            active.updated_at = Set(Utc::now());
            let paid = active.update(&*self.db).await?;

            self.event_sender
                .send_or_log(Event::PaymentSucceeded {
                    payment_id,
                    gateway_reference,
                })
                .await;

            info!(%session_id, %payment_id, "payment succeeded");
            Ok(PaymentOutcome {
                payment: paid,
                is_existing: false,
            })
        } else {
            let error_code = outcome
                .error_code
                .unwrap_or_else(|| "GATEWAY_ERROR".to_string());
            let message = outcome
                .error_message
                .unwrap_or_else(|| "payment was declined".to_string());

            let mut active: payment::ActiveModel = pending.into();
            active.status = Set(PaymentStatus::Failed);
            active.error_message = Set(Some(message.clone()));
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;

            // Session returns to a retryable state; a fresh idempotency key
            // gets a fresh payment row
            self.transition(session, CheckoutStatus::AwaitingPayment)
                .await?;

            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    payment_id,
                    error_code: error_code.clone(),
                    attempt,
                })
                .await;

            Err(ServiceError::PaymentFailed {
                payment_id,
                error_code,
                message,
            })
        }
    }

    /// Commits the checkout: guarded stock decrement, order creation, and
    /// payment linking in one transaction. Replaying a completed session
    /// returns the stored order.
    #[instrument(skip(self, input))]
    pub async fn complete(
        &self,
        session_id: Uuid,
        input: CompleteCheckoutInput,
    ) -> Result<CompletionOutcome, ServiceError> {
        let session = self.find_session(session_id).await?;

        if session.status == CheckoutStatus::Completed {
            let existing = self.find_order_for_session(&session).await?;
            return Ok(CompletionOutcome {
                order: existing,
                is_existing: true,
            });
        }

        let session = self.ensure_not_expired(session).await?;
        if session.status.is_terminal() {
            return Err(ServiceError::InvalidRequest(format!(
                "checkout session is {}; start a new checkout",
                session.status
            )));
        }

        // Trust the client-supplied payment id only after verifying it
        // belongs to this session and actually succeeded.
        let paid = match input.payment_id {
            Some(payment_id) => Payment::find_by_id(payment_id)
                .one(&*self.db)
                .await?
                .filter(|p| p.session_id == session_id && p.status == PaymentStatus::Succeeded),
            None => {
                Payment::find()
                    .filter(payment::Column::SessionId.eq(session_id))
                    .filter(payment::Column::Status.eq(PaymentStatus::Succeeded))
                    .one(&*self.db)
                    .await?
            }
        };
        let paid = paid.ok_or(ServiceError::PaymentNotFound(session_id))?;

        let order_key = input
            .idempotency_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| session.idempotency_key.clone());

        let locked = session.locked_items()?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await?;

        for line in &locked {
            let Some(variant_id) = line.variant_id else {
                continue;
            };
            // Guarded decrement: loses the race rather than overselling
            let result = ProductVariant::update_many()
                .col_expr(
                    product_variant::Column::Stock,
                    Expr::col(product_variant::Column::Stock).sub(line.quantity),
                )
                .filter(product_variant::Column::Id.eq(variant_id))
                .filter(product_variant::Column::Stock.gte(line.quantity))
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                txn.rollback().await?;
                return Err(ServiceError::StockConflict {
                    product_id: line.product_id,
                    product_name: line.name.clone(),
                });
            }
        }

        let order_model = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(session.customer_id),
            session_id: Set(session_id),
            idempotency_key: Set(order_key),
            line_items: Set(session.locked_prices.clone()),
            total_amount: Set(session.total_amount),
            status: Set(order::ORDER_STATUS_CONFIRMED.to_string()),
            created_at: Set(now),
        };

        let created = match order_model.insert(&txn).await {
            Ok(model) => model,
            Err(err) if is_unique_violation(&err) => {
                // A concurrent completion already created the order
                txn.rollback().await?;
                let existing = self.find_order_for_session(&session).await?;
                return Ok(CompletionOutcome {
                    order: existing,
                    is_existing: true,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut paid_active: payment::ActiveModel = paid.into();
        paid_active.order_id = Set(Some(order_id));
        paid_active.updated_at = Set(now);
        paid_active.update(&txn).await?;

        txn.commit().await?;

        // Best-effort follow-ups; the order is already durable
        let purchased: Vec<Uuid> = locked.iter().map(|line| line.item_id).collect();
        if let Err(err) = self.finish_completed_session(session, purchased).await {
            warn!(error = %err, %session_id, "post-completion cleanup failed");
        }

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                session_id,
                total_amount: created.total_amount,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                session_id,
                order_id,
            })
            .await;

        info!(%session_id, %order_id, "checkout completed");
        Ok(CompletionOutcome {
            order: created,
            is_existing: false,
        })
    }

    /// Cancels a session. Inventory is untouched (nothing is reserved before
    /// completion); only completed sessions refuse cancellation. Repeat
    /// cancels are no-ops.
    #[instrument(skip(self))]
    pub async fn cancel(&self, session_id: Uuid) -> Result<checkout_session::Model, ServiceError> {
        let session = self.find_session(session_id).await?;

        if session.status == CheckoutStatus::Completed {
            return Err(ServiceError::CannotCancel(session_id));
        }
        if session.status == CheckoutStatus::Cancelled {
            return Ok(session);
        }

        let session = self.transition(session, CheckoutStatus::Cancelled).await?;
        self.event_sender
            .send_or_log(Event::CheckoutCancelled { session_id })
            .await;

        Ok(session)
    }

    async fn find_session(
        &self,
        session_id: Uuid,
    ) -> Result<checkout_session::Model, ServiceError> {
        CheckoutSession::find_by_id(session_id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::SessionNotFound(session_id))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        Ok(CheckoutSession::find()
            .filter(checkout_session::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await?)
    }

    /// Lazy expiry check, run on every read path. Overdue sessions flip to
    /// `Expired` before the operation fails.
    async fn ensure_not_expired(
        &self,
        session: checkout_session::Model,
    ) -> Result<checkout_session::Model, ServiceError> {
        if session.status == CheckoutStatus::Expired {
            return Err(ServiceError::SessionExpired(session.id));
        }
        if session.is_expired_at(Utc::now()) {
            let session_id = session.id;
            self.transition(session, CheckoutStatus::Expired).await?;
            self.event_sender
                .send_or_log(Event::CheckoutExpired { session_id })
                .await;
            return Err(ServiceError::SessionExpired(session_id));
        }
        Ok(session)
    }

    async fn transition(
        &self,
        session: checkout_session::Model,
        status: CheckoutStatus,
    ) -> Result<checkout_session::Model, ServiceError> {
        let mut active: checkout_session::ActiveModel = session.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Resolves prices for the snapshot lines. The variant overrides the
    /// product for both unit price and discount.
    async fn lock_prices(
        &self,
        items: &[cart_item::Model],
    ) -> Result<(Vec<LockedPriceItem>, Vec<stock::StockRequest>), ServiceError> {
        let product_ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products = Product::find()
            .filter(crate::entities::product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await?;

        let variant_ids: Vec<Uuid> = items.iter().filter_map(|item| item.variant_id).collect();
        let variants = if variant_ids.is_empty() {
            Vec::new()
        } else {
            ProductVariant::find()
                .filter(product_variant::Column::Id.is_in(variant_ids))
                .all(&*self.db)
                .await?
        };

        let mut locked = Vec::with_capacity(items.len());
        let mut requests = Vec::with_capacity(items.len());
        for item in items {
            let product = products
                .iter()
                .find(|p| p.id == item.product_id)
                .ok_or_else(|| {
                    ServiceError::InvalidRequest(format!(
                        "cart item {} references an unknown product",
                        item.id
                    ))
                })?;
            let variant = item
                .variant_id
                .and_then(|vid| variants.iter().find(|v| v.id == vid));
            if item.variant_id.is_some() && variant.is_none() {
                return Err(ServiceError::InvalidRequest(format!(
                    "cart item {} references an unknown variant",
                    item.id
                )));
            }

            let price = pricing::effective_price(product, variant);
            locked.push(LockedPriceItem {
                item_id: item.id,
                product_id: product.id,
                variant_id: item.variant_id,
                quantity: item.quantity,
                unit_price: price.unit_price,
                discount_percent: price.discount_percent,
                final_price: price.final_price,
                name: product.name.clone(),
                variant_name: variant.map(|v| v.name.clone()),
                image_url: variant
                    .and_then(|v| v.image_url.clone())
                    .or_else(|| product.image_url.clone()),
            });
            requests.push(stock::StockRequest {
                item_id: item.id,
                product_id: product.id,
                variant_id: item.variant_id,
                product_name: product.name.clone(),
                quantity: item.quantity,
            });
        }

        Ok((locked, requests))
    }

    async fn collect_price_changes(
        &self,
        locked: &[LockedPriceItem],
    ) -> Result<Vec<PriceChange>, ServiceError> {
        let mut changes = Vec::new();
        for line in locked {
            let Some(product) = Product::find_by_id(line.product_id).one(&*self.db).await? else {
                continue;
            };
            let variant = match line.variant_id {
                Some(variant_id) => ProductVariant::find_by_id(variant_id).one(&*self.db).await?,
                None => None,
            };

            let live = pricing::effective_price(&product, variant.as_ref());
            if pricing::prices_differ(line.final_price, live.final_price) {
                changes.push(PriceChange {
                    item_id: line.item_id,
                    product_id: line.product_id,
                    name: line.name.clone(),
                    locked_final_price: line.final_price,
                    live_final_price: live.final_price,
                });
            }
        }
        Ok(changes)
    }

    async fn find_order_for_session(
        &self,
        session: &checkout_session::Model,
    ) -> Result<order::Model, ServiceError> {
        Order::find()
            .filter(order::Column::CustomerId.eq(session.customer_id))
            .filter(order::Column::SessionId.eq(session.id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(
                    "completed checkout session has no stored order".to_string(),
                )
            })
    }

    async fn finish_completed_session(
        &self,
        session: checkout_session::Model,
        purchased_item_ids: Vec<Uuid>,
    ) -> Result<(), ServiceError> {
        self.transition(session, CheckoutStatus::Completed).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::Id.is_in(purchased_item_ids))
            .exec(&*self.db)
            .await?;

        Ok(())
    }
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
