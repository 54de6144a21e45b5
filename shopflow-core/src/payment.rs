use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shopflow_shared::Masked;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::repository::PaymentRepository;
use crate::{StoreError, StoreResult};

/// One charge attempt against the gateway. A declined attempt is recorded
/// too; a retry produces a new record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub succeeded: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn record(
        order_id: Uuid,
        user_id: Uuid,
        amount_cents: i64,
        provider: &str,
        outcome: &ChargeResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            user_id,
            amount_cents,
            provider: provider.to_string(),
            provider_ref: outcome.transaction_ref.clone(),
            succeeded: outcome.success,
            failure_reason: outcome.failure_reason.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Card data as entered at checkout. Number and CVC never reach logs.
#[derive(Debug, Clone, Deserialize)]
pub struct CardDetails {
    pub number: Masked<String>,
    pub exp_month: u32,
    pub exp_year: i32,
    pub cvc: Masked<String>,
}

impl CardDetails {
    /// Spaces and dashes in the number are dropped.
    pub fn new(number: &str, exp_month: u32, exp_year: i32, cvc: &str) -> Self {
        let digits: String = number.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
        Self {
            number: Masked::new(digits),
            exp_month,
            exp_year,
            cvc: Masked::new(cvc.trim().to_string()),
        }
    }

    pub fn last_four(&self) -> &str {
        self.number.tail(4)
    }

    /// Form-level checks run before a card is sent to the gateway.
    pub fn validate(&self, today: NaiveDate) -> Result<(), CardError> {
        let number = self.number.expose();
        if !(13..=19).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(CardError::InvalidNumber);
        }
        if !luhn_valid(number) {
            return Err(CardError::ChecksumFailed);
        }

        if !(1..=12).contains(&self.exp_month) {
            return Err(CardError::InvalidExpiry);
        }
        if self.exp_year > today.year() + 20 {
            return Err(CardError::InvalidExpiry);
        }
        if (self.exp_year, self.exp_month) < (today.year(), today.month()) {
            return Err(CardError::Expired);
        }

        let cvc = self.cvc.expose();
        if !(3..=4).contains(&cvc.len()) || !cvc.chars().all(|c| c.is_ascii_digit()) {
            return Err(CardError::InvalidCvc);
        }
        Ok(())
    }
}

fn luhn_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .enumerate()
        .map(|(idx, d)| {
            if idx % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CardError {
    #[error("Card number must be 13 to 19 digits")]
    InvalidNumber,

    #[error("Card number failed the Luhn check")]
    ChecksumFailed,

    #[error("Invalid expiry date")]
    InvalidExpiry,

    #[error("Card is expired")]
    Expired,

    #[error("CVC must be 3 or 4 digits")]
    InvalidCvc,
}

/// What the gateway answered for a charge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChargeResult {
    pub success: bool,
    pub transaction_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl ChargeResult {
    pub fn approved(transaction_ref: String) -> Self {
        Self { success: true, transaction_ref: Some(transaction_ref), failure_reason: None }
    }

    pub fn declined(reason: &str) -> Self {
        Self { success: false, transaction_ref: None, failure_reason: Some(reason.to_string()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundResult {
    pub success: bool,
    pub refund_ref: Option<String>,
}

/// Transport-level failure talking to the payment provider. A declined card
/// is not an error; it is a `ChargeResult` with `success == false`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),
}

/// Boundary to an external card processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name stored on every `Payment`.
    fn provider(&self) -> &str;

    /// Charge a card. Retries for the same order must reuse `idempotency_key`.
    async fn charge(
        &self,
        card: &CardDetails,
        amount_cents: i64,
        idempotency_key: &str,
    ) -> Result<ChargeResult, GatewayError>;

    async fn refund(
        &self,
        transaction_ref: &str,
        amount_cents: i64,
    ) -> Result<RefundResult, GatewayError>;
}

/// Keeps insertion order so `list_by_order` is oldest first.
#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: RwLock<Vec<Payment>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn add(&self, payment: &Payment) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        if payments.iter().any(|p| p.id == payment.id) {
            return Err(StoreError::Duplicate { entity: "payment", id: payment.id.to_string() });
        }
        payments.push(payment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.payments.read().await.iter().find(|p| p.id == id).cloned())
    }

    async fn list_by_order(&self, order_id: Uuid) -> StoreResult<Vec<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }
}
