use async_trait::async_trait;
use shopflow_core::{CardDetails, ChargeResult, GatewayError, PaymentGateway, RefundResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const DECLINE_SUFFIX: &str = "0000";
const DECLINE_REASON: &str = "CARD_DECLINED";

#[derive(Default)]
struct Ledger {
    /// Approved charges keyed by idempotency key.
    approved: HashMap<String, ChargeResult>,
    transactions: HashSet<String>,
}

/// Stand-in card processor. Declines any card number ending in `0000` and
/// collapses repeated approved charges sharing an idempotency key.
pub struct SimulatedGateway {
    provider: String,
    ledger: Mutex<Ledger>,
    charges: AtomicUsize,
}

impl SimulatedGateway {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ledger: Mutex::new(Ledger::default()),
            charges: AtomicUsize::new(0),
        }
    }

    /// Number of charges actually processed, replays excluded.
    pub fn charge_count(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn charge(
        &self,
        card: &CardDetails,
        amount_cents: i64,
        idempotency_key: &str,
    ) -> Result<ChargeResult, GatewayError> {
        if amount_cents <= 0 {
            return Err(GatewayError::Rejected(format!("invalid amount {}", amount_cents)));
        }

        let mut ledger = self.ledger.lock().await;
        if let Some(previous) = ledger.approved.get(idempotency_key) {
            debug!(key = %idempotency_key, "Replaying approved charge");
            return Ok(previous.clone());
        }

        self.charges.fetch_add(1, Ordering::SeqCst);

        if card.number.expose().ends_with(DECLINE_SUFFIX) {
            warn!(card = %card.number.redacted(), amount_cents, "Charge declined");
            return Ok(ChargeResult::declined(DECLINE_REASON));
        }

        let transaction_ref = Uuid::new_v4().to_string();
        let result = ChargeResult::approved(transaction_ref.clone());
        ledger.transactions.insert(transaction_ref);
        ledger
            .approved
            .insert(idempotency_key.to_string(), result.clone());
        Ok(result)
    }

    async fn refund(
        &self,
        transaction_ref: &str,
        amount_cents: i64,
    ) -> Result<RefundResult, GatewayError> {
        let ledger = self.ledger.lock().await;
        if amount_cents <= 0 || !ledger.transactions.contains(transaction_ref) {
            warn!(transaction_ref, amount_cents, "Refund refused");
            return Ok(RefundResult {
                success: false,
                refund_ref: None,
            });
        }
        Ok(RefundResult {
            success: true,
            refund_ref: Some(Uuid::new_v4().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(number: &str) -> CardDetails {
        CardDetails::new(number, 12, 2030, "123")
    }

    #[tokio::test]
    async fn test_decline_by_suffix() {
        let gateway = SimulatedGateway::new("CB");

        let ok = gateway.charge(&card("4242424242424242"), 4000, "o-1").await.unwrap();
        assert!(ok.success);
        assert!(ok.transaction_ref.is_some());

        let ko = gateway.charge(&card("4000000000020000"), 4000, "o-2").await.unwrap();
        assert!(!ko.success);
        assert_eq!(ko.failure_reason.as_deref(), Some("CARD_DECLINED"));
        assert_eq!(gateway.charge_count(), 2);
    }

    #[tokio::test]
    async fn test_same_key_collapses_to_first_approval() {
        let gateway = SimulatedGateway::new("CB");

        let first = gateway.charge(&card("4242424242424242"), 4000, "order").await.unwrap();
        let second = gateway.charge(&card("4242424242424242"), 4000, "order").await.unwrap();

        assert_eq!(first.transaction_ref, second.transaction_ref);
        assert_eq!(gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_declines_are_not_cached() {
        let gateway = SimulatedGateway::new("CB");

        let declined = gateway.charge(&card("4000000000020000"), 4000, "order").await.unwrap();
        assert!(!declined.success);

        let retried = gateway.charge(&card("4242424242424242"), 4000, "order").await.unwrap();
        assert!(retried.success);
    }

    #[tokio::test]
    async fn test_refund_requires_known_transaction() {
        let gateway = SimulatedGateway::new("CB");
        let charge = gateway.charge(&card("4242424242424242"), 4000, "order").await.unwrap();
        let tx = charge.transaction_ref.unwrap();

        let refund = gateway.refund(&tx, 4000).await.unwrap();
        assert!(refund.success);
        assert!(refund.refund_ref.is_some());

        let unknown = gateway.refund("nope", 4000).await.unwrap();
        assert!(!unknown.success);
    }
}
