use chrono::Utc;
use shopflow_catalog::{CartLine, CartRepository, ProductRepository};
use shopflow_core::{
    CardDetails, Payment, PaymentGateway, PaymentRepository, StoreError, UserRepository,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::billing::BillingService;
use crate::delivery::DeliveryCoordinator;
use crate::error::{OrderError, OrderResult};
use crate::models::{Order, OrderItem, OrderStatus};
use crate::repository::OrderRepository;

/// Storage handles the orchestrator works against.
#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub carts: Arc<dyn CartRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub users: Arc<dyn UserRepository>,
}

/// Owns the order lifecycle: checkout, payment, backoffice transitions,
/// cancellation and refund.
///
/// Every transition re-reads the order, checks its precondition and writes it
/// back with an optimistic version check, so two concurrent transitions on
/// the same order cannot both succeed.
pub struct OrderOrchestrator {
    repos: Repositories,
    billing: BillingService,
    delivery: DeliveryCoordinator,
    gateway: Arc<dyn PaymentGateway>,
}

impl OrderOrchestrator {
    pub fn new(
        repos: Repositories,
        billing: BillingService,
        delivery: DeliveryCoordinator,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            repos,
            billing,
            delivery,
            gateway,
        }
    }

    /// Turn the user's cart into a CREATED order.
    ///
    /// Stock for every line is reserved in cart order. If any line fails,
    /// everything reserved so far is released and no order exists.
    pub async fn checkout(&self, user_id: Uuid) -> OrderResult<Order> {
        let cart = self.repos.carts.get_or_create(user_id).await?;
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let mut reserved: Vec<(Uuid, u32)> = Vec::with_capacity(cart.lines.len());
        let mut items = Vec::with_capacity(cart.lines.len());

        for line in &cart.lines {
            match self.reserve_line(line).await {
                Ok(item) => {
                    reserved.push((item.product_id, item.quantity));
                    items.push(item);
                }
                Err(e) => {
                    warn!(user_id = %user_id, product_id = %line.product_id, error = %e, "Checkout aborted, rolling back reservations");
                    self.release_lines(&reserved).await.ok();
                    return Err(e);
                }
            }
        }

        // Cart is emptied before the order is stored; a failure in either
        // step undoes the other.
        if let Err(e) = self.repos.carts.clear(user_id).await {
            error!(user_id = %user_id, error = %e, "Failed to clear cart, rolling back reservations");
            self.release_lines(&reserved).await.ok();
            return Err(e.into());
        }

        let order = Order::new(user_id, items);
        if let Err(e) = self.repos.orders.add(&order).await {
            error!(user_id = %user_id, error = %e, "Failed to persist order, rolling back reservations");
            self.release_lines(&reserved).await.ok();
            self.restore_cart(user_id, &cart.lines).await;
            return Err(e.into());
        }

        info!(
            order_id = %order.id,
            user_id = %user_id,
            lines = order.items.len(),
            total_cents = order.total_cents(),
            "Order created"
        );
        Ok(order)
    }

    /// Charge the order total to a card.
    ///
    /// A declined charge is still recorded as a `Payment`; the order stays
    /// where it was and keeps its stock.
    pub async fn pay_by_card(&self, order_id: Uuid, card: CardDetails) -> OrderResult<Payment> {
        let order = self.load_order(order_id).await?;

        if !matches!(order.status, OrderStatus::Created | OrderStatus::Validated) {
            return Err(OrderError::invalid_state(
                order.id,
                order.status,
                "order cannot be paid in its current state",
            ));
        }

        let attempts = self.repos.payments.list_by_order(order.id).await?;
        if attempts.iter().any(|p| p.succeeded) {
            return Err(OrderError::invalid_state(order.id, order.status, "order already has a successful payment"));
        }

        card.validate(Utc::now().date_naive())?;

        let amount = order.total_cents();
        let outcome = self
            .gateway
            .charge(&card, amount, &order.id.to_string())
            .await?;

        let payment = Payment::record(order.id, order.user_id, amount, self.gateway.provider(), &outcome);
        self.repos.payments.add(&payment).await?;

        if !payment.succeeded {
            let reason = payment
                .failure_reason
                .clone()
                .unwrap_or_else(|| "declined".to_string());
            warn!(
                order_id = %order.id,
                payment_id = %payment.id,
                card = %card.number.redacted(),
                reason = %reason,
                "Payment declined"
            );
            return Err(OrderError::PaymentDeclined {
                order_id: order.id,
                payment_id: payment.id,
                reason,
            });
        }

        let order = self.settle_payment(order, &payment).await?;
        if order.status == OrderStatus::Cancelled {
            warn!(order_id = %order_id, payment_id = %payment.id, "Order cancelled while the charge was captured");
            return Err(OrderError::invalid_state(
                order.id,
                order.status,
                "order was cancelled during payment; the charge is kept for refund",
            ));
        }

        info!(order_id = %order_id, payment_id = %payment.id, amount_cents = amount, "Order paid");
        Ok(payment)
    }

    /// Attach a captured charge to its order.
    ///
    /// The order goes to PAID with an invoice. If another transition wins the
    /// version check, the order is re-read: still payable means another try,
    /// cancelled means the payment is linked so the charge can be refunded.
    async fn settle_payment(&self, mut order: Order, payment: &Payment) -> OrderResult<Order> {
        let mut invoice_id = None;
        loop {
            match order.status {
                OrderStatus::Created | OrderStatus::Validated => {
                    order.advance(OrderStatus::Paid, Utc::now())?;
                    order.payment_id = Some(payment.id);
                    let invoice = self.billing.issue_invoice(&order).await?;
                    invoice_id = Some(invoice.id);
                    order.invoice_id = invoice_id;
                }
                OrderStatus::Cancelled if order.payment_id.is_none() => {
                    order.payment_id = Some(payment.id);
                    order.invoice_id = order.invoice_id.or(invoice_id);
                }
                status => {
                    error!(order_id = %order.id, payment_id = %payment.id, status = %status, "Charge captured but order moved on");
                    return Err(OrderError::invalid_state(order.id, status, "order was modified concurrently"));
                }
            }

            match self.repos.orders.update(&order).await {
                Ok(version) => {
                    order.version = version;
                    return Ok(order);
                }
                Err(StoreError::Conflict { .. }) => {
                    warn!(order_id = %order.id, payment_id = %payment.id, "Concurrent update while settling payment, retrying");
                    order = self.load_order(order.id).await?;
                }
                Err(e) => {
                    error!(order_id = %order.id, payment_id = %payment.id, error = %e, "Charge captured but order could not be updated");
                    return Err(e.into());
                }
            }
        }
    }

    pub async fn backoffice_validate(&self, admin_id: Uuid, order_id: Uuid) -> OrderResult<Order> {
        self.require_admin(admin_id).await?;
        let mut order = self.load_order(order_id).await?;

        if order.status != OrderStatus::Created {
            return Err(OrderError::invalid_state(order.id, order.status, "only new orders can be validated"));
        }
        order.advance(OrderStatus::Validated, Utc::now())?;

        let order = self.commit(order).await?;
        info!(order_id = %order.id, admin_id = %admin_id, "Order validated");
        Ok(order)
    }

    /// Prepare a parcel to the customer's address and hand it to the
    /// default carrier.
    pub async fn backoffice_ship(&self, admin_id: Uuid, order_id: Uuid) -> OrderResult<Order> {
        self.require_admin(admin_id).await?;
        let mut order = self.load_order(order_id).await?;

        if order.status != OrderStatus::Paid {
            return Err(OrderError::invalid_state(order.id, order.status, "order must be paid before shipping"));
        }

        let customer = self
            .repos
            .users
            .get(order.user_id)
            .await?
            .ok_or_else(|| OrderError::not_found("user", order.user_id))?;

        let delivery = self.delivery.prepare_delivery(&order, &customer.address, None);
        let delivery = self.delivery.ship(delivery)?;
        order.delivery = Some(delivery);
        order.advance(OrderStatus::Shipped, Utc::now())?;

        let order = self.commit(order).await?;
        info!(order_id = %order.id, admin_id = %admin_id, "Order shipped");
        Ok(order)
    }

    pub async fn backoffice_mark_delivered(&self, admin_id: Uuid, order_id: Uuid) -> OrderResult<Order> {
        self.require_admin(admin_id).await?;
        let mut order = self.load_order(order_id).await?;

        let delivery = match (order.status, order.delivery.take()) {
            (OrderStatus::Shipped, Some(delivery)) => delivery,
            (status, _) => {
                return Err(OrderError::invalid_state(order.id, status, "order has not been shipped"));
            }
        };

        order.delivery = Some(self.delivery.mark_delivered(delivery)?);
        order.advance(OrderStatus::Delivered, Utc::now())?;

        let order = self.commit(order).await?;
        info!(order_id = %order.id, admin_id = %admin_id, "Order delivered");
        Ok(order)
    }

    /// Customer-initiated cancellation. Stock for every line goes back to
    /// the catalog once the cancellation is stored.
    pub async fn request_cancellation(&self, user_id: Uuid, order_id: Uuid) -> OrderResult<Order> {
        let mut order = self.load_order(order_id).await?;
        if order.user_id != user_id {
            return Err(OrderError::not_found("order", order_id));
        }

        match order.status {
            OrderStatus::Shipped | OrderStatus::Delivered => {
                return Err(OrderError::invalid_state(order.id, order.status, "too late to cancel: order already shipped"));
            }
            OrderStatus::Cancelled | OrderStatus::Refunded => {
                return Err(OrderError::invalid_state(order.id, order.status, "order is already closed"));
            }
            _ => {}
        }
        order.advance(OrderStatus::Cancelled, Utc::now())?;

        let order = self.commit(order).await?;
        self.release_items(&order).await?;

        info!(order_id = %order.id, user_id = %user_id, "Order cancelled");
        Ok(order)
    }

    /// Refund a paid or cancelled order through the gateway.
    ///
    /// `amount_cents` defaults to the order total. Stock is released only
    /// when refunding from PAID; a cancelled order already gave it back.
    pub async fn backoffice_refund(
        &self,
        admin_id: Uuid,
        order_id: Uuid,
        amount_cents: Option<i64>,
    ) -> OrderResult<Order> {
        self.require_admin(admin_id).await?;
        let mut order = self.load_order(order_id).await?;

        if !matches!(order.status, OrderStatus::Paid | OrderStatus::Cancelled) {
            return Err(OrderError::invalid_state(order.id, order.status, "refund not allowed in current state"));
        }

        let total = order.total_cents();
        let amount = amount_cents.unwrap_or(total);
        if amount <= 0 || amount > total {
            return Err(OrderError::InvalidRefundAmount { amount, total });
        }

        let payment = match order.payment_id {
            Some(id) => self.repos.payments.get(id).await?,
            None => self
                .repos
                .payments
                .list_by_order(order.id)
                .await?
                .into_iter()
                .find(|p| p.succeeded),
        };
        let transaction_ref = payment
            .filter(|p| p.succeeded)
            .and_then(|p| p.provider_ref)
            .ok_or_else(|| OrderError::invalid_state(order.id, order.status, "no successful payment to refund"))?;

        let outcome = self.gateway.refund(&transaction_ref, amount).await?;
        if !outcome.success {
            warn!(order_id = %order.id, amount_cents = amount, "Refund refused by provider");
            return Err(OrderError::RefundFailed { order_id: order.id });
        }

        let restock = order.status == OrderStatus::Paid;
        order.advance(OrderStatus::Refunded, Utc::now())?;

        let order = self.commit(order).await?;
        if restock {
            self.release_items(&order).await?;
        }

        info!(
            order_id = %order.id,
            admin_id = %admin_id,
            amount_cents = amount,
            refund_ref = outcome.refund_ref.as_deref().unwrap_or_default(),
            "Order refunded"
        );
        Ok(order)
    }

    /// The user's orders, oldest first.
    pub async fn view_orders(&self, user_id: Uuid) -> OrderResult<Vec<Order>> {
        Ok(self.repos.orders.list_by_user(user_id).await?)
    }

    pub async fn get_order_for_user(&self, user_id: Uuid, order_id: Uuid) -> OrderResult<Order> {
        let order = self.load_order(order_id).await?;
        if order.user_id != user_id {
            return Err(OrderError::not_found("order", order_id));
        }
        Ok(order)
    }

    pub async fn backoffice_list_orders(&self, admin_id: Uuid) -> OrderResult<Vec<Order>> {
        self.require_admin(admin_id).await?;
        Ok(self.repos.orders.list_all().await?)
    }

    /// Every payment attempt made for an order, oldest first.
    pub async fn payments_for_order(&self, order_id: Uuid) -> OrderResult<Vec<Payment>> {
        Ok(self.repos.payments.list_by_order(order_id).await?)
    }

    async fn require_admin(&self, user_id: Uuid) -> OrderResult<()> {
        match self.repos.users.get(user_id).await? {
            Some(user) if user.is_admin => Ok(()),
            _ => Err(OrderError::PermissionDenied(format!("user {} is not an administrator", user_id))),
        }
    }

    async fn load_order(&self, order_id: Uuid) -> OrderResult<Order> {
        self.repos
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| OrderError::not_found("order", order_id))
    }

    /// Write back a transitioned order. Losing the version race reports the
    /// state the winner left behind.
    async fn commit(&self, mut order: Order) -> OrderResult<Order> {
        match self.repos.orders.update(&order).await {
            Ok(version) => {
                order.version = version;
                Ok(order)
            }
            Err(StoreError::Conflict { .. }) => {
                let current = self.load_order(order.id).await?;
                warn!(order_id = %order.id, status = %current.status, "Concurrent update detected");
                Err(OrderError::invalid_state(current.id, current.status, "order was modified concurrently"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reserve_line(&self, line: &CartLine) -> OrderResult<OrderItem> {
        let product = match self.repos.products.get(line.product_id).await? {
            Some(p) if p.is_active => p,
            _ => return Err(OrderError::ProductUnavailable(line.product_id)),
        };

        match self.repos.products.reserve_stock(product.id, line.quantity).await {
            Ok(()) => {
                debug!(product_id = %product.id, quantity = line.quantity, "Line reserved");
                Ok(OrderItem::snapshot(&product, line.quantity))
            }
            Err(StoreError::InsufficientStock { .. }) => {
                let available = match self.repos.products.get(product.id).await {
                    Ok(Some(p)) => p.stock_qty,
                    _ => product.stock_qty,
                };
                Err(OrderError::InsufficientStock {
                    product_id: product.id,
                    name: product.name,
                    requested: line.quantity,
                    available,
                })
            }
            Err(StoreError::Inactive { .. }) | Err(StoreError::NotFound { .. }) => {
                Err(OrderError::ProductUnavailable(product.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn restore_cart(&self, user_id: Uuid, lines: &[CartLine]) {
        for line in lines {
            if let Err(e) = self.repos.carts.add_item(user_id, line.product_id, line.quantity).await {
                error!(user_id = %user_id, product_id = %line.product_id, error = %e, "Failed to restore cart line");
            }
        }
    }

    async fn release_items(&self, order: &Order) -> OrderResult<()> {
        let lines: Vec<(Uuid, u32)> = order
            .items
            .iter()
            .map(|item| (item.product_id, item.quantity))
            .collect();
        self.release_lines(&lines).await
    }

    /// Attempts every line even if one fails; the first failure is returned.
    async fn release_lines(&self, lines: &[(Uuid, u32)]) -> OrderResult<()> {
        let mut first_error = None;
        for &(product_id, quantity) in lines {
            if let Err(e) = self.repos.products.release_stock(product_id, quantity).await {
                error!(product_id = %product_id, quantity, error = %e, "Failed to release stock");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SimulatedGateway;
    use crate::memory::{InMemoryInvoiceRepository, InMemoryOrderRepository};
    use crate::models::DeliveryStatus;
    use crate::repository::InvoiceRepository;
    use async_trait::async_trait;
    use shopflow_catalog::{Cart, InMemoryCartRepository, InMemoryProductRepository, Product};
    use shopflow_core::{
        CardError, ChargeResult, GatewayError, InMemoryPaymentRepository, InMemoryUserRepository,
        RefundResult, StoreResult, User,
    };

    const GOOD_CARD: &str = "4242424242424242";
    const DECLINED_CARD: &str = "4000000000020000";

    struct Fixture {
        orchestrator: OrderOrchestrator,
        products: Arc<InMemoryProductRepository>,
        carts: Arc<InMemoryCartRepository>,
        payments: Arc<InMemoryPaymentRepository>,
        invoices: Arc<InMemoryInvoiceRepository>,
        gateway: Arc<SimulatedGateway>,
        admin: User,
        customer: User,
        keyboard: Product,
        mouse: Product,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::build(|_, gateway| gateway, |carts| carts).await
        }

        /// Lets a test wrap the gateway and cart store the orchestrator sees.
        async fn build<G, C>(wrap_gateway: G, wrap_carts: C) -> Self
        where
            G: FnOnce(Arc<InMemoryOrderRepository>, Arc<dyn PaymentGateway>) -> Arc<dyn PaymentGateway>,
            C: FnOnce(Arc<dyn CartRepository>) -> Arc<dyn CartRepository>,
        {
            let orders = Arc::new(InMemoryOrderRepository::new());
            let products = Arc::new(InMemoryProductRepository::new());
            let carts = Arc::new(InMemoryCartRepository::new());
            let payments = Arc::new(InMemoryPaymentRepository::new());
            let invoices = Arc::new(InMemoryInvoiceRepository::new());
            let users = Arc::new(InMemoryUserRepository::new());
            let gateway = Arc::new(SimulatedGateway::new("CB"));

            let admin = User::admin("admin@shop.test", "Ada", "Admin");
            let customer = User::customer("jane@shop.test", "Jane", "Doe", "1 Rue de Rivoli, Paris");
            users.add(&admin).await.unwrap();
            users.add(&customer).await.unwrap();

            let keyboard = Product::new("Keyboard", "Mechanical", 1000, 5);
            let mouse = Product::new("Mouse", "Wireless", 2000, 3);
            products.add(&keyboard).await.unwrap();
            products.add(&mouse).await.unwrap();

            let repos = Repositories {
                orders: orders.clone(),
                products: products.clone(),
                carts: wrap_carts(carts.clone() as Arc<dyn CartRepository>),
                payments: payments.clone(),
                users,
            };
            let orchestrator = OrderOrchestrator::new(
                repos,
                BillingService::new(invoices.clone()),
                DeliveryCoordinator::new("POSTE"),
                wrap_gateway(orders, gateway.clone() as Arc<dyn PaymentGateway>),
            );

            Self {
                orchestrator,
                products,
                carts,
                payments,
                invoices,
                gateway,
                admin,
                customer,
                keyboard,
                mouse,
            }
        }

        async fn stock(&self, product: &Product) -> u32 {
            self.products.get(product.id).await.unwrap().unwrap().stock_qty
        }

        /// 2 keyboards + 1 mouse, checked out.
        async fn placed_order(&self) -> Order {
            self.carts.add_item(self.customer.id, self.keyboard.id, 2).await.unwrap();
            self.carts.add_item(self.customer.id, self.mouse.id, 1).await.unwrap();
            self.orchestrator.checkout(self.customer.id).await.unwrap()
        }

        async fn paid_order(&self) -> Order {
            let order = self.placed_order().await;
            self.orchestrator
                .pay_by_card(order.id, card(GOOD_CARD))
                .await
                .unwrap();
            self.orchestrator
                .get_order_for_user(self.customer.id, order.id)
                .await
                .unwrap()
        }
    }

    fn card(number: &str) -> CardDetails {
        CardDetails::new(number, 12, 2030, "123")
    }

    /// Moves the order to `status` behind the orchestrator's back, then
    /// charges through the wrapped gateway.
    struct InterleavingGateway {
        orders: Arc<InMemoryOrderRepository>,
        inner: Arc<dyn PaymentGateway>,
        status: OrderStatus,
    }

    #[async_trait]
    impl PaymentGateway for InterleavingGateway {
        fn provider(&self) -> &str {
            self.inner.provider()
        }

        async fn charge(
            &self,
            card: &CardDetails,
            amount_cents: i64,
            idempotency_key: &str,
        ) -> Result<ChargeResult, GatewayError> {
            let order_id: Uuid = idempotency_key.parse().unwrap();
            let mut order = self.orders.get(order_id).await.unwrap().unwrap();
            order.advance(self.status, Utc::now()).unwrap();
            self.orders.update(&order).await.unwrap();
            self.inner.charge(card, amount_cents, idempotency_key).await
        }

        async fn refund(
            &self,
            transaction_ref: &str,
            amount_cents: i64,
        ) -> Result<RefundResult, GatewayError> {
            self.inner.refund(transaction_ref, amount_cents).await
        }
    }

    fn interleaving(status: OrderStatus) -> impl FnOnce(Arc<InMemoryOrderRepository>, Arc<dyn PaymentGateway>) -> Arc<dyn PaymentGateway> {
        move |orders, inner| Arc::new(InterleavingGateway { orders, inner, status })
    }

    /// Cart store whose `clear` always fails.
    struct StuckCarts {
        inner: Arc<dyn CartRepository>,
    }

    #[async_trait]
    impl CartRepository for StuckCarts {
        async fn get_or_create(&self, user_id: Uuid) -> StoreResult<Cart> {
            self.inner.get_or_create(user_id).await
        }

        async fn add_item(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> StoreResult<Cart> {
            self.inner.add_item(user_id, product_id, quantity).await
        }

        async fn remove_item(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> StoreResult<Cart> {
            self.inner.remove_item(user_id, product_id, quantity).await
        }

        async fn clear(&self, _user_id: Uuid) -> StoreResult<()> {
            Err(StoreError::backend(std::io::Error::new(
                std::io::ErrorKind::Other,
                "cart store offline",
            )))
        }

        async fn remove_product_everywhere(&self, product_id: Uuid) -> StoreResult<usize> {
            self.inner.remove_product_everywhere(product_id).await
        }
    }

    #[tokio::test]
    async fn test_checkout_reserves_stock_and_clears_cart() {
        let fx = Fixture::new().await;

        let order = fx.placed_order().await;

        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.total_cents(), 4000);
        assert_eq!(order.items[0].name, "Keyboard");
        assert_eq!(fx.stock(&fx.keyboard).await, 3);
        assert_eq!(fx.stock(&fx.mouse).await, 2);
        assert!(fx.carts.get_or_create(fx.customer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_empty_cart() {
        let fx = Fixture::new().await;
        let result = fx.orchestrator.checkout(fx.customer.id).await;
        assert!(matches!(result, Err(OrderError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_checkout_rolls_back_on_short_line() {
        let fx = Fixture::new().await;
        fx.carts.add_item(fx.customer.id, fx.keyboard.id, 2).await.unwrap();
        fx.carts.add_item(fx.customer.id, fx.mouse.id, 3).await.unwrap();
        // Someone else buys two mice in between.
        fx.products.reserve_stock(fx.mouse.id, 2).await.unwrap();

        let result = fx.orchestrator.checkout(fx.customer.id).await;

        match result {
            Err(OrderError::InsufficientStock { product_id, name, requested, available }) => {
                assert_eq!(product_id, fx.mouse.id);
                assert_eq!(name, "Mouse");
                assert_eq!(requested, 3);
                assert_eq!(available, 1);
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }
        assert_eq!(fx.stock(&fx.keyboard).await, 5);
        assert_eq!(fx.stock(&fx.mouse).await, 1);
        assert!(fx.orchestrator.view_orders(fx.customer.id).await.unwrap().is_empty());
        assert!(!fx.carts.get_or_create(fx.customer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_inactive_product() {
        let fx = Fixture::new().await;
        fx.carts.add_item(fx.customer.id, fx.keyboard.id, 1).await.unwrap();
        fx.carts.add_item(fx.customer.id, fx.mouse.id, 1).await.unwrap();
        fx.products.set_active(fx.mouse.id, false).await.unwrap();

        let result = fx.orchestrator.checkout(fx.customer.id).await;

        assert!(matches!(result, Err(OrderError::ProductUnavailable(id)) if id == fx.mouse.id));
        assert_eq!(fx.stock(&fx.keyboard).await, 5);
    }

    #[tokio::test]
    async fn test_pay_marks_order_paid_and_invoices() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let payment = fx.orchestrator.pay_by_card(order.id, card(GOOD_CARD)).await.unwrap();

        assert!(payment.succeeded);
        assert_eq!(payment.amount_cents, 4000);
        assert_eq!(payment.provider, "CB");

        let paid = fx.orchestrator.get_order_for_user(fx.customer.id, order.id).await.unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_id, Some(payment.id));
        assert!(paid.timeline.paid_at.unwrap() >= paid.timeline.created_at);

        let invoice = fx.invoices.get(paid.invoice_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(invoice.total_cents, paid.total_cents());
        assert_eq!(invoice.lines.len(), 2);
    }

    #[tokio::test]
    async fn test_second_payment_is_refused() {
        let fx = Fixture::new().await;
        let order = fx.paid_order().await;

        let again = fx.orchestrator.pay_by_card(order.id, card(GOOD_CARD)).await;

        assert!(matches!(
            again,
            Err(OrderError::InvalidOrderState { status: OrderStatus::Paid, .. })
        ));
        assert_eq!(fx.gateway.charge_count(), 1);
        assert_eq!(fx.payments.list_by_order(order.id).await.unwrap().len(), 1);
        assert!(fx.invoices.find_by_order(order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_declined_payment_keeps_order_created() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let result = fx.orchestrator.pay_by_card(order.id, card(DECLINED_CARD)).await;

        match result {
            Err(OrderError::PaymentDeclined { order_id, reason, .. }) => {
                assert_eq!(order_id, order.id);
                assert_eq!(reason, "CARD_DECLINED");
            }
            other => panic!("expected PaymentDeclined, got {:?}", other),
        }

        let current = fx.orchestrator.get_order_for_user(fx.customer.id, order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Created);
        assert!(current.payment_id.is_none());
        assert_eq!(fx.stock(&fx.keyboard).await, 3);

        let attempts = fx.orchestrator.payments_for_order(order.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].succeeded);

        // A retry with a good card goes through.
        fx.orchestrator.pay_by_card(order.id, card(GOOD_CARD)).await.unwrap();
        assert_eq!(fx.orchestrator.payments_for_order(order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_card_never_reaches_gateway() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let expired = CardDetails::new(GOOD_CARD, 1, 2020, "123");
        let result = fx.orchestrator.pay_by_card(order.id, expired).await;

        assert!(matches!(result, Err(OrderError::InvalidCard(CardError::Expired))));
        assert_eq!(fx.gateway.charge_count(), 0);
        assert!(fx.payments.list_by_order(order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backoffice_requires_admin() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let result = fx.orchestrator.backoffice_validate(fx.customer.id, order.id).await;
        assert!(matches!(result, Err(OrderError::PermissionDenied(_))));

        let result = fx.orchestrator.backoffice_list_orders(Uuid::new_v4()).await;
        assert!(matches!(result, Err(OrderError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let validated = fx.orchestrator.backoffice_validate(fx.admin.id, order.id).await.unwrap();
        assert_eq!(validated.status, OrderStatus::Validated);

        fx.orchestrator.pay_by_card(order.id, card(GOOD_CARD)).await.unwrap();

        let shipped = fx.orchestrator.backoffice_ship(fx.admin.id, order.id).await.unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        let delivery = shipped.delivery.clone().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::InTransit);
        assert_eq!(delivery.carrier, "POSTE");
        assert_eq!(delivery.address, "1 Rue de Rivoli, Paris");
        assert!(delivery.tracking_number.unwrap().starts_with("TRK-"));

        let delivered = fx.orchestrator.backoffice_mark_delivered(fx.admin.id, order.id).await.unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(delivered.delivery.unwrap().status, DeliveryStatus::Delivered);

        let t = &delivered.timeline;
        assert!(t.created_at <= t.validated_at.unwrap());
        assert!(t.validated_at <= t.paid_at);
        assert!(t.paid_at <= t.shipped_at);
        assert!(t.shipped_at <= t.delivered_at);
        assert_eq!(fx.orchestrator.backoffice_list_orders(fx.admin.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ship_requires_payment() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let result = fx.orchestrator.backoffice_ship(fx.admin.id, order.id).await;
        assert!(matches!(
            result,
            Err(OrderError::InvalidOrderState { status: OrderStatus::Created, .. })
        ));

        let result = fx.orchestrator.backoffice_mark_delivered(fx.admin.id, order.id).await;
        assert!(matches!(result, Err(OrderError::InvalidOrderState { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_releases_stock_once() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let cancelled = fx.orchestrator.request_cancellation(fx.customer.id, order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(cancelled.timeline.cancelled_at.is_some());
        assert_eq!(fx.stock(&fx.keyboard).await, 5);
        assert_eq!(fx.stock(&fx.mouse).await, 3);

        let again = fx.orchestrator.request_cancellation(fx.customer.id, order.id).await;
        assert!(matches!(again, Err(OrderError::InvalidOrderState { .. })));
        assert_eq!(fx.stock(&fx.keyboard).await, 5);
    }

    #[tokio::test]
    async fn test_cancel_by_stranger_is_not_found() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let result = fx.orchestrator.request_cancellation(Uuid::new_v4(), order.id).await;
        assert!(matches!(result, Err(OrderError::NotFound { entity: "order", .. })));
        assert_eq!(fx.stock(&fx.keyboard).await, 3);
    }

    #[tokio::test]
    async fn test_too_late_to_cancel() {
        let fx = Fixture::new().await;
        let order = fx.paid_order().await;
        fx.orchestrator.backoffice_ship(fx.admin.id, order.id).await.unwrap();

        let result = fx.orchestrator.request_cancellation(fx.customer.id, order.id).await;

        assert!(matches!(
            result,
            Err(OrderError::InvalidOrderState { status: OrderStatus::Shipped, .. })
        ));
        assert_eq!(fx.stock(&fx.keyboard).await, 3);
    }

    #[tokio::test]
    async fn test_refund_paid_order_restores_stock() {
        let fx = Fixture::new().await;
        let order = fx.paid_order().await;

        let refunded = fx.orchestrator.backoffice_refund(fx.admin.id, order.id, None).await.unwrap();

        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert!(refunded.timeline.refunded_at.is_some());
        assert_eq!(fx.stock(&fx.keyboard).await, 5);
        assert_eq!(fx.stock(&fx.mouse).await, 3);
    }

    #[tokio::test]
    async fn test_refund_after_cancellation_does_not_restock_twice() {
        let fx = Fixture::new().await;
        let order = fx.paid_order().await;
        fx.orchestrator.request_cancellation(fx.customer.id, order.id).await.unwrap();
        assert_eq!(fx.stock(&fx.keyboard).await, 5);

        let refunded = fx.orchestrator.backoffice_refund(fx.admin.id, order.id, Some(1000)).await.unwrap();

        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert_eq!(fx.stock(&fx.keyboard).await, 5);
        assert_eq!(fx.stock(&fx.mouse).await, 3);
    }

    #[tokio::test]
    async fn test_refund_without_payment() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;
        fx.orchestrator.request_cancellation(fx.customer.id, order.id).await.unwrap();

        let result = fx.orchestrator.backoffice_refund(fx.admin.id, order.id, None).await;
        assert!(matches!(
            result,
            Err(OrderError::InvalidOrderState { status: OrderStatus::Cancelled, .. })
        ));
    }

    #[tokio::test]
    async fn test_refund_amount_bounds() {
        let fx = Fixture::new().await;
        let order = fx.paid_order().await;

        for amount in [0, -5, 4001] {
            let result = fx.orchestrator.backoffice_refund(fx.admin.id, order.id, Some(amount)).await;
            assert!(matches!(
                result,
                Err(OrderError::InvalidRefundAmount { total: 4000, .. })
            ));
        }

        fx.carts.add_item(fx.customer.id, fx.keyboard.id, 1).await.unwrap();
        let created = fx.orchestrator.checkout(fx.customer.id).await.unwrap();
        let result = fx.orchestrator.backoffice_refund(fx.admin.id, created.id, None).await;
        assert!(matches!(result, Err(OrderError::InvalidOrderState { .. })));
    }

    #[tokio::test]
    async fn test_view_orders_is_scoped_to_owner() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;

        let mine = fx.orchestrator.view_orders(fx.customer.id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, order.id);

        assert!(fx.orchestrator.view_orders(fx.admin.id).await.unwrap().is_empty());
        let result = fx.orchestrator.get_order_for_user(fx.admin.id, order.id).await;
        assert!(matches!(result, Err(OrderError::NotFound { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancellations_release_once() {
        let fx = Arc::new(Fixture::new().await);
        let order_id = fx.placed_order().await.id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fx = fx.clone();
            handles.push(tokio::spawn(async move {
                fx.orchestrator.request_cancellation(fx.customer.id, order_id).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(OrderError::InvalidOrderState { status, .. }) => {
                    assert_eq!(status, OrderStatus::Cancelled)
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(fx.stock(&fx.keyboard).await, 5);
        assert_eq!(fx.stock(&fx.mouse).await, 3);
    }

    #[tokio::test]
    async fn test_checkout_fails_cleanly_when_cart_cannot_be_cleared() {
        let fx = Fixture::build(|_, gateway| gateway, |carts| Arc::new(StuckCarts { inner: carts })).await;
        fx.carts.add_item(fx.customer.id, fx.keyboard.id, 2).await.unwrap();

        let result = fx.orchestrator.checkout(fx.customer.id).await;

        assert!(matches!(result, Err(OrderError::Store(_))));
        assert!(fx.orchestrator.view_orders(fx.customer.id).await.unwrap().is_empty());
        assert_eq!(fx.stock(&fx.keyboard).await, 5);
        let cart = fx.carts.get_or_create(fx.customer.id).await.unwrap();
        assert_eq!(cart.quantity_of(fx.keyboard.id), 2);
    }

    #[tokio::test]
    async fn test_payment_settles_after_concurrent_validation() {
        let fx = Fixture::build(interleaving(OrderStatus::Validated), |carts| carts).await;
        let order = fx.placed_order().await;

        let payment = fx.orchestrator.pay_by_card(order.id, card(GOOD_CARD)).await.unwrap();

        let paid = fx.orchestrator.get_order_for_user(fx.customer.id, order.id).await.unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert!(paid.timeline.validated_at.is_some());
        assert_eq!(paid.payment_id, Some(payment.id));
        assert!(paid.invoice_id.is_some());
    }

    #[tokio::test]
    async fn test_charge_captured_during_cancellation_stays_refundable() {
        let fx = Fixture::build(interleaving(OrderStatus::Cancelled), |carts| carts).await;
        let order = fx.placed_order().await;

        let result = fx.orchestrator.pay_by_card(order.id, card(GOOD_CARD)).await;
        assert!(matches!(
            result,
            Err(OrderError::InvalidOrderState { status: OrderStatus::Cancelled, .. })
        ));

        let attempts = fx.orchestrator.payments_for_order(order.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].succeeded);
        let cancelled = fx.orchestrator.get_order_for_user(fx.customer.id, order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.payment_id, Some(attempts[0].id));
        let invoice = fx.invoices.find_by_order(order.id).await.unwrap().unwrap();
        assert_eq!(cancelled.invoice_id, Some(invoice.id));

        let refunded = fx.orchestrator.backoffice_refund(fx.admin.id, order.id, None).await.unwrap();
        assert_eq!(refunded.status, OrderStatus::Refunded);
    }

    #[tokio::test]
    async fn test_refund_finds_payment_missing_from_order() {
        let fx = Fixture::new().await;
        let order = fx.placed_order().await;
        let outcome = fx
            .gateway
            .charge(&card(GOOD_CARD), order.total_cents(), &order.id.to_string())
            .await
            .unwrap();
        let payment = Payment::record(order.id, order.user_id, order.total_cents(), "CB", &outcome);
        fx.payments.add(&payment).await.unwrap();
        fx.orchestrator.request_cancellation(fx.customer.id, order.id).await.unwrap();

        let refunded = fx.orchestrator.backoffice_refund(fx.admin.id, order.id, None).await.unwrap();

        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert!(refunded.payment_id.is_none());
    }
}
