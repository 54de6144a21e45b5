use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use shopflow_catalog::Product;
use shopflow_core::{CardDetails, User};
use shopflow_order::{OrderError, OrderStatus};
use shopflow_shared::format_minor_units;

use crate::state::AppState;

pub const APPROVED_CARD: &str = "4242 4242 4242 4242";
pub const DECLINED_CARD: &str = "4000 0000 0002 0000";

/// What the walkthrough did, for printing at the end.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub delivered_order: Uuid,
    pub tracking_number: Option<String>,
    pub invoice_total: String,
    pub cancelled_order: Uuid,
    pub cancelled_status: OrderStatus,
    pub declined_attempts: usize,
    pub orders_on_file: usize,
}

/// Seed a small catalog and walk two orders through the lifecycle: one all
/// the way to delivery, one declined and then cancelled.
pub async fn run(state: &AppState) -> anyhow::Result<ScenarioReport> {
    // Emails are unique per store; tag them so reruns against Postgres work.
    let run_id = Uuid::new_v4().simple().to_string();
    let tag = &run_id[..8];
    let admin = User::admin(&format!("admin+{}@shopflow.test", tag), "Alice", "Admin");
    let customer = User::customer(
        &format!("bob+{}@shopflow.test", tag),
        "Bob",
        "Buyer",
        "12 Rue des Lilas, 75011 Paris",
    );
    state.users.add(&admin).await.context("register admin")?;
    state.users.add(&customer).await.context("register customer")?;

    let tshirt = Product::new("Logo T-Shirt", "Organic cotton t-shirt", 1999, 100);
    let hoodie = Product::new("Hoodie", "Fleece hoodie", 4999, 50);
    let mug = Product::new("Mug", "Ceramic mug", 1299, 10);
    for product in [&tshirt, &hoodie, &mug] {
        state.catalog.add_product(admin.id, product).await?;
    }
    for product in state.catalog.list_products().await? {
        info!(product = %product.name, price = %format_minor_units(product.price_cents), stock = product.stock_qty, "Catalog entry");
    }

    // Happy path
    state.carts.add_to_cart(customer.id, tshirt.id, 2).await?;
    state.carts.add_to_cart(customer.id, hoodie.id, 1).await?;
    let cart_total = state.carts.cart_total(customer.id).await?;
    info!(user_id = %customer.id, total = %format_minor_units(cart_total), "Cart ready");

    let order = state.orders.checkout(customer.id).await?;
    state.orders.backoffice_validate(admin.id, order.id).await?;
    let card = CardDetails::new(APPROVED_CARD, 12, 2030, "123");
    let payment = state.orders.pay_by_card(order.id, card).await?;
    info!(payment_id = %payment.id, provider = %payment.provider, "Payment captured");

    state.orders.backoffice_ship(admin.id, order.id).await?;
    let delivered = state.orders.backoffice_mark_delivered(admin.id, order.id).await?;

    let invoice_id = delivered
        .invoice_id
        .context("paid order carries an invoice")?;
    let invoice = state
        .billing
        .get_invoice(invoice_id)
        .await?
        .context("invoice on file")?;

    // Declined card, then the customer gives up
    state.carts.add_to_cart(customer.id, mug.id, 3).await?;
    let second = state.orders.checkout(customer.id).await?;
    let declined = CardDetails::new(DECLINED_CARD, 12, 2030, "123");
    match state.orders.pay_by_card(second.id, declined).await {
        Err(OrderError::PaymentDeclined { reason, .. }) => {
            warn!(order_id = %second.id, reason = %reason, "Card refused, cancelling");
        }
        Err(e) => return Err(e.into()),
        Ok(_) => anyhow::bail!("declined test card was accepted"),
    }
    let cancelled = state.orders.request_cancellation(customer.id, second.id).await?;

    let declined_attempts = state
        .orders
        .payments_for_order(second.id)
        .await?
        .iter()
        .filter(|p| !p.succeeded)
        .count();
    let orders_on_file = state.orders.view_orders(customer.id).await?.len();

    Ok(ScenarioReport {
        delivered_order: delivered.id,
        tracking_number: delivered.delivery.and_then(|d| d.tracking_number),
        invoice_total: format_minor_units(invoice.total_cents),
        cancelled_order: cancelled.id,
        cancelled_status: cancelled.status,
        declined_attempts,
        orders_on_file,
    })
}
