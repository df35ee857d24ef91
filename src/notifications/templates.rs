//! Order email templates and the notifier the order pipeline calls.

use super::{EmailDispatcher, EmailMessage};
use crate::entities::{OrderItemModel, OrderModel};
use std::sync::Arc;
use tracing::{error, Instrument};

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn short_id(order: &OrderModel) -> String {
    order.id.simple().to_string()[..8].to_uppercase()
}

pub fn order_confirmation(to: &str, order: &OrderModel, items: &[OrderItemModel]) -> EmailMessage {
    let currency = order.currency.to_uppercase();
    let reference = short_id(order);

    let mut rows = String::new();
    let mut lines = String::new();
    for item in items {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{:.2} {}</td></tr>",
            escape_html(&item.product_name),
            item.quantity,
            item.line_total(),
            currency
        ));
        lines.push_str(&format!(
            "- {} x{}: {:.2} {}\n",
            item.product_name,
            item.quantity,
            item.line_total(),
            currency
        ));
    }

    EmailMessage {
        to: to.to_string(),
        subject: format!("Order confirmation #{}", reference),
        html_body: format!(
            "<h1>Thank you for your order!</h1>\
             <p>Order <strong>#{reference}</strong> has been received.</p>\
             <table><thead><tr><th>Item</th><th>Qty</th><th>Total</th></tr></thead>\
             <tbody>{rows}</tbody></table>\
             <p><strong>Total: {total:.2} {currency}</strong></p>",
            reference = reference,
            rows = rows,
            total = order.total_amount,
            currency = currency,
        ),
        text_body: format!(
            "Thank you for your order!\n\nOrder #{}\n\n{}\nTotal: {:.2} {}\n",
            reference, lines, order.total_amount, currency
        ),
    }
}

pub fn status_update(to: &str, order: &OrderModel) -> EmailMessage {
    let reference = short_id(order);
    let headline = match order.status.as_str() {
        "processing" => "We're preparing your order",
        "shipped" => "Your order is on its way",
        "delivered" => "Your order has been delivered",
        _ => "Your order was updated",
    };

    EmailMessage {
        to: to.to_string(),
        subject: format!("Order #{}: {}", reference, order.status),
        html_body: format!(
            "<h1>{}</h1><p>Order <strong>#{}</strong> is now <strong>{}</strong>.</p>",
            headline, reference, order.status
        ),
        text_body: format!("{}\n\nOrder #{} is now {}.\n", headline, reference, order.status),
    }
}

/// Order emails, sent off the request path
#[derive(Clone)]
pub struct OrderNotifier {
    dispatcher: Arc<EmailDispatcher>,
}

impl OrderNotifier {
    pub fn new(dispatcher: Arc<EmailDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Delivers `message` on a background task; failures are logged only
    pub fn dispatch(&self, message: EmailMessage) -> tokio::task::JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let span = tracing::info_span!("email", to = %message.to, subject = %message.subject);
        tokio::spawn(
            async move {
                if let Err(e) = dispatcher.send(&message).await {
                    error!(error = %e, "order email could not be delivered");
                }
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OrderStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn order(status: OrderStatus) -> OrderModel {
        let now = Utc::now();
        OrderModel {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            payment_intent_id: "pi_1".into(),
            checkout_session_id: Some("cs_1".into()),
            total_amount: dec!(30.00),
            currency: "usd".into(),
            status,
            shipping_address_id: None,
            customer_email: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn confirmation_lists_items_and_escapes_names() {
        let order = order(OrderStatus::Pending);
        let items = vec![OrderItemModel {
            id: Uuid::new_v4(),
            order_id: order.id,
            product_id: Uuid::new_v4(),
            product_name: "Tee <Limited>".into(),
            quantity: 3,
            price_at_purchase: dec!(10.00),
            created_at: Utc::now(),
        }];

        let email = order_confirmation("ada@example.com", &order, &items);
        assert!(email.subject.starts_with("Order confirmation #"));
        assert!(email.html_body.contains("Tee &lt;Limited&gt;"));
        assert!(email.html_body.contains("30.00 USD"));
        assert!(email.text_body.contains("Tee <Limited> x3"));
    }

    #[test]
    fn status_update_mentions_new_status() {
        let email = status_update("ada@example.com", &order(OrderStatus::Shipped));
        assert!(email.subject.ends_with("shipped"));
        assert!(email.html_body.contains("on its way"));
    }
}
