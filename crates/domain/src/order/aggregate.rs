//! The Order aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{RequesterId, ResourceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Money, OrderError, OrderItem, OrderStatus, ShippingAddress};

/// An order placed by a requester.
///
/// Created `Pending` by the order service; afterwards mutated only by the
/// fulfillment saga and explicit cancel requests. Orders are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub(crate) id: Uuid,
    /// Human-readable, unique; the saga correlation key.
    pub(crate) order_number: String,
    pub(crate) requester_id: RequesterId,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) total_amount: Money,
    pub(crate) discount_amount: Money,
    pub(crate) shipping_address: ShippingAddress,
    pub(crate) status: OrderStatus,
    pub(crate) cancel_reason: Option<String>,
    pub(crate) cancelled_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

/// Builds an order number of the form `ORD-YYYYMMDD-XXXXXXXX`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{suffix}", now.format("%Y%m%d"))
}

impl Order {
    /// Creates a `Pending` order.
    ///
    /// Every line needs a positive quantity and a non-negative price, and the
    /// totals must fit their integer types.
    pub fn new(
        requester_id: RequesterId,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut total = Money::zero();
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.clone(),
                    price: item.unit_price.cents(),
                });
            }
            total = item
                .subtotal()
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or(OrderError::AmountOverflow)?;
        }
        Self::sum_lines(&items)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            order_number: generate_order_number(now),
            requester_id,
            items,
            total_amount: total,
            discount_amount: Money::zero(),
            shipping_address,
            status: OrderStatus::Pending,
            cancel_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn sum_lines(items: &[OrderItem]) -> Result<BTreeMap<ResourceId, u32>, OrderError> {
        let mut lines = BTreeMap::new();
        for item in items {
            let quantity: &mut u32 = lines.entry(item.product_id.clone()).or_default();
            *quantity = quantity
                .checked_add(item.quantity)
                .ok_or(OrderError::AmountOverflow)?;
        }
        Ok(lines)
    }

    // Queries

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn requester_id(&self) -> &RequesterId {
        &self.requester_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn discount_amount(&self) -> Money {
        self.discount_amount
    }

    /// `max(total - discount, 0)`.
    pub fn final_amount(&self) -> Money {
        self.total_amount
            .saturating_sub_floor_zero(self.discount_amount)
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Quantities per product, with repeated products summed.
    pub fn ledger_lines(&self) -> BTreeMap<ResourceId, u32> {
        let mut lines = BTreeMap::new();
        for item in &self.items {
            let quantity: &mut u32 = lines.entry(item.product_id.clone()).or_default();
            *quantity = quantity.saturating_add(item.quantity);
        }
        lines
    }

    // Transitions

    /// Applies a coupon discount. Only pending orders can be discounted.
    pub fn apply_discount(&mut self, discount: Money) -> Result<(), OrderError> {
        if discount.is_negative() {
            return Err(OrderError::InvalidDiscount(discount.cents()));
        }
        self.ensure(self.status == OrderStatus::Pending, "apply discount")?;
        self.discount_amount = discount;
        self.touch();
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), OrderError> {
        self.ensure(self.status.can_confirm(), "confirm")?;
        self.status = OrderStatus::Confirmed;
        self.touch();
        Ok(())
    }

    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        self.ensure(self.status.can_mark_paid(), "mark paid")?;
        self.status = OrderStatus::Paid;
        self.touch();
        Ok(())
    }

    /// Data model only: no saga step or endpoint moves an order to
    /// `Shipping`.
    pub fn ship(&mut self) -> Result<(), OrderError> {
        self.ensure(self.status.can_ship(), "ship")?;
        self.status = OrderStatus::Shipping;
        self.touch();
        Ok(())
    }

    /// Data model only, like [`ship`](Self::ship).
    pub fn deliver(&mut self) -> Result<(), OrderError> {
        self.ensure(self.status.can_deliver(), "deliver")?;
        self.status = OrderStatus::Delivered;
        self.touch();
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.ensure(self.status.is_cancellable(), "cancel")?;
        let now = Utc::now();
        self.status = OrderStatus::Cancelled;
        self.cancel_reason = Some(reason.into());
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Data model only, like [`ship`](Self::ship). Cancellation after payment
    /// goes through [`cancel`](Self::cancel).
    pub fn refund(&mut self) -> Result<(), OrderError> {
        self.ensure(self.status.is_refundable(), "refund")?;
        self.status = OrderStatus::Refunded;
        self.touch();
        Ok(())
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if allowed {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(items: Vec<OrderItem>) -> Order {
        Order::new(RequesterId::new("user-1"), items, ShippingAddress::default()).unwrap()
    }

    fn widget(sku: &str, quantity: u32, cents: i64) -> OrderItem {
        OrderItem::new(sku, "Widget", quantity, Money::from_cents(cents))
    }

    #[test]
    fn test_order_number_format() {
        let now = DateTime::parse_from_rfc3339("2024-03-09T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let number = generate_order_number(now);

        assert!(number.starts_with("ORD-20240309-"));
        let suffix = &number["ORD-20240309-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_new_order_is_pending_with_totals() {
        let order = order(vec![widget("SKU-1", 2, 1000), widget("SKU-2", 1, 500)]);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total_amount(), Money::from_cents(2500));
        assert_eq!(order.final_amount(), Money::from_cents(2500));
        assert_eq!(order.total_quantity(), 3);
    }

    #[test]
    fn test_rejects_invalid_lines() {
        let requester = RequesterId::new("user-1");
        let address = ShippingAddress::default();

        assert!(matches!(
            Order::new(requester.clone(), vec![], address.clone()),
            Err(OrderError::NoItems)
        ));
        assert!(matches!(
            Order::new(requester.clone(), vec![widget("SKU-1", 0, 100)], address.clone()),
            Err(OrderError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            Order::new(requester.clone(), vec![widget("SKU-1", 1, -1)], address.clone()),
            Err(OrderError::InvalidPrice { .. })
        ));
        assert!(matches!(
            Order::new(requester, vec![widget("SKU-1", 2, i64::MAX)], address),
            Err(OrderError::AmountOverflow)
        ));
    }

    #[test]
    fn test_ledger_lines_sum_repeated_products() {
        let order = order(vec![
            widget("SKU-2", 1, 100),
            widget("SKU-1", 2, 100),
            widget("SKU-2", 3, 100),
        ]);
        let lines: Vec<_> = order.ledger_lines().into_iter().collect();
        assert_eq!(
            lines,
            vec![(ResourceId::new("SKU-1"), 2), (ResourceId::new("SKU-2"), 4)]
        );
    }

    #[test]
    fn test_discount_floors_final_amount_at_zero() {
        let mut order = order(vec![widget("SKU-1", 1, 1000)]);
        order.apply_discount(Money::from_cents(1500)).unwrap();
        assert_eq!(order.final_amount(), Money::zero());

        assert!(matches!(
            order.apply_discount(Money::from_cents(-1)),
            Err(OrderError::InvalidDiscount(-1))
        ));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = order(vec![widget("SKU-1", 1, 1000)]);
        order.confirm().unwrap();
        order.mark_paid().unwrap();
        order.ship().unwrap();
        order.deliver().unwrap();
        assert_eq!(order.status(), OrderStatus::Delivered);
        order.refund().unwrap();
        assert_eq!(order.status(), OrderStatus::Refunded);
    }

    #[test]
    fn test_invalid_transition_reports_current_state() {
        let mut order = order(vec![widget("SKU-1", 1, 1000)]);
        let err = order.mark_paid().unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidStateTransition {
                current_state: OrderStatus::Pending,
                action: "mark paid"
            }
        ));
    }

    #[test]
    fn test_cancel_records_reason() {
        let mut order = order(vec![widget("SKU-1", 1, 1000)]);
        order.confirm().unwrap();
        order.cancel("changed my mind").unwrap();

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancel_reason(), Some("changed my mind"));
        assert!(order.cancelled_at().is_some());
        assert!(order.cancel("again").is_err());
    }

    #[test]
    fn test_cannot_cancel_after_shipping() {
        let mut order = order(vec![widget("SKU-1", 1, 1000)]);
        order.confirm().unwrap();
        order.mark_paid().unwrap();
        order.ship().unwrap();
        assert!(matches!(
            order.cancel("too late"),
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_refund_requires_payment() {
        let mut order = order(vec![widget("SKU-1", 1, 1000)]);
        order.confirm().unwrap();
        assert!(matches!(
            order.refund(),
            Err(OrderError::InvalidStateTransition {
                current_state: OrderStatus::Confirmed,
                action: "refund"
            })
        ));

        order.mark_paid().unwrap();
        order.refund().unwrap();
        assert_eq!(order.status(), OrderStatus::Refunded);
        assert!(order.ship().is_err());
    }
}
