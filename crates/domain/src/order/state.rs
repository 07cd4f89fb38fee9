//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ──► Confirmed ──► Paid ──► Shipping ──► Delivered
///    │            │          │  │        │            │
///    └────────────┴──────────┘  └────────┴────────────┴──► Refunded
///                 ▼
///             Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, inventory not yet reserved.
    #[default]
    Pending,

    /// Inventory reserved, awaiting payment.
    Confirmed,

    /// Payment captured and stock deducted.
    Paid,

    Shipping,

    Delivered,

    /// Cancelled before shipping (terminal).
    Cancelled,

    /// Money returned to the customer (terminal).
    Refunded,
}

impl OrderStatus {
    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::Confirmed)
    }

    pub fn can_ship(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    pub fn can_deliver(&self) -> bool {
        matches!(self, OrderStatus::Shipping)
    }

    /// Returns true if the order can still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Paid
        )
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Shipping | OrderStatus::Delivered
        )
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipping => "SHIPPING",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(OrderStatus::Pending),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "PAID" => Some(OrderStatus::Paid),
            "SHIPPING" => Some(OrderStatus::Shipping),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "REFUNDED" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Paid,
        OrderStatus::Shipping,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_cancellable_until_shipping() {
        let cancellable: Vec<_> = ALL.iter().filter(|s| s.is_cancellable()).collect();
        assert_eq!(
            cancellable,
            [&OrderStatus::Pending, &OrderStatus::Confirmed, &OrderStatus::Paid]
        );
    }

    #[test]
    fn test_forward_transitions_are_single_step() {
        assert!(OrderStatus::Pending.can_confirm());
        assert!(!OrderStatus::Confirmed.can_confirm());
        assert!(OrderStatus::Confirmed.can_mark_paid());
        assert!(!OrderStatus::Pending.can_mark_paid());
        assert!(OrderStatus::Paid.can_ship());
        assert!(OrderStatus::Shipping.can_deliver());
        assert!(!OrderStatus::Paid.can_deliver());
    }

    #[test]
    fn test_terminal_statuses() {
        for status in ALL {
            assert_eq!(
                status.is_terminal(),
                matches!(status, OrderStatus::Cancelled | OrderStatus::Refunded)
            );
        }
    }

    #[test]
    fn test_wire_names() {
        for status in ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(
            serde_json::to_string(&OrderStatus::Confirmed).unwrap(),
            "\"CONFIRMED\""
        );
        assert_eq!(OrderStatus::parse("Draft"), None);
    }
}
