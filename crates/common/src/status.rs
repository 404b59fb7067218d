//! Order status codes.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// The numeric codes are stored in the `orders.status_id` column and carried
/// inside callback tokens, so they must never be renumbered. They do not
/// follow the lifecycle order: `Draft` was added last and got code 8.
///
/// ```text
/// Draft ──► Created ──► Paid ──► Processing ──► Ready ──► Received
///              │          │          │
///              ├──────────┴──────────┴──► Declined
///              └──────────┴──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Checked out, waiting for payment.
    Created,

    /// Payment confirmed, waiting for a manager.
    Paid,

    /// Claimed by a manager and being prepared.
    Processing,

    /// Ready for pickup.
    Ready,

    /// Picked up by the customer (terminal).
    Received,

    /// Declined by the customer or a manager (terminal).
    Declined,

    /// Expired by the sweeper (terminal).
    Expired,

    /// Cart being configured by the customer.
    #[default]
    Draft,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Created,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Ready,
        OrderStatus::Received,
        OrderStatus::Declined,
        OrderStatus::Expired,
        OrderStatus::Draft,
    ];

    /// Returns the persisted numeric code.
    pub const fn code(&self) -> i16 {
        match self {
            OrderStatus::Created => 1,
            OrderStatus::Paid => 2,
            OrderStatus::Processing => 3,
            OrderStatus::Ready => 4,
            OrderStatus::Received => 5,
            OrderStatus::Declined => 6,
            OrderStatus::Expired => 7,
            OrderStatus::Draft => 8,
        }
    }

    /// Looks a status up by its persisted code.
    ///
    /// Codes 9 and above are reserved and map to `None`.
    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Returns true if line items (quantity, add-ons) can still change.
    ///
    /// Only drafts qualify: checkout fixes the amount the customer is asked
    /// to pay.
    pub fn can_edit_items(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    pub fn can_check_out(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    pub fn can_confirm_payment(&self) -> bool {
        matches!(self, OrderStatus::Created)
    }

    pub fn can_claim(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    pub fn can_mark_ready(&self) -> bool {
        matches!(self, OrderStatus::Processing)
    }

    pub fn can_mark_received(&self) -> bool {
        matches!(self, OrderStatus::Ready)
    }

    /// Returns true if the order may still be declined.
    ///
    /// Ready orders are already prepared and drafts are simply abandoned, so
    /// neither can be declined.
    pub fn can_decline(&self) -> bool {
        matches!(
            self,
            OrderStatus::Created | OrderStatus::Paid | OrderStatus::Processing
        )
    }

    /// Returns true if the sweeper may expire an order in this status.
    pub fn can_expire(&self) -> bool {
        matches!(self, OrderStatus::Created | OrderStatus::Paid)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Received | OrderStatus::Declined | OrderStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Ready => "ready",
            OrderStatus::Received => "received",
            OrderStatus::Declined => "declined",
            OrderStatus::Expired => "expired",
            OrderStatus::Draft => "draft",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
