//! Row types exchanged with the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AddOnId, DrinkId, DrinkSizeId, DrinkTypeId, Money, OrderId, OrderStatus, SessionId, SizeId,
    UserId,
};

/// Role a user acts under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Customer,
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Manager => "manager",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "customer" => Some(Role::Customer),
            "manager" => Some(Role::Manager),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered Telegram user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub role: Role,
}

impl User {
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
            role,
        }
    }

    /// First name, then username, then the raw id.
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// A drink category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrinkType {
    pub id: DrinkTypeId,
    pub name: String,
}

/// A drink card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drink {
    pub id: DrinkId,
    pub type_id: DrinkTypeId,
    pub type_name: String,
    pub name: String,
    pub description: Option<String>,
    /// Telegram file id of the first active image, if any.
    pub image_file_id: Option<String>,
    pub is_active: bool,
    pub is_draft: bool,
}

/// A serving size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub id: SizeId,
    pub name: String,
    pub volume_ml: i32,
}

/// A priced drink × size combination, denormalized with the names needed to
/// render an order card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrinkSize {
    pub id: DrinkSizeId,
    pub drink_id: DrinkId,
    pub drink_name: String,
    pub size_id: SizeId,
    pub size_name: String,
    pub volume_ml: i32,
    pub price: Money,
    pub is_active: bool,
}

/// An add-on with its fixed price.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddOn {
    pub id: AddOnId,
    pub name: String,
    pub price: Money,
}

/// Pointer to the most recent outbound message of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastAction {
    pub event: String,
    pub chat_id: i64,
    pub message_id: i32,
}

/// An ordering session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    pub last_action: Option<LastAction>,
}

/// Data needed to insert a draft order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub customer_id: UserId,
    pub drink_size_id: DrinkSizeId,
    pub quantity: u32,
    pub total_price: Money,
    pub session_id: Option<SessionId>,
}

/// A persisted order together with its selected add-ons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub customer_id: UserId,
    pub drink_size_id: DrinkSizeId,
    pub status: OrderStatus,
    pub quantity: u32,
    pub total_price: Money,
    /// Selected add-ons, ordered by add-on id.
    pub add_ons: Vec<AddOn>,
    pub manager_id: Option<UserId>,
    pub manager_comment: Option<String>,
    pub decline_reason: Option<String>,
    pub session_id: Option<SessionId>,
    pub is_active: bool,
    /// Incremented by every write; used for optimistic concurrency.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New line-item state written by the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItems {
    pub quantity: u32,
    pub total_price: Money,
    pub add_ons: Vec<AddOnId>,
}

/// Condition on the order's manager checked together with the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerGuard {
    #[default]
    Any,
    /// No manager has claimed the order yet.
    Unclaimed,
    /// The order is claimed by this manager.
    ClaimedBy(UserId),
}

impl ManagerGuard {
    pub fn admits(&self, manager_id: Option<UserId>) -> bool {
        match self {
            ManagerGuard::Any => true,
            ManagerGuard::Unclaimed => manager_id.is_none(),
            ManagerGuard::ClaimedBy(expected) => manager_id == Some(*expected),
        }
    }
}

/// A conditional status update.
///
/// Applied only if the order is active, currently in `from` and satisfies the
/// manager guard. Optional fields overwrite the stored value when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub guard: ManagerGuard,
    pub assign_manager: Option<UserId>,
    pub manager_comment: Option<String>,
    pub decline_reason: Option<String>,
}

impl StatusChange {
    pub fn new(from: OrderStatus, to: OrderStatus) -> Self {
        Self {
            from,
            to,
            guard: ManagerGuard::Any,
            assign_manager: None,
            manager_comment: None,
            decline_reason: None,
        }
    }

    pub fn guard(mut self, guard: ManagerGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn assign_manager(mut self, manager: UserId) -> Self {
        self.assign_manager = Some(manager);
        self
    }

    pub fn manager_comment(mut self, comment: impl Into<String>) -> Self {
        self.manager_comment = Some(comment.into());
        self
    }

    pub fn decline_reason(mut self, reason: impl Into<String>) -> Self {
        self.decline_reason = Some(reason.into());
        self
    }
}
