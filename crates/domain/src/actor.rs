//! Who is performing an action.

use serde::{Deserialize, Serialize};
use store::{Role, User, UserId};

/// The capacity an action is performed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Manager,
    /// The payment collaborator confirming a charge.
    Payment,
    /// The periodic sweeper.
    Scheduler,
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Customer => "customer",
            ActorRole::Manager => "manager",
            ActorRole::Payment => "payment",
            ActorRole::Scheduler => "scheduler",
            ActorRole::System => "system",
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identified actor. Every operation receives one explicitly.
///
/// Non-human actors carry the id of the user whose event triggered them, or
/// zero for scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: ActorRole,
}

impl Actor {
    pub fn customer(id: UserId) -> Self {
        Self {
            id,
            role: ActorRole::Customer,
        }
    }

    pub fn manager(id: UserId) -> Self {
        Self {
            id,
            role: ActorRole::Manager,
        }
    }

    pub fn payment(payer: UserId) -> Self {
        Self {
            id: payer,
            role: ActorRole::Payment,
        }
    }

    pub fn scheduler() -> Self {
        Self {
            id: UserId::new(0),
            role: ActorRole::Scheduler,
        }
    }

    pub fn system() -> Self {
        Self {
            id: UserId::new(0),
            role: ActorRole::System,
        }
    }

    /// Acts as the given user in the capacity of their stored role.
    pub fn for_user(user: &User) -> Self {
        match user.role {
            Role::Manager => Self::manager(user.id),
            Role::Customer => Self::customer(user.id),
        }
    }

    pub fn is(&self, role: ActorRole) -> bool {
        self.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_follows_stored_role() {
        let manager = User::new(UserId::new(7), Role::Manager);
        assert_eq!(Actor::for_user(&manager), Actor::manager(UserId::new(7)));

        let customer = User::new(UserId::new(8), Role::Customer);
        assert!(Actor::for_user(&customer).is(ActorRole::Customer));
    }
}
