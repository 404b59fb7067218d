use serde::{Deserialize, Serialize};

/// Declares an integer-backed identifier.
///
/// Every row in the catalog and order tables is keyed by a database-generated
/// integer. Wrapping each key in its own type prevents passing an add-on id
/// where an order id is expected.
macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database key.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw database key.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

integer_id!(
    /// Identifier of an order.
    OrderId
);

integer_id!(
    /// Telegram user id. Customers and managers share this key space.
    UserId
);

integer_id!(
    /// Identifier of a drink card.
    DrinkId
);

integer_id!(
    /// Identifier of a drink category.
    DrinkTypeId
);

integer_id!(
    /// Identifier of a serving size (S, M, L...).
    SizeId
);

integer_id!(
    /// Identifier of a priced drink × size combination.
    DrinkSizeId
);

integer_id!(
    /// Identifier of an add-on.
    AddOnId
);

integer_id!(
    /// Identifier of an ordering session, used to route message edits.
    SessionId
);
