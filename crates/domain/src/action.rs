//! Callback action tokens.
//!
//! Every inline button carries one of these as its callback data. The textual
//! forms are stable: messages sent weeks ago still carry old tokens, so a
//! change here must stay backwards compatible.

use std::fmt;
use std::str::FromStr;

use store::{AddOnId, DrinkId, DrinkSizeId, DrinkTypeId, OrderId, OrderStatus};
use thiserror::Error;

/// Direction of a quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantityDelta {
    Increment,
    Decrement,
}

impl QuantityDelta {
    fn symbol(&self) -> &'static str {
        match self {
            QuantityDelta::Increment => "+",
            QuantityDelta::Decrement => "-",
        }
    }
}

/// Wait time a manager promises when taking an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitEstimate {
    Minutes(u32),
    /// More than ten minutes.
    TenPlus,
}

impl WaitEstimate {
    /// The choices offered on the manager card.
    pub const OFFERED: [WaitEstimate; 3] = [
        WaitEstimate::Minutes(5),
        WaitEstimate::Minutes(10),
        WaitEstimate::TenPlus,
    ];

    /// Comment stored on the order and sent to the customer.
    pub fn comment(&self) -> String {
        match self {
            WaitEstimate::Minutes(m) => format!("Время ожидания вашего заказа - {m} мин."),
            WaitEstimate::TenPlus => "Время ожидания вашего заказа - более 10 мин.".to_string(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            WaitEstimate::Minutes(m) => format!("{m} мин"),
            WaitEstimate::TenPlus => "10+ мин".to_string(),
        }
    }
}

impl fmt::Display for WaitEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitEstimate::Minutes(m) => write!(f, "{m}"),
            WaitEstimate::TenPlus => f.write_str("10plus"),
        }
    }
}

/// An action requested by tapping an inline button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionToken {
    /// `update_qty_{+|-}_{order_id}`
    UpdateQuantity {
        delta: QuantityDelta,
        order_id: OrderId,
    },
    /// `toggle_add_{add_on_id}_{order_id}`
    ToggleAddOn { add_on_id: AddOnId, order_id: OrderId },
    /// `take_{order_id}_{minutes|10plus}`
    Take { order_id: OrderId, wait: WaitEstimate },
    /// `order_ready_{order_id}`
    OrderReady(OrderId),
    /// `order_received_{order_id}`
    OrderReceived(OrderId),
    /// `confirm_coffee_{drink_id}`
    ConfirmCoffee(DrinkId),
    /// `redo_coffee_{drink_id}`
    RedoCoffee(DrinkId),
    /// `decline_{status_id}_{order_id}`, where the status is the one the
    /// order was in when the control was rendered.
    Decline {
        status: OrderStatus,
        order_id: OrderId,
    },
    /// `confirm_{status_id}_{order_id}`
    Confirm {
        status: OrderStatus,
        order_id: OrderId,
    },
    /// `drink_type_{type_id}`
    DrinkType(DrinkTypeId),
    /// `select_size_{drink_size_id}`
    SelectSize(DrinkSizeId),
    /// `pay_{order_id}`
    Pay(OrderId),
    NewOrder,
    /// Inert button, e.g. the quantity display.
    Noop,
}

/// Errors parsing a callback token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionParseError {
    #[error("unknown action: {0}")]
    Unknown(String),

    #[error("invalid id {value:?} in action {token:?}")]
    InvalidId { token: String, value: String },

    #[error("unknown status code {0:?}")]
    InvalidStatus(String),

    #[error("invalid quantity delta {0:?}")]
    InvalidDelta(String),

    #[error("invalid wait estimate {0:?}")]
    InvalidWait(String),
}

fn parse_id<T: From<i64>>(token: &str, value: &str) -> Result<T, ActionParseError> {
    value
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(T::from)
        .ok_or_else(|| ActionParseError::InvalidId {
            token: token.to_string(),
            value: value.to_string(),
        })
}

fn parse_status(value: &str) -> Result<OrderStatus, ActionParseError> {
    value
        .parse::<i16>()
        .ok()
        .and_then(OrderStatus::from_code)
        .ok_or_else(|| ActionParseError::InvalidStatus(value.to_string()))
}

/// Splits `"{a}_{b}"` into its two parts. Neither part may contain `_`.
fn pair<'a>(token: &str, rest: &'a str) -> Result<(&'a str, &'a str), ActionParseError> {
    match rest.split_once('_') {
        Some((a, b)) if !a.is_empty() && !b.is_empty() && !b.contains('_') => Ok((a, b)),
        _ => Err(ActionParseError::Unknown(token.to_string())),
    }
}

impl FromStr for ActionToken {
    type Err = ActionParseError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "new_order" => return Ok(ActionToken::NewOrder),
            "noop" => return Ok(ActionToken::Noop),
            _ => {}
        }

        // Longer prefixes first: `confirm_coffee_` must win over `confirm_`.
        if let Some(rest) = token.strip_prefix("update_qty_") {
            let (delta, order) = pair(token, rest)?;
            let delta = match delta {
                "+" => QuantityDelta::Increment,
                "-" => QuantityDelta::Decrement,
                other => return Err(ActionParseError::InvalidDelta(other.to_string())),
            };
            return Ok(ActionToken::UpdateQuantity {
                delta,
                order_id: parse_id(token, order)?,
            });
        }
        if let Some(rest) = token.strip_prefix("toggle_add_") {
            let (add_on, order) = pair(token, rest)?;
            return Ok(ActionToken::ToggleAddOn {
                add_on_id: parse_id(token, add_on)?,
                order_id: parse_id(token, order)?,
            });
        }
        if let Some(rest) = token.strip_prefix("take_") {
            let (order, wait) = pair(token, rest)?;
            let wait = match wait {
                "10plus" => WaitEstimate::TenPlus,
                minutes => minutes
                    .parse::<u32>()
                    .ok()
                    .filter(|m| *m > 0)
                    .map(WaitEstimate::Minutes)
                    .ok_or_else(|| ActionParseError::InvalidWait(minutes.to_string()))?,
            };
            return Ok(ActionToken::Take {
                order_id: parse_id(token, order)?,
                wait,
            });
        }
        if let Some(rest) = token.strip_prefix("order_ready_") {
            return Ok(ActionToken::OrderReady(parse_id(token, rest)?));
        }
        if let Some(rest) = token.strip_prefix("order_received_") {
            return Ok(ActionToken::OrderReceived(parse_id(token, rest)?));
        }
        if let Some(rest) = token.strip_prefix("confirm_coffee_") {
            return Ok(ActionToken::ConfirmCoffee(parse_id(token, rest)?));
        }
        if let Some(rest) = token.strip_prefix("redo_coffee_") {
            return Ok(ActionToken::RedoCoffee(parse_id(token, rest)?));
        }
        if let Some(rest) = token.strip_prefix("decline_") {
            let (status, order) = pair(token, rest)?;
            return Ok(ActionToken::Decline {
                status: parse_status(status)?,
                order_id: parse_id(token, order)?,
            });
        }
        if let Some(rest) = token.strip_prefix("confirm_") {
            let (status, order) = pair(token, rest)?;
            return Ok(ActionToken::Confirm {
                status: parse_status(status)?,
                order_id: parse_id(token, order)?,
            });
        }
        if let Some(rest) = token.strip_prefix("drink_type_") {
            return Ok(ActionToken::DrinkType(parse_id(token, rest)?));
        }
        if let Some(rest) = token.strip_prefix("select_size_") {
            return Ok(ActionToken::SelectSize(parse_id(token, rest)?));
        }
        if let Some(rest) = token.strip_prefix("pay_") {
            return Ok(ActionToken::Pay(parse_id(token, rest)?));
        }

        Err(ActionParseError::Unknown(token.to_string()))
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionToken::UpdateQuantity { delta, order_id } => {
                write!(f, "update_qty_{}_{order_id}", delta.symbol())
            }
            ActionToken::ToggleAddOn {
                add_on_id,
                order_id,
            } => write!(f, "toggle_add_{add_on_id}_{order_id}"),
            ActionToken::Take { order_id, wait } => write!(f, "take_{order_id}_{wait}"),
            ActionToken::OrderReady(id) => write!(f, "order_ready_{id}"),
            ActionToken::OrderReceived(id) => write!(f, "order_received_{id}"),
            ActionToken::ConfirmCoffee(id) => write!(f, "confirm_coffee_{id}"),
            ActionToken::RedoCoffee(id) => write!(f, "redo_coffee_{id}"),
            ActionToken::Decline { status, order_id } => {
                write!(f, "decline_{}_{order_id}", status.code())
            }
            ActionToken::Confirm { status, order_id } => {
                write!(f, "confirm_{}_{order_id}", status.code())
            }
            ActionToken::DrinkType(id) => write!(f, "drink_type_{id}"),
            ActionToken::SelectSize(id) => write!(f, "select_size_{id}"),
            ActionToken::Pay(id) => write!(f, "pay_{id}"),
            ActionToken::NewOrder => f.write_str("new_order"),
            ActionToken::Noop => f.write_str("noop"),
        }
    }
}
