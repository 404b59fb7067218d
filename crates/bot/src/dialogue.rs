//! Decline-reason conversation.
//!
//! Tapping a decline control does not decline right away: the bot asks for a
//! reason and the next text message in that chat completes the decline.

use domain::RenderRequest;
use serde::{Deserialize, Serialize};
use store::{OrderId, OrderStatus};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

/// The order a decline is waiting on, with the status the control showed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclineTarget {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclineState {
    #[default]
    Idle,
    AwaitingReason {
        target: DeclineTarget,
    },
}

pub type DeclineDialogue = Dialogue<DeclineState, InMemStorage<DeclineState>>;

/// Reply that skips the reason.
const SKIP: &str = "-";

pub fn reason_prompt(target: DeclineTarget) -> RenderRequest {
    RenderRequest::text(format!(
        "✍️ Укажите причину отмены заказа #{} одним сообщением.\nОтправьте «{SKIP}», чтобы не указывать причину, или /cancel, чтобы вернуться.",
        target.order_id
    ))
}

/// The reason as typed, with the skip marker meaning none.
pub fn reason_from_reply(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed == SKIP { "" } else { trimmed }
}
