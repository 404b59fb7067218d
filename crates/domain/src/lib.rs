//! Order lifecycle and pricing engine for the café ordering bot.
//!
//! This crate provides:
//! - the [`Order`] aggregate with its pricing rule
//! - the [`LineItemEditor`] for quantity and add-on changes on open orders
//! - the [`StatusAuthority`] deciding which actor may move an order where
//! - the [`SizeCache`] resolving size labels typed by customers
//! - callback [`ActionToken`]s and the [`Notifier`] render contract
//! - the [`Sweeper`] running the periodic expiry and health jobs

pub mod action;
pub mod actor;
pub mod catalog;
pub mod error;
pub mod notify;
pub mod order;
pub mod render;
pub mod size_cache;
pub mod sweeper;
pub mod telemetry;

pub use action::{ActionParseError, ActionToken, QuantityDelta, WaitEstimate};
pub use actor::{Actor, ActorRole};
pub use catalog::Catalog;
pub use error::DomainError;
pub use notify::{
    Button, ChatId, Keyboard, MessageRef, Notifier, NotifyError, RecordingNotifier, RenderRequest,
    SentMessage,
};
pub use order::{
    AddOnPolicy, LineItemEditor, Order, OrderError, OrderView, StatusAuthority, Toggle,
    recompute_price, sanitize_reason,
};
pub use size_cache::SizeCache;
pub use sweeper::{SweepReport, Sweeper};
