//! Bot error types and the user-facing text for domain errors.

use domain::{DomainError, OrderError};
use store::StoreError;
use teloxide::dispatching::dialogue::InMemStorageError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfacing from handlers and startup.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Dialogue storage error: {0}")]
    Dialogue(#[from] InMemStorageError),
}

/// Short text shown to the user when an action fails.
///
/// Internal failures are logged here and replaced by a generic apology; their
/// details never reach the chat.
pub fn user_message(err: &DomainError) -> &'static str {
    match err {
        DomainError::NotFound { entity, .. } => match *entity {
            "order" => "Заказ не найден.",
            "drink_size" => "Этот размер больше недоступен.",
            "add_on" => "Эта добавка больше недоступна.",
            "manager" => "Вы не зарегистрированы как менеджер.",
            "drink" => "Напиток не найден.",
            _ => "Не найдено.",
        },
        DomainError::Order(order_err) => match order_err {
            OrderError::InvalidStateTransition { .. } => {
                "Это действие недоступно для заказа в текущем статусе."
            }
            OrderError::NotOwner { .. } => "Это не ваш заказ.",
            OrderError::Unauthorized { .. } => "Недостаточно прав для этого действия.",
            OrderError::AlreadyClaimed { .. } | OrderError::NotClaimedBy { .. } => {
                "Заказ уже взят другим менеджером."
            }
            OrderError::DrinkSizeInactive { .. } | OrderError::DrinkSizeUnpriced { .. } => {
                "Этот напиток сейчас недоступен."
            }
            OrderError::AddOnNotAllowed { .. } => "Эта добавка недоступна для напитка.",
            OrderError::PaymentMismatch { .. } => {
                tracing::error!(error = %err, "Payment amount differs from order total");
                "Сумма оплаты не совпадает с заказом. Менеджер свяжется с вами."
            }
            OrderError::InvalidQuantity { .. } | OrderError::DrinkSizeMismatch { .. } => {
                tracing::error!(error = %err, "Order rule violated by stored data");
                "Что-то пошло не так, попробуйте позже."
            }
        },
        DomainError::Conflict { .. } => {
            "Заказ уже изменился. Обновите карточку и попробуйте снова."
        }
        DomainError::Malformed(_) => "Не удалось распознать команду, попробуйте ещё раз.",
        DomainError::CatalogInconsistency(_) => {
            tracing::error!(error = %err, "Catalog inconsistency");
            "Напиток временно недоступен."
        }
        DomainError::Store(_) => {
            tracing::error!(error = %err, "Store failure");
            "Что-то пошло не так, попробуйте позже."
        }
    }
}
