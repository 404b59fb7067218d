//! Update routing: commands, button taps, decline reasons and payments.

use std::sync::Arc;

use domain::{ActionToken, ChatId, MessageRef, Notifier, RenderRequest};
use store::{PostgresStore, Role, User, UserId};
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use teloxide::types::{LabeledPrice, PreCheckoutQuery, SuccessfulPayment};
use teloxide::utils::command::BotCommands;

use crate::actions::{self, PaymentMode, Reply, Services};
use crate::dialogue::{
    DeclineDialogue, DeclineState, DeclineTarget, reason_from_reply, reason_prompt,
};
use crate::error::{BotError, user_message};
use crate::telegram::TelegramNotifier;

/// Services shared by every handler.
pub type App = Arc<Services<PostgresStore, TelegramNotifier>>;

type HandlerResult = Result<(), BotError>;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "меню напитков")]
    Start,
    #[command(description = "показать команды")]
    Help,
    #[command(description = "заказать напиток: /order <id> <размер>", parse_with = "split")]
    Order { drink_id: i64, size: String },
    #[command(description = "последний заказ")]
    Last,
    #[command(description = "не указывать причину отмены")]
    Cancel,
}

/// Builds the update handler tree.
pub fn schema() -> UpdateHandler<BotError> {
    use dptree::case;

    let commands = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(on_start))
        .branch(case![Command::Help].endpoint(on_help))
        .branch(case![Command::Order { drink_id, size }].endpoint(on_order))
        .branch(case![Command::Last].endpoint(on_last))
        .branch(case![Command::Cancel].endpoint(on_cancel));

    let messages = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<DeclineState>, DeclineState>()
        .branch(
            dptree::filter_map(|msg: Message| msg.successful_payment().cloned())
                .endpoint(on_payment),
        )
        .branch(commands)
        .branch(case![DeclineState::AwaitingReason { target }].endpoint(on_reason));

    let callbacks = Update::filter_callback_query()
        .enter_dialogue::<CallbackQuery, InMemStorage<DeclineState>, DeclineState>()
        .endpoint(on_callback);

    dptree::entry()
        .branch(messages)
        .branch(callbacks)
        .branch(Update::filter_pre_checkout_query().endpoint(on_pre_checkout))
}

/// The store's view of a Telegram account. Roles are assigned in the
/// database; new accounts start as customers.
pub fn store_user(user: &teloxide::types::User) -> User {
    User {
        id: UserId::new(user.id.0 as i64),
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()),
        role: Role::Customer,
    }
}

fn chat_of(msg: &Message) -> ChatId {
    ChatId(msg.chat.id.0)
}

async fn sender(app: &App, msg: &Message) -> Result<Option<User>, BotError> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(None);
    };
    match actions::resolve_user(app, store_user(from)).await {
        Ok(user) => Ok(Some(user)),
        Err(e) => {
            say(app, chat_of(msg), user_message(&e)).await;
            Ok(None)
        }
    }
}

async fn on_start(app: App, msg: Message) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let result = actions::start(&app, store_user(from)).await;
    finish(&app, chat_of(&msg), None, result, None).await
}

async fn on_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

async fn on_order(app: App, msg: Message, (drink_id, size): (i64, String)) -> HandlerResult {
    let Some(user) = sender(&app, &msg).await? else {
        return Ok(());
    };
    let result = actions::order_by_name(&app, &user, drink_id, &size).await;
    finish(&app, chat_of(&msg), None, result, None).await
}

async fn on_last(app: App, msg: Message) -> HandlerResult {
    let Some(user) = sender(&app, &msg).await? else {
        return Ok(());
    };
    let result = actions::last_order(&app, &user).await;
    finish(&app, chat_of(&msg), None, result, None).await
}

async fn on_cancel(app: App, msg: Message, dialogue: DeclineDialogue) -> HandlerResult {
    let waiting = matches!(dialogue.get().await?, Some(DeclineState::AwaitingReason { .. }));
    dialogue.exit().await?;
    let text = if waiting {
        "Отмена заказа прервана."
    } else {
        "Нечего отменять."
    };
    say(&app, chat_of(&msg), text).await;
    Ok(())
}

async fn on_reason(
    app: App,
    msg: Message,
    dialogue: DeclineDialogue,
    target: DeclineTarget,
) -> HandlerResult {
    let Some(text) = msg.text() else {
        send(&app, chat_of(&msg), reason_prompt(target)).await;
        return Ok(());
    };
    let Some(user) = sender(&app, &msg).await? else {
        return Ok(());
    };

    dialogue.exit().await?;
    let result = actions::decline(&app, &user, target, reason_from_reply(text)).await;
    finish(&app, chat_of(&msg), None, result, None).await
}

async fn on_callback(
    bot: Bot,
    q: CallbackQuery,
    app: App,
    dialogue: DeclineDialogue,
) -> HandlerResult {
    let origin = q
        .message
        .as_ref()
        .map(|m| MessageRef::new(ChatId(m.chat().id.0), m.id().0));
    let chat = origin.map_or(ChatId(q.from.id.0 as i64), |o| o.chat);

    let token = q
        .data
        .as_deref()
        .unwrap_or_default()
        .parse::<ActionToken>()
        .map_err(domain::DomainError::from);
    tracing::debug!(user_id = %q.from.id, data = ?q.data, "Callback received");

    let result = match token {
        Ok(token) => match actions::resolve_user(&app, store_user(&q.from)).await {
            Ok(user) => actions::handle_action(&app, &user, token, origin).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    match &result {
        Ok(reply) => {
            let mut answer = bot.answer_callback_query(q.id.clone());
            if let Some(toast) = &reply.toast {
                answer = answer.text(toast.clone());
            }
            answer.await?;
        }
        Err(e) => {
            bot.answer_callback_query(q.id.clone())
                .text(user_message(e))
                .show_alert(true)
                .await?;
            return Ok(());
        }
    }
    finish(&app, chat, origin, result, Some(&dialogue)).await
}

async fn on_pre_checkout(bot: Bot, q: PreCheckoutQuery, app: App) -> HandlerResult {
    let ok = actions::can_pay(&app, &q.invoice_payload, q.total_amount).await;
    let answer = bot.answer_pre_checkout_query(q.id.clone(), ok);
    if ok {
        answer.await?;
    } else {
        tracing::warn!(
            payload = %q.invoice_payload,
            amount = q.total_amount,
            "Rejecting checkout for an order that moved on or changed price"
        );
        answer
            .error_message("Заказ больше нельзя оплатить.")
            .await?;
    }
    Ok(())
}

async fn on_payment(app: App, msg: Message, payment: SuccessfulPayment) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    tracing::info!(
        user_id = %from.id,
        amount = payment.total_amount,
        currency = %payment.currency,
        "Payment received"
    );
    let payer = UserId::new(from.id.0 as i64);
    let result =
        actions::payment_received(&app, payer, &payment.invoice_payload, payment.total_amount)
            .await;
    finish(&app, chat_of(&msg), None, result, None).await
}

/// Shows a handler's outcome in `chat`.
async fn finish(
    app: &App,
    chat: ChatId,
    origin: Option<MessageRef>,
    result: Result<Reply, domain::DomainError>,
    dialogue: Option<&DeclineDialogue>,
) -> HandlerResult {
    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            tracing::info!(%chat, error = %e, "Action rejected");
            say(app, chat, user_message(&e)).await;
            return Ok(());
        }
    };

    if let Some(request) = reply.edit_origin {
        match origin {
            Some(origin) => {
                if let Err(e) = app.authority.notifier().edit(origin, request.clone()).await {
                    tracing::warn!(%chat, error = %e, "Could not edit message, sending a new one");
                    send(app, chat, request).await;
                }
            }
            None => {
                send(app, chat, request).await;
            }
        }
    }

    for request in reply.send {
        send(app, chat, request).await;
    }

    if let Some(view) = reply.card {
        if let Some(sent) = send(app, chat, view.render()).await {
            if let Some(session) = view.order.session_id() {
                if let Err(e) = app.editor.remember_card(session, sent).await {
                    tracing::warn!(
                        order_id = %view.order.id(),
                        error = %e,
                        "Could not remember order card"
                    );
                }
            }
        }
    }

    if let Some(target) = reply.ask_reason {
        if let Some(dialogue) = dialogue {
            dialogue
                .update(DeclineState::AwaitingReason { target })
                .await?;
            send(app, chat, reason_prompt(target)).await;
        }
    }

    if let Some(order) = reply.invoice {
        if let PaymentMode::Invoice { provider_token } = &app.payments {
            send_invoice(app, chat, &order, provider_token).await?;
        }
    }
    Ok(())
}

async fn send_invoice(
    app: &App,
    chat: ChatId,
    order: &domain::Order,
    provider_token: &str,
) -> HandlerResult {
    let Some(amount) = order.total_price().to_minor_units() else {
        tracing::error!(
            order_id = %order.id(),
            total = %order.total_price(),
            "Total does not fit an invoice"
        );
        say(app, chat, "Не удалось выставить счёт, попробуйте позже.").await;
        return Ok(());
    };
    let drink = &order.drink_size().drink_name;
    let title = format!("Заказ #{}", order.id());
    let description = format!("{drink} {} × {}", order.drink_size().size_name, order.quantity());

    app.authority
        .notifier()
        .bot()
        .send_invoice(
            teloxide::types::ChatId(chat.0),
            title,
            description,
            actions::invoice_payload(order.id()),
            "RUB",
            [LabeledPrice::new(drink.clone(), amount)],
        )
        .provider_token(provider_token.to_string())
        .await?;
    Ok(())
}

async fn send(app: &App, chat: ChatId, request: RenderRequest) -> Option<MessageRef> {
    match app.authority.notifier().send(chat, request).await {
        Ok(sent) => Some(sent),
        Err(e) => {
            tracing::warn!(%chat, error = %e, "Could not send message");
            metrics::counter!("notification_failures_total", "kind" => "reply").increment(1);
            None
        }
    }
}

async fn say(app: &App, chat: ChatId, text: &str) {
    send(app, chat, RenderRequest::text(text)).await;
}
