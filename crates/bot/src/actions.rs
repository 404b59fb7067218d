//! Routes inbound actions to the domain services.
//!
//! Nothing here talks to Telegram directly: each handler returns a [`Reply`]
//! describing what the chat should see, and the dispatcher applies it.

use std::sync::Arc;

use domain::{
    ActionToken, Actor, AddOnPolicy, Catalog, ChatId, DomainError, Keyboard, LineItemEditor,
    MessageRef, Notifier, Order, OrderError, OrderView, RenderRequest, SizeCache, StatusAuthority,
    render,
};
use store::{DrinkId, OrderId, OrderStatus, OrderStoreExt, Store, User, UserId};

use crate::dialogue::DeclineTarget;

/// How `created` orders get paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMode {
    /// Telegram payments through this provider; a successful payment
    /// confirms the order.
    Invoice { provider_token: String },
    /// Payment at the counter; a manager confirms it.
    Counter,
}

/// The domain services the handlers work with.
pub struct Services<S, N> {
    pub store: S,
    pub editor: LineItemEditor<S>,
    pub authority: Arc<StatusAuthority<S, N>>,
    pub catalog: Catalog<S>,
    pub payments: PaymentMode,
}

impl<S: Store + Clone, N: Notifier> Services<S, N> {
    pub fn new(
        store: S,
        notifier: N,
        manager_chat: ChatId,
        sizes: Arc<SizeCache>,
        policy: AddOnPolicy,
        payments: PaymentMode,
    ) -> Self {
        Self {
            editor: LineItemEditor::new(store.clone(), sizes).with_policy(policy),
            authority: Arc::new(StatusAuthority::new(store.clone(), notifier, manager_chat)),
            catalog: Catalog::new(store.clone()),
            store,
            payments,
        }
    }
}

/// What to show in response to an action.
#[derive(Debug, Default)]
pub struct Reply {
    /// Replaces the message carrying the tapped control.
    pub edit_origin: Option<RenderRequest>,
    /// New messages for the actor's chat.
    pub send: Vec<RenderRequest>,
    /// An order card to send and remember on the order's session.
    pub card: Option<OrderView>,
    /// Popup text answering the button tap.
    pub toast: Option<String>,
    /// Ask for a decline reason before declining.
    pub ask_reason: Option<DeclineTarget>,
    /// Send a payment invoice for this order.
    pub invoice: Option<Order>,
}

impl Reply {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn toast(text: impl Into<String>) -> Self {
        Self {
            toast: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn message(message: RenderRequest) -> Self {
        Self {
            send: vec![message],
            ..Self::default()
        }
    }

    pub fn card(view: OrderView) -> Self {
        Self {
            card: Some(view),
            ..Self::default()
        }
    }
}

/// Handles a tapped inline button.
///
/// `origin` is the message the button was on, if Telegram still has it.
pub async fn handle_action<S, N>(
    services: &Services<S, N>,
    user: &User,
    token: ActionToken,
    origin: Option<MessageRef>,
) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let customer = Actor::customer(user.id);
    let manager = Actor::manager(user.id);

    match token {
        ActionToken::UpdateQuantity { delta, order_id } => {
            let view = services
                .editor
                .change_quantity(customer, order_id, delta)
                .await?;
            refresh_card(services, view, origin).await
        }
        ActionToken::ToggleAddOn {
            add_on_id,
            order_id,
        } => {
            let view = services
                .editor
                .toggle_add_on(customer, order_id, add_on_id)
                .await?;
            refresh_card(services, view, origin).await
        }
        ActionToken::Take { order_id, wait } => {
            services.authority.claim(manager, order_id, wait).await?;
            Ok(Reply::toast(format!("Заказ #{order_id} взят в работу")))
        }
        ActionToken::OrderReady(order_id) => {
            services.authority.mark_ready(manager, order_id).await?;
            Ok(Reply::toast(format!("Заказ #{order_id} готов к выдаче")))
        }
        ActionToken::OrderReceived(order_id) => {
            services
                .authority
                .mark_received(customer, order_id, origin)
                .await?;
            Ok(Reply::none())
        }
        ActionToken::ConfirmCoffee(drink_id) => {
            let drink = services.catalog.publish(manager, drink_id).await?;
            Ok(Reply {
                edit_origin: Some(published_card(services, drink_id).await?),
                toast: Some(format!("«{}» опубликован", drink.name)),
                ..Reply::default()
            })
        }
        ActionToken::RedoCoffee(drink_id) => {
            services.catalog.retract(manager, drink_id).await?;
            Ok(Reply {
                edit_origin: Some(RenderRequest::text(
                    "🔄 Карточка напитка снята. Внесите напиток заново.",
                )),
                ..Reply::default()
            })
        }
        ActionToken::Decline { status, order_id } => {
            // Fail fast on controls that went stale before asking for a reason.
            let order = services.authority.order(order_id).await?;
            if !order.status().can_decline() {
                return Err(OrderError::InvalidStateTransition {
                    current: order.status(),
                    action: "decline",
                }
                .into());
            }
            if order.status() != status {
                return Err(DomainError::Conflict { order_id });
            }
            Ok(Reply {
                ask_reason: Some(DeclineTarget { order_id, status }),
                ..Reply::default()
            })
        }
        ActionToken::Confirm { status, order_id } => {
            let actor = if status == OrderStatus::Ready {
                customer
            } else {
                manager
            };
            let order = services.authority.confirm(actor, order_id, status).await?;
            Ok(Reply {
                edit_origin: origin.map(|_| render::order_summary(&order)),
                ..Reply::default()
            })
        }
        ActionToken::DrinkType(type_id) => {
            let menu = services.catalog.drink_menu(type_id).await?;
            if menu.is_empty() {
                return Ok(Reply::message(RenderRequest::text(
                    "В этой категории пока нет напитков.",
                )));
            }
            Ok(Reply {
                send: render::drink_list(&menu),
                ..Reply::default()
            })
        }
        ActionToken::SelectSize(drink_size_id) => {
            let view = services
                .editor
                .start_order(customer, drink_size_id, None)
                .await?;
            Ok(Reply::card(view))
        }
        ActionToken::Pay(order_id) => checkout(services, user, order_id, origin).await,
        ActionToken::NewOrder => start_menu(services).await,
        ActionToken::Noop => Ok(Reply::none()),
    }
}

/// Re-renders an order card in place, or sends it if the old one is gone.
async fn refresh_card<S, N>(
    services: &Services<S, N>,
    view: OrderView,
    origin: Option<MessageRef>,
) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let Some(origin) = origin else {
        return Ok(Reply::card(view));
    };
    if let Some(session) = view.order.session_id() {
        services.editor.remember_card(session, origin).await?;
    }
    Ok(Reply {
        edit_origin: Some(view.render()),
        ..Reply::default()
    })
}

async fn published_card<S, N>(
    services: &Services<S, N>,
    drink_id: DrinkId,
) -> Result<RenderRequest, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let mut card = services.catalog.admin_card(drink_id).await?;
    card.keyboard = Keyboard::new();
    card.text.push_str("\n\n✅ Опубликовано");
    Ok(card)
}

async fn checkout<S, N>(
    services: &Services<S, N>,
    user: &User,
    order_id: OrderId,
    origin: Option<MessageRef>,
) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let customer = Actor::customer(user.id);
    let order = services.authority.checkout(customer, order_id).await?;
    let view = services.editor.view(customer, order_id).await?;
    let mut reply = Reply {
        edit_origin: origin.map(|_| view.render()),
        ..Reply::default()
    };

    match &services.payments {
        PaymentMode::Invoice { .. } => reply.invoice = Some(order),
        PaymentMode::Counter => {
            let card = render::pending_payment_card(&order, Some(user));
            let manager_chat = services.authority.manager_chat();
            if let Err(e) = services.authority.notifier().send(manager_chat, card).await {
                tracing::warn!(%order_id, error = %e, "Could not post order awaiting payment");
                metrics::counter!("notification_failures_total", "kind" => "send").increment(1);
            }
            reply.toast = Some("Заказ оформлен. Оплатите его на кассе.".to_string());
        }
    }
    Ok(reply)
}

/// Registers the user if new and shows the drink categories.
pub async fn start<S, N>(services: &Services<S, N>, user: User) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let user = services.store.ensure_user(user).await?;
    tracing::info!(user_id = %user.id, role = %user.role, "User started the bot");
    start_menu(services).await
}

async fn start_menu<S, N>(services: &Services<S, N>) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let types = services.catalog.drink_types().await?;
    Ok(Reply::message(render::drink_types_menu(&types)))
}

/// Starts an order from `/order <drink_id> <size>`.
pub async fn order_by_name<S, N>(
    services: &Services<S, N>,
    user: &User,
    drink_id: i64,
    size: &str,
) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let view = services
        .editor
        .start_order_by_size_name(Actor::customer(user.id), DrinkId::new(drink_id), size, None)
        .await?;
    Ok(Reply::card(view))
}

/// Shows the user's most recent order still in play.
pub async fn last_order<S, N>(services: &Services<S, N>, user: &User) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let Some(record) = services.store.latest_open_order(user.id).await? else {
        return Ok(Reply::message(RenderRequest::text(
            "У вас пока нет заказов. Начните с /start",
        )));
    };
    let order = services.authority.order(record.id).await?;
    Ok(Reply::message(render::order_summary(&order)))
}

/// Completes a decline once the reason arrives.
///
/// The user acts as customer on their own orders and as manager otherwise.
pub async fn decline<S, N>(
    services: &Services<S, N>,
    user: &User,
    target: DeclineTarget,
    reason: &str,
) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let order = services.authority.order(target.order_id).await?;
    let actor = if order.customer_id() == user.id {
        Actor::customer(user.id)
    } else {
        Actor::manager(user.id)
    };
    let order = services
        .authority
        .decline(actor, target.order_id, target.status, reason)
        .await?;
    Ok(Reply::message(RenderRequest::text(format!(
        "❌ Заказ #{} отменён.",
        order.id()
    ))))
}

/// Invoice payload carrying the order id.
pub fn invoice_payload(order_id: OrderId) -> String {
    format!("order_{order_id}")
}

/// Parses an invoice payload back into the order id.
pub fn parse_invoice_payload(payload: &str) -> Option<OrderId> {
    payload
        .strip_prefix("order_")?
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(OrderId::new)
}

/// Records a successful payment reported by Telegram.
pub async fn payment_received<S, N>(
    services: &Services<S, N>,
    payer: UserId,
    payload: &str,
    total_amount: u32,
) -> Result<Reply, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    let Some(order_id) = parse_invoice_payload(payload) else {
        tracing::error!(%payer, payload, "Payment with unknown payload");
        return Err(DomainError::NotFound {
            entity: "order",
            id: 0,
        });
    };
    let order = services.authority.order(order_id).await?;
    if !covers_total(&order, total_amount) {
        return Err(OrderError::PaymentMismatch {
            order_id,
            paid: total_amount,
        }
        .into());
    }
    let order = services
        .authority
        .confirm_payment(Actor::payment(payer), order_id)
        .await?;
    Ok(Reply::message(RenderRequest::text(format!(
        "✅ Оплата получена! Заказ #{} передан бариста.",
        order.id()
    ))))
}

/// Whether a pre-checkout for `payload` may proceed: the order still awaits
/// payment and `total_amount` is its exact total.
pub async fn can_pay<S, N>(services: &Services<S, N>, payload: &str, total_amount: u32) -> bool
where
    S: Store + Clone,
    N: Notifier,
{
    let Some(order_id) = parse_invoice_payload(payload) else {
        return false;
    };
    matches!(
        services.authority.order(order_id).await,
        Ok(order) if order.status() == OrderStatus::Created && covers_total(&order, total_amount)
    )
}

/// Whether `total_amount`, in minor units, is exactly the order's total.
fn covers_total(order: &Order, total_amount: u32) -> bool {
    order.total_price().to_minor_units() == Some(total_amount)
}

/// The stored user behind a Telegram account. Unknown accounts are
/// registered as customers.
pub async fn resolve_user<S, N>(services: &Services<S, N>, user: User) -> Result<User, DomainError>
where
    S: Store + Clone,
    N: Notifier,
{
    Ok(services.store.ensure_user(user).await?)
}
