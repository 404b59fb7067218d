//! Message texts and keyboards.
//!
//! Everything here is pure: it turns domain values into [`RenderRequest`]s and
//! leaves delivery to a [`Notifier`](crate::Notifier). Texts are Telegram HTML,
//! so any user-supplied string is escaped on the way in.

use store::{AddOn, Drink, DrinkSize, DrinkType, OrderStatus, User};

use crate::action::{ActionToken, QuantityDelta, WaitEstimate};
use crate::notify::{Button, Keyboard, RenderRequest};
use crate::order::{Order, OrderView};

const DECORATION: &str = "☕🍦☕🐈☕🍦☕🐈☕🍦";

/// Escapes the characters Telegram HTML treats as markup.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Human-readable status for order summaries.
pub fn status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Draft => "📝 Черновик",
        OrderStatus::Created => "🕓 Ожидает оплаты",
        OrderStatus::Paid => "💳 Оплачен",
        OrderStatus::Processing => "🧡 Готовится",
        OrderStatus::Ready => "✅ Готов к выдаче",
        OrderStatus::Received => "📦 Получен",
        OrderStatus::Declined => "❌ Отменён",
        OrderStatus::Expired => "⌛ Просрочен",
    }
}

fn customer_name(customer: Option<&User>, order: &Order) -> String {
    customer
        .map(|u| escape(&u.display_name()))
        .unwrap_or_else(|| order.customer_id().to_string())
}

fn add_on_names(order: &Order) -> String {
    if order.add_ons().is_empty() {
        "не выбрано".to_string()
    } else {
        order
            .add_ons()
            .iter()
            .map(|a| escape(&a.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The customer's order card: quantity stepper, add-on toggles and the pay
/// control while the order is a draft.
pub fn order_card(view: &OrderView) -> RenderRequest {
    let order = &view.order;
    let ds = order.drink_size();
    let text = format!(
        "<b>{drink}</b>\n{DECORATION}\n{size} ({volume} мл) – {price}\nКоличество: {qty}\nДобавки: {adds}",
        drink = escape(&ds.drink_name),
        size = escape(&ds.size_name),
        volume = ds.volume_ml,
        price = ds.price,
        qty = order.quantity(),
        adds = add_on_names(order),
    );

    let id = order.id();
    let mut keyboard = Keyboard::new();
    if order.status().can_edit_items() {
        keyboard = keyboard.row(vec![
            Button::new(
                "➖",
                ActionToken::UpdateQuantity {
                    delta: QuantityDelta::Decrement,
                    order_id: id,
                },
            ),
            Button::new(order.quantity().to_string(), ActionToken::Noop),
            Button::new(
                "➕",
                ActionToken::UpdateQuantity {
                    delta: QuantityDelta::Increment,
                    order_id: id,
                },
            ),
        ]);

        for pair in view.available_add_ons.chunks(2) {
            keyboard = keyboard.row(pair.iter().map(|a| add_on_button(order, a)).collect());
        }
    }

    keyboard = match order.status() {
        OrderStatus::Draft => keyboard.row(vec![Button::new(
            format!("💳 Оплатить {}", order.total_price()),
            ActionToken::Pay(id),
        )]),
        OrderStatus::Created => keyboard.row(vec![Button::new(
            "❌ Отменить заказ",
            ActionToken::Decline {
                status: OrderStatus::Created,
                order_id: id,
            },
        )]),
        _ => keyboard,
    };

    RenderRequest::text(text)
        .with_keyboard(keyboard)
        .with_image(view.image.clone())
}

fn add_on_button(order: &Order, add_on: &AddOn) -> Button {
    let mark = if order.has_add_on(add_on.id) {
        "🔘"
    } else {
        "⚪️"
    };
    Button::new(
        format!("{mark} {} - {}", add_on.name, add_on.price),
        ActionToken::ToggleAddOn {
            add_on_id: add_on.id,
            order_id: order.id(),
        },
    )
}

fn order_details(order: &Order, customer: Option<&User>) -> String {
    let ds = order.drink_size();
    format!(
        "🔠 Группа: {size}\n☕️: <b>{drink}</b>\n📏 Размер: {volume} мл\n🔢 Количество: {qty}\n➕ Добавки: {adds}\n💰 Оплачено: {total}\n👤 Клиент: {client}",
        size = escape(&ds.size_name),
        drink = escape(&ds.drink_name),
        volume = ds.volume_ml,
        qty = order.quantity(),
        adds = add_on_names(order),
        total = order.total_price(),
        client = customer_name(customer, order),
    )
}

/// Card posted to the manager chat once an order is paid.
pub fn manager_order_card(order: &Order, customer: Option<&User>) -> RenderRequest {
    let text = format!(
        "🆕 Заказ #{id}\n\n{details}",
        id = order.id(),
        details = order_details(order, customer),
    );
    let take = WaitEstimate::OFFERED
        .iter()
        .map(|wait| {
            Button::new(
                format!("⏳ {}", wait.label()),
                ActionToken::Take {
                    order_id: order.id(),
                    wait: *wait,
                },
            )
        })
        .collect();
    let keyboard = Keyboard::new().row(take).row(vec![Button::new(
        "❌ Отклонить",
        ActionToken::Decline {
            status: OrderStatus::Paid,
            order_id: order.id(),
        },
    )]);
    RenderRequest::text(text).with_keyboard(keyboard)
}

/// Card posted to the manager chat for an order awaiting payment at the
/// counter.
pub fn pending_payment_card(order: &Order, customer: Option<&User>) -> RenderRequest {
    let text = format!(
        "🕓 Заказ #{id} ожидает оплаты\n\n{details}",
        id = order.id(),
        details = order_details(order, customer),
    );
    let keyboard = Keyboard::new().row(vec![
        Button::new(
            "✅ Оплата получена",
            ActionToken::Confirm {
                status: OrderStatus::Created,
                order_id: order.id(),
            },
        ),
        Button::new(
            "❌ Отклонить",
            ActionToken::Decline {
                status: OrderStatus::Created,
                order_id: order.id(),
            },
        ),
    ]);
    RenderRequest::text(text).with_keyboard(keyboard)
}

/// Manager card once a manager has taken the order.
pub fn processing_card(order: &Order, customer: Option<&User>, manager: &User) -> RenderRequest {
    let text = format!(
        "🧡 Заказ #{id} в работе\n\n{details}\n🧑‍💼 Менеджер: {manager}\n⏳ {comment}",
        id = order.id(),
        details = order_details(order, customer),
        manager = escape(&manager.display_name()),
        comment = order.manager_comment().map(escape).unwrap_or_default(),
    );
    let keyboard = Keyboard::new()
        .row(vec![Button::new(
            "✅ Заказ готов к выдаче",
            ActionToken::OrderReady(order.id()),
        )])
        .row(vec![Button::new(
            "❌ Отклонить",
            ActionToken::Decline {
                status: OrderStatus::Processing,
                order_id: order.id(),
            },
        )]);
    RenderRequest::text(text).with_keyboard(keyboard)
}

/// Customer message announcing the order is ready, with the pickup control.
pub fn ready_notice(order: &Order) -> RenderRequest {
    let ds = order.drink_size();
    RenderRequest::text(format!(
        "✅ Ваш заказ {drink} версии {size} готов! 🍹",
        drink = escape(&ds.drink_name),
        size = escape(&ds.size_name),
    ))
    .with_keyboard(Keyboard::new().row(vec![Button::new(
        "📦 Заказ получен",
        ActionToken::OrderReceived(order.id()),
    )]))
}

pub fn ready_card(order: &Order) -> RenderRequest {
    RenderRequest::text(format!("✅ Заказ #{} готов к выдаче", order.id()))
}

pub fn received_card(order: &Order) -> RenderRequest {
    RenderRequest::text(format!("🎉 Заказ №{} получен клиентом ✅", order.id()))
}

/// Tells the managers a customer cancelled.
pub fn declined_by_customer(order: &Order, reason: &str) -> RenderRequest {
    RenderRequest::text(format!(
        "❌ Клиент отменил заказ #{id}\nПричина: {reason}",
        id = order.id(),
        reason = escape(reason),
    ))
}

/// Tells the customer a manager declined.
pub fn declined_by_manager(order: &Order, reason: &str) -> RenderRequest {
    RenderRequest::text(format!(
        "❌ Ваш заказ #{id} отклонён.\nПричина: {reason}\n\nХотите сделать новый заказ? 👉 /start",
        id = order.id(),
        reason = escape(reason),
    ))
}

/// Short summary used by `/last`.
pub fn order_summary(order: &Order) -> RenderRequest {
    let ds = order.drink_size();
    let mut text = format!(
        "Заказ #{id}: <b>{drink}</b> {size} × {qty}\nДобавки: {adds}\nСумма: {total}\nСтатус: {status}",
        id = order.id(),
        drink = escape(&ds.drink_name),
        size = escape(&ds.size_name),
        qty = order.quantity(),
        adds = add_on_names(order),
        total = order.total_price(),
        status = status_label(order.status()),
    );
    if let Some(comment) = order.manager_comment() {
        text.push_str(&format!("\n⏳ {}", escape(comment)));
    }
    RenderRequest::text(text)
}

pub fn drink_types_menu(types: &[DrinkType]) -> RenderRequest {
    let keyboard = types.iter().fold(Keyboard::new(), |kb, t| {
        kb.row(vec![Button::new(t.name.clone(), ActionToken::DrinkType(t.id))])
    });
    RenderRequest::text("Выберите напиток:").with_keyboard(keyboard)
}

/// Drinks of one type, one button per drink size.
pub fn drink_list(drinks: &[(Drink, Vec<DrinkSize>)]) -> Vec<RenderRequest> {
    drinks
        .iter()
        .map(|(drink, sizes)| drink_card(drink, sizes))
        .collect()
}

/// A published drink card with its size menu.
pub fn drink_card(drink: &Drink, sizes: &[DrinkSize]) -> RenderRequest {
    let mut text = format!("<b>{}</b>", escape(&drink.name));
    if let Some(description) = &drink.description {
        text.push_str(&format!("\n{}", escape(description)));
    }
    let size_row = sizes
        .iter()
        .filter(|s| s.is_active)
        .map(|s| {
            Button::new(
                format!("{} – {}", s.size_name, s.price),
                ActionToken::SelectSize(s.id),
            )
        })
        .collect();
    let keyboard = Keyboard::new()
        .row(size_row)
        .row(vec![Button::new("🔙 Начать сначала", ActionToken::NewOrder)]);
    RenderRequest::text(text)
        .with_keyboard(keyboard)
        .with_image(drink.image_file_id.clone())
}

/// Preview of a drink card for managers, with publish and redo controls.
pub fn drink_admin_card(drink: &Drink, sizes: &[DrinkSize], add_ons: &[AddOn]) -> RenderRequest {
    let sizes_text = sizes
        .iter()
        .map(|s| format!("{} ({} мл) – {}", escape(&s.size_name), s.volume_ml, s.price))
        .collect::<Vec<_>>()
        .join("\n");
    let add_ons_text = if add_ons.is_empty() {
        "нет".to_string()
    } else {
        add_ons
            .iter()
            .map(|a| format!("{} – {}", escape(&a.name), a.price))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let text = format!(
        "<b>{name}</b> ({kind})\n{description}\n\n{sizes_text}\nДобавки: {add_ons_text}",
        name = escape(&drink.name),
        kind = escape(&drink.type_name),
        description = drink.description.as_deref().map(escape).unwrap_or_default(),
    );
    let keyboard = Keyboard::new().row(vec![
        Button::new("✅ Подтвердить", ActionToken::ConfirmCoffee(drink.id)),
        Button::new("🔄 Внести заново", ActionToken::RedoCoffee(drink.id)),
    ]);
    RenderRequest::text(text)
        .with_keyboard(keyboard)
        .with_image(drink.image_file_id.clone())
}

/// Result of a database health check.
pub fn health_report(available: bool) -> RenderRequest {
    if available {
        RenderRequest::text("☕️ <b>База данных cofe_bot доступна</b>")
    } else {
        RenderRequest::text("❄️ <b>База данных cofe_bot недоступна!</b>")
    }
}
