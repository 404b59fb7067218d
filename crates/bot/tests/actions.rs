//! Integration tests for the action router.
//!
//! These drive `handle_action` and the command handlers against the
//! in-memory store and a recording notifier, the way the dispatcher does.

use std::sync::Arc;

use bot::actions::{self, PaymentMode, Services};
use bot::dialogue::DeclineTarget;
use domain::{
    ActionToken, AddOnPolicy, ChatId, DomainError, MessageRef, OrderError, QuantityDelta,
    RecordingNotifier, SizeCache, WaitEstimate,
};
use store::{
    DrinkId, DrinkSizeId, DrinkTypeId, InMemoryStore, Money, OrderId, OrderStatus, OrderStore,
    OrderStoreExt, Role, User, UserId,
};

const MANAGER_CHAT: ChatId = ChatId(-1001);

type TestServices = Services<InMemoryStore, Arc<RecordingNotifier>>;

struct Cafe {
    store: InMemoryStore,
    notifier: Arc<RecordingNotifier>,
    services: TestServices,
    coffee: DrinkTypeId,
    latte: DrinkId,
    medium: DrinkSizeId,
    customer: User,
    manager: User,
}

async fn cafe(payments: PaymentMode) -> Cafe {
    let store = InMemoryStore::new();
    let coffee = store.add_drink_type("Coffee").await;
    let latte = store.add_drink(coffee, "Latte").await;
    let m = store.add_size("M", 350).await;
    let medium = store
        .add_drink_size(latte, m, Money::from_units(150))
        .await;
    let syrup = store.add_add_on("Syrup", Money::from_units(30)).await;
    store.link_add_on(latte, syrup).await;

    let customer = User::new(UserId::new(100), Role::Customer);
    let mut manager = User::new(UserId::new(900), Role::Manager);
    manager.first_name = Some("Olga".into());
    store.add_user(manager.clone()).await;

    let notifier = Arc::new(RecordingNotifier::new());
    let services = Services::new(
        store.clone(),
        notifier.clone(),
        MANAGER_CHAT,
        Arc::new(SizeCache::new()),
        AddOnPolicy::Strict,
        payments,
    );

    Cafe {
        store,
        notifier,
        services,
        coffee,
        latte,
        medium,
        customer,
        manager,
    }
}

fn origin(chat: i64, message_id: i32) -> MessageRef {
    MessageRef::new(ChatId(chat), message_id)
}

impl Cafe {
    async fn act(&self, user: &User, token: ActionToken) -> Result<actions::Reply, DomainError> {
        actions::handle_action(&self.services, user, token, Some(origin(user.id.get(), 1))).await
    }

    async fn draft(&self) -> OrderId {
        let reply = self
            .act(&self.customer, ActionToken::SelectSize(self.medium))
            .await
            .unwrap();
        reply.card.unwrap().order.id()
    }

    async fn created(&self) -> OrderId {
        let id = self.draft().await;
        self.act(&self.customer, ActionToken::Pay(id)).await.unwrap();
        id
    }

    async fn paid(&self) -> OrderId {
        let id = self.created().await;
        self.act(
            &self.manager,
            ActionToken::Confirm {
                status: OrderStatus::Created,
                order_id: id,
            },
        )
        .await
        .unwrap();
        id
    }

    async fn status(&self, id: OrderId) -> OrderStatus {
        self.store.require_order(id).await.unwrap().status
    }
}

mod browsing {
    use super::*;

    #[tokio::test]
    async fn start_registers_user_and_lists_drink_types() {
        let cafe = cafe(PaymentMode::Counter).await;
        let reply = actions::start(&cafe.services, cafe.customer.clone())
            .await
            .unwrap();

        let stored = cafe.store.get_user(cafe.customer.id).await.unwrap();
        assert_eq!(stored.map(|u| u.role), Some(Role::Customer));

        assert_eq!(reply.send.len(), 1);
        let tokens: Vec<String> = reply.send[0]
            .keyboard
            .buttons()
            .map(|b| b.action.to_string())
            .collect();
        assert_eq!(tokens, [format!("drink_type_{}", cafe.coffee)]);
    }

    #[tokio::test]
    async fn start_keeps_existing_manager_role() {
        let cafe = cafe(PaymentMode::Counter).await;
        let as_customer = User::new(cafe.manager.id, Role::Customer);
        actions::start(&cafe.services, as_customer).await.unwrap();

        let stored = cafe.store.get_user(cafe.manager.id).await.unwrap().unwrap();
        assert_eq!(stored.role, Role::Manager);
    }

    #[tokio::test]
    async fn drink_type_lists_sizes() {
        let cafe = cafe(PaymentMode::Counter).await;
        let reply = cafe
            .act(&cafe.customer, ActionToken::DrinkType(cafe.coffee))
            .await
            .unwrap();

        assert_eq!(reply.send.len(), 1);
        let card = &reply.send[0];
        assert!(card.text.contains("Latte"));
        assert!(
            card.keyboard
                .buttons()
                .any(|b| b.action == ActionToken::SelectSize(cafe.medium))
        );
    }

    #[tokio::test]
    async fn empty_drink_type_says_so() {
        let cafe = cafe(PaymentMode::Counter).await;
        let tea = cafe.store.add_drink_type("Tea").await;
        let reply = cafe
            .act(&cafe.customer, ActionToken::DrinkType(tea))
            .await
            .unwrap();
        assert!(reply.send[0].text.contains("нет напитков"));
    }

    #[tokio::test]
    async fn select_size_starts_a_draft_card() {
        let cafe = cafe(PaymentMode::Counter).await;
        let reply = cafe
            .act(&cafe.customer, ActionToken::SelectSize(cafe.medium))
            .await
            .unwrap();

        let view = reply.card.unwrap();
        assert_eq!(view.order.status(), OrderStatus::Draft);
        assert_eq!(view.total_price(), Money::from_units(150));
        assert!(view.order.session_id().is_some());
    }

    #[tokio::test]
    async fn order_command_resolves_size_label() {
        let cafe = cafe(PaymentMode::Counter).await;
        let reply = actions::order_by_name(&cafe.services, &cafe.customer, cafe.latte.get(), " m ")
            .await
            .unwrap();
        assert_eq!(reply.card.unwrap().order.drink_size().id, cafe.medium);

        let err = actions::order_by_name(&cafe.services, &cafe.customer, cafe.latte.get(), "XXL")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::CatalogInconsistency(_)));
    }

    #[tokio::test]
    async fn new_order_and_noop() {
        let cafe = cafe(PaymentMode::Counter).await;
        let reply = cafe.act(&cafe.customer, ActionToken::NewOrder).await.unwrap();
        assert_eq!(reply.send.len(), 1);

        let reply = cafe.act(&cafe.customer, ActionToken::Noop).await.unwrap();
        assert!(reply.send.is_empty());
        assert!(reply.edit_origin.is_none());
        assert!(reply.toast.is_none());
    }
}

mod editing {
    use super::*;

    #[tokio::test]
    async fn quantity_edits_the_tapped_card_and_remembers_it() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.draft().await;

        let reply = cafe
            .act(
                &cafe.customer,
                ActionToken::UpdateQuantity {
                    delta: QuantityDelta::Increment,
                    order_id: id,
                },
            )
            .await
            .unwrap();

        let card = reply.edit_origin.unwrap();
        assert!(card.text.contains("Количество: 2"));
        assert!(reply.card.is_none());

        let record = cafe.store.require_order(id).await.unwrap();
        let session = cafe
            .store
            .get_session(record.session_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        let last = session.last_action.unwrap();
        assert_eq!((last.chat_id, last.message_id), (cafe.customer.id.get(), 1));
    }

    #[tokio::test]
    async fn edit_without_origin_sends_a_fresh_card() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.draft().await;

        let reply = actions::handle_action(
            &cafe.services,
            &cafe.customer,
            ActionToken::UpdateQuantity {
                delta: QuantityDelta::Increment,
                order_id: id,
            },
            None,
        )
        .await
        .unwrap();
        assert!(reply.edit_origin.is_none());
        assert_eq!(reply.card.unwrap().quantity(), 2);
    }

    #[tokio::test]
    async fn strict_policy_rejects_foreign_add_on() {
        let cafe = cafe(PaymentMode::Counter).await;
        let whisky = cafe
            .store
            .add_add_on("Whisky", Money::from_units(300))
            .await;
        let id = cafe.draft().await;

        let err = cafe
            .act(
                &cafe.customer,
                ActionToken::ToggleAddOn {
                    add_on_id: whisky,
                    order_id: id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::AddOnNotAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn other_users_cannot_edit() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.draft().await;
        let stranger = User::new(UserId::new(555), Role::Customer);

        let err = cafe
            .act(
                &stranger,
                ActionToken::UpdateQuantity {
                    delta: QuantityDelta::Increment,
                    order_id: id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::NotOwner { .. })
        ));
    }
}

mod payment {
    use super::*;

    #[tokio::test]
    async fn counter_checkout_asks_manager_to_confirm() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.draft().await;

        let reply = cafe.act(&cafe.customer, ActionToken::Pay(id)).await.unwrap();
        assert_eq!(cafe.status(id).await, OrderStatus::Created);
        assert!(reply.invoice.is_none());
        assert!(reply.toast.is_some());
        // The tapped card now shows the created order without edit controls.
        let card = reply.edit_origin.unwrap();
        assert!(card.keyboard.buttons().all(|b| !matches!(
            b.action,
            ActionToken::UpdateQuantity { .. } | ActionToken::Pay(_)
        )));

        let to_managers = cafe.notifier.messages_to(MANAGER_CHAT);
        assert_eq!(to_managers.len(), 1);
        let pending = to_managers[0].request();
        assert!(pending.keyboard.buttons().any(|b| b.action
            == ActionToken::Confirm {
                status: OrderStatus::Created,
                order_id: id,
            }));

        cafe.act(
            &cafe.manager,
            ActionToken::Confirm {
                status: OrderStatus::Created,
                order_id: id,
            },
        )
        .await
        .unwrap();
        assert_eq!(cafe.status(id).await, OrderStatus::Paid);
        assert_eq!(cafe.notifier.messages_to(MANAGER_CHAT).len(), 2);
    }

    #[tokio::test]
    async fn customer_cannot_confirm_own_payment() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.created().await;

        let err = cafe
            .act(
                &cafe.customer,
                ActionToken::Confirm {
                    status: OrderStatus::Created,
                    order_id: id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::Unauthorized { .. })
                | DomainError::NotFound {
                    entity: "manager",
                    ..
                }
        ));
        assert_eq!(cafe.status(id).await, OrderStatus::Created);
        assert_eq!(cafe.notifier.messages_to(MANAGER_CHAT).len(), 1);
    }

    #[tokio::test]
    async fn invoice_checkout_confirms_on_successful_payment() {
        let cafe = cafe(PaymentMode::Invoice {
            provider_token: "provider".into(),
        })
        .await;
        let id = cafe.draft().await;

        let reply = cafe.act(&cafe.customer, ActionToken::Pay(id)).await.unwrap();
        let invoice = reply.invoice.unwrap();
        assert_eq!(invoice.id(), id);
        assert!(cafe.notifier.messages_to(MANAGER_CHAT).is_empty());

        let payload = actions::invoice_payload(id);
        assert!(actions::can_pay(&cafe.services, &payload, 15_000).await);

        actions::payment_received(&cafe.services, cafe.customer.id, &payload, 15_000)
            .await
            .unwrap();
        assert_eq!(cafe.status(id).await, OrderStatus::Paid);
        assert!(!actions::can_pay(&cafe.services, &payload, 15_000).await);
        assert_eq!(cafe.notifier.messages_to(MANAGER_CHAT).len(), 1);
    }

    #[tokio::test]
    async fn invoiced_order_cannot_grow_before_payment() {
        let cafe = cafe(PaymentMode::Invoice {
            provider_token: "provider".into(),
        })
        .await;
        let id = cafe.created().await;

        let err = cafe
            .act(
                &cafe.customer,
                ActionToken::UpdateQuantity {
                    delta: QuantityDelta::Increment,
                    order_id: id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::InvalidStateTransition {
                current: OrderStatus::Created,
                ..
            })
        ));
        let stored = cafe.store.require_order(id).await.unwrap();
        assert_eq!(stored.quantity, 1);
        assert_eq!(stored.total_price, Money::from_units(150));
    }

    #[tokio::test]
    async fn payment_for_a_different_amount_is_rejected() {
        let cafe = cafe(PaymentMode::Invoice {
            provider_token: "provider".into(),
        })
        .await;
        let id = cafe.created().await;
        let payload = actions::invoice_payload(id);

        assert!(!actions::can_pay(&cafe.services, &payload, 5_000).await);
        assert!(!actions::can_pay(&cafe.services, &payload, 45_000).await);

        let err = actions::payment_received(&cafe.services, cafe.customer.id, &payload, 5_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::PaymentMismatch { paid: 5_000, .. })
        ));
        assert_eq!(cafe.status(id).await, OrderStatus::Created);
        assert!(cafe.notifier.messages_to(MANAGER_CHAT).is_empty());
    }

    #[tokio::test]
    async fn unknown_payload_is_rejected() {
        let cafe = cafe(PaymentMode::Counter).await;
        assert!(!actions::can_pay(&cafe.services, "coffee", 15_000).await);
        let err = actions::payment_received(&cafe.services, cafe.customer.id, "coffee", 15_000)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }
}

mod fulfilment {
    use super::*;

    #[tokio::test]
    async fn manager_takes_readies_and_customer_receives() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.paid().await;

        let reply = cafe
            .act(
                &cafe.manager,
                ActionToken::Take {
                    order_id: id,
                    wait: WaitEstimate::Minutes(5),
                },
            )
            .await
            .unwrap();
        assert!(reply.toast.unwrap().contains(&id.to_string()));
        assert_eq!(cafe.status(id).await, OrderStatus::Processing);

        cafe.act(&cafe.manager, ActionToken::OrderReady(id))
            .await
            .unwrap();
        assert_eq!(cafe.status(id).await, OrderStatus::Ready);

        cafe.act(&cafe.customer, ActionToken::OrderReceived(id))
            .await
            .unwrap();
        assert_eq!(cafe.status(id).await, OrderStatus::Received);
    }

    #[tokio::test]
    async fn customer_cannot_take_orders() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.paid().await;

        let err = cafe
            .act(
                &cafe.customer,
                ActionToken::Take {
                    order_id: id,
                    wait: WaitEstimate::TenPlus,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::NotFound {
                entity: "manager",
                ..
            } | DomainError::Order(OrderError::Unauthorized { .. })
        ));
        assert_eq!(cafe.status(id).await, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn last_shows_latest_open_order() {
        let cafe = cafe(PaymentMode::Counter).await;
        let reply = actions::last_order(&cafe.services, &cafe.customer)
            .await
            .unwrap();
        assert!(reply.send[0].text.contains("/start"));

        let id = cafe.paid().await;
        let reply = actions::last_order(&cafe.services, &cafe.customer)
            .await
            .unwrap();
        assert!(reply.send[0].text.contains(&format!("#{id}")));
    }
}

mod declining {
    use super::*;

    #[tokio::test]
    async fn decline_asks_for_a_reason_first() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.created().await;

        let reply = cafe
            .act(
                &cafe.customer,
                ActionToken::Decline {
                    status: OrderStatus::Created,
                    order_id: id,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            reply.ask_reason,
            Some(DeclineTarget {
                order_id: id,
                status: OrderStatus::Created
            })
        );
        assert_eq!(cafe.status(id).await, OrderStatus::Created);
    }

    #[tokio::test]
    async fn customer_decline_notifies_managers() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.paid().await;
        cafe.notifier.clear();

        let target = DeclineTarget {
            order_id: id,
            status: OrderStatus::Paid,
        };
        actions::decline(&cafe.services, &cafe.customer, target, "changed my mind")
            .await
            .unwrap();

        let record = cafe.store.require_order(id).await.unwrap();
        assert_eq!(record.status, OrderStatus::Declined);
        assert_eq!(record.decline_reason.as_deref(), Some("changed my mind"));

        let to_managers = cafe.notifier.messages_to(MANAGER_CHAT);
        assert_eq!(to_managers.len(), 1);
        assert!(to_managers[0].request().text.contains("changed my mind"));
    }

    #[tokio::test]
    async fn manager_decline_notifies_customer() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.paid().await;
        cafe.notifier.clear();

        let target = DeclineTarget {
            order_id: id,
            status: OrderStatus::Paid,
        };
        actions::decline(&cafe.services, &cafe.manager, target, "")
            .await
            .unwrap();

        let to_customer = cafe.notifier.messages_to(ChatId::from(cafe.customer.id));
        assert_eq!(to_customer.len(), 1);
        assert!(to_customer[0].request().text.contains("Причина не указана"));
    }

    #[tokio::test]
    async fn stale_decline_control_conflicts() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.paid().await;

        let err = cafe
            .act(
                &cafe.customer,
                ActionToken::Decline {
                    status: OrderStatus::Created,
                    order_id: id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
    }

    #[tokio::test]
    async fn drafts_cannot_be_declined() {
        let cafe = cafe(PaymentMode::Counter).await;
        let id = cafe.draft().await;

        let err = cafe
            .act(
                &cafe.customer,
                ActionToken::Decline {
                    status: OrderStatus::Draft,
                    order_id: id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::InvalidStateTransition { .. })
        ));
    }
}

mod catalog {
    use super::*;

    #[tokio::test]
    async fn manager_publishes_a_drink_card() {
        let cafe = cafe(PaymentMode::Counter).await;
        let flat_white = cafe
            .store
            .add_draft_drink(cafe.coffee, "Flat white")
            .await;

        let reply = cafe
            .act(&cafe.manager, ActionToken::ConfirmCoffee(flat_white))
            .await
            .unwrap();
        let card = reply.edit_origin.unwrap();
        assert!(card.text.contains("Опубликовано"));
        assert!(card.keyboard.is_empty());
        assert!(reply.toast.unwrap().contains("Flat white"));
    }

    #[tokio::test]
    async fn customers_cannot_publish() {
        let cafe = cafe(PaymentMode::Counter).await;
        let err = cafe
            .act(&cafe.customer, ActionToken::RedoCoffee(cafe.latte))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::NotFound { .. } | DomainError::Order(OrderError::Unauthorized { .. })
        ));
    }
}
