//! Scenario: single-window chat discipline.
//!
//! # Invariants under test
//!
//! 1. Re-showing the menu deletes the previous menu message: at most one
//!    menu is alive at any time.
//! 2. Prompt transitions edit the existing message instead of posting.
//! 3. Navigation reset removes every tracked message and clears the
//!    session.

use std::sync::Arc;

use galley_cache::InMemoryKv;
use galley_chat::{navigation_reset, show_menu, show_prompt, FsmStorage, Markup};
use galley_testkit::FakeChat;

const USER: i64 = 777;
const CHAT: i64 = 777;

fn fsm() -> FsmStorage {
    FsmStorage::new(Arc::new(InMemoryKv::new()))
}

fn menu_markup() -> Markup {
    Markup::Reply(vec![vec!["🗑 Списание".to_string()]])
}

#[tokio::test]
async fn at_most_one_menu_message_survives() {
    let chat = FakeChat::new();
    let fsm = fsm();

    show_menu(&chat, &fsm, USER, CHAT, "Меню", menu_markup()).await.unwrap();
    show_menu(&chat, &fsm, USER, CHAT, "Меню", menu_markup()).await.unwrap();
    show_menu(&chat, &fsm, USER, CHAT, "Меню", menu_markup()).await.unwrap();

    assert_eq!(chat.alive_messages(CHAT).len(), 1);
}

#[tokio::test]
async fn prompt_transitions_edit_in_place() {
    let chat = FakeChat::new();
    let fsm = fsm();

    let first = show_prompt(&chat, &fsm, USER, CHAT, "Выберите склад:", None)
        .await
        .unwrap();
    let second = show_prompt(&chat, &fsm, USER, CHAT, "Выберите счёт:", None)
        .await
        .unwrap();
    let third = show_prompt(&chat, &fsm, USER, CHAT, "Укажите причину:", None)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(chat.alive_messages(CHAT).len(), 1, "one prompt in the chat");
    assert_eq!(chat.edit_count(CHAT, first), 2, "two in-place transitions");
}

#[tokio::test]
async fn navigation_reset_cleans_every_tracked_message() {
    let chat = FakeChat::new();
    let fsm = fsm();

    fsm.set_state(USER, "writeoff:item").await.unwrap();
    show_menu(&chat, &fsm, USER, CHAT, "Меню", menu_markup()).await.unwrap();
    show_prompt(&chat, &fsm, USER, CHAT, "Введите товар:", None).await.unwrap();

    assert_eq!(chat.alive_messages(CHAT).len(), 2);

    navigation_reset(&fsm, &chat, USER, CHAT).await.unwrap();

    assert!(chat.alive_messages(CHAT).is_empty());
    assert!(!fsm.in_session(USER).await.unwrap());
}
