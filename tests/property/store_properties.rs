//! Property-based tests for the history window.
//!
//! Uses proptest to verify:
//! 1. Incremental appends keep publish order.
//! 2. Replacing with the same snapshot twice is the same as once.
//! 3. Prepending a page never introduces a duplicate key, even when the
//!    page overlaps the window.
//! 4. Duplicate numbered deliveries are applied once.
//! 5. Live messages without a server number are never dropped, even when
//!    repeated.

use std::collections::HashSet;

use proptest::prelude::*;
use stompchat::store::HistoryWindow;
use stompchat_proto::message::{ChatMessage, MessageKind};

fn numbered(no: i64) -> ChatMessage {
    ChatMessage::chat(format!("user{}", no % 3), format!("message {no}")).with_no(no)
}

/// Messages with and without server numbers.
fn arb_message() -> impl Strategy<Value = ChatMessage> {
    (
        prop::option::of(0i64..64),
        "[a-c]",
        "[a-z ]{0,12}",
        any::<bool>(),
    )
        .prop_map(|(no, sender, content, direct)| {
            let mut message = ChatMessage::chat(sender, content);
            message.no = no;
            if direct {
                message.kind = MessageKind::Direct;
                message.recipient_id = Some("me".to_string());
            }
            message
        })
}

fn unique_keys(window: &HistoryWindow) -> bool {
    let mut seen = HashSet::new();
    window.messages().iter().all(|m| seen.insert(m.key()))
}

proptest! {
    #[test]
    fn appends_keep_publish_order(nos in prop::collection::btree_set(0i64..1000, 0..40)) {
        // Shuffle-free but non-monotonic: reverse half of the sequence.
        let mut order: Vec<i64> = nos.into_iter().collect();
        let half = order.len() / 2;
        order[..half].reverse();

        let mut window = HistoryWindow::new();
        for no in &order {
            prop_assert!(window.append_incremental(numbered(*no)));
        }
        let applied: Vec<i64> = window.messages().iter().filter_map(|m| m.no).collect();
        prop_assert_eq!(applied, order);
    }

    #[test]
    fn snapshot_replace_is_idempotent(
        messages in prop::collection::vec(arb_message(), 0..30),
        has_more in any::<bool>(),
    ) {
        let mut once = HistoryWindow::new();
        once.replace_snapshot(messages.clone(), has_more);

        let mut twice = HistoryWindow::new();
        twice.replace_snapshot(messages.clone(), has_more);
        twice.replace_snapshot(messages, has_more);

        prop_assert_eq!(once.messages(), twice.messages());
        prop_assert_eq!(once.has_more(), twice.has_more());
        prop_assert!(unique_keys(&twice));
    }

    #[test]
    fn prepend_never_duplicates(
        window_msgs in prop::collection::vec(arb_message(), 0..30),
        page in prop::collection::vec(arb_message(), 0..30),
        has_more in any::<bool>(),
    ) {
        let mut window = HistoryWindow::new();
        window.replace_snapshot(window_msgs, true);
        let before: Vec<ChatMessage> = window.messages().to_vec();

        let added = window.prepend_page(page, has_more);

        prop_assert!(unique_keys(&window));
        prop_assert_eq!(window.len(), before.len() + added);
        // The existing window survives intact at the tail.
        prop_assert_eq!(&window.messages()[added..], before.as_slice());
        prop_assert_eq!(window.has_more(), has_more);
    }

    #[test]
    fn duplicate_numbered_deliveries_apply_once(
        nos in prop::collection::vec(0i64..64, 0..40),
    ) {
        let mut window = HistoryWindow::new();
        for no in nos.iter().chain(nos.iter()) {
            window.append_incremental(numbered(*no));
        }
        prop_assert!(unique_keys(&window));

        let distinct: HashSet<_> = nos.iter().collect();
        prop_assert_eq!(window.len(), distinct.len());
    }

    #[test]
    fn unnumbered_appends_keep_every_send(
        sends in prop::collection::vec(("[ab]", "(ok|hi)"), 0..40),
    ) {
        let mut window = HistoryWindow::new();
        for (sender, content) in &sends {
            prop_assert!(window.append_incremental(ChatMessage::chat(sender.as_str(), content.as_str())));
        }
        let applied: Vec<(&str, &str)> = window
            .messages()
            .iter()
            .map(|m| (m.sender_id.as_str(), m.content.as_str()))
            .collect();
        let expected: Vec<(&str, &str)> = sends
            .iter()
            .map(|(s, c)| (s.as_str(), c.as_str()))
            .collect();
        prop_assert_eq!(applied, expected);
    }
}
