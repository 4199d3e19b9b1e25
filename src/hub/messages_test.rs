use super::*;

const MINUTE_MS: i64 = 60_000;

fn store() -> MessageStore {
    MessageStore::new(Duration::from_secs(300))
}

#[test]
fn push_keeps_messages_inside_window() {
    let mut store = store();
    store.push(ChatMessage::new(1, "hi", vec![2], 0), 0);
    store.push(ChatMessage::new(2, "hey", vec![1], MINUTE_MS), MINUTE_MS);

    assert_eq!(store.iter().count(), 2);
    let texts: Vec<_> = store.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hi", "hey"]);
}

#[test]
fn push_prunes_expired_messages_first() {
    let mut store = store();
    store.push(ChatMessage::new(1, "old", vec![2], 0), 0);
    store.push(ChatMessage::new(1, "newer", vec![2], 2 * MINUTE_MS), 2 * MINUTE_MS);

    let now = 6 * MINUTE_MS;
    let pruned = store.push(ChatMessage::new(1, "fresh", vec![2], now), now);

    assert_eq!(pruned, 1);
    let texts: Vec<_> = store.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["newer", "fresh"]);
}

#[test]
fn message_exactly_at_ttl_is_kept() {
    let mut store = store();
    store.push(ChatMessage::new(1, "edge", vec![], 0), 0);
    assert_eq!(store.prune(5 * MINUTE_MS), 0);
    assert_eq!(store.prune(5 * MINUTE_MS + 1), 1);
    assert_eq!(store.iter().count(), 0);
}

#[test]
fn new_message_gets_unique_id() {
    let a = ChatMessage::new(1, "x", vec![], 0);
    let b = ChatMessage::new(1, "x", vec![], 0);
    assert_ne!(a.id, b.id);
}
