use chrono::TimeDelta;

use super::message::{Message, Role};

/// Two identical assistant replies closer than this are treated as one.
pub const DEDUP_WINDOW: TimeDelta = TimeDelta::milliseconds(5_000);

/// Drops assistant messages that repeat an earlier assistant message's content
/// within [`DEDUP_WINDOW`].
///
/// User messages always survive and the input order is preserved. Two genuinely
/// distinct replies with identical text inside the window also collapse; that
/// false positive is accepted.
pub fn dedupe_assistant_replies(raw: &[Message]) -> Vec<Message> {
    raw.iter()
        .enumerate()
        .filter(|(index, message)| {
            message.role == Role::User
                || !raw[..*index].iter().any(|earlier| {
                    earlier.role == Role::Assistant
                        && earlier.content == message.content
                        && (earlier.created_at - message.created_at).abs() < DEDUP_WINDOW
                })
        })
        .map(|(_, message)| message.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::chat::message::{ConversationId, MessageId};

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_714_557_600_000 + millis).unwrap()
    }

    fn message(id: &str, role: Role, content: &str, millis: i64) -> Message {
        Message::new(
            MessageId::new(id),
            ConversationId::new("chat"),
            role,
            content,
            at(millis),
        )
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|message| message.id.as_str()).collect()
    }

    #[test]
    fn burst_of_identical_replies_keeps_only_the_earliest() {
        let raw = vec![
            message("u1", Role::User, "hi", 0),
            message("a1", Role::Assistant, "hello!", 100),
            message("a2", Role::Assistant, "hello!", 1_200),
            message("a3", Role::Assistant, "hello!", 4_900),
        ];

        assert_eq!(ids(&dedupe_assistant_replies(&raw)), vec!["u1", "a1"]);
    }

    #[test]
    fn identical_replies_outside_the_window_are_both_kept() {
        let raw = vec![
            message("a1", Role::Assistant, "same", 0),
            message("a2", Role::Assistant, "same", 5_001),
        ];

        assert_eq!(ids(&dedupe_assistant_replies(&raw)), vec!["a1", "a2"]);
    }

    #[test]
    fn exactly_five_seconds_apart_is_outside_the_window() {
        let raw = vec![
            message("a1", Role::Assistant, "same", 0),
            message("a2", Role::Assistant, "same", 5_000),
        ];

        assert_eq!(dedupe_assistant_replies(&raw).len(), 2);
    }

    #[test]
    fn user_messages_are_never_dropped() {
        let raw = vec![
            message("u1", Role::User, "again", 0),
            message("u2", Role::User, "again", 10),
            message("a1", Role::Assistant, "again", 20),
        ];

        assert_eq!(ids(&dedupe_assistant_replies(&raw)), vec!["u1", "u2", "a1"]);
    }

    #[test]
    fn different_content_and_out_of_order_timestamps_keep_input_order() {
        let raw = vec![
            message("a1", Role::Assistant, "first", 3_000),
            message("u1", Role::User, "q", 0),
            message("a2", Role::Assistant, "second", 1_000),
            message("a3", Role::Assistant, "first", 500),
        ];

        // a3 sits 2.5s before a1 with the same text, so it is still a duplicate.
        assert_eq!(ids(&dedupe_assistant_replies(&raw)), vec!["a1", "u1", "a2"]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(dedupe_assistant_replies(&[]).is_empty());
    }
}
