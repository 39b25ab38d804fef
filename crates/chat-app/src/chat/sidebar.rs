use chrono::{DateTime, TimeDelta, Utc};

use crate::chat::message::{Conversation, ConversationId};

pub const EMPTY_LIST_LABEL: &str = "No conversations yet";
pub const EMPTY_LIST_COLLAPSED_LABEL: &str = "No chats";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationAgeGroup {
    Today,
    Yesterday,
    Older,
}

impl ConversationAgeGroup {
    pub fn label(self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::Older => "Older",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidebarItem<'a> {
    GroupHeader(ConversationAgeGroup),
    Conversation(&'a Conversation),
}

/// Conversation list of the signed-in user with search, highlight and collapse.
#[derive(Debug, Clone, Default)]
pub struct SidebarState {
    conversations: Vec<Conversation>,
    search_query: String,
    selected_conversation: Option<ConversationId>,
    collapsed: bool,
}

impl SidebarState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the list, keeping the highlight only if it still exists.
    pub fn set_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;

        if self.selected_conversation.as_ref().is_some_and(|selected| {
            !self
                .conversations
                .iter()
                .any(|conversation| &conversation.id == selected)
        }) {
            self.selected_conversation = None;
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    /// Conversations whose title contains the search query, ignoring case.
    pub fn visible(&self) -> Vec<&Conversation> {
        let query = self.search_query.trim().to_lowercase();
        self.conversations
            .iter()
            .filter(|conversation| matches_query(conversation, &query))
            .collect()
    }

    /// Visible conversations bucketed by age of their last update, list order
    /// kept inside each bucket.
    pub fn grouped(&self, now: DateTime<Utc>) -> Vec<SidebarItem<'_>> {
        let mut today = Vec::new();
        let mut yesterday = Vec::new();
        let mut older = Vec::new();

        for conversation in self.visible() {
            match classify_group(conversation.updated_at, now) {
                ConversationAgeGroup::Today => today.push(conversation),
                ConversationAgeGroup::Yesterday => yesterday.push(conversation),
                ConversationAgeGroup::Older => older.push(conversation),
            }
        }

        let mut items = Vec::new();
        append_group(&mut items, ConversationAgeGroup::Today, today);
        append_group(&mut items, ConversationAgeGroup::Yesterday, yesterday);
        append_group(&mut items, ConversationAgeGroup::Older, older);
        items
    }

    pub fn select(&mut self, conversation_id: Option<ConversationId>) {
        self.selected_conversation = conversation_id;
    }

    pub fn selected_conversation(&self) -> Option<&ConversationId> {
        self.selected_conversation.as_ref()
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn toggle_collapsed(&mut self) {
        self.collapsed = !self.collapsed;
    }

    pub fn empty_label(&self) -> &'static str {
        if self.collapsed {
            EMPTY_LIST_COLLAPSED_LABEL
        } else {
            EMPTY_LIST_LABEL
        }
    }
}

/// Two-letter badge shown for a conversation in the collapsed sidebar.
pub fn conversation_badge(title: &str) -> String {
    title.chars().take(2).collect::<String>().to_uppercase()
}

fn append_group<'a>(
    items: &mut Vec<SidebarItem<'a>>,
    group: ConversationAgeGroup,
    conversations: Vec<&'a Conversation>,
) {
    if conversations.is_empty() {
        return;
    }

    items.push(SidebarItem::GroupHeader(group));
    items.extend(conversations.into_iter().map(SidebarItem::Conversation));
}

fn matches_query(conversation: &Conversation, query: &str) -> bool {
    query.is_empty() || conversation.title.to_lowercase().contains(query)
}

fn classify_group(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> ConversationAgeGroup {
    let age = (now - updated_at).max(TimeDelta::zero());

    // Elapsed-time buckets; no local timezone involved.
    if age < TimeDelta::days(1) {
        ConversationAgeGroup::Today
    } else if age < TimeDelta::days(2) {
        ConversationAgeGroup::Yesterday
    } else {
        ConversationAgeGroup::Older
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn conversation(id: &str, title: &str, hours_ago: i64) -> Conversation {
        let updated_at = now() - TimeDelta::hours(hours_ago);
        Conversation {
            id: ConversationId::new(id),
            title: title.to_string(),
            created_at: updated_at,
            updated_at,
            user_id: "u-1".to_string(),
        }
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let mut sidebar = SidebarState::new();
        sidebar.set_conversations(vec![
            conversation("1", "Rust Lifetimes", 1),
            conversation("2", "Dinner ideas", 2),
            conversation("3", "TRUSTED sources", 3),
        ]);

        sidebar.set_search("  rust ");
        let titles = sidebar
            .visible()
            .into_iter()
            .map(|conversation| conversation.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Rust Lifetimes", "TRUSTED sources"]);

        sidebar.set_search("");
        assert_eq!(sidebar.visible().len(), 3);
    }

    #[test]
    fn grouping_buckets_by_age_and_skips_empty_groups() {
        let mut sidebar = SidebarState::new();
        sidebar.set_conversations(vec![
            conversation("1", "fresh", 2),
            conversation("2", "old", 72),
            conversation("3", "also fresh", 5),
        ]);

        let items = sidebar.grouped(now());
        assert_eq!(items.len(), 5);
        assert_eq!(items[0], SidebarItem::GroupHeader(ConversationAgeGroup::Today));
        assert!(matches!(items[2], SidebarItem::Conversation(c) if c.title == "also fresh"));
        assert_eq!(items[3], SidebarItem::GroupHeader(ConversationAgeGroup::Older));
    }

    #[test]
    fn future_timestamps_count_as_today() {
        assert_eq!(
            classify_group(now() + TimeDelta::minutes(5), now()),
            ConversationAgeGroup::Today
        );
        assert_eq!(
            classify_group(now() - TimeDelta::hours(30), now()),
            ConversationAgeGroup::Yesterday
        );
    }

    #[test]
    fn reload_drops_highlight_of_vanished_conversation() {
        let mut sidebar = SidebarState::new();
        sidebar.set_conversations(vec![conversation("1", "a", 1), conversation("2", "b", 1)]);
        sidebar.select(Some(ConversationId::new("2")));

        sidebar.set_conversations(vec![conversation("2", "b", 1)]);
        assert_eq!(sidebar.selected_conversation(), Some(&ConversationId::new("2")));

        sidebar.set_conversations(vec![conversation("1", "a", 1)]);
        assert!(sidebar.selected_conversation().is_none());
    }

    #[test]
    fn empty_state_and_collapse() {
        let mut sidebar = SidebarState::new();
        assert!(sidebar.is_empty());
        assert_eq!(sidebar.empty_label(), EMPTY_LIST_LABEL);

        sidebar.toggle_collapsed();
        assert!(sidebar.is_collapsed());
        assert_eq!(sidebar.empty_label(), EMPTY_LIST_COLLAPSED_LABEL);
    }

    #[test]
    fn badge_uses_first_two_characters() {
        assert_eq!(conversation_badge("hello world"), "HE");
        assert_eq!(conversation_badge("x"), "X");
    }
}
