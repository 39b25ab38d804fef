use std::sync::Arc;

use chrono::{DateTime, Utc};
use snafu::ResultExt;
use superpost_llm::LlmProvider;
use superpost_storage::{
    ChatId, ChatRecord, MessageRecord, MessageRole, SqliteStorage, StorageResult, UserRecord,
};

mod assistant;
mod auth;
mod data;

pub use assistant::{LocalAssistant, PROVIDER_NOT_CONFIGURED_REPLY};
pub use auth::LocalAuth;
pub use data::LocalDataService;

use crate::auth::{SessionSlot, UserProfile};
use crate::chat::message::{Conversation, ConversationId, Message, MessageId, Role};
use crate::model_selector::SelectedModel;
use crate::services::{BlockingTaskSnafu, ChatServices, ServiceResult, StorageSnafu};

/// Service set backed by the local SQLite store and, when configured, an LLM provider.
pub fn local_services(
    storage: Arc<SqliteStorage>,
    session: SessionSlot,
    provider: Option<Arc<dyn LlmProvider>>,
    selected_model: SelectedModel,
) -> ChatServices {
    tracing::info!(
        database_url = %storage.database_url(),
        provider_configured = provider.is_some(),
        "using local backend"
    );

    ChatServices::new(
        Arc::new(LocalDataService::new(Arc::clone(&storage), session.clone())),
        Arc::new(LocalAssistant::new(
            Arc::clone(&storage),
            provider,
            selected_model,
        )),
        Arc::new(LocalAuth::new(storage, session)),
    )
}

/// Runs a sync store call off the async executor.
pub(crate) async fn run_blocking<T, F>(
    storage: &Arc<SqliteStorage>,
    stage: &'static str,
    call: F,
) -> ServiceResult<T>
where
    T: Send + 'static,
    F: FnOnce(&SqliteStorage) -> StorageResult<T> + Send + 'static,
{
    let storage = Arc::clone(storage);
    tokio::task::spawn_blocking(move || call(&storage))
        .await
        .context(BlockingTaskSnafu { stage })?
        .context(StorageSnafu { stage })
}

pub(crate) fn parse_chat_id(
    conversation_id: &ConversationId,
    stage: &'static str,
) -> ServiceResult<ChatId> {
    ChatId::parse(conversation_id.as_str()).context(StorageSnafu { stage })
}

fn timestamp(unix_millis: u64) -> DateTime<Utc> {
    i64::try_from(unix_millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default()
}

fn role_from_record(role: MessageRole) -> Role {
    match role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    }
}

fn role_to_record(role: Role) -> MessageRole {
    match role {
        Role::User => MessageRole::User,
        Role::Assistant => MessageRole::Assistant,
    }
}

fn conversation_from_record(record: ChatRecord) -> Conversation {
    Conversation {
        id: ConversationId::new(record.id.to_string()),
        title: record.title,
        created_at: timestamp(record.created_at_unix_millis),
        updated_at: timestamp(record.updated_at_unix_millis),
        user_id: record.user_id.to_string(),
    }
}

fn message_from_record(record: MessageRecord) -> Message {
    Message::new(
        MessageId::new(record.id.to_string()),
        ConversationId::new(record.chat_id.to_string()),
        role_from_record(record.role),
        record.content,
        timestamp(record.created_at_unix_millis),
    )
}

fn profile_from_record(record: UserRecord) -> UserProfile {
    UserProfile {
        id: record.id.to_string(),
        display_name: record.display_name,
        email: record.email,
        avatar_url: record.avatar_url,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_timestamps_convert_exactly() {
        let at = timestamp(1_714_557_600_123);
        assert_eq!(at.timestamp_millis(), 1_714_557_600_123);
        assert_eq!(timestamp(u64::MAX), DateTime::<Utc>::default());
    }

    #[test]
    fn roles_round_trip_through_storage_enum() {
        for role in [Role::User, Role::Assistant] {
            assert_eq!(role_from_record(role_to_record(role)), role);
        }
    }

    #[test]
    fn malformed_conversation_id_is_a_storage_error() {
        let result = parse_chat_id(&ConversationId::new("not-a-uuid"), "test");
        assert!(matches!(
            result,
            Err(crate::services::ServiceError::Storage { .. })
        ));
    }
}
