use std::sync::Arc;

use snafu::{OptionExt, ResultExt};
use superpost_storage::{
    ChatStore, MessageStore, NewChat, NewMessage, SqliteStorage, UserId,
};

use super::{
    conversation_from_record, message_from_record, parse_chat_id, role_to_record, run_blocking,
};
use crate::auth::SessionSlot;
use crate::chat::message::{Conversation, ConversationId, Message, Role};
use crate::services::{BoxFuture, DataService, NotSignedInSnafu, ServiceResult, StorageSnafu};

pub struct LocalDataService {
    storage: Arc<SqliteStorage>,
    session: SessionSlot,
}

impl LocalDataService {
    pub fn new(storage: Arc<SqliteStorage>, session: SessionSlot) -> Self {
        Self { storage, session }
    }
}

impl DataService for LocalDataService {
    fn list_conversations<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Vec<Conversation>>> {
        Box::pin(async move {
            let user_id = UserId::parse(user_id).context(StorageSnafu {
                stage: "local-list-conversations-user-id",
            })?;
            let records = run_blocking(&self.storage, "local-list-conversations", move |storage| {
                storage.list_chats(user_id)
            })
            .await?;
            Ok(records.into_iter().map(conversation_from_record).collect())
        })
    }

    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ServiceResult<Vec<Message>>> {
        Box::pin(async move {
            let chat_id = parse_chat_id(conversation_id, "local-list-messages-chat-id")?;
            let records = run_blocking(&self.storage, "local-list-messages", move |storage| {
                storage.list_messages(chat_id)
            })
            .await?;
            Ok(records.into_iter().map(message_from_record).collect())
        })
    }

    fn create_conversation<'a>(
        &'a self,
        title: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Conversation>> {
        Box::pin(async move {
            let user_id = self.session.user_id().context(NotSignedInSnafu {
                stage: "local-create-conversation",
            })?;
            let user_id = UserId::parse(&user_id).context(StorageSnafu {
                stage: "local-create-conversation-user-id",
            })?;
            let input = NewChat {
                user_id,
                title: title.to_string(),
            };
            let record = run_blocking(&self.storage, "local-create-conversation", move |storage| {
                storage.create_chat(input)
            })
            .await?;
            tracing::debug!(conversation_id = %record.id, "created local conversation");
            Ok(conversation_from_record(record))
        })
    }

    fn create_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        content: &'a str,
        role: Role,
    ) -> BoxFuture<'a, ServiceResult<Message>> {
        Box::pin(async move {
            let chat_id = parse_chat_id(conversation_id, "local-create-message-chat-id")?;
            let input = NewMessage {
                role: role_to_record(role),
                content: content.to_string(),
            };
            let record = run_blocking(&self.storage, "local-create-message", move |storage| {
                storage.append_message(chat_id, input)
            })
            .await?;
            Ok(message_from_record(record))
        })
    }
}
