use std::sync::Arc;

use superpost_llm::{CompletionRequest, LlmProvider, ProviderMessage, Role as ProviderRole};
use superpost_storage::{MessageStore, SqliteStorage};

use super::{message_from_record, parse_chat_id, run_blocking};
use crate::chat::message::{ConversationId, Message, Role};
use crate::model_selector::SelectedModel;
use crate::services::{ActionError, ActionReply, AssistantAction, BoxFuture};

pub const PROVIDER_NOT_CONFIGURED_REPLY: &str =
    "No AI provider is configured. Add an API key to the provider section of settings.json to get replies.";
const ASSISTANT_PREAMBLE: &str = "You are SuperPost, a concise and friendly chat assistant.";

/// Answers from an LLM provider using the stored conversation as context.
pub struct LocalAssistant {
    storage: Arc<SqliteStorage>,
    provider: Option<Arc<dyn LlmProvider>>,
    selected_model: SelectedModel,
}

impl LocalAssistant {
    pub fn new(
        storage: Arc<SqliteStorage>,
        provider: Option<Arc<dyn LlmProvider>>,
        selected_model: SelectedModel,
    ) -> Self {
        Self {
            storage,
            provider,
            selected_model,
        }
    }

    async fn history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, ActionError> {
        let load = async {
            let chat_id = parse_chat_id(conversation_id, "local-assistant-chat-id")?;
            run_blocking(&self.storage, "local-assistant-history", move |storage| {
                storage.list_messages(chat_id)
            })
            .await
        };

        match load.await {
            Ok(records) => Ok(records.into_iter().map(message_from_record).collect()),
            Err(error) => Err(ActionError::Transport {
                stage: "local-assistant-history",
                message: error.to_string(),
            }),
        }
    }
}

/// Conversation history as provider messages; `content` is appended unless it
/// is already the latest user turn.
pub(crate) fn build_provider_messages(history: &[Message], content: &str) -> Vec<ProviderMessage> {
    let mut messages = history
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::User => ProviderRole::User,
                Role::Assistant => ProviderRole::Assistant,
            };
            ProviderMessage::new(role, message.content.clone())
        })
        .collect::<Vec<_>>();

    let already_present = history
        .last()
        .is_some_and(|last| last.role == Role::User && last.content == content);
    if !already_present {
        messages.push(ProviderMessage::new(ProviderRole::User, content));
    }
    messages
}

impl AssistantAction for LocalAssistant {
    fn request_reply<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        content: &'a str,
    ) -> BoxFuture<'a, Result<ActionReply, ActionError>> {
        Box::pin(async move {
            let Some(provider) = &self.provider else {
                tracing::warn!(conversation_id = %conversation_id, "no provider configured");
                return Ok(ActionReply::failure(PROVIDER_NOT_CONFIGURED_REPLY));
            };

            let history = self.history(conversation_id).await?;
            let model_id = self.selected_model.get();
            let request = CompletionRequest::new(
                model_id.clone(),
                build_provider_messages(&history, content),
            )
            .with_preamble(ASSISTANT_PREAMBLE);

            match provider.complete(request).await {
                Ok(reply) => {
                    tracing::debug!(
                        conversation_id = %conversation_id,
                        model_id = %model_id,
                        reply_chars = reply.chars().count(),
                        "provider replied"
                    );
                    Ok(ActionReply::success(reply))
                }
                Err(error) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        model_id = %model_id,
                        error = %error,
                        "provider completion failed"
                    );
                    Err(ActionError::Transport {
                        stage: "local-assistant-complete",
                        message: error.to_string(),
                    })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use superpost_llm::ProviderError;

    use super::*;
    use crate::auth::SessionSlot;
    use crate::local::{LocalAuth, LocalDataService};
    use crate::local::test_support::open_temp_storage;
    use crate::services::{AuthService, DataService};
    use crate::testing::{FakeProvider, message_at};

    async fn conversation_with_history(
        storage: &Arc<SqliteStorage>,
    ) -> (ConversationId, LocalDataService) {
        let session = SessionSlot::default();
        LocalAuth::new(Arc::clone(storage), session.clone())
            .sign_up("ada@x.io", "long-enough")
            .await
            .unwrap();
        let data = LocalDataService::new(Arc::clone(storage), session);
        let conversation = data.create_conversation("history").await.unwrap();
        data.create_message(&conversation.id, "What is 2+2?", Role::User)
            .await
            .unwrap();
        (conversation.id, data)
    }

    #[test]
    fn latest_user_turn_is_not_duplicated() {
        let history = vec![
            message_at("1", "c", Role::User, "hi", 0),
            message_at("2", "c", Role::Assistant, "hello", 10),
            message_at("3", "c", Role::User, "again", 20),
        ];
        let messages = build_provider_messages(&history, "again");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, ProviderRole::Assistant);

        let messages = build_provider_messages(&history[..2], "again");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], ProviderMessage::new(ProviderRole::User, "again"));
    }

    #[tokio::test]
    async fn missing_provider_is_a_structured_failure() {
        let (_dir, storage) = open_temp_storage().await;
        let assistant = LocalAssistant::new(storage, None, SelectedModel::default());

        let reply = assistant
            .request_reply(&ConversationId::new("anything"), "hi")
            .await
            .unwrap();
        assert_eq!(reply, ActionReply::failure(PROVIDER_NOT_CONFIGURED_REPLY));
    }

    #[tokio::test]
    async fn provider_sees_history_and_selected_model() {
        let (_dir, storage) = open_temp_storage().await;
        let (conversation_id, _data) = conversation_with_history(&storage).await;
        let provider = Arc::new(FakeProvider::replying("4"));
        let selected = SelectedModel::new("mistralai/mistral-7b-instruct");
        let assistant = LocalAssistant::new(
            storage,
            Some(provider.clone() as Arc<dyn LlmProvider>),
            selected,
        );

        let reply = assistant
            .request_reply(&conversation_id, "What is 2+2?")
            .await
            .unwrap();
        assert_eq!(reply, ActionReply::success("4"));

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model_id, "mistralai/mistral-7b-instruct");
        assert_eq!(
            requests[0].messages,
            vec![ProviderMessage::new(ProviderRole::User, "What is 2+2?")]
        );
    }

    #[tokio::test]
    async fn provider_errors_become_transport_errors() {
        let (_dir, storage) = open_temp_storage().await;
        let (conversation_id, _data) = conversation_with_history(&storage).await;
        let provider = FakeProvider::failing(ProviderError::EmptyReply {
            stage: "test",
            model_id: "m".to_string(),
        });
        let assistant = LocalAssistant::new(
            storage,
            Some(Arc::new(provider) as Arc<dyn LlmProvider>),
            SelectedModel::default(),
        );

        let result = assistant.request_reply(&conversation_id, "What is 2+2?").await;
        assert!(matches!(result, Err(ActionError::Transport { .. })));
    }
}
