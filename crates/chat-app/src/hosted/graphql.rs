use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use snafu::{OptionExt, ResultExt};

use super::auth::SessionRefresher;
use super::{
    DecodeResponseSnafu, GraphQlSnafu, HostedError, HostedResult, HttpRequestSnafu,
    HttpStatusSnafu, MissingDataSnafu,
};
use crate::auth::SessionSlot;
use crate::chat::message::{Conversation, ConversationId, Message, MessageId, Role};
use crate::services::{
    ActionError, ActionReply, AssistantAction, BoxFuture, DataService, HostedSnafu, ServiceResult,
};

pub(crate) const GET_CHATS: &str = r#"query GetChats($userId: uuid!) {
  chats(where: { user_id: { _eq: $userId } }, order_by: { created_at: desc }) {
    id
    title
    created_at
    updated_at
    user_id
  }
}"#;

pub(crate) const GET_CHAT_MESSAGES: &str = r#"query GetChatMessages($chatId: uuid!) {
  messages(where: { chat_id: { _eq: $chatId } }, order_by: { created_at: asc }) {
    id
    content
    role
    created_at
    chat_id
  }
}"#;

pub(crate) const CREATE_CHAT: &str = r#"mutation CreateChat($title: String = "New Chat") {
  insert_chats_one(object: { title: $title }) {
    id
    title
    created_at
    updated_at
    user_id
  }
}"#;

pub(crate) const CREATE_MESSAGE: &str = r#"mutation CreateMessage($chatId: uuid!, $content: String!, $role: String!) {
  insert_messages_one(object: { chat_id: $chatId, content: $content, role: $role }) {
    id
    content
    role
    created_at
    chat_id
  }
}"#;

pub(crate) const SEND_MESSAGE: &str = r#"mutation SendMessage($chatId: String!, $content: String!) {
  sendMessage(chatId: $chatId, content: $content) {
    message
    messageId
  }
}"#;

/// Error text the action layer produces when its webhook answered with non-JSON.
pub(crate) const WEBHOOK_JSON_ERROR: &str = "not a valid json response from webhook";
const UNKNOWN_GRAPHQL_ERROR: &str = "Unknown GraphQL error";
/// Error code the GraphQL engine uses for a missing, malformed or expired bearer token.
const INVALID_JWT_CODE: &str = "invalid-jwt";

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a, V> {
    query: &'a str,
    #[serde(rename = "operationName")]
    operation_name: &'a str,
    variables: V,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse<D> {
    data: Option<D>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    #[serde(default)]
    message: String,
    #[serde(default)]
    extensions: Option<GraphQlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorExtensions {
    #[serde(default)]
    code: Option<String>,
}

impl<D> GraphQlResponse<D> {
    fn has_expired_token(&self) -> bool {
        self.errors.iter().any(|error| {
            error.message.contains("JWTExpired")
                || error
                    .extensions
                    .as_ref()
                    .and_then(|extensions| extensions.code.as_deref())
                    == Some(INVALID_JWT_CODE)
        })
    }

    fn first_error_message(&self) -> Option<String> {
        let first = self.errors.first()?;
        Some(if first.message.is_empty() {
            UNKNOWN_GRAPHQL_ERROR.to_string()
        } else {
            first.message.clone()
        })
    }

    fn into_data(self, stage: &'static str) -> HostedResult<D> {
        if let Some(message) = self.first_error_message() {
            return GraphQlSnafu { stage, message }.fail();
        }
        self.data.context(MissingDataSnafu {
            stage,
            field: "data",
        })
    }
}

/// GraphQL-over-HTTP client; attaches the session's bearer token when present.
///
/// With a refresher attached, a request rejected for an expired token renews the session
/// and is sent once more.
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
    session: SessionSlot,
    refresher: Option<Arc<dyn SessionRefresher>>,
}

impl GraphQlClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, session: SessionSlot) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            session,
            refresher: None,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn SessionRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub(crate) async fn execute<V, D>(
        &self,
        operation_name: &'static str,
        query: &str,
        variables: V,
    ) -> HostedResult<GraphQlResponse<D>>
    where
        V: Serialize,
        D: DeserializeOwned,
    {
        let access_token = self.session.access_token();
        let response = self
            .send(operation_name, query, &variables, access_token.as_deref())
            .await?;

        let Some(refresher) = self.refresher.as_ref() else {
            return Ok(response);
        };
        if access_token.is_none() || !response.has_expired_token() {
            return Ok(response);
        }

        tracing::info!(operation = operation_name, "access token expired; refreshing session");
        if let Err(error) = refresher.refresh_session(access_token.as_deref()).await {
            tracing::warn!(operation = operation_name, error = %error, "session refresh failed");
            return Ok(response);
        }
        let renewed = self.session.access_token();
        self.send(operation_name, query, &variables, renewed.as_deref())
            .await
    }

    async fn send<V, D>(
        &self,
        operation_name: &'static str,
        query: &str,
        variables: &V,
        access_token: Option<&str>,
    ) -> HostedResult<GraphQlResponse<D>>
    where
        V: Serialize,
        D: DeserializeOwned,
    {
        let mut request = self.http.post(&self.endpoint).json(&GraphQlRequest {
            query,
            operation_name,
            variables,
        });
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(operation = operation_name, "sending GraphQL request");
        let response = request.send().await.context(HttpRequestSnafu {
            stage: operation_name,
        })?;
        let status = response.status();
        let body = response.text().await.context(HttpRequestSnafu {
            stage: "read-graphql-response",
        })?;

        if !status.is_success() {
            return HttpStatusSnafu {
                stage: operation_name,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        serde_json::from_str(&body).context(DecodeResponseSnafu {
            stage: operation_name,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatsData {
    chats: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct MessagesData {
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct InsertChatData {
    insert_chats_one: Option<Conversation>,
}

#[derive(Debug, Deserialize)]
struct InsertMessageData {
    insert_messages_one: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageData {
    #[serde(rename = "sendMessage")]
    send_message: Option<SendMessagePayload>,
}

/// Output of the `sendMessage` action. It carries no success flag; a reply without text is a failure.
#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "messageId", default)]
    message_id: Option<String>,
}

pub struct HostedDataService {
    client: Arc<GraphQlClient>,
}

impl HostedDataService {
    pub fn new(client: Arc<GraphQlClient>) -> Self {
        Self { client }
    }
}

impl DataService for HostedDataService {
    fn list_conversations<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Vec<Conversation>>> {
        Box::pin(async move {
            let data: ChatsData = self
                .client
                .execute("GetChats", GET_CHATS, json!({ "userId": user_id }))
                .await
                .and_then(|response| response.into_data("GetChats"))
                .context(HostedSnafu {
                    stage: "list-conversations",
                })?;
            Ok(data.chats)
        })
    }

    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ServiceResult<Vec<Message>>> {
        Box::pin(async move {
            let data: MessagesData = self
                .client
                .execute(
                    "GetChatMessages",
                    GET_CHAT_MESSAGES,
                    json!({ "chatId": conversation_id.as_str() }),
                )
                .await
                .and_then(|response| response.into_data("GetChatMessages"))
                .context(HostedSnafu {
                    stage: "list-messages",
                })?;
            Ok(data.messages)
        })
    }

    fn create_conversation<'a>(
        &'a self,
        title: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Conversation>> {
        Box::pin(async move {
            let data: InsertChatData = self
                .client
                .execute("CreateChat", CREATE_CHAT, json!({ "title": title }))
                .await
                .and_then(|response| response.into_data("CreateChat"))
                .context(HostedSnafu {
                    stage: "create-conversation",
                })?;
            data.insert_chats_one
                .context(MissingDataSnafu {
                    stage: "CreateChat",
                    field: "insert_chats_one",
                })
                .context(HostedSnafu {
                    stage: "create-conversation",
                })
        })
    }

    fn create_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        content: &'a str,
        role: Role,
    ) -> BoxFuture<'a, ServiceResult<Message>> {
        Box::pin(async move {
            let variables = json!({
                "chatId": conversation_id.as_str(),
                "content": content,
                "role": role.as_str(),
            });
            let data: InsertMessageData = self
                .client
                .execute("CreateMessage", CREATE_MESSAGE, variables)
                .await
                .and_then(|response| response.into_data("CreateMessage"))
                .context(HostedSnafu {
                    stage: "create-message",
                })?;
            data.insert_messages_one
                .context(MissingDataSnafu {
                    stage: "CreateMessage",
                    field: "insert_messages_one",
                })
                .context(HostedSnafu {
                    stage: "create-message",
                })
        })
    }
}

/// The `sendMessage` action of the hosted backend.
pub struct HostedAssistant {
    client: Arc<GraphQlClient>,
}

impl HostedAssistant {
    pub fn new(client: Arc<GraphQlClient>) -> Self {
        Self { client }
    }
}

impl AssistantAction for HostedAssistant {
    fn request_reply<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        content: &'a str,
    ) -> BoxFuture<'a, Result<ActionReply, ActionError>> {
        Box::pin(async move {
            let variables = json!({ "chatId": conversation_id.as_str(), "content": content });
            match self
                .client
                .execute::<_, SendMessageData>("SendMessage", SEND_MESSAGE, variables)
                .await
            {
                Ok(response) => classify_send_response(response),
                Err(HostedError::DecodeResponse { source, .. }) => {
                    Err(ActionError::MalformedResponse {
                        stage: "decode-send-message",
                        message: source.to_string(),
                    })
                }
                Err(error) => Err(ActionError::Transport {
                    stage: "send-message",
                    message: error.to_string(),
                }),
            }
        })
    }
}

pub(crate) fn classify_send_response(
    response: GraphQlResponse<SendMessageData>,
) -> Result<ActionReply, ActionError> {
    if let Some(message) = response.first_error_message() {
        tracing::warn!(error = %message, "sendMessage returned GraphQL errors");
        if message.contains(WEBHOOK_JSON_ERROR) {
            return Err(ActionError::MalformedResponse {
                stage: "send-message-webhook",
                message,
            });
        }
        return Err(ActionError::Rejected {
            stage: "send-message-graphql",
            message,
        });
    }

    let payload = response
        .data
        .and_then(|data| data.send_message)
        .ok_or(ActionError::NoResponse {
            stage: "send-message-payload",
        })?;

    let message = payload.message.unwrap_or_default();
    Ok(ActionReply {
        success: !message.is_empty(),
        message,
        message_id: payload.message_id.map(MessageId::new),
    })
}
