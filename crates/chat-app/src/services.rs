use std::sync::Arc;

use snafu::Snafu;
use superpost_storage::StorageError;

use crate::auth::{AuthResult, SignUpOutcome, UserProfile};
use crate::chat::message::{Conversation, ConversationId, Message, MessageId, Role};
use crate::hosted::HostedError;

pub use superpost_llm::BoxFuture;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("no signed-in user on `{stage}`"))]
    NotSignedIn { stage: &'static str },
    #[snafu(display("storage call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("hosted backend call failed on `{stage}`: {source}"))]
    Hosted {
        stage: &'static str,
        source: HostedError,
    },
    #[snafu(display("blocking storage task failed on `{stage}`: {source}"))]
    BlockingTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
    #[snafu(display("backend returned no {entity} on `{stage}`"))]
    MissingRecord {
        stage: &'static str,
        entity: &'static str,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Reply of the assistant action. `success == false` is a structured failure whose
/// `message` (possibly empty) is still shown as the assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReply {
    pub success: bool,
    pub message: String,
    pub message_id: Option<MessageId>,
}

impl ActionReply {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            message_id: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            message_id: None,
        }
    }
}

/// Ways the assistant action can fail without producing a reply.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ActionError {
    #[snafu(display("assistant action unreachable on `{stage}`: {message}"))]
    Transport { stage: &'static str, message: String },
    #[snafu(display("assistant action returned a malformed response on `{stage}`: {message}"))]
    MalformedResponse { stage: &'static str, message: String },
    #[snafu(display("{message}"))]
    Rejected { stage: &'static str, message: String },
    #[snafu(display("assistant action returned no payload on `{stage}`"))]
    NoResponse { stage: &'static str },
}

/// Conversation and message persistence.
pub trait DataService: Send + Sync {
    fn connect<'a>(&'a self) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn dispose<'a>(&'a self) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Conversations owned by `user_id`, newest first.
    fn list_conversations<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Vec<Conversation>>>;

    /// Messages of one conversation, oldest first.
    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ServiceResult<Vec<Message>>>;

    /// Creates a conversation owned by the signed-in user.
    fn create_conversation<'a>(&'a self, title: &'a str)
    -> BoxFuture<'a, ServiceResult<Conversation>>;

    fn create_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        content: &'a str,
        role: Role,
    ) -> BoxFuture<'a, ServiceResult<Message>>;
}

/// Upstream call producing the assistant's answer to one user message.
pub trait AssistantAction: Send + Sync {
    fn connect<'a>(&'a self) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn dispose<'a>(&'a self) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn request_reply<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        content: &'a str,
    ) -> BoxFuture<'a, Result<ActionReply, ActionError>>;
}

pub trait AuthService: Send + Sync {
    fn connect<'a>(&'a self) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn dispose<'a>(&'a self) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn current_user(&self) -> Option<UserProfile>;

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<UserProfile>>;

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<SignUpOutcome>>;

    fn sign_out<'a>(&'a self) -> BoxFuture<'a, AuthResult<()>>;
}

/// The injected service set one client session runs against.
#[derive(Clone)]
pub struct ChatServices {
    pub data: Arc<dyn DataService>,
    pub assistant: Arc<dyn AssistantAction>,
    pub auth: Arc<dyn AuthService>,
}

impl ChatServices {
    pub fn new(
        data: Arc<dyn DataService>,
        assistant: Arc<dyn AssistantAction>,
        auth: Arc<dyn AuthService>,
    ) -> Self {
        Self {
            data,
            assistant,
            auth,
        }
    }

    pub async fn connect(&self) -> ServiceResult<()> {
        self.auth.connect().await?;
        self.data.connect().await?;
        self.assistant.connect().await?;
        tracing::debug!("chat services connected");
        Ok(())
    }

    /// Disposes every service, reporting the first failure after all were tried.
    pub async fn dispose(&self) -> ServiceResult<()> {
        let results = [
            self.assistant.dispose().await,
            self.data.dispose().await,
            self.auth.dispose().await,
        ];

        let mut first_error = None;
        for result in results {
            if let Err(error) = result {
                tracing::warn!(error = %error, "failed to dispose chat service");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                tracing::debug!("chat services disposed");
                Ok(())
            }
        }
    }
}
