//! In-memory service doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use superpost_llm::{
    BoxFuture, CompletionRequest, LlmProvider, Model, ModelCatalog, ModelCatalogSource,
    ProviderError, ProviderResult, default_models,
};
use tokio::sync::Notify;

use crate::auth::{AuthError, AuthResult, SessionSlot, SignUpOutcome, SignedInUser, UserProfile};
use crate::chat::message::{Conversation, ConversationId, Message, MessageId, Role};
use crate::services::{
    ActionError, ActionReply, AssistantAction, AuthService, DataService, ServiceError,
    ServiceResult,
};

const BASE_UNIX_MILLIS: i64 = 1_714_557_600_000;
const STEP_MILLIS: i64 = 1_000;

fn at_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(BASE_UNIX_MILLIS + millis).unwrap()
}

pub(crate) fn message_at(
    id: &str,
    conversation_id: &str,
    role: Role,
    content: &str,
    millis: i64,
) -> Message {
    Message::new(
        MessageId::new(id),
        ConversationId::new(conversation_id),
        role,
        content,
        at_millis(millis),
    )
}

pub(crate) fn sample_profile() -> UserProfile {
    UserProfile {
        id: "u-1".to_string(),
        display_name: Some("Ada Lovelace".to_string()),
        email: "ada@x.io".to_string(),
        avatar_url: None,
    }
}

/// Pauses a fake call: the fake signals `entered`, then waits for `release`.
#[derive(Clone, Default)]
pub(crate) struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct FakeDataState {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    next_id: usize,
}

impl FakeDataState {
    fn tick(&mut self) -> (usize, DateTime<Utc>) {
        self.next_id += 1;
        let sequence = self.next_id;
        (sequence, at_millis(sequence as i64 * STEP_MILLIS))
    }
}

#[derive(Default)]
pub(crate) struct FakeData {
    state: Mutex<FakeDataState>,
    fail_message_writes: bool,
    duplicate_assistant_rows: bool,
    create_gate: Option<Gate>,
    list_calls: AtomicUsize,
}

impl FakeData {
    pub(crate) fn failing_message_writes() -> Self {
        Self {
            fail_message_writes: true,
            ..Self::default()
        }
    }

    /// Lists every assistant row twice, the copy 1 s later under a new id.
    pub(crate) fn duplicating_assistant_rows() -> Self {
        Self {
            duplicate_assistant_rows: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_create_gate(mut self, gate: Gate) -> Self {
        self.create_gate = Some(gate);
        self
    }

    pub(crate) fn all_messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }

    pub(crate) fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().unwrap().conversations.clone()
    }

    pub(crate) fn messages_in(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.all_messages()
            .into_iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .collect()
    }

    pub(crate) fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl DataService for FakeData {
    fn list_conversations<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Vec<Conversation>>> {
        Box::pin(async move {
            let mut conversations = self
                .conversations()
                .into_iter()
                .filter(|conversation| conversation.user_id == user_id)
                .collect::<Vec<_>>();
            conversations.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
            Ok(conversations)
        })
    }

    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ServiceResult<Vec<Message>>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let mut listed = Vec::new();
            for message in self.messages_in(conversation_id) {
                let duplicate = (self.duplicate_assistant_rows && message.role == Role::Assistant)
                    .then(|| {
                        let mut copy = message.clone();
                        copy.id = MessageId::new(format!("{}-dup", message.id));
                        copy.created_at = message.created_at + TimeDelta::seconds(1);
                        copy
                    });
                listed.push(message);
                listed.extend(duplicate);
            }
            Ok(listed)
        })
    }

    fn create_conversation<'a>(
        &'a self,
        title: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Conversation>> {
        Box::pin(async move {
            if let Some(gate) = &self.create_gate {
                gate.pass().await;
            }
            let mut state = self.state.lock().unwrap();
            let (sequence, now) = state.tick();
            let conversation = Conversation {
                id: ConversationId::new(format!("conv-{sequence}")),
                title: title.to_string(),
                created_at: now,
                updated_at: now,
                user_id: "u-1".to_string(),
            };
            state.conversations.push(conversation.clone());
            Ok(conversation)
        })
    }

    fn create_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        content: &'a str,
        role: Role,
    ) -> BoxFuture<'a, ServiceResult<Message>> {
        Box::pin(async move {
            if self.fail_message_writes {
                return Err(ServiceError::MissingRecord {
                    stage: "fake-create-message",
                    entity: "message",
                });
            }
            let mut state = self.state.lock().unwrap();
            let (sequence, now) = state.tick();
            let message = Message::new(
                MessageId::new(format!("msg-{sequence}")),
                conversation_id.clone(),
                role,
                content,
                now,
            );
            state.messages.push(message.clone());
            Ok(message)
        })
    }
}

pub(crate) struct FakeAssistant {
    result: Result<ActionReply, ActionError>,
    gates: Mutex<VecDeque<Gate>>,
    calls: AtomicUsize,
}

impl FakeAssistant {
    pub(crate) fn replying(message: &str) -> Self {
        Self::answering(ActionReply::success(message))
    }

    pub(crate) fn answering(reply: ActionReply) -> Self {
        Self::with_result(Ok(reply))
    }

    pub(crate) fn failing(error: ActionError) -> Self {
        Self::with_result(Err(error))
    }

    fn with_result(result: Result<ActionReply, ActionError>) -> Self {
        Self {
            result,
            gates: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queues a gate for the next ungated call; later calls answer at once.
    pub(crate) fn with_gate(self, gate: Gate) -> Self {
        self.gates.lock().unwrap().push_back(gate);
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AssistantAction for FakeAssistant {
    fn request_reply<'a>(
        &'a self,
        _conversation_id: &'a ConversationId,
        _content: &'a str,
    ) -> BoxFuture<'a, Result<ActionReply, ActionError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gates.lock().unwrap().pop_front();
            if let Some(gate) = gate {
                gate.pass().await;
            }
            self.result.clone()
        })
    }
}

#[derive(Default)]
enum FakeAuthMode {
    #[default]
    Accepting,
    Rejecting(String),
    RequiringVerification,
}

#[derive(Default)]
pub(crate) struct FakeAuth {
    session: SessionSlot,
    mode: FakeAuthMode,
    calls: AtomicUsize,
}

impl FakeAuth {
    pub(crate) fn rejecting(message: &str) -> Self {
        Self {
            mode: FakeAuthMode::Rejecting(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn requiring_verification() -> Self {
        Self {
            mode: FakeAuthMode::RequiringVerification,
            ..Self::default()
        }
    }

    pub(crate) fn session(&self) -> &SessionSlot {
        &self.session
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn admit(&self, email: &str, stage: &'static str) -> AuthResult<UserProfile> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let FakeAuthMode::Rejecting(message) = &self.mode {
            return Err(AuthError::Rejected {
                stage,
                message: message.clone(),
            });
        }
        Ok(UserProfile {
            email: email.to_string(),
            ..sample_profile()
        })
    }
}

impl AuthService for FakeAuth {
    fn current_user(&self) -> Option<UserProfile> {
        self.session.current().map(|user| user.profile.clone())
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        _password: &'a str,
    ) -> BoxFuture<'a, AuthResult<UserProfile>> {
        Box::pin(async move {
            let profile = self.admit(email, "fake-sign-in")?;
            self.session.store(SignedInUser {
                profile: profile.clone(),
                access_token: None,
            });
            Ok(profile)
        })
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        _password: &'a str,
    ) -> BoxFuture<'a, AuthResult<SignUpOutcome>> {
        Box::pin(async move {
            let profile = self.admit(email, "fake-sign-up")?;
            if matches!(self.mode, FakeAuthMode::RequiringVerification) {
                return Ok(SignUpOutcome::VerificationRequired {
                    email: email.to_string(),
                });
            }
            self.session.store(SignedInUser {
                profile: profile.clone(),
                access_token: None,
            });
            Ok(SignUpOutcome::SignedIn(profile))
        })
    }

    fn sign_out<'a>(&'a self) -> BoxFuture<'a, AuthResult<()>> {
        Box::pin(async move {
            self.session.clear();
            Ok(())
        })
    }
}

pub(crate) struct FakeProvider {
    models: Vec<Model>,
    reply: String,
    failure: Mutex<Option<ProviderError>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeProvider {
    pub(crate) fn with_models(models: Vec<Model>) -> Self {
        Self {
            models,
            reply: String::new(),
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Self::with_models(default_models())
        }
    }

    /// Fails the next completion with `error`, then replies with an empty string.
    pub(crate) fn failing(error: ProviderError) -> Self {
        Self {
            failure: Mutex::new(Some(error)),
            ..Self::with_models(default_models())
        }
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for FakeProvider {
    fn id(&self) -> &str {
        "fake"
    }

    fn name(&self) -> &str {
        "Fake"
    }

    fn default_model(&self) -> &str {
        superpost_llm::DEFAULT_MODEL
    }

    fn fallback_models(&self) -> &[Model] {
        &self.models
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<ModelCatalog>> {
        Box::pin(async move {
            Ok(ModelCatalog::new(
                self.models.clone(),
                ModelCatalogSource::ProviderApi,
            ))
        })
    }

    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            match self.failure.lock().unwrap().take() {
                Some(error) => Err(error),
                None => Ok(self.reply.clone()),
            }
        })
    }
}
