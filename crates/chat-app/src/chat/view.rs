use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::chat::dedup::dedupe_assistant_replies;
use crate::chat::events::{FetchIntent, ReplyOrigin, SEND_FAILED_NOTICE, SendOutcome};
use crate::chat::fallback::{FallbackStrategy, KeywordFallback};
use crate::chat::message::{ConversationId, Message, Role, conversation_title_from};
use crate::services::{ActionError, AssistantAction, ChatServices, DataService};

/// Stored when the assistant reports failure without a message.
pub const AI_RESPONSE_FAILED_REPLY: &str = "AI response failed";
/// Stored when the assistant action answered with no payload at all.
pub const NO_RESPONSE_REPLY: &str = "Error: No response from AI service";

/// Snapshot of the open conversation as the client renders it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub current_conversation_id: Option<ConversationId>,
    /// Deduplicated, in service order. Always empty without a conversation.
    pub messages: Vec<Message>,
    pub is_composing: bool,
    pub is_awaiting_reply: bool,
    /// Bumped whenever the view switches conversation; send cycles only touch
    /// the view while the generation they started in is still current.
    pub generation: u64,
    pub draft: String,
}

impl ViewState {
    pub fn is_busy(&self) -> bool {
        self.is_composing || self.is_awaiting_reply
    }

    fn with_messages(&self, messages: Vec<Message>) -> Self {
        Self {
            current_conversation_id: self.current_conversation_id.clone(),
            messages,
            is_composing: self.is_composing,
            is_awaiting_reply: self.is_awaiting_reply,
            generation: self.generation,
            draft: self.draft.clone(),
        }
    }

    fn with_busy(&self, busy: bool) -> Self {
        Self {
            is_composing: busy,
            is_awaiting_reply: busy,
            ..self.clone()
        }
    }
}

/// Conversation view state manager.
///
/// Owns the locally held message list of the open conversation and the busy
/// flags of the send cycle. State is swapped wholesale, so conversation
/// selection may run while a send cycle is suspended on the services.
pub struct ConversationView {
    state: ArcSwap<ViewState>,
    data: Arc<dyn DataService>,
    assistant: Arc<dyn AssistantAction>,
    fallback: Arc<dyn FallbackStrategy>,
}

impl ConversationView {
    pub fn new(data: Arc<dyn DataService>, assistant: Arc<dyn AssistantAction>) -> Self {
        Self {
            state: ArcSwap::from_pointee(ViewState::default()),
            data,
            assistant,
            fallback: Arc::new(KeywordFallback::default()),
        }
    }

    pub fn from_services(services: &ChatServices) -> Self {
        Self::new(Arc::clone(&services.data), Arc::clone(&services.assistant))
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackStrategy>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn snapshot(&self) -> Arc<ViewState> {
        self.state.load_full()
    }

    pub fn set_draft(&self, draft: impl Into<String>) {
        let draft = draft.into();
        self.apply(|state| {
            Some(ViewState {
                draft: draft.clone(),
                ..state.clone()
            })
        });
    }

    /// Switches the open conversation. Selecting the current one is a no-op.
    ///
    /// A switch clears the message list and busy flags at once and, for a real
    /// conversation, returns the fetch the caller should run.
    pub fn select_conversation(&self, conversation_id: Option<ConversationId>) -> Option<FetchIntent> {
        let next = self.apply(|state| {
            (state.current_conversation_id != conversation_id).then(|| ViewState {
                current_conversation_id: conversation_id.clone(),
                messages: Vec::new(),
                is_composing: false,
                is_awaiting_reply: false,
                generation: state.generation.wrapping_add(1),
                draft: state.draft.clone(),
            })
        })?;

        tracing::debug!(
            conversation_id = ?next.current_conversation_id,
            generation = next.generation,
            "selected conversation"
        );

        next.current_conversation_id
            .clone()
            .map(|conversation_id| FetchIntent::Messages {
                conversation_id,
                generation: next.generation,
            })
    }

    /// Fresh empty chat: no conversation and no draft.
    pub fn start_new_chat(&self) {
        self.select_conversation(None);
        self.set_draft(String::new());
    }

    /// Replaces the message list with the deduplicated `raw` list.
    ///
    /// Ignored when no conversation is open or when `raw` holds messages of a
    /// different conversation. Returns whether the list was applied.
    pub fn merge_remote_messages(&self, raw: &[Message]) -> bool {
        self.merge_scoped(raw, None)
    }

    /// Applies the result of a [`FetchIntent`] unless the view has moved on.
    pub fn merge_fetched(&self, intent: &FetchIntent, raw: &[Message]) -> bool {
        self.merge_scoped(raw, Some(intent.generation()))
    }

    /// Runs one send cycle for `text` and settles the busy flags on every path.
    pub async fn send_user_message(&self, text: &str) -> SendOutcome {
        let content = text.trim();
        if content.is_empty() {
            return SendOutcome::EmptyInput;
        }

        let Some(started) = self.apply(|state| {
            (!state.is_awaiting_reply).then(|| ViewState {
                draft: String::new(),
                ..state.with_busy(true)
            })
        }) else {
            tracing::debug!("send refused while a reply is pending");
            return SendOutcome::Busy;
        };

        // Runs on drop so cancelled cycles settle too.
        let _settle = SettleGuard {
            view: self,
            generation: started.generation,
        };

        self.run_send_cycle(
            started.generation,
            started.current_conversation_id.clone(),
            content,
        )
        .await
    }

    async fn run_send_cycle(
        &self,
        generation: u64,
        conversation_id: Option<ConversationId>,
        content: &str,
    ) -> SendOutcome {
        let conversation_id = match conversation_id {
            Some(conversation_id) => conversation_id,
            None => match self.open_conversation(generation, content).await {
                Some(conversation_id) => conversation_id,
                None => return Self::failed(None),
            },
        };

        if let Err(error) = self
            .data
            .create_message(&conversation_id, content, Role::User)
            .await
        {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %error,
                "failed to persist user message"
            );
            return Self::failed(Some(conversation_id));
        }

        let (reply_text, origin) = self.resolve_reply(&conversation_id, content).await;
        let reply = match self
            .data
            .create_message(&conversation_id, &reply_text, Role::Assistant)
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "failed to persist assistant reply"
                );
                return Self::failed(Some(conversation_id));
            }
        };

        self.refresh(generation, &conversation_id).await;

        let detached = self.state.load().generation != generation;
        tracing::info!(
            conversation_id = %conversation_id,
            origin = ?origin,
            detached,
            "send cycle finished"
        );
        SendOutcome::Delivered {
            conversation_id,
            reply,
            origin,
            detached,
        }
    }

    async fn open_conversation(&self, generation: u64, content: &str) -> Option<ConversationId> {
        let title = conversation_title_from(content);
        let conversation = match self.data.create_conversation(&title).await {
            Ok(conversation) => conversation,
            Err(error) => {
                tracing::error!(error = %error, "failed to create conversation");
                return None;
            }
        };

        let adopted = self.apply(|state| {
            (state.generation == generation && state.current_conversation_id.is_none()).then(
                || ViewState {
                    current_conversation_id: Some(conversation.id.clone()),
                    messages: Vec::new(),
                    ..state.clone()
                },
            )
        });
        tracing::debug!(
            conversation_id = %conversation.id,
            adopted = adopted.is_some(),
            "created conversation for first message"
        );
        Some(conversation.id)
    }

    async fn resolve_reply(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> (String, ReplyOrigin) {
        match self.assistant.request_reply(conversation_id, content).await {
            Ok(reply) if reply.success => (reply.message, ReplyOrigin::Assistant),
            Ok(reply) if reply.message.is_empty() => (
                AI_RESPONSE_FAILED_REPLY.to_string(),
                ReplyOrigin::StructuredFailure,
            ),
            Ok(reply) => (reply.message, ReplyOrigin::StructuredFailure),
            Err(ActionError::Rejected { message, .. }) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %message,
                    "assistant action rejected the message"
                );
                (format!("Error: {message}"), ReplyOrigin::UpstreamError)
            }
            Err(ActionError::NoResponse { .. }) => {
                tracing::warn!(conversation_id = %conversation_id, "assistant action returned nothing");
                (NO_RESPONSE_REPLY.to_string(), ReplyOrigin::UpstreamError)
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "assistant action unavailable; using keyword fallback"
                );
                (self.fallback.reply_for(content), ReplyOrigin::KeywordFallback)
            }
        }
    }

    async fn refresh(&self, generation: u64, conversation_id: &ConversationId) {
        match self.data.list_messages(conversation_id).await {
            Ok(raw) => {
                let applied = self.merge_scoped(&raw, Some(generation));
                tracing::debug!(
                    conversation_id = %conversation_id,
                    raw_count = raw.len(),
                    applied,
                    "refreshed conversation after reply"
                );
            }
            Err(error) => tracing::warn!(
                conversation_id = %conversation_id,
                error = %error,
                "failed to refresh conversation after reply"
            ),
        }
    }

    fn merge_scoped(&self, raw: &[Message], generation: Option<u64>) -> bool {
        let merged = dedupe_assistant_replies(raw);
        let applied = self.apply(|state| {
            let current = state.current_conversation_id.as_ref()?;
            let in_scope = generation.is_none_or(|generation| generation == state.generation)
                && raw
                    .iter()
                    .all(|message| &message.conversation_id == current);
            in_scope.then(|| state.with_messages(merged.clone()))
        });

        if applied.is_none() {
            tracing::debug!(raw_count = raw.len(), "ignored out-of-scope message merge");
        }
        applied.is_some()
    }

    fn settle(&self, generation: u64) {
        self.apply(|state| {
            (state.generation == generation && state.is_busy()).then(|| state.with_busy(false))
        });
    }

    /// Replaces the state when `transition` yields a successor; returns it.
    fn apply<F>(&self, mut transition: F) -> Option<Arc<ViewState>>
    where
        F: FnMut(&ViewState) -> Option<ViewState>,
    {
        let mut applied = None;
        self.state.rcu(|current| match transition(current.as_ref()) {
            Some(next) => {
                let next = Arc::new(next);
                applied = Some(Arc::clone(&next));
                next
            }
            None => {
                applied = None;
                Arc::clone(current)
            }
        });
        applied
    }

    fn failed(conversation_id: Option<ConversationId>) -> SendOutcome {
        SendOutcome::Failed {
            conversation_id,
            notice: SEND_FAILED_NOTICE.to_string(),
        }
    }
}

struct SettleGuard<'a> {
    view: &'a ConversationView,
    generation: u64,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.view.settle(self.generation);
    }
}
