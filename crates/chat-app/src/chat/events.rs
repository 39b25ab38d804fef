use crate::chat::message::{ConversationId, Message};

/// Notice shown when a send cycle fails before the assistant turn was stored.
pub const SEND_FAILED_NOTICE: &str = "Failed to send message. Please try again.";

/// Emitted by conversation selection; the caller lists the messages and hands them
/// back through `ConversationView::merge_fetched`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchIntent {
    Messages {
        conversation_id: ConversationId,
        generation: u64,
    },
}

impl FetchIntent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Messages {
                conversation_id, ..
            } => conversation_id,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            Self::Messages { generation, .. } => *generation,
        }
    }
}

/// Where the stored assistant turn came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyOrigin {
    Assistant,
    StructuredFailure,
    UpstreamError,
    KeywordFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    EmptyInput,
    /// A reply is still pending in this view.
    Busy,
    Delivered {
        conversation_id: ConversationId,
        reply: Message,
        origin: ReplyOrigin,
        /// The view moved to another conversation while the cycle ran.
        detached: bool,
    },
    Failed {
        conversation_id: Option<ConversationId>,
        notice: String,
    },
}

impl SendOutcome {
    pub fn reply(&self) -> Option<&Message> {
        match self {
            Self::Delivered { reply, .. } => Some(reply),
            _ => None,
        }
    }
}
