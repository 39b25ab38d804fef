pub mod dedup;
pub mod events;
pub mod fallback;
pub mod message;
pub mod sidebar;
pub mod view;

pub use dedup::{DEDUP_WINDOW, dedupe_assistant_replies};
pub use events::{FetchIntent, ReplyOrigin, SEND_FAILED_NOTICE, SendOutcome};
pub use fallback::{FallbackStrategy, KeywordFallback};
pub use message::{
    Conversation, ConversationId, Message, MessageId, Role, TITLE_MAX_CHARS,
    conversation_title_from,
};
pub use sidebar::SidebarState;
pub use view::{ConversationView, ViewState};
