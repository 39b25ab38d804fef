pub mod error;
pub mod ids;
pub mod password;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ChatId, MessageId, UserId};
pub use sqlite::SqliteStorage;
pub use types::{
    ChatRecord, DEFAULT_CHAT_TITLE, MessageRecord, MessageRole, NewChat, NewMessage, NewUser,
    UserRecord,
};

pub trait UserStore: Send + Sync {
    fn create_user(&self, input: NewUser) -> StorageResult<UserRecord>;
    /// Returns the user only when the password matches the stored hash.
    fn authenticate_user(&self, email: &str, password: &str) -> StorageResult<UserRecord>;
    fn get_user(&self, user_id: UserId) -> StorageResult<Option<UserRecord>>;
}

pub trait ChatStore: Send + Sync {
    fn create_chat(&self, input: NewChat) -> StorageResult<ChatRecord>;
    /// Newest first by creation time.
    fn list_chats(&self, user_id: UserId) -> StorageResult<Vec<ChatRecord>>;
    fn get_chat(&self, chat_id: ChatId) -> StorageResult<Option<ChatRecord>>;
}

pub trait MessageStore: Send + Sync {
    fn append_message(&self, chat_id: ChatId, input: NewMessage) -> StorageResult<MessageRecord>;
    /// Oldest first by creation time.
    fn list_messages(&self, chat_id: ChatId) -> StorageResult<Vec<MessageRecord>>;
}

pub trait Storage: UserStore + ChatStore + MessageStore {}

impl<T> Storage for T where T: UserStore + ChatStore + MessageStore {}
