use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection, SqlitePool};

use super::error::{
    ConflictSnafu, CreateSqliteDirectorySnafu, InvalidCredentialsSnafu, InvariantViolationSnafu,
    NotFoundSnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, SqliteQuerySnafu, SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu,
    StorageError, StorageResult,
};
use super::ids::{ChatId, MessageId, UserId};
use super::password::{MIN_PASSWORD_LENGTH, PasswordDigest};
use super::types::{
    ChatRecord, DEFAULT_CHAT_TITLE, MessageRecord, MessageRole, NewChat, NewMessage, NewUser,
    UserRecord,
};
use super::{ChatStore, MessageStore, UserStore};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// SQLite-backed store.
///
/// Every store call opens its own connection on a worker thread, so `:memory:`
/// databases do not survive between calls; use a file path for anything real.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "sqlite storage ready");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call gets a worker thread with its own
        // current-thread runtime; this keeps callers inside a runtime from nesting block_on.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl UserStore for SqliteStorage {
    fn create_user(&self, input: NewUser) -> StorageResult<UserRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("user-create", async move {
            let email = normalize_email(&input.email);
            ensure!(
                !email.is_empty(),
                ConflictSnafu {
                    stage: "user-create-validate-email",
                    entity: "user",
                    details: "email must not be empty".to_string(),
                }
            );
            ensure!(
                input.password.chars().count() >= MIN_PASSWORD_LENGTH,
                ConflictSnafu {
                    stage: "user-create-validate-password",
                    entity: "user",
                    details: format!("password must be at least {MIN_PASSWORD_LENGTH} characters"),
                }
            );

            let mut connection = connect_store_connection(&database_url, "user-create-connect").await?;
            let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM users WHERE email = ? LIMIT 1")
                .bind(&email)
                .fetch_optional(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "user-create-check-email",
                })?;
            ensure!(
                existing.is_none(),
                ConflictSnafu {
                    stage: "user-create-duplicate-email",
                    entity: "user",
                    details: "email already in use".to_string(),
                }
            );

            let user_id = UserId::generate();
            let digest = PasswordDigest::derive(&input.password)?;
            let display_name = input
                .display_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty());
            let now = unix_timestamp_millis();

            sqlx::query(
                "INSERT INTO users (id, email, display_name, avatar_url, password_hash, created_at) VALUES (?, ?, ?, NULL, ?, ?)",
            )
            .bind(user_id.to_string())
            .bind(&email)
            .bind(display_name.clone())
            .bind(digest.as_phc())
            .bind(now)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "user-create-insert",
            })?;

            Ok(UserRecord {
                id: user_id,
                email,
                display_name,
                avatar_url: None,
                created_at_unix_millis: i64_to_u64(now, "user-create-created-at")?,
            })
        })
    }

    fn authenticate_user(&self, email: &str, password: &str) -> StorageResult<UserRecord> {
        let database_url = self.database_url.clone();
        let email = normalize_email(email);
        let password = password.to_string();
        self.run_db_call("user-authenticate", async move {
            let mut connection =
                connect_store_connection(&database_url, "user-authenticate-connect").await?;
            let row = sqlx::query_as::<_, CredentialRow>(
                "SELECT id, email, display_name, avatar_url, password_hash, created_at FROM users WHERE email = ?",
            )
            .bind(&email)
            .fetch_optional(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "user-authenticate-query",
            })?
            .context(InvalidCredentialsSnafu {
                stage: "user-authenticate-unknown-email",
                email: email.clone(),
            })?;

            ensure!(
                PasswordDigest::from_phc(row.password_hash).matches(&password),
                InvalidCredentialsSnafu {
                    stage: "user-authenticate-password",
                    email,
                }
            );

            user_row_to_record(UserRow {
                id: row.id,
                email: row.email,
                display_name: row.display_name,
                avatar_url: row.avatar_url,
                created_at: row.created_at,
            })
        })
    }

    fn get_user(&self, user_id: UserId) -> StorageResult<Option<UserRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("user-get", async move {
            let mut connection = connect_store_connection(&database_url, "user-get-connect").await?;
            let row = sqlx::query_as::<_, UserRow>(
                "SELECT id, email, display_name, avatar_url, created_at FROM users WHERE id = ?",
            )
            .bind(user_id.to_string())
            .fetch_optional(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "user-get-query",
            })?;

            row.map(user_row_to_record).transpose()
        })
    }
}

impl ChatStore for SqliteStorage {
    fn create_chat(&self, input: NewChat) -> StorageResult<ChatRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("chat-create", async move {
            let mut connection = connect_store_connection(&database_url, "chat-create-connect").await?;
            ensure_user_exists(&mut connection, input.user_id, "chat-create-user-missing").await?;

            let title = if input.title.trim().is_empty() {
                DEFAULT_CHAT_TITLE.to_string()
            } else {
                input.title
            };
            let chat_id = ChatId::generate();
            let now = unix_timestamp_millis();

            sqlx::query(
                "INSERT INTO chats (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chat_id.to_string())
            .bind(input.user_id.to_string())
            .bind(&title)
            .bind(now)
            .bind(now)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-create-insert",
            })?;

            let created_at = i64_to_u64(now, "chat-create-created-at")?;
            Ok(ChatRecord {
                id: chat_id,
                user_id: input.user_id,
                title,
                created_at_unix_millis: created_at,
                updated_at_unix_millis: created_at,
            })
        })
    }

    fn list_chats(&self, user_id: UserId) -> StorageResult<Vec<ChatRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("chat-list", async move {
            let mut connection = connect_store_connection(&database_url, "chat-list-connect").await?;
            let rows = sqlx::query_as::<_, ChatRow>(
                "SELECT id, user_id, title, created_at, updated_at FROM chats WHERE user_id = ? ORDER BY created_at DESC, id DESC",
            )
            .bind(user_id.to_string())
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-list-query",
            })?;

            rows.into_iter().map(chat_row_to_record).collect()
        })
    }

    fn get_chat(&self, chat_id: ChatId) -> StorageResult<Option<ChatRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("chat-get", async move {
            let mut connection = connect_store_connection(&database_url, "chat-get-connect").await?;
            let row = sqlx::query_as::<_, ChatRow>(
                "SELECT id, user_id, title, created_at, updated_at FROM chats WHERE id = ?",
            )
            .bind(chat_id.to_string())
            .fetch_optional(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-get-query",
            })?;

            row.map(chat_row_to_record).transpose()
        })
    }
}

impl MessageStore for SqliteStorage {
    fn append_message(&self, chat_id: ChatId, input: NewMessage) -> StorageResult<MessageRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-append", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-append-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-append-begin",
            })?;

            let chat_exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM chats WHERE id = ? LIMIT 1")
                .bind(chat_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-append-check-chat",
                })?;
            ensure!(
                chat_exists.is_some(),
                NotFoundSnafu {
                    stage: "message-append-chat-missing",
                    entity: "chat",
                    id: chat_id.to_string(),
                }
            );

            let next_seq = sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE chat_id = ?",
            )
            .bind(chat_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-next-seq",
            })?;

            let message_id = MessageId::generate();
            let now = unix_timestamp_millis();

            sqlx::query(
                "INSERT INTO messages (id, chat_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(chat_id.to_string())
            .bind(next_seq)
            .bind(role_to_sql(input.role))
            .bind(&input.content)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-insert",
            })?;

            sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(chat_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-append-touch-chat",
                })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-append-commit",
            })?;

            Ok(MessageRecord {
                id: message_id,
                chat_id,
                seq: i64_to_u64(next_seq, "message-append-seq")?,
                role: input.role,
                content: input.content,
                created_at_unix_millis: i64_to_u64(now, "message-append-created-at")?,
            })
        })
    }

    fn list_messages(&self, chat_id: ChatId) -> StorageResult<Vec<MessageRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-list", async move {
            let mut connection = connect_store_connection(&database_url, "message-list-connect").await?;
            ensure_chat_exists(&mut connection, chat_id, "message-list-chat-missing").await?;

            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, chat_id, seq, role, content, created_at FROM messages WHERE chat_id = ? ORDER BY created_at ASC, seq ASC",
            )
            .bind(chat_id.to_string())
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    email: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct CredentialRow {
    id: String,
    email: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    password_hash: String,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct ChatRow {
    id: String,
    user_id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    seq: i64,
    role: String,
    content: String,
    created_at: i64,
}

fn user_row_to_record(row: UserRow) -> StorageResult<UserRecord> {
    Ok(UserRecord {
        id: UserId::parse(&row.id)?,
        email: row.email,
        display_name: row.display_name,
        avatar_url: row.avatar_url,
        created_at_unix_millis: i64_to_u64(row.created_at, "user-row-created-at")?,
    })
}

fn chat_row_to_record(row: ChatRow) -> StorageResult<ChatRecord> {
    Ok(ChatRecord {
        id: ChatId::parse(&row.id)?,
        user_id: UserId::parse(&row.user_id)?,
        title: row.title,
        created_at_unix_millis: i64_to_u64(row.created_at, "chat-row-created-at")?,
        updated_at_unix_millis: i64_to_u64(row.updated_at, "chat-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        chat_id: ChatId::parse(&row.chat_id)?,
        seq: i64_to_u64(row.seq, "message-row-seq")?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        created_at_unix_millis: i64_to_u64(row.created_at, "message-row-created-at")?,
    })
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-foreign-keys",
            pragma: "foreign_keys",
        })?;
    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

async fn ensure_user_exists(
    connection: &mut SqliteConnection,
    user_id: UserId,
    stage: &'static str,
) -> StorageResult<()> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM users WHERE id = ? LIMIT 1")
        .bind(user_id.to_string())
        .fetch_optional(&mut *connection)
        .await
        .context(SqliteQuerySnafu {
            stage: "user-exists-query",
        })?;

    existing.map(|_| ()).context(NotFoundSnafu {
        stage,
        entity: "user",
        id: user_id.to_string(),
    })
}

async fn ensure_chat_exists(
    connection: &mut SqliteConnection,
    chat_id: ChatId,
    stage: &'static str,
) -> StorageResult<()> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM chats WHERE id = ? LIMIT 1")
        .bind(chat_id.to_string())
        .fetch_optional(&mut *connection)
        .await
        .context(SqliteQuerySnafu {
            stage: "chat-exists-query",
        })?;

    existing.map(|_| ()).context(NotFoundSnafu {
        stage,
        entity: "chat",
        id: chat_id.to_string(),
    })
}

fn role_to_sql(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
