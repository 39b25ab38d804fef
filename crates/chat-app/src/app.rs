use std::sync::Arc;

use chrono::Utc;
use snafu::Snafu;
use superpost_llm::LlmProvider;

use crate::auth::{AuthSession, AuthStatus, SignUpOutcome};
use crate::chat::message::{Message, Role};
use crate::chat::sidebar::{SidebarItem, conversation_badge};
use crate::chat::{ConversationView, FetchIntent, SendOutcome, SidebarState};
use crate::hosted::HostedError;
use crate::model_selector::ModelSelector;
use crate::services::{ChatServices, ServiceError};
use crate::settings::SettingsError;

pub const HELP_TEXT: &str = "\
Commands:
  /signin EMAIL PASSWORD   sign in
  /signup EMAIL PASSWORD   create an account
  /signout                 sign out
  /chats [QUERY]           list conversations, optionally filtered by title
  /open N                  open conversation N from the last listing
  /new                     start a new chat
  /sidebar                 collapse or expand the conversation list
  /models                  list models
  /model ID                select a model
  /help                    show this help
  /quit                    exit
Any other line is sent as a message.";
const SIGN_IN_FIRST: &str = "Sign in first with /signin EMAIL PASSWORD";
const REPLY_PENDING: &str = "A reply is still pending";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ShellError {
    #[snafu(display("failed to load settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to open the local store on `{stage}`: {source}"))]
    OpenStorage {
        stage: &'static str,
        source: superpost_storage::StorageError,
    },
    #[snafu(display("failed to set up the hosted backend on `{stage}`: {source}"))]
    HostedSetup {
        stage: &'static str,
        source: HostedError,
    },
    #[snafu(display("chat service lifecycle failed on `{stage}`: {source}"))]
    Lifecycle {
        stage: &'static str,
        source: ServiceError,
    },
    #[snafu(display("terminal I/O failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    SignIn { email: String, password: String },
    SignUp { email: String, password: String },
    SignOut,
    Chats { query: String },
    Open(usize),
    NewChat,
    ToggleSidebar,
    Models,
    Model(String),
    Help,
    Quit,
    Send(String),
    Invalid(&'static str),
}

impl ShellCommand {
    /// `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Self::Send(line.to_string()));
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim()))
            .unwrap_or((command, ""));

        let parsed = match name {
            "signin" | "signup" => match rest.split_once(char::is_whitespace) {
                Some((email, password)) => {
                    let email = email.to_string();
                    let password = password.trim().to_string();
                    if name == "signin" {
                        Self::SignIn { email, password }
                    } else {
                        Self::SignUp { email, password }
                    }
                }
                None => Self::Invalid("usage: /signin EMAIL PASSWORD"),
            },
            "signout" => Self::SignOut,
            "chats" => Self::Chats {
                query: rest.to_string(),
            },
            "open" => match rest.parse::<usize>() {
                Ok(index) if index > 0 => Self::Open(index),
                _ => Self::Invalid("usage: /open N"),
            },
            "new" => Self::NewChat,
            "sidebar" => Self::ToggleSidebar,
            "models" => Self::Models,
            "model" if !rest.is_empty() => Self::Model(rest.to_string()),
            "model" => Self::Invalid("usage: /model ID"),
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => Self::Invalid("unknown command, try /help"),
        };
        Some(parsed)
    }
}

/// What the shell prints after a command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub lines: Vec<String>,
    pub quit: bool,
}

impl ShellOutput {
    fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            quit: false,
        }
    }

    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

/// Terminal chat client wiring auth, sidebar, model selection and the
/// conversation view over one service set.
pub struct ChatShell {
    services: ChatServices,
    auth: AuthSession,
    view: ConversationView,
    sidebar: SidebarState,
    selector: ModelSelector,
    provider: Option<Arc<dyn LlmProvider>>,
}

impl ChatShell {
    pub fn new(
        services: ChatServices,
        selector: ModelSelector,
        provider: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            auth: AuthSession::new(Arc::clone(&services.auth)),
            view: ConversationView::from_services(&services),
            sidebar: SidebarState::new(),
            selector,
            provider,
            services,
        }
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn sidebar(&self) -> &SidebarState {
        &self.sidebar
    }

    /// Restores an existing session and loads its conversations.
    pub async fn start(&mut self) -> ShellOutput {
        let status = self.auth.restore();
        match status.user() {
            Some(user) => {
                let mut output = ShellOutput::line(format!("Welcome back, {}", user.label()));
                self.reload_conversations(&mut output).await;
                output
            }
            None => ShellOutput::line(SIGN_IN_FIRST),
        }
    }

    pub async fn execute(&mut self, command: ShellCommand) -> ShellOutput {
        match command {
            ShellCommand::SignIn { email, password } => self.sign_in(&email, &password).await,
            ShellCommand::SignUp { email, password } => self.sign_up(&email, &password).await,
            ShellCommand::SignOut => self.sign_out().await,
            ShellCommand::Chats { query } => {
                self.sidebar.set_search(query);
                self.render_sidebar()
            }
            ShellCommand::Open(index) => self.open(index).await,
            ShellCommand::NewChat => {
                self.view.start_new_chat();
                self.sidebar.select(None);
                ShellOutput::line("Started a new chat")
            }
            ShellCommand::ToggleSidebar => {
                self.sidebar.toggle_collapsed();
                self.render_sidebar()
            }
            ShellCommand::Models => self.list_models().await,
            ShellCommand::Model(model_id) => {
                let resolved = self.selector.select(&model_id).map(|model| model.id.clone());
                match resolved {
                    Some(id) if id == model_id => ShellOutput::line(format!(
                        "Using {}",
                        self.selector.current_model_display_name()
                    )),
                    _ => ShellOutput::line(format!(
                        "Unknown model {model_id}; using {}",
                        self.selector.current_model_display_name()
                    )),
                }
            }
            ShellCommand::Help => ShellOutput::line(HELP_TEXT),
            ShellCommand::Quit => ShellOutput {
                lines: Vec::new(),
                quit: true,
            },
            ShellCommand::Send(text) => self.send(&text).await,
            ShellCommand::Invalid(usage) => ShellOutput::line(usage),
        }
    }

    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.services.dispose().await
    }

    async fn sign_in(&mut self, email: &str, password: &str) -> ShellOutput {
        match self.auth.sign_in(email, password).await {
            Ok(profile) => {
                let mut output = ShellOutput::line(format!("Signed in as {}", profile.label()));
                self.reload_conversations(&mut output).await;
                output
            }
            Err(error) => ShellOutput::line(error.message()),
        }
    }

    async fn sign_up(&mut self, email: &str, password: &str) -> ShellOutput {
        match self.auth.sign_up(email, password).await {
            Ok(SignUpOutcome::SignedIn(profile)) => {
                let mut output = ShellOutput::line(format!("Welcome, {}", profile.label()));
                self.reload_conversations(&mut output).await;
                output
            }
            Ok(SignUpOutcome::VerificationRequired { email }) => ShellOutput::line(format!(
                "Check {email} for a verification link, then sign in"
            )),
            Err(error) => ShellOutput::line(error.message()),
        }
    }

    async fn sign_out(&mut self) -> ShellOutput {
        let result = self.auth.sign_out(&self.view).await;
        self.sidebar.set_conversations(Vec::new());
        self.sidebar.set_search("");
        match result {
            Ok(()) => ShellOutput::line("Signed out"),
            Err(error) => ShellOutput::line(format!("Signed out locally: {}", error.message())),
        }
    }

    async fn open(&mut self, index: usize) -> ShellOutput {
        let visible = self.sidebar.visible();
        let Some(conversation) = index
            .checked_sub(1)
            .and_then(|position| visible.get(position))
            .map(|c| (*c).clone())
        else {
            return ShellOutput::line(format!("No conversation {index} in the list"));
        };

        self.sidebar.select(Some(conversation.id.clone()));
        let mut output = ShellOutput::line(format!("# {}", conversation.title));
        if let Some(intent) = self.view.select_conversation(Some(conversation.id)) {
            self.load_messages(&intent).await;
        }
        output.lines.extend(self.view.snapshot().messages.iter().map(render_message));
        output
    }

    async fn send(&mut self, text: &str) -> ShellOutput {
        if !matches!(*self.auth.status(), AuthStatus::SignedIn(_)) {
            return ShellOutput::line(SIGN_IN_FIRST);
        }

        let started_in = self.view.snapshot().current_conversation_id.clone();
        match self.view.send_user_message(text).await {
            SendOutcome::EmptyInput => ShellOutput::default(),
            SendOutcome::Busy => ShellOutput::line(REPLY_PENDING),
            SendOutcome::Failed { notice, .. } => ShellOutput::line(notice),
            SendOutcome::Delivered {
                conversation_id,
                reply,
                ..
            } => {
                let mut output = ShellOutput::line(render_message(&reply));
                if started_in.as_ref() != Some(&conversation_id) {
                    let mut reload = ShellOutput::default();
                    self.reload_conversations(&mut reload).await;
                    output.lines.extend(reload.lines);
                }
                self.sidebar.select(self.view.snapshot().current_conversation_id.clone());
                output
            }
        }
    }

    async fn list_models(&mut self) -> ShellOutput {
        let mut output = ShellOutput::default();
        if let Some(provider) = &self.provider {
            if let Err(error) = self.selector.refresh(provider.as_ref()).await {
                tracing::warn!(error = %error, "model list refresh failed");
                output.push(format!("Could not refresh models: {error}"));
            }
        }
        if let Some(warning) = self.selector.catalog_warning() {
            output.push(warning.to_string());
        }

        let current = self.selector.current_model_id();
        for model in self.selector.models() {
            let marker = if model.id == current { "*" } else { " " };
            output.push(format!("{marker} {} ({})", model.id, model.name));
        }
        output
    }

    async fn load_messages(&self, intent: &FetchIntent) {
        match self.services.data.list_messages(intent.conversation_id()).await {
            Ok(messages) => {
                self.view.merge_fetched(intent, &messages);
            }
            Err(error) => tracing::warn!(
                conversation_id = %intent.conversation_id(),
                error = %error,
                "failed to load conversation messages"
            ),
        }
    }

    async fn reload_conversations(&mut self, output: &mut ShellOutput) {
        let Some(user_id) = self.auth.status().user().map(|user| user.id.clone()) else {
            self.sidebar.set_conversations(Vec::new());
            return;
        };

        match self.services.data.list_conversations(&user_id).await {
            Ok(conversations) => {
                tracing::debug!(count = conversations.len(), "loaded conversations");
                self.sidebar.set_conversations(conversations);
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to load conversations");
                output.push("Could not load your conversations");
            }
        }
    }

    fn render_sidebar(&self) -> ShellOutput {
        let mut output = ShellOutput::default();
        let items = self.sidebar.grouped(Utc::now());
        if items.is_empty() {
            output.push(self.sidebar.empty_label());
            return output;
        }

        let mut index = 0;
        for item in items {
            match item {
                SidebarItem::GroupHeader(group) if !self.sidebar.is_collapsed() => {
                    output.push(group.label());
                }
                SidebarItem::GroupHeader(_) => {}
                SidebarItem::Conversation(conversation) => {
                    index += 1;
                    let marker = if self.sidebar.selected_conversation() == Some(&conversation.id)
                    {
                        ">"
                    } else {
                        " "
                    };
                    let label = if self.sidebar.is_collapsed() {
                        conversation_badge(&conversation.title)
                    } else {
                        conversation.title.clone()
                    };
                    output.push(format!("{marker}{index:>3}. {label}"));
                }
            }
        }
        output
    }
}

fn render_message(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    format!("{speaker}: {}", message.content)
}
