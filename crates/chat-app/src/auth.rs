use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use snafu::Snafu;

use crate::chat::view::ConversationView;
use crate::services::AuthService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    pub email: String,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// Avatar badge text: first letter of each display-name word, else the
    /// upper-cased first letter of the email, else `U`.
    pub fn initials(&self) -> String {
        if let Some(display_name) = self.display_name.as_deref().filter(|name| !name.is_empty()) {
            return display_name
                .split(' ')
                .filter_map(|word| word.chars().next())
                .collect();
        }

        self.email
            .chars()
            .next()
            .map(|letter| letter.to_uppercase().collect())
            .unwrap_or_else(|| "U".to_string())
    }

    pub fn first_name(&self) -> Option<&str> {
        self.display_name.as_deref()?.split_whitespace().next()
    }

    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("User")
    }
}

/// Display name a new account is registered with: the email's local part.
pub fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}

/// Errors are shown to the user verbatim and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    #[snafu(display("{message}"))]
    Rejected { stage: &'static str, message: String },
    #[snafu(display("{message}"))]
    Unavailable { stage: &'static str, message: String },
}

impl AuthError {
    pub fn message(&self) -> &str {
        match self {
            Self::Rejected { message, .. } | Self::Unavailable { message, .. } => message,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(UserProfile),
    VerificationRequired { email: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Loading,
    SignedOut,
    SignedIn(UserProfile),
}

impl AuthStatus {
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            Self::SignedIn(profile) => Some(profile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInUser {
    pub profile: UserProfile,
    pub access_token: Option<String>,
}

/// Signed-in user shared between an auth service and the data services that act
/// on that user's behalf.
#[derive(Clone)]
pub struct SessionSlot {
    inner: Arc<ArcSwapOption<SignedInUser>>,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwapOption::empty()),
        }
    }
}

impl SessionSlot {
    pub fn current(&self) -> Option<Arc<SignedInUser>> {
        self.inner.load_full()
    }

    pub fn store(&self, user: SignedInUser) {
        self.inner.store(Some(Arc::new(user)));
    }

    pub fn clear(&self) {
        self.inner.store(None);
    }

    pub fn user_id(&self) -> Option<String> {
        self.current().map(|user| user.profile.id.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.current().and_then(|user| user.access_token.clone())
    }
}

/// Client-side view of the authentication state.
pub struct AuthSession {
    service: Arc<dyn AuthService>,
    status: ArcSwap<AuthStatus>,
}

impl AuthSession {
    pub fn new(service: Arc<dyn AuthService>) -> Self {
        Self {
            service,
            status: ArcSwap::from_pointee(AuthStatus::Loading),
        }
    }

    pub fn status(&self) -> Arc<AuthStatus> {
        self.status.load_full()
    }

    /// Leaves `Loading` by asking the service for an existing session.
    pub fn restore(&self) -> Arc<AuthStatus> {
        let status = match self.service.current_user() {
            Some(profile) => AuthStatus::SignedIn(profile),
            None => AuthStatus::SignedOut,
        };
        self.status.store(Arc::new(status));
        self.status()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<UserProfile> {
        Self::require_credentials(email, password, "auth-session-sign-in")?;

        match self.service.sign_in(email.trim(), password).await {
            Ok(profile) => {
                tracing::info!(user_id = %profile.id, "signed in");
                self.status
                    .store(Arc::new(AuthStatus::SignedIn(profile.clone())));
                Ok(profile)
            }
            Err(error) => {
                tracing::warn!(error = %error, "sign in rejected");
                self.leave_loading();
                Err(error)
            }
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        Self::require_credentials(email, password, "auth-session-sign-up")?;

        match self.service.sign_up(email.trim(), password).await {
            Ok(SignUpOutcome::SignedIn(profile)) => {
                tracing::info!(user_id = %profile.id, "signed up");
                self.status
                    .store(Arc::new(AuthStatus::SignedIn(profile.clone())));
                Ok(SignUpOutcome::SignedIn(profile))
            }
            Ok(outcome) => {
                tracing::info!("sign up requires email verification");
                self.leave_loading();
                Ok(outcome)
            }
            Err(error) => {
                tracing::warn!(error = %error, "sign up rejected");
                self.leave_loading();
                Err(error)
            }
        }
    }

    /// Signs out and resets the conversation view to a fresh chat.
    pub async fn sign_out(&self, view: &ConversationView) -> AuthResult<()> {
        let result = self.service.sign_out().await;
        self.status.store(Arc::new(AuthStatus::SignedOut));
        view.start_new_chat();
        if let Err(error) = &result {
            tracing::warn!(error = %error, "sign out failed upstream; local session cleared");
        }
        result
    }

    fn leave_loading(&self) {
        self.status.rcu(|status| match status.as_ref() {
            AuthStatus::Loading => Arc::new(AuthStatus::SignedOut),
            _ => Arc::clone(status),
        });
    }

    fn require_credentials(email: &str, password: &str, stage: &'static str) -> AuthResult<()> {
        if email.trim().is_empty() || password.is_empty() {
            return RejectedSnafu {
                stage,
                message: "Email and password are required",
            }
            .fail();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAssistant, FakeAuth, FakeData, sample_profile};

    fn profile(display_name: Option<&str>, email: &str) -> UserProfile {
        UserProfile {
            id: "u-1".to_string(),
            display_name: display_name.map(str::to_string),
            email: email.to_string(),
            avatar_url: None,
        }
    }

    #[test]
    fn initials_prefer_display_name_words() {
        assert_eq!(profile(Some("Ada Lovelace"), "ada@x.io").initials(), "AL");
        assert_eq!(profile(Some("ada"), "ada@x.io").initials(), "a");
        assert_eq!(profile(Some("Ada  King"), "ada@x.io").initials(), "AK");
    }

    #[test]
    fn initials_fall_back_to_email_then_placeholder() {
        assert_eq!(profile(None, "grace@x.io").initials(), "G");
        assert_eq!(profile(Some(""), "grace@x.io").initials(), "G");
        assert_eq!(profile(None, "").initials(), "U");
    }

    #[test]
    fn first_name_and_label() {
        let user = profile(Some("Ada Lovelace"), "ada@x.io");
        assert_eq!(user.first_name(), Some("Ada"));
        assert_eq!(user.label(), "Ada Lovelace");
        assert_eq!(profile(None, "a@b").label(), "User");
        assert_eq!(profile(None, "a@b").first_name(), None);
    }

    #[test]
    fn display_name_is_the_email_local_part() {
        assert_eq!(display_name_from_email("grace.hopper@navy.mil"), "grace.hopper");
        assert_eq!(display_name_from_email("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn restore_reports_existing_session() {
        let auth = Arc::new(FakeAuth::default());
        let session = AuthSession::new(auth.clone());
        assert_eq!(*session.status(), AuthStatus::Loading);
        assert_eq!(*session.restore(), AuthStatus::SignedOut);

        auth.session().store(SignedInUser {
            profile: sample_profile(),
            access_token: None,
        });
        assert_eq!(*session.restore(), AuthStatus::SignedIn(sample_profile()));
    }

    #[tokio::test]
    async fn failed_sign_in_surfaces_message_verbatim() {
        let session = AuthSession::new(Arc::new(FakeAuth::rejecting("Incorrect email or password")));

        let error = session.sign_in("ada@x.io", "wrong-pass").await.unwrap_err();
        assert_eq!(error.message(), "Incorrect email or password");
        assert_eq!(*session.status(), AuthStatus::SignedOut);
    }

    #[tokio::test]
    async fn blank_credentials_are_rejected_locally() {
        let auth = Arc::new(FakeAuth::default());
        let session = AuthSession::new(auth.clone());

        assert!(session.sign_in("  ", "secret").await.is_err());
        assert!(session.sign_up("ada@x.io", "").await.is_err());
        assert_eq!(auth.call_count(), 0);
    }

    #[tokio::test]
    async fn sign_up_with_verification_keeps_user_signed_out() {
        let session = AuthSession::new(Arc::new(FakeAuth::requiring_verification()));

        let outcome = session.sign_up("new@x.io", "long-enough").await.unwrap();
        assert_eq!(
            outcome,
            SignUpOutcome::VerificationRequired {
                email: "new@x.io".to_string()
            }
        );
        assert_eq!(*session.status(), AuthStatus::SignedOut);
    }

    #[tokio::test]
    async fn sign_out_clears_status_and_view() {
        let auth = Arc::new(FakeAuth::default());
        let session = AuthSession::new(auth.clone());
        let view = ConversationView::new(
            Arc::new(FakeData::default()),
            Arc::new(FakeAssistant::replying("hi")),
        );

        session.sign_in("ada@x.io", "secret-pass").await.unwrap();
        view.select_conversation(Some(crate::chat::message::ConversationId::new("c-1")));
        view.set_draft("unsent");

        session.sign_out(&view).await.unwrap();
        assert_eq!(*session.status(), AuthStatus::SignedOut);
        let state = view.snapshot();
        assert!(state.current_conversation_id.is_none());
        assert!(state.draft.is_empty());
        assert!(auth.session().current().is_none());
    }
}
