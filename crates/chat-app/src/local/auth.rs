use std::sync::Arc;

use superpost_storage::password::MIN_PASSWORD_LENGTH;
use superpost_storage::{NewUser, SqliteStorage, StorageError, UserStore};

use super::{profile_from_record, run_blocking};
use crate::auth::{
    AuthError, AuthResult, SessionSlot, SignUpOutcome, SignedInUser, UserProfile,
    display_name_from_email,
};
use crate::services::{AuthService, BoxFuture, ServiceError};

pub const EMAIL_IN_USE: &str = "Email already in use";
pub const INCORRECT_CREDENTIALS: &str = "Incorrect email or password";

/// Accounts kept in the local SQLite store; sign up signs in immediately.
pub struct LocalAuth {
    storage: Arc<SqliteStorage>,
    session: SessionSlot,
}

impl LocalAuth {
    pub fn new(storage: Arc<SqliteStorage>, session: SessionSlot) -> Self {
        Self { storage, session }
    }

    fn adopt(&self, profile: UserProfile) -> UserProfile {
        self.session.store(SignedInUser {
            profile: profile.clone(),
            access_token: None,
        });
        profile
    }
}

impl AuthService for LocalAuth {
    fn current_user(&self) -> Option<UserProfile> {
        self.session.current().map(|user| user.profile.clone())
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<UserProfile>> {
        Box::pin(async move {
            let email_owned = email.to_string();
            let password_owned = password.to_string();
            let record = run_blocking(&self.storage, "local-sign-in", move |storage| {
                storage.authenticate_user(&email_owned, &password_owned)
            })
            .await
            .map_err(|error| auth_error_from(error, "local-sign-in"))?;
            Ok(self.adopt(profile_from_record(record)))
        })
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<SignUpOutcome>> {
        Box::pin(async move {
            let input = NewUser {
                email: email.to_string(),
                password: password.to_string(),
                display_name: Some(display_name_from_email(email)),
            };
            let record = run_blocking(&self.storage, "local-sign-up", move |storage| {
                storage.create_user(input)
            })
            .await
            .map_err(|error| auth_error_from(error, "local-sign-up"))?;
            Ok(SignUpOutcome::SignedIn(
                self.adopt(profile_from_record(record)),
            ))
        })
    }

    fn sign_out<'a>(&'a self) -> BoxFuture<'a, AuthResult<()>> {
        Box::pin(async move {
            self.session.clear();
            Ok(())
        })
    }
}

fn auth_error_from(error: ServiceError, stage: &'static str) -> AuthError {
    let message = match &error {
        ServiceError::Storage {
            source: StorageError::InvalidCredentials { .. },
            ..
        } => INCORRECT_CREDENTIALS.to_string(),
        ServiceError::Storage {
            source: StorageError::Conflict { stage: conflict, .. },
            ..
        } => match *conflict {
            "user-create-duplicate-email" => EMAIL_IN_USE.to_string(),
            "user-create-validate-password" => {
                format!("Password must be at least {MIN_PASSWORD_LENGTH} characters")
            }
            _ => "Email is required".to_string(),
        },
        _ => {
            tracing::error!(error = %error, "local auth store failed");
            return AuthError::Unavailable {
                stage,
                message: error.to_string(),
            };
        }
    };

    AuthError::Rejected { stage, message }
}
