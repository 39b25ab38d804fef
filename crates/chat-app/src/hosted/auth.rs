use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::auth::{
    AuthError, AuthResult, SessionSlot, SignUpOutcome, SignedInUser, UserProfile,
    display_name_from_email,
};
use crate::services::{AuthService, BoxFuture};

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<SignUpOptions>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignUpOptions {
    display_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

pub(crate) const SESSION_EXPIRED: &str = "Your session has expired. Please sign in again";

/// Renews the access token held in the shared session slot.
pub trait SessionRefresher: Send + Sync {
    /// `stale_access_token` is the token a rejected request carried; when the slot already
    /// holds a different one, another caller refreshed first and no request is made.
    fn refresh_session<'a>(
        &'a self,
        stale_access_token: Option<&'a str>,
    ) -> BoxFuture<'a, AuthResult<UserProfile>>;
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    session: Option<NhostSession>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NhostSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: NhostUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NhostUser {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl From<NhostUser> for UserProfile {
    fn from(user: NhostUser) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name.filter(|name| !name.is_empty()),
            email: user.email.unwrap_or_default(),
            avatar_url: user.avatar_url.filter(|url| !url.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NhostErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Email/password client for the hosted auth REST service.
pub struct HostedAuth {
    http: reqwest::Client,
    endpoint: String,
    session: SessionSlot,
    refresh_token: ArcSwapOption<String>,
    refresh_lock: Mutex<()>,
}

impl HostedAuth {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, session: SessionSlot) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            session,
            refresh_token: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &SessionSlot {
        &self.session
    }

    async fn post<B, R>(&self, path: &str, body: &B, stage: &'static str) -> AuthResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|error| AuthError::Unavailable {
                stage,
                message: error.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| AuthError::Unavailable {
                stage,
                message: error.to_string(),
            })?;

        if !status.is_success() {
            return Err(rejection_from_body(status.as_u16(), &text, stage));
        }

        serde_json::from_str(&text).map_err(|error| AuthError::Unavailable {
            stage,
            message: format!("unexpected auth response: {error}"),
        })
    }

    fn adopt(&self, session: NhostSession) -> UserProfile {
        let profile = UserProfile::from(session.user);
        self.refresh_token
            .store(session.refresh_token.map(Arc::new));
        self.session.store(SignedInUser {
            profile: profile.clone(),
            access_token: Some(session.access_token),
        });
        profile
    }

    fn forget_session(&self) {
        self.refresh_token.store(None);
        self.session.clear();
    }
}

impl SessionRefresher for HostedAuth {
    fn refresh_session<'a>(
        &'a self,
        stale_access_token: Option<&'a str>,
    ) -> BoxFuture<'a, AuthResult<UserProfile>> {
        Box::pin(async move {
            let _guard = self.refresh_lock.lock().await;

            if let Some(current) = self.session.current() {
                let already_renewed = current.access_token.is_some()
                    && current.access_token.as_deref() != stale_access_token;
                if already_renewed {
                    return Ok(current.profile.clone());
                }
            }

            let Some(refresh_token) = self.refresh_token.load_full() else {
                return Err(AuthError::Rejected {
                    stage: "hosted-refresh-missing-token",
                    message: SESSION_EXPIRED.to_string(),
                });
            };

            let body = RefreshRequest {
                refresh_token: refresh_token.as_str(),
            };
            match self.post::<_, NhostSession>("token", &body, "hosted-refresh").await {
                Ok(session) => {
                    tracing::debug!(user_id = %session.user.id, "hosted session refreshed");
                    Ok(self.adopt(session))
                }
                Err(error @ AuthError::Rejected { .. }) => {
                    tracing::warn!(error = %error, "refresh token rejected; signing out");
                    self.forget_session();
                    Err(AuthError::Rejected {
                        stage: "hosted-refresh",
                        message: SESSION_EXPIRED.to_string(),
                    })
                }
                Err(error) => Err(error),
            }
        })
    }
}

impl AuthService for HostedAuth {
    fn current_user(&self) -> Option<UserProfile> {
        self.session.current().map(|user| user.profile.clone())
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<UserProfile>> {
        Box::pin(async move {
            let body = Credentials {
                email,
                password,
                options: None,
            };
            let envelope: SessionEnvelope = self
                .post("signin/email-password", &body, "hosted-sign-in")
                .await?;
            let session = envelope.session.ok_or_else(|| AuthError::Rejected {
                stage: "hosted-sign-in-session",
                message: "Sign in did not return a session".to_string(),
            })?;
            Ok(self.adopt(session))
        })
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<SignUpOutcome>> {
        Box::pin(async move {
            let body = Credentials {
                email,
                password,
                options: Some(SignUpOptions {
                    display_name: display_name_from_email(email),
                }),
            };
            let envelope: SessionEnvelope = self
                .post("signup/email-password", &body, "hosted-sign-up")
                .await?;
            Ok(match envelope.session {
                Some(session) => SignUpOutcome::SignedIn(self.adopt(session)),
                None => SignUpOutcome::VerificationRequired {
                    email: email.to_string(),
                },
            })
        })
    }

    fn sign_out<'a>(&'a self) -> BoxFuture<'a, AuthResult<()>> {
        Box::pin(async move {
            let refresh_token = self.refresh_token.swap(None);
            self.session.clear();

            let Some(refresh_token) = refresh_token else {
                return Ok(());
            };
            let body = serde_json::json!({ "refreshToken": refresh_token.as_str() });
            self.post::<_, serde_json::Value>("signout", &body, "hosted-sign-out")
                .await
                .map(|_| ())
        })
    }
}

fn rejection_from_body(status: u16, body: &str, stage: &'static str) -> AuthError {
    let message = serde_json::from_str::<NhostErrorBody>(body)
        .ok()
        .and_then(|error| error.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("Authentication failed with status {status}"));

    AuthError::Rejected { stage, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_message_is_used_verbatim() {
        let error = rejection_from_body(
            401,
            r#"{"status":401,"message":"Incorrect email or password","error":"invalid-email-password"}"#,
            "test",
        );
        assert_eq!(error.message(), "Incorrect email or password");
    }

    #[test]
    fn unreadable_error_body_reports_status() {
        let error = rejection_from_body(502, "<html>bad gateway</html>", "test");
        assert_eq!(error.message(), "Authentication failed with status 502");
    }

    #[test]
    fn sign_up_body_carries_display_name() {
        let body = serde_json::to_value(Credentials {
            email: "grace@navy.mil",
            password: "secret-pass",
            options: Some(SignUpOptions {
                display_name: display_name_from_email("grace@navy.mil"),
            }),
        })
        .unwrap();
        assert_eq!(body["options"]["displayName"], "grace");

        let body = serde_json::to_value(Credentials {
            email: "grace@navy.mil",
            password: "secret-pass",
            options: None,
        })
        .unwrap();
        assert!(body.get("options").is_none());
    }

    #[test]
    fn session_envelope_without_session_means_verification() {
        let envelope: SessionEnvelope = serde_json::from_str(r#"{"session":null}"#).unwrap();
        assert!(envelope.session.is_none());
    }

    #[test]
    fn adopting_a_session_fills_the_slot() {
        let auth = HostedAuth::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/v1",
            SessionSlot::default(),
        );
        let envelope: SessionEnvelope = serde_json::from_str(
            r#"{"session":{"accessToken":"jwt","refreshToken":"r-1","user":{"id":"u-1","displayName":"","email":"ada@x.io","avatarUrl":""}}}"#,
        )
        .unwrap();

        let profile = auth.adopt(envelope.session.unwrap());
        assert_eq!(profile.display_name, None);
        assert_eq!(profile.initials(), "A");
        assert_eq!(auth.session().access_token().as_deref(), Some("jwt"));
        assert_eq!(auth.current_user(), Some(profile));
    }

    fn signed_in_auth(access_token: &str) -> HostedAuth {
        let auth = HostedAuth::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/v1",
            SessionSlot::default(),
        );
        auth.session().store(SignedInUser {
            profile: UserProfile {
                id: "u-1".to_string(),
                display_name: None,
                email: "ada@x.io".to_string(),
                avatar_url: None,
            },
            access_token: Some(access_token.to_string()),
        });
        auth
    }

    #[test]
    fn refresh_body_carries_the_refresh_token() {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: "r-1",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "refreshToken": "r-1" }));
    }

    #[test]
    fn refreshed_session_replaces_both_tokens() {
        let auth = signed_in_auth("jwt-old");
        let refreshed: NhostSession = serde_json::from_str(
            r#"{"accessToken":"jwt-new","accessTokenExpiresIn":900,"refreshToken":"r-2","refreshTokenId":"rt-9","user":{"id":"u-1","displayName":"Ada","email":"ada@x.io"}}"#,
        )
        .unwrap();

        let profile = auth.adopt(refreshed);
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
        assert_eq!(auth.session().access_token().as_deref(), Some("jwt-new"));
        assert_eq!(
            auth.refresh_token.load_full().as_deref().map(String::as_str),
            Some("r-2")
        );
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_asks_for_sign_in() {
        let auth = signed_in_auth("jwt-old");

        let error = auth.refresh_session(Some("jwt-old")).await.unwrap_err();
        assert_eq!(error.message(), SESSION_EXPIRED);
        assert_eq!(auth.session().access_token().as_deref(), Some("jwt-old"));
    }

    #[tokio::test]
    async fn refresh_is_skipped_when_another_caller_already_renewed() {
        let auth = signed_in_auth("jwt-new");
        auth.refresh_token.store(Some(Arc::new("r-2".to_string())));

        let profile = auth.refresh_session(Some("jwt-old")).await.unwrap();
        assert_eq!(profile.id, "u-1");
        assert_eq!(auth.session().access_token().as_deref(), Some("jwt-new"));
    }

    #[tokio::test]
    async fn unreachable_auth_service_keeps_the_session() {
        let auth = signed_in_auth("jwt-old");
        auth.refresh_token.store(Some(Arc::new("r-1".to_string())));

        let error = auth.refresh_session(Some("jwt-old")).await.unwrap_err();
        assert!(matches!(error, AuthError::Unavailable { .. }));
        assert!(auth.current_user().is_some());
    }

    #[tokio::test]
    async fn sign_out_without_refresh_token_stays_local() {
        let auth = HostedAuth::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/v1",
            SessionSlot::default(),
        );
        auth.session().store(SignedInUser {
            profile: UserProfile {
                id: "u-1".to_string(),
                display_name: None,
                email: "ada@x.io".to_string(),
                avatar_url: None,
            },
            access_token: Some("jwt".to_string()),
        });

        auth.sign_out().await.unwrap();
        assert!(auth.current_user().is_none());
    }
}
