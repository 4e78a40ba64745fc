use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;

use crate::config::ServiceConfig;
use crate::errors::AuthError;
use crate::events::{ClientEvent, EventEmitter};

/// The authenticated identity, as issued by the identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub id_token: String,
}

impl Identity {
    /// Display name shown to other users: the email local part.
    pub fn display_name(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(rename = "localId")]
    local_id: String,
    email: String,
    #[serde(rename = "idToken")]
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Email/password client for the hosted identity service.
///
/// Holds the current identity and exposes it as a watch channel; every
/// change is also emitted as [`ClientEvent::AuthStateChanged`].
pub struct AuthService {
    http: reqwest::Client,
    auth_url: String,
    api_key: String,
    identity: watch::Sender<Option<Identity>>,
    emitter: EventEmitter,
}

impl AuthService {
    pub(crate) fn new(config: &ServiceConfig, emitter: EventEmitter) -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            http: reqwest::Client::new(),
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            identity,
            emitter,
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = self.request("accounts:signUp", email, password).await?;
        self.apply(Some(identity.clone()));
        Ok(identity)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = self
            .request("accounts:signInWithPassword", email, password)
            .await?;
        self.apply(Some(identity.clone()));
        Ok(identity)
    }

    /// Drop the current identity. Local only; the service keeps no
    /// session state worth revoking for this client.
    pub fn sign_out(&self) {
        self.apply(None);
    }

    /// Install an externally obtained identity (a restored session).
    pub fn adopt_identity(&self, identity: Identity) {
        self.apply(Some(identity));
    }

    pub fn current(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    /// Subscribable "current identity changed" feed.
    pub fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    fn apply(&self, identity: Option<Identity>) {
        tracing::info!(
            "auth state changed: {}",
            if identity.is_some() { "signed in" } else { "signed out" }
        );
        self.identity.send_replace(identity.clone());
        self.emitter.emit(ClientEvent::AuthStateChanged(identity));
    }

    async fn request(
        &self,
        endpoint: &str,
        email: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        let url = format!("{}/v1/{endpoint}?key={}", self.auth_url, self.api_key);
        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let body: ErrorBody = resp
                .json()
                .await
                .map_err(|e| AuthError::Service(e.to_string()))?;
            return Err(Self::map_code(&body.error.message));
        }

        let account: AccountResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Service(format!("invalid account response: {e}")))?;

        Ok(Identity {
            uid: account.local_id,
            email: account.email,
            id_token: account.id_token,
        })
    }

    /// Map the service's string error codes to the closed error set.
    /// The boundary classification happens here and nowhere else.
    fn map_code(code: &str) -> AuthError {
        // WEAK_PASSWORD arrives with a trailing explanation.
        let head = code.split_whitespace().next().unwrap_or(code);
        match head {
            "INVALID_EMAIL" => AuthError::InvalidEmail,
            "USER_DISABLED" => AuthError::UserDisabled,
            "EMAIL_NOT_FOUND" => AuthError::UserNotFound,
            "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => AuthError::WrongPassword,
            "EMAIL_EXISTS" => AuthError::EmailAlreadyInUse,
            "WEAK_PASSWORD" => AuthError::WeakPassword,
            other => AuthError::Service(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(email: &str) -> Identity {
        Identity {
            uid: "u1".into(),
            email: email.into(),
            id_token: "tok".into(),
        }
    }

    #[test]
    fn display_name_is_email_local_part() {
        assert_eq!(identity("alice@example.com").display_name(), "alice");
        assert_eq!(identity("no-at-sign").display_name(), "no-at-sign");
    }

    #[test]
    fn error_code_mapping_is_total_over_the_vendor_table() {
        assert_eq!(AuthService::map_code("INVALID_EMAIL"), AuthError::InvalidEmail);
        assert_eq!(AuthService::map_code("USER_DISABLED"), AuthError::UserDisabled);
        assert_eq!(AuthService::map_code("EMAIL_NOT_FOUND"), AuthError::UserNotFound);
        assert_eq!(AuthService::map_code("INVALID_PASSWORD"), AuthError::WrongPassword);
        assert_eq!(AuthService::map_code("EMAIL_EXISTS"), AuthError::EmailAlreadyInUse);
        assert_eq!(
            AuthService::map_code("WEAK_PASSWORD : Password should be at least 6 characters"),
            AuthError::WeakPassword
        );
        assert!(matches!(
            AuthService::map_code("TOO_MANY_ATTEMPTS_TRY_LATER"),
            AuthError::Service(_)
        ));
    }

    #[tokio::test]
    async fn adopt_and_sign_out_drive_the_watch_channel() {
        let auth = AuthService::new(&ServiceConfig::default(), EventEmitter::new());
        let mut rx = auth.watch();
        assert!(auth.current().is_none());

        auth.adopt_identity(identity("alice@example.com"));
        rx.changed().await.unwrap();
        assert_eq!(auth.current().unwrap().email, "alice@example.com");

        auth.sign_out();
        rx.changed().await.unwrap();
        assert!(auth.current().is_none());
    }
}
