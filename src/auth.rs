// OAuth session handling for hosting services that support accounts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ImgurConfig;
use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::settings::SettingsStore;
use crate::transport::{round_trip, HttpRequest, RequestBody, TransportClient};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub account_username: String,
    pub expires_at_epoch_seconds: i64,
}

impl Credentials {
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Stored session for `service_id`, or `None` when no access token is stored.
    pub fn load(settings: &dyn SettingsStore, service_id: &str) -> Option<Self> {
        let keys = CredentialKeys::new(service_id);
        let credentials = Self {
            access_token: settings.get(&keys.access_token).unwrap_or_default(),
            refresh_token: settings.get(&keys.refresh_token).unwrap_or_default(),
            account_username: settings.get(&keys.account_username).unwrap_or_default(),
            expires_at_epoch_seconds: settings
                .get(&keys.expires_in)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        };

        credentials.is_authenticated().then_some(credentials)
    }

    pub fn store(&self, settings: &dyn SettingsStore, service_id: &str) -> AppResult<()> {
        let keys = CredentialKeys::new(service_id);
        settings.set_many(&[
            (keys.access_token, self.access_token.clone()),
            (keys.refresh_token, self.refresh_token.clone()),
            (keys.account_username, self.account_username.clone()),
            (keys.expires_in, self.expires_at_epoch_seconds.to_string()),
        ])?;
        settings.sync()
    }

    pub fn clear(settings: &dyn SettingsStore, service_id: &str) -> AppResult<()> {
        Self::default().store(settings, service_id)
    }
}

struct CredentialKeys {
    access_token: String,
    refresh_token: String,
    account_username: String,
    expires_in: String,
}

impl CredentialKeys {
    fn new(service_id: &str) -> Self {
        Self {
            access_token: format!("{}/access_token", service_id),
            refresh_token: format!("{}/refresh_token", service_id),
            account_username: format!("{}/account_username", service_id),
            expires_in: format!("{}/expires_in", service_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
}

impl From<&ImgurConfig> for OAuthConfig {
    fn from(config: &ImgurConfig) -> Self {
        let base = config.api_base.trim_end_matches('/');
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authorize_url: format!("{}/oauth2/authorize", base),
            token_url: format!("{}/oauth2/token", base),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    account_username: String,
    #[serde(default)]
    expires_in: i64,
}

/// Account session as seen by the upload coordinator.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn service_id(&self) -> &str;

    fn credentials(&self) -> Option<Credentials>;

    /// Page where the user obtains a PIN for `exchange_pin`.
    fn authorize_url(&self) -> String;

    async fn exchange_pin(&self, pin: &str) -> AppResult<Credentials>;

    /// Refresh the stored session using its refresh token.
    async fn refresh_session(&self) -> AppResult<Credentials>;

    fn clear(&self) -> AppResult<()>;
}

pub struct AuthRefresher {
    service_id: String,
    oauth: OAuthConfig,
    transport: Arc<dyn TransportClient>,
    settings: Arc<dyn SettingsStore>,
}

impl AuthRefresher {
    pub fn new(
        service_id: &str,
        oauth: OAuthConfig,
        transport: Arc<dyn TransportClient>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            service_id: service_id.to_string(),
            oauth,
            transport,
            settings,
        }
    }

    pub async fn refresh(&self, existing: &Credentials) -> AppResult<Credentials> {
        if existing.refresh_token.is_empty() {
            return Err(AppError::authentication_required(&self.service_id));
        }

        log::info!("Refreshing {} session", self.service_id);
        let mut credentials = self
            .token_exchange("refresh_token", "refresh_token", &existing.refresh_token)
            .await?;

        // Some providers omit fields that did not change on refresh
        if credentials.refresh_token.is_empty() {
            credentials.refresh_token = existing.refresh_token.clone();
        }
        if credentials.account_username.is_empty() {
            credentials.account_username = existing.account_username.clone();
        }

        credentials.store(self.settings.as_ref(), &self.service_id)?;
        log::info!(
            "Refreshed {} session for {}",
            self.service_id,
            credentials.account_username
        );
        Ok(credentials)
    }

    async fn token_exchange(
        &self,
        grant_type: &str,
        grant_field: &str,
        grant_value: &str,
    ) -> AppResult<Credentials> {
        if self.oauth.client_secret.is_empty() {
            return Err(AppError::Config(format!(
                "No OAuth client secret configured for {}",
                self.service_id
            )));
        }

        let body = RequestBody::Form(vec![
            ("client_id".to_string(), self.oauth.client_id.clone()),
            ("client_secret".to_string(), self.oauth.client_secret.clone()),
            ("grant_type".to_string(), grant_type.to_string()),
            (grant_field.to_string(), grant_value.to_string()),
        ]);
        let request = HttpRequest::post(&self.oauth.token_url, body);

        let response = round_trip(self.transport.as_ref(), request).await?;
        if !response.is_success() {
            return Err(AppError::auth_failed(format!(
                "token endpoint returned HTTP {}",
                response.status
            )));
        }

        parse_token_response(&response.body, chrono::Utc::now().timestamp())
    }
}

fn parse_token_response(body: &[u8], now_epoch_seconds: i64) -> AppResult<Credentials> {
    let token: TokenResponse = serde_json::from_slice(body)
        .map_err(|e| AppError::auth_failed(format!("malformed token response: {}", e)))?;

    if token.access_token.is_empty() {
        return Err(AppError::auth_failed("token response has no access_token"));
    }

    Ok(Credentials {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        account_username: token.account_username,
        expires_at_epoch_seconds: if token.expires_in > 0 {
            now_epoch_seconds + token.expires_in
        } else {
            0
        },
    })
}

#[async_trait]
impl Authenticator for AuthRefresher {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn credentials(&self) -> Option<Credentials> {
        Credentials::load(self.settings.as_ref(), &self.service_id)
    }

    fn authorize_url(&self) -> String {
        format!(
            "{}?client_id={}&response_type=pin",
            self.oauth.authorize_url, self.oauth.client_id
        )
    }

    async fn exchange_pin(&self, pin: &str) -> AppResult<Credentials> {
        InputValidator::validate_pin(pin)?;

        match self.token_exchange("pin", "pin", pin.trim()).await {
            Ok(credentials) => {
                credentials.store(self.settings.as_ref(), &self.service_id)?;
                log::info!(
                    "Authorized {} account {}",
                    self.service_id,
                    credentials.account_username
                );
                Ok(credentials)
            }
            Err(e) => {
                log::error!("{} authorization failed: {}", self.service_id, e);
                if let Err(clear_err) = self.clear() {
                    log::warn!("Failed to clear stored session: {}", clear_err);
                }
                Err(e)
            }
        }
    }

    async fn refresh_session(&self) -> AppResult<Credentials> {
        let existing = self
            .credentials()
            .ok_or_else(|| AppError::authentication_required(&self.service_id))?;
        self.refresh(&existing).await
    }

    fn clear(&self) -> AppResult<()> {
        Credentials::clear(self.settings.as_ref(), &self.service_id)?;
        log::info!("Cleared stored {} session", self.service_id);
        Ok(())
    }
}
