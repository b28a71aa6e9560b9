use crate::store::{CredentialRecord, CredentialStore};
use crate::OauthError;
use chrono::{Duration, Utc};
use llm_relay_core::provider::OauthSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Refresh when within this many seconds of expiry.
const REFRESH_THRESHOLD_SECS: i64 = 300;
/// Without an expiry, refresh once the record is this old.
const FALLBACK_REFRESH_INTERVAL_SECS: i64 = 50 * 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Manages per-provider OAuth credentials with proactive refresh.
///
/// Refresh is single-flight per provider: concurrent callers needing a
/// refresh serialize on a per-provider mutex and re-read the store after
/// acquiring it, so only the first performs the token-endpoint POST.
pub struct TokenManager {
    store: CredentialStore,
    http: reqwest::Client,
    /// Soft mode returns the stale record when refresh fails; hard mode errors.
    hard_fail: bool,
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(store: CredentialStore, hard_fail: bool) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            hard_fail,
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Current access token and account id for the provider, refreshing
    /// first when the stored record is near expiry.
    pub async fn access_token(
        &self,
        provider: &str,
        settings: &OauthSettings,
    ) -> Result<(String, Option<String>), OauthError> {
        let record = self
            .store
            .load(provider)?
            .ok_or_else(|| OauthError::NotAuthenticated(provider.to_string()))?;

        if !needs_refresh(&record) {
            return Ok((record.access_token, record.account_id));
        }

        let flight = self.flight_for(provider).await;
        let _guard = flight.lock().await;

        // Another caller may have refreshed while we waited on the flight.
        let record = self
            .store
            .load(provider)?
            .ok_or_else(|| OauthError::NotAuthenticated(provider.to_string()))?;
        if !needs_refresh(&record) {
            return Ok((record.access_token, record.account_id));
        }

        match self.refresh(provider, settings, &record).await {
            Ok(refreshed) => {
                self.store.save(provider, &refreshed)?;
                Ok((refreshed.access_token, refreshed.account_id))
            }
            Err(e) if self.hard_fail => Err(e),
            Err(e) => {
                tracing::warn!(
                    provider,
                    error = %e,
                    "token refresh failed, using stored token (may be stale)"
                );
                Ok((record.access_token, record.account_id))
            }
        }
    }

    async fn refresh(
        &self,
        provider: &str,
        settings: &OauthSettings,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord, OauthError> {
        tracing::debug!(provider, "refreshing access token");

        let response = self
            .http
            .post(&settings.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", record.refresh_token.as_str()),
                ("client_id", settings.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| OauthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OauthError::RefreshFailed(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| OauthError::RefreshFailed(format!("invalid token response: {e}")))?;

        let now = Utc::now();
        Ok(CredentialRecord {
            access_token: payload.access_token,
            refresh_token: payload
                .refresh_token
                .unwrap_or_else(|| record.refresh_token.clone()),
            id_token: payload.id_token.or_else(|| record.id_token.clone()),
            account_id: record.account_id.clone(),
            expires_at: payload.expires_in.map(|secs| now + Duration::seconds(secs)),
            last_refresh: Some(now),
        })
    }

    async fn flight_for(&self, provider: &str) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock().await;
        flights
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn needs_refresh(record: &CredentialRecord) -> bool {
    let now = Utc::now();
    if let Some(expires_at) = record.expires_at {
        return (expires_at - now).num_seconds() < REFRESH_THRESHOLD_SECS;
    }
    if let Some(last_refresh) = record.last_refresh {
        return (now - last_refresh).num_seconds() > FALLBACK_REFRESH_INTERVAL_SECS;
    }
    // No expiry information at all; assume the token is fresh.
    false
}
