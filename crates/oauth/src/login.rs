use crate::OauthError;
use crate::pkce::{self, PkceCodes};
use crate::store::{CredentialRecord, CredentialStore};
use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use chrono::{Duration as ChronoDuration, Utc};
use llm_relay_core::provider::OauthSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    account_id: Option<String>,
}

type CallbackSender = oneshot::Sender<HashMap<String, String>>;

#[derive(Clone)]
struct CallbackState {
    sender: Arc<Mutex<Option<CallbackSender>>>,
}

/// Interactive one-shot OAuth 2.0 + PKCE login.
///
/// Binds a loopback callback server, hands the operator the authorization
/// URL, waits for the redirect, exchanges the code, and persists the
/// resulting credentials. Nothing is written on any failure path.
pub struct LoginFlow {
    provider: String,
    settings: OauthSettings,
    store: CredentialStore,
    timeout: Duration,
}

impl LoginFlow {
    pub fn new(provider: impl Into<String>, settings: OauthSettings, store: CredentialStore) -> Self {
        Self {
            provider: provider.into(),
            settings,
            store,
            timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self) -> Result<CredentialRecord, OauthError> {
        self.run_with(|url| {
            println!("Open this URL in your browser to authenticate:\n\n{url}\n");
        })
        .await
    }

    /// Run the flow, handing the authorization URL to `present_url` once the
    /// callback server is listening.
    pub async fn run_with(
        &self,
        present_url: impl FnOnce(&str),
    ) -> Result<CredentialRecord, OauthError> {
        let pkce = pkce::generate_pkce();
        let state_param = pkce::random_state();

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", self.settings.callback_port))
            .await
            .map_err(|e| OauthError::Storage(format!("cannot bind callback server: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| OauthError::Storage(format!("cannot read callback address: {e}")))?
            .port();
        let redirect_uri = format!("http://localhost:{port}/callback");

        let (tx, rx) = oneshot::channel();
        let callback_state = CallbackState {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(callback_state);

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let auth_url = self.auth_url(&pkce, &state_param, &redirect_uri);
        present_url(&auth_url);

        let result = self
            .await_callback(rx, &pkce, &state_param, &redirect_uri)
            .await;
        server.abort();
        result
    }

    async fn await_callback(
        &self,
        rx: oneshot::Receiver<HashMap<String, String>>,
        pkce: &PkceCodes,
        expected_state: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, OauthError> {
        let params = tokio::time::timeout(self.timeout, rx)
            .await
            .map_err(|_| OauthError::Timeout)?
            .map_err(|_| OauthError::Timeout)?;

        if let Some(error) = params.get("error") {
            return Err(OauthError::ExchangeFailed {
                status: 0,
                body: format!("authorization denied: {error}"),
            });
        }
        if params.get("state").map(String::as_str) != Some(expected_state) {
            return Err(OauthError::StateMismatch);
        }
        let code = params.get("code").ok_or_else(|| OauthError::ExchangeFailed {
            status: 0,
            body: "callback missing authorization code".into(),
        })?;

        let record = self.exchange_code(code, &pkce.verifier, redirect_uri).await?;
        self.store.save(&self.provider, &record)?;
        tracing::info!(provider = %self.provider, "login complete, credentials stored");
        Ok(record)
    }

    fn auth_url(&self, pkce: &PkceCodes, state: &str, redirect_uri: &str) -> String {
        let mut pairs = vec![
            ("response_type", "code"),
            ("client_id", self.settings.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("state", state),
        ];
        let scope = self.settings.scopes.join(" ");
        if !scope.is_empty() {
            pairs.push(("scope", scope.as_str()));
        }
        let query = serde_urlencoded::to_string(&pairs).expect("static query pairs encode");
        format!("{}?{query}", self.settings.authorize_url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, OauthError> {
        let response = reqwest::Client::new()
            .post(&self.settings.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", verifier),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| OauthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OauthError::ExchangeFailed {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let payload: TokenResponse =
            response.json().await.map_err(|e| OauthError::ExchangeFailed {
                status: status.as_u16(),
                body: format!("invalid token response: {e}"),
            })?;

        let now = Utc::now();
        Ok(CredentialRecord {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token.unwrap_or_default(),
            id_token: payload.id_token,
            account_id: payload.account_id,
            expires_at: payload
                .expires_in
                .map(|secs| now + ChronoDuration::seconds(secs)),
            last_refresh: Some(now),
        })
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    if let Some(tx) = state.sender.lock().expect("callback sender lock").take() {
        let _ = tx.send(params);
        Html("<html><body>Login complete. You can close this tab.</body></html>")
    } else {
        Html("<html><body>Login already completed.</body></html>")
    }
}
