//! ==============================================================================
//! auth.rs - oauth2 authorization-code flow for the tag api
//! ==============================================================================
//!
//! purpose:
//!     obtains the bearer token the api client needs. a short-lived local
//!     listener serves two routes:
//!
//!         GET /start      -> 303 to {api}/oauth2/authorize.aspx
//!         GET /authorize  <- the browser returns here with ?code=...
//!
//!     the code is exchanged at {api}/oauth2/access_token.aspx and the token is
//!     handed to the waiting caller over a one-shot channel. the listener then
//!     shuts down. neither url has to be reachable from the api servers, only
//!     from the user's browser.
//!
//! relationships:
//!     - used by: main.rs (`init`, and `run` when no token is stored)
//!     - the token ends up in watermark::WatermarkStore and is persisted there
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::config::TagSyncConfig;

#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl OAuthClient {
    pub fn new(base_url: &str, client_id: &str, client_secret: &str, redirect_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_url: redirect_url.to_string(),
        }
    }

    /// where the browser is sent to approve access
    pub fn authorize_url(&self) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/oauth2/authorize.aspx", self.base_url),
            &[("client_id", self.client_id.as_str()), ("redirect_uri", self.redirect_url.as_str())],
        )
        .context("building authorize url")?;
        Ok(url.to_string())
    }

    /// trade the code from the browser for an access token
    pub async fn exchange_code(&self, code: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/oauth2/access_token.aspx", self.base_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .context("token endpoint unreachable")?;

        let status = resp.status();
        let body = resp.text().await.context("reading token response")?;
        if !status.is_success() {
            return Err(anyhow!("token endpoint returned {status}: {body}"));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).with_context(|| format!("unexpected token response: {body}"))?;
        if token.access_token.is_empty() {
            return Err(anyhow!("token endpoint returned an empty access_token"));
        }
        Ok(token.access_token)
    }
}

// ==============================================================================
// callback listener
// ==============================================================================

#[derive(Clone)]
struct CallbackState {
    oauth: Arc<OAuthClient>,
    // taken by the first successful /authorize
    ready: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

#[derive(Deserialize)]
struct AuthorizeParams {
    code: Option<String>,
}

/// run the authorization flow described by the config and wait for the token
pub async fn acquire_credential(config: &TagSyncConfig) -> Result<String> {
    config.require_oauth()?;

    let listener = TcpListener::bind(("0.0.0.0", config.http.port))
        .await
        .with_context(|| format!("binding callback listener on port {}", config.http.port))?;
    let port = listener.local_addr()?.port();

    let redirect_url = format!("http://{}:{}/authorize", config.http.host, port);
    let oauth = OAuthClient::new(&config.api.base_url, &config.oauth.id, &config.oauth.secret, &redirect_url);

    info!(
        "ready! go to http://{}:{}/start to authorize access",
        config.http.host, port
    );
    await_callback(listener, oauth).await
}

/// serve /start and /authorize on `listener` until one code exchange succeeds
pub async fn await_callback(listener: TcpListener, oauth: OAuthClient) -> Result<String> {
    let (token_tx, token_rx) = oneshot::channel::<String>();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let state = CallbackState {
        oauth: Arc::new(oauth),
        ready: Arc::new(Mutex::new(Some(token_tx))),
    };
    let app = Router::new()
        .route("/start", get(start_handler))
        .route("/authorize", get(authorize_handler))
        .with_state(state);

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    let token = token_rx
        .await
        .context("callback listener stopped before a token was issued")?;

    shutdown_tx.send(()).ok();
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "callback listener shut down with an error"),
        Err(e) => warn!(error = %e, "callback listener task failed"),
        Ok(Ok(())) => {}
    }
    Ok(token)
}

async fn start_handler(State(state): State<CallbackState>) -> Response {
    match state.oauth.authorize_url() {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response(),
    }
}

async fn authorize_handler(
    State(state): State<CallbackState>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing ?code= from the authorization page").into_response();
    };
    info!("got authorization code from browser");

    let token = match state.oauth.exchange_code(&code).await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "code exchange failed");
            return (StatusCode::BAD_GATEWAY, format!("code exchange failed: {e:#}")).into_response();
        }
    };

    match state.ready.lock().await.take() {
        Some(tx) => {
            tx.send(token).ok();
            info!("access token received");
            Html("<p>authorized. tag-sync can take it from here, you may close this window.</p>").into_response()
        }
        None => (StatusCode::CONFLICT, "already authorized").into_response(),
    }
}
