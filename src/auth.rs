use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use subtle::ConstantTimeEq;

use spendlog_core::DEFAULT_OWNER;

use crate::{config::AuthConfig, store::ExpenseStore};

/// Authenticated caller, available to handlers via request extensions. Every
/// row the caller reads or writes is scoped to `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub owner: String,
}

#[derive(Clone)]
pub struct AuthState {
    pub config: Arc<AuthConfig>,
    pub store: ExpenseStore,
}

#[derive(Serialize)]
struct AuthError {
    success: bool,
    error: String,
}

fn unauthorized(message: &str) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(AuthError {
            success: false,
            error: message.to_string(),
        }),
    )
        .into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        header::HeaderValue::from_static("Basic realm=\"spendlog\""),
    );
    response
}

enum Credentials {
    ApiKey(String),
    Basic { username: String, password: String },
}

fn credentials(headers: &HeaderMap) -> Option<Credentials> {
    if let Some(key) = headers.get("X-API-Key").and_then(|v| v.to_str().ok()) {
        return Some(Credentials::ApiKey(key.to_string()));
    }

    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    if let Some(encoded) = value.strip_prefix("Basic ") {
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        return Some(Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
    }
    Some(Credentials::ApiKey(
        value.strip_prefix("Bearer ").unwrap_or(value).to_string(),
    ))
}

pub async fn auth_middleware<B>(
    State(state): State<AuthState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    if !state.config.enabled {
        req.extensions_mut().insert(CallerIdentity {
            owner: DEFAULT_OWNER.to_string(),
        });
        return next.run(req).await;
    }

    let owner = match credentials(req.headers()) {
        Some(Credentials::ApiKey(key)) => {
            match state
                .config
                .api_keys
                .iter()
                .find(|entry| entry.key.as_bytes().ct_eq(key.as_bytes()).into())
            {
                Some(entry) => entry.name.clone(),
                None => {
                    tracing::warn!("Invalid API key presented");
                    return unauthorized("Invalid API key");
                }
            }
        }
        Some(Credentials::Basic { username, password }) => {
            let store = state.store.clone();
            let verified = tokio::task::spawn_blocking(move || store.verify_credentials(&username, &password))
                .await
                .ok()
                .flatten();
            match verified {
                Some(user) => user.username,
                None => {
                    tracing::warn!("Invalid username or password presented");
                    return unauthorized("Invalid username or password");
                }
            }
        }
        None => {
            return unauthorized(
                "Missing credentials. Provide X-API-Key, Authorization: Bearer <key> or HTTP Basic",
            );
        }
    };

    tracing::debug!(caller = %owner, "Authenticated request");
    req.extensions_mut().insert(CallerIdentity { owner });
    next.run(req).await
}
