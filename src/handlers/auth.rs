//! Request extractors for the authenticated caller and the client origin.
//!
//! Tokens are issued elsewhere; this module only verifies HS256 bearer tokens
//! and turns their claims into a `Caller`.

use super::AppState;
use crate::{errors::AppError, models::caller::Caller, models::object::AccessOrigin};
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr};

/// Claims carried by access tokens.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub user_id: i64,
    pub is_admin: bool,
    pub exp: usize,
}

/// Verification key shared by all requests.
#[derive(Clone)]
pub struct AuthKeys {
    decoding: DecodingKey,
}

impl AuthKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Caller, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(Caller {
            user_id: data.claims.user_id,
            is_admin: data.claims.is_admin,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Any signed-in user.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Caller);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::unauthenticated("Authorization header required"))?;
        let caller = state.auth.verify(token).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            AppError::unauthenticated("Invalid token")
        })?;
        Ok(AuthUser(caller))
    }
}

/// A signed-in user with the admin flag set.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub Caller);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(caller) = AuthUser::from_request_parts(parts, state).await?;
        if !caller.is_admin {
            return Err(AppError::forbidden("Admin access required"));
        }
        Ok(AdminUser(caller))
    }
}

/// Origin details recorded with each access event.
#[derive(Debug, Clone)]
pub struct ClientInfo(pub AccessOrigin);

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let client_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientInfo(AccessOrigin {
            client_origin: forwarded.or(peer).unwrap_or_else(|| "unknown".into()),
            client_agent,
        }))
    }
}
