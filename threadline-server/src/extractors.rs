use std::ops::{Deref, DerefMut};

use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};
use threadline_api::{AuthToken, UserId, Uuid};

use crate::{db, Error, RoomFeeds};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub feeds: RoomFeeds,
    pub admin_token: Option<AuthToken>,
}

#[derive(Clone)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Bearer token of the request, not yet checked against the sessions
pub struct PreAuth(pub AuthToken);

/// Parses an `Authorization: Bearer <uuid>` header value
fn bearer_token(header: &http::HeaderValue) -> Option<AuthToken> {
    let (scheme, token) = header.to_str().ok()?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.contains(' ') {
        return None;
    }
    Uuid::try_parse(token).ok().map(AuthToken)
}

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        let header = req
            .headers
            .get(http::header::AUTHORIZATION)
            .ok_or(Error::permission_denied())?;
        match bearer_token(header) {
            Some(token) => Ok(PreAuth(token)),
            None => {
                tracing::debug!("rejecting malformed authorization header");
                Err(Error::permission_denied())
            }
        }
    }
}

pub struct Auth(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        let mut conn = PgConn::from_request_parts(req, state).await?;
        Ok(Auth(db::recover_session(&mut *conn, token).await?))
    }
}

pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<AdminAuth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        if Some(token) == state.admin_token {
            Ok(AdminAuth)
        } else {
            Err(Error::permission_denied())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(header: &str) -> Option<AuthToken> {
        bearer_token(&http::HeaderValue::from_str(header).unwrap())
    }

    #[test]
    fn bearer_header_forms() {
        let token = Uuid::new_v4();
        assert_eq!(parse(&format!("Bearer {token}")), Some(AuthToken(token)));
        assert_eq!(parse(&format!("bEaReR {token}")), Some(AuthToken(token)));
        assert_eq!(parse(&format!("Basic {token}")), None);
        assert_eq!(parse(&format!("Bearer {token} extra")), None);
        assert_eq!(parse(&format!("Bearer  {token}")), None);
        assert_eq!(parse("Bearer"), None);
        assert_eq!(parse("Bearer not-a-uuid"), None);
        assert_eq!(parse(""), None);
    }
}
