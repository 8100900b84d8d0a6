use anyhow::Context;
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    Json,
};
use futures::StreamExt;
use threadline_api::{
    ArticleId, AuthToken, CommentId, CommentRecord, NewComment, NewSession, NewUser, User, Uuid,
};

use crate::{db, extractors::*, Error, RoomFeeds};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, data).await
}

pub async fn auth(
    mut conn: PgConn,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or(Error::permission_denied())?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth, mut conn: PgConn) -> Result<Json<User>, Error> {
    Ok(Json(db::fetch_user(&mut *conn, user).await?))
}

pub async fn fetch_users(mut conn: PgConn) -> Result<Json<Vec<User>>, Error> {
    Ok(Json(db::fetch_users(&mut *conn).await?))
}

#[derive(serde::Deserialize)]
pub struct ArticleQuery {
    article_id: Uuid,
}

pub async fn fetch_comments(
    Query(q): Query<ArticleQuery>,
    mut conn: PgConn,
) -> Result<Json<Vec<CommentRecord>>, Error> {
    Ok(Json(
        db::fetch_comments(&mut *conn, ArticleId(q.article_id)).await?,
    ))
}

pub async fn create_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(c): Json<NewComment>,
) -> Result<Json<CommentRecord>, Error> {
    if c.author_id != user {
        return Err(Error::permission_denied());
    }
    c.validate()?;
    let record = db::create_comment(&mut *conn, c).await?;
    tracing::debug!(id = ?record.id, article = ?record.article_id, "stored comment");
    Ok(Json(record))
}

pub async fn delete_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
) -> Result<(), Error> {
    let removed = db::delete_comment(&mut *conn, user, CommentId(id)).await?;
    tracing::debug!(?id, removed, "deleted comment");
    Ok(())
}

pub async fn comment_feed(
    ws: WebSocketUpgrade,
    State(db): State<PgPool>,
    State(feeds): State<RoomFeeds>,
) -> Result<axum::response::Response, Error> {
    Ok(ws.on_upgrade(move |sock| {
        tracing::debug!("comment feed websocket connected");
        let (write, read) = sock.split();
        feeds.add_socket(db, write, read)
    }))
}
