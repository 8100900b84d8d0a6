use anyhow::Context;
use chrono::{SubsecRound, Utc};
use futures::TryStreamExt;
use threadline_api::{
    ArticleId, AuthToken, CommentId, CommentRecord, NewComment, NewSession, NewUser, Time, User,
    UserId, Uuid,
};

use crate::Error;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    full_name: String,
    avatar_url: Option<String>,
}

impl From<UserRow> for User {
    fn from(u: UserRow) -> User {
        User {
            id: UserId(u.id),
            full_name: u.full_name,
            avatar_url: u.avatar_url,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    article_id: Uuid,
    author_id: Uuid,
    content: String,
    created_at: Time,
    reply_to: Option<Uuid>,
}

impl From<CommentRow> for CommentRecord {
    fn from(c: CommentRow) -> CommentRecord {
        CommentRecord {
            id: CommentId(c.id),
            article_id: ArticleId(c.article_id),
            author_id: UserId(c.author_id),
            content: c.content,
            created_at: c.created_at,
            reply_to: c.reply_to.map(CommentId),
        }
    }
}

pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<(), Error> {
    let conflict = sqlx::query_as::<_, (Uuid, String)>(
        "SELECT id, name FROM users WHERE id = $1 OR name = $2",
    )
    .bind(u.id.0)
    .bind(&u.name)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("checking for conflicts with user {:?}", u.id))?;
    match conflict {
        Some((id, _)) if id == u.id.0 => return Err(Error::uuid_already_used(id)),
        Some((_, name)) => return Err(Error::name_already_used(name)),
        None => (),
    }

    sqlx::query(
        "INSERT INTO users (id, name, full_name, avatar_url, password) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(u.id.0)
    .bind(&u.name)
    .bind(&u.full_name)
    .bind(&u.avatar_url)
    .bind(&u.initial_password_hash)
    .execute(conn)
    .await
    .with_context(|| format!("inserting user {:?}", u.id))?;
    Ok(())
}

pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    s: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let user = sqlx::query_as::<_, (Uuid, String)>("SELECT id, password FROM users WHERE name = $1")
        .bind(&s.user)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("fetching password hash of user {:?}", s.user))?;
    let Some((user_id, hash)) = user else {
        return Ok(None);
    };
    if !bcrypt::verify(&s.password, &hash)
        .with_context(|| format!("checking password of user {:?}", s.user))?
    {
        return Ok(None);
    }

    let session = AuthToken(Uuid::new_v4());
    let now = Utc::now();
    sqlx::query("INSERT INTO sessions VALUES ($1, $2, $3, $4, $5)")
        .bind(session.0)
        .bind(user_id)
        .bind(&s.device)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await
        .with_context(|| format!("inserting session for user {:?}", s.user))?;
    Ok(Some(session))
}

/// Returns true iff the session existed
pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() == 1)
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let user = sqlx::query_as::<_, (Uuid,)>(
        "UPDATE sessions SET last_active = $1 WHERE id = $2 RETURNING user_id",
    )
    .bind(Utc::now())
    .bind(token.0)
    .fetch_optional(conn)
    .await
    .context("recovering session")?;
    match user {
        Some((id,)) => Ok(UserId(id)),
        None => Err(Error::permission_denied()),
    }
}

pub async fn fetch_user(conn: &mut sqlx::PgConnection, user: UserId) -> anyhow::Result<User> {
    Ok(sqlx::query_as::<_, UserRow>(
        "SELECT id, full_name, avatar_url FROM users WHERE id = $1",
    )
    .bind(user.0)
    .fetch_one(conn)
    .await
    .with_context(|| format!("fetching user {user:?}"))?
    .into())
}

pub async fn fetch_users(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<User>> {
    sqlx::query_as::<_, UserRow>("SELECT id, full_name, avatar_url FROM users")
        .fetch(conn)
        .map_ok(User::from)
        .try_collect::<Vec<_>>()
        .await
        .context("querying users table")
}

const COMMENT_FIELDS: &str = "id, article_id, author_id, content, created_at, reply_to";

pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    article: ArticleId,
) -> anyhow::Result<Vec<CommentRecord>> {
    sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {COMMENT_FIELDS} FROM comments WHERE article_id = $1 ORDER BY created_at"
    ))
    .bind(article.0)
    .fetch(conn)
    .map_ok(CommentRecord::from)
    .try_collect::<Vec<_>>()
    .await
    .with_context(|| format!("querying comments of article {article:?}"))
}

pub async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    id: CommentId,
) -> anyhow::Result<Option<CommentRecord>> {
    Ok(sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {COMMENT_FIELDS} FROM comments WHERE id = $1"
    ))
    .bind(id.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("fetching comment {id:?}"))?
    .map(CommentRecord::from))
}

/// Stores a validated comment under a fresh id
pub async fn create_comment(
    conn: &mut sqlx::PgConnection,
    c: NewComment,
) -> Result<CommentRecord, Error> {
    if let Some(parent) = c.reply_to {
        match fetch_comment(&mut *conn, parent).await? {
            Some(p) if p.is_root() && p.article_id == c.article_id => (),
            Some(_) => return Err(Error::invalid_parent(parent)),
            None => return Err(Error::unknown_comment(parent)),
        }
    }

    let mut record = c.into_record(CommentId(Uuid::new_v4()));
    // postgres keeps microseconds, and relayed records must match what is stored
    record.created_at = record.created_at.trunc_subsecs(6);
    sqlx::query(&format!(
        "INSERT INTO comments ({COMMENT_FIELDS}) VALUES ($1, $2, $3, $4, $5, $6)"
    ))
    .bind(record.id.0)
    .bind(record.article_id.0)
    .bind(record.author_id.0)
    .bind(&record.content)
    .bind(record.created_at)
    .bind(record.reply_to.map(|p| p.0))
    .execute(conn)
    .await
    .with_context(|| format!("inserting comment {:?}", record.id))?;
    Ok(record)
}

/// Deletes one of `user`'s comments along with its replies, returning the
/// number of comments removed
pub async fn delete_comment(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    id: CommentId,
) -> Result<u64, Error> {
    match fetch_comment(&mut *conn, id).await? {
        None => return Err(Error::unknown_comment(id)),
        Some(c) if c.author_id != user => return Err(Error::permission_denied()),
        Some(_) => (),
    }
    let res = sqlx::query("DELETE FROM comments WHERE id = $1 OR reply_to = $1")
        .bind(id.0)
        .execute(conn)
        .await
        .with_context(|| format!("deleting comment {id:?}"))?;
    Ok(res.rows_affected())
}

/// Whether `comment` is exactly the record stored under its id
pub async fn is_stored(
    conn: &mut sqlx::PgConnection,
    comment: &CommentRecord,
) -> anyhow::Result<bool> {
    Ok(fetch_comment(conn, comment.id).await?.as_ref() == Some(comment))
}
