use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    routing::{delete, get, post},
    Router,
};
use threadline_api::{AuthToken, Uuid};

mod db;
mod error;
mod extractors;
mod feeds;
mod handlers;

#[cfg(test)]
mod tests;

use error::Error;
use extractors::{AppState, PgPool};
use feeds::RoomFeeds;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(structopt::StructOpt)]
struct Opt {
    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Bearer token allowed to create users, admin routes are disabled if unset
    #[structopt(long, env = "ADMIN_TOKEN")]
    admin_token: Option<Uuid>,
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/users", get(handlers::fetch_users))
        .route(
            "/api/comments",
            get(handlers::fetch_comments).post(handlers::create_comment),
        )
        .route("/api/comments/:id", delete(handlers::delete_comment))
        .route("/ws/comment-feed", get(handlers::comment_feed))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    if opt.admin_token.is_none() {
        tracing::info!("no ADMIN_TOKEN set, user creation is disabled");
    }

    let db = create_sqlx_pool(&opt.database_url).await?;
    MIGRATOR
        .run(&db)
        .await
        .context("applying database migrations")?;

    let state = AppState {
        db: PgPool::new(db),
        feeds: RoomFeeds::new(),
        admin_token: opt.admin_token.map(AuthToken),
    };

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app(state).into_make_service())
        .await
        .context("serving axum webserver")
}
