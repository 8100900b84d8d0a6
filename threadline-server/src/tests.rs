use std::{panic::AssertUnwindSafe, time::Duration};

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{self, Request, StatusCode},
};
use threadline_api::{ArticleId, Error as ApiError, NewComment, UserId};
use tower::ServiceExt;

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .for_each(move |v: &$typ| {
                    let () = runtime.block_on($fn(v.clone()));
                })
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token: String| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

#[tokio::test]
async fn preauth_reads_bearer_tokens() {
    let token = Uuid::new_v4();
    let (mut req, ()) = http::Request::builder()
        .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
        .body(())
        .unwrap()
        .into_parts();
    let PreAuth(parsed) = PreAuth::from_request_parts(&mut req, &()).await.unwrap();
    assert_eq!(parsed, AuthToken(token));

    let (mut req, ()) = http::Request::builder()
        .header(http::header::AUTHORIZATION, format!("Basic {token}"))
        .body(())
        .unwrap()
        .into_parts();
    assert!(PreAuth::from_request_parts(&mut req, &()).await.is_err());
}

/// State whose database is never reachable, for requests refused before
/// touching it
fn offline_state(admin_token: Option<AuthToken>) -> AppState {
    let db = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(100))
        .connect_lazy("postgres://threadline@127.0.0.1:1/threadline")
        .expect("creating lazy pool");
    AppState {
        db: PgPool::new(db),
        feeds: RoomFeeds::new(),
        admin_token,
    }
}

async fn call(state: AppState, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let res = app(state).oneshot(req).await.unwrap();
    let status = res.status();
    let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn posting_requires_a_session() {
    let comment = NewComment::now(
        ArticleId::stub(),
        UserId::stub(),
        String::from("hello"),
        None,
    );
    let req = Request::post("/api/comments")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&comment).unwrap()))
        .unwrap();
    let (status, body) = call(offline_state(None), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(ApiError::parse(&body).unwrap(), ApiError::PermissionDenied);
}

#[tokio::test]
async fn deleting_requires_a_well_formed_token() {
    let req = Request::delete(format!("/api/comments/{}", Uuid::new_v4()))
        .header(http::header::AUTHORIZATION, "Bearer not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(offline_state(None), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(ApiError::parse(&body).unwrap(), ApiError::PermissionDenied);
}

#[tokio::test]
async fn admin_routes_check_the_admin_token() {
    let admin = AuthToken(Uuid::new_v4());
    for (state, token) in [
        (offline_state(None), admin),
        (offline_state(Some(admin)), AuthToken(Uuid::new_v4())),
    ] {
        let req = Request::post("/api/admin/create-user")
            .header(http::header::AUTHORIZATION, format!("Bearer {}", token.0))
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = call(state, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn fetching_comments_requires_an_article() {
    let req = Request::get("/api/comments").body(Body::empty()).unwrap();
    let (status, _) = call(offline_state(None), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn database_failures_are_reported_as_unknown() {
    let req = Request::get(format!("/api/comments?article_id={}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(offline_state(None), req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(matches!(ApiError::parse(&body).unwrap(), ApiError::Unknown(_)));
}
