use anyhow::Context;
use async_trait::async_trait;
use threadline_client::{
    api::{
        ArticleId, AuthToken, CommentId, CommentRecord, Error, NewComment, NewSession, NewUser,
        User,
    },
    CommentApi,
};

/// Client of the threadline server's HTTP API
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    host: String,
    token: Option<AuthToken>,
}

async fn parse_response<R>(resp: reqwest::Response) -> anyhow::Result<R>
where
    R: for<'de> serde::Deserialize<'de>,
{
    let resp = check_status(resp).await?;
    resp.json().await.context("parsing server response")
}

async fn check_status(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.bytes().await.context("reading error response")?;
    let err = Error::parse(&body)
        .with_context(|| format!("server answered {status} with an unparseable body"))?;
    Err(err.into())
}

impl HttpApi {
    pub fn new(host: String, token: Option<AuthToken>) -> HttpApi {
        HttpApi {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host, path)
    }

    fn token(&self) -> anyhow::Result<AuthToken> {
        self.token
            .context("THREADLINE_TOKEN must be set, see the login command")
    }

    pub async fn admin_create_user(&self, admin: AuthToken, user: &NewUser) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.url("admin/create-user"))
            .bearer_auth(admin.0)
            .json(user)
            .send()
            .await
            .context("sending user creation request")?;
        check_status(resp).await?;
        Ok(())
    }

    pub async fn auth(&self, session: &NewSession) -> anyhow::Result<AuthToken> {
        let resp = self
            .client
            .post(self.url("auth"))
            .json(session)
            .send()
            .await
            .context("sending login request")?;
        parse_response(resp).await
    }

    pub async fn unauth(&self) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.url("unauth"))
            .bearer_auth(self.token()?.0)
            .send()
            .await
            .context("sending logout request")?;
        check_status(resp).await?;
        Ok(())
    }

    pub async fn whoami(&self) -> anyhow::Result<User> {
        let resp = self
            .client
            .get(self.url("whoami"))
            .bearer_auth(self.token()?.0)
            .send()
            .await
            .context("sending whoami request")?;
        parse_response(resp).await
    }
}

#[async_trait]
impl CommentApi for HttpApi {
    async fn fetch_comments(&self, article: ArticleId) -> anyhow::Result<Vec<CommentRecord>> {
        let resp = self
            .client
            .get(self.url("comments"))
            .query(&[("article_id", article.0)])
            .send()
            .await
            .context("sending comment fetch request")?;
        parse_response(resp).await
    }

    async fn fetch_users(&self) -> anyhow::Result<Vec<User>> {
        let resp = self
            .client
            .get(self.url("users"))
            .send()
            .await
            .context("sending user fetch request")?;
        parse_response(resp).await
    }

    async fn create_comment(&self, comment: NewComment) -> anyhow::Result<CommentRecord> {
        let resp = self
            .client
            .post(self.url("comments"))
            .bearer_auth(self.token()?.0)
            .json(&comment)
            .send()
            .await
            .context("sending comment creation request")?;
        parse_response(resp).await
    }

    async fn delete_comment(&self, id: CommentId) -> anyhow::Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("comments/{}", id.0)))
            .bearer_auth(self.token()?.0)
            .send()
            .await
            .context("sending comment deletion request")?;
        check_status(resp).await?;
        Ok(())
    }
}
