use anyhow::Context;
use threadline_client::{
    api::{ArticleId, AuthToken, CommentId, NewSession, NewUser, UserId, Uuid},
    build_tree, initials, CommentApi, CommentSection, ComposerKind, DenormalizedComment,
    LoadState, StaticAuth, SubmitOutcome, Tree, UserDirectory,
};

mod feed;
mod http;

use feed::{feed_url, WsTransport};
use http::HttpApi;

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user, needs ADMIN_TOKEN
    CreateUser {
        /// Login name
        name: String,

        /// Name displayed next to comments
        full_name: String,

        /// Initial password
        initial_password: String,

        #[structopt(long)]
        avatar_url: Option<String>,
    },

    /// Open a session, printing the token to put in THREADLINE_TOKEN
    Login {
        name: String,
        password: String,

        #[structopt(long, default_value = "threadline-ctl")]
        device: String,
    },

    /// Close the session of THREADLINE_TOKEN
    Logout,

    /// Print the comment tree of an article
    Comments { article: Uuid },

    /// Post a comment as the user of THREADLINE_TOKEN, and publish it to the
    /// readers of the article
    Post {
        article: Uuid,
        content: String,

        /// Root comment to reply to
        #[structopt(long)]
        reply_to: Option<Uuid>,
    },

    /// Delete a comment and its replies
    Delete { comment: Uuid },
}

fn token_from_env(var: &str) -> anyhow::Result<Option<AuthToken>> {
    match std::env::var(var) {
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("retrieving {var} environment variable")),
        Ok(tok) => {
            let tok = Uuid::try_parse(&tok)
                .with_context(|| format!("parsing {var} as an auth token"))?;
            Ok(Some(AuthToken(tok)))
        }
    }
}

fn admin_token() -> anyhow::Result<AuthToken> {
    token_from_env("ADMIN_TOKEN")?.context("ADMIN_TOKEN must be set")
}

fn render_comment(out: &mut String, c: &DenormalizedComment, depth: usize) {
    let indent = "    ".repeat(depth);
    out.push_str(&format!(
        "{indent}[{}] {} on {} ({})\n",
        initials(&c.author_name),
        c.author_name,
        c.record.created_at.format("%Y-%m-%d %H:%M"),
        c.record.id.0,
    ));
    for line in c.record.content.lines() {
        out.push_str(&format!("{indent}  {line}\n"));
    }
}

fn render_tree(tree: &Tree) -> String {
    if tree.is_empty() {
        return String::from("No comments yet\n");
    }
    let mut out = String::new();
    for root in &tree.roots {
        render_comment(&mut out, &root.comment, 0);
        for reply in &root.replies {
            render_comment(&mut out, &reply.comment, 1);
        }
    }
    out.push_str(&format!("{} comments", tree.total_count()));
    if !tree.diagnostics.is_empty() {
        out.push_str(&format!(
            ", {} replies without a displayable parent",
            tree.diagnostics.len()
        ));
    }
    out.push('\n');
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let api = HttpApi::new(opt.host.clone(), token_from_env("THREADLINE_TOKEN")?);

    match opt.cmd {
        Command::CreateUser {
            name,
            full_name,
            initial_password,
            avatar_url,
        } => {
            let mut user = NewUser::new(
                UserId(Uuid::new_v4()),
                name,
                full_name,
                &initial_password,
            );
            user.avatar_url = avatar_url;
            user.validate()?;
            api.admin_create_user(admin_token()?, &user).await?;
            println!("{}", user.id.0);
        }
        Command::Login {
            name,
            password,
            device,
        } => {
            let tok = api
                .auth(&NewSession {
                    user: name,
                    password,
                    device,
                })
                .await?;
            println!("{}", tok.0);
        }
        Command::Logout => api.unauth().await?,
        Command::Comments { article } => {
            let article = ArticleId(article);
            let (comments, users) =
                tokio::try_join!(api.fetch_comments(article), api.fetch_users())?;
            let mut directory = UserDirectory::new();
            directory.replace(users);
            print!("{}", render_tree(&build_tree(&comments, &directory)));
        }
        Command::Post {
            article,
            content,
            reply_to,
        } => {
            let me = api.whoami().await.context("finding out who is posting")?;
            let feed = WsTransport::new(feed_url(&opt.host)?);
            let gate = StaticAuth::new(Some(me), || ());
            let mut section = CommentSection::new(api, gate, feed);
            section.open(ArticleId(article)).await;
            if let LoadState::Failed(err) = section.state() {
                anyhow::bail!("loading article {article}: {err}");
            }
            if !section.is_live() {
                tracing::warn!("comment feed unavailable, readers will only see the comment on reload");
            }
            let kind = match reply_to {
                None => ComposerKind::Root,
                Some(parent) => {
                    anyhow::ensure!(
                        section.toggle_reply(CommentId(parent)),
                        "{parent} is not a root comment of article {article}"
                    );
                    ComposerKind::Reply
                }
            };
            section.edit(kind, content);
            let outcome = section.submit(kind).await;
            section.close();
            match outcome {
                SubmitOutcome::Posted(record) => println!("{}", record.id.0),
                SubmitOutcome::Empty => anyhow::bail!("refusing to post an empty comment"),
                SubmitOutcome::Failed(err) => anyhow::bail!("posting comment: {err}"),
                outcome => anyhow::bail!("comment was not posted: {outcome:?}"),
            }
        }
        Command::Delete { comment } => {
            api.delete_comment(CommentId(comment)).await?;
        }
    }

    Ok(())
}
