//! Reddit source over the OAuth API.
//!
//! Authenticates with the password grant of a script app, keeps the bearer token
//! until shortly before it expires, and maps HTTP failures onto `SourceError`
//! kinds the engine can branch on.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{env_string, require_env};
use crate::error::{ConfigError, SourceError};
use crate::source::{
    CandidateItem, ContentSource, ItemKind, MAX_CONTEXT_PARENTS, ReplyHandle, ThreadComment,
    ThreadContext,
};
use crate::text::truncate;

const SOURCE_NAME: &str = "reddit";
const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_URL: &str = "https://oauth.reddit.com";
const WEB_URL: &str = "https://www.reddit.com";

/// Refresh the token this long before Reddit says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

/// Post body characters included in a reply context.
const CONTEXT_BODY_CHARS: usize = 1000;

/// Credentials for a Reddit script app.
#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub password: SecretString,
    pub user_agent: String,
}

impl RedditConfig {
    /// Build config from `REDDIT_*` environment variables.
    /// Every missing credential is reported at once.
    pub fn from_env() -> Result<Self, ConfigError> {
        let values = require_env(&[
            "REDDIT_CLIENT_ID",
            "REDDIT_CLIENT_SECRET",
            "REDDIT_USERNAME",
            "REDDIT_PASSWORD",
        ])?;
        let [client_id, client_secret, username, password]: [String; 4] =
            values.try_into().map_err(|_| ConfigError::InvalidValue {
                key: "REDDIT_*".to_string(),
                message: "unexpected credential count".to_string(),
            })?;

        let user_agent = env_string("REDDIT_USER_AGENT").unwrap_or_else(|| {
            format!(
                "linux:tldr-dispatch:v{} (by /u/{username})",
                env!("CARGO_PKG_VERSION")
            )
        });

        Ok(Self {
            client_id,
            client_secret: SecretString::from(client_secret),
            username,
            password: SecretString::from(password),
            user_agent,
        })
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    error: Option<String>,
}

/// Fields shared by Reddit posts, comments and inbox messages.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawThing {
    id: String,
    author: Option<String>,
    title: Option<String>,
    selftext: Option<String>,
    body: Option<String>,
    created_utc: f64,
    link_id: Option<String>,
    parent_id: Option<String>,
    subreddit: String,
    num_comments: Option<u32>,
    score: i64,
    permalink: Option<String>,
    /// Inbox messages carry a context link instead of a permalink.
    context: Option<String>,
    was_comment: Option<bool>,
}

/// Reddit OAuth client.
pub struct RedditSource {
    config: RedditConfig,
    community: String,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl RedditSource {
    pub fn new(config: RedditConfig, community: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Network {
                source_name: SOURCE_NAME.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            config,
            community: community.into(),
            client,
            token: Mutex::new(None),
        })
    }

    /// Bearer token, fetched on first use and whenever it is about to expire.
    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_SLACK < token.expires_at {
                return Ok(token.token.expose_secret().to_string());
            }
        }

        let resp = self
            .client
            .post(AUTH_URL)
            .basic_auth(
                &self.config.client_id,
                Some(self.config.client_secret.expose_secret()),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.expose_secret()),
            ])
            .send()
            .await
            .map_err(network_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, retry_after(&resp), "access_token"));
        }

        let body: TokenResponse = resp.json().await.map_err(|e| invalid(format!("token: {e}")))?;
        let access_token = match (body.access_token, body.error) {
            (Some(token), None) => token,
            (_, Some(error)) => {
                return Err(SourceError::AuthFailed {
                    source_name: SOURCE_NAME.into(),
                    reason: error,
                });
            }
            (None, None) => return Err(invalid("token response without access_token".into())),
        };

        info!(username = %self.config.username, "Authenticated with Reddit");
        let value = access_token.clone();
        *cached = Some(CachedToken {
            token: SecretString::from(access_token),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });
        Ok(value)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, SourceError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(format!("{API_URL}{path}"))
            .bearer_auth(token)
            .query(&[("raw_json", "1")])
            .query(query)
            .send()
            .await
            .map_err(network_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, retry_after(&resp), path));
        }
        debug!(path, "Reddit GET ok");
        resp.json().await.map_err(|e| invalid(format!("{path}: {e}")))
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value, SourceError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(format!("{API_URL}{path}"))
            .bearer_auth(token)
            .form(form)
            .send()
            .await
            .map_err(network_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, retry_after(&resp), path));
        }
        let body: Value = resp.json().await.map_err(|e| invalid(format!("{path}: {e}")))?;
        check_api_errors(&body)?;
        Ok(body)
    }

    async fn thing_by_name(&self, fullname: &str) -> Result<RawThing, SourceError> {
        let body = self
            .get_json("/api/info", &[("id", fullname.to_string())])
            .await?;
        listing_things(&body)
            .into_iter()
            .next()
            .map(|(_, thing)| thing)
            .ok_or_else(|| SourceError::NotFound {
                source_name: SOURCE_NAME.into(),
                id: fullname.to_string(),
            })
    }

    async fn listing(
        &self,
        path: &str,
        limit: usize,
        kind: ItemKind,
    ) -> Result<Vec<CandidateItem>, SourceError> {
        let body = self
            .get_json(path, &[("limit", limit.min(100).to_string())])
            .await?;
        let items: Vec<CandidateItem> = listing_things(&body)
            .into_iter()
            .filter_map(|(_, thing)| to_candidate(thing, kind))
            .collect();
        debug!(path, count = items.len(), "Fetched listing");
        Ok(items)
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn list_recent_posts(&self, limit: usize) -> Result<Vec<CandidateItem>, SourceError> {
        let path = format!("/r/{}/new", self.community);
        self.listing(&path, limit, ItemKind::Post).await
    }

    async fn list_recent_comments(&self, limit: usize) -> Result<Vec<CandidateItem>, SourceError> {
        let path = format!("/r/{}/comments", self.community);
        self.listing(&path, limit, ItemKind::Comment).await
    }

    async fn list_inbox_replies(&self, limit: usize) -> Result<Vec<CandidateItem>, SourceError> {
        self.listing("/message/comment_replies", limit, ItemKind::InboxReply)
            .await
    }

    async fn list_moderators(&self) -> Result<Vec<String>, SourceError> {
        let path = format!("/r/{}/about/moderators", self.community);
        let body = self.get_json(&path, &[]).await?;
        Ok(parse_moderators(&body))
    }

    async fn fetch_context(&self, item: &CandidateItem) -> Result<ThreadContext, SourceError> {
        let post = if item.kind == ItemKind::Post {
            None
        } else {
            Some(self.thing_by_name(&format!("t3_{}", item.post_id)).await?)
        };
        let (post_title, post_body) = match post {
            Some(post) => (
                post.title.unwrap_or_default(),
                post.selftext.unwrap_or_default(),
            ),
            None => (
                item.title.clone().unwrap_or_default(),
                item.body.clone(),
            ),
        };

        let mut parents = Vec::new();
        let mut next = item.parent_id.clone();
        while let Some(parent) = next.take() {
            if !parent.starts_with("t1_") || parents.len() >= MAX_CONTEXT_PARENTS {
                break;
            }
            match self.thing_by_name(&parent).await {
                Ok(thing) => {
                    next = thing.parent_id.clone();
                    parents.push(to_thread_comment(thing));
                }
                Err(SourceError::NotFound { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        parents.reverse();

        Ok(ThreadContext {
            post_title,
            post_body: truncate(&post_body, CONTEXT_BODY_CHARS),
            parents,
            comments: Vec::new(),
        })
    }

    async fn list_post_comments(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<ThreadComment>, SourceError> {
        let path = format!("/comments/{post_id}");
        let body = self
            .get_json(
                &path,
                &[
                    ("sort", "top".to_string()),
                    ("depth", "1".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        // [post listing, comment listing]
        let comments = body
            .get(1)
            .map(listing_things)
            .unwrap_or_default()
            .into_iter()
            .filter(|(kind, _)| kind == "t1")
            .map(|(_, thing)| to_thread_comment(thing))
            .filter(|c| c.author.is_some())
            .take(limit)
            .collect();
        Ok(comments)
    }

    async fn reply(&self, item: &CandidateItem, text: &str) -> Result<ReplyHandle, SourceError> {
        let thing_id = fullname(item);
        let body = self
            .post_form(
                "/api/comment",
                &[("thing_id", thing_id.as_str()), ("text", text), ("api_type", "json")],
            )
            .await?;
        parse_reply_handle(&body)
    }

    async fn pin_reply(&self, handle: &ReplyHandle) -> Result<(), SourceError> {
        let id = format!("t1_{}", handle.id);
        self.post_form(
            "/api/distinguish",
            &[
                ("id", id.as_str()),
                ("how", "yes"),
                ("sticky", "true"),
                ("api_type", "json"),
            ],
        )
        .await?;
        info!(reply_id = %handle.id, "Pinned reply");
        Ok(())
    }
}

fn fullname(item: &CandidateItem) -> String {
    match item.kind {
        ItemKind::Post => format!("t3_{}", item.id),
        ItemKind::Comment | ItemKind::InboxReply => format!("t1_{}", item.id),
    }
}

fn network_error(e: reqwest::Error) -> SourceError {
    SourceError::Network {
        source_name: SOURCE_NAME.into(),
        reason: e.to_string(),
    }
}

fn invalid(reason: String) -> SourceError {
    SourceError::InvalidResponse {
        source_name: SOURCE_NAME.into(),
        reason,
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, what: &str) -> SourceError {
    let source_name = SOURCE_NAME.to_string();
    match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            source_name,
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::AuthFailed {
            source_name,
            reason: format!("{what}: HTTP {status}"),
        },
        StatusCode::NOT_FOUND => SourceError::NotFound {
            source_name,
            id: what.to_string(),
        },
        s if s.is_server_error() => SourceError::Network {
            source_name,
            reason: format!("{what}: HTTP {status}"),
        },
        _ => SourceError::Rejected {
            source_name,
            reason: format!("{what}: HTTP {status}"),
        },
    }
}

/// `api_type=json` responses report failures in `json.errors` with a 200 status.
fn check_api_errors(body: &Value) -> Result<(), SourceError> {
    let Some(errors) = body.pointer("/json/errors").and_then(Value::as_array) else {
        return Ok(());
    };
    let Some(first) = errors.first() else {
        return Ok(());
    };

    let parts: Vec<String> = first
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let code = parts.first().cloned().unwrap_or_default();
    let reason = parts.join(": ");

    warn!(code = %code, reason = %reason, "Reddit API error");
    Err(match code.as_str() {
        "RATELIMIT" => SourceError::RateLimited {
            source_name: SOURCE_NAME.into(),
            retry_after: None,
        },
        "DELETED_COMMENT" | "DELETED_LINK" | "NO_THING_ID" => SourceError::NotFound {
            source_name: SOURCE_NAME.into(),
            id: reason,
        },
        _ => SourceError::Rejected {
            source_name: SOURCE_NAME.into(),
            reason,
        },
    })
}

/// `(kind, data)` for every child of a listing.
fn listing_things(body: &Value) -> Vec<(String, RawThing)> {
    body.pointer("/data/children")
        .and_then(Value::as_array)
        .map(|children| {
            children
                .iter()
                .filter_map(|child| {
                    let kind = child.get("kind")?.as_str()?.to_string();
                    let data = serde_json::from_value(child.get("data")?.clone()).ok()?;
                    Some((kind, data))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_moderators(body: &Value) -> Vec<String> {
    body.pointer("/data/children")
        .and_then(Value::as_array)
        .map(|children| {
            children
                .iter()
                .filter_map(|c| c.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_reply_handle(body: &Value) -> Result<ReplyHandle, SourceError> {
    let data = body
        .pointer("/json/data/things/0/data")
        .ok_or_else(|| invalid("comment response without thing".into()))?;
    let id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("comment response without id".into()))?;
    Ok(ReplyHandle {
        id: id.to_string(),
        permalink: data
            .get("permalink")
            .and_then(Value::as_str)
            .map(|p| format!("{WEB_URL}{p}")),
    })
}

fn clean_author(author: Option<String>) -> Option<String> {
    author.filter(|a| !a.is_empty() && a != "[deleted]")
}

/// Post id from an inbox context link (`/r/sub/comments/<post>/<slug>/<comment>/?context=3`).
fn post_id_from_context(context: &str) -> Option<String> {
    let mut segments = context.split('/').skip_while(|s| *s != "comments");
    segments.next()?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn to_candidate(thing: RawThing, kind: ItemKind) -> Option<CandidateItem> {
    let Some(created_at) = DateTime::<Utc>::from_timestamp(thing.created_utc as i64, 0) else {
        warn!(id = %thing.id, "Skipping item with invalid timestamp");
        return None;
    };
    if kind == ItemKind::InboxReply && thing.was_comment == Some(false) {
        return None;
    }

    let author = clean_author(thing.author);
    let link = thing.permalink.or(thing.context);
    let permalink = link
        .as_deref()
        .map(|p| format!("{WEB_URL}{p}"))
        .unwrap_or_default();

    let item = match kind {
        ItemKind::Post => CandidateItem {
            post_id: thing.id.clone(),
            id: thing.id,
            kind,
            author,
            title: thing.title,
            body: thing.selftext.unwrap_or_default(),
            created_at,
            parent_id: None,
            community: thing.subreddit,
            engagement: thing.num_comments.unwrap_or(0),
            permalink,
        },
        ItemKind::Comment | ItemKind::InboxReply => {
            let post_id = thing
                .link_id
                .as_deref()
                .map(|l| l.trim_start_matches("t3_").to_string())
                .or_else(|| link.as_deref().and_then(post_id_from_context))
                .unwrap_or_default();
            CandidateItem {
                id: thing.id,
                kind,
                author,
                title: None,
                body: thing.body.unwrap_or_default(),
                created_at,
                post_id,
                parent_id: thing.parent_id,
                community: thing.subreddit,
                engagement: thing.score.max(0) as u32,
                permalink,
            }
        }
    };
    Some(item)
}

fn to_thread_comment(thing: RawThing) -> ThreadComment {
    ThreadComment {
        author: clean_author(thing.author),
        body: thing.body.unwrap_or_default(),
        score: thing.score,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn post_listing() -> Value {
        json!({
            "kind": "Listing",
            "data": {
                "children": [
                    {
                        "kind": "t3",
                        "data": {
                            "id": "abc123",
                            "author": "alice",
                            "title": "New scaling paper",
                            "selftext": "Long body",
                            "created_utc": 1772359200.0,
                            "subreddit": "accelerate",
                            "num_comments": 57,
                            "score": 120,
                            "permalink": "/r/accelerate/comments/abc123/new_scaling_paper/"
                        }
                    },
                    {
                        "kind": "t3",
                        "data": {
                            "id": "def456",
                            "author": "[deleted]",
                            "title": "Gone",
                            "selftext": "[deleted]",
                            "created_utc": 1772359300.0,
                            "subreddit": "accelerate"
                        }
                    }
                ]
            }
        })
    }

    #[test]
    fn parses_post_listing() {
        let items: Vec<_> = listing_things(&post_listing())
            .into_iter()
            .filter_map(|(_, t)| to_candidate(t, ItemKind::Post))
            .collect();

        assert_eq!(items.len(), 2);
        let first = &items[0];
        assert_eq!(first.id, "abc123");
        assert_eq!(first.post_id, "abc123");
        assert_eq!(first.engagement, 57);
        assert_eq!(first.title.as_deref(), Some("New scaling paper"));
        assert!(first.permalink.starts_with("https://www.reddit.com/r/accelerate"));
        assert_eq!(items[1].author, None);
    }

    #[test]
    fn parses_comment_linkage() {
        let body = json!({
            "data": { "children": [{
                "kind": "t1",
                "data": {
                    "id": "c1",
                    "author": "bob",
                    "body": "hey optimist prime",
                    "created_utc": 1772359200.0,
                    "link_id": "t3_abc123",
                    "parent_id": "t1_c0",
                    "subreddit": "accelerate",
                    "score": -3
                }
            }]}
        });
        let (_, thing) = listing_things(&body).into_iter().next().unwrap();
        let item = to_candidate(thing, ItemKind::Comment).unwrap();
        assert_eq!(item.post_id, "abc123");
        assert_eq!(item.parent_id.as_deref(), Some("t1_c0"));
        assert_eq!(item.engagement, 0);
        assert_eq!(fullname(&item), "t1_c1");
    }

    #[test]
    fn inbox_reply_post_id_from_context() {
        assert_eq!(
            post_id_from_context("/r/accelerate/comments/abc123/slug/c9/?context=3").as_deref(),
            Some("abc123")
        );
        assert_eq!(post_id_from_context("/message/messages/xyz"), None);
    }

    #[test]
    fn inbox_private_messages_are_dropped() {
        let thing = RawThing {
            id: "m1".into(),
            created_utc: 1772359200.0,
            was_comment: Some(false),
            ..RawThing::default()
        };
        assert!(to_candidate(thing, ItemKind::InboxReply).is_none());
    }

    #[test]
    fn parses_moderator_list() {
        let body = json!({
            "kind": "UserList",
            "data": { "children": [{ "name": "ModA" }, { "name": "modb" }] }
        });
        assert_eq!(parse_moderators(&body), vec!["ModA", "modb"]);
    }

    #[test]
    fn parses_reply_handle() {
        let body = json!({
            "json": { "errors": [], "data": { "things": [{
                "kind": "t1",
                "data": { "id": "r1", "permalink": "/r/accelerate/comments/abc123/x/r1/" }
            }]}}
        });
        let handle = parse_reply_handle(&body).unwrap();
        assert_eq!(handle.id, "r1");
        assert!(handle.permalink.unwrap().ends_with("/r1/"));
    }

    #[test]
    fn api_errors_map_to_kinds() {
        let rate = json!({ "json": { "errors": [["RATELIMIT", "you are doing that too much", "ratelimit"]] } });
        assert!(matches!(
            check_api_errors(&rate),
            Err(SourceError::RateLimited { .. })
        ));

        let locked = json!({ "json": { "errors": [["THREAD_LOCKED", "locked", null]] } });
        assert!(matches!(
            check_api_errors(&locked),
            Err(SourceError::Rejected { .. })
        ));

        let ok = json!({ "json": { "errors": [] } });
        assert!(check_api_errors(&ok).is_ok());
    }

    #[test]
    fn http_status_mapping() {
        use crate::error::FailureKind;

        let kind = |s: StatusCode| status_error(s, None, "x").kind();
        assert_eq!(kind(StatusCode::TOO_MANY_REQUESTS), FailureKind::RateLimited);
        assert_eq!(kind(StatusCode::UNAUTHORIZED), FailureKind::Auth);
        assert_eq!(kind(StatusCode::FORBIDDEN), FailureKind::Auth);
        assert_eq!(kind(StatusCode::NOT_FOUND), FailureKind::NotFound);
        assert_eq!(kind(StatusCode::BAD_GATEWAY), FailureKind::Network);
        assert_eq!(kind(StatusCode::BAD_REQUEST), FailureKind::Rejected);
    }
}
