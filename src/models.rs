use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::reactions::Reactions;
use crate::tokens::UserToken;

pub type Id = i64;

pub const DEFAULT_FICTIONAL_NAME: &str = "Anonymous";
pub const MAX_HASHTAG_LEN: usize = 50;
pub const MAX_IMAGE_URL_LEN: usize = 500;
pub const MAX_FICTIONAL_NAME_LEN: usize = 50;
pub const MAX_WILD_THOUGHT_LEN: usize = 5000;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Post {
    #[schema(value_type = i64)]
    pub id: Id,
    pub content: String,
    pub image_url: Option<String>,
    pub hashtag: String,
    pub created_at: DateTime<Utc>,
    pub user_token: String,
    pub fictional_name: String,
    #[schema(value_type = Object)]
    pub reactions: Reactions,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub content: String,
    pub hashtag: String,
    #[schema(value_type = String)]
    pub user_token: UserToken,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub fictional_name: Option<String>,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), String> {
        check_content(&self.content)?;
        check_hashtag(&self.hashtag)?;
        if let Some(url) = &self.image_url {
            check_image_url(url)?;
        }
        if let Some(name) = &self.fictional_name {
            check_fictional_name(name)?;
        }
        Ok(())
    }

    pub fn fictional_name_or_default(&self) -> String {
        self.fictional_name.clone().unwrap_or_else(|| DEFAULT_FICTIONAL_NAME.to_string())
    }
}

/// Owner-supplied partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PostUpdate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub hashtag: Option<String>,
    #[serde(default)]
    pub fictional_name: Option<String>,
}

impl PostUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(c) = &self.content { check_content(c)?; }
        if let Some(h) = &self.hashtag { check_hashtag(h)?; }
        if let Some(u) = &self.image_url { check_image_url(u)?; }
        if let Some(n) = &self.fictional_name { check_fictional_name(n)?; }
        Ok(())
    }

    pub fn apply(self, post: &mut Post) {
        if let Some(c) = self.content { post.content = c; }
        if let Some(u) = self.image_url { post.image_url = Some(u); }
        if let Some(h) = self.hashtag { post.hashtag = h; }
        if let Some(n) = self.fictional_name { post.fictional_name = n; }
    }
}

fn check_content(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("content must not be empty".into());
    }
    Ok(())
}

fn check_hashtag(hashtag: &str) -> Result<(), String> {
    if hashtag.trim().is_empty() {
        return Err("hashtag must not be empty".into());
    }
    if hashtag.chars().count() > MAX_HASHTAG_LEN {
        return Err(format!("hashtag too long (max {MAX_HASHTAG_LEN} characters)"));
    }
    Ok(())
}

fn check_image_url(url: &str) -> Result<(), String> {
    if url.chars().count() > MAX_IMAGE_URL_LEN {
        return Err(format!("image_url too long (max {MAX_IMAGE_URL_LEN} characters)"));
    }
    Ok(())
}

fn check_fictional_name(name: &str) -> Result<(), String> {
    if name.chars().count() > MAX_FICTIONAL_NAME_LEN {
        return Err(format!("fictional_name too long (max {MAX_FICTIONAL_NAME_LEN} characters)"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

/// Which rows a feed query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostFilter {
    All,
    Hashtag(String),
    Owner(String),
}

/// Validated offset/limit window, 1-based page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32) -> Result<Self, String> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(default_limit);
        if page < 1 {
            return Err("page must be >= 1".into());
        }
        if limit < 1 || limit > MAX_PAGE_LIMIT {
            return Err(format!("limit must be between 1 and {MAX_PAGE_LIMIT}"));
        }
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct ScanRecord {
    pub id: Id,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewScan {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Stored wild thought. Carries the submitter address, so it never leaves
/// the repository layer as-is; see [`WildThoughtView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct WildThought {
    pub id: Id,
    pub content: String,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WildThoughtView {
    #[schema(value_type = i64)]
    pub id: Id,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<WildThought> for WildThoughtView {
    fn from(t: WildThought) -> Self {
        Self { id: t.id, content: t.content, created_at: t.created_at }
    }
}

#[derive(Debug, Clone)]
pub struct NewWildThought {
    pub content: String,
    pub ip_address: Option<String>,
}

impl NewWildThought {
    /// Trims the submission and enforces the length bounds.
    pub fn new(raw: &str, ip_address: Option<String>) -> Result<Self, String> {
        if raw.chars().count() > MAX_WILD_THOUGHT_LEN {
            return Err(format!("Content too long (max {MAX_WILD_THOUGHT_LEN} characters)"));
        }
        let content = raw.trim();
        if content.is_empty() {
            return Err("Content cannot be empty".into());
        }
        Ok(Self { content: content.to_string(), ip_address })
    }
}
