use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::parse_env;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: Limit) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= limit.window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit.max {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limit {
    pub max: usize,
    pub window: Duration,
}

impl Limit {
    pub const fn per_hour(max: usize) -> Self {
        Self { max, window: Duration::from_secs(3600) }
    }

    fn from_env(prefix: &str, default: Limit) -> Self {
        Self {
            max: parse_env(&format!("RL_{prefix}_LIMIT"), default.max),
            window: Duration::from_secs(parse_env(&format!("RL_{prefix}_WINDOW"), default.window.as_secs())),
        }
    }
}

/// Throttled route groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    CreatePost,
    ReadFeed,
    React,
    Upload,
    WildThought,
}

impl Action {
    fn key(&self) -> &'static str {
        match self {
            Action::CreatePost => "create",
            Action::ReadFeed => "feed",
            Action::React => "react",
            Action::Upload => "upload",
            Action::WildThought => "thought",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub create_post: Limit,
    pub read_feed: Limit,
    pub react: Limit,
    pub upload: Limit,
    pub wild_thought: Limit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            create_post: Limit::per_hour(20),
            read_feed: Limit::per_hour(200),
            react: Limit::per_hour(100),
            upload: Limit::per_hour(30),
            wild_thought: Limit::per_hour(10),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            create_post: Limit::from_env("CREATE", d.create_post),
            read_feed: Limit::from_env("FEED", d.read_feed),
            react: Limit::from_env("REACT", d.react),
            upload: Limit::from_env("UPLOAD", d.upload),
            wild_thought: Limit::from_env("THOUGHT", d.wild_thought),
        }
    }

    fn limit_for(&self, action: Action) -> Limit {
        match action {
            Action::CreatePost => self.create_post,
            Action::ReadFeed => self.read_feed,
            Action::React => self.react,
            Action::Upload => self.upload,
            Action::WildThought => self.wild_thought,
        }
    }
}

/// High level guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }

    pub fn allow(&self, action: Action, client: &str) -> bool {
        let key = format!("{}:{client}", action.key());
        self.limiter.check(&key, self.cfg.limit_for(action))
    }
}
