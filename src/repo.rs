use async_trait::async_trait;

use crate::models::*;
use crate::reactions::apply_toggle;
use crate::tokens::UserToken;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    /// Missing row, or a row the presented token does not own.
    #[error("not found")] NotFound,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    /// Newest first. Returns the page plus the total row count for `filter`.
    async fn list_posts(&self, filter: PostFilter, page: Pagination) -> RepoResult<(Vec<Post>, i64)>;
    async fn update_post(&self, id: Id, token: &UserToken, upd: PostUpdate) -> RepoResult<Post>;
    async fn delete_post(&self, id: Id, token: &UserToken) -> RepoResult<()>;
    /// Read-modify-write of the reaction map; concurrent callers race.
    async fn react_to_post(&self, id: Id, kind: &str) -> RepoResult<Post>;
}

#[async_trait]
pub trait ScanRepo: Send + Sync {
    async fn record_scan(&self, new: NewScan) -> RepoResult<ScanRecord>;
    async fn count_scans(&self) -> RepoResult<i64>;
}

#[async_trait]
pub trait WildThoughtRepo: Send + Sync {
    async fn create_wild_thought(&self, new: NewWildThought) -> RepoResult<WildThought>;
    async fn list_wild_thoughts(&self, page: Pagination) -> RepoResult<(Vec<WildThought>, i64)>;
    async fn count_wild_thoughts(&self) -> RepoResult<i64>;
}

pub trait Repo: PostRepo + ScanRepo + WildThoughtRepo {}

impl<T> Repo for T where T: PostRepo + ScanRepo + WildThoughtRepo {}

fn window<T: Clone>(rows: &[T], page: Pagination) -> Vec<T> {
    rows.iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .cloned()
        .collect()
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use tokio::io::AsyncWriteExt;

    const SNAPSHOT_FILE: &str = "state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        posts: BTreeMap<Id, Post>,
        scans: Vec<ScanRecord>,
        wild_thoughts: Vec<WildThought>,
        next_post_id: Id,
        next_scan_id: Id,
        next_thought_id: Id,
    }

    /// Process-local backend, optionally snapshotted to a JSON file after
    /// every write.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
        // one snapshot writer at a time, so an older state never lands last
        persist_lock: Arc<tokio::sync::Mutex<()>>,
    }

    impl InMemRepo {
        /// Snapshot under `$DUMPS_DATA_DIR` (default `data/`).
        pub fn new() -> Self {
            let dir = std::env::var("DUMPS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"));
            Self::with_snapshot(dir.join(SNAPSHOT_FILE))
        }

        pub fn with_snapshot(path: PathBuf) -> Self {
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
                persist_lock: Arc::default(),
            }
        }

        /// No snapshot; state dies with the process.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None, persist_lock: Arc::default() }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    log::info!("no snapshot at '{}' ({e}); starting empty", path.display());
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|e| RepoError::Internal(format!("state lock poisoned: {e}")))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|e| RepoError::Internal(format!("state lock poisoned: {e}")))
        }

        // Snapshot failures are logged, never surfaced: the write already
        // happened in memory.
        async fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let _guard = self.persist_lock.lock().await;
            let bytes = match self.read().map(|s| serde_json::to_vec(&*s)) {
                Ok(Ok(b)) => b,
                Ok(Err(e)) => { log::error!("failed to serialise snapshot: {e}"); return; }
                Err(e) => { log::error!("failed to read state for snapshot: {e}"); return; }
            };
            if let Err(e) = write_atomic(path, &bytes).await {
                log::error!("failed to write snapshot '{}': {e}", path.display());
            }
        }

        fn matching(s: &State, filter: &PostFilter) -> Vec<Post> {
            let mut v: Vec<Post> = s.posts.values()
                .filter(|p| match filter {
                    PostFilter::All => true,
                    PostFilter::Hashtag(h) => &p.hashtag == h,
                    PostFilter::Owner(t) => &p.user_token == t,
                })
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            v
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    /// Write to a sibling temp file, sync it, then rename over `path`, so a
    /// crash leaves either the previous snapshot or the new one.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(bytes).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, path).await
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let post = {
                let mut s = self.write()?;
                s.next_post_id += 1;
                let post = Post {
                    id: s.next_post_id,
                    fictional_name: new.fictional_name_or_default(),
                    content: new.content,
                    image_url: new.image_url,
                    hashtag: new.hashtag,
                    created_at: Utc::now(),
                    user_token: new.user_token.into_inner(),
                    reactions: Default::default(),
                };
                s.posts.insert(post.id, post.clone());
                post
            };
            self.persist().await;
            Ok(post)
        }

        async fn list_posts(&self, filter: PostFilter, page: Pagination) -> RepoResult<(Vec<Post>, i64)> {
            let s = self.read()?;
            let all = Self::matching(&s, &filter);
            Ok((window(&all, page), all.len() as i64))
        }

        async fn update_post(&self, id: Id, token: &UserToken, upd: PostUpdate) -> RepoResult<Post> {
            let updated = {
                let mut s = self.write()?;
                let post = s.posts.get_mut(&id)
                    .filter(|p| token.grants(&p.user_token))
                    .ok_or(RepoError::NotFound)?;
                upd.apply(post);
                post.clone()
            };
            self.persist().await;
            Ok(updated)
        }

        async fn delete_post(&self, id: Id, token: &UserToken) -> RepoResult<()> {
            {
                let mut s = self.write()?;
                match s.posts.get(&id) {
                    Some(p) if token.grants(&p.user_token) => { s.posts.remove(&id); }
                    _ => return Err(RepoError::NotFound),
                }
            }
            self.persist().await;
            Ok(())
        }

        async fn react_to_post(&self, id: Id, kind: &str) -> RepoResult<Post> {
            let updated = {
                let mut s = self.write()?;
                let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
                post.reactions = apply_toggle(Some(std::mem::take(&mut post.reactions)), kind);
                post.clone()
            };
            self.persist().await;
            Ok(updated)
        }
    }

    #[async_trait]
    impl ScanRepo for InMemRepo {
        async fn record_scan(&self, new: NewScan) -> RepoResult<ScanRecord> {
            let rec = {
                let mut s = self.write()?;
                s.next_scan_id += 1;
                let rec = ScanRecord {
                    id: s.next_scan_id,
                    ip_address: new.ip_address,
                    user_agent: new.user_agent,
                    created_at: Utc::now(),
                };
                s.scans.push(rec.clone());
                rec
            };
            self.persist().await;
            Ok(rec)
        }

        async fn count_scans(&self) -> RepoResult<i64> {
            Ok(self.read()?.scans.len() as i64)
        }
    }

    #[async_trait]
    impl WildThoughtRepo for InMemRepo {
        async fn create_wild_thought(&self, new: NewWildThought) -> RepoResult<WildThought> {
            let t = {
                let mut s = self.write()?;
                s.next_thought_id += 1;
                let t = WildThought {
                    id: s.next_thought_id,
                    content: new.content,
                    ip_address: new.ip_address,
                    created_at: Utc::now(),
                };
                s.wild_thoughts.push(t.clone());
                t
            };
            self.persist().await;
            Ok(t)
        }

        async fn list_wild_thoughts(&self, page: Pagination) -> RepoResult<(Vec<WildThought>, i64)> {
            let s = self.read()?;
            let mut all = s.wild_thoughts.clone();
            all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok((window(&all, page), all.len() as i64))
        }

        async fn count_wild_thoughts(&self) -> RepoResult<i64> {
            Ok(self.read()?.wild_thoughts.len() as i64)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn post(content: &str) -> NewPost {
            NewPost {
                content: content.into(),
                hashtag: "general".into(),
                user_token: UserToken::from("t"),
                image_url: None,
                fictional_name: None,
            }
        }

        #[tokio::test]
        async fn equal_timestamps_order_by_id_desc() {
            let r = InMemRepo::ephemeral();
            let older = r.create_post(post("older")).await.unwrap();
            let newer = r.create_post(post("newer")).await.unwrap();
            {
                let mut s = r.write().unwrap();
                let ts = s.posts[&older.id].created_at;
                if let Some(p) = s.posts.get_mut(&newer.id) {
                    p.created_at = ts;
                }
            }

            let one = |page| Pagination::new(Some(page), Some(1), 10).unwrap();
            let (first, total) = r.list_posts(PostFilter::All, one(1)).await.unwrap();
            assert_eq!(total, 2);
            assert_eq!(first[0].id, newer.id);
            let (second, _) = r.list_posts(PostFilter::All, one(2)).await.unwrap();
            assert_eq!(second[0].id, older.id);
        }

        #[tokio::test]
        async fn snapshot_write_leaves_no_temp_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nested").join(SNAPSHOT_FILE);
            let r = InMemRepo::with_snapshot(path.clone());
            r.create_post(post("a")).await.unwrap();
            r.record_scan(NewScan::default()).await.unwrap();

            let names: Vec<String> = std::fs::read_dir(path.parent().unwrap())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names, vec![SNAPSHOT_FILE.to_string()]);
            let saved: State = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
            assert_eq!(saved.posts.len(), 1);
            assert_eq!(saved.scans.len(), 1);
        }

        #[tokio::test]
        async fn stale_temp_file_is_ignored_on_load() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(SNAPSHOT_FILE);
            {
                let r = InMemRepo::with_snapshot(path.clone());
                r.create_post(post("kept")).await.unwrap();
            }
            // a crash mid-write leaves only a partial temp file behind
            std::fs::write(path.with_extension("json.tmp"), b"{\"posts\": {").unwrap();
            let r = InMemRepo::with_snapshot(path);
            let (rows, total) = r.list_posts(PostFilter::All, Pagination::new(None, None, 10).unwrap()).await.unwrap();
            assert_eq!(total, 1);
            assert_eq!(rows[0].content, "kept");
        }
    }
}

#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::types::Json;
    use sqlx::{Pool, Postgres};

    use crate::reactions::Reactions;

    const POST_COLUMNS: &str =
        "id, content, image_url, hashtag, created_at, user_token, fictional_name, reactions";

    impl From<sqlx::Error> for RepoError {
        fn from(e: sqlx::Error) -> Self {
            match e {
                sqlx::Error::RowNotFound => RepoError::NotFound,
                other => {
                    log::error!("database error: {other}");
                    RepoError::Internal(other.to_string())
                }
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct PostRow {
        id: Id,
        content: String,
        image_url: Option<String>,
        hashtag: String,
        created_at: DateTime<Utc>,
        user_token: String,
        fictional_name: Option<String>,
        reactions: Option<Json<Reactions>>,
    }

    impl From<PostRow> for Post {
        fn from(r: PostRow) -> Self {
            Post {
                id: r.id,
                content: r.content,
                image_url: r.image_url,
                hashtag: r.hashtag,
                created_at: r.created_at,
                user_token: r.user_token,
                fictional_name: r.fictional_name.unwrap_or_else(|| DEFAULT_FICTIONAL_NAME.to_string()),
                reactions: r.reactions.map(|j| j.0).unwrap_or_default(),
            }
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        /// Apply the bundled schema migrations.
        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }
    }

    fn filter_clause(filter: &PostFilter) -> (&'static str, Option<&str>) {
        match filter {
            PostFilter::All => ("", None),
            PostFilter::Hashtag(h) => ("WHERE hashtag = $1", Some(h.as_str())),
            PostFilter::Owner(t) => ("WHERE user_token = $1", Some(t.as_str())),
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let sql = format!(
                "INSERT INTO posts (content, image_url, hashtag, user_token, fictional_name, reactions) \
                 VALUES ($1,$2,$3,$4,$5,$6) RETURNING {POST_COLUMNS}"
            );
            let fictional_name = new.fictional_name_or_default();
            let row = sqlx::query_as::<_, PostRow>(&sql)
                .bind(&new.content)
                .bind(new.image_url.as_ref())
                .bind(&new.hashtag)
                .bind(new.user_token.as_str())
                .bind(fictional_name)
                .bind(Json(Reactions::default()))
                .fetch_one(&self.pool).await?;
            Ok(row.into())
        }

        async fn list_posts(&self, filter: PostFilter, page: Pagination) -> RepoResult<(Vec<Post>, i64)> {
            let (clause, arg) = filter_clause(&filter);
            let next = if arg.is_some() { 2 } else { 1 };

            let count_sql = format!("SELECT COUNT(*) FROM posts {clause}");
            let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
            if let Some(a) = arg { count = count.bind(a); }
            let total = count.fetch_one(&self.pool).await?;

            let page_sql = format!(
                "SELECT {POST_COLUMNS} FROM posts {clause} ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
                next, next + 1
            );
            let mut q = sqlx::query_as::<_, PostRow>(&page_sql);
            if let Some(a) = arg { q = q.bind(a); }
            let rows = q
                .bind(page.limit as i64)
                .bind(page.offset())
                .fetch_all(&self.pool).await?;
            Ok((rows.into_iter().map(Post::from).collect(), total))
        }

        async fn update_post(&self, id: Id, token: &UserToken, upd: PostUpdate) -> RepoResult<Post> {
            let sql = format!(
                "UPDATE posts SET content = COALESCE($3, content), image_url = COALESCE($4, image_url), \
                 hashtag = COALESCE($5, hashtag), fictional_name = COALESCE($6, fictional_name) \
                 WHERE id = $1 AND user_token = $2 RETURNING {POST_COLUMNS}"
            );
            let row = sqlx::query_as::<_, PostRow>(&sql)
                .bind(id)
                .bind(token.as_str())
                .bind(upd.content.as_ref())
                .bind(upd.image_url.as_ref())
                .bind(upd.hashtag.as_ref())
                .bind(upd.fictional_name.as_ref())
                .fetch_optional(&self.pool).await?
                .ok_or(RepoError::NotFound)?;
            Ok(row.into())
        }

        async fn delete_post(&self, id: Id, token: &UserToken) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM posts WHERE id = $1 AND user_token = $2")
                .bind(id)
                .bind(token.as_str())
                .execute(&self.pool).await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn react_to_post(&self, id: Id, kind: &str) -> RepoResult<Post> {
            let stored: Option<Json<Reactions>> =
                sqlx::query_scalar("SELECT reactions FROM posts WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool).await?
                    .ok_or(RepoError::NotFound)?;
            let reactions = apply_toggle(stored.map(|j| j.0), kind);
            // whole-map replace; no version check
            let sql = format!("UPDATE posts SET reactions = $2 WHERE id = $1 RETURNING {POST_COLUMNS}");
            let row = sqlx::query_as::<_, PostRow>(&sql)
                .bind(id)
                .bind(Json(reactions))
                .fetch_optional(&self.pool).await?
                .ok_or(RepoError::NotFound)?;
            Ok(row.into())
        }
    }

    #[async_trait]
    impl ScanRepo for PgRepo {
        async fn record_scan(&self, new: NewScan) -> RepoResult<ScanRecord> {
            let rec = sqlx::query_as::<_, ScanRecord>(
                "INSERT INTO scan_tracker (ip_address, user_agent) VALUES ($1,$2) \
                 RETURNING id, ip_address, user_agent, created_at"
            )
                .bind(new.ip_address.as_ref())
                .bind(new.user_agent.as_ref())
                .fetch_one(&self.pool).await?;
            Ok(rec)
        }

        async fn count_scans(&self) -> RepoResult<i64> {
            Ok(sqlx::query_scalar("SELECT COUNT(*) FROM scan_tracker").fetch_one(&self.pool).await?)
        }
    }

    #[async_trait]
    impl WildThoughtRepo for PgRepo {
        async fn create_wild_thought(&self, new: NewWildThought) -> RepoResult<WildThought> {
            let t = sqlx::query_as::<_, WildThought>(
                "INSERT INTO wild_thoughts (content, ip_address) VALUES ($1,$2) \
                 RETURNING id, content, ip_address, created_at"
            )
                .bind(&new.content)
                .bind(new.ip_address.as_ref())
                .fetch_one(&self.pool).await?;
            Ok(t)
        }

        async fn list_wild_thoughts(&self, page: Pagination) -> RepoResult<(Vec<WildThought>, i64)> {
            let total = self.count_wild_thoughts().await?;
            let rows = sqlx::query_as::<_, WildThought>(
                "SELECT id, content, ip_address, created_at FROM wild_thoughts \
                 ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
            )
                .bind(page.limit as i64)
                .bind(page.offset())
                .fetch_all(&self.pool).await?;
            Ok((rows, total))
        }

        async fn count_wild_thoughts(&self) -> RepoResult<i64> {
            Ok(sqlx::query_scalar("SELECT COUNT(*) FROM wild_thoughts").fetch_one(&self.pool).await?)
        }
    }
}
