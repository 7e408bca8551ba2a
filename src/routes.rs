use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::{Action, RateLimiterFacade};
use crate::repo::Repo;
use crate::scans::scan_message;
use crate::storage::{self, ImageStore, ImageStoreError, UploadPresigner};
use crate::tokens::UserToken;

const DEFAULT_FEED_LIMIT: u32 = 10;
const DEFAULT_THOUGHTS_LIMIT: u32 = 20;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| ApiError::validation(err.to_string()).into()))
        .app_data(web::QueryConfig::default().error_handler(|err, _req| ApiError::validation(err.to_string()).into()))
        .app_data(web::PathConfig::default().error_handler(|err, _req| ApiError::validation(err.to_string()).into()));

    cfg.route("/", web::get().to(root))
        .route("/health", web::get().to(health));

    cfg.service(
        web::scope("/api/posts")
            .service(web::resource("/create").route(web::post().to(create_post)))
            .service(web::resource("/posts").route(web::get().to(list_posts)))
            .service(web::resource("/hashtags/{tag}/posts").route(web::get().to(list_hashtag_posts)))
            .service(web::resource("/mydumps").route(web::get().to(list_my_posts)))
            .service(
                web::resource("/post/{id}")
                    .route(web::patch().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/post/{id}/react").route(web::post().to(react_to_post)))
            .service(web::resource("/upload-image").route(web::post().to(upload_image)))
            .service(web::resource("/upload/presigned-url").route(web::post().to(presigned_url))),
    );
    cfg.service(
        web::scope("/api/auth")
            .service(web::resource("/generate-token").route(web::post().to(generate_token))),
    );
    cfg.service(
        web::scope("/api/scans")
            .service(web::resource("/track").route(web::post().to(track_scan)))
            .service(web::resource("/count").route(web::get().to(scan_count)))
            .service(web::resource("/wild-thought").route(web::post().to(create_wild_thought)))
            .service(web::resource("/wild-thoughts").route(web::get().to(list_wild_thoughts)))
            .service(web::resource("/wild-thoughts/count").route(web::get().to(wild_thought_count))),
    );
    // public read-only file route (no /api prefix so <img src="/uploads/..."> works)
    cfg.route("/uploads/{name}", web::get().to(get_upload));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
    pub presigner: Option<Arc<dyn UploadPresigner>>,
    pub rate_limiter: Option<RateLimiterFacade>,
    /// Honour `Forwarded` / `X-Forwarded-For`; only safe behind a proxy that overwrites them.
    pub trust_forwarded: bool,
}

/// Client IP used for throttling and stored with scans and thoughts.
///
/// The socket peer is authoritative unless forwarded headers are trusted;
/// a forwarded value that is not a plain IP address falls back to the peer.
pub(crate) fn client_ip(req: &HttpRequest, trust_forwarded: bool) -> Option<IpAddr> {
    if trust_forwarded {
        if let Some(ip) = req.connection_info().realip_remote_addr().and_then(parse_ip) {
            return Some(ip);
        }
    }
    req.peer_addr().map(|a| a.ip())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<SocketAddr>()
        .map(|a| a.ip())
        .or_else(|_| raw.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>())
        .ok()
}

fn client_addr(data: &AppState, req: &HttpRequest) -> Option<String> {
    client_ip(req, data.trust_forwarded).map(|ip| ip.to_string())
}

fn throttle(data: &AppState, action: Action, req: &HttpRequest) -> Result<(), ApiError> {
    if let Some(rl) = &data.rate_limiter {
        let client = client_addr(data, req).unwrap_or_else(|| "unknown".into());
        if !rl.allow(action, &client) {
            log::warn!("rate limited action={action:?} client={client}");
            return Err(ApiError::RateLimited);
        }
    }
    Ok(())
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "message": "Welcome to Dumps API" }))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "healthy" }))
}

// ---------------- posts ----------------

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub hashtag: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MyDumpsQuery {
    pub token: UserToken,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: UserToken,
}

#[derive(Debug, Deserialize)]
pub struct ReactQuery {
    pub reaction: String,
    pub token: UserToken,
}

async fn feed(data: &AppState, filter: PostFilter, page: Option<u32>, limit: Option<u32>) -> Result<HttpResponse, ApiError> {
    let page = Pagination::new(page, limit, DEFAULT_FEED_LIMIT).map_err(ApiError::Validation)?;
    let (posts, total) = data.repo.list_posts(filter, page).await?;
    Ok(HttpResponse::Ok().json(PostPage { posts, total, page: page.page, limit: page.limit }))
}

#[utoipa::path(
    post,
    path = "/api/posts/create",
    request_body = NewPost,
    responses(
        (status = 200, description = "Post created", body = Post),
        (status = 400, description = "Validation error"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_post(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, Action::CreatePost, &req)?;
    let new = payload.into_inner();
    new.validate().map_err(ApiError::Validation)?;
    let post = data.repo.create_post(new).await?;
    metrics::counter!("dumps_posts_created_total").increment(1);
    log::info!("post created id={} hashtag={}", post.id, post.hashtag);
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    get,
    path = "/api/posts/posts",
    params(
        ("hashtag" = Option<String>, Query, description = "Filter by hashtag"),
        ("page" = Option<u32>, Query, description = "Page number (>= 1)"),
        ("limit" = Option<u32>, Query, description = "Posts per page (1..=100)")
    ),
    responses((status = 200, description = "Feed page, newest first", body = PostPage))
)]
pub async fn list_posts(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<FeedQuery>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, Action::ReadFeed, &req)?;
    let q = query.into_inner();
    let filter = match q.hashtag.filter(|h| !h.is_empty()) {
        Some(h) => PostFilter::Hashtag(h),
        None => PostFilter::All,
    };
    feed(&data, filter, q.page, q.limit).await
}

#[utoipa::path(
    get,
    path = "/api/posts/hashtags/{tag}/posts",
    params(
        ("tag" = String, Path, description = "Hashtag"),
        ("page" = Option<u32>, Query, description = "Page number (>= 1)"),
        ("limit" = Option<u32>, Query, description = "Posts per page (1..=100)")
    ),
    responses((status = 200, description = "Hashtag feed page", body = PostPage))
)]
pub async fn list_hashtag_posts(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, Action::ReadFeed, &req)?;
    let q = query.into_inner();
    feed(&data, PostFilter::Hashtag(path.into_inner()), q.page, q.limit).await
}

#[utoipa::path(
    get,
    path = "/api/posts/mydumps",
    params(
        ("token" = String, Query, description = "Owner token"),
        ("page" = Option<u32>, Query, description = "Page number (>= 1)"),
        ("limit" = Option<u32>, Query, description = "Posts per page (1..=100)")
    ),
    responses((status = 200, description = "Posts created with this token", body = PostPage))
)]
pub async fn list_my_posts(
    data: web::Data<AppState>,
    query: web::Query<MyDumpsQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    feed(&data, PostFilter::Owner(q.token.into_inner()), q.page, q.limit).await
}

#[utoipa::path(
    patch,
    path = "/api/posts/post/{id}",
    request_body = PostUpdate,
    params(("id" = i64, Path, description = "Post id"), ("token" = String, Query, description = "Owner token")),
    responses(
        (status = 200, description = "Post updated", body = Post),
        (status = 404, description = "Post not found or not authorized")
    )
)]
pub async fn update_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<TokenQuery>,
    payload: web::Json<PostUpdate>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    upd.validate().map_err(ApiError::Validation)?;
    let post = data.repo
        .update_post(path.into_inner(), &query.token, upd)
        .await
        .map_err(not_found_or_unauthorized)?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    delete,
    path = "/api/posts/post/{id}",
    params(("id" = i64, Path, description = "Post id"), ("token" = String, Query, description = "Owner token")),
    responses(
        (status = 200, description = "Post deleted"),
        (status = 404, description = "Post not found or not authorized")
    )
)]
pub async fn delete_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<TokenQuery>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo
        .delete_post(id, &query.token)
        .await
        .map_err(not_found_or_unauthorized)?;
    log::info!("post deleted id={id}");
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Post deleted successfully" })))
}

fn not_found_or_unauthorized(e: crate::repo::RepoError) -> ApiError {
    match e {
        crate::repo::RepoError::NotFound => ApiError::not_found("Post not found or not authorized"),
        other => other.into(),
    }
}

#[utoipa::path(
    post,
    path = "/api/posts/post/{id}/react",
    params(
        ("id" = i64, Path, description = "Post id"),
        ("reaction" = String, Query, description = "Reaction kind, e.g. heart"),
        ("token" = String, Query, description = "Caller token")
    ),
    responses(
        (status = 200, description = "Reaction toggled", body = Post),
        (status = 404, description = "Post not found")
    )
)]
pub async fn react_to_post(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<ReactQuery>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, Action::React, &req)?;
    let id = path.into_inner();
    let q = query.into_inner();
    if q.reaction.is_empty() {
        return Err(ApiError::validation("reaction must not be empty"));
    }
    let post = data.repo.react_to_post(id, &q.reaction).await.map_err(|e| match e {
        crate::repo::RepoError::NotFound => ApiError::not_found("Post not found"),
        other => other.into(),
    })?;
    metrics::counter!("dumps_reactions_total").increment(1);
    log::debug!("reaction post={id} kind={} token={}", q.reaction, q.token.as_str());
    Ok(HttpResponse::Ok().json(post))
}

// ---------------- media ----------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ImageUploadResponse {
    pub image_url: String,
    pub filename: String,
    pub size: usize,
}

#[utoipa::path(
    post,
    path = "/api/posts/upload-image",
    responses(
        (status = 201, description = "Image stored", body = ImageUploadResponse),
        (status = 400, description = "Not an image, too large, or no file field"),
    )
)]
pub async fn upload_image(
    req: HttpRequest,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, Action::Upload, &req)?;
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::warn!("multipart error: {e}");
        ApiError::validation(format!("malformed multipart body: {e}"))
    })? {
        if field.content_disposition().get_name() != Some("file") { continue; }
        let declared = field.content_type().map(|m| m.essence_str().to_string());
        let filename = field.content_disposition().get_filename().map(str::to_string);

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::warn!("stream read error: {e}");
            ApiError::validation(format!("failed to read upload: {e}"))
        })? {
            if bytes.len() + chunk.len() > storage::MAX_UPLOAD_BYTES {
                return Err(ApiError::InvalidMedia("File too large (max 5MB)".into()));
            }
            bytes.extend_from_slice(&chunk);
        }

        let mime = storage::resolve_image_mime(declared.as_deref(), &bytes).map_err(ApiError::InvalidMedia)?;
        let name = storage::unique_file_name(&storage::extension_for(&mime));
        log::debug!("storing upload {:?} as {name}", filename);
        data.image_store.save(&name, &bytes).await.map_err(|e| {
            log::error!("image_store save error: {e}");
            ApiError::Upstream(format!("Failed to upload image: {e}"))
        })?;
        metrics::counter!("dumps_uploads_total").increment(1);
        let resp = ImageUploadResponse {
            image_url: format!("{}/{}", storage::UPLOADS_PREFIX, name),
            filename: name,
            size: bytes.len(),
        };
        return Ok(HttpResponse::Created().json(resp));
    }
    Err(ApiError::validation("missing multipart field 'file'"))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PresignRequest {
    pub filename: String,
    pub content_type: String,
}

#[utoipa::path(
    post,
    path = "/api/posts/upload/presigned-url",
    request_body = PresignRequest,
    responses(
        (status = 200, description = "Direct-upload URL (valid one hour)", body = crate::storage::PresignedUpload),
        (status = 400, description = "Content type is not an image"),
        (status = 500, description = "Object store unavailable")
    )
)]
pub async fn presigned_url(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<PresignRequest>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, Action::Upload, &req)?;
    storage::require_image_content_type(&payload.content_type).map_err(ApiError::InvalidMedia)?;
    let presigner = data.presigner.as_ref().ok_or(ImageStoreError::NotConfigured)?;
    let key = storage::object_key(&payload.content_type);
    log::debug!("presigning {:?} as {key}", payload.filename);
    let upload = presigner.presign_put(&key, &payload.content_type).await?;
    Ok(HttpResponse::Ok().json(upload))
}

pub async fn get_upload(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let name = path.into_inner();
    match data.image_store.load(&name).await {
        Ok(bytes) => {
            let mime = infer::get(&bytes)
                .map(|t| t.mime_type().to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            Ok(HttpResponse::Ok().insert_header(("Content-Type", mime)).body(bytes))
        }
        Err(ImageStoreError::NotFound) => Err(ApiError::not_found("File not found")),
        Err(e) => { log::error!("image_store load error: {e}"); Err(ApiError::Internal) }
    }
}

// ---------------- tokens ----------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub message: String,
    pub created_at: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/generate-token",
    responses((status = 200, description = "Fresh anonymous owner token", body = TokenResponse))
)]
pub async fn generate_token() -> HttpResponse {
    let token = UserToken::generate();
    HttpResponse::Ok().json(TokenResponse {
        token: token.into_inner(),
        message: "Token generated successfully".into(),
        created_at: chrono::Utc::now().to_rfc3339(),
    })
}

// ---------------- scans & wild thoughts ----------------

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ScanResponse {
    pub position: i64,
    pub total: i64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CountResponse {
    pub total: i64,
}

#[utoipa::path(
    post,
    path = "/api/scans/track",
    responses((status = 200, description = "Scan recorded", body = ScanResponse))
)]
pub async fn track_scan(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user_agent = req
        .headers()
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    data.repo.record_scan(NewScan { ip_address: client_addr(&data, &req), user_agent }).await?;
    // the new row is included in the count, so it is this scan's ordinal
    let total = data.repo.count_scans().await?;
    metrics::counter!("dumps_scans_total").increment(1);
    Ok(HttpResponse::Ok().json(ScanResponse { position: total, total, message: scan_message(total) }))
}

#[utoipa::path(
    get,
    path = "/api/scans/count",
    responses((status = 200, description = "Total scans", body = CountResponse))
)]
pub async fn scan_count(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let total = data.repo.count_scans().await?;
    Ok(HttpResponse::Ok().json(CountResponse { total }))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct WildThoughtRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WildThoughtPage {
    pub thoughts: Vec<WildThoughtView>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

#[utoipa::path(
    post,
    path = "/api/scans/wild-thought",
    request_body = WildThoughtRequest,
    responses(
        (status = 200, description = "Thought stored"),
        (status = 400, description = "Empty or longer than 5000 characters")
    )
)]
pub async fn create_wild_thought(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<WildThoughtRequest>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, Action::WildThought, &req)?;
    let new = NewWildThought::new(&payload.content, client_addr(&data, &req)).map_err(ApiError::Validation)?;
    let thought = data.repo.create_wild_thought(new).await?;
    metrics::counter!("dumps_wild_thoughts_total").increment(1);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Your wild thought has been dumped!",
        "id": thought.id
    })))
}

#[utoipa::path(
    get,
    path = "/api/scans/wild-thoughts",
    params(
        ("page" = Option<u32>, Query, description = "Page number (>= 1)"),
        ("limit" = Option<u32>, Query, description = "Thoughts per page (1..=100)")
    ),
    responses((status = 200, description = "Newest first; submitter address never included", body = WildThoughtPage))
)]
pub async fn list_wild_thoughts(
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = Pagination::new(query.page, query.limit, DEFAULT_THOUGHTS_LIMIT).map_err(ApiError::Validation)?;
    let (rows, total) = data.repo.list_wild_thoughts(page).await?;
    let has_more = page.offset() + (rows.len() as i64) < total;
    Ok(HttpResponse::Ok().json(WildThoughtPage {
        thoughts: rows.into_iter().map(WildThoughtView::from).collect(),
        total,
        page: page.page,
        limit: page.limit,
        has_more,
    }))
}

#[utoipa::path(
    get,
    path = "/api/scans/wild-thoughts/count",
    responses((status = 200, description = "Total wild thoughts", body = CountResponse))
)]
pub async fn wild_thought_count(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let total = data.repo.count_wild_thoughts().await?;
    Ok(HttpResponse::Ok().json(CountResponse { total }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn peer() -> SocketAddr {
        "10.0.0.5:40123".parse().unwrap()
    }

    #[test]
    fn forwarded_headers_ignored_unless_trusted() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "1.2.3.4"))
            .peer_addr(peer())
            .to_http_request();
        assert_eq!(client_ip(&req, false), Some(peer().ip()));
        assert_eq!(client_ip(&req, true), Some("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn junk_forwarded_value_falls_back_to_peer() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "x".repeat(200)))
            .peer_addr(peer())
            .to_http_request();
        assert_eq!(client_ip(&req, true), Some(peer().ip()));
    }

    #[test]
    fn ip_parsing() {
        assert_eq!(parse_ip("192.168.1.1:8080"), Some("192.168.1.1".parse().unwrap()));
        assert_eq!(parse_ip("[::1]:443"), Some("::1".parse().unwrap()));
        assert_eq!(parse_ip("[2001:db8::1]"), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(parse_ip(" 8.8.8.8 "), Some("8.8.8.8".parse().unwrap()));
        assert_eq!(parse_ip("unknown"), None);
    }

    #[test]
    fn no_peer_no_address() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(client_ip(&req, false), None);
    }
}
