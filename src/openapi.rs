use crate::models::{NewPost, Post, PostPage, PostUpdate, WildThoughtView};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(title = "Dumps API", description = "Anonymous posting, reactions, scan counter and wild thoughts"),
    paths(
        crate::routes::create_post,
        crate::routes::list_posts,
        crate::routes::list_hashtag_posts,
        crate::routes::list_my_posts,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::react_to_post,
        crate::routes::upload_image,
        crate::routes::presigned_url,
        crate::routes::generate_token,
        crate::routes::track_scan,
        crate::routes::scan_count,
        crate::routes::create_wild_thought,
        crate::routes::list_wild_thoughts,
        crate::routes::wild_thought_count,
    ),
    components(schemas(
        Post, NewPost, PostUpdate, PostPage, WildThoughtView,
        crate::routes::ImageUploadResponse, crate::routes::PresignRequest,
        crate::storage::PresignedUpload, crate::routes::TokenResponse,
        crate::routes::ScanResponse, crate::routes::CountResponse,
        crate::routes::WildThoughtRequest, crate::routes::WildThoughtPage
    )),
    tags(
        (name = "posts", description = "Post feed, ownership and reactions"),
        (name = "scans", description = "Scan counter and wild thoughts"),
    )
)]
pub struct ApiDoc;
