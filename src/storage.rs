use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::config::S3Settings;

pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const PRESIGN_TTL: Duration = Duration::from_secs(3600);
pub const UPLOADS_PREFIX: &str = "/uploads";

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("not_found")]
    NotFound,
    #[error("object storage not configured")]
    NotConfigured,
    #[error("other: {0}")]
    Other(String),
}

/// Destination for directly uploaded files.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, name: &str) -> Result<Vec<u8>, ImageStoreError>;
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct PresignedUpload {
    pub upload_url: String,
    pub public_url: String,
    pub key: String,
    pub expires_in: u64,
}

/// Hands out time-boxed direct-to-bucket write URLs. The upload itself never
/// passes through this service.
#[async_trait]
pub trait UploadPresigner: Send + Sync {
    async fn presign_put(&self, key: &str, content_type: &str) -> Result<PresignedUpload, ImageStoreError>;
}

// ---------------- local disk ----------------

pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!("local uploads directory: {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        if !is_safe_name(name) {
            return None;
        }
        Some(self.root.join(name))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(name).ok_or_else(|| ImageStoreError::Other(format!("invalid file name '{name}'")))?;
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            log::error!("write failed path={} err={e}", path.display());
            ImageStoreError::Other(e.to_string())
        })
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>, ImageStoreError> {
        let path = self.path_for(name).ok_or(ImageStoreError::NotFound)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ImageStoreError::NotFound),
            Err(e) => Err(ImageStoreError::Other(e.to_string())),
        }
    }
}

/// Single path segment made of `[A-Za-z0-9._-]`, not starting with a dot.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

// ---------------- S3 presigning ----------------

pub struct S3Presigner {
    bucket: String,
    region: String,
    public_base_url: Option<String>,
    client: aws_sdk_s3::Client,
}

impl S3Presigner {
    pub async fn new(settings: &S3Settings) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()));
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(settings.endpoint.is_some())
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);

        if let Err(e) = client.head_bucket().bucket(&settings.bucket).send().await {
            warn!("head_bucket failed for '{}': {e:?}; presigned uploads may fail", settings.bucket);
        }
        info!("initialized S3 presigner for bucket '{}'", settings.bucket);

        Ok(Self {
            bucket: settings.bucket.clone(),
            region: settings.region.clone(),
            public_base_url: settings.public_base_url.clone(),
            client,
        })
    }

    fn public_url(&self, key: &str) -> String {
        public_object_url(self.public_base_url.as_deref(), &self.bucket, &self.region, key)
    }
}

#[async_trait]
impl UploadPresigner for S3Presigner {
    async fn presign_put(&self, key: &str, content_type: &str) -> Result<PresignedUpload, ImageStoreError> {
        use aws_sdk_s3::presigning::PresigningConfig;

        let cfg = PresigningConfig::expires_in(PRESIGN_TTL)
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        let req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(cfg)
            .await
            .map_err(|e| {
                log::error!("presign failed key={key} bucket={} err={e:?}", self.bucket);
                ImageStoreError::Other(e.to_string())
            })?;
        Ok(PresignedUpload {
            upload_url: req.uri().to_string(),
            public_url: self.public_url(key),
            key: key.to_string(),
            expires_in: PRESIGN_TTL.as_secs(),
        })
    }
}

pub fn public_object_url(base: Option<&str>, bucket: &str, region: &str, key: &str) -> String {
    match base {
        Some(b) => format!("{}/{}", b.trim_end_matches('/'), key),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
    }
}

// ---------------- validation & naming ----------------

/// Resolve the MIME type of an upload and require an image.
///
/// The declared type wins; when it is missing or generic the bytes are sniffed.
pub fn resolve_image_mime(declared: Option<&str>, bytes: &[u8]) -> Result<String, String> {
    let mime = match declared {
        Some(m) if !m.is_empty() && m != "application/octet-stream" => m.to_ascii_lowercase(),
        _ => infer::get(bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into()),
    };
    if !mime.starts_with("image/") {
        return Err(format!("File must be an image (got {mime})"));
    }
    Ok(mime)
}

pub fn require_image_content_type(content_type: &str) -> Result<(), String> {
    if !content_type.to_ascii_lowercase().starts_with("image/") {
        return Err(format!("File must be an image (got {content_type})"));
    }
    Ok(())
}

/// File extension for a resolved image MIME type. The client's filename never decides it.
pub fn extension_for(mime: &str) -> String {
    let subtype = mime.split('/').nth(1).unwrap_or("");
    let subtype = subtype.split(['+', ';']).next().unwrap_or("");
    match subtype {
        "jpeg" => "jpg".into(),
        s if !s.is_empty() && s.len() <= 8 && s.chars().all(|c| c.is_ascii_alphanumeric()) => s.into(),
        _ => "bin".into(),
    }
}

pub fn unique_file_name(ext: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), ext)
}

pub fn object_key(content_type: &str) -> String {
    format!("posts/{}", unique_file_name(&extension_for(content_type)))
}
