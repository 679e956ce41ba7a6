use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    presigning::PresigningConfig,
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use uuid::Uuid;

use crate::config::StorageConfig;

/// Key prefix for uploaded product images.
pub const PRODUCT_IMAGE_PREFIX: &str = "products/";

const URL_TTL: Duration = Duration::from_secs(30 * 60);

/// Object store for product images.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put_image(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_image(&self, key: &str) -> anyhow::Result<()>;
    async fn presigned_url(&self, key: &str, ttl: Duration) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct S3ImageStore {
    client: Client,
    bucket: String,
}

impl S3ImageStore {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
        })
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn put_image(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {key}"))?;
        Ok(())
    }

    async fn delete_image(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {key}"))?;
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> anyhow::Result<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(ttl)?)
            .await
            .with_context(|| format!("s3 presign {key}"))?;
        Ok(presigned.uri().to_string())
    }
}

/// New object key for an uploaded image of the given MIME type.
pub fn new_image_key(content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("{PRODUCT_IMAGE_PREFIX}{}.{ext}", Uuid::new_v4())
}

/// Whether an image reference points into our bucket rather than elsewhere.
pub fn is_stored_key(reference: &str) -> bool {
    reference.starts_with(PRODUCT_IMAGE_PREFIX)
}

/// Public URL for an image reference: presigned for stored keys, as-is otherwise.
pub async fn resolve_image_url(store: &dyn ImageStore, reference: &str) -> Option<String> {
    if reference.is_empty() {
        return None;
    }
    if !is_stored_key(reference) {
        return Some(reference.to_string());
    }
    match store.presigned_url(reference, URL_TTL).await {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(error = %e, key = %reference, "presign failed");
            None
        }
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeImageStore;

    #[test]
    fn keys_live_under_product_prefix() {
        let key = new_image_key("image/png");
        assert!(key.starts_with("products/"));
        assert!(key.ends_with(".png"));
        assert!(new_image_key("application/octet-stream").ends_with(".bin"));
        assert!(is_stored_key(&key));
        assert!(!is_stored_key("https://cdn.example.com/a.png"));
    }

    #[test]
    fn mime_extensions() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("whatever/else"), None);
    }

    #[tokio::test]
    async fn resolves_urls_by_reference_kind() {
        let store = FakeImageStore::default();
        assert_eq!(resolve_image_url(&store, "").await, None);
        assert_eq!(
            resolve_image_url(&store, "https://cdn.example.com/a.png").await,
            Some("https://cdn.example.com/a.png".to_string())
        );
        let url = resolve_image_url(&store, "products/x.png").await.unwrap();
        assert!(url.contains("products/x.png"));
    }
}
