//! Artifact uploader: derive a deterministic storage key and stream
//! a Provider-returned URL into durable object storage.

use async_trait::async_trait;
use mediaforge_core::errors::{StorageError, StorageResult};
use mediaforge_core::types::ResourceType;
use uuid::Uuid;

/// The out-of-scope object-storage collaborator: `Put(key, sourceURL) -> storedURL`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, source_url: &str) -> StorageResult<String>;
}

/// Fetches `source_url` and re-streams it to a configured backend
/// endpoint. The backend itself (S3, GCS, a CDN origin, ...) is opaque;
/// this adapter only knows how to compose the final object URL.
pub struct HttpStreamingStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStreamingStore {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpStreamingStore {
    async fn put(&self, key: &str, source_url: &str) -> StorageResult<String> {
        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| StorageError::FetchFailed {
                url: source_url.to_string(),
                message: e.to_string(),
            })?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::FetchFailed {
                url: source_url.to_string(),
                message: e.to_string(),
            })?;

        let dest = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        self.client
            .put(&dest)
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::PutFailed(e.to_string()))?;

        Ok(dest)
    }
}

/// Given `(accountId, taskType, taskId, sourceURL, resourceType)`, derive
/// a filename/key and stream the artifact into the object store.
pub struct ArtifactUploader {
    store: std::sync::Arc<dyn ObjectStore>,
}

impl ArtifactUploader {
    pub fn new(store: std::sync::Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn upload(
        &self,
        account_id: Uuid,
        task_type: &str,
        task_id: Uuid,
        index: usize,
        source_url: &str,
        resource_type: ResourceType,
    ) -> StorageResult<String> {
        let ext = infer_extension(source_url, resource_type);
        let suffix = Uuid::new_v4().simple().to_string();
        let suffix = &suffix[..10];
        let filename = format!("{task_type}_{task_id}_{index}_{suffix}{ext}");
        let key = format!("{account_id}/{task_type}/{task_id}/{filename}");
        self.store.put(&key, source_url).await
    }
}

/// URL path extension first, then a category default. A real
/// implementation would also probe Content-Type; this crate keeps the
/// inference local and deterministic since none of the test providers
/// return a MIME type worth trusting.
fn infer_extension(source_url: &str, resource_type: ResourceType) -> &'static str {
    let path_ext = source_url
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match path_ext.as_deref() {
        Some("mp4") => return ".mp4",
        Some("png") => return ".png",
        Some("jpg") | Some("jpeg") => return ".jpg",
        Some("mp3") => return ".mp3",
        Some("wav") => return ".wav",
        Some("obj") => return ".obj",
        _ => {}
    }

    match resource_type {
        ResourceType::Video => ".mp4",
        ResourceType::Image => ".jpg",
        ResourceType::Audio => ".mp3",
        ResourceType::Model3d => ".obj",
        ResourceType::Text => ".bin",
    }
}

/// In-memory object store used only under `#[cfg(test)]` by downstream
/// crates exercising the full Handler/Executor path without a real
/// storage backend.
#[cfg(any(test, feature = "test-util"))]
pub struct FakeObjectStore;

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put(&self, key: &str, _source_url: &str) -> StorageResult<String> {
        Ok(format!("fake://store/{key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_prefers_url_path_over_category_default() {
        assert_eq!(
            infer_extension("https://ext/x.png", ResourceType::Video),
            ".png"
        );
    }

    #[test]
    fn extension_falls_back_to_category_default() {
        assert_eq!(
            infer_extension("https://ext/x", ResourceType::Video),
            ".mp4"
        );
        assert_eq!(
            infer_extension("https://ext/x", ResourceType::Image),
            ".jpg"
        );
        assert_eq!(
            infer_extension("https://ext/x", ResourceType::Audio),
            ".mp3"
        );
        assert_eq!(
            infer_extension("https://ext/x", ResourceType::Model3d),
            ".obj"
        );
    }

    #[tokio::test]
    async fn uploader_composes_account_scoped_key() {
        let uploader = ArtifactUploader::new(std::sync::Arc::new(FakeObjectStore));
        let account_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let url = uploader
            .upload(
                account_id,
                "image_txt2img",
                task_id,
                0,
                "https://ext/x.png",
                ResourceType::Image,
            )
            .await
            .unwrap();
        assert!(url.starts_with(&format!("fake://store/{account_id}/image_txt2img/{task_id}/")));
        assert!(url.ends_with(".png"));
    }
}
