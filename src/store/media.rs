//! Blob storage for profile images
//!
//! The capability surface is upload-under-a-path plus a durable retrieval URL.
//! Objects live in memory keyed by `profileImages/{uid}/{name}` and are served
//! back under `/media/{key}`.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A stored binary object
#[derive(Clone)]
pub struct MediaObject {
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Upload is empty")]
    Empty,

    #[error("Upload exceeds the {max} byte limit")]
    TooLarge { max: usize },

    #[error("File name must not be empty or contain path separators")]
    BadFileName,
}

/// In-memory blob store
#[derive(Clone)]
pub struct MediaStore {
    objects: Arc<DashMap<String, MediaObject>>,
    max_bytes: usize,
}

impl MediaStore {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
            max_bytes,
        }
    }

    /// Store a profile image and return its retrieval key. Re-uploading under
    /// the same name overwrites.
    pub fn store_profile_image(
        &self,
        uid: Uuid,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, MediaError> {
        if data.is_empty() {
            return Err(MediaError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(MediaError::TooLarge { max: self.max_bytes });
        }
        if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
            return Err(MediaError::BadFileName);
        }

        let key = format!("profileImages/{}/{}", uid, file_name);
        info!(user_id = %uid, key, bytes = data.len(), "Stored profile image");
        self.objects.insert(
            key.clone(),
            MediaObject {
                content_type: content_type.to_string(),
                data,
            },
        );
        Ok(key)
    }

    /// Fetch a stored object by key.
    pub fn get(&self, key: &str) -> Option<MediaObject> {
        self.objects.get(key).map(|o| o.clone())
    }
}
