use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Current UTC time at the millisecond precision the database stores.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Stored description of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadataRecord {
    /// Unique, URL-safe name the file is served under.
    pub path: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub content_type: String,
    #[serde(default)]
    pub access_count: i64,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl FileMetadataRecord {
    /// A record created now, optionally expiring after `ttl`.
    pub fn new(
        path: impl Into<String>,
        original_name: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: i64,
        ttl: Option<Duration>,
    ) -> Self {
        let created_at = now_millis();
        Self {
            path: path.into(),
            original_name: original_name.into(),
            size_bytes,
            created_at,
            expires_at: ttl.map(|ttl| created_at + ttl),
            content_type: content_type.into(),
            access_count: 0,
            last_accessed: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
    pub file_url: String,
    pub download_url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFailure {
    pub error: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadOutcome {
    Uploaded(UploadResponse),
    Failed(UploadFailure),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiUploadResponse {
    pub success: bool,
    pub uploaded_count: usize,
    pub failed_count: usize,
    pub files: Vec<UploadOutcome>,
}

/// Body of `POST /api/compress/{path}`. Every field is optional.
///
/// `lossless` is accepted but has no effect: WebP output is always lossless.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressRequest {
    pub quality: Option<u8>,
    pub max_width: Option<u32>,
    pub to_webp: Option<bool>,
    pub lossless: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentTypeCount {
    pub content_type: String,
    pub count: i64,
}
