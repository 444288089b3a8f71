//! Raw file bytes on local disk, one flat directory keyed by stored name.

use std::{
    io,
    path::{Path, PathBuf},
};

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tokio::{fs, io::AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("invalid stored name: {0}")]
    InvalidName(String),
    #[error("upload body failed: {0}")]
    Body(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens (and creates) the storage directory.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a stored name to its file, refusing anything that could leave the directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_name(name) {
            return Err(StorageError::InvalidName(name.to_owned()));
        }
        Ok(self.root.join(name))
    }

    /// Streams `body` into `name`, stopping once more than `limit` bytes arrive.
    /// A failed write leaves nothing behind.
    pub async fn write_stream<S, E>(&self, name: &str, body: S, limit: u64) -> Result<u64, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let path = self.resolve(name)?;
        let file = fs::OpenOptions::new().write(true).create_new(true).open(&path).await?;
        let res = write_capped(file, body, limit).await;
        if res.is_err() {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial upload {}: {}", path.display(), e);
                }
            }
        }
        res
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(self.resolve(name)?).await?)
    }

    /// Writes `bytes` next to `name` without touching it. The returned
    /// [`Staged`] either replaces `name` on `commit` or is thrown away.
    pub async fn stage(&self, name: &str, bytes: &[u8]) -> Result<Staged, StorageError> {
        let dest = self.resolve(name)?;
        let tmp = self.root.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(Staged { tmp, dest })
    }

    /// Opens `name` for reading together with its length.
    pub async fn open_file(&self, name: &str) -> Result<(fs::File, u64), StorageError> {
        let file = fs::File::open(self.resolve(name)?).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Deletes `name`. Returns false if it was already gone.
    pub async fn remove(&self, name: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.resolve(name)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// New content for a stored file, not yet visible under its name.
#[derive(Debug)]
#[must_use = "a staged file is left behind unless committed or discarded"]
pub struct Staged {
    tmp: PathBuf,
    dest: PathBuf,
}

impl Staged {
    /// Atomically renames the staged bytes over the destination.
    pub async fn commit(self) -> Result<(), StorageError> {
        if let Err(e) = fs::rename(&self.tmp, &self.dest).await {
            self.discard().await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn discard(self) {
        if let Err(e) = fs::remove_file(&self.tmp).await {
            tracing::warn!("Failed to remove staged file {}: {}", self.tmp.display(), e);
        }
    }
}

async fn write_capped<S, E>(mut file: fs::File, body: S, limit: u64) -> Result<u64, StorageError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| StorageError::Body(e.to_string()))?;
        written += chunk.len() as u64;
        if written > limit {
            return Err(StorageError::TooLarge { limit });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Fresh stored name for an upload: a v4 UUID plus the original's extension.
pub fn safe_name(original: &str) -> String {
    format!("{}.{}", uuid::Uuid::new_v4(), extension_of(original).unwrap_or_else(|| "bin".to_string()))
}

/// Lower-cased alphanumeric extension, if the name has a usable one.
fn extension_of(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("bmp", "image/bmp"),
    ("ico", "image/vnd.microsoft.icon"),
    ("svg", "image/svg+xml"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("mkv", "video/x-matroska"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("flac", "audio/flac"),
    ("m4a", "audio/mp4"),
    ("pdf", "application/pdf"),
    ("json", "application/json"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("7z", "application/x-7z-compressed"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("xml", "application/xml"),
];

/// Content type from the file extension, `application/octet-stream` if unknown.
pub fn guess_content_type(name: &str) -> &'static str {
    extension_of(name)
        .and_then(|ext| CONTENT_TYPES.iter().find(|(e, _)| *e == ext).map(|(_, ct)| *ct))
        .unwrap_or("application/octet-stream")
}

/// The declared type unless it is missing or generic, else a guess from `name`.
pub fn resolve_content_type(declared: Option<&str>, name: &str) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_owned(),
        _ => guess_content_type(name).to_owned(),
    }
}
