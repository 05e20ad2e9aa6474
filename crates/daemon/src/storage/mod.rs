//! Object storage for generated media, and fetching media back by URL.
//!
//! Uploads are routed to a bucket by content-type prefix. The local backend
//! writes under `{root}/{bucket}/{key}` and serves them from
//! `{public_base_url}/{bucket}/{key}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores `bytes` under `key` and returns the public URL.
    async fn upload(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<String>;
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Images,
    Videos,
    Audio,
}

impl Bucket {
    pub fn for_content_type(content_type: &str) -> Option<Bucket> {
        let content_type = content_type.trim().to_ascii_lowercase();
        if content_type.starts_with("image/") {
            Some(Bucket::Images)
        } else if content_type.starts_with("video/") {
            Some(Bucket::Videos)
        } else if content_type.starts_with("audio/") {
            Some(Bucket::Audio)
        } else {
            None
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Bucket::Images => "images",
            Bucket::Videos => "videos",
            Bucket::Audio => "audio",
        }
    }
}

/// Filesystem-backed storage.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root {}", root.display()))?;
        Ok(LocalStorage {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps one of our public URLs back to the file behind it.
    pub fn local_path_for(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(&self.public_base_url)?.strip_prefix('/')?;
        let relative = checked_key(rest).ok()?;
        Some(self.root.join(relative))
    }
}

/// Keys are relative, slash-separated paths without `..`.
fn checked_key(key: &str) -> Result<PathBuf> {
    let path = Path::new(key);
    let clean = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if key.is_empty() || !clean {
        anyhow::bail!("invalid storage key {:?}", key);
    }
    Ok(path.to_path_buf())
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<String> {
        let bucket = Bucket::for_content_type(content_type)
            .ok_or_else(|| anyhow::anyhow!("no storage bucket for content type {:?}", content_type))?;
        let relative = checked_key(key)?;
        let path = self.root.join(bucket.dir_name()).join(&relative);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(format!("{}/{}/{}", self.public_base_url, bucket.dir_name(), key))
    }
}

/// Fetches over HTTP, short-circuiting URLs that point into local storage.
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    local: Option<LocalStorage>,
}

impl HttpMediaFetcher {
    pub fn new(local: Option<LocalStorage>) -> Self {
        HttpMediaFetcher {
            client: reqwest::Client::new(),
            local,
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if let Some(path) = self.local.as_ref().and_then(|l| l.local_path_for(url)) {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            return Ok(Bytes::from(data));
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("fetching {} returned {}", url, status);
        }
        Ok(response.bytes().await?)
    }
}
