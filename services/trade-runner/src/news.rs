//! External news blob
//!
//! Fetching and deduplicating headlines is the aggregator's job. The runner only
//! holds the latest text and swaps it when the content changes.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tracing::{debug, info};

/// Section header prepended to the news text in prompts
pub const NEWS_HEADER: &str = "[Latest market news]";

const NO_NEWS: &str = "No recent news.";

/// Source of the aggregated news text
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<String>;
}

/// Reads the blob an external aggregator keeps on disk
pub struct FileNewsSource {
    path: PathBuf,
}

impl FileNewsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl NewsSource for FileNewsSource {
    async fn fetch(&self) -> anyhow::Result<String> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read news file {}: {}", self.path.display(), e))?;
        Ok(text)
    }
}

/// Latest news text with change detection
#[derive(Debug, Clone)]
pub struct NewsBoard {
    text: String,
    digest: Option<u64>,
}

impl NewsBoard {
    pub fn new() -> Self {
        Self {
            text: render(NO_NEWS),
            digest: None,
        }
    }

    /// Text as rendered into prompts
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the text if its content changed. Returns whether it did.
    pub fn update(&mut self, fresh: &str) -> bool {
        let body = fresh.trim();
        let body = if body.is_empty() { NO_NEWS } else { body };
        let digest = digest(body);
        if self.digest == Some(digest) {
            debug!("News unchanged");
            return false;
        }
        self.digest = Some(digest);
        self.text = render(body);
        info!("News updated ({} chars)", body.len());
        true
    }

    /// Pull from a source; a failed fetch keeps the current text
    pub async fn refresh(&mut self, source: &dyn NewsSource) -> anyhow::Result<bool> {
        let fresh = source.fetch().await?;
        Ok(self.update(&fresh))
    }
}

impl Default for NewsBoard {
    fn default() -> Self {
        Self::new()
    }
}

fn render(body: &str) -> String {
    if body.starts_with(NEWS_HEADER) {
        format!("{}\n", body)
    } else {
        format!("{}\n{}\n", NEWS_HEADER, body)
    }
}

fn digest(body: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    hasher.finish()
}
