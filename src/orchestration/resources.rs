//! Resource providers and progress callbacks consumed by the engine

use crate::provider::TokenUsage;
use anyhow::Result;
use async_trait::async_trait;

/// A resource delivered to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedResource {
    /// Requested id
    pub id: String,
    /// Text content, or a failure placeholder for guides that did not load
    pub content: String,
    /// Category (e.g. "characters", "chapters", "guides")
    pub group: String,
    /// Where the content came from, if known
    pub origin: Option<String>,
}

impl LoadedResource {
    /// Create a resource without origin
    pub fn new(id: impl Into<String>, content: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            group: group.into(),
            origin: None,
        }
    }

    /// Set the origin
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Catalog entry describing a fetchable context resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Resource id
    pub id: String,
    /// Category
    pub group: String,
}

/// Loads craft guides by id
#[async_trait]
pub trait GuideLoader: Send + Sync {
    /// Load one guide. Failures are per guide.
    async fn load(&self, id: &str) -> Result<String>;

    /// Ids the model may request
    fn catalog(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Loads project context resources
#[async_trait]
pub trait ContextResourceProvider: Send + Sync {
    /// Load the given ids. Unknown or unreadable ids are omitted from the result.
    async fn load_many(&self, ids: &[String]) -> Vec<LoadedResource>;

    /// Resources the model may request
    fn catalog(&self) -> Vec<CatalogEntry> {
        Vec::new()
    }
}

/// Fire-and-forget progress notifications
pub trait StatusCallback: Send + Sync {
    /// Report progress such as "loading guide X"
    fn notify(&self, message: &str, ticker: Option<&str>);
}

impl<F> StatusCallback for F
where
    F: Fn(&str, Option<&str>) + Send + Sync,
{
    fn notify(&self, message: &str, ticker: Option<&str>) {
        self(message, ticker)
    }
}

/// Receives the usage of every completed model call
pub trait UsageCallback: Send + Sync {
    /// Called once per completed call
    fn notify(&self, delta: &TokenUsage);
}

impl<F> UsageCallback for F
where
    F: Fn(&TokenUsage) + Send + Sync,
{
    fn notify(&self, delta: &TokenUsage) {
        self(delta)
    }
}
