//! The skills catalog — documentation-backed pseudo-tools.
//!
//! Skills are fetched from a remote catalog and cached with a
//! cache-wide time-to-live. An entry older than the TTL is treated as
//! absent and triggers a full refresh of the entire cache — refresh is
//! all-or-nothing so every skill offered within one turn comes from the
//! same catalog snapshot, and no per-entry locking is needed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use spindle_core::error::RegistryError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A cached skill: a named document the model can "invoke" to pull the
/// full text into its context.
#[derive(Debug, Clone)]
pub struct SkillEntry {
    pub name: String,
    pub description: String,
    /// The skill's full documentation body.
    pub content: String,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
}

/// A remote catalog of skills.
#[async_trait]
pub trait SkillSource: Send + Sync {
    /// Fetch the complete catalog. Called only on cache refresh.
    async fn fetch_catalog(&self) -> Result<Vec<SkillEntry>, RegistryError>;
}

/// A source with no skills — used when the catalog is not configured.
pub struct NoSkillSource;

#[async_trait]
impl SkillSource for NoSkillSource {
    async fn fetch_catalog(&self) -> Result<Vec<SkillEntry>, RegistryError> {
        Ok(Vec::new())
    }
}

/// Index row shape served by an HTTP skill catalog.
#[derive(Debug, Deserialize)]
struct SkillIndexEntry {
    name: String,
    #[serde(default)]
    description: String,
    url: String,
}

/// Fetches a JSON index document listing skills, then each skill's body.
pub struct HttpSkillSource {
    client: reqwest::Client,
    index_url: String,
}

impl HttpSkillSource {
    pub fn new(index_url: impl Into<String>) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RegistryError::SkillSourceUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            index_url: index_url.into(),
        })
    }
}

#[async_trait]
impl SkillSource for HttpSkillSource {
    async fn fetch_catalog(&self) -> Result<Vec<SkillEntry>, RegistryError> {
        let index: Vec<SkillIndexEntry> = self
            .client
            .get(&self.index_url)
            .send()
            .await
            .map_err(|e| RegistryError::SkillSourceUnavailable(format!("index fetch: {e}")))?
            .json()
            .await
            .map_err(|e| RegistryError::SkillSourceUnavailable(format!("index parse: {e}")))?;

        let now = Utc::now();
        let mut entries = Vec::with_capacity(index.len());
        for item in index {
            // One unreadable document fails the whole refresh — a partial
            // catalog must never be cached as if it were complete.
            let content = self
                .client
                .get(&item.url)
                .send()
                .await
                .map_err(|e| {
                    RegistryError::SkillSourceUnavailable(format!("body fetch {}: {e}", item.name))
                })?
                .text()
                .await
                .map_err(|e| {
                    RegistryError::SkillSourceUnavailable(format!("body read {}: {e}", item.name))
                })?;

            entries.push(SkillEntry {
                name: item.name,
                description: item.description,
                content,
                source_url: item.url,
                fetched_at: now,
            });
        }

        info!(count = entries.len(), "Fetched skill catalog");
        Ok(entries)
    }
}

struct CacheState {
    entries: Vec<SkillEntry>,
    fetched_at: Option<DateTime<Utc>>,
}

/// TTL'd cache over a [`SkillSource`].
///
/// Readers run concurrently; a refresh takes the write lock and is
/// double-checked so concurrent expired readers trigger exactly one
/// upstream fetch.
pub struct SkillCache {
    source: Arc<dyn SkillSource>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl SkillCache {
    pub fn new(source: Arc<dyn SkillSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: RwLock::new(CacheState {
                entries: Vec::new(),
                fetched_at: None,
            }),
        }
    }

    fn is_fresh(&self, fetched_at: Option<DateTime<Utc>>) -> bool {
        match fetched_at {
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                age.to_std().map(|a| a < self.ttl).unwrap_or(true)
            }
            None => false,
        }
    }

    /// Current catalog snapshot, refreshing first if empty or expired.
    pub async fn entries(&self) -> Result<Vec<SkillEntry>, RegistryError> {
        {
            let state = self.state.read().await;
            if self.is_fresh(state.fetched_at) {
                return Ok(state.entries.clone());
            }
        }

        let mut state = self.state.write().await;
        // Double-check: another task may have refreshed while we waited.
        if self.is_fresh(state.fetched_at) {
            return Ok(state.entries.clone());
        }

        debug!("Skill cache empty or expired, refreshing");
        let entries = self.source.fetch_catalog().await?;
        state.entries = entries.clone();
        state.fetched_at = Some(Utc::now());
        Ok(entries)
    }

    /// Like [`entries`](Self::entries), but a refresh failure degrades to
    /// the empty catalog instead of erroring — a dead skill source must
    /// not fail the turn.
    pub async fn entries_or_empty(&self) -> Vec<SkillEntry> {
        match self.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skill catalog unavailable, offering no skill tools: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts upstream fetches; optionally fails every fetch.
    pub(crate) struct CountingSource {
        pub fetches: AtomicUsize,
        pub fail: bool,
        pub skills: Vec<(String, String, String)>,
    }

    impl CountingSource {
        pub(crate) fn with_skills(skills: Vec<(&str, &str, &str)>) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                fail: false,
                skills: skills
                    .into_iter()
                    .map(|(n, d, c)| (n.to_string(), d.to_string(), c.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl SkillSource for CountingSource {
        async fn fetch_catalog(&self) -> Result<Vec<SkillEntry>, RegistryError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RegistryError::SkillSourceUnavailable("down".into()));
            }
            Ok(self
                .skills
                .iter()
                .map(|(name, description, content)| SkillEntry {
                    name: name.clone(),
                    description: description.clone(),
                    content: content.clone(),
                    source_url: format!("https://skills.example/{name}"),
                    fetched_at: Utc::now(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn first_read_refreshes_once() {
        let source = Arc::new(CountingSource::with_skills(vec![(
            "Weather",
            "Weather lookups",
            "Full weather doc",
        )]));
        let cache = SkillCache::new(source.clone(), Duration::from_secs(3600));

        let entries = cache.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        // Within the TTL a second read hits the cache.
        let _ = cache.entries().await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_refreshes_every_read() {
        let source = Arc::new(CountingSource::with_skills(vec![("A", "", "doc")]));
        let cache = SkillCache::new(source.clone(), Duration::from_secs(0));

        let _ = cache.entries().await.unwrap();
        let _ = cache.entries().await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_degrades_to_empty() {
        let mut source = CountingSource::with_skills(vec![("A", "", "doc")]);
        source.fail = true;
        let cache = SkillCache::new(Arc::new(source), Duration::from_secs(3600));

        assert!(cache.entries().await.is_err());
        assert!(cache.entries_or_empty().await.is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_caches_nothing() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            fail: true,
            skills: vec![],
        });
        let cache = SkillCache::new(source.clone(), Duration::from_secs(3600));

        let _ = cache.entries().await;
        let _ = cache.entries().await;
        // A failure leaves the cache unfetched, so the next read retries.
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }
}
