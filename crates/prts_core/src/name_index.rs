use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{QueryError, QueryResult};
use crate::markup::scan_objects;
use crate::mediawiki::WikiReadApi;

/// Canonical enemy names from one aggregate snapshot, with the time it was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIndex {
    pub names: Vec<String>,
    /// Unix seconds.
    pub refreshed_at: u64,
}

impl NameIndex {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub trait IndexStore: Send {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<NameIndex>>;
    fn save(&self, index: &NameIndex) -> Result<()>;
}

/// Whole-document JSON persistence. Writes go to a sibling temp file that is
/// renamed over the target, so a reader never sees a half-written index.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IndexStore for JsonFileStore {
    fn load(&self) -> Result<Option<NameIndex>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let index = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(index))
    }

    fn save(&self, index: &NameIndex) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(index).context("failed to encode name index")?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, body)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub names: usize,
    pub skipped: usize,
    pub refreshed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub names: usize,
    pub refreshed_at: Option<u64>,
    pub fresh: bool,
    pub ttl_seconds: u64,
}

/// What an [`NameIndexCache::ensure_fresh`] call ended up doing.
#[derive(Debug)]
pub enum Freshness {
    AlreadyFresh,
    Refreshed(RefreshReport),
    /// Refresh failed; whatever was held before is still served.
    Degraded(QueryError),
}

/// Names extracted from an aggregate listing: de-duplicated, first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingNames {
    pub names: Vec<String>,
    pub skipped: usize,
}

pub fn names_from_listing(text: &str) -> ListingNames {
    let scan = scan_objects(text);
    let mut seen = HashSet::new();
    let mut listing = ListingNames {
        names: Vec::new(),
        skipped: scan.skipped,
    };
    for object in scan.objects {
        match object.get("name").and_then(Value::as_str).map(str::trim) {
            Some(name) if !name.is_empty() => {
                if seen.insert(name.to_string()) {
                    listing.names.push(name.to_string());
                }
            }
            _ => listing.skipped += 1,
        }
    }
    listing
}

/// Two states: stale (empty, or older than the TTL) and fresh. The in-memory
/// list is only ever replaced wholesale by a successful refresh.
pub struct NameIndexCache<S> {
    store: S,
    index: NameIndex,
    ttl_seconds: u64,
    aggregate_page: String,
}

impl<S: IndexStore> NameIndexCache<S> {
    pub fn new(store: S, ttl_seconds: u64, aggregate_page: impl Into<String>) -> Self {
        Self {
            store,
            index: NameIndex::default(),
            ttl_seconds,
            aggregate_page: aggregate_page.into(),
        }
    }

    /// Startup load. An absent or unreadable file leaves the cache empty and stale.
    pub fn load_from_store(&mut self) -> bool {
        match self.store.load() {
            Ok(Some(index)) => {
                info!(
                    names = index.names.len(),
                    refreshed_at = index.refreshed_at,
                    "loaded name index from disk"
                );
                self.index = index;
                true
            }
            Ok(None) => false,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "name index on disk is unusable; starting empty");
                false
            }
        }
    }

    /// A stamp from the future (clock skew, copied file) counts as stale.
    pub fn is_fresh(&self, now: u64) -> bool {
        !self.index.is_empty()
            && now
                .checked_sub(self.index.refreshed_at)
                .is_some_and(|age| age <= self.ttl_seconds)
    }

    pub fn ensure_fresh<A: WikiReadApi + ?Sized>(&mut self, api: &A, now: u64) -> Freshness {
        if self.is_fresh(now) {
            return Freshness::AlreadyFresh;
        }
        match self.force_refresh(api, now) {
            Ok(report) => Freshness::Refreshed(report),
            Err(error) => {
                warn!(
                    error = %error,
                    held = self.index.names.len(),
                    "name index refresh failed; serving previous data"
                );
                Freshness::Degraded(error)
            }
        }
    }

    /// Refresh regardless of age. On failure nothing held in memory changes; a
    /// failed save after a successful refresh is logged and the refresh stands.
    pub fn force_refresh<A: WikiReadApi + ?Sized>(
        &mut self,
        api: &A,
        now: u64,
    ) -> QueryResult<RefreshReport> {
        let report = self.refresh_in_memory(api, now)?;
        if let Err(error) = self.persist() {
            warn!(error = %format!("{error:#}"), "failed to persist name index");
        }
        Ok(report)
    }

    /// Replace the held names from the aggregate page without touching the store.
    pub fn refresh_in_memory<A: WikiReadApi + ?Sized>(
        &mut self,
        api: &A,
        now: u64,
    ) -> QueryResult<RefreshReport> {
        let page = api.fetch_page_markup(&self.aggregate_page)?;
        let Some(markup) = page.markup else {
            return Err(QueryError::NotFound(self.aggregate_page.clone()));
        };

        let listing = names_from_listing(&markup);
        if listing.names.is_empty() {
            return Err(QueryError::MalformedSource {
                source_name: self.aggregate_page.clone(),
                detail: format!("no usable objects ({} skipped)", listing.skipped),
            });
        }

        let report = RefreshReport {
            names: listing.names.len(),
            skipped: listing.skipped,
            refreshed_at: now,
        };
        self.index = NameIndex {
            names: listing.names,
            refreshed_at: now,
        };
        info!(names = report.names, skipped = report.skipped, "refreshed name index");
        Ok(report)
    }

    pub fn persist(&self) -> Result<()> {
        self.store.save(&self.index)
    }

    pub fn names(&self) -> &[String] {
        &self.index.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.names.iter().any(|entry| entry == name)
    }

    pub fn status(&self, now: u64) -> IndexStatus {
        IndexStatus {
            names: self.index.names.len(),
            refreshed_at: (!self.index.is_empty()).then_some(self.index.refreshed_at),
            fresh: self.is_fresh(now),
            ttl_seconds: self.ttl_seconds,
        }
    }
}
